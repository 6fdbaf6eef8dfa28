//! Shopchat relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, assigns server identifiers to submitted
//! messages, answers each submission directly, and broadcasts accepted
//! messages to every subscriber of the conversation — the submitter's own
//! connection included.

pub mod config;
pub mod history;
pub mod relay;
pub mod subscriptions;
