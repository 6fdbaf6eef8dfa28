//! Shopchat — optimistic conversation client for the storefront support chat.
//!
//! A sent message appears immediately as a provisional entry and is
//! reconciled in place once the relay confirms it, whether the confirmation
//! arrives as the direct submission response or as the realtime echo — in
//! either order, exactly one entry survives.

pub mod backend;
pub mod channel;
pub mod config;
pub mod relay_client;
pub mod session;
