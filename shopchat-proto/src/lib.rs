//! Shared protocol definitions for the Shopchat wire format.

pub mod codec;
pub mod message;
pub mod wire;
