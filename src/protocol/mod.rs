//! Wire protocol for the external learning service.
//!
//! Messages are sequences of length-prefixed JSON frames sent over a fresh
//! TCP connection per exchange. See [`exchange`] for the frame layouts and
//! [`ProtocolClient`] for the connection lifecycle.

mod client;
pub mod exchange;
pub mod frame;

pub use client::ProtocolClient;
pub use exchange::{Exchange, Message};

/// Default learning-service port.
pub const DEFAULT_PORT: u16 = 9381;
