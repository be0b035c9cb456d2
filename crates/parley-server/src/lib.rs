//! # parley-server
//!
//! Realtime direct-messaging server.
//!
//! Exposes a WebSocket endpoint speaking the `parley-protocol` JSON
//! event protocol, backed by the `parley-core` engine. The binary wires
//! the in-memory store; a durable backend plugs in through the
//! `parley_core::Store` trait.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
