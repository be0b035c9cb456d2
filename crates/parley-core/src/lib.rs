//! # parley-core
//!
//! Core session tracking, message fan-out, and storage abstraction for the
//! Parley direct-messaging engine.
//!
//! This crate provides the building blocks the server composes:
//!
//! - **Store** - Durable-store trait plus an in-memory implementation
//! - **RoomRouter** - Chat-scoped broadcast groups and subscriptions
//! - **ConnectionRegistry** - Live user → connection mapping
//! - **Engine** - Validates, persists, and fans out every operation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Engine    │────▶│ RoomRouter  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │        │
//!                        ▼        ▼
//!                 ┌──────────┐ ┌──────────┐
//!                 │  Store   │ │ Registry │
//!                 └──────────┘ └──────────┘
//! ```

pub mod engine;
pub mod memory;
pub mod model;
pub mod presence;
pub mod registry;
pub mod room;
pub mod router;
pub mod sequence;
pub mod store;
pub mod typing;

pub use engine::{Engine, EngineConfig, EngineError, JoinOutcome};
pub use memory::MemoryStore;
pub use model::{Chat, ChatId, Message, MessageId, User, UserId};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use room::{Room, RoomEvent};
pub use router::{RoomRouter, RouterConfig, RouterError};
pub use store::{RetryPolicy, Store, StoreError};
