//! mqbridge core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire-level contracts shared by the gateway and its
//! tests: broker topics and messages, viewer frames, control commands and
//! telemetry payloads. It carries no runtime or network dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! Malformed viewer or broker input always surfaces as `BridgeError`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod message;
pub mod protocol;
pub mod topic;

/// Shared result type.
pub use error::{BridgeError, ErrorCode, Result};
pub use message::BrokerMessage;
pub use topic::{Topic, TopicKind, TopicSet};
