//! Viewer side of the bridge.
//!
//! `ClientRegistry` is the single source of truth for connected viewers;
//! `SessionHandle` is a viewer's shared, close-once handle; `TelemetryState`
//! is the server's own broker consumer feeding `/v1/status`.

pub mod registry;
pub mod session;
pub mod telemetry;

pub use registry::ClientRegistry;
pub use session::{SendOutcome, SessionHandle, SessionId};
pub use telemetry::TelemetryState;
