//! Transport layer (WebSocket).
//!
//! Exposes the viewer upgrade handler and the codec that decodes each frame
//! once before the session acts on it.

pub mod codec;
pub mod ws;
