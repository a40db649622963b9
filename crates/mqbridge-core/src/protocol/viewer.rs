//! Viewer -> server frames (JSON text).
//!
//! Only `{"type": "control", "payload": {...}}` carries meaning. Anything else
//! that is valid JSON is ignored; invalid JSON is an error.

use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Tag value marking a control frame.
pub const CONTROL_TYPE: &str = "control";

/// Decoded viewer frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerFrame {
    /// Control request; `payload` is forwarded to the broker.
    Control { payload: Value },
    /// Valid JSON of any other shape.
    Ignored,
}

/// Decode a text frame sent by a viewer.
pub fn decode_viewer_text(s: &str) -> Result<ViewerFrame> {
    let v: Value = serde_json::from_str(s)
        .map_err(|e| BridgeError::MalformedMessage(format!("invalid viewer json: {e}")))?;

    let Value::Object(mut obj) = v else {
        return Ok(ViewerFrame::Ignored);
    };
    if obj.get("type").and_then(Value::as_str) != Some(CONTROL_TYPE) {
        return Ok(ViewerFrame::Ignored);
    }

    match obj.remove("payload") {
        None | Some(Value::Null) => Err(BridgeError::MalformedMessage(
            "control frame without payload".into(),
        )),
        Some(payload) => Ok(ViewerFrame::Control { payload }),
    }
}
