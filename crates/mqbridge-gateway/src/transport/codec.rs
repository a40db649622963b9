//! Decode-once codec for viewer frames.
//!
//! - Text frames => control request or ignored shape
//! - Binary frames => ignored
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use serde_json::Value;

use mqbridge_core::error::Result;
use mqbridge_core::protocol::viewer::{decode_viewer_text, ViewerFrame};

#[derive(Debug)]
pub enum Inbound {
    Control { payload: Value },
    Ignored,
    Ping,
    Pong,
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => match decode_viewer_text(&s)? {
            ViewerFrame::Control { payload } => Ok(Inbound::Control { payload }),
            ViewerFrame::Ignored => Ok(Inbound::Ignored),
        },
        Message::Binary(_) => Ok(Inbound::Ignored),
        Message::Ping(_) => Ok(Inbound::Ping),
        Message::Pong(_) => Ok(Inbound::Pong),
        Message::Close(_) => Ok(Inbound::Close),
    }
}
