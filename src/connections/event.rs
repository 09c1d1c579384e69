//! Inbound frame classification.

use axum::body::Bytes;
use axum::extract::ws::Message;
use std::fmt;

/// A tagged notification derived from one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Keep-alive ping. Already answered and refreshed when yielded.
    Ping,
    /// Peer-initiated close frame.
    Close,
    /// Application payload (binary or text).
    Data(Bytes),
    /// Anything else, e.g. an unsolicited pong.
    Other,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ping => "ping",
            Event::Close => "close",
            Event::Data(_) => "data",
            Event::Other => "other",
        }
    }
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        match message {
            Message::Ping(_) => Event::Ping,
            Message::Close(_) => Event::Close,
            Message::Binary(payload) => Event::Data(payload),
            Message::Text(text) => Event::Data(Bytes::copy_from_slice(text.as_str().as_bytes())),
            Message::Pong(_) => Event::Other,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event<{}>", self.name())
    }
}

/// Name of a raw frame type, for logs and errors.
pub(crate) fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}
