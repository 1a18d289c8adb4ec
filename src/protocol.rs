//! Viewer wire protocol
//!
//! JSON messages exchanged with a viewer over its WebSocket. Inbound traffic
//! is limited to `{"command": "start"}` / `{"command": "stop"}`; outbound
//! traffic is `{"frame": "<base64 jpeg>"}` or `{"error": "<message>"}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::session::StreamNotice;

/// Control command sent by a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Begin (or resume) receiving frames
    Start,
    /// Stop receiving frames but keep the connection open
    Stop,
}

impl Command {
    /// Parse a command from a text message
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Message sent to a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServerMessage {
    /// One encoded frame, base64 text
    #[serde(rename = "frame")]
    Frame(String),
    /// A failure notice
    #[serde(rename = "error")]
    Error(String),
}

impl ServerMessage {
    /// Build a frame message from encoded image bytes
    pub fn frame(data: &[u8]) -> Self {
        ServerMessage::Frame(BASE64.encode(data))
    }

    /// Build an error message from a stream notice
    pub fn error(notice: &StreamNotice) -> Self {
        ServerMessage::Error(notice.to_string())
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NoticeKind;

    #[test]
    fn test_parse_start() {
        let command = Command::parse(r#"{"command": "start"}"#).unwrap();
        assert_eq!(command, Command::Start);
    }

    #[test]
    fn test_parse_stop() {
        let command = Command::parse(r#"{"command": "stop"}"#).unwrap();
        assert_eq!(command, Command::Stop);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Command::parse(r#"{"command": "pause"}"#).is_err());
        assert!(Command::parse(r#"{"cmd": "start"}"#).is_err());
        assert!(Command::parse("not json").is_err());
    }

    #[test]
    fn test_frame_message_shape() {
        let message = ServerMessage::frame(b"\xff\xd8\xff\xd9");
        let text = message.to_text().unwrap();

        assert_eq!(text, r#"{"frame":"/9j/2Q=="}"#);
    }

    #[test]
    fn test_error_message_shape() {
        let notice = StreamNotice::new(NoticeKind::NotFound, "no such source");
        let text = ServerMessage::error(&notice).to_text().unwrap();

        assert_eq!(text, r#"{"error":"not-found: no such source"}"#);
    }
}
