//! Typed messages published to the front end.

use serde::{Deserialize, Serialize};

/// Kind of an [`ExternalMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Script output.
    Output,
    /// Compile error or explained runtime error.
    Error,
    /// The script is waiting for input.
    Input,
    /// The script is sleeping.
    Sleep,
    /// The run was interrupted.
    Interrupt,
    /// The debugger paused on a line.
    Debug,
    /// Modules are being installed.
    Loading,
    /// A run started.
    Start,
    /// A run finished normally.
    End,
}

impl MessageKind {
    /// Whether this kind ends a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageKind::End | MessageKind::Error | MessageKind::Interrupt)
    }
}

/// Payload of an [`ExternalMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageData {
    /// Numeric payload (sleep durations, line numbers).
    Number(u64),
    /// Textual payload.
    Text(String),
}

impl MessageData {
    /// Text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text),
            MessageData::Number(_) => None,
        }
    }

    /// Numeric payload, if any.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            MessageData::Number(n) => Some(*n),
            MessageData::Text(_) => None,
        }
    }
}

impl From<String> for MessageData {
    fn from(text: String) -> Self {
        MessageData::Text(text)
    }
}

impl From<&str> for MessageData {
    fn from(text: &str) -> Self {
        MessageData::Text(text.to_string())
    }
}

impl From<u64> for MessageData {
    fn from(n: u64) -> Self {
        MessageData::Number(n)
    }
}

/// One message of the ordered stream a run publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Payload.
    pub data: MessageData,
    /// Content type of the payload.
    #[serde(rename = "contentType")]
    pub content_type: String,
}

impl ExternalMessage {
    /// Build a message.
    pub fn new(kind: MessageKind, data: impl Into<MessageData>, content_type: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}
