use serde::{Deserialize, Serialize};

/// Content types shared by runtime events and external messages.
pub mod content_type {
    /// Plain text.
    pub const TEXT_PLAIN: &str = "text/plain";
    /// JSON document.
    pub const TEXT_JSON: &str = "text/json";
    /// A bare number.
    pub const APPLICATION_NUMBER: &str = "application/number";

    /// Content type of a base64-encoded image in the given format.
    pub fn image(format: &str) -> String {
        format!("img/{format};base64")
    }

    /// Whether a content type denotes image data.
    pub fn is_image(content_type: &str) -> bool {
        content_type.starts_with("img/") && content_type.ends_with(";base64")
    }
}

/// Output stream an [`RuntimeEvent::Output`] was written to.
///
/// The set is open: native modules may emit on streams of their own, and
/// consumers decide whether they know how to carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StreamKind {
    /// Regular printed output.
    Stdout,
    /// Base64-encoded image data.
    Image,
    /// Echo of a value the user entered.
    Input,
    /// Prompt text shown before reading input.
    InputPrompt,
    /// Any stream without a dedicated variant.
    Other(String),
}

impl StreamKind {
    /// Wire name of the stream.
    pub fn as_str(&self) -> &str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Image => "img",
            StreamKind::Input => "input",
            StreamKind::InputPrompt => "input_prompt",
            StreamKind::Other(name) => name,
        }
    }
}

impl From<&str> for StreamKind {
    fn from(name: &str) -> Self {
        match name {
            "stdout" => StreamKind::Stdout,
            "img" => StreamKind::Image,
            "input" => StreamKind::Input,
            "input_prompt" => StreamKind::InputPrompt,
            other => StreamKind::Other(other.to_string()),
        }
    }
}

impl From<String> for StreamKind {
    fn from(name: String) -> Self {
        StreamKind::from(name.as_str())
    }
}

impl From<StreamKind> for String {
    fn from(kind: StreamKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Low-level event produced by the interpreter and its host, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Text or image written by the script.
    Output {
        /// Target stream.
        stream: StreamKind,
        /// Payload, passed through untouched.
        text: String,
        /// Content type of the payload.
        content_type: String,
    },
    /// The script is waiting for a line of input.
    InputRequest {
        /// Prompt shown to the user.
        prompt: String,
    },
    /// The script asked to pause for a while.
    Sleep {
        /// Requested pause.
        duration_ms: u64,
    },
    /// Execution was interrupted.
    Interrupt {
        /// Why, e.g. `KeyboardInterrupt`.
        reason: String,
    },
    /// The debugger paused before executing a line.
    DebugPause {
        /// 1-based line number.
        line: u32,
    },
}
