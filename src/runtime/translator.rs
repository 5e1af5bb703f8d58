//! Mapping from interpreter events to external messages.

use serde_json::json;
use thiserror::Error;

use super::message::{ExternalMessage, MessageKind};
use super::traceback::FriendlyError;
use super::RunMode;
use crate::interpreter::content_type;
use crate::interpreter::{CompileError, RuntimeEvent, StreamKind, Value};

/// Events the translator has no rule for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// Output on a stream with no message mapping.
    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),
}

/// Progress of a module installation, as reported in `loading` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    /// Resolution started.
    Loading,
    /// Modules were installed.
    Loaded,
    /// Resolution failed.
    Failed,
}

impl LoadingStatus {
    fn as_str(self) -> &'static str {
        match self {
            LoadingStatus::Loading => "loading",
            LoadingStatus::Loaded => "loaded",
            LoadingStatus::Failed => "failed",
        }
    }
}

/// Stateless event-to-message mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTranslator;

impl EventTranslator {
    /// Translate one runtime event. `Ok(None)` means the event is swallowed.
    pub fn translate(&self, event: RuntimeEvent) -> Result<Option<ExternalMessage>, TranslateError> {
        let message = match event {
            RuntimeEvent::Output {
                stream,
                text,
                content_type,
            } => match stream {
                StreamKind::Stdout => ExternalMessage::new(MessageKind::Output, text, content_type),
                StreamKind::Image => {
                    if !content_type::is_image(&content_type) {
                        return Err(TranslateError::UnknownEventKind(format!(
                            "img with content type '{content_type}'"
                        )));
                    }
                    ExternalMessage::new(MessageKind::Output, text, content_type)
                }
                StreamKind::Input | StreamKind::InputPrompt => return Ok(None),
                StreamKind::Other(name) => return Err(TranslateError::UnknownEventKind(name)),
            },
            RuntimeEvent::InputRequest { prompt } => {
                ExternalMessage::new(MessageKind::Input, prompt, content_type::TEXT_PLAIN)
            }
            RuntimeEvent::Sleep { duration_ms } => ExternalMessage::new(
                MessageKind::Sleep,
                duration_ms,
                content_type::APPLICATION_NUMBER,
            ),
            RuntimeEvent::Interrupt { reason } => {
                ExternalMessage::new(MessageKind::Interrupt, reason, content_type::TEXT_PLAIN)
            }
            RuntimeEvent::DebugPause { line } => ExternalMessage::new(
                MessageKind::Debug,
                u64::from(line),
                content_type::APPLICATION_NUMBER,
            ),
        };
        Ok(Some(message))
    }

    /// First message of every run.
    pub fn start(&self, mode: RunMode) -> ExternalMessage {
        ExternalMessage::new(MessageKind::Start, mode.as_str(), content_type::TEXT_PLAIN)
    }

    /// Terminal message of a run that returned `value`.
    pub fn end(&self, value: &Value) -> ExternalMessage {
        ExternalMessage::new(MessageKind::End, value.to_json().to_string(), content_type::TEXT_JSON)
    }

    /// Progress of a module installation.
    pub fn loading(&self, modules: &[String], status: LoadingStatus) -> ExternalMessage {
        let data = json!({ "modules": modules, "status": status.as_str() });
        ExternalMessage::new(MessageKind::Loading, data.to_string(), content_type::TEXT_JSON)
    }

    /// A compile error, passed through unexplained.
    pub fn compile_error(&self, error: &CompileError) -> ExternalMessage {
        ExternalMessage::new(MessageKind::Error, error.to_string(), content_type::TEXT_PLAIN)
    }

    /// An explained runtime error.
    pub fn friendly_error(&self, error: &FriendlyError) -> ExternalMessage {
        let data = serde_json::to_string(error).unwrap_or_else(|_| error.traceback.clone());
        ExternalMessage::new(MessageKind::Error, data, content_type::TEXT_JSON)
    }

    /// A protocol violation that aborted the run.
    pub fn protocol_error(&self, error: &TranslateError) -> ExternalMessage {
        ExternalMessage::new(MessageKind::Error, error.to_string(), content_type::TEXT_PLAIN)
    }

    /// Terminal message of an interrupted run.
    pub fn interrupt(&self, reason: &str) -> ExternalMessage {
        ExternalMessage::new(MessageKind::Interrupt, reason, content_type::TEXT_PLAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::MessageData;

    fn output(stream: StreamKind, text: &str, content_type: &str) -> RuntimeEvent {
        RuntimeEvent::Output {
            stream,
            text: text.to_string(),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn stdout_and_images_become_output() {
        let translator = EventTranslator;
        let message = translator
            .translate(output(StreamKind::Stdout, "hi\n", content_type::TEXT_PLAIN))
            .unwrap()
            .unwrap();
        assert_eq!(message.kind, MessageKind::Output);
        assert_eq!(message.data, MessageData::Text("hi\n".into()));

        let image = translator
            .translate(output(StreamKind::Image, "iVBORw0KGgo=", "img/png;base64"))
            .unwrap()
            .unwrap();
        assert_eq!(image.content_type, "img/png;base64");
        assert_eq!(image.data.as_text(), Some("iVBORw0KGgo="));
    }

    #[test]
    fn input_echo_and_prompt_are_swallowed() {
        let translator = EventTranslator;
        for stream in [StreamKind::Input, StreamKind::InputPrompt] {
            assert_eq!(
                translator.translate(output(stream, "secret\n", content_type::TEXT_PLAIN)),
                Ok(None)
            );
        }
    }

    #[test]
    fn unknown_streams_are_fatal() {
        let translator = EventTranslator;
        assert_eq!(
            translator.translate(output(StreamKind::Other("stderr".into()), "x", content_type::TEXT_PLAIN)),
            Err(TranslateError::UnknownEventKind("stderr".into()))
        );
    }

    #[test]
    fn numeric_events_carry_numbers() {
        let translator = EventTranslator;
        let sleep = translator
            .translate(RuntimeEvent::Sleep { duration_ms: 1500 })
            .unwrap()
            .unwrap();
        assert_eq!((sleep.kind, sleep.data.as_number()), (MessageKind::Sleep, Some(1500)));
        assert_eq!(sleep.content_type, content_type::APPLICATION_NUMBER);

        let pause = translator
            .translate(RuntimeEvent::DebugPause { line: 7 })
            .unwrap()
            .unwrap();
        assert_eq!((pause.kind, pause.data.as_number()), (MessageKind::Debug, Some(7)));
    }

    #[test]
    fn loading_reports_modules_and_status() {
        let message = EventTranslator.loading(&["extra".to_string()], LoadingStatus::Loaded);
        let data: serde_json::Value = serde_json::from_str(message.data.as_text().unwrap()).unwrap();
        assert_eq!(data, json!({"modules": ["extra"], "status": "loaded"}));
    }
}
