use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Source text of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Script text.
    pub text: Arc<str>,
    /// Name reported in tracebacks.
    pub filename: Arc<str>,
    /// Bumped on every replacement.
    pub revision: u64,
}

impl SourceUnit {
    /// Whether `line` (1-based) exists and holds something other than
    /// whitespace or a comment.
    pub fn is_code_line(&self, line: u32) -> bool {
        if line == 0 {
            return false;
        }
        self.text
            .lines()
            .nth(line as usize - 1)
            .map(str::trim)
            .is_some_and(|text| !text.is_empty() && !text.starts_with(';'))
    }

    /// Number of lines in the source.
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

/// Holds the source for the next run. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    current: SourceUnit,
}

impl SourceBuffer {
    /// Empty buffer using the given default filename.
    pub fn new(filename: &str) -> Self {
        Self {
            current: SourceUnit {
                text: Arc::from(""),
                filename: Arc::from(filename),
                revision: 0,
            },
        }
    }

    /// Replace the source, returning the new unit.
    pub fn replace(&mut self, text: &str, filename: &str) -> SourceUnit {
        self.current = SourceUnit {
            text: Arc::from(text),
            filename: Arc::from(filename),
            revision: self.current.revision + 1,
        };
        self.current.clone()
    }

    /// Current unit.
    pub fn current(&self) -> &SourceUnit {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_bumps_revision() {
        let mut buffer = SourceBuffer::new("main.scm");
        assert_eq!(buffer.current().revision, 0);
        let unit = buffer.replace("(print 1)", "a.scm");
        assert_eq!(unit.revision, 1);
        assert_eq!(&*buffer.current().filename, "a.scm");
        assert_eq!(buffer.replace("", "a.scm").revision, 2);
    }

    #[test]
    fn code_lines_skip_blanks_and_comments() {
        let mut buffer = SourceBuffer::new("main.scm");
        let unit = buffer.replace("(print 1)\n\n  ; note\n(print 2)", "main.scm");
        assert!(unit.is_code_line(1));
        assert!(!unit.is_code_line(2));
        assert!(!unit.is_code_line(3));
        assert!(unit.is_code_line(4));
        assert!(!unit.is_code_line(5));
        assert!(!unit.is_code_line(0));
        assert_eq!(unit.line_count(), 4);
    }

    #[test]
    fn units_serialize_with_shared_text() {
        let unit = SourceBuffer::new("main.scm").replace("(print 1)", "a.scm");
        let value = serde_json::to_value(&unit).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"text": "(print 1)", "filename": "a.scm", "revision": 1})
        );
        let back: SourceUnit = serde_json::from_value(value).unwrap();
        assert_eq!(back, unit);
    }
}
