//! Turning a raw exception into an explanation aimed at beginners.

use serde::{Deserialize, Serialize};

use crate::interpreter::Exception;
use crate::interpreter::exception::names;

/// Structured explanation of an exception raised by a run.
///
/// Serializes to exactly the keys `name`, `traceback`, `info`, `why`,
/// `where` and `what`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendlyError {
    /// Exception type name.
    pub name: String,
    /// Full traceback text.
    pub traceback: String,
    /// What this kind of exception means in general.
    #[serde(rename = "info")]
    pub generic: String,
    /// Probable cause in this instance.
    #[serde(rename = "why")]
    pub cause: String,
    /// The traceback lines that point at the user's own code.
    #[serde(rename = "where")]
    pub excerpt: String,
    /// Short message.
    #[serde(rename = "what")]
    pub message: String,
}

/// Source of the human-readable parts of a [`FriendlyError`].
pub trait Explainer: Send + Sync {
    /// General explanation of an exception type.
    fn generic(&self, exception: &Exception) -> String;
    /// Likely cause of this particular exception.
    fn cause(&self, exception: &Exception) -> String;
    /// Short message. Defaults to the exception's own summary.
    fn message(&self, exception: &Exception) -> String {
        exception.summary()
    }
}

/// Explanations for every exception the interpreter raises itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExplainer;

impl Explainer for BuiltinExplainer {
    fn generic(&self, exception: &Exception) -> String {
        let text = match exception.name.as_str() {
            names::NAME_ERROR => {
                "A NameError occurs when you use a name that has not been defined yet, or that was defined somewhere your code cannot see it."
            }
            names::TYPE_ERROR => {
                "A TypeError usually means you combined values of incompatible types, or called a function with the wrong number of arguments."
            }
            names::VALUE_ERROR => {
                "A ValueError means a function received a value of the right type but with an inappropriate content."
            }
            names::ZERO_DIVISION_ERROR => {
                "A ZeroDivisionError occurs when you divide a number by zero or take a modulo with zero."
            }
            names::INDEX_ERROR => {
                "An IndexError occurs when you ask for an item at a position that does not exist in a list or string."
            }
            names::ATTRIBUTE_ERROR => {
                "An AttributeError occurs when you ask a module or value for a member it does not have."
            }
            names::MODULE_NOT_FOUND_ERROR => {
                "A ModuleNotFoundError means the module you tried to import is not installed or its name is misspelled."
            }
            names::RECURSION_ERROR => {
                "A RecursionError occurs when a function calls itself too many times without reaching a stopping case."
            }
            names::FILE_NOT_FOUND_ERROR => {
                "A FileNotFoundError means the program tried to read a file that was not provided."
            }
            names::OVERFLOW_ERROR => {
                "An OverflowError means a calculation produced a number, string or list too large to be represented."
            }
            names::SYSTEM_ERROR => {
                "A SystemError means the interpreter itself failed while running your program. It is not caused by a mistake in your code alone."
            }
            _ => return format!("{} was raised by your program.", exception.name),
        };
        text.to_string()
    }

    fn cause(&self, exception: &Exception) -> String {
        match exception.name.as_str() {
            names::NAME_ERROR => format!(
                "In your program, {}. Check the spelling, and make sure the name is defined before it is used.",
                exception.message
            ),
            names::ZERO_DIVISION_ERROR => {
                "The divisor in your calculation evaluated to zero.".to_string()
            }
            names::RECURSION_ERROR => {
                "Your function keeps calling itself. Make sure every recursive call moves closer to a case that returns without recursing.".to_string()
            }
            names::MODULE_NOT_FOUND_ERROR => match &exception.missing_module {
                Some(module) => format!("No module named '{module}' could be found or installed."),
                None => exception.message.clone(),
            },
            _ if exception.message.is_empty() => String::new(),
            _ => format!("Your program reported: {}", exception.message),
        }
    }
}

/// Excerpt of `traceback` pointing at the user's code.
///
/// Starts at the first line mentioning `filename` and ends (inclusive) at
/// the first later line mentioning `exception_name`. Empty when either line
/// cannot be found.
pub fn locate(traceback: &str, filename: &str, exception_name: &str) -> String {
    let lines: Vec<&str> = traceback.split('\n').collect();
    let Some(start) = lines.iter().position(|line| line.contains(filename)) else {
        return String::new();
    };
    let Some(offset) = lines[start + 1..]
        .iter()
        .position(|line| line.contains(exception_name))
    else {
        return String::new();
    };
    lines[start..=start + 1 + offset].join("\n")
}

/// Build the friendly form of an exception raised while running `filename`.
pub fn explain(exception: &Exception, filename: &str, explainer: &dyn Explainer) -> FriendlyError {
    let traceback = exception.render_traceback();
    FriendlyError {
        name: exception.name.clone(),
        excerpt: locate(&traceback, filename, &exception.name),
        generic: explainer.generic(exception),
        cause: explainer.cause(exception),
        message: explainer.message(exception),
        traceback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::TraceFrame;
    use proptest::prelude::*;

    const TRACEBACK: &str = "Traceback (most recent call last):\n  File \"lib.scm\", line 9, in helper\n  File \"main.scm\", line 4, in <module>\n    (div 1 0)\n  File \"main.scm\", line 2, in div\n    (/ a b)\nZeroDivisionError: division by zero";

    #[test]
    fn excerpt_spans_user_frames_through_exception_line() {
        assert_eq!(
            locate(TRACEBACK, "main.scm", "ZeroDivisionError"),
            "  File \"main.scm\", line 4, in <module>\n    (div 1 0)\n  File \"main.scm\", line 2, in div\n    (/ a b)\nZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn excerpt_is_empty_without_a_match() {
        assert_eq!(locate(TRACEBACK, "other.scm", "ZeroDivisionError"), "");
        assert_eq!(locate(TRACEBACK, "main.scm", "ValueError"), "");
        assert_eq!(locate("", "main.scm", "ValueError"), "");
    }

    #[test]
    fn friendly_error_serializes_six_keys() {
        let mut exc = Exception::new(names::ZERO_DIVISION_ERROR, "division by zero");
        exc.frames.push(TraceFrame {
            filename: "main.scm".into(),
            line: 1,
            function: "<module>".into(),
            source_line: Some("(/ 1 0)".into()),
        });
        let friendly = explain(&exc, "main.scm", &BuiltinExplainer);
        assert_eq!(friendly.message, "ZeroDivisionError: division by zero");
        assert!(friendly.traceback.contains(&friendly.excerpt));
        let value = serde_json::to_value(&friendly).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["info", "name", "traceback", "what", "where", "why"]);
    }

    proptest! {
        #[test]
        fn excerpt_is_a_contiguous_substring(
            lines in prop::collection::vec("[a-zA-Z .\"]{0,20}", 0..12),
            insert_file in any::<bool>(),
            insert_name in any::<bool>(),
        ) {
            let mut lines = lines;
            if insert_file {
                lines.insert(lines.len() / 2, "  File \"main.scm\", line 1".to_string());
            }
            if insert_name {
                lines.push("ValueError: boom".to_string());
            }
            let traceback = lines.join("\n");
            let excerpt = locate(&traceback, "main.scm", "ValueError");
            prop_assert!(traceback.contains(&excerpt));
            if !traceback.contains("main.scm") {
                prop_assert!(excerpt.is_empty());
            }
            if !excerpt.is_empty() {
                prop_assert!(excerpt.contains("main.scm"));
                prop_assert!(excerpt.split('\n').last().is_some_and(|line| line.contains("ValueError")));
            }
        }
    }
}
