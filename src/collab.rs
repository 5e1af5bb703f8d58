//! Boundary types shared with the editor-side collaborators.
//!
//! Suggestion generation and static linting live outside this crate; the
//! front end exchanges these types with them over the same protocol it uses
//! for runs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Text immediately before the cursor that the completion should replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeforeMatch {
    /// Matched text.
    pub text: String,
    /// Offset where the match starts.
    pub from: usize,
    /// Offset where the match ends.
    pub to: usize,
}

/// Autocomplete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Full source text.
    pub text: String,
    /// 1-based cursor line.
    pub line: u32,
    /// 0-based cursor column.
    pub column: u32,
    /// Cursor offset into `text`.
    pub pos: usize,
    /// Whether the user asked for completions explicitly.
    pub explicit: bool,
    /// Match before the cursor, if any.
    #[serde(default)]
    pub before: Option<BeforeMatch>,
}

/// One suggestion as produced by a provider, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Kind of the suggested name (`function`, `keyword`, `module`, ...).
    pub kind: String,
    /// Text to insert.
    pub label: String,
    /// Documentation, if any.
    pub doc: Option<String>,
}

/// Produces ranked suggestions for a cursor position.
pub trait CompletionProvider {
    /// Suggestions for the cursor at `line`/`column` of `text`, best first.
    fn complete(&self, text: &str, line: u32, column: u32) -> Vec<Candidate>;
}

/// One option shown by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOption {
    /// Kind of the suggested name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text to insert.
    pub label: String,
    /// Documentation shown next to the option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Ranking weight; higher sorts first.
    pub boost: i64,
}

/// Autocomplete response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Options, best first.
    pub options: Vec<CompletionOption>,
    /// Offset the chosen option replaces from.
    pub from: usize,
}

impl CompletionResponse {
    /// Ask `provider` for suggestions and shape them for the editor.
    ///
    /// Boosts strictly decrease so the provider's order survives re-sorting.
    /// An implicit request with nothing typed yields no options, and the
    /// provider is not consulted. After a `.` the replacement starts at the
    /// end of the match, so the object part is kept.
    pub fn ranked(request: &CompletionRequest, provider: &dyn CompletionProvider) -> Self {
        let (typed, from, to) = match &request.before {
            Some(before) => (before.text.as_str(), before.from, before.to),
            None => ("", request.pos, request.pos),
        };
        if !request.explicit && typed.is_empty() {
            return Self {
                options: Vec::new(),
                from,
            };
        }
        let options = provider
            .complete(&request.text, request.line, request.column)
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| CompletionOption {
                info: if candidate.kind == "keyword" { None } else { candidate.doc },
                kind: candidate.kind,
                label: candidate.label,
                boost: -(index as i64),
            })
            .collect();
        let from = if typed.contains('.') { to } else { from };
        Self { options, from }
    }
}

/// Lint severity, in pylint's category vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The linter itself failed.
    Fatal,
    /// Probable bug.
    Error,
    /// Suspicious code.
    Warning,
    /// Style issue.
    Convention,
    /// Refactoring suggestion.
    Refactor,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "fatal" => Ok(Severity::Fatal),
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "convention" => Ok(Severity::Convention),
            "refactor" => Ok(Severity::Refactor),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// One lint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// 1-based start line.
    pub line_nr: u32,
    /// Start column.
    pub column_nr: u32,
    /// End line; equals the start when unknown.
    pub end_line_nr: u32,
    /// End column; equals the start when unknown.
    pub end_column_nr: u32,
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

impl Diagnostic {
    /// Parse one report line of the form
    /// `path:line:column:end_line:end_column:severity:message`.
    ///
    /// Lines of any other shape yield `None`. Empty end positions fall back
    /// to the start position.
    pub fn parse_report_line(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.matches(':').count() != 6 {
            return None;
        }
        let mut fields = line.split(':').skip(1);
        let line_nr: u32 = fields.next()?.parse().ok()?;
        let column_nr: u32 = fields.next()?.parse().ok()?;
        let end_line_nr = optional_number(fields.next()?)?.unwrap_or(line_nr);
        let end_column_nr = optional_number(fields.next()?)?.unwrap_or(column_nr);
        let severity = fields.next()?.parse().ok()?;
        let message = fields.next()?.replace("(<unknown>, ", "(");
        Some(Self {
            line_nr,
            column_nr,
            end_line_nr,
            end_column_nr,
            severity,
            message,
        })
    }

    /// Parse a whole report, skipping lines that are not findings.
    pub fn parse_report(report: &str) -> Vec<Self> {
        report.lines().filter_map(Self::parse_report_line).collect()
    }
}

fn optional_number(field: &str) -> Option<Option<u32>> {
    if field.is_empty() {
        Some(None)
    } else {
        field.parse().ok().map(Some)
    }
}

/// Static checker for source text.
pub trait Linter {
    /// Findings for `source`, in report order.
    fn lint(&self, source: &str) -> Vec<Diagnostic>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    struct Fixed {
        calls: Cell<usize>,
    }

    impl CompletionProvider for Fixed {
        fn complete(&self, _text: &str, _line: u32, _column: u32) -> Vec<Candidate> {
            self.calls.set(self.calls.get() + 1);
            vec![
                Candidate {
                    kind: "function".into(),
                    label: "print".into(),
                    doc: Some("print values".into()),
                },
                Candidate {
                    kind: "keyword".into(),
                    label: "pass".into(),
                    doc: Some("ignored".into()),
                },
                Candidate {
                    kind: "module".into(),
                    label: "math".into(),
                    doc: None,
                },
            ]
        }
    }

    fn request(explicit: bool, before: Option<BeforeMatch>) -> CompletionRequest {
        CompletionRequest {
            text: "pr".into(),
            line: 1,
            column: 2,
            pos: 2,
            explicit,
            before,
        }
    }

    fn fixed() -> Fixed {
        Fixed { calls: Cell::new(0) }
    }

    #[test]
    fn boosts_strictly_decrease_in_provider_order() {
        let provider = fixed();
        let before = BeforeMatch {
            text: "pr".into(),
            from: 0,
            to: 2,
        };
        let response = CompletionResponse::ranked(&request(false, Some(before)), &provider);
        let labels: Vec<_> = response.options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, ["print", "pass", "math"]);
        assert!(response.options.windows(2).all(|w| w[0].boost > w[1].boost));
        assert_eq!(response.options[1].info, None);
        assert_eq!(response.from, 0);
    }

    #[test]
    fn implicit_empty_prefix_yields_nothing() {
        let provider = fixed();
        let response = CompletionResponse::ranked(&request(false, None), &provider);
        assert!(response.options.is_empty());
        assert_eq!(response.from, 2);
        assert_eq!(provider.calls.get(), 0);

        let response = CompletionResponse::ranked(&request(true, None), &provider);
        assert_eq!(response.options.len(), 3);
    }

    #[test]
    fn member_access_completes_from_match_end() {
        let before = BeforeMatch {
            text: "math.".into(),
            from: 0,
            to: 5,
        };
        let response = CompletionResponse::ranked(&request(false, Some(before)), &fixed());
        assert_eq!(response.from, 5);
    }

    #[test]
    fn option_wire_shape() {
        let option = CompletionOption {
            kind: "keyword".into(),
            label: "while".into(),
            info: None,
            boost: 0,
        };
        assert_eq!(
            serde_json::to_value(option).unwrap(),
            json!({"type": "keyword", "label": "while", "boost": 0})
        );
    }

    #[test]
    fn report_lines_become_diagnostics() {
        let report = "************* Module tmp\n\
                      /tmp/x.py:3:4:3:9:warning:Unused variable 'x'\n\
                      /tmp/x.py:1:0:::error:Parsing failed 'invalid syntax (<unknown>, line 1)'\n\
                      not a finding\n";
        let diagnostics = Diagnostic::parse_report(report);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].end_column_nr, 9);
        assert_eq!(diagnostics[1].end_line_nr, 1);
        assert_eq!(diagnostics[1].end_column_nr, 0);
        assert_eq!(diagnostics[1].message, "Parsing failed 'invalid syntax (line 1)'");
        assert_eq!(
            serde_json::to_value(&diagnostics[0]).unwrap(),
            json!({
                "lineNr": 3, "columnNr": 4, "endLineNr": 3, "endColumnNr": 9,
                "severity": "warning", "message": "Unused variable 'x'"
            })
        );
    }
}
