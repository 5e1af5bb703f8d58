use super::ast::{Expr, ExprKind, Program};
use super::CompileError;

/// Parse script source text into a [`Program`].
///
/// `max_depth` bounds list nesting so pathological input fails with a
/// compile error instead of exhausting the native stack.
pub fn parse_program(source: &str, filename: &str, max_depth: usize) -> Result<Program, CompileError> {
    let mut parser = Parser::new(source, filename, max_depth);
    let mut forms = Vec::new();
    loop {
        parser.skip_ws();
        if parser.eof() {
            break;
        }
        if parser.current() == Some(b')') {
            return Err(parser.error("unmatched ')'"));
        }
        forms.push(parser.parse_expr(0)?);
    }
    Ok(Program::new(filename, source, forms))
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    filename: &'a str,
    index: usize,
    line: u32,
    column: u32,
    max_depth: usize,
}

type ParseResult<T> = std::result::Result<T, CompileError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str, filename: &'a str, max_depth: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            filename,
            index: 0,
            line: 1,
            column: 1,
            max_depth,
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            self.index += 1;
            if ch == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn skip_ws(&mut self) {
        loop {
            while let Some(ch) = self.current() {
                if ch.is_ascii_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }
            if self.current() == Some(b';') {
                while let Some(ch) = self.current() {
                    self.advance();
                    if ch == b'\n' {
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn parse_expr(&mut self, depth: usize) -> ParseResult<Expr> {
        self.skip_ws();
        let (line, column) = (self.line, self.column);
        let Some(ch) = self.current() else {
            return Err(self.error("unexpected end of input"));
        };

        let kind = match ch {
            b'(' => self.parse_list(depth)?,
            b'"' => self.parse_string()?,
            b':' => self.parse_keyword()?,
            b')' => return Err(self.error("unmatched ')'")),
            b'-' | b'+' | b'0'..=b'9' => self.parse_number_or_symbol()?,
            _ => self.parse_symbol_or_literal()?,
        };
        Ok(Expr::new(kind, line, column))
    }

    fn parse_list(&mut self, depth: usize) -> ParseResult<ExprKind> {
        if depth >= self.max_depth {
            return Err(self.error("too many nested parentheses"));
        }
        let (open_line, open_column) = (self.line, self.column);
        // consume '('
        self.advance();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eof() {
                return Err(CompileError::new(
                    self.filename,
                    open_line,
                    open_column,
                    "'(' was never closed",
                    line_text(self.src, open_line),
                ));
            }
            if self.current() == Some(b')') {
                self.advance();
                break;
            }
            items.push(self.parse_expr(depth + 1)?);
        }
        Ok(ExprKind::List(items))
    }

    fn parse_string(&mut self) -> ParseResult<ExprKind> {
        // consume opening quote
        self.advance();
        let mut buf = Vec::new();
        while let Some(ch) = self.current() {
            self.advance();
            match ch {
                b'"' => {
                    let text = String::from_utf8(buf)
                        .map_err(|_| self.error("string literal is not valid UTF-8"))?;
                    return Ok(ExprKind::String(text));
                }
                b'\\' => {
                    let escaped = self
                        .current()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    self.advance();
                    let value = match escaped {
                        b'"' => b'"',
                        b'\\' => b'\\',
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => {
                            return Err(self.error(&format!("unknown escape: \\{}", other as char)));
                        }
                    };
                    buf.push(value);
                }
                _ => buf.push(ch),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn parse_keyword(&mut self) -> ParseResult<ExprKind> {
        self.advance(); // consume ':'
        let start = self.index;
        while let Some(ch) = self.current() {
            if is_symbol_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.index {
            return Err(self.error("empty keyword"));
        }
        Ok(ExprKind::Keyword(self.src[start..self.index].to_string()))
    }

    fn parse_number_or_symbol(&mut self) -> ParseResult<ExprKind> {
        let start = self.index;
        let (line, column) = (self.line, self.column);
        if self.current() == Some(b'-') || self.current() == Some(b'+') {
            self.advance();
        }
        let mut has_digit = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                has_digit = true;
                self.advance();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if has_digit && self.current() == Some(b'.') {
            if let Some(next) = self.peek_char() {
                if next.is_ascii_digit() {
                    is_float = true;
                    self.advance();
                    while let Some(ch) = self.current() {
                        if ch.is_ascii_digit() {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        if !has_digit || self.current().is_some_and(is_symbol_char) {
            // `-`, `+`, `1+` and friends are symbols.
            self.index = start;
            self.line = line;
            self.column = column;
            return self.parse_symbol_or_literal();
        }

        let text = &self.src[start..self.index];
        if is_float {
            text.parse::<f64>()
                .map(ExprKind::Float)
                .map_err(|_| self.error("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(ExprKind::Integer)
                .map_err(|_| self.error("integer literal out of range"))
        }
    }

    fn parse_symbol_or_literal(&mut self) -> ParseResult<ExprKind> {
        let start = self.index;
        while let Some(ch) = self.current() {
            if is_symbol_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.index {
            return Err(self.error("unexpected character"));
        }
        let text = &self.src[start..self.index];
        Ok(match text {
            "true" => ExprKind::Boolean(true),
            "false" => ExprKind::Boolean(false),
            "nil" => ExprKind::Nil,
            _ => ExprKind::Symbol(text.to_string()),
        })
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::new(
            self.filename,
            self.line,
            self.column,
            message,
            line_text(self.src, self.line),
        )
    }
}

fn is_symbol_char(ch: u8) -> bool {
    match ch {
        b'(' | b')' | b'"' | b';' => false,
        c if c.is_ascii_whitespace() => false,
        _ => true,
    }
}

/// Text of the given 1-based line, or an empty string past the end.
pub(crate) fn line_text(source: &str, line: u32) -> String {
    source
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forms_with_positions() {
        let src = "(print 1)\n\n  (let x \"two\")";
        let program = parse_program(src, "main.scm", 100).expect("parse");
        assert_eq!(program.forms.len(), 2);
        assert_eq!(program.forms[0].line, 1);
        assert_eq!(program.forms[1].line, 3);
        assert_eq!(program.forms[1].column, 3);
        assert!(program.forms[1].is_form("let"));
    }

    #[test]
    fn parses_numbers_strings_and_keywords() {
        let src = "(f :key 42 -7 3.5 \"a\\nb\" nil true - math.sqrt)";
        let program = parse_program(src, "main.scm", 100).expect("parse");
        let items = program.forms[0].as_list().expect("list");
        assert_eq!(items[1].kind, ExprKind::Keyword("key".into()));
        assert_eq!(items[2].kind, ExprKind::Integer(42));
        assert_eq!(items[3].kind, ExprKind::Integer(-7));
        assert_eq!(items[4].kind, ExprKind::Float(3.5));
        assert_eq!(items[5].kind, ExprKind::String("a\nb".into()));
        assert_eq!(items[6].kind, ExprKind::Nil);
        assert_eq!(items[7].kind, ExprKind::Boolean(true));
        assert_eq!(items[8].kind, ExprKind::Symbol("-".into()));
        assert_eq!(items[9].kind, ExprKind::Symbol("math.sqrt".into()));
    }

    #[test]
    fn unclosed_list_reports_opening_position() {
        let err = parse_program("(print 1)\n(print (+ 1 2)", "main.scm", 100).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 1);
        assert!(err.message.contains("never closed"));
        assert_eq!(err.source_line, "(print (+ 1 2)");
    }

    #[test]
    fn nesting_beyond_ceiling_is_a_compile_error() {
        let src = format!("{}{}", "(".repeat(20), ")".repeat(20));
        let err = parse_program(&src, "main.scm", 10).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn stray_closing_paren_is_rejected() {
        let err = parse_program("(print 1))", "main.scm", 100).unwrap_err();
        assert!(err.message.contains("unmatched"));
    }
}
