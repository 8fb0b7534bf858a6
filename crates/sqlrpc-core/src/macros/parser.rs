//! Parser for the expression language inside `{...}` macro regions.
//!
//! ```text
//! macro := '{' IDENT expr* '}'
//! expr  := IDENT | STRING | INT | list | call
//! list  := '[' expr* ']'
//! call  := '(' IDENT expr* ')'
//! ```
//!
//! Whitespace and commas both separate expressions.

use super::MacroError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Bare identifier; evaluates to its own text.
    Ident(String),
    Str(String),
    Int(i64),
    List(Vec<Expr>),
    Call(Call),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: String,
    pub args: Vec<Expr>,
    /// Byte offset of the function name in the source text.
    pub offset: usize,
}

pub struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Start parsing at `pos`, which must point at the opening `{`.
    pub fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    /// Byte offset just past the last consumed character.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Parse one `{fn arg ...}` region.
    pub fn parse_macro(&mut self) -> Result<Call, MacroError> {
        self.expect(b'{')?;
        self.parse_call_body(b'}')
    }

    fn parse_call_body(&mut self, close: u8) -> Result<Call, MacroError> {
        self.skip_separators();
        let offset = self.pos;
        let function = match self.peek() {
            Some(b) if is_ident_start(b) => self.read_ident(),
            Some(b) if b == close => {
                return Err(self.syntax("empty macro expression"));
            }
            Some(_) => return Err(self.syntax("expected a function name")),
            None => return Err(self.syntax("unterminated macro expression")),
        };

        let args = self.parse_until(close)?;
        Ok(Call {
            function,
            args,
            offset,
        })
    }

    fn parse_until(&mut self, close: u8) -> Result<Vec<Expr>, MacroError> {
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.parse_expr()?),
                None => {
                    return Err(self.syntax(format!(
                        "unterminated expression, expected '{}'",
                        close as char
                    )))
                }
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, MacroError> {
        match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                Ok(Expr::List(self.parse_until(b']')?))
            }
            Some(b'(') => {
                self.pos += 1;
                Ok(Expr::Call(self.parse_call_body(b')')?))
            }
            Some(b'"') => self.read_string().map(Expr::Str),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.read_int().map(Expr::Int),
            Some(b) if is_ident_start(b) => Ok(Expr::Ident(self.read_ident())),
            Some(b) => Err(self.syntax(format!("unexpected character '{}'", b as char))),
            None => Err(self.syntax("unexpected end of text")),
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_ident_continue(b)) {
            self.pos += 1;
        }
        self.src[start..self.pos].to_string()
    }

    fn read_int(&mut self) -> Result<i64, MacroError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.src[start..self.pos].parse().map_err(|_| MacroError::Syntax {
            offset: start,
            message: format!("invalid integer '{}'", &self.src[start..self.pos]),
        })
    }

    fn read_string(&mut self) -> Result<String, MacroError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let src = self.src;
        let mut chars = src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(MacroError::Syntax {
            offset: start,
            message: "unterminated string".to_string(),
        })
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace() || b == b',') {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), MacroError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(format!("expected '{}'", byte as char)))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn syntax(&self, message: impl Into<String>) -> MacroError {
        MacroError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'@' || b == b'#'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b'@' | b'#')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Call, MacroError> {
        Parser::new(src, 0).parse_macro()
    }

    #[test]
    fn test_parse_call_with_list() {
        let call = parse("{qualify a [x, y]}").unwrap();
        assert_eq!(call.function, "qualify");
        assert_eq!(
            call.args,
            vec![
                Expr::Ident("a".into()),
                Expr::List(vec![Expr::Ident("x".into()), Expr::Ident("y".into())]),
            ]
        );
    }

    #[test]
    fn test_parse_nested_call_and_literals() {
        let call = parse(r#"{f (g "s\"q" -12) []}"#).unwrap();
        match &call.args[0] {
            Expr::Call(inner) => {
                assert_eq!(inner.function, "g");
                assert_eq!(
                    inner.args,
                    vec![Expr::Str("s\"q".into()), Expr::Int(-12)]
                );
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert_eq!(call.args[1], Expr::List(vec![]));
    }

    #[test]
    fn test_syntax_errors_carry_offsets() {
        match parse("{qualify a [x, y}") {
            Err(MacroError::Syntax { offset, .. }) => assert_eq!(offset, 16),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse("{}"), Err(MacroError::Syntax { offset: 1, .. })));
        assert!(matches!(parse("{f \"open"), Err(MacroError::Syntax { offset: 3, .. })));
    }
}
