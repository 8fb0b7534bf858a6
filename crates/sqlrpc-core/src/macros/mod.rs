//! Command-text preprocessing.
//!
//! A [`TextProcessor`] rewrites command text once, when a method is
//! compiled. [`QueryMacros`] is the built-in processor: it copies SQL
//! through unchanged except for `{...}` regions, which are parsed and
//! evaluated and replaced by their string result.
//!
//! ```text
//! SELECT {qualify u [id, name]} FROM users u
//!   => SELECT [u].[id], [u].[name] FROM users u
//! ```
//!
//! Quoted strings, `--` line comments and `/* */` block comments are
//! never scanned for macros.

mod parser;

use std::collections::HashMap;
use std::fmt;

pub use parser::{Call, Expr, Parser};

/// Registered names of [`QueryMacros`].
pub const QUERY_MACROS: &str = "query-macros";
pub const QUERY_MACROS_ALIAS: &str = "minilisp";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacroError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown macro function '{0}'")]
    UnknownFunction(String),

    #[error("{function} requires {expected} parameters, got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("{0}")]
    Type(String),
}

impl MacroError {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "MacroSyntaxError",
            Self::UnknownFunction(_) => "MacroUnknownFunctionError",
            Self::Arity { .. } => "MacroArityError",
            Self::Type(_) => "MacroTypeError",
        }
    }
}

/// A pluggable command-text transform.
pub trait TextProcessor: Send + Sync {
    fn process(&self, text: &str) -> Result<String, MacroError>;
}

/// Result of evaluating a macro expression.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroValue {
    Str(String),
    Int(i64),
    List(Vec<MacroValue>),
}

impl MacroValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "a string",
            Self::Int(_) => "an integer",
            Self::List(_) => "a list",
        }
    }
}

impl fmt::Display for MacroValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

type MacroFn = fn(&[MacroValue]) -> Result<MacroValue, MacroError>;

/// The built-in `{...}` macro processor.
pub struct QueryMacros {
    functions: HashMap<&'static str, MacroFn>,
}

impl Default for QueryMacros {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMacros {
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, MacroFn> = HashMap::new();
        functions.insert("qualify", qualify);
        functions.insert("prefix", prefix);
        Self { functions }
    }

    /// Evaluate a single expression. Identifiers are their own text.
    pub fn eval(&self, expr: &Expr) -> Result<MacroValue, MacroError> {
        match expr {
            Expr::Ident(name) => Ok(MacroValue::Str(name.clone())),
            Expr::Str(s) => Ok(MacroValue::Str(s.clone())),
            Expr::Int(i) => Ok(MacroValue::Int(*i)),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(MacroValue::List),
            Expr::Call(call) => self.call(call),
        }
    }

    fn call(&self, call: &Call) -> Result<MacroValue, MacroError> {
        let function = self
            .functions
            .get(call.function.as_str())
            .ok_or_else(|| MacroError::UnknownFunction(call.function.clone()))?;
        let args = call
            .args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        function(&args).map_err(|err| match err {
            MacroError::Arity {
                expected, found, ..
            } => MacroError::Arity {
                function: call.function.clone(),
                expected,
                found,
            },
            other => other,
        })
    }
}

impl TextProcessor for QueryMacros {
    fn process(&self, text: &str) -> Result<String, MacroError> {
        if !text.contains('{') {
            return Ok(text.to_string());
        }

        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' => i = skip_quoted(bytes, i),
                b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
                b'{' => {
                    out.push_str(&text[copied..i]);
                    let mut parser = Parser::new(text, i);
                    let call = parser.parse_macro()?;
                    match self.call(&call)? {
                        MacroValue::Str(s) => out.push_str(&s),
                        other => {
                            return Err(MacroError::Type(format!(
                                "macro '{}' must evaluate to a string, found {}",
                                call.function,
                                other.kind()
                            )))
                        }
                    }
                    i = parser.position();
                    copied = i;
                }
                _ => i += 1,
            }
        }

        out.push_str(&text[copied..]);
        Ok(out)
    }
}

/// Index just past a `'...'` literal starting at `start`; `''` is an escape.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    match bytes[start..].iter().position(|&b| b == b'\n') {
        Some(n) => start + n + 1,
        None => bytes.len(),
    }
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let body = start + 2;
    match bytes[body..].windows(2).position(|w| w == b"*/") {
        Some(n) => body + n + 2,
        None => bytes.len(),
    }
}

fn qualify(args: &[MacroValue]) -> Result<MacroValue, MacroError> {
    let (table, columns) = prefix_and_items(args)?;
    let rendered: Vec<String> = columns
        .iter()
        .map(|col| format!("[{}].[{}]", table, col))
        .collect();
    Ok(MacroValue::Str(rendered.join(", ")))
}

fn prefix(args: &[MacroValue]) -> Result<MacroValue, MacroError> {
    let (table, columns) = prefix_and_items(args)?;
    let rendered: Vec<String> = columns
        .iter()
        .map(|col| format!("[{0}].[{1}] AS [{0}_{1}]", table, col))
        .collect();
    Ok(MacroValue::Str(rendered.join(", ")))
}

fn prefix_and_items(args: &[MacroValue]) -> Result<(&str, Vec<&str>), MacroError> {
    if args.len() != 2 {
        return Err(MacroError::Arity {
            function: String::new(),
            expected: 2,
            found: args.len(),
        });
    }

    let table = match &args[0] {
        MacroValue::Str(s) => s.as_str(),
        other => {
            return Err(MacroError::Type(format!(
                "prefix must evaluate to a string, found {}",
                other.kind()
            )))
        }
    };

    let items = match &args[1] {
        MacroValue::List(items) => items,
        other => {
            return Err(MacroError::Type(format!(
                "second parameter must evaluate to a list, found {}",
                other.kind()
            )))
        }
    };

    let columns = items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            MacroValue::Str(s) => Ok(s.as_str()),
            other => Err(MacroError::Type(format!(
                "list item {} must evaluate to a string, found {}",
                i + 1,
                other.kind()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((table, columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> Result<String, MacroError> {
        QueryMacros::new().process(text)
    }

    #[test]
    fn test_qualify_and_prefix() {
        assert_eq!(run("{qualify a [x, y]}").unwrap(), "[a].[x], [a].[y]");
        assert_eq!(
            run("{prefix a [x y]}").unwrap(),
            "[a].[x] AS [a_x], [a].[y] AS [a_y]"
        );
        assert_eq!(
            run("SELECT {qualify u [id, name]} FROM users u WHERE u.id = @id").unwrap(),
            "SELECT [u].[id], [u].[name] FROM users u WHERE u.id = @id"
        );
    }

    #[test]
    fn test_string_arguments_and_nested_calls() {
        assert_eq!(
            run(r#"{qualify "order items" ["line no"]}"#).unwrap(),
            "[order items].[line no]"
        );
        // A nested call yields a string, which is a valid list item.
        assert_eq!(run("{qualify a [(qualify b [c])]}").unwrap(), "[a].[[b].[c]]");
        let err = run("{qualify a [(qualify b [c]) 3]}").unwrap_err();
        assert!(matches!(err, MacroError::Type(ref m) if m.contains("list item 2")));
    }

    #[test]
    fn test_literals_preserved() {
        let text = "SELECT 'it''s a string -- not a comment' /* {not a macro} */ FROM t";
        assert_eq!(run(text).unwrap(), text);

        let with_comment = "SELECT 1 -- {still a comment}\nFROM {qualify t [a]}";
        assert_eq!(
            run(with_comment).unwrap(),
            "SELECT 1 -- {still a comment}\nFROM [t].[a]"
        );

        assert_eq!(run("'{x}'").unwrap(), "'{x}'");
    }

    #[test]
    fn test_idempotent_without_macros() {
        let text = "SELECT a - b / c FROM t WHERE x = 'y'";
        let once = run(text).unwrap();
        assert_eq!(once, text);
        assert_eq!(run(&once).unwrap(), once);
    }

    #[test]
    fn test_arity_and_type_errors() {
        assert_eq!(
            run("{qualify a}").unwrap_err(),
            MacroError::Arity {
                function: "qualify".into(),
                expected: 2,
                found: 1
            }
        );
        assert!(matches!(
            run("{prefix a [x, 3]}").unwrap_err(),
            MacroError::Type(m) if m.contains("list item 2")
        ));
        assert!(matches!(
            run("{qualify [a] [x]}").unwrap_err(),
            MacroError::Type(_)
        ));
    }

    #[test]
    fn test_unknown_function_and_syntax() {
        assert_eq!(
            run("{explode a}").unwrap_err(),
            MacroError::UnknownFunction("explode".into())
        );
        assert!(matches!(
            run("SELECT {qualify a [x").unwrap_err(),
            MacroError::Syntax { .. }
        ));
    }
}
