//! Parser for expression templates.
//!
//! Grammar, informally:
//!
//! ```text
//! template := (text | "$${" | "${" expr "}")*
//! expr     := subject (":" call)*
//! subject  := name | quoted | call | "${" expr "}"
//! call     := ident "(" [arg ("," arg)*] ")"
//! arg      := quoted | number | "true" | "false" | "${" expr "}"
//! ```

use std::fmt;

use crate::el_model::{ElArg, ElExpr, ElFunction, ElSubject, FnCall, Template, TemplatePart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElParseError {
    Unterminated { pos: usize },
    EmptySubject { pos: usize },
    UnknownFunction(String),
    Arity { name: String, min: usize, max: usize, got: usize },
    MissingSubject(String),
    UnexpectedSubject(String),
    Unexpected { pos: usize, found: char },
}

impl fmt::Display for ElParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElParseError::Unterminated { pos } => write!(f, "unterminated expression starting at {}", pos),
            ElParseError::EmptySubject { pos } => write!(f, "expression at {} has no subject", pos),
            ElParseError::UnknownFunction(name) => write!(f, "unknown function '{}'", name),
            ElParseError::Arity { name, min, max, got } => {
                if min == max {
                    write!(f, "function '{}' takes {} argument(s), got {}", name, min, got)
                } else if *max == usize::MAX {
                    write!(f, "function '{}' takes at least {} argument(s), got {}", name, min, got)
                } else {
                    write!(f, "function '{}' takes {}..{} arguments, got {}", name, min, max, got)
                }
            }
            ElParseError::MissingSubject(name) => write!(f, "function '{}' needs a subject", name),
            ElParseError::UnexpectedSubject(name) => {
                write!(f, "function '{}' cannot be applied to a subject", name)
            }
            ElParseError::Unexpected { pos, found } => write!(f, "unexpected '{}' at {}", found, pos),
        }
    }
}

impl std::error::Error for ElParseError {}

/// True when `text` contains an unescaped `${`.
pub fn contains_el(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'$' {
            i += 2;
            continue;
        }
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            return true;
        }
        i += 1;
    }
    false
}

pub fn parse_template(text: &str) -> Result<Template, ElParseError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    parser.template()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_expr(&self) -> bool {
        self.peek() == Some('$') && self.peek_at(1) == Some('{')
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ElParseError {
        match self.peek() {
            Some(found) => ElParseError::Unexpected { pos: self.pos, found },
            None => ElParseError::Unterminated { pos: self.pos },
        }
    }

    fn template(&mut self) -> Result<Template, ElParseError> {
        let mut parts = Vec::new();
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch == '$' && self.peek_at(1) == Some('$') && self.peek_at(2) == Some('{') {
                text.push_str("${");
                self.pos += 3;
            } else if self.starts_expr() {
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                self.pos += 2;
                parts.push(TemplatePart::Expr(self.expr()?));
            } else {
                text.push(ch);
                self.pos += 1;
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Template { parts })
    }

    /// Parses after `${` up to and including the closing `}`.
    fn expr(&mut self) -> Result<ElExpr, ElParseError> {
        let start = self.pos;
        self.skip_ws();
        let subject = self.subject(start)?;
        let mut calls = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(ElExpr { subject, calls });
                }
                Some(':') => {
                    self.pos += 1;
                    self.skip_ws();
                    let name = self.ident();
                    let call = self.call(name)?;
                    if call.func.is_subjectless() {
                        return Err(ElParseError::UnexpectedSubject(call.func.name().to_string()));
                    }
                    calls.push(call);
                }
                None => return Err(ElParseError::Unterminated { pos: start }),
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn subject(&mut self, start: usize) -> Result<ElSubject, ElParseError> {
        if self.starts_expr() {
            self.pos += 2;
            return Ok(ElSubject::Nested(Box::new(self.expr()?)));
        }
        if let Some(q @ ('\'' | '"')) = self.peek() {
            return Ok(ElSubject::Attribute(self.quoted(q)?));
        }

        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if matches!(ch, ':' | '}' | '(' | ')' | ',') || ch.is_whitespace() {
                break;
            }
            name.push(ch);
            self.pos += 1;
        }
        if name.is_empty() {
            return match self.peek() {
                None => Err(ElParseError::Unterminated { pos: start }),
                _ => Err(ElParseError::EmptySubject { pos: start }),
            };
        }

        let before_ws = self.pos;
        self.skip_ws();
        if self.peek() == Some('(') {
            let call = self.call(name)?;
            if !call.func.is_subjectless() {
                return Err(ElParseError::MissingSubject(call.func.name().to_string()));
            }
            return Ok(ElSubject::Function(call));
        }
        self.pos = before_ws;
        Ok(ElSubject::Attribute(name))
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if !(ch.is_alphanumeric() || ch == '_') {
                break;
            }
            name.push(ch);
            self.pos += 1;
        }
        name
    }

    fn call(&mut self, name: String) -> Result<FnCall, ElParseError> {
        let func = ElFunction::from_name(&name).ok_or(ElParseError::UnknownFunction(name))?;
        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(self.unexpected());
        }
        self.pos += 1;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                self.skip_ws();
                args.push(self.arg()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.unexpected()),
                }
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ElParseError::Arity {
                name: func.name().to_string(),
                min,
                max,
                got: args.len(),
            });
        }
        Ok(FnCall { func, args })
    }

    fn arg(&mut self) -> Result<ElArg, ElParseError> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => Ok(ElArg::Text(self.quoted(q)?)),
            Some('$') if self.starts_expr() => {
                self.pos += 2;
                Ok(ElArg::Expr(self.expr()?))
            }
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '.' => {
                let mut raw = String::new();
                while let Some(ch) = self.peek() {
                    if !(ch.is_ascii_digit() || matches!(ch, '-' | '.' | 'e' | 'E')) {
                        break;
                    }
                    raw.push(ch);
                    self.pos += 1;
                }
                if raw.parse::<f64>().is_err() {
                    return Err(ElParseError::Unexpected { pos: self.pos, found: ch });
                }
                Ok(ElArg::Number(raw))
            }
            Some(_) => {
                let start = self.pos;
                match self.ident().as_str() {
                    "true" => Ok(ElArg::Bool(true)),
                    "false" => Ok(ElArg::Bool(false)),
                    _ => {
                        self.pos = start;
                        Err(self.unexpected())
                    }
                }
            }
            None => Err(self.unexpected()),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, ElParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            self.pos += 1;
            if ch == quote {
                return Ok(out);
            }
            if ch == '\\' {
                match self.peek() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(other) => out.push(other),
                    None => break,
                }
                self.pos += 1;
                continue;
            }
            out.push(ch);
        }
        Err(ElParseError::Unterminated { pos: start })
    }
}
