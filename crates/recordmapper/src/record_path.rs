//! Record paths read values out of the source record: either a bare path such
//! as `/home/address/city` or a function over paths like
//! `substringAfter(/name, ' ')`.

use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;

use crate::datefmt;
use crate::path::{PathError, PathExpression};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpFunction {
    SubstringBefore,
    SubstringAfter,
    SubstringBeforeLast,
    SubstringAfterLast,
    Concat,
    Replace,
    ReplaceRegex,
    ToUpperCase,
    ToLowerCase,
    Trim,
    Coalesce,
    ToDate,
    Format,
}

impl RpFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "substringBefore" => RpFunction::SubstringBefore,
            "substringAfter" => RpFunction::SubstringAfter,
            "substringBeforeLast" => RpFunction::SubstringBeforeLast,
            "substringAfterLast" => RpFunction::SubstringAfterLast,
            "concat" => RpFunction::Concat,
            "replace" => RpFunction::Replace,
            "replaceRegex" => RpFunction::ReplaceRegex,
            "toUpperCase" => RpFunction::ToUpperCase,
            "toLowerCase" => RpFunction::ToLowerCase,
            "trim" => RpFunction::Trim,
            "coalesce" => RpFunction::Coalesce,
            "toDate" => RpFunction::ToDate,
            "format" => RpFunction::Format,
            _ => return None,
        };
        Some(func)
    }

    fn arity(&self) -> (usize, usize) {
        match self {
            RpFunction::Concat | RpFunction::Coalesce => (1, usize::MAX),
            RpFunction::Replace | RpFunction::ReplaceRegex => (3, 3),
            RpFunction::ToUpperCase | RpFunction::ToLowerCase | RpFunction::Trim => (1, 1),
            _ => (2, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPathError {
    NotARecordPath,
    InvalidPath(PathError),
    UnknownFunction(String),
    Arity { name: String, got: usize },
    InvalidArgument(String),
    InvalidRegex { pattern: String, message: String },
}

impl fmt::Display for RecordPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPathError::NotARecordPath => write!(f, "not a record path"),
            RecordPathError::InvalidPath(err) => write!(f, "invalid record path: {}", err),
            RecordPathError::UnknownFunction(name) => write!(f, "unknown record path function '{}'", name),
            RecordPathError::Arity { name, got } => {
                write!(f, "record path function '{}' does not take {} argument(s)", name, got)
            }
            RecordPathError::InvalidArgument(arg) => write!(f, "invalid record path argument '{}'", arg),
            RecordPathError::InvalidRegex { pattern, message } => {
                write!(f, "invalid regex '{}': {}", pattern, message)
            }
        }
    }
}

impl std::error::Error for RecordPathError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordPath {
    Path(PathExpression),
    /// Quoted string; only valid as a function argument.
    Literal(String),
    /// Quoted regex argument of `replaceRegex`, compiled once.
    Pattern(Pattern),
    Call { func: RpFunction, args: Vec<RecordPath> },
}

#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// True when `text` compiles as a record path.
pub fn is_record_path(text: &str) -> bool {
    RecordPath::compile(text).is_ok()
}

impl RecordPath {
    pub fn compile(text: &str) -> Result<Self, RecordPathError> {
        let text = text.trim();
        if text.starts_with('/') {
            return PathExpression::parse(text)
                .map(RecordPath::Path)
                .map_err(RecordPathError::InvalidPath);
        }
        let open = text.find('(').ok_or(RecordPathError::NotARecordPath)?;
        let name = text[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RecordPathError::NotARecordPath);
        }
        let func = RpFunction::from_name(name)
            .ok_or_else(|| RecordPathError::UnknownFunction(name.to_string()))?;
        let inner = text[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| RecordPathError::InvalidArgument(text.to_string()))?;

        let raw_args = split_args(inner)?;
        let (min, max) = func.arity();
        if raw_args.len() < min || raw_args.len() > max {
            return Err(RecordPathError::Arity {
                name: name.to_string(),
                got: raw_args.len(),
            });
        }
        let mut args = raw_args
            .into_iter()
            .map(compile_arg)
            .collect::<Result<Vec<_>, _>>()?;
        if func == RpFunction::ReplaceRegex {
            if let RecordPath::Literal(pattern) = &args[1] {
                let regex = Regex::new(pattern).map_err(|err| RecordPathError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: err.to_string(),
                })?;
                args[1] = RecordPath::Pattern(Pattern(regex));
            }
        }
        Ok(RecordPath::Call { func, args })
    }

    /// Evaluates against a source record; None when nothing matches.
    pub fn evaluate(&self, record: &Value) -> Option<Value> {
        match self.eval(record)? {
            Resolved::Value(value) => Some(value),
            Resolved::Date(date) => Some(Value::String(datefmt::format_default(&date))),
        }
    }

    fn eval(&self, record: &Value) -> Option<Resolved> {
        match self {
            RecordPath::Path(path) => match path.get(record) {
                None | Some(Value::Null) => None,
                Some(value) => Some(Resolved::Value(value.clone())),
            },
            RecordPath::Literal(text) => Some(Resolved::Value(Value::String(text.clone()))),
            RecordPath::Pattern(pattern) => Some(Resolved::Value(Value::from(pattern.as_str()))),
            RecordPath::Call { func, args } => call(*func, args, record),
        }
    }

    fn eval_text(&self, record: &Value) -> Option<String> {
        match self.eval(record)? {
            Resolved::Value(value) => Some(value.to_text()),
            Resolved::Date(date) => Some(datefmt::format_default(&date)),
        }
    }
}

enum Resolved {
    Value(Value),
    Date(NaiveDateTime),
}

fn text(value: String) -> Option<Resolved> {
    Some(Resolved::Value(Value::String(value)))
}

fn call(func: RpFunction, args: &[RecordPath], record: &Value) -> Option<Resolved> {
    match func {
        RpFunction::Concat => {
            let joined: String = args.iter().filter_map(|arg| arg.eval_text(record)).collect();
            text(joined)
        }
        RpFunction::Coalesce => args.iter().find_map(|arg| arg.eval(record)),
        RpFunction::ToDate => {
            let source = args[0].eval(record)?;
            let pattern = args[1].eval_text(record)?;
            match source {
                Resolved::Date(date) => Some(Resolved::Date(date)),
                Resolved::Value(value) => {
                    datefmt::parse_datetime(&value.to_text(), &pattern).map(Resolved::Date)
                }
            }
        }
        RpFunction::Format => {
            let date = match args[0].eval(record)? {
                Resolved::Date(date) => date,
                Resolved::Value(value) => datefmt::parse_datetime_default(&value.to_text())?,
            };
            let pattern = args[1].eval_text(record)?;
            datefmt::format_datetime(&date, &pattern).and_then(text)
        }
        _ => {
            let subject = args[0].eval_text(record)?;
            let arg = |i: usize| args.get(i).and_then(|a| a.eval_text(record));
            match func {
                RpFunction::SubstringBefore => {
                    let needle = arg(1)?;
                    text(subject.find(&needle).map_or(subject.clone(), |i| subject[..i].to_string()))
                }
                RpFunction::SubstringAfter => {
                    let needle = arg(1)?;
                    text(
                        subject
                            .find(&needle)
                            .map_or(subject.clone(), |i| subject[i + needle.len()..].to_string()),
                    )
                }
                RpFunction::SubstringBeforeLast => {
                    let needle = arg(1)?;
                    text(subject.rfind(&needle).map_or(subject.clone(), |i| subject[..i].to_string()))
                }
                RpFunction::SubstringAfterLast => {
                    let needle = arg(1)?;
                    text(
                        subject
                            .rfind(&needle)
                            .map_or(subject.clone(), |i| subject[i + needle.len()..].to_string()),
                    )
                }
                RpFunction::Replace => text(subject.replace(&arg(1)?, &arg(2)?)),
                RpFunction::ReplaceRegex => {
                    let replacement = arg(2)?;
                    let replaced = match &args[1] {
                        RecordPath::Pattern(Pattern(regex)) => {
                            regex.replace_all(&subject, replacement.as_str()).into_owned()
                        }
                        dynamic => {
                            let regex = Regex::new(&dynamic.eval_text(record)?).ok()?;
                            regex.replace_all(&subject, replacement.as_str()).into_owned()
                        }
                    };
                    text(replaced)
                }
                RpFunction::ToUpperCase => text(subject.to_uppercase()),
                RpFunction::ToLowerCase => text(subject.to_lowercase()),
                RpFunction::Trim => text(subject.trim().to_string()),
                _ => None,
            }
        }
    }
}

fn compile_arg(raw: &str) -> Result<RecordPath, RecordPathError> {
    let raw = raw.trim();
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Ok(RecordPath::Literal(raw[1..raw.len() - 1].to_string()));
        }
    }
    match RecordPath::compile(raw) {
        Err(RecordPathError::NotARecordPath) => Err(RecordPathError::InvalidArgument(raw.to_string())),
        other => other,
    }
}

/// Splits function arguments on top-level commas, honouring quotes and parentheses.
fn split_args(inner: &str) -> Result<Vec<&str>, RecordPathError> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in inner.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(ch),
            (None, '(') | (None, '[') => depth += 1,
            (None, ')') | (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| RecordPathError::InvalidArgument(inner.to_string()))?;
            }
            (None, ',') if depth == 0 => {
                args.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(RecordPathError::InvalidArgument(inner.to_string()));
    }
    let last = &inner[start..];
    if !(args.is_empty() && last.trim().is_empty()) {
        args.push(last);
    }
    Ok(args)
}
