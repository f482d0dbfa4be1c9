//! Evaluation of parsed expression templates against a variable scope.

use chrono::{NaiveDateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use crate::datefmt;
use crate::el_model::{ElArg, ElExpr, ElFunction, ElSubject, FnCall, Template, TemplatePart};
use crate::value::Value;

// =============================================================================
// Variable scopes
// =============================================================================

/// Name lookup used by expressions. Absent names evaluate to null.
pub trait VarLookup {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl VarLookup for IndexMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl VarLookup for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Stack of scopes searched front to back; the first hit wins.
#[derive(Default)]
pub struct LayeredLookup<'a> {
    layers: Vec<&'a dyn VarLookup>,
}

impl<'a> LayeredLookup<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn with_layer(mut self, layer: &'a dyn VarLookup) -> Self {
        self.layers.push(layer);
        self
    }
}

impl VarLookup for LayeredLookup<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.lookup(name))
    }
}

// =============================================================================
// ElValue
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ElValue {
    Null,
    String(String),
    Whole(i64),
    Decimal(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

impl ElValue {
    fn from_value(value: Option<&Value>) -> ElValue {
        match value {
            None | Some(Value::Null) => ElValue::Null,
            Some(Value::String(s)) => ElValue::String(s.clone()),
            Some(Value::Bool(b)) => ElValue::Bool(*b),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => ElValue::Whole(i),
                None => ElValue::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Some(composite) => ElValue::String(composite.to_string()),
        }
    }

    pub fn render(&self) -> String {
        match self {
            ElValue::Null => String::new(),
            ElValue::String(s) => s.clone(),
            ElValue::Whole(i) => i.to_string(),
            ElValue::Decimal(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.1}", f),
            ElValue::Decimal(f) => f.to_string(),
            ElValue::Bool(b) => b.to_string(),
            ElValue::Date(dt) => datefmt::format_default(dt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElError {
    pub message: String,
}

impl ElError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ElError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ElError {}

// =============================================================================
// Evaluation
// =============================================================================

/// Renders a template to text; each expression contributes its string form.
pub fn eval_template(template: &Template, vars: &dyn VarLookup) -> Result<String, ElError> {
    let mut out = String::new();
    for part in &template.parts {
        match part {
            TemplatePart::Text(text) => out.push_str(text),
            TemplatePart::Expr(expr) => out.push_str(&eval_expr(expr, vars)?.render()),
        }
    }
    Ok(out)
}

pub fn eval_expr(expr: &ElExpr, vars: &dyn VarLookup) -> Result<ElValue, ElError> {
    let mut value = match &expr.subject {
        ElSubject::Attribute(name) => ElValue::from_value(vars.lookup(name)),
        ElSubject::Nested(inner) => {
            let name = eval_expr(inner, vars)?.render();
            ElValue::from_value(vars.lookup(&name))
        }
        ElSubject::Function(call) => eval_subjectless(call, vars)?,
    };
    for call in &expr.calls {
        value = apply(call, value, vars)?;
    }
    Ok(value)
}

fn eval_subjectless(call: &FnCall, vars: &dyn VarLookup) -> Result<ElValue, ElError> {
    match call.func {
        ElFunction::Now => Ok(ElValue::Date(Utc::now().naive_utc())),
        ElFunction::Literal => Ok(ElValue::String(
            eval_args(call, vars)?
                .first()
                .map(ElValue::render)
                .unwrap_or_default(),
        )),
        other => Err(ElError::new(format!("function '{}' needs a subject", other.name()))),
    }
}

fn eval_args(call: &FnCall, vars: &dyn VarLookup) -> Result<Vec<ElValue>, ElError> {
    call.args
        .iter()
        .map(|arg| match arg {
            ElArg::Text(text) => Ok(ElValue::String(text.clone())),
            ElArg::Bool(b) => Ok(ElValue::Bool(*b)),
            ElArg::Number(raw) => parse_number(raw)
                .ok_or_else(|| ElError::new(format!("invalid number '{}'", raw))),
            ElArg::Expr(expr) => eval_expr(expr, vars),
        })
        .collect()
}

fn parse_number(text: &str) -> Option<ElValue> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(ElValue::Whole(i));
    }
    text.parse::<f64>().ok().map(ElValue::Decimal)
}

fn as_number(value: &ElValue, func: ElFunction) -> Result<ElValue, ElError> {
    let number = match value {
        ElValue::Whole(_) | ElValue::Decimal(_) => Some(value.clone()),
        ElValue::String(s) => parse_number(s),
        ElValue::Date(dt) => Some(ElValue::Whole(dt.and_utc().timestamp_millis())),
        ElValue::Null | ElValue::Bool(_) => None,
    };
    number.ok_or_else(|| {
        ElError::new(format!(
            "{}: '{}' is not a number",
            func.name(),
            value.render()
        ))
    })
}

fn as_f64(value: &ElValue) -> f64 {
    match value {
        ElValue::Whole(i) => *i as f64,
        ElValue::Decimal(f) => *f,
        _ => f64::NAN,
    }
}

fn as_bool(value: &ElValue, func: ElFunction) -> Result<bool, ElError> {
    match value {
        ElValue::Bool(b) => Ok(*b),
        ElValue::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        ElValue::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ElError::new(format!(
            "{}: '{}' is not a boolean",
            func.name(),
            other.render()
        ))),
    }
}

fn as_date(value: &ElValue, func: ElFunction) -> Result<NaiveDateTime, ElError> {
    match value {
        ElValue::Date(dt) => Ok(*dt),
        ElValue::Whole(millis) => chrono::DateTime::from_timestamp_millis(*millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| ElError::new(format!("{}: timestamp out of range", func.name()))),
        other => datefmt::parse_datetime_default(&other.render()).ok_or_else(|| {
            ElError::new(format!("{}: '{}' is not a date", func.name(), other.render()))
        }),
    }
}

fn compile_regex(pattern: &str, func: ElFunction) -> Result<Regex, ElError> {
    Regex::new(pattern)
        .map_err(|err| ElError::new(format!("{}: invalid regex '{}': {}", func.name(), pattern, err)))
}

fn arithmetic(func: ElFunction, left: ElValue, right: ElValue) -> Result<ElValue, ElError> {
    if let (ElValue::Whole(a), ElValue::Whole(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        let whole = match func {
            ElFunction::Plus => a.checked_add(b),
            ElFunction::Minus => a.checked_sub(b),
            ElFunction::Multiply => a.checked_mul(b),
            ElFunction::Divide | ElFunction::Mod if b == 0 => {
                return Err(ElError::new(format!("{}: division by zero", func.name())));
            }
            ElFunction::Divide => a.checked_div(b),
            ElFunction::Mod => a.checked_rem(b),
            _ => None,
        };
        if let Some(result) = whole {
            return Ok(ElValue::Whole(result));
        }
    }
    let (a, b) = (as_f64(&left), as_f64(&right));
    let result = match func {
        ElFunction::Plus => a + b,
        ElFunction::Minus => a - b,
        ElFunction::Multiply => a * b,
        ElFunction::Divide => a / b,
        ElFunction::Mod => a % b,
        other => return Err(ElError::new(format!("{} is not arithmetic", other.name()))),
    };
    if !result.is_finite() {
        return Err(ElError::new(format!("{}: result is not a finite number", func.name())));
    }
    Ok(ElValue::Decimal(result))
}

/// Widest result `padLeft`/`padRight` will produce.
pub const MAX_PAD_WIDTH: usize = 65_536;

fn pad(text: &str, width: &ElValue, fill: Option<&ElValue>, left: bool, func: ElFunction) -> Result<String, ElError> {
    let width = match as_number(width, func)? {
        ElValue::Whole(w) if w >= 0 && (w as u64) <= MAX_PAD_WIDTH as u64 => w as usize,
        ElValue::Whole(w) if w > 0 => {
            return Err(ElError::new(format!(
                "{}: width {} exceeds the maximum of {}",
                func.name(),
                w,
                MAX_PAD_WIDTH
            )));
        }
        other => return Err(ElError::new(format!("{}: invalid width '{}'", func.name(), other.render()))),
    };
    let fill = fill
        .map(ElValue::render)
        .and_then(|s| s.chars().next())
        .unwrap_or('_');
    let len = text.chars().count();
    if len >= width {
        return Ok(text.to_string());
    }
    let padding: String = std::iter::repeat_n(fill, width - len).collect();
    Ok(if left {
        format!("{}{}", padding, text)
    } else {
        format!("{}{}", text, padding)
    })
}

fn substring(text: &str, start: &ElValue, end: Option<&ElValue>, func: ElFunction) -> Result<String, ElError> {
    let index = |v: &ElValue| -> Result<usize, ElError> {
        match as_number(v, func)? {
            ElValue::Whole(i) if i >= 0 => Ok(i as usize),
            other => Err(ElError::new(format!("{}: invalid index '{}'", func.name(), other.render()))),
        }
    };
    let chars: Vec<char> = text.chars().collect();
    let start = index(start)?.min(chars.len());
    let end = match end {
        Some(end) => index(end)?.min(chars.len()),
        None => chars.len(),
    };
    if start >= end {
        return Ok(String::new());
    }
    Ok(chars[start..end].iter().collect())
}

fn compare(func: ElFunction, left: &ElValue, right: &ElValue) -> Result<bool, ElError> {
    let (a, b) = (as_f64(&as_number(left, func)?), as_f64(&as_number(right, func)?));
    Ok(match func {
        ElFunction::Gt => a > b,
        ElFunction::Ge => a >= b,
        ElFunction::Lt => a < b,
        _ => a <= b,
    })
}

fn apply(call: &FnCall, subject: ElValue, vars: &dyn VarLookup) -> Result<ElValue, ElError> {
    use ElFunction as F;

    let args = eval_args(call, vars)?;
    let text = subject.render();
    let arg_text = |i: usize| args.get(i).map(ElValue::render).unwrap_or_default();

    let value = match call.func {
        F::ToUpper => ElValue::String(text.to_uppercase()),
        F::ToLower => ElValue::String(text.to_lowercase()),
        F::Trim => ElValue::String(text.trim().to_string()),
        F::Append => ElValue::String(format!("{}{}", text, arg_text(0))),
        F::Prepend => ElValue::String(format!("{}{}", arg_text(0), text)),
        F::Substring => ElValue::String(substring(&text, &args[0], args.get(1), call.func)?),
        F::SubstringBefore => {
            let needle = arg_text(0);
            ElValue::String(text.find(&needle).map_or(text.clone(), |i| text[..i].to_string()))
        }
        F::SubstringAfter => {
            let needle = arg_text(0);
            ElValue::String(
                text.find(&needle)
                    .map_or(text.clone(), |i| text[i + needle.len()..].to_string()),
            )
        }
        F::SubstringBeforeLast => {
            let needle = arg_text(0);
            ElValue::String(text.rfind(&needle).map_or(text.clone(), |i| text[..i].to_string()))
        }
        F::SubstringAfterLast => {
            let needle = arg_text(0);
            ElValue::String(
                text.rfind(&needle)
                    .map_or(text.clone(), |i| text[i + needle.len()..].to_string()),
            )
        }
        F::Replace => ElValue::String(text.replace(&arg_text(0), &arg_text(1))),
        F::ReplaceFirst => {
            let regex = compile_regex(&arg_text(0), call.func)?;
            ElValue::String(regex.replacen(&text, 1, arg_text(1).as_str()).into_owned())
        }
        F::ReplaceAll => {
            let regex = compile_regex(&arg_text(0), call.func)?;
            ElValue::String(regex.replace_all(&text, arg_text(1).as_str()).into_owned())
        }
        F::ReplaceNull => match subject {
            ElValue::Null => args[0].clone(),
            other => other,
        },
        F::ReplaceEmpty => {
            if text.trim().is_empty() {
                args[0].clone()
            } else {
                subject
            }
        }
        F::PadLeft => ElValue::String(pad(&text, &args[0], args.get(1), true, call.func)?),
        F::PadRight => ElValue::String(pad(&text, &args[0], args.get(1), false, call.func)?),
        F::Length => ElValue::Whole(text.chars().count() as i64),
        F::ToString => ElValue::String(text),
        F::IsNull => ElValue::Bool(subject == ElValue::Null),
        F::NotNull => ElValue::Bool(subject != ElValue::Null),
        F::IsEmpty => ElValue::Bool(text.trim().is_empty()),
        F::Equals => ElValue::Bool(text == arg_text(0)),
        F::EqualsIgnoreCase => ElValue::Bool(text.to_lowercase() == arg_text(0).to_lowercase()),
        F::Contains => ElValue::Bool(text.contains(&arg_text(0))),
        F::StartsWith => ElValue::Bool(text.starts_with(&arg_text(0))),
        F::EndsWith => ElValue::Bool(text.ends_with(&arg_text(0))),
        F::Matches => {
            let regex = compile_regex(&format!("^(?:{})$", arg_text(0)), call.func)?;
            ElValue::Bool(regex.is_match(&text))
        }
        F::Find => ElValue::Bool(compile_regex(&arg_text(0), call.func)?.is_match(&text)),
        F::In => ElValue::Bool(args.iter().any(|arg| arg.render() == text)),
        F::Gt | F::Ge | F::Lt | F::Le => ElValue::Bool(compare(call.func, &subject, &args[0])?),
        F::Not => ElValue::Bool(!as_bool(&subject, call.func)?),
        F::And => ElValue::Bool(as_bool(&subject, call.func)? && as_bool(&args[0], call.func)?),
        F::Or => ElValue::Bool(as_bool(&subject, call.func)? || as_bool(&args[0], call.func)?),
        F::IfElse => {
            if as_bool(&subject, call.func)? {
                args[0].clone()
            } else {
                args[1].clone()
            }
        }
        F::Plus | F::Minus | F::Multiply | F::Divide | F::Mod => {
            let left = as_number(&subject, call.func)?;
            let right = as_number(&args[0], call.func)?;
            arithmetic(call.func, left, right)?
        }
        F::ToNumber => as_number(&subject, call.func)?,
        F::ToDecimal => ElValue::Decimal(as_f64(&as_number(&subject, call.func)?)),
        F::ToDate => match args.first() {
            Some(pattern) => {
                let pattern = pattern.render();
                match &subject {
                    ElValue::Date(dt) => ElValue::Date(*dt),
                    _ => ElValue::Date(datefmt::parse_datetime(&text, &pattern).ok_or_else(|| {
                        ElError::new(format!("toDate: '{}' does not match '{}'", text, pattern))
                    })?),
                }
            }
            None => ElValue::Date(as_date(&subject, call.func)?),
        },
        F::Format => {
            let date = as_date(&subject, call.func)?;
            let pattern = arg_text(0);
            ElValue::String(datefmt::format_datetime(&date, &pattern).ok_or_else(|| {
                ElError::new(format!("format: pattern '{}' cannot render a local date", pattern))
            })?)
        }
        F::Now | F::Literal => {
            return Err(ElError::new(format!(
                "function '{}' cannot be applied to a subject",
                call.func.name()
            )));
        }
    };
    Ok(value)
}
