//! Turns the source text of a mapping into a value.
//!
//! Sources are tried as an expression first, then as a record path against
//! the current input record, and otherwise taken literally.

use crate::cache::{CompiledSource, ExpressionCache};
use crate::el_eval::{VarLookup, eval_template};
use crate::error::{MapError, MapErrorKind};
use crate::value::Value;

/// What a source may read while one input record is mapped.
pub struct ResolvedEnvironment<'a> {
    pub record: &'a Value,
    pub vars: &'a dyn VarLookup,
}

impl<'a> ResolvedEnvironment<'a> {
    pub fn new(record: &'a Value, vars: &'a dyn VarLookup) -> Self {
        Self { record, vars }
    }
}

/// Resolves `source` for the current record.
///
/// Blank sources yield `EmptyExpression`; a record path that matches nothing
/// yields `Value::Null`; expression results are always strings.
pub fn resolve(
    source: &str,
    env: &ResolvedEnvironment<'_>,
    cache: &mut ExpressionCache,
) -> Result<Value, MapError> {
    resolve_compiled(&cache.compile(source), env)
}

pub fn resolve_compiled(compiled: &CompiledSource, env: &ResolvedEnvironment<'_>) -> Result<Value, MapError> {
    match compiled {
        CompiledSource::Empty => Err(MapError::new(
            MapErrorKind::EmptyExpression,
            "source expression is empty",
        )),
        CompiledSource::Expression(template) => eval_template(template, env.vars)
            .map(Value::String)
            .map_err(|err| MapError::new(MapErrorKind::ExprError, err.message)),
        CompiledSource::RecordPath(path) => Ok(path.evaluate(env.record).unwrap_or(Value::Null)),
        CompiledSource::Literal(text) => Ok(Value::String(text.to_string())),
        CompiledSource::Invalid(message) => Err(MapError::new(MapErrorKind::ExprError, message.to_string())),
    }
}
