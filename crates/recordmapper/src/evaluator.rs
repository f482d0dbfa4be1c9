//! Per-record evaluation of variable tables.

use indexmap::IndexMap;
use std::sync::OnceLock;
use tracing::warn;

use crate::cache::{CompiledSource, ExpressionCache};
use crate::el_eval::{LayeredLookup, VarLookup, eval_template};
use crate::error::{MapErrorKind, MapWarning};
use crate::value::Value;
use crate::variables::{VariableAnalysis, VariableTable};

/// Variable values keyed by inner and/or outer name.
pub type VarValues = IndexMap<String, Value>;

pub struct VariableEvaluator {
    table: VariableTable,
    analysis: VariableAnalysis,
}

impl VariableEvaluator {
    pub fn new(table: VariableTable) -> Self {
        let analysis = table.analyze();
        Self { table, analysis }
    }

    pub fn table(&self) -> &VariableTable {
        &self.table
    }

    pub fn analysis(&self) -> &VariableAnalysis {
        &self.analysis
    }

    /// Evaluates the variables that need no per-record values, in
    /// declaration order. The result holds inner and outer names.
    pub fn evaluate_upfront(
        &self,
        carry: &dyn VarLookup,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
    ) -> VarValues {
        let mut local = VarValues::new();
        for index in 0..self.table.variables.len() {
            if self.analysis.is_upfront(index) {
                let value = self.eval_one(index, &Value::Null, &local, carry, cache, warnings);
                self.store(index, value, &mut local);
            }
        }
        local
    }

    /// Full pass for one record.
    ///
    /// `upfront` reuses earlier upfront values (the global cache); otherwise
    /// they are computed against `carry`. Record-path variables run next,
    /// then deferred ones in declaration order. Every value is emitted under
    /// its outer name, and under its inner name too when `emit_inner` is set.
    pub fn evaluate(
        &self,
        record: &Value,
        carry: &dyn VarLookup,
        upfront: Option<&VarValues>,
        emit_inner: bool,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
    ) -> VarValues {
        let mut local = match upfront {
            Some(values) => values.clone(),
            None => self.evaluate_upfront(carry, cache, warnings),
        };
        for &index in &self.analysis.record_path_vars {
            let value = self.eval_one(index, record, &local, carry, cache, warnings);
            self.store(index, value, &mut local);
        }
        for &index in &self.analysis.deferred {
            let value = self.eval_one(index, record, &local, carry, cache, warnings);
            self.store(index, value, &mut local);
        }

        let mut out = VarValues::with_capacity(local.len());
        for var in &self.table.variables {
            let outer = self.table.outer_name(var);
            if let Some(value) = local.get(&outer) {
                if emit_inner {
                    out.insert(var.name.clone(), value.clone());
                }
                out.insert(outer, value.clone());
            }
        }
        out
    }

    fn store(&self, index: usize, value: Value, local: &mut VarValues) {
        let var = &self.table.variables[index];
        local.insert(self.table.outer_name(var), value.clone());
        local.insert(var.name.clone(), value);
    }

    fn eval_one(
        &self,
        index: usize,
        record: &Value,
        local: &VarValues,
        carry: &dyn VarLookup,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
    ) -> Value {
        let var = &self.table.variables[index];
        let path = || format!("{}[{}]", self.table.scope.prefix(), var.name);
        match cache.compile(&var.expression) {
            CompiledSource::Empty => Value::from(""),
            CompiledSource::Literal(text) => Value::String(text.to_string()),
            CompiledSource::RecordPath(_) if self.table.scope.is_global() => Value::from(""),
            CompiledSource::RecordPath(record_path) => {
                record_path.evaluate(record).unwrap_or_else(|| Value::from(""))
            }
            CompiledSource::Expression(template) => {
                let scope = LayeredLookup::new().with_layer(local).with_layer(carry);
                match eval_template(&template, &scope) {
                    Ok(text) => Value::String(text),
                    Err(err) => {
                        warn!(variable = %path(), error = %err, "variable evaluation failed");
                        warnings.push(MapWarning::new(MapErrorKind::ExprError, err.message).with_path(path()));
                        Value::from("")
                    }
                }
            }
            CompiledSource::Invalid(message) => {
                warnings.push(MapWarning::new(MapErrorKind::ExprError, message.to_string()).with_path(path()));
                Value::from("")
            }
        }
    }
}

/// Global upfront values, computed once and then only read.
#[derive(Default)]
pub struct GlobalVarCache {
    values: OnceLock<VarValues>,
}

impl GlobalVarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> VarValues) -> &VarValues {
        self.values.get_or_init(init)
    }

    pub fn get(&self) -> Option<&VarValues> {
        self.values.get()
    }
}

#[cfg(test)]
mod evaluator_tests {
    use super::*;
    use crate::variables::{VarScope, Variable};
    use serde_json::json;

    fn evaluator(scope: VarScope, vars: &[(&str, &str)]) -> VariableEvaluator {
        VariableEvaluator::new(VariableTable::new(
            scope,
            vars.iter().map(|(n, e)| Variable::new(*n, *e)).collect(),
        ))
    }

    #[test]
    fn test_outer_and_inner_names() {
        let eval = evaluator(
            VarScope::Output("people".into()),
            &[
                ("last", "substringAfter(/name, ' ')"),
                ("shout", "${last:toUpper()}"),
                ("fixed", "abc"),
            ],
        );
        let record = Value::from_json(json!({"name": "Tom Smith"}));
        let carry = VarValues::new();
        let mut cache = ExpressionCache::new();
        let mut warnings = Vec::new();

        let outer_only = eval.evaluate(&record, &carry, None, false, &mut cache, &mut warnings);
        assert_eq!(outer_only.get("output.people._var_.last"), Some(&Value::from("Smith")));
        assert_eq!(outer_only.get("output.people._var_.shout"), Some(&Value::from("SMITH")));
        assert_eq!(outer_only.get("output.people._var_.fixed"), Some(&Value::from("abc")));
        assert_eq!(outer_only.get("last"), None);

        let both = eval.evaluate(&record, &carry, None, true, &mut cache, &mut warnings);
        assert_eq!(both.get("shout"), Some(&Value::from("SMITH")));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unresolvable_values_are_empty() {
        let eval = evaluator(
            VarScope::Input("main".into()),
            &[("zip", "/address/zip"), ("blank", "  ")],
        );
        let record = Value::from_json(json!({"address": {}}));
        let mut warnings = Vec::new();
        let values = eval.evaluate(
            &record,
            &VarValues::new(),
            None,
            false,
            &mut ExpressionCache::new(),
            &mut warnings,
        );
        assert_eq!(values.get("input.main._var_.zip"), Some(&Value::from("")));
        assert_eq!(values.get("input.main._var_.blank"), Some(&Value::from("")));
    }

    #[test]
    fn test_carry_values_are_visible() {
        let eval = evaluator(VarScope::Output("t".into()), &[("id2", "${input.main.id:multiply(2)}")]);
        let mut carry = VarValues::new();
        carry.insert("input.main.id".to_string(), Value::from(21));
        let values = eval.evaluate(
            &Value::Null,
            &carry,
            None,
            false,
            &mut ExpressionCache::new(),
            &mut Vec::new(),
        );
        assert_eq!(values.get("output.t._var_.id2"), Some(&Value::from("42")));
    }

    #[test]
    fn test_global_record_path_is_empty_and_duplicates_last_wins() {
        let eval = evaluator(
            VarScope::Global,
            &[("p", "/name"), ("x", "first"), ("y", "${x}"), ("x", "second")],
        );
        let values = eval.evaluate(
            &Value::from_json(json!({"name": "n"})),
            &VarValues::new(),
            None,
            true,
            &mut ExpressionCache::new(),
            &mut Vec::new(),
        );
        assert_eq!(values.get("global._var_.p"), Some(&Value::from("")));
        assert_eq!(values.get("y"), Some(&Value::from("first")));
        assert_eq!(values.get("x"), Some(&Value::from("second")));
        assert_eq!(values.get("global._var_.x"), Some(&Value::from("second")));
    }

    #[test]
    fn test_expression_failure_reports_warning() {
        let eval = evaluator(VarScope::Global, &[("bad", "${literal('abc'):plus(1)}")]);
        let mut warnings = Vec::new();
        let values = eval.evaluate(
            &Value::Null,
            &VarValues::new(),
            None,
            true,
            &mut ExpressionCache::new(),
            &mut warnings,
        );
        assert_eq!(values.get("bad"), Some(&Value::from("")));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, MapErrorKind::ExprError);
        assert_eq!(warnings[0].path.as_deref(), Some("global._var_[bad]"));
    }

    #[test]
    fn test_global_cache_is_write_once() {
        let cache = GlobalVarCache::new();
        assert!(cache.get().is_none());
        let first = cache.get_or_init(|| VarValues::from([("a".to_string(), Value::from("1"))]));
        assert_eq!(first.get("a"), Some(&Value::from("1")));
        let second = cache.get_or_init(|| VarValues::new());
        assert_eq!(second.len(), 1);
    }
}
