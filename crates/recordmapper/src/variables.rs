//! Variable tables and their dependency analysis.
//!
//! Every variable has an inner name (`age`) and an outer name qualified by the
//! table it lives in (`global._var_.age`, `input.main._var_.age`,
//! `output.people._var_.age`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::cache::{CompiledSource, compile_source};

pub const VAR_MARKER: &str = "_var_";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarScope {
    Global,
    Input(String),
    Output(String),
}

impl VarScope {
    pub fn prefix(&self) -> String {
        match self {
            VarScope::Global => format!("global.{}", VAR_MARKER),
            VarScope::Input(name) => format!("input.{}.{}", name, VAR_MARKER),
            VarScope::Output(name) => format!("output.{}.{}", name, VAR_MARKER),
        }
    }

    pub fn outer_name(&self, inner: &str) -> String {
        format!("{}.{}", self.prefix(), inner)
    }

    pub fn is_global(&self) -> bool {
        matches!(self, VarScope::Global)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Variable {
    pub name: String,
    #[serde(alias = "exp", default)]
    pub expression: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableTable {
    pub scope: VarScope,
    pub variables: Vec<Variable>,
}

/// Result of the dependency pass over a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableAnalysis {
    /// Indices of variables read straight from the record.
    pub record_path_vars: BTreeSet<usize>,
    /// Indices of expression variables that must wait for per-record values.
    pub deferred: BTreeSet<usize>,
}

impl VariableAnalysis {
    pub fn is_upfront(&self, index: usize) -> bool {
        !self.record_path_vars.contains(&index) && !self.deferred.contains(&index)
    }
}

impl VariableTable {
    pub fn new(scope: VarScope, variables: Vec<Variable>) -> Self {
        Self { scope, variables }
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn outer_name(&self, var: &Variable) -> String {
        self.scope.outer_name(&var.name)
    }

    /// Index of the variable an inner or outer name refers to; later
    /// declarations shadow earlier ones.
    pub fn position(&self, name: &str) -> Option<usize> {
        let prefix = format!("{}.", self.scope.prefix());
        let inner = name.strip_prefix(&prefix).unwrap_or(name);
        self.variables.iter().rposition(|var| var.name == inner)
    }

    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for var in &self.variables {
            if !seen.insert(var.name.as_str()) && !duplicates.contains(&var.name) {
                duplicates.push(var.name.clone());
            }
        }
        duplicates
    }

    fn impact(&self, index: usize) -> Option<BTreeSet<String>> {
        match compile_source(&self.variables[index].expression) {
            CompiledSource::Expression(template) => Some(template.variable_impact()),
            _ => None,
        }
    }

    /// Inner names of this table's variables that the expression of
    /// variable `index` reads. Empty for non-expression variables.
    pub fn compute_impacted(&self, index: usize) -> BTreeSet<String> {
        self.impact(index)
            .unwrap_or_default()
            .iter()
            .filter_map(|name| self.position(name))
            .map(|pos| self.variables[pos].name.clone())
            .collect()
    }

    pub fn analyze(&self) -> VariableAnalysis {
        let mut analysis = VariableAnalysis::default();
        let impacts: Vec<Option<BTreeSet<String>>> =
            (0..self.variables.len()).map(|i| self.impact(i)).collect();

        if !self.scope.is_global() {
            for (index, var) in self.variables.iter().enumerate() {
                if matches!(compile_source(&var.expression), CompiledSource::RecordPath(_)) {
                    analysis.record_path_vars.insert(index);
                }
            }
        }

        // Fixpoint: a variable waits when anything it reads waits. Global
        // variables also wait on names outside the table, which only exist
        // once a record is being mapped.
        loop {
            let mut changed = false;
            for (index, impact) in impacts.iter().enumerate() {
                let Some(impact) = impact else { continue };
                if analysis.deferred.contains(&index) {
                    continue;
                }
                let waits = impact.iter().any(|name| match self.position(name) {
                    Some(pos) => {
                        analysis.record_path_vars.contains(&pos) || analysis.deferred.contains(&pos)
                    }
                    None => self.scope.is_global(),
                });
                if waits {
                    analysis.deferred.insert(index);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        analysis
    }
}

#[cfg(test)]
mod variables_tests {
    use super::*;

    fn table(scope: VarScope, vars: &[(&str, &str)]) -> VariableTable {
        VariableTable::new(
            scope,
            vars.iter().map(|(n, e)| Variable::new(*n, *e)).collect(),
        )
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(VarScope::Global.outer_name("x"), "global._var_.x");
        assert_eq!(VarScope::Input("main".into()).outer_name("x"), "input.main._var_.x");
        assert_eq!(VarScope::Output("t".into()).outer_name("x"), "output.t._var_.x");
    }

    #[test]
    fn test_record_path_vars_defer_dependents() {
        let t = table(
            VarScope::Output("people".into()),
            &[
                ("last", "substringAfter(/name, ' ')"),
                ("upper", "${last:toUpper()}"),
                ("greeting", "${output.people._var_.upper:prepend('Hi ')}"),
                ("constant", "${literal('x')}"),
                ("fromInput", "${input.main.id}"),
                ("plain", "hello"),
            ],
        );
        let analysis = t.analyze();
        assert_eq!(analysis.record_path_vars, BTreeSet::from([0]));
        assert_eq!(analysis.deferred, BTreeSet::from([1, 2]));
        assert!(analysis.is_upfront(3));
        assert!(analysis.is_upfront(4));
        assert!(analysis.is_upfront(5));
    }

    #[test]
    fn test_compute_impacted_maps_outer_names_to_inner() {
        let t = table(
            VarScope::Input("main".into()),
            &[("a", "/a"), ("b", "${input.main._var_.a}${other}")],
        );
        assert_eq!(t.compute_impacted(1), BTreeSet::from(["a".to_string()]));
        assert!(t.compute_impacted(0).is_empty());
    }

    #[test]
    fn test_global_table_defers_record_dependent_vars() {
        let t = table(
            VarScope::Global,
            &[
                ("suffix", "_x"),
                ("tagged", "${suffix:prepend('id')}"),
                ("year", "${input.main.birth:toDate('yyyy-MM-dd'):format('yyyy')}"),
                ("label", "${global._var_.year:append('!')}"),
                ("path", "/name"),
            ],
        );
        let analysis = t.analyze();
        assert!(analysis.record_path_vars.is_empty());
        assert_eq!(analysis.deferred, BTreeSet::from([2, 3]));
    }

    #[test]
    fn test_duplicate_names() {
        let t = table(VarScope::Global, &[("a", "1"), ("b", "2"), ("a", "3"), ("a", "4")]);
        assert_eq!(t.duplicate_names(), vec!["a".to_string()]);
        assert_eq!(t.position("global._var_.a"), Some(3));
    }
}
