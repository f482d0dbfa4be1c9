//! Maps one input record onto every configured output table.
//!
//! Per record: input variables, global variables, output-table variables,
//! then for each table its filter, field resolution and record building.
//! Problems inside one table are reported as warnings and never affect the
//! other tables.

use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::builder::RecordBuilder;
use crate::cache::{CompiledSource, ExpressionCache, compile_source};
use crate::el_eval::{LayeredLookup, VarLookup};
use crate::error::{ConfigError, MapErrorKind, MapWarning};
use crate::evaluator::{GlobalVarCache, VarValues, VariableEvaluator};
use crate::path::PathExpression;
use crate::resolver::{ResolvedEnvironment, resolve};
use crate::schema::RecordSchema;
use crate::table::{MapperConfig, evaluate_filter};
use crate::validator::{VarSite, check_config};
use crate::value::Value;
use crate::variables::{VAR_MARKER, VarScope, Variable, VariableTable};

pub const RECORD_COUNT_ATTRIBUTE: &str = "record.count";

// =============================================================================
// Outputs
// =============================================================================

/// All records one output table produced for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOutput {
    pub id: String,
    pub name: String,
    pub records: Vec<Value>,
    pub count: usize,
}

impl TableOutput {
    pub fn attributes(&self) -> IndexMap<String, String> {
        let mut attrs = IndexMap::new();
        attrs.insert(RECORD_COUNT_ATTRIBUTE.to_string(), self.count.to_string());
        attrs.insert("table.id".to_string(), self.id.clone());
        attrs.insert("table.name".to_string(), self.name.clone());
        attrs
    }
}

/// One output record tagged with the table it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub table_index: usize,
    pub table_id: String,
    pub table_name: String,
    pub record: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordOutcome {
    pub outputs: Vec<MappedRecord>,
    pub warnings: Vec<MapWarning>,
}

impl RecordOutcome {
    pub fn for_table(&self, name: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|out| out.table_name == name)
            .map(|out| &out.record)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutput {
    pub tables: Vec<TableOutput>,
    pub warnings: Vec<MapWarning>,
}

impl BatchOutput {
    pub fn table(&self, name: &str) -> Option<&TableOutput> {
        self.tables.iter().find(|table| table.name == name)
    }
}

// =============================================================================
// Compiled configuration
// =============================================================================

struct CompiledField {
    path: PathExpression,
    source: String,
    default: Option<String>,
    location: String,
}

enum FilterPlan {
    Always,
    /// The filter does not parse; nothing is emitted.
    Broken,
    BeforeBuild(String),
    /// The filter reads built output fields.
    AfterBuild(String),
}

struct CompiledTable {
    id: String,
    name: String,
    schema: RecordSchema,
    filter: FilterPlan,
    vars: VariableEvaluator,
    fields: Vec<CompiledField>,
}

pub struct RecordMapper {
    input_name: String,
    global: VariableEvaluator,
    global_cache: GlobalVarCache,
    input_vars: VariableEvaluator,
    tables: Vec<CompiledTable>,
    second_pass: bool,
    config_errors: Vec<ConfigError>,
}

fn enabled_vars(vars: &[Variable], site: VarSite, disabled: &HashSet<(VarSite, usize)>) -> Vec<Variable> {
    vars.iter()
        .enumerate()
        .filter(|(index, _)| !disabled.contains(&(site, *index)))
        .map(|(_, var)| var.clone())
        .collect()
}

impl RecordMapper {
    /// Compiles a configuration, failing on any configuration error.
    pub fn new(config: MapperConfig) -> Result<Self, Vec<ConfigError>> {
        let mapper = Self::lenient(config);
        if mapper.config_errors.is_empty() {
            Ok(mapper)
        } else {
            Err(mapper.config_errors)
        }
    }

    /// Compiles a configuration, disabling the parts that are invalid.
    /// The problems stay available through [`RecordMapper::config_errors`].
    pub fn lenient(config: MapperConfig) -> Self {
        let report = check_config(&config);
        for err in &report.errors {
            warn!(code = err.code.as_str(), path = err.path.as_deref().unwrap_or(""), "{}", err.message);
        }

        let global = VariableEvaluator::new(VariableTable::new(
            VarScope::Global,
            enabled_vars(&config.global_vars, VarSite::Global, &report.disabled_vars),
        ));
        let input_vars = VariableEvaluator::new(VariableTable::new(
            VarScope::Input(config.input.name.clone()),
            enabled_vars(&config.input.vars, VarSite::Input, &report.disabled_vars),
        ));

        let global_names = global_var_names(global.table());
        let mut tables = Vec::with_capacity(config.outputs.len());
        for (table_index, output) in config.outputs.into_iter().enumerate() {
            let vars = VariableEvaluator::new(VariableTable::new(
                VarScope::Output(output.name.clone()),
                enabled_vars(&output.vars, VarSite::Output(table_index), &report.disabled_vars),
            ));

            let mut fields = Vec::new();
            for (field_index, field) in output.fields.into_iter().enumerate() {
                if report.disabled_fields.contains(&(table_index, field_index)) {
                    continue;
                }
                let Ok(path) = PathExpression::parse(&field.path) else {
                    continue;
                };
                fields.push(CompiledField {
                    location: format!("outputs[{}].fields[{}]", output.name, path),
                    path,
                    source: field.source,
                    default: field.default,
                });
            }

            let filter = match output.filter.filter(|f| !f.trim().is_empty()) {
                None => FilterPlan::Always,
                Some(_) if report.broken_filters.contains(&table_index) => FilterPlan::Broken,
                Some(filter) => {
                    if filter_reads_output(&filter, &output.name, &output.schema, vars.table(), &global_names) {
                        FilterPlan::AfterBuild(filter)
                    } else {
                        FilterPlan::BeforeBuild(filter)
                    }
                }
            };

            tables.push(CompiledTable {
                id: output.id.clone().unwrap_or_else(|| output.name.clone()),
                name: output.name,
                schema: output.schema,
                filter,
                vars,
                fields,
            });
        }

        let second_pass = needs_second_pass(&tables);
        Self {
            input_name: config.input.name,
            global,
            global_cache: GlobalVarCache::new(),
            input_vars,
            tables,
            second_pass,
            config_errors: report.errors,
        }
    }

    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|table| table.name.as_str())
    }

    /// Maps every record with a cache owned by this call.
    pub fn map_batch(&self, records: &[Value]) -> BatchOutput {
        let mut cache = ExpressionCache::new();
        self.map_batch_with_cache(records, &mut cache)
    }

    pub fn map_batch_with_cache(&self, records: &[Value], cache: &mut ExpressionCache) -> BatchOutput {
        let mut tables: Vec<TableOutput> = self
            .tables
            .iter()
            .map(|table| TableOutput {
                id: table.id.clone(),
                name: table.name.clone(),
                records: Vec::new(),
                count: 0,
            })
            .collect();
        let mut warnings = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let outcome = self.map_record(record, cache);
            for out in outcome.outputs {
                let table = &mut tables[out.table_index];
                table.records.push(out.record);
                table.count += 1;
            }
            warnings.extend(outcome.warnings.into_iter().map(|w| match w.path {
                Some(path) => MapWarning { path: Some(format!("records[{}].{}", index, path)), ..w },
                None => MapWarning { path: Some(format!("records[{}]", index)), ..w },
            }));
        }
        BatchOutput { tables, warnings }
    }

    pub fn map_record(&self, record: &Value, cache: &mut ExpressionCache) -> RecordOutcome {
        let mut warnings = Vec::new();

        // input fields under long and bare names
        let mut long_names = VarValues::new();
        let mut short_names = VarValues::new();
        if let Some(fields) = record.as_record() {
            for (name, value) in fields {
                long_names.insert(format!("input.{}.{}", self.input_name, name), value.clone());
                short_names.insert(name.clone(), value.clone());
            }
        }

        let input_values = {
            let carry = LayeredLookup::new().with_layer(&long_names).with_layer(&short_names);
            self.input_vars.evaluate(record, &carry, None, false, cache, &mut warnings)
        };
        let mut env = long_names;
        env.extend(input_values);

        let mut init_warnings = Vec::new();
        let upfront = self.global_cache.get_or_init(|| {
            self.global
                .evaluate_upfront(&VarValues::new(), &mut *cache, &mut init_warnings)
        });
        warnings.append(&mut init_warnings);
        let global_values = {
            let carry = LayeredLookup::new().with_layer(&env).with_layer(&short_names);
            self.global
                .evaluate(record, &carry, Some(upfront), true, cache, &mut warnings)
        };
        env.extend(global_values);

        let locals = self.table_vars(record, &mut env, &short_names, cache, &mut warnings);

        let mut outputs = Vec::new();
        for (table_index, table) in self.tables.iter().enumerate() {
            let scope = LayeredLookup::new()
                .with_layer(&locals[table_index])
                .with_layer(&env)
                .with_layer(&short_names);
            if let Some(built) = self.map_table(table, record, &scope, cache, &mut warnings) {
                outputs.push(MappedRecord {
                    table_index,
                    table_id: table.id.clone(),
                    table_name: table.name.clone(),
                    record: built,
                });
            }
        }
        RecordOutcome { outputs, warnings }
    }

    /// Evaluates every output table's variables. Outer names go into the
    /// shared environment; each table keeps its inner names to itself.
    fn table_vars(
        &self,
        record: &Value,
        env: &mut VarValues,
        short_names: &VarValues,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
    ) -> Vec<VarValues> {
        let passes = if self.second_pass { 2 } else { 1 };
        let mut locals = Vec::new();
        for pass in 0..passes {
            let mut pass_warnings = Vec::new();
            locals = Vec::with_capacity(self.tables.len());
            for table in &self.tables {
                let values = {
                    let carry = LayeredLookup::new().with_layer(&*env).with_layer(short_names);
                    table
                        .vars
                        .evaluate(record, &carry, None, true, cache, &mut pass_warnings)
                };
                let prefix = table.vars.table().scope.prefix();
                for (name, value) in &values {
                    if name.starts_with(&prefix) {
                        env.insert(name.clone(), value.clone());
                    }
                }
                locals.push(values);
            }
            if pass + 1 == passes {
                warnings.append(&mut pass_warnings);
            }
        }
        locals
    }

    fn map_table(
        &self,
        table: &CompiledTable,
        record: &Value,
        scope: &dyn VarLookup,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
    ) -> Option<Value> {
        let env = ResolvedEnvironment::new(record, scope);
        let filter_path = format!("outputs[{}].filter", table.name);

        match &table.filter {
            FilterPlan::Broken => {
                debug!(table = %table.name, "filter does not parse; record excluded");
                return None;
            }
            FilterPlan::BeforeBuild(filter) => {
                if !self.passes(filter, &env, cache, warnings, &filter_path) {
                    return None;
                }
            }
            FilterPlan::Always | FilterPlan::AfterBuild(_) => {}
        }

        let mut values = Vec::with_capacity(table.fields.len());
        for field in &table.fields {
            match resolve(&field.source, &env, cache) {
                Ok(value) => {
                    let value = match &field.default {
                        Some(default) if value.is_blank() => Value::String(default.clone()),
                        _ => value,
                    };
                    values.push((field.path.clone(), value));
                }
                Err(err) if err.kind == MapErrorKind::EmptyExpression => {
                    debug!(field = %field.location, "empty source; mapping skipped");
                }
                Err(err) => {
                    warn!(field = %field.location, error = %err, "field source failed");
                    warnings.push(MapWarning::from(err.with_path(field.location.clone())));
                }
            }
        }

        let outcome = RecordBuilder::new(&table.schema)
            .with_passthrough(record)
            .build(values);
        for mismatch in outcome.mismatches {
            warn!(table = %table.name, error = %mismatch, "value not applied");
            let path = format!(
                "outputs[{}].fields[{}]",
                table.name,
                mismatch.path.clone().unwrap_or_default()
            );
            warnings.push(MapWarning::from(mismatch.with_path(path)));
        }

        if let FilterPlan::AfterBuild(filter) = &table.filter {
            let mut output_names = VarValues::new();
            if let Some(fields) = outcome.record.as_record() {
                for (name, value) in fields {
                    output_names.insert(format!("output.{}.{}", table.name, name), value.clone());
                    output_names.insert(name.clone(), value.clone());
                }
            }
            let scoped = LayeredLookup::new().with_layer(&output_names).with_layer(scope);
            let env = ResolvedEnvironment::new(record, &scoped);
            if !self.passes(filter, &env, cache, warnings, &filter_path) {
                return None;
            }
        }
        Some(outcome.record)
    }

    fn passes(
        &self,
        filter: &str,
        env: &ResolvedEnvironment<'_>,
        cache: &mut ExpressionCache,
        warnings: &mut Vec<MapWarning>,
        path: &str,
    ) -> bool {
        match evaluate_filter(Some(filter), env, cache) {
            Ok(pass) => {
                if !pass {
                    debug!(filter = %path, "record excluded by filter");
                }
                pass
            }
            Err(err) => {
                warn!(filter = %path, error = %err, "filter failed; record excluded");
                warnings.push(MapWarning::from(err.with_path(path.to_string())));
                false
            }
        }
    }
}

fn global_var_names(table: &VariableTable) -> HashSet<String> {
    table
        .variables
        .iter()
        .flat_map(|var| [var.name.clone(), table.outer_name(var)])
        .collect()
}

/// A filter reads built output when it names `output.<table>.<field>`, or a
/// bare top-level output field that no variable shadows.
fn filter_reads_output(
    filter: &str,
    table_name: &str,
    schema: &RecordSchema,
    vars: &VariableTable,
    global_names: &HashSet<String>,
) -> bool {
    let CompiledSource::Expression(template) = compile_source(filter) else {
        return false;
    };
    let prefix = format!("output.{}.", table_name);
    let var_marker = format!("{}{}.", prefix, VAR_MARKER);
    template.variable_impact().iter().any(|name| {
        if let Some(field) = name.strip_prefix(&prefix) {
            return !name.starts_with(&var_marker) && schema.has_field(field);
        }
        schema.has_field(name) && vars.position(name).is_none() && !global_names.contains(name)
    })
}

/// True when an output variable reads another table's (or a later) variable
/// through its outer name before that variable has been evaluated.
fn needs_second_pass(tables: &[CompiledTable]) -> bool {
    let mut known: HashSet<String> = HashSet::new();
    let all: HashSet<String> = tables
        .iter()
        .flat_map(|table| {
            let vars = table.vars.table();
            vars.variables.iter().map(|var| vars.outer_name(var)).collect::<Vec<_>>()
        })
        .collect();

    for table in tables {
        let vars = table.vars.table();
        for var in &vars.variables {
            if let CompiledSource::Expression(template) = compile_source(&var.expression) {
                let forward = template
                    .variable_impact()
                    .iter()
                    .any(|name| all.contains(name) && !known.contains(name));
                if forward {
                    return true;
                }
            }
            known.insert(vars.outer_name(var));
        }
    }
    false
}

#[cfg(test)]
mod mapper_tests {
    use super::*;
    use crate::table::parse_mapper_config;
    use serde_json::json;

    fn mapper(yaml: &str) -> RecordMapper {
        RecordMapper::new(parse_mapper_config(yaml).expect("config")).expect("valid config")
    }

    #[test]
    fn test_record_mapper_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecordMapper>();
    }

    #[test]
    fn test_filter_plan_detection() {
        let m = mapper(
            r#"
outputs:
  - name: young
    filter: "${age:lt(30)}"
    schema:
      type: record
      name: young
      fields:
        - {name: age, type: int}
  - name: odd
    filter: "${input.main.id:mod(2):equals(1)}"
    schema:
      type: record
      name: odd
      fields:
        - {name: id, type: int}
"#,
        );
        assert!(matches!(m.tables[0].filter, FilterPlan::AfterBuild(_)));
        assert!(matches!(m.tables[1].filter, FilterPlan::BeforeBuild(_)));
    }

    #[test]
    fn test_forward_reference_between_tables() {
        let m = mapper(
            r#"
outputs:
  - name: a
    vars:
      - {name: fromB, exp: "${output.b._var_.x:append('!')}"}
    schema:
      type: record
      name: a
      fields:
        - {name: v, type: string}
    fields:
      - {path: /v, exp: "${fromB}"}
  - name: b
    vars:
      - {name: x, exp: "/name"}
    schema:
      type: record
      name: b
      fields:
        - {name: v, type: string}
    fields:
      - {path: /v, exp: "${x}"}
"#,
        );
        assert!(m.second_pass);
        let record = Value::from_json(json!({"name": "Ann"}));
        let outcome = m.map_record(&record, &mut ExpressionCache::new());
        assert_eq!(outcome.for_table("a").map(Value::to_json), Some(json!({"v": "Ann!"})));
        assert_eq!(outcome.for_table("b").map(Value::to_json), Some(json!({"v": "Ann"})));
    }

    #[test]
    fn test_inner_names_stay_inside_their_table() {
        let m = mapper(
            r#"
outputs:
  - name: a
    vars:
      - {name: secret, exp: "hidden"}
    schema:
      type: record
      name: a
      fields:
        - {name: v, type: string}
    fields:
      - {path: /v, exp: "${secret}"}
  - name: b
    schema:
      type: record
      name: b
      fields:
        - {name: v, type: string}
        - {name: w, type: string}
    fields:
      - {path: /v, exp: "[${secret}]"}
      - {path: /w, exp: "${output.a._var_.secret}"}
"#,
        );
        let outcome = m.map_record(&Value::from_json(json!({})), &mut ExpressionCache::new());
        assert_eq!(outcome.for_table("a").map(Value::to_json), Some(json!({"v": "hidden"})));
        assert_eq!(
            outcome.for_table("b").map(Value::to_json),
            Some(json!({"v": "[]", "w": "hidden"}))
        );
    }

    #[test]
    fn test_batch_counts_and_attributes() {
        let m = mapper(
            r#"
outputs:
  - id: t-1
    name: t
    filter: "${input.main.keep}"
    schema:
      type: record
      name: t
      fields:
        - {name: id, type: int}
"#,
        );
        let records: Vec<Value> = (0..4)
            .map(|i| Value::from_json(json!({"id": i, "keep": i % 2 == 0})))
            .collect();
        let batch = m.map_batch(&records);
        let table = batch.table("t").expect("table");
        assert_eq!(table.count, 2);
        assert_eq!(table.id, "t-1");
        assert_eq!(table.attributes().get(RECORD_COUNT_ATTRIBUTE).map(String::as_str), Some("2"));
        assert_eq!(table.records[1].get("id"), Some(&Value::from(2)));
    }
}
