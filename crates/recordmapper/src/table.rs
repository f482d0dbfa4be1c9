//! Mapper configuration: the input table, global variables and output tables.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ExpressionCache;
use crate::error::{MapError, MapErrorKind};
use crate::path::PathExpression;
use crate::resolver::{ResolvedEnvironment, resolve};
use crate::schema::RecordSchema;
use crate::variables::{VarScope, Variable, VariableTable};

pub const DEFAULT_INPUT_NAME: &str = "main";

fn default_input_name() -> String {
    DEFAULT_INPUT_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MapperConfig {
    #[serde(default)]
    pub global_vars: Vec<Variable>,
    #[serde(default)]
    pub input: InputTableSpec,
    pub outputs: Vec<OutputTableSpec>,
}

impl MapperConfig {
    pub fn global_table(&self) -> VariableTable {
        VariableTable::new(VarScope::Global, self.global_vars.clone())
    }

    pub fn output(&self, name: &str) -> Option<&OutputTableSpec> {
        self.outputs.iter().find(|table| table.name == name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut OutputTableSpec> {
        self.outputs.iter_mut().find(|table| table.name == name)
    }
}

/// Parses a configuration written in YAML (or JSON, which YAML accepts).
pub fn parse_mapper_config(text: &str) -> Result<MapperConfig, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputTableSpec {
    #[serde(default = "default_input_name")]
    pub name: String,
    /// Shape of incoming records; used when reading input files.
    #[serde(default)]
    pub schema: Option<RecordSchema>,
    #[serde(default)]
    pub vars: Vec<Variable>,
}

impl Default for InputTableSpec {
    fn default() -> Self {
        Self {
            name: default_input_name(),
            schema: None,
            vars: Vec::new(),
        }
    }
}

impl InputTableSpec {
    pub fn var_table(&self) -> VariableTable {
        VariableTable::new(VarScope::Input(self.name.clone()), self.vars.clone())
    }

    /// Name under which top-level input fields are visible, e.g. `input.main.id`.
    pub fn field_name(&self, field: &str) -> String {
        format!("input.{}.{}", self.name, field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub path: String,
    #[serde(alias = "exp", default)]
    pub source: String,
    /// Used when the source resolves to a blank value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl FieldMapping {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputTableSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub schema: RecordSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_desc: Option<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl OutputTableSpec {
    pub fn new(name: impl Into<String>, schema: RecordSchema) -> Self {
        Self {
            id: None,
            name: name.into(),
            desc: None,
            schema,
            filter: None,
            filter_desc: None,
            vars: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Stable identifier; falls back to the table name.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn var_table(&self) -> VariableTable {
        VariableTable::new(VarScope::Output(self.name.clone()), self.vars.clone())
    }

    /// Name under which a built output field is visible to filters, e.g. `output.people.age`.
    pub fn field_name(&self, field: &str) -> String {
        format!("output.{}.{}", self.name, field)
    }

    fn position(&self, path: &str) -> Option<usize> {
        let wanted = PathExpression::parse(path).ok();
        self.fields.iter().position(|field| match &wanted {
            Some(wanted) => PathExpression::parse(&field.path).ok().as_ref() == Some(wanted),
            None => field.path == path,
        })
    }

    /// Adds a mapping, replacing any mapping with the same destination.
    pub fn add_field(&mut self, mapping: FieldMapping) {
        match self.position(&mapping.path) {
            Some(index) => self.fields[index] = mapping,
            None => self.fields.push(mapping),
        }
    }

    pub fn remove_field(&mut self, path: &str) -> Option<FieldMapping> {
        self.position(path).map(|index| self.fields.remove(index))
    }

    /// Points an existing mapping at a new destination. Returns false when
    /// no mapping targets `from`.
    pub fn rename_destination(&mut self, from: &str, to: &str) -> bool {
        match self.position(from) {
            Some(index) => {
                self.fields[index].path = to.to_string();
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Evaluates a table filter. No filter, or a blank one, accepts everything;
/// otherwise the result must read `true` (any case).
pub fn evaluate_filter(
    filter: Option<&str>,
    env: &ResolvedEnvironment<'_>,
    cache: &mut ExpressionCache,
) -> Result<bool, MapError> {
    let Some(filter) = filter.filter(|f| !f.trim().is_empty()) else {
        return Ok(true);
    };
    let value = resolve(filter, env, cache).map_err(|err| {
        MapError::new(MapErrorKind::FilterFailure, format!("filter '{}' failed: {}", filter, err.message))
    })?;
    Ok(value.to_text().trim().eq_ignore_ascii_case("true"))
}

/// Fail-closed wrapper over [`evaluate_filter`]: failures exclude the record
/// and are logged.
pub fn should_emit(filter: Option<&str>, env: &ResolvedEnvironment<'_>, cache: &mut ExpressionCache) -> bool {
    match evaluate_filter(filter, env, cache) {
        Ok(pass) => {
            if !pass {
                debug!(filter = filter.unwrap_or_default(), "record excluded by filter");
            }
            pass
        }
        Err(err) => {
            warn!(error = %err, "filter evaluation failed; record excluded");
            false
        }
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;
    use crate::value::Value;
    use indexmap::IndexMap;

    const CONFIG: &str = r#"
global_vars:
  - name: suffix
    exp: "_g"
input:
  name: main
  vars:
    - name: last
      expression: "substringAfter(/name, ' ')"
outputs:
  - id: out-1
    name: people
    filter: "${input.main.id:mod(2):equals(1)}"
    schema:
      type: record
      name: people
      fields:
        - name: id
          type: int
        - name: last
          type: string
    fields:
      - path: /last
        exp: "${input.main._var_.last}"
        default: "-"
"#;

    #[test]
    fn test_parse_yaml_config() {
        let config = parse_mapper_config(CONFIG).expect("config");
        assert_eq!(config.global_vars[0], Variable::new("suffix", "_g"));
        assert_eq!(config.input.name, "main");
        assert_eq!(config.input.vars[0].expression, "substringAfter(/name, ' ')");
        let people = config.output("people").expect("people");
        assert_eq!(people.id(), "out-1");
        assert_eq!(people.fields[0].default.as_deref(), Some("-"));
        assert_eq!(people.var_table().scope, VarScope::Output("people".into()));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = parse_mapper_config("outputs: []\nextra: 1\n").unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_input_defaults_to_main() {
        let config = parse_mapper_config("outputs: []").expect("config");
        assert_eq!(config.input.name, DEFAULT_INPUT_NAME);
        assert_eq!(config.input.field_name("id"), "input.main.id");
    }

    #[test]
    fn test_field_mutations() {
        let mut config = parse_mapper_config(CONFIG).expect("config");
        let people = config.output_mut("people").expect("people");

        people.add_field(FieldMapping::new("/id", "/id"));
        people.add_field(FieldMapping::new("last", "/surname"));
        assert_eq!(people.fields.len(), 2);
        assert_eq!(people.fields[0].source, "/surname");

        assert!(people.rename_destination("/id", "/ident"));
        assert!(!people.rename_destination("/missing", "/x"));
        assert_eq!(people.fields[1].path, "/ident");

        let removed = people.remove_field("/ident").expect("removed");
        assert_eq!(removed.source, "/id");
        assert_eq!(people.fields.len(), 1);
    }

    #[test]
    fn test_filter_outcomes() {
        let record = Value::Null;
        let mut vars = IndexMap::new();
        vars.insert("input.main.id".to_string(), Value::from(3));
        vars.insert("n".to_string(), Value::from("abc"));
        let env = ResolvedEnvironment::new(&record, &vars);
        let mut cache = ExpressionCache::new();

        assert!(should_emit(None, &env, &mut cache));
        assert!(should_emit(Some("  "), &env, &mut cache));
        assert!(should_emit(Some("TRUE"), &env, &mut cache));
        assert!(should_emit(Some("${input.main.id:mod(2):equals(1)}"), &env, &mut cache));
        assert!(!should_emit(Some("${input.main.id:gt(5)}"), &env, &mut cache));
        assert!(!should_emit(Some("yes"), &env, &mut cache));

        let err = evaluate_filter(Some("${n:gt(1)}"), &env, &mut cache).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::FilterFailure);
        assert!(!should_emit(Some("${n:gt(1)}"), &env, &mut cache));
    }
}
