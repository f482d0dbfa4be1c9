use std::collections::HashSet;

use crate::cache::{CompiledSource, compile_source};
use crate::error::{ConfigError, ErrorCode, ValidationResult};
use crate::path::{PathExpression, PathSegment};
use crate::schema::{DataType, RecordSchema};
use crate::table::MapperConfig;
use crate::variables::Variable;

/// Where a variable list lives in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum VarSite {
    Global,
    Input,
    Output(usize),
}

/// Validation findings plus the items that must be skipped at run time.
#[derive(Debug, Default)]
pub(crate) struct ConfigReport {
    pub errors: Vec<ConfigError>,
    pub disabled_fields: HashSet<(usize, usize)>,
    pub disabled_vars: HashSet<(VarSite, usize)>,
    pub broken_filters: HashSet<usize>,
}

pub fn validate_config(config: &MapperConfig) -> ValidationResult {
    let report = check_config(config);
    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(report.errors)
    }
}

pub(crate) fn check_config(config: &MapperConfig) -> ConfigReport {
    let mut ctx = ValidationCtx::default();

    ctx.check_vars(&config.global_vars, VarSite::Global, "global_vars");
    ctx.check_vars(&config.input.vars, VarSite::Input, "input.vars");

    let mut names = HashSet::new();
    for (table_index, table) in config.outputs.iter().enumerate() {
        let base = format!("outputs[{}]", table_index);
        if table.name.trim().is_empty() {
            ctx.push(ErrorCode::MissingName, "output table name is empty", format!("{}.name", base));
        } else if !names.insert(table.name.as_str()) {
            ctx.push(
                ErrorCode::DuplicateOutput,
                format!("output table '{}' is declared more than once", table.name),
                format!("{}.name", base),
            );
        }

        ctx.check_vars(&table.vars, VarSite::Output(table_index), &format!("{}.vars", base));

        if let Some(filter) = &table.filter {
            if let CompiledSource::Invalid(message) = compile_source(filter) {
                ctx.push(
                    ErrorCode::InvalidFilter,
                    format!("filter does not parse: {}", message),
                    format!("{}.filter", base),
                );
                ctx.report.broken_filters.insert(table_index);
            }
        }

        for (field_index, field) in table.fields.iter().enumerate() {
            let field_path = format!("{}.fields[{}]", base, field_index);
            let target = match PathExpression::parse(&field.path) {
                Ok(path) => check_target(&table.schema, &path),
                Err(err) => Err((ErrorCode::InvalidPath, format!("invalid path '{}': {}", field.path, err))),
            };
            let source = match compile_source(&field.source) {
                CompiledSource::Invalid(message) => Err((
                    ErrorCode::InvalidExpression,
                    format!("source '{}' does not parse: {}", field.source, message),
                )),
                _ => Ok(()),
            };
            for (code, message) in [target, source].into_iter().filter_map(Result::err) {
                ctx.push(code, message, field_path.clone());
                ctx.report.disabled_fields.insert((table_index, field_index));
            }
        }
    }

    ctx.finish()
}

/// Walks the destination schema along `path`.
fn check_target(schema: &RecordSchema, path: &PathExpression) -> Result<(), (ErrorCode, String)> {
    let mut current: Option<&DataType> = None;
    for segment in path.segments() {
        let next = match segment {
            PathSegment::Field(name) => {
                let record = match current {
                    None => schema,
                    Some(data_type) => data_type.record_schema().ok_or_else(|| {
                        (
                            ErrorCode::InvalidTarget,
                            format!("'{}' in {} is not inside a record", name, path),
                        )
                    })?,
                };
                let field = record.field(name).ok_or_else(|| {
                    (
                        ErrorCode::UnknownTarget,
                        format!("field '{}' of {} is not in record '{}'", name, path, record.name),
                    )
                })?;
                &field.data_type
            }
            PathSegment::Index(index) => current
                .and_then(DataType::element_type)
                .ok_or_else(|| {
                    (
                        ErrorCode::InvalidTarget,
                        format!("index [{}] in {} does not address an array", index, path),
                    )
                })?,
            PathSegment::MapKey(key) => {
                let data_type = current.ok_or_else(|| {
                    (ErrorCode::InvalidTarget, format!("key '{}' in {} has no map", key, path))
                })?;
                match data_type.value_type() {
                    Some(values) => values,
                    None => data_type
                        .record_schema()
                        .and_then(|record| record.field(key))
                        .map(|field| &field.data_type)
                        .ok_or_else(|| {
                            (
                                ErrorCode::InvalidTarget,
                                format!("key '{}' in {} does not address a map", key, path),
                            )
                        })?,
                }
            }
        };
        current = Some(next);
    }
    Ok(())
}

#[derive(Default)]
struct ValidationCtx {
    report: ConfigReport,
}

impl ValidationCtx {
    fn push(&mut self, code: ErrorCode, message: impl Into<String>, path: impl Into<String>) {
        self.report
            .errors
            .push(ConfigError::new(code, message).with_path(path));
    }

    fn check_vars(&mut self, vars: &[Variable], site: VarSite, base: &str) {
        let mut seen = HashSet::new();
        for (index, var) in vars.iter().enumerate() {
            let path = format!("{}[{}]", base, index);
            if var.name.trim().is_empty() {
                self.push(ErrorCode::InvalidVariable, "variable name is empty", path);
                self.report.disabled_vars.insert((site, index));
                continue;
            }
            if !seen.insert(var.name.as_str()) {
                self.push(
                    ErrorCode::DuplicateVariable,
                    format!("variable '{}' is declared more than once; the last declaration wins", var.name),
                    path.clone(),
                );
            }
            match compile_source(&var.expression) {
                CompiledSource::Invalid(message) => {
                    self.push(
                        ErrorCode::InvalidExpression,
                        format!("variable '{}' does not parse: {}", var.name, message),
                        path,
                    );
                    self.report.disabled_vars.insert((site, index));
                }
                CompiledSource::RecordPath(_) if site == VarSite::Global => {
                    self.push(
                        ErrorCode::GlobalRecordPath,
                        format!(
                            "global variable '{}' uses a record path; global variables cannot read records",
                            var.name
                        ),
                        path,
                    );
                }
                _ => {}
            }
        }
    }

    fn finish(self) -> ConfigReport {
        self.report
    }
}

#[cfg(test)]
mod validator_tests {
    use super::*;
    use crate::table::parse_mapper_config;

    fn codes(yaml: &str) -> Vec<ErrorCode> {
        let config = parse_mapper_config(yaml).expect("config");
        match validate_config(&config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.into_iter().map(|e| e.code).collect(),
        }
    }

    const SCHEMA: &str = r#"
    schema:
      type: record
      name: t
      fields:
        - name: id
          type: int
        - name: tags
          type: {type: array, items: string}
        - name: attrs
          type: {type: map, values: string}
        - name: name
          type:
            type: record
            name: nameRecord
            fields:
              - name: first
                type: string
"#;

    fn with_fields(fields: &str) -> String {
        format!("outputs:\n  - name: t\n{}    fields:\n{}", SCHEMA, fields)
    }

    #[test]
    fn test_valid_config_passes() {
        let yaml = with_fields(
            "      - path: /id\n        exp: /id\n      - path: /tags[2]\n        exp: x\n      - path: \"/attrs['k']\"\n        exp: y\n      - path: /name/first\n        exp: \"${first}\"\n",
        );
        assert_eq!(codes(&yaml), Vec::<ErrorCode>::new());
    }

    #[test]
    fn test_bad_paths_and_targets() {
        let yaml = with_fields(
            "      - path: /a//b\n        exp: x\n      - path: /city\n        exp: x\n      - path: /id[0]\n        exp: x\n      - path: /name/first/x\n        exp: x\n",
        );
        assert_eq!(
            codes(&yaml),
            vec![
                ErrorCode::InvalidPath,
                ErrorCode::UnknownTarget,
                ErrorCode::InvalidTarget,
                ErrorCode::InvalidTarget
            ]
        );
    }

    #[test]
    fn test_disabled_items_are_tracked() {
        let yaml = with_fields("      - path: /id\n        exp: \"${id:nope()}\"\n      - path: /id\n        exp: /id\n");
        let config = parse_mapper_config(&yaml).expect("config");
        let report = check_config(&config);
        assert_eq!(report.errors[0].code, ErrorCode::InvalidExpression);
        assert_eq!(report.errors[0].path.as_deref(), Some("outputs[0].fields[0]"));
        assert!(report.disabled_fields.contains(&(0, 0)));
        assert!(!report.disabled_fields.contains(&(0, 1)));
    }

    #[test]
    fn test_variable_problems() {
        let yaml = r#"
global_vars:
  - name: a
    exp: "1"
  - name: a
    exp: "2"
  - name: rp
    exp: /name
  - name: ""
    exp: x
input:
  vars:
    - name: bad
      exp: "${x:append()}"
outputs: []
"#;
        assert_eq!(
            codes(yaml),
            vec![
                ErrorCode::DuplicateVariable,
                ErrorCode::GlobalRecordPath,
                ErrorCode::InvalidVariable,
                ErrorCode::InvalidExpression
            ]
        );
    }

    #[test]
    fn test_output_names_and_filters() {
        let yaml = format!(
            "outputs:\n  - name: t\n    filter: \"${{id:gt(}}\"\n{}  - name: t\n{}  - name: \"\"\n{}",
            SCHEMA, SCHEMA, SCHEMA
        );
        let config = parse_mapper_config(&yaml).expect("config");
        let report = check_config(&config);
        let codes: Vec<ErrorCode> = report.errors.iter().map(|e| e.code.clone()).collect();
        assert_eq!(
            codes,
            vec![ErrorCode::InvalidFilter, ErrorCode::DuplicateOutput, ErrorCode::MissingName]
        );
        assert!(report.broken_filters.contains(&0));
    }
}
