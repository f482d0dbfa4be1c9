//! Builds an output record from a schema and a list of path-addressed values.
//!
//! The record starts as the schema's default shape (declared defaults, nested
//! records materialised, everything else null). Each value is then written at
//! its path, creating arrays and maps on the way and coercing to the declared
//! type. A value that cannot take the declared type leaves the field at its
//! default and is reported as a `TypeMismatch`.

use std::collections::HashSet;
use tracing::debug;

use crate::coerce::coerce_scalar;
use crate::error::{MapError, MapErrorKind};
use crate::path::{MAX_ARRAY_INDEX, PathExpression, PathSegment};
use crate::schema::{DataType, RecordSchema, SchemaField};
use crate::value::{Fields, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub record: Value,
    /// Mappings that could not be applied; the record is still complete.
    pub mismatches: Vec<MapError>,
}

pub struct RecordBuilder<'a> {
    schema: &'a RecordSchema,
    passthrough: Option<&'a Value>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(schema: &'a RecordSchema) -> Self {
        Self {
            schema,
            passthrough: None,
        }
    }

    /// Top-level schema fields nobody maps are copied from the same-named
    /// field of `source`.
    pub fn with_passthrough(mut self, source: &'a Value) -> Self {
        self.passthrough = Some(source);
        self
    }

    pub fn build(&self, values: Vec<(PathExpression, Value)>) -> BuildOutcome {
        let mut fields = default_fields(self.schema);
        let mut mismatches = Vec::new();
        let mut written: HashSet<PathExpression> = HashSet::new();
        let mut mapped_roots: HashSet<String> = HashSet::new();

        for (path, value) in values {
            if let Some(root) = path.root_field() {
                mapped_roots.insert(root.to_string());
            }
            if written.contains(&path) {
                debug!(path = %path, "destination already written; later mapping ignored");
                continue;
            }
            let target = path.to_string();
            let mut issues = Vec::new();
            if let Err(err) = write_field(&mut fields, self.schema, path.segments(), value, &target, &mut issues) {
                mismatches.push(err);
            }
            mismatches.append(&mut issues);
            written.insert(path);
        }

        if let Some(source) = self.passthrough {
            self.apply_passthrough(&mut fields, source, &mapped_roots, &mut mismatches);
        }

        BuildOutcome {
            record: Value::Record(fields),
            mismatches,
        }
    }

    fn apply_passthrough(
        &self,
        fields: &mut Fields,
        source: &Value,
        mapped_roots: &HashSet<String>,
        mismatches: &mut Vec<MapError>,
    ) {
        for field in &self.schema.fields {
            if mapped_roots.contains(&field.name) {
                continue;
            }
            let Some(incoming) = source.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let Some(slot) = fields.get_mut(&field.name) else {
                continue;
            };
            if slot.is_composite() {
                continue;
            }
            let target = format!("/{}", field.name);
            match shape(incoming.clone(), &field.data_type, &target, mismatches) {
                Ok(Value::Null) => {}
                Ok(value) => *slot = value,
                Err(err) => mismatches.push(err),
            }
        }
    }
}

pub fn default_record(schema: &RecordSchema) -> Value {
    Value::Record(default_fields(schema))
}

fn default_fields(schema: &RecordSchema) -> Fields {
    schema
        .fields
        .iter()
        .map(|field| (field.name.clone(), default_value(field)))
        .collect()
}

fn default_value(field: &SchemaField) -> Value {
    if let Some(default) = &field.default {
        return default.clone();
    }
    match &field.data_type {
        DataType::Record(schema) => default_record(schema),
        _ => Value::Null,
    }
}

fn mismatch(target: &str, message: impl Into<String>) -> MapError {
    MapError::new(MapErrorKind::TypeMismatch, message).with_path(target)
}

fn write_field(
    fields: &mut Fields,
    schema: &RecordSchema,
    segments: &[PathSegment],
    value: Value,
    target: &str,
    issues: &mut Vec<MapError>,
) -> Result<(), MapError> {
    let Some((PathSegment::Field(name), rest)) = segments.split_first() else {
        return Err(MapError::new(MapErrorKind::InvalidPath, format!("{} does not start with a field", target))
            .with_path(target));
    };
    let field = schema.field(name).ok_or_else(|| {
        MapError::new(
            MapErrorKind::InvalidPath,
            format!("field '{}' is not part of record '{}'; mapping dropped", name, schema.name),
        )
        .with_path(target)
    })?;
    let slot = fields
        .entry(name.clone())
        .or_insert_with(|| default_value(field));
    write_slot(slot, &field.data_type, rest, value, target, issues)
}

fn write_slot(
    slot: &mut Value,
    data_type: &DataType,
    rest: &[PathSegment],
    value: Value,
    target: &str,
    issues: &mut Vec<MapError>,
) -> Result<(), MapError> {
    match rest.first() {
        None => {
            if !value.is_null() {
                *slot = shape(value, data_type, target, issues)?;
            }
            Ok(())
        }
        Some(PathSegment::Field(name)) => {
            let schema = data_type.record_schema().ok_or_else(|| {
                mismatch(target, format!("cannot address '{}' inside {}", name, data_type.name()))
            })?;
            if !matches!(slot, Value::Record(_)) {
                *slot = default_record(schema);
            }
            match slot {
                Value::Record(fields) => write_field(fields, schema, rest, value, target, issues),
                _ => Ok(()),
            }
        }
        Some(PathSegment::Index(index)) => {
            let element = data_type.element_type().ok_or_else(|| {
                mismatch(target, format!("cannot index into {}", data_type.name()))
            })?;
            if !matches!(slot, Value::List(_)) {
                *slot = Value::List(Vec::new());
            }
            match slot {
                Value::List(items) => {
                    let len = index
                        .checked_add(1)
                        .filter(|len| *len <= MAX_ARRAY_INDEX + 1)
                        .ok_or_else(|| {
                            MapError::new(
                                MapErrorKind::InvalidPath,
                                format!("index {} exceeds the maximum of {}", index, MAX_ARRAY_INDEX),
                            )
                            .with_path(target)
                        })?;
                    if items.len() < len {
                        items.resize(len, Value::Null);
                    }
                    write_slot(&mut items[*index], element, &rest[1..], value, target, issues)
                }
                _ => Ok(()),
            }
        }
        Some(PathSegment::MapKey(key)) => {
            if let Some(value_type) = data_type.value_type() {
                if !matches!(slot, Value::Map(_)) {
                    *slot = Value::Map(Fields::new());
                }
                let value = if rest.len() == 1 && value.is_null() {
                    Value::from("")
                } else {
                    value
                };
                match slot {
                    Value::Map(entries) => {
                        let child = entries.entry(key.clone()).or_insert(Value::Null);
                        write_slot(child, value_type, &rest[1..], value, target, issues)
                    }
                    _ => Ok(()),
                }
            } else if let Some(schema) = data_type.record_schema() {
                if !matches!(slot, Value::Record(_)) {
                    *slot = default_record(schema);
                }
                let mut segments = vec![PathSegment::Field(key.clone())];
                segments.extend_from_slice(&rest[1..]);
                match slot {
                    Value::Record(fields) => write_field(fields, schema, &segments, value, target, issues),
                    _ => Ok(()),
                }
            } else {
                Err(mismatch(target, format!("cannot use key '{}' on {}", key, data_type.name())))
            }
        }
    }
}

/// Fits a resolved value to a destination type.
///
/// Nested problems inside an otherwise usable composite go to `issues` and
/// leave that nested slot null; an unusable value is an error.
fn shape(value: Value, data_type: &DataType, target: &str, issues: &mut Vec<MapError>) -> Result<Value, MapError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::Choice(types) => {
            for branch in types.iter().filter(|t| !matches!(t, DataType::Null)) {
                let mut branch_issues = Vec::new();
                if let Ok(shaped) = shape(value.clone(), branch, target, &mut branch_issues) {
                    issues.append(&mut branch_issues);
                    return Ok(shaped);
                }
            }
            Err(mismatch(
                target,
                format!("{} value '{}' fits no branch of {}", value.kind().as_str(), value, data_type.name()),
            ))
        }
        DataType::Record(schema) => match value {
            Value::Record(source) | Value::Map(source) => {
                let mut fields = Fields::with_capacity(schema.fields.len());
                for field in &schema.fields {
                    let nested_target = format!("{}/{}", target, field.name);
                    let shaped = match source.get(&field.name) {
                        Some(inner) => match shape(inner.clone(), &field.data_type, &nested_target, issues) {
                            Ok(v) => v,
                            Err(err) => {
                                issues.push(err);
                                Value::Null
                            }
                        },
                        None => default_value(field),
                    };
                    fields.insert(field.name.clone(), shaped);
                }
                Ok(Value::Record(fields))
            }
            Value::List(_) => Err(mismatch(
                target,
                format!("cannot assign array to record '{}'", schema.name),
            )),
            scalar => {
                let mut fields = default_fields(schema);
                for field in schema.fields.iter().filter(|f| f.data_type.is_scalar()) {
                    if let Ok(coerced) = coerce_scalar(&scalar, &field.data_type) {
                        fields.insert(field.name.clone(), coerced);
                        return Ok(Value::Record(fields));
                    }
                }
                Err(mismatch(
                    target,
                    format!("record '{}' has no field that accepts '{}'", schema.name, scalar),
                ))
            }
        },
        DataType::Array(element) => match value {
            Value::List(items) => {
                let shaped = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        shape(item, element, &format!("{}[{}]", target, i), issues).unwrap_or_else(|err| {
                            issues.push(err);
                            Value::Null
                        })
                    })
                    .collect();
                Ok(Value::List(shaped))
            }
            Value::Record(_) | Value::Map(_) => Err(mismatch(
                target,
                format!("cannot assign {} to {}", value.kind().as_str(), data_type.name()),
            )),
            scalar if element.is_scalar() => coerce_scalar(&scalar, element)
                .map(|v| Value::List(vec![v]))
                .map_err(|err| mismatch(target, err.message)),
            scalar => Err(mismatch(
                target,
                format!("cannot assign '{}' to {}", scalar, data_type.name()),
            )),
        },
        DataType::Map(values) => match value {
            Value::Record(source) | Value::Map(source) => {
                let mut entries = Fields::with_capacity(source.len());
                for (key, inner) in source {
                    let nested_target = format!("{}['{}']", target, key);
                    let shaped = shape(inner, values, &nested_target, issues).unwrap_or_else(|err| {
                        issues.push(err);
                        Value::Null
                    });
                    entries.insert(key, shaped);
                }
                Ok(Value::Map(entries))
            }
            other => Err(mismatch(
                target,
                format!("cannot assign {} to {}", other.kind().as_str(), data_type.name()),
            )),
        },
        scalar_type => coerce_scalar(&value, scalar_type).map_err(|err| mismatch(target, err.message)),
    }
}
