//! Reading source records from JSON, NDJSON and CSV text.

use csv::ReaderBuilder;
use serde_json::Value as JsonValue;

use crate::coerce::coerce_scalar;
use crate::error::{MapError, MapErrorKind};
use crate::schema::{DataType, RecordSchema};
use crate::value::{Fields, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub has_header: bool,
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
        }
    }
}

/// Reads a JSON array of objects, a single object, or one object per line.
pub fn read_json_records(text: &str, schema: Option<&RecordSchema>) -> Result<Vec<Value>, MapError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let documents: Vec<JsonValue> = match serde_json::from_str::<JsonValue>(trimmed) {
        Ok(JsonValue::Array(items)) => items,
        Ok(single) => vec![single],
        Err(_) => trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|err| MapError::from(err).with_path(format!("line {}", i + 1)))
            })
            .collect::<Result<_, _>>()?,
    };

    documents
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            let path = format!("records[{}]", i);
            if !doc.is_object() {
                return Err(MapError::new(MapErrorKind::InvalidInput, "record is not a JSON object").with_path(path));
            }
            match schema {
                Some(schema) => conform_record(doc, schema, &path),
                None => Ok(Value::from_json(doc)),
            }
        })
        .collect()
}

/// Reads CSV rows. Without a header row, columns are named after the schema
/// fields in order.
pub fn read_csv_records(
    text: &str,
    schema: Option<&RecordSchema>,
    options: &CsvOptions,
) -> Result<Vec<Value>, MapError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(options.has_header)
        .delimiter(options.delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = if options.has_header {
        reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
    } else {
        schema
            .map(|s| s.field_names().map(str::to_string).collect())
            .unwrap_or_default()
    };

    let mut records = Vec::new();
    for (row_index, row) in reader.records().enumerate() {
        let row = row?;
        let mut fields = Fields::with_capacity(row.len());
        for (col, cell) in row.iter().enumerate() {
            let name = headers
                .get(col)
                .cloned()
                .unwrap_or_else(|| format!("column_{}", col + 1));
            let raw = Value::String(cell.to_string());
            let value = match schema.and_then(|s| s.field(&name)) {
                Some(field) if field.data_type.is_scalar() => coerce_scalar(&raw, &field.data_type).map_err(|err| {
                    MapError::new(MapErrorKind::InvalidInput, err.message)
                        .with_path(format!("records[{}].{}", row_index, name))
                })?,
                _ => raw,
            };
            fields.insert(name, value);
        }
        records.push(Value::Record(fields));
    }
    Ok(records)
}

fn conform_record(doc: JsonValue, schema: &RecordSchema, path: &str) -> Result<Value, MapError> {
    let JsonValue::Object(map) = doc else {
        return Err(MapError::new(MapErrorKind::InvalidInput, format!("expected record '{}'", schema.name))
            .with_path(path));
    };
    let mut fields = Fields::with_capacity(map.len());
    for (key, value) in map {
        let field_path = format!("{}.{}", path, key);
        let conformed = match schema.field(&key) {
            Some(field) => conform(value, &field.data_type, &field_path)?,
            None => Value::from_json(value),
        };
        fields.insert(key, conformed);
    }
    Ok(Value::Record(fields))
}

fn conform(doc: JsonValue, data_type: &DataType, path: &str) -> Result<Value, MapError> {
    if doc.is_null() {
        return Ok(Value::Null);
    }
    match (data_type, doc) {
        (DataType::Record(schema), doc @ JsonValue::Object(_)) => conform_record(doc, schema, path),
        (DataType::Map(values), JsonValue::Object(map)) => {
            let mut entries = Fields::with_capacity(map.len());
            for (key, value) in map {
                let entry_path = format!("{}['{}']", path, key);
                entries.insert(key, conform(value, values, &entry_path)?);
            }
            Ok(Value::Map(entries))
        }
        (DataType::Array(element), JsonValue::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| conform(item, element, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (DataType::Choice(types), doc) => {
            let composite = doc.is_object() || doc.is_array();
            let branch = types.iter().find(|t| match (&doc, t) {
                (JsonValue::Object(_), DataType::Record(_) | DataType::Map(_)) => true,
                (JsonValue::Array(_), DataType::Array(_)) => true,
                _ => false,
            });
            match branch {
                Some(branch) => conform(doc, branch, path),
                None if composite => Ok(Value::from_json(doc)),
                None => scalar(Value::from_json(doc), data_type, path),
            }
        }
        (data_type, doc) if data_type.is_scalar() && !doc.is_object() && !doc.is_array() => {
            scalar(Value::from_json(doc), data_type, path)
        }
        (data_type, doc) => Err(MapError::new(
            MapErrorKind::InvalidInput,
            format!("expected {}, got {}", data_type.name(), doc),
        )
        .with_path(path)),
    }
}

fn scalar(value: Value, data_type: &DataType, path: &str) -> Result<Value, MapError> {
    coerce_scalar(&value, data_type)
        .map_err(|err| MapError::new(MapErrorKind::InvalidInput, err.message).with_path(path))
}

#[cfg(test)]
mod input_tests {
    use super::*;
    use serde_json::json;

    fn schema() -> RecordSchema {
        RecordSchema::from_json(&json!({
            "type": "record",
            "name": "staff",
            "fields": [
                {"name": "id", "type": "int"},
                {"name": "active", "type": "boolean"},
                {"name": "attrs", "type": {"type": "map", "values": "string"}},
                {"name": "scores", "type": {"type": "array", "items": "double"}}
            ]
        }))
        .expect("schema")
    }

    #[test]
    fn test_json_array_and_single_object() {
        let many = read_json_records(r#"[{"id": 1}, {"id": 2}]"#, None).unwrap();
        assert_eq!(many.len(), 2);
        let one = read_json_records(r#"{"id": 1}"#, None).unwrap();
        assert_eq!(one.len(), 1);
        assert!(read_json_records("  ", None).unwrap().is_empty());
    }

    #[test]
    fn test_ndjson_lines() {
        let text = "{\"id\": 1}\n\n{\"id\": 2}\n";
        let records = read_json_records(text, None).unwrap();
        assert_eq!(records[1].get("id"), Some(&Value::from(2)));
    }

    #[test]
    fn test_json_conforms_to_schema() {
        let schema = schema();
        let records = read_json_records(
            r#"[{"id": "7", "active": "true", "attrs": {"k": "v"}, "scores": [1, 2.5], "extra": {"a": 1}}]"#,
            Some(&schema),
        )
        .unwrap();
        let record = &records[0];
        assert_eq!(record.get("id"), Some(&Value::from(7)));
        assert_eq!(record.get("active"), Some(&Value::Bool(true)));
        assert!(matches!(record.get("attrs"), Some(Value::Map(_))));
        assert!(matches!(record.get("extra"), Some(Value::Record(_))));
    }

    #[test]
    fn test_json_type_errors_are_invalid_input() {
        let schema = schema();
        let err = read_json_records(r#"[{"id": "seven"}]"#, Some(&schema)).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::InvalidInput);
        assert_eq!(err.path.as_deref(), Some("records[0].id"));

        let not_object = read_json_records("[1, 2]", None).unwrap_err();
        assert_eq!(not_object.kind, MapErrorKind::InvalidInput);
    }

    #[test]
    fn test_csv_with_header_and_schema() {
        let schema = schema();
        let text = "id,active,name\n1,true,Ann\n2,,Bob\n";
        let records = read_csv_records(text, Some(&schema), &CsvOptions::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id"), Some(&Value::from(1)));
        assert_eq!(records[1].get("active"), Some(&Value::Null));
        assert_eq!(records[1].get("name"), Some(&Value::from("Bob")));
    }

    #[test]
    fn test_csv_without_header_uses_schema_order() {
        let schema = schema();
        let options = CsvOptions {
            has_header: false,
            delimiter: b';',
        };
        let records = read_csv_records("3;false", Some(&schema), &options).unwrap();
        assert_eq!(records[0].get("id"), Some(&Value::from(3)));
        assert_eq!(records[0].get("active"), Some(&Value::Bool(false)));
    }
}
