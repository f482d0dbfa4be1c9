//! Output record schemas.
//!
//! Schemas are written in the Avro JSON shape (`{"type": "record", "fields": [...]}`),
//! either as JSON or as the equivalent YAML mapping inside a mapper configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;

use crate::coerce::{CoerceError, coerce_scalar};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid schema: {}", self.message)
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Null,
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Bytes,
    Record(Box<RecordSchema>),
    Array(Box<DataType>),
    Map(Box<DataType>),
    /// A union; the first branch that accepts a value wins.
    Choice(Vec<DataType>),
}

impl DataType {
    pub fn name(&self) -> String {
        match self {
            DataType::Null => "null".to_string(),
            DataType::String => "string".to_string(),
            DataType::Int => "int".to_string(),
            DataType::Long => "long".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Double => "double".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Bytes => "bytes".to_string(),
            DataType::Record(schema) => format!("record<{}>", schema.name),
            DataType::Array(items) => format!("array<{}>", items.name()),
            DataType::Map(values) => format!("map<{}>", values.name()),
            DataType::Choice(types) => {
                let names: Vec<String> = types.iter().map(DataType::name).collect();
                format!("choice<{}>", names.join("|"))
            }
        }
    }

    pub fn is_scalar(&self) -> bool {
        match self {
            DataType::Record(_) | DataType::Array(_) | DataType::Map(_) => false,
            DataType::Choice(types) => types.iter().all(DataType::is_scalar),
            _ => true,
        }
    }

    /// Record schema of this type, looking through unions.
    pub fn record_schema(&self) -> Option<&RecordSchema> {
        match self {
            DataType::Record(schema) => Some(schema),
            DataType::Choice(types) => types.iter().find_map(DataType::record_schema),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            DataType::Array(items) => Some(items),
            DataType::Choice(types) => types.iter().find_map(DataType::element_type),
            _ => None,
        }
    }

    pub fn value_type(&self) -> Option<&DataType> {
        match self {
            DataType::Map(values) => Some(values),
            DataType::Choice(types) => types.iter().find_map(DataType::value_type),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            DataType::Record(schema) => schema.to_json(),
            DataType::Array(items) => json!({"type": "array", "items": items.to_json()}),
            DataType::Map(values) => json!({"type": "map", "values": values.to_json()}),
            DataType::Choice(types) => JsonValue::Array(types.iter().map(DataType::to_json).collect()),
            primitive => JsonValue::String(primitive.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub data_type: DataType,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn from_json(json: &JsonValue) -> Result<Self, SchemaError> {
        let mut named = HashMap::new();
        match parse_type(json, &mut named)? {
            DataType::Record(schema) => Ok(*schema),
            other => Err(SchemaError::new(format!(
                "top-level schema must be a record, got {}",
                other.name()
            ))),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let json: JsonValue =
            serde_json::from_str(text).map_err(|err| SchemaError::new(err.to_string()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> JsonValue {
        let fields: Vec<JsonValue> = self
            .fields
            .iter()
            .map(|field| {
                let mut obj = JsonMap::new();
                obj.insert("name".to_string(), JsonValue::String(field.name.clone()));
                obj.insert("type".to_string(), field.data_type.to_json());
                if let Some(default) = &field.default {
                    obj.insert("default".to_string(), default.to_json());
                }
                JsonValue::Object(obj)
            })
            .collect();
        json!({"type": "record", "name": self.name, "fields": fields})
    }
}

impl TryFrom<JsonValue> for RecordSchema {
    type Error = SchemaError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        RecordSchema::from_json(&value)
    }
}

impl From<RecordSchema> for JsonValue {
    fn from(schema: RecordSchema) -> Self {
        schema.to_json()
    }
}

// =============================================================================
// Type parsing
// =============================================================================

fn primitive(name: &str) -> Option<DataType> {
    let data_type = match name {
        "null" => DataType::Null,
        "string" | "enum" => DataType::String,
        "int" => DataType::Int,
        "long" => DataType::Long,
        "float" => DataType::Float,
        "double" => DataType::Double,
        "boolean" => DataType::Boolean,
        "bytes" | "fixed" => DataType::Bytes,
        _ => return None,
    };
    Some(data_type)
}

fn parse_type(json: &JsonValue, named: &mut HashMap<String, DataType>) -> Result<DataType, SchemaError> {
    match json {
        JsonValue::String(name) => primitive(name)
            .or_else(|| named.get(name).cloned())
            .ok_or_else(|| SchemaError::new(format!("unknown type '{}'", name))),
        JsonValue::Array(branches) => {
            if branches.is_empty() {
                return Err(SchemaError::new("union must have at least one branch"));
            }
            let types = branches
                .iter()
                .map(|branch| parse_type(branch, named))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DataType::Choice(types))
        }
        JsonValue::Object(obj) => {
            let type_name = obj
                .get("type")
                .ok_or_else(|| SchemaError::new("type object is missing 'type'"))?;
            match type_name.as_str() {
                Some("record") => parse_record(obj, named),
                Some("array") => {
                    let items = obj
                        .get("items")
                        .ok_or_else(|| SchemaError::new("array type is missing 'items'"))?;
                    Ok(DataType::Array(Box::new(parse_type(items, named)?)))
                }
                Some("map") => {
                    let values = obj
                        .get("values")
                        .ok_or_else(|| SchemaError::new("map type is missing 'values'"))?;
                    Ok(DataType::Map(Box::new(parse_type(values, named)?)))
                }
                // logical types and nested type declarations
                _ => parse_type(type_name, named),
            }
        }
        other => Err(SchemaError::new(format!("unsupported type declaration {}", other))),
    }
}

fn parse_record(
    obj: &JsonMap<String, JsonValue>,
    named: &mut HashMap<String, DataType>,
) -> Result<DataType, SchemaError> {
    let name = obj
        .get("name")
        .and_then(JsonValue::as_str)
        .unwrap_or("record")
        .to_string();
    let raw_fields = obj
        .get("fields")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SchemaError::new(format!("record '{}' is missing 'fields'", name)))?;

    let mut fields: Vec<SchemaField> = Vec::with_capacity(raw_fields.len());
    for raw in raw_fields {
        let field_name = raw
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SchemaError::new(format!("field of record '{}' is missing 'name'", name)))?;
        if fields.iter().any(|field| field.name == field_name) {
            return Err(SchemaError::new(format!(
                "record '{}' declares field '{}' twice",
                name, field_name
            )));
        }
        let raw_type = raw.get("type").ok_or_else(|| {
            SchemaError::new(format!("field '{}.{}' is missing 'type'", name, field_name))
        })?;
        let data_type = parse_type(raw_type, named)?;
        let default = match raw.get("default") {
            None | Some(JsonValue::Null) => None,
            Some(value) => Some(convert_default(Value::from_json(value.clone()), &data_type).map_err(
                |err| SchemaError::new(format!("default of '{}.{}': {}", name, field_name, err)),
            )?),
        };
        fields.push(SchemaField {
            name: field_name.to_string(),
            data_type,
            default,
        });
    }

    let data_type = DataType::Record(Box::new(RecordSchema {
        name: name.clone(),
        fields,
    }));
    named.insert(name, data_type.clone());
    Ok(data_type)
}

fn convert_default(value: Value, data_type: &DataType) -> Result<Value, CoerceError> {
    if data_type.is_scalar() {
        coerce_scalar(&value, data_type)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod schema_tests {
    use super::*;

    fn people_schema() -> JsonValue {
        json!({
            "type": "record",
            "name": "people",
            "fields": [
                {"name": "id", "type": "int", "default": "0"},
                {"name": "name", "type": {
                    "type": "record",
                    "name": "nameRecord",
                    "fields": [
                        {"name": "first", "type": "string"},
                        {"name": "mid", "type": "string", "default": "-"},
                        {"name": "last", "type": ["null", "string"], "default": null}
                    ]
                }},
                {"name": "tags", "type": {"type": "array", "items": "string"}},
                {"name": "attrs", "type": {"type": "map", "values": "string"}},
                {"name": "alias", "type": ["null", "nameRecord"]}
            ]
        })
    }

    #[test]
    fn test_parse_nested_record_schema() {
        let schema = RecordSchema::from_json(&people_schema()).expect("schema");
        assert_eq!(schema.name, "people");
        assert_eq!(schema.fields.len(), 5);
        assert_eq!(schema.field("id").and_then(|f| f.default.clone()), Some(Value::from(0)));

        let name = schema.field("name").expect("name field");
        let nested = name.data_type.record_schema().expect("record");
        assert_eq!(nested.field("mid").and_then(|f| f.default.clone()), Some(Value::from("-")));
        assert_eq!(nested.field("last").and_then(|f| f.default.clone()), None);

        assert_eq!(schema.field("tags").map(|f| &f.data_type), Some(&DataType::Array(Box::new(DataType::String))));
        assert_eq!(schema.field("attrs").map(|f| &f.data_type), Some(&DataType::Map(Box::new(DataType::String))));
    }

    #[test]
    fn test_named_type_reference_resolves() {
        let schema = RecordSchema::from_json(&people_schema()).expect("schema");
        let alias = schema.field("alias").expect("alias");
        let nested = alias.data_type.record_schema().expect("record branch");
        assert_eq!(nested.name, "nameRecord");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = RecordSchema::from_json(&json!({
            "type": "record",
            "name": "bad",
            "fields": [{"name": "x", "type": "decimal128"}]
        }))
        .unwrap_err();
        assert!(err.message.contains("decimal128"));
    }

    #[test]
    fn test_schema_deserializes_from_yaml() {
        let yaml = r#"
type: record
name: staff
fields:
  - name: id
    type: long
  - name: city
    type: string
    default: unknown
"#;
        let schema: RecordSchema = serde_yaml::from_str(yaml).expect("yaml schema");
        assert_eq!(schema.field("id").map(|f| &f.data_type), Some(&DataType::Long));
        assert_eq!(schema.field("city").and_then(|f| f.default.clone()), Some(Value::from("unknown")));
        assert_eq!(RecordSchema::from_json(&schema.to_json()).expect("round"), schema);
    }
}
