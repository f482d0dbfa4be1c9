use serde_json::Number;
use std::fmt;

use crate::schema::DataType;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoerceError {
    pub message: String,
}

impl CoerceError {
    fn cannot(value: &Value, data_type: &DataType) -> Self {
        Self {
            message: format!(
                "cannot coerce {} '{}' to {}",
                value.kind().as_str(),
                value,
                data_type.name()
            ),
        }
    }
}

impl fmt::Display for CoerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CoerceError {}

/// Converts a value to a scalar destination type.
///
/// Null stays null for every type, and a blank string written to a numeric or
/// boolean type becomes null. Composites are accepted only by string-like
/// types, through their canonical text form.
pub fn coerce_scalar(value: &Value, data_type: &DataType) -> Result<Value, CoerceError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::String | DataType::Bytes => Ok(Value::String(value.to_text())),
        DataType::Int => to_integer(value, data_type, i32::MIN as i64, i32::MAX as i64),
        DataType::Long => to_integer(value, data_type, i64::MIN, i64::MAX),
        DataType::Float | DataType::Double => to_float(value, data_type),
        DataType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(CoerceError::cannot(value, data_type)),
        },
        DataType::Null => Err(CoerceError::cannot(value, data_type)),
        DataType::Choice(types) => types
            .iter()
            .filter(|t| t.is_scalar() && !matches!(t, DataType::Null))
            .find_map(|t| coerce_scalar(value, t).ok())
            .ok_or_else(|| CoerceError::cannot(value, data_type)),
        DataType::Record(_) | DataType::Array(_) | DataType::Map(_) => {
            Err(CoerceError::cannot(value, data_type))
        }
    }
}

fn to_integer(value: &Value, data_type: &DataType, min: i64, max: i64) -> Result<Value, CoerceError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return Ok(Value::Null);
            }
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    };
    match parsed {
        Some(n) if n >= min && n <= max => Ok(Value::Number(Number::from(n))),
        _ => Err(CoerceError::cannot(value, data_type)),
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_float(value: &Value, data_type: &DataType) -> Result<Value, CoerceError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return Ok(Value::Null);
            }
            text.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CoerceError::cannot(value, data_type))
}

#[cfg(test)]
mod coerce_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_to_numbers() {
        assert_eq!(coerce_scalar(&Value::from(" 42 "), &DataType::Int), Ok(Value::from(42)));
        assert_eq!(coerce_scalar(&Value::from("7.0"), &DataType::Long), Ok(Value::from(7)));
        assert_eq!(coerce_scalar(&Value::from("2.5"), &DataType::Double), Ok(Value::from_f64(2.5)));
    }

    #[test]
    fn test_blank_string_to_number_is_null() {
        assert_eq!(coerce_scalar(&Value::from(""), &DataType::Int), Ok(Value::Null));
        assert_eq!(coerce_scalar(&Value::from("  "), &DataType::Boolean), Ok(Value::Null));
    }

    #[test]
    fn test_invalid_number_is_mismatch() {
        let err = coerce_scalar(&Value::from("abc"), &DataType::Int).unwrap_err();
        assert_eq!(err.message, "cannot coerce string 'abc' to int");
        assert!(coerce_scalar(&Value::from("2.5"), &DataType::Int).is_err());
        assert!(coerce_scalar(&Value::from("3000000000"), &DataType::Int).is_err());
        assert!(coerce_scalar(&Value::from("3000000000"), &DataType::Long).is_ok());
    }

    #[test]
    fn test_boolean_parsing() {
        assert_eq!(coerce_scalar(&Value::from("TRUE"), &DataType::Boolean), Ok(Value::Bool(true)));
        assert!(coerce_scalar(&Value::from("yes"), &DataType::Boolean).is_err());
    }

    #[test]
    fn test_composite_to_string_uses_canonical_form() {
        let record = Value::from_json(json!({"city": "Beijing", "number": "123"}));
        assert_eq!(
            coerce_scalar(&record, &DataType::String),
            Ok(Value::from("MapRecord[{city=Beijing, number=123}]"))
        );
        assert!(coerce_scalar(&record, &DataType::Int).is_err());
    }

    #[test]
    fn test_choice_picks_first_compatible_branch() {
        let choice = DataType::Choice(vec![DataType::Null, DataType::Int, DataType::String]);
        assert_eq!(coerce_scalar(&Value::from("12"), &choice), Ok(Value::from(12)));
        assert_eq!(coerce_scalar(&Value::from("twelve"), &choice), Ok(Value::from("twelve")));
        assert_eq!(coerce_scalar(&Value::Null, &choice), Ok(Value::Null));
    }
}
