//! Type coercion for workflow inputs: applying declared `InputType`s to
//! user-supplied values and defaults before they are written into the
//! `__inputs__` namespace.

use serde_json::Value;
use thiserror::Error;

use crate::models::InputType;
use nodes::ParamType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: InputType, actual: String },

    #[error("value '{0}' cannot be parsed as a number")]
    NotANumber(String),
}

fn kind_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

/// Coerce `value` to `ty`, following JSON's natural looseness (numeric
/// strings parse, `0`/`1` are not booleans, objects/arrays never coerce from
/// scalars). Returns the value unchanged when it already matches.
pub fn coerce(value: &Value, ty: InputType) -> Result<Value, CoerceError> {
    match (ty, value) {
        (InputType::String, Value::String(_)) => Ok(value.clone()),
        (InputType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (InputType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (InputType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (InputType::Integer, Value::Number(n)) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    return Ok(Value::from(f as i64));
                }
            }
            Err(CoerceError::TypeMismatch {
                expected: ty,
                actual: kind_name(value),
            })
        }
        (InputType::Integer, Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| CoerceError::NotANumber(s.clone())),

        (InputType::Number, Value::Number(_)) => Ok(value.clone()),
        (InputType::Number, Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| CoerceError::NotANumber(s.clone())),

        (InputType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (InputType::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(CoerceError::TypeMismatch {
                expected: ty,
                actual: kind_name(value),
            }),
        },

        (InputType::Object, Value::Object(_)) => Ok(value.clone()),
        (InputType::Array, Value::Array(_)) => Ok(value.clone()),

        _ => Err(CoerceError::TypeMismatch {
            expected: ty,
            actual: kind_name(value),
        }),
    }
}

/// Coerce a node parameter value to its declared `ParamType`. `Any` accepts
/// the value unchanged (used for untyped/opaque params).
pub fn coerce_param(value: &Value, ty: ParamType) -> Result<Value, CoerceError> {
    let input_ty = match ty {
        ParamType::Any => return Ok(value.clone()),
        ParamType::String => InputType::String,
        ParamType::Integer => InputType::Integer,
        ParamType::Number => InputType::Number,
        ParamType::Boolean => InputType::Boolean,
        ParamType::Object => InputType::Object,
        ParamType::Array => InputType::Array,
    };
    coerce(value, input_ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_string_coerces_to_integer() {
        assert_eq!(coerce(&Value::String("42".into()), InputType::Integer).unwrap(), Value::from(42));
    }

    #[test]
    fn float_with_fraction_rejects_integer_coercion() {
        assert!(coerce(&Value::from(1.5), InputType::Integer).is_err());
    }

    #[test]
    fn bool_string_case_insensitive() {
        assert_eq!(
            coerce(&Value::String("TRUE".into()), InputType::Boolean).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn object_never_coerces_from_scalar() {
        assert!(coerce(&Value::from(1), InputType::Object).is_err());
    }
}
