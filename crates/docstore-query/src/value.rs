// crates/docstore-query/src/value.rs
// ============================================================================
// Module: SQL Parameters
// Description: Engine-independent bound parameter values.
// Purpose: Encode JSON operands the way extracted body scalars compare.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! `json_extract` yields integers, reals, text, or minified JSON text for
//! containers, with booleans surfacing as `1`/`0`. [`SqlParam::from_json`]
//! encodes filter operands into the same shapes so equality behaves.

use serde_json::Value;

/// A positional parameter bound to a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl SqlParam {
    /// Encodes a JSON operand for comparison against an extracted body scalar.
    ///
    /// Booleans become `1`/`0`; arrays and objects become their serialized text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Integer(i64::from(*flag)),
            Value::Number(number) => number.as_i64().map_or_else(
                || number.as_f64().map_or_else(|| Self::Text(number.to_string()), Self::Real),
                Self::Integer,
            ),
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(_) | Value::Object(_) => Self::Text(value.to_string()),
        }
    }

    /// Encodes a JSON value as JSON text, for `json(?)` wrapped arguments.
    #[must_use]
    pub fn json_text(value: &Value) -> Self {
        Self::Text(value.to_string())
    }

    /// Encodes a numeric operand, or `None` when the value is not a number.
    #[must_use]
    pub fn numeric(value: &Value) -> Option<Self> {
        let Value::Number(number) = value else {
            return None;
        };
        number.as_i64().map(Self::Integer).or_else(|| number.as_f64().map(Self::Real))
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}
