//! Argument codec.
//!
//! Bridge arguments travel as JSON primitives. Each registered function
//! declares its parameters as a list of [`Param`]s; the codec checks arity,
//! applies the nullability rule and converts every wire value into the
//! declared [`ParamKind`] before the handler runs.
//!
//! Conversion is content based: the textual content of the primitive is
//! parsed into the destination kind, so `"42"` and `42` both decode as an
//! `I32`, and `true` decodes as the string `"true"` for a `Str` parameter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

use crate::error::{BridgeError, BridgeResult, HostError};

/// The closed set of parameter kinds a host function can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Double-precision float.
    F64,
    /// Single-precision float.
    F32,
    /// Boolean (`true` / `false`).
    Bool,
    /// String; numbers and booleans are accepted as their textual content.
    Str,
    /// Raw JSON value, passed through without conversion.
    Json,
}

impl ParamKind {
    /// Convert the kind to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::I32 => "i32",
            ParamKind::I64 => "i64",
            ParamKind::F64 => "f64",
            ParamKind::F32 => "f32",
            ParamKind::Bool => "bool",
            ParamKind::Str => "string",
            ParamKind::Json => "json",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub nullable: bool,
}

impl Param {
    /// A parameter that must be present and non-null.
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    /// A parameter that accepts `null`.
    pub const fn nullable(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    I32(i32),
    I64(i64),
    F64(f64),
    F32(f32),
    Bool(bool),
    Str(String),
    Json(Value),
}

/// Decode raw wire arguments against a parameter list.
///
/// Fails with [`BridgeError::Arity`] before looking at any value when the
/// counts differ.
pub fn decode_args(params: &[Param], raw: &[Value]) -> BridgeResult<Args> {
    if params.len() != raw.len() {
        return Err(BridgeError::Arity {
            expected: params.len(),
            actual: raw.len(),
        });
    }

    params
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(index, (param, value))| decode_arg(index, param, value))
        .collect::<BridgeResult<Vec<_>>>()
        .map(Args)
}

/// Decode a single wire value into the kind declared by `param`.
pub fn decode_arg(index: usize, param: &Param, value: &Value) -> BridgeResult<ArgValue> {
    let type_error = |found: &str| BridgeError::ArgumentType {
        index,
        name: param.name,
        expected: param.kind,
        found: found.to_string(),
    };

    let content: Cow<'_, str> = match (value, param.kind) {
        (Value::Null, _) if param.nullable => return Ok(ArgValue::Null),
        (Value::Null, _) => {
            return Err(BridgeError::NullArgument {
                index,
                name: param.name,
            })
        }
        (_, ParamKind::Json) => return Ok(ArgValue::Json(value.clone())),
        (Value::String(s), _) => Cow::Borrowed(s.as_str()),
        (Value::Number(n), _) => Cow::Owned(n.to_string()),
        (Value::Bool(b), _) => Cow::Owned(b.to_string()),
        (Value::Array(_), _) => return Err(type_error("array")),
        (Value::Object(_), _) => return Err(type_error("object")),
    };

    let decoded = match param.kind {
        ParamKind::I32 => content.parse().map(ArgValue::I32).ok(),
        ParamKind::I64 => content.parse().map(ArgValue::I64).ok(),
        ParamKind::F64 => content.parse().map(ArgValue::F64).ok(),
        ParamKind::F32 => content.parse().map(ArgValue::F32).ok(),
        ParamKind::Bool => content.parse().map(ArgValue::Bool).ok(),
        ParamKind::Str | ParamKind::Json => Some(ArgValue::Str(content.into_owned())),
    };

    decoded.ok_or_else(|| type_error(&value.to_string()))
}

/// Decoded arguments handed to a function handler, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<ArgValue>);

impl Args {
    /// Build an argument list directly, bypassing the codec.
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.0.get(index)
    }

    pub fn i32(&self, index: usize) -> Result<i32, HostError> {
        match self.get(index) {
            Some(ArgValue::I32(v)) => Ok(*v),
            other => Err(mismatch(index, ParamKind::I32, other)),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64, HostError> {
        match self.get(index) {
            Some(ArgValue::I64(v)) => Ok(*v),
            other => Err(mismatch(index, ParamKind::I64, other)),
        }
    }

    pub fn f64(&self, index: usize) -> Result<f64, HostError> {
        match self.get(index) {
            Some(ArgValue::F64(v)) => Ok(*v),
            other => Err(mismatch(index, ParamKind::F64, other)),
        }
    }

    pub fn f32(&self, index: usize) -> Result<f32, HostError> {
        match self.get(index) {
            Some(ArgValue::F32(v)) => Ok(*v),
            other => Err(mismatch(index, ParamKind::F32, other)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, HostError> {
        match self.get(index) {
            Some(ArgValue::Bool(v)) => Ok(*v),
            other => Err(mismatch(index, ParamKind::Bool, other)),
        }
    }

    pub fn str(&self, index: usize) -> Result<&str, HostError> {
        match self.get(index) {
            Some(ArgValue::Str(v)) => Ok(v),
            other => Err(mismatch(index, ParamKind::Str, other)),
        }
    }

    /// A nullable string parameter.
    pub fn opt_str(&self, index: usize) -> Result<Option<&str>, HostError> {
        match self.get(index) {
            Some(ArgValue::Null) => Ok(None),
            _ => self.str(index).map(Some),
        }
    }

    pub fn json(&self, index: usize) -> Result<&Value, HostError> {
        match self.get(index) {
            Some(ArgValue::Json(v)) => Ok(v),
            other => Err(mismatch(index, ParamKind::Json, other)),
        }
    }
}

fn mismatch(index: usize, expected: ParamKind, found: Option<&ArgValue>) -> HostError {
    HostError::Failed(format!(
        "argument {index} is not a {expected} (found {found:?})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_one(kind: ParamKind, value: Value) -> BridgeResult<ArgValue> {
        decode_arg(0, &Param::required("x", kind), &value)
    }

    #[test]
    fn test_decode_each_kind() {
        assert_eq!(decode_one(ParamKind::I32, json!(7)).unwrap(), ArgValue::I32(7));
        assert_eq!(
            decode_one(ParamKind::I64, json!(9_000_000_000_i64)).unwrap(),
            ArgValue::I64(9_000_000_000)
        );
        assert_eq!(decode_one(ParamKind::F64, json!(1.5)).unwrap(), ArgValue::F64(1.5));
        assert_eq!(decode_one(ParamKind::F32, json!(0.25)).unwrap(), ArgValue::F32(0.25));
        assert_eq!(decode_one(ParamKind::Bool, json!(true)).unwrap(), ArgValue::Bool(true));
        assert_eq!(
            decode_one(ParamKind::Str, json!("hello")).unwrap(),
            ArgValue::Str("hello".to_string())
        );
    }

    #[test]
    fn test_decode_is_content_based() {
        assert_eq!(decode_one(ParamKind::I32, json!("42")).unwrap(), ArgValue::I32(42));
        assert_eq!(decode_one(ParamKind::F64, json!(3)).unwrap(), ArgValue::F64(3.0));
        assert_eq!(
            decode_one(ParamKind::Str, json!(12)).unwrap(),
            ArgValue::Str("12".to_string())
        );
        assert_eq!(
            decode_one(ParamKind::Bool, json!("false")).unwrap(),
            ArgValue::Bool(false)
        );
    }

    #[test]
    fn test_decode_rejects_out_of_range_i32() {
        let err = decode_one(ParamKind::I32, json!(3_000_000_000_i64)).unwrap_err();
        assert!(matches!(err, BridgeError::ArgumentType { expected: ParamKind::I32, .. }));
    }

    #[test]
    fn test_decode_rejects_fractional_integer() {
        assert!(decode_one(ParamKind::I64, json!(1.5)).is_err());
    }

    #[test]
    fn test_decode_rejects_containers() {
        let err = decode_one(ParamKind::Str, json!(["a"])).unwrap_err();
        assert!(err.to_string().contains("array"));

        let err = decode_one(ParamKind::I32, json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn test_json_kind_passes_through() {
        let value = json!({"nested": [1, 2]});
        assert_eq!(
            decode_one(ParamKind::Json, value.clone()).unwrap(),
            ArgValue::Json(value)
        );
    }

    #[test]
    fn test_null_requires_nullable() {
        let err = decode_one(ParamKind::Str, Value::Null).unwrap_err();
        assert_eq!(err, BridgeError::NullArgument { index: 0, name: "x" });

        let decoded = decode_arg(0, &Param::nullable("x", ParamKind::Str), &Value::Null).unwrap();
        assert_eq!(decoded, ArgValue::Null);
    }

    #[test]
    fn test_arity_checked_before_values() {
        let params = [Param::required("a", ParamKind::I32)];
        let err = decode_args(&params, &[json!("not a number"), json!(1)]).unwrap_err();
        assert_eq!(err, BridgeError::Arity { expected: 1, actual: 2 });
    }

    #[test]
    fn test_args_accessors() {
        let params = [
            Param::required("count", ParamKind::I32),
            Param::nullable("label", ParamKind::Str),
            Param::nullable("other", ParamKind::Str),
        ];
        let args = decode_args(&params, &[json!(3), json!("x"), Value::Null]).unwrap();

        assert_eq!(args.len(), 3);
        assert_eq!(args.i32(0).unwrap(), 3);
        assert_eq!(args.opt_str(1).unwrap(), Some("x"));
        assert_eq!(args.opt_str(2).unwrap(), None);
        assert!(args.bool(0).is_err());
        assert!(args.str(5).is_err());
    }

    #[test]
    fn test_param_kind_serialization() {
        let json = serde_json::to_string(&ParamKind::Str).unwrap();
        assert_eq!(json, r#""str""#);
        assert_eq!(ParamKind::Str.to_string(), "string");
    }
}
