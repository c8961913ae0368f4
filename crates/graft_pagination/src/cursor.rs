//! Cursor wire format.
//!
//! A cursor is the base64 (standard alphabet, padded) encoding of a compact
//! JSON object:
//!
//! ```text
//! {"s":"name:asc,id:asc","v":["Brightex",2],"o":1}
//! ```
//!
//! `s` is the signature of the sort definition the cursor was created
//! with, `v` the sort key values of the boundary item and `o` an optional
//! relative offset in pages, omitted when zero. Keys are always written in
//! this order, so decoding and re-encoding reproduces the same string.
//!
//! JSON has no non-finite numbers; those floats are written as
//! `{"f":"NaN"}`, `{"f":"-NaN"}`, `{"f":"inf"}` or `{"f":"-inf"}`.

use crate::error::PagingError;
use crate::sort::{CursorValue, SortDefinition};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// A decoded cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Signature of the sort definition the cursor was created with.
    pub signature: String,
    /// Sort key values of the boundary item.
    pub values: Vec<CursorValue>,
    /// Relative offset in pages.
    pub offset: i64,
}

#[derive(Deserialize)]
struct Payload {
    s: String,
    v: Vec<Value>,
    #[serde(default)]
    o: i64,
}

impl Cursor {
    /// Creates a cursor pointing at `item`.
    pub fn for_item<T>(sort: &SortDefinition<T>, item: &T, offset: i64) -> Self {
        Self {
            signature: sort.signature(),
            values: sort.values_of(item),
            offset,
        }
    }

    /// Encodes the cursor.
    pub fn encode(&self) -> String {
        let mut payload = Map::new();
        payload.insert("s".into(), Value::String(self.signature.clone()));
        payload.insert(
            "v".into(),
            Value::Array(self.values.iter().map(to_json).collect()),
        );
        if self.offset != 0 {
            payload.insert("o".into(), Value::from(self.offset));
        }
        STANDARD.encode(Value::Object(payload).to_string())
    }

    /// Decodes a cursor string.
    pub fn decode(input: &str) -> Result<Self, PagingError> {
        let invalid = || PagingError::InvalidCursor(input.to_string());
        let bytes = STANDARD.decode(input).map_err(|_| invalid())?;
        let payload: Payload = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        let values = payload
            .v
            .into_iter()
            .map(from_json)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;
        Ok(Self {
            signature: payload.s,
            values,
            offset: payload.o,
        })
    }

    /// Decodes a cursor and checks that it was created for `sort`.
    pub fn decode_for<T>(input: &str, sort: &SortDefinition<T>) -> Result<Self, PagingError> {
        let cursor = Self::decode(input)?;
        let expected = sort.signature();
        if cursor.signature != expected || cursor.values.len() != sort.len() {
            return Err(PagingError::CursorMismatch {
                expected,
                found: cursor.signature,
            });
        }
        Ok(cursor)
    }
}

fn to_json(value: &CursorValue) -> Value {
    match value {
        CursorValue::Null => Value::Null,
        CursorValue::Bool(b) => Value::Bool(*b),
        CursorValue::Int(i) => Value::from(*i),
        CursorValue::Float(f) if f.is_finite() => Value::from(*f),
        CursorValue::Float(f) => {
            let tag = match (f.is_nan(), f.is_sign_negative()) {
                (true, false) => "NaN",
                (true, true) => "-NaN",
                (false, false) => "inf",
                (false, true) => "-inf",
            };
            json!({ "f": tag })
        }
        CursorValue::String(s) => Value::String(s.clone()),
    }
}

fn from_json(value: Value) -> Option<CursorValue> {
    match value {
        Value::Null => Some(CursorValue::Null),
        Value::Bool(b) => Some(CursorValue::Bool(b)),
        Value::Number(n) => n
            .as_i64()
            .map(CursorValue::Int)
            .or_else(|| n.as_f64().map(CursorValue::Float)),
        Value::String(s) => Some(CursorValue::String(s)),
        Value::Object(map) if map.len() == 1 => {
            let float = match map.get("f")?.as_str()? {
                "NaN" => f64::NAN,
                "-NaN" => -f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                _ => return None,
            };
            Some(CursorValue::Float(float))
        }
        _ => None,
    }
}
