//! The payload tree stored in records.
//!
//! Payloads are heterogeneous JSON-like trees. Fixed-precision backends
//! reject IEEE-754 values, so two serialization modes exist: the "remote"
//! form promotes every float to a 6-place decimal before a driver persists
//! it, and the "local" form demotes integer-valued decimals back to integers
//! and fractional decimals back to floats on read. Fractional round-trip
//! fidelity is therefore decimal, not float. Decimals that do not fit an
//! i64 (backends allow up to 38 digits) survive both directions unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::prepare::TXN_QUANTIZE;

/// Serialize decimals through their canonical string form. The derived
/// impls on `BigDecimal` are format-dependent; the string form round-trips
/// through non-self-describing encodings with the scale intact.
mod decimal_str {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(d)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigDecimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(#[serde(with = "decimal_str")] BigDecimal),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Quantizes a decimal to the timestamp precision, half-even.
pub fn quantize(d: &BigDecimal) -> BigDecimal {
    d.with_scale_round(TXN_QUANTIZE, RoundingMode::HalfEven)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts numbers for a remote datastore: floats become quantized
    /// decimals, recursively. Decimals pass through untouched to preserve
    /// their precision end-to-end. Non-finite floats have no decimal form.
    pub fn to_remote(&self) -> Value {
        match self {
            Value::Float(f) if f.is_finite() => match BigDecimal::from_str(&format!("{}", f)) {
                Ok(d) => Value::Decimal(quantize(&d)),
                Err(_) => Value::Null,
            },
            Value::Float(_) => Value::Null,
            Value::List(items) => Value::List(items.iter().map(Value::to_remote).collect()),
            Value::Map(map) => {
                Value::Map(map.iter().map(|(k, v)| (k.clone(), v.to_remote())).collect())
            }
            v => v.clone(),
        }
    }

    /// Converts numbers read from a remote datastore back to local types:
    /// integer-valued decimals that fit an i64 demote to integers,
    /// fractional decimals demote to floats, anything wider stays decimal.
    pub fn to_local(&self) -> Value {
        match self {
            Value::Decimal(d) => {
                if d.with_scale(0) == *d {
                    if let Some(i) = d.to_i64() {
                        if BigDecimal::from(i) == *d {
                            return Value::Int(i);
                        }
                    }
                    Value::Decimal(d.clone())
                } else {
                    match d.to_f64() {
                        Some(f) if f.is_finite() => Value::Float(f),
                        _ => Value::Decimal(d.clone()),
                    }
                }
            }
            Value::List(items) => Value::List(items.iter().map(Value::to_local).collect()),
            Value::Map(map) => {
                Value::Map(map.iter().map(|(k, v)| (k.clone(), v.to_local())).collect())
            }
            v => v.clone(),
        }
    }

    /// Walks a `.`-separated path through nested maps.
    pub fn at_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for part in path.split('.') {
            match cur {
                Value::Map(map) => cur = map.get(part)?,
                _ => return None,
            }
        }
        Some(cur)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Decimal(BigDecimal::from(u))
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
