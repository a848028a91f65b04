//! Tagged value model
//!
//! `Value` is the uniform container every index bucket, query condition, and
//! payload slot speaks. It carries a runtime type tag and implements a strict
//! total order with **numeric class comparison**:
//!
//! 1. **Numeric class**: Int, Int64 and Double are compared mathematically by
//!    value, not by tag. `Int(3) < Double(3.5) < Int64(4)`.
//! 2. **Other types**: compared by type discriminant first, then by value
//!    within the type.
//!
//! A separate *relaxed* equality/hash ([`Value::relaxed_eq`],
//! [`Value::relaxed_hash`]) is used only by Distinct/Facet aggregation, where
//! `Int(1)`, `Int64(1)` and `Double(1.0)` must land in the same bucket.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime type tag for [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Int64,
    Double,
    String,
    Tuple,
    Composite,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Int64 => "int64",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Tuple => "tuple",
            ValueType::Composite => "composite",
        };
        f.write_str(s)
    }
}

impl ValueType {
    /// Whether this type participates in the numeric comparison class
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Int64 | ValueType::Double)
    }
}

/// Tagged variant value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    /// Ordered collection, used for array-field values in conditions
    Tuple(Vec<Value>),
    /// Compound key decomposed into its component field values
    Composite(Vec<Value>),
}

impl Value {
    /// Runtime type tag
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Tuple(_) => ValueType::Tuple,
            Value::Composite(_) => ValueType::Composite,
        }
    }

    /// Whether this value is in the numeric comparison class
    pub fn is_numeric(&self) -> bool {
        self.value_type().is_numeric()
    }

    fn type_discriminant(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            // Numeric class: grouped together (2-4)
            Value::Int(_) => 2,
            Value::Int64(_) => 3,
            Value::Double(_) => 4,
            Value::String(_) => 5,
            Value::Tuple(_) => 6,
            Value::Composite(_) => 7,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce this value to the target type.
    ///
    /// Numeric conversions are lossy-checked: an out-of-range or fractional
    /// conversion fails with `InvalidArgument`. Strings parse into numerics
    /// the way the DSL delivers them.
    pub fn coerce(self, target: ValueType) -> Result<Value> {
        if self.value_type() == target {
            return Ok(self);
        }
        let fail = |v: &Value| {
            Err(Error::invalid_argument(format!(
                "cannot convert '{}' ({}) to {}",
                v, v.value_type(), target
            )))
        };
        match (&self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int(v), ValueType::Int64) => Ok(Value::Int64(*v as i64)),
            (Value::Int(v), ValueType::Double) => Ok(Value::Double(*v as f64)),
            (Value::Int(v), ValueType::Bool) => Ok(Value::Bool(*v != 0)),
            (Value::Int64(v), ValueType::Int) => {
                if let Ok(v) = i32::try_from(*v) {
                    Ok(Value::Int(v))
                } else {
                    fail(&self)
                }
            }
            (Value::Int64(v), ValueType::Double) => Ok(Value::Double(*v as f64)),
            (Value::Int64(v), ValueType::Bool) => Ok(Value::Bool(*v != 0)),
            (Value::Double(v), ValueType::Int) => {
                if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 {
                    Ok(Value::Int(*v as i32))
                } else {
                    fail(&self)
                }
            }
            (Value::Double(v), ValueType::Int64) => {
                if v.fract() == 0.0 {
                    Ok(Value::Int64(*v as i64))
                } else {
                    fail(&self)
                }
            }
            (Value::Bool(v), ValueType::Int) => Ok(Value::Int(*v as i32)),
            (Value::Bool(v), ValueType::Int64) => Ok(Value::Int64(*v as i64)),
            (Value::String(s), ValueType::Int) => {
                s.parse::<i32>().map(Value::Int).or_else(|_| fail(&self))
            }
            (Value::String(s), ValueType::Int64) => {
                s.parse::<i64>().map(Value::Int64).or_else(|_| fail(&self))
            }
            (Value::String(s), ValueType::Double) => {
                s.parse::<f64>().map(Value::Double).or_else(|_| fail(&self))
            }
            (Value::String(s), ValueType::Bool) => match s.as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => fail(&self),
            },
            (_, ValueType::String) => Ok(Value::String(self.to_string())),
            _ => fail(&self),
        }
    }

    /// Relaxed equality for Distinct/Facet: numerics compare by value across
    /// Int/Int64/Double; everything else requires matching tags.
    pub fn relaxed_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Null, Value::Null) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                (Value::Tuple(a), Value::Tuple(b)) | (Value::Composite(a), Value::Composite(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.relaxed_eq(y))
                }
                _ => false,
            },
        }
    }

    /// Relaxed hash consistent with [`Value::relaxed_eq`]
    pub fn relaxed_hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Int(_) | Value::Int64(_) | Value::Double(_) => {
                // All numerics hash through their f64 image
                self.as_f64().unwrap_or(0.0).to_bits().hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::Tuple(vs) | Value::Composite(vs) => {
                vs.len().hash(state);
                for v in vs {
                    v.relaxed_hash(state);
                }
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        // Numeric class compares mathematically, tag breaks ties
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a
                .partial_cmp(&b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.type_discriminant().cmp(&other.type_discriminant()));
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) | (Value::Composite(a), Value::Composite(b)) => {
                a.cmp(b)
            }
            _ => self.type_discriminant().cmp(&other.type_discriminant()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_discriminant().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Tuple(vs) | Value::Composite(vs) => vs.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Tuple(vs) | Value::Composite(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
