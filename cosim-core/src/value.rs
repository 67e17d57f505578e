//! Typed variable values and their byte representation in `DATA` payloads.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error as ThisError;

/// The data type of a variable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float64 = 1,
    Int64 = 2,
    Boolean = 3,
}

impl DataType {
    /// The number of payload bytes a value of this type occupies.
    pub const fn width(self) -> usize {
        match self {
            DataType::Float64 | DataType::Int64 => 8,
            DataType::Boolean => 1,
        }
    }

    /// The value a variable of this type holds before anything was written.
    pub const fn zero(self) -> Value {
        match self {
            DataType::Float64 => Value::Float64(0.0),
            DataType::Int64 => Value::Int64(0),
            DataType::Boolean => Value::Boolean(false),
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = UnknownDataType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Float64),
            2 => Ok(Self::Int64),
            3 => Ok(Self::Boolean),
            other => Err(UnknownDataType(other)),
        }
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
#[error("Unknown data type tag {0}")]
pub struct UnknownDataType(pub u8);

/// The current value of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Float64(f64),
    Int64(i64),
    Boolean(bool),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Float64(_) => DataType::Float64,
            Value::Int64(_) => DataType::Int64,
            Value::Boolean(_) => DataType::Boolean,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts the value to `data_type` when that loses nothing. Untagged
    /// deserialization reads every JSON number as a float, so integer start
    /// values pass through here.
    pub fn coerce(self, data_type: DataType) -> Option<Value> {
        match (self, data_type) {
            (value, target) if value.data_type() == target => Some(value),
            (Value::Float64(v), DataType::Int64) if v.fract() == 0.0 && v.abs() < 2f64.powi(53) => {
                Some(Value::Int64(v as i64))
            }
            (Value::Int64(v), DataType::Float64) => Some(Value::Float64(v as f64)),
            _ => None,
        }
    }

    /// Serializes the value into the bytes of a `DATA` payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Float64(v) => v.to_be_bytes().to_vec(),
            Value::Int64(v) => v.to_be_bytes().to_vec(),
            Value::Boolean(v) => vec![*v as u8],
        }
    }

    /// Reads a value of the given type back out of a `DATA` payload.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self, ValueError> {
        if bytes.len() != data_type.width() {
            return Err(ValueError::Width {
                data_type,
                actual: bytes.len(),
            });
        }
        let mut eight = [0; 8];
        match data_type {
            DataType::Float64 => {
                eight.copy_from_slice(bytes);
                Ok(Value::Float64(f64::from_be_bytes(eight)))
            }
            DataType::Int64 => {
                eight.copy_from_slice(bytes);
                Ok(Value::Int64(i64::from_be_bytes(eight)))
            }
            DataType::Boolean => match bytes[0] {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(ValueError::Boolean(other)),
            },
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    #[error("A {data_type:?} payload needs {} bytes, got {actual}", .data_type.width())]
    Width { data_type: DataType, actual: usize },
    #[error("Invalid boolean byte {0:#04x}")]
    Boolean(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_width_is_checked() {
        assert_eq!(
            Value::from_bytes(DataType::Float64, &[0; 4]),
            Err(ValueError::Width {
                data_type: DataType::Float64,
                actual: 4
            })
        );
        assert_eq!(
            Value::from_bytes(DataType::Boolean, &[2]),
            Err(ValueError::Boolean(2))
        );
    }

    #[test]
    fn payload_bytes() {
        let value = Value::Float64(-0.25);
        assert_eq!(
            Value::from_bytes(DataType::Float64, &value.to_bytes()),
            Ok(value)
        );
        assert_eq!(Value::Boolean(true).to_bytes(), vec![1]);
        assert_eq!(Value::Int64(-1).to_bytes(), vec![0xff; 8]);
    }

    #[test]
    fn coerce_integer_start_values() {
        assert_eq!(
            Value::Float64(3.0).coerce(DataType::Int64),
            Some(Value::Int64(3))
        );
        assert_eq!(Value::Float64(3.5).coerce(DataType::Int64), None);
        assert_eq!(Value::Boolean(true).coerce(DataType::Float64), None);
    }
}
