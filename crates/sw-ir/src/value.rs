//! Typed payloads carried by stage parameters.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// The shape of a parameter value, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    /// Float array with a fixed element count.
    FloatArray(usize),
}

impl ValueKind {
    /// Size in bytes of a value of this kind as uploaded to the GPU.
    pub fn byte_size(self) -> usize {
        match self {
            ValueKind::Bool | ValueKind::Int | ValueKind::Float => 4,
            ValueKind::FloatArray(len) => len * 4,
        }
    }

    /// The deterministic default (zero) value of this kind.
    pub fn default_value(self) -> ParamValue {
        match self {
            ValueKind::Bool => ParamValue::Bool(false),
            ValueKind::Int => ParamValue::Int(0),
            ValueKind::Float => ParamValue::Float(0.0),
            ValueKind::FloatArray(len) => ParamValue::FloatArray(vec![0.0; len]),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::FloatArray(len) => write!(f, "float[{}]", len),
        }
    }
}

/// A typed scalar or array payload.
///
/// Scalars are uploaded as 32-bit words; `Bool` follows the GLSL convention
/// of a 32-bit integer holding 0 or 1.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    FloatArray(Vec<f32>),
}

impl ParamValue {
    /// The kind of this value. Arrays carry their length.
    pub fn kind(&self) -> ValueKind {
        match self {
            ParamValue::Bool(_) => ValueKind::Bool,
            ParamValue::Int(_) => ValueKind::Int,
            ParamValue::Float(_) => ValueKind::Float,
            ParamValue::FloatArray(v) => ValueKind::FloatArray(v.len()),
        }
    }

    /// Size in bytes of the raw payload.
    pub fn byte_size(&self) -> usize {
        self.kind().byte_size()
    }

    /// Little-endian raw bytes of the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ParamValue::Bool(b) => (*b as i32).to_le_bytes().to_vec(),
            ParamValue::Int(i) => i.to_le_bytes().to_vec(),
            ParamValue::Float(x) => x.to_le_bytes().to_vec(),
            ParamValue::FloatArray(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }

    /// A zero value of the same kind and length.
    pub fn default_like(&self) -> ParamValue {
        self.kind().default_value()
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Bool(b) => Some(*b as i32),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ParamValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            ParamValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v)
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        ParamValue::FloatArray(v)
    }
}
