use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::catalog::ScalarKind;
use crate::error::{DbrError, Result};

/// One element of any scalar kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Short(i16),
    Float(f32),
    Enum(u16),
    Char(u8),
    Long(i32),
    Double(f64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Text(_) => ScalarKind::String,
            Scalar::Short(_) => ScalarKind::Short,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::Enum(_) => ScalarKind::Enum,
            Scalar::Char(_) => ScalarKind::Char,
            Scalar::Long(_) => ScalarKind::Long,
            Scalar::Double(_) => ScalarKind::Double,
        }
    }

    /// The zero element of a kind, used for padding.
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => Scalar::Text(String::new()),
            ScalarKind::Short => Scalar::Short(0),
            ScalarKind::Float => Scalar::Float(0.0),
            ScalarKind::Enum => Scalar::Enum(0),
            ScalarKind::Char => Scalar::Char(0),
            ScalarKind::Long => Scalar::Long(0),
            ScalarKind::Double => Scalar::Double(0.0),
        }
    }

    /// Numeric value, if this is not text.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::Text(_) => None,
            Scalar::Short(v) => Some(v.into()),
            Scalar::Float(v) => Some(v.into()),
            Scalar::Enum(v) => Some(v.into()),
            Scalar::Char(v) => Some(v.into()),
            Scalar::Long(v) => Some(v.into()),
            Scalar::Double(v) => Some(v),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Convert to another kind without losing information.
    ///
    /// Integer targets reject fractional values, every numeric target rejects
    /// values outside its range, and text is parsed.
    pub fn convert(&self, target: ScalarKind) -> Result<Scalar> {
        if self.kind() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (Scalar::Text(text), _) => parse_text(text, target),
            (_, ScalarKind::String) => Ok(Scalar::Text(self.to_string())),
            (numeric, _) => {
                let value = numeric.as_f64().unwrap_or_default();
                from_f64(value, target).ok_or_else(|| {
                    if value.is_finite() && value.fract() != 0.0 && target.is_integer() {
                        DbrError::TypeMismatch {
                            value: value.to_string(),
                            target,
                        }
                    } else {
                        DbrError::OutOfRange { value, target }
                    }
                })
            }
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Text(v) => f.write_str(v),
            Scalar::Short(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Enum(v) => write!(f, "{v}"),
            Scalar::Char(v) => write!(f, "{v}"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Double(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Double(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Long(v)
    }
}

impl From<i16> for Scalar {
    fn from(v: i16) -> Self {
        Scalar::Short(v)
    }
}

impl From<u16> for Scalar {
    fn from(v: u16) -> Self {
        Scalar::Enum(v)
    }
}

impl From<u8> for Scalar {
    fn from(v: u8) -> Self {
        Scalar::Char(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

fn from_f64(value: f64, target: ScalarKind) -> Option<Scalar> {
    let integral = value.is_finite() && value.fract() == 0.0;
    match target {
        ScalarKind::String => Some(Scalar::Text(value.to_string())),
        ScalarKind::Double => Some(Scalar::Double(value)),
        ScalarKind::Float => {
            if value.is_finite() && value.abs() > f64::from(f32::MAX) {
                None
            } else {
                Some(Scalar::Float(value as f32))
            }
        }
        ScalarKind::Short if integral => i16::try_from(value as i64).ok().map(Scalar::Short),
        ScalarKind::Enum if integral => u16::try_from(value as i64).ok().map(Scalar::Enum),
        ScalarKind::Char if integral => u8::try_from(value as i64).ok().map(Scalar::Char),
        ScalarKind::Long if integral => i32::try_from(value as i64).ok().map(Scalar::Long),
        _ => None,
    }
}

fn parse_text(text: &str, target: ScalarKind) -> Result<Scalar> {
    let trimmed = text.trim();
    let mismatch = || DbrError::TypeMismatch {
        value: text.to_string(),
        target,
    };
    if target.is_integer() {
        if let Ok(int) = trimmed.parse::<i64>() {
            return from_f64(int as f64, target).ok_or(DbrError::OutOfRange {
                value: int as f64,
                target,
            });
        }
    }
    let value: f64 = trimmed.parse().map_err(|_| mismatch())?;
    if target.is_integer() && value.fract() != 0.0 {
        return Err(mismatch());
    }
    from_f64(value, target).ok_or(DbrError::OutOfRange { value, target })
}

/// Contiguous numeric elements, filled by one bulk copy of the wire bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NumericArray {
    Short(Vec<i16>),
    Float(Vec<f32>),
    Enum(Vec<u16>),
    Char(Vec<u8>),
    Long(Vec<i32>),
    Double(Vec<f64>),
}

impl NumericArray {
    pub fn kind(&self) -> ScalarKind {
        match self {
            NumericArray::Short(_) => ScalarKind::Short,
            NumericArray::Float(_) => ScalarKind::Float,
            NumericArray::Enum(_) => ScalarKind::Enum,
            NumericArray::Char(_) => ScalarKind::Char,
            NumericArray::Long(_) => ScalarKind::Long,
            NumericArray::Double(_) => ScalarKind::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NumericArray::Short(v) => v.len(),
            NumericArray::Float(v) => v.len(),
            NumericArray::Enum(v) => v.len(),
            NumericArray::Char(v) => v.len(),
            NumericArray::Long(v) => v.len(),
            NumericArray::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<Scalar> {
        match self {
            NumericArray::Short(v) => v.get(idx).copied().map(Scalar::Short),
            NumericArray::Float(v) => v.get(idx).copied().map(Scalar::Float),
            NumericArray::Enum(v) => v.get(idx).copied().map(Scalar::Enum),
            NumericArray::Char(v) => v.get(idx).copied().map(Scalar::Char),
            NumericArray::Long(v) => v.get(idx).copied().map(Scalar::Long),
            NumericArray::Double(v) => v.get(idx).copied().map(Scalar::Double),
        }
    }
}

/// A decoded value: one element, a sequence, or a contiguous numeric array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
    Array(NumericArray),
}

impl Value {
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Sequence(items) => items.len(),
            Value::Array(array) => array.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn element(&self, idx: usize) -> Option<Scalar> {
        match self {
            Value::Scalar(scalar) if idx == 0 => Some(scalar.clone()),
            Value::Scalar(_) => None,
            Value::Sequence(items) => items.get(idx).cloned(),
            Value::Array(array) => array.get(idx),
        }
    }

    /// All elements as scalars, in order.
    pub fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|idx| self.element(idx)).collect()
    }

    /// First element as a number.
    pub fn as_f64(&self) -> Option<f64> {
        self.element(0).and_then(|s| s.as_f64())
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

/// An application value to be written: one scalar or an ordered sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum PutValue {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
}

impl PutValue {
    pub fn len(&self) -> usize {
        match self {
            PutValue::Scalar(_) => 1,
            PutValue::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

macro_rules! put_value_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PutValue {
                fn from(value: $ty) -> Self {
                    PutValue::Scalar(value.into())
                }
            }
        )*
    };
}

put_value_from_scalar!(Scalar, f64, f32, i32, i16, u16, u8, &str, String);

impl From<Vec<Scalar>> for PutValue {
    fn from(items: Vec<Scalar>) -> Self {
        PutValue::Sequence(items)
    }
}

impl From<Vec<f64>> for PutValue {
    fn from(items: Vec<f64>) -> Self {
        PutValue::Sequence(items.into_iter().map(Scalar::Double).collect())
    }
}

impl From<Vec<i32>> for PutValue {
    fn from(items: Vec<i32>) -> Self {
        PutValue::Sequence(items.into_iter().map(Scalar::Long).collect())
    }
}

impl From<Vec<&str>> for PutValue {
    fn from(items: Vec<&str>) -> Self {
        PutValue::Sequence(items.into_iter().map(Scalar::from).collect())
    }
}

/// Write `text` into a zero-padded slot of `width` bytes, keeping room for the terminator.
pub(crate) fn put_fixed_text(dst: &mut BytesMut, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width.saturating_sub(1));
    dst.put_slice(&bytes[..len]);
    dst.put_bytes(0, width - len);
}

/// Read a fixed slot up to its first terminator.
pub(crate) fn get_fixed_text(src: &[u8]) -> String {
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}
