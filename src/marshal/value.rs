//! Host and native value representations
//!
//! [`HostValue`] is the host's loosely-typed tagged value. It is converted
//! into a strictly-typed [`NativeValue`] by [`decode`] at the start of a call,
//! and a native [`NativeOutput`] is converted back by [`encode`].

use thiserror::Error;

use super::types::ValueKind;

/// Native integer width (C `int`)
pub type NativeInt = i32;

/// Error type for marshaling
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: ValueKind,
        found: &'static str,
    },

    #[error("integer {0} is outside the native integer range")]
    OutOfRange(i64),

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("element {index}: {inner}")]
    Element {
        index: usize,
        inner: Box<MarshalError>,
    },

    #[error("malformed host value: {0}")]
    Malformed(String),
}

/// A value as the host represents it
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    /// Host machine integer
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Array(Vec<HostValue>),
}

impl HostValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Integer(_) => "integer",
            HostValue::Real(_) => "real",
            HostValue::Boolean(_) => "boolean",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HostValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            HostValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Integer(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Real(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Boolean(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(v: Vec<HostValue>) -> Self {
        HostValue::Array(v)
    }
}

/// A decoded argument, borrowed from the host value for one call
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue<'a> {
    Integer(NativeInt),
    Real(f64),
    Boolean(bool),
    Str(&'a str),
    Array(Vec<NativeValue<'a>>),
}

impl<'a> NativeValue<'a> {
    pub fn as_integer(&self) -> Option<NativeInt> {
        match self {
            NativeValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            NativeValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            NativeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NativeValue<'a>]> {
        match self {
            NativeValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// A result produced by a native function
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutput {
    Void,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Array(Vec<NativeOutput>),
}

impl NativeOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NativeOutput::Void => "void",
            NativeOutput::Integer(_) => "integer",
            NativeOutput::Real(_) => "real",
            NativeOutput::Boolean(_) => "boolean",
            NativeOutput::String(_) => "string",
            NativeOutput::Array(_) => "array",
        }
    }
}

impl From<()> for NativeOutput {
    fn from(_: ()) -> Self {
        NativeOutput::Void
    }
}

impl From<i32> for NativeOutput {
    fn from(v: i32) -> Self {
        NativeOutput::Integer(v as i64)
    }
}

impl From<i64> for NativeOutput {
    fn from(v: i64) -> Self {
        NativeOutput::Integer(v)
    }
}

impl From<f64> for NativeOutput {
    fn from(v: f64) -> Self {
        NativeOutput::Real(v)
    }
}

impl From<bool> for NativeOutput {
    fn from(v: bool) -> Self {
        NativeOutput::Boolean(v)
    }
}

impl From<String> for NativeOutput {
    fn from(v: String) -> Self {
        NativeOutput::String(v)
    }
}

impl From<&str> for NativeOutput {
    fn from(v: &str) -> Self {
        NativeOutput::String(v.to_string())
    }
}

impl<T: Into<NativeOutput>> From<Vec<T>> for NativeOutput {
    fn from(v: Vec<T>) -> Self {
        NativeOutput::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Decode a host value as the expected kind
///
/// No coercion is performed: an integer is never accepted for a real, and
/// host integers that do not fit a [`NativeInt`] are rejected.
pub fn decode<'a>(value: &'a HostValue, expected: &ValueKind) -> Result<NativeValue<'a>, MarshalError> {
    match (expected, value) {
        (ValueKind::Integer, HostValue::Integer(v)) => NativeInt::try_from(*v)
            .map(NativeValue::Integer)
            .map_err(|_| MarshalError::OutOfRange(*v)),
        (ValueKind::Real, HostValue::Real(v)) => Ok(NativeValue::Real(*v)),
        (ValueKind::Boolean, HostValue::Boolean(v)) => Ok(NativeValue::Boolean(*v)),
        (ValueKind::String, HostValue::String(s)) => Ok(NativeValue::Str(s.as_str())),
        (ValueKind::Array(element), HostValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                decode(item, element).map_err(|e| MarshalError::Element {
                    index,
                    inner: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(NativeValue::Array),
        (expected, value) => Err(MarshalError::KindMismatch {
            expected: expected.clone(),
            found: value.kind_name(),
        }),
    }
}

/// Encode a native result as the declared return kind
pub fn encode(output: NativeOutput, declared: &ValueKind) -> Result<HostValue, MarshalError> {
    match (declared, output) {
        (ValueKind::Void, NativeOutput::Void) => Ok(HostValue::Null),
        (ValueKind::Integer, NativeOutput::Integer(v)) => Ok(HostValue::Integer(v)),
        (ValueKind::Real, NativeOutput::Real(v)) => Ok(HostValue::Real(v)),
        (ValueKind::Boolean, NativeOutput::Boolean(v)) => Ok(HostValue::Boolean(v)),
        (ValueKind::String, NativeOutput::String(s)) => {
            if s.contains('\0') {
                Err(MarshalError::InteriorNul)
            } else {
                Ok(HostValue::String(s))
            }
        }
        (ValueKind::Array(element), NativeOutput::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                encode(item, element).map_err(|e| MarshalError::Element {
                    index,
                    inner: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(HostValue::Array),
        (declared, output) => Err(MarshalError::KindMismatch {
            expected: declared.clone(),
            found: output.kind_name(),
        }),
    }
}
