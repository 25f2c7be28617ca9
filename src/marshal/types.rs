//! Value kinds and function signatures
//!
//! Declares what an exported function accepts and returns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds a value can have on either side of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueKind {
    /// No value (return kind only)
    Void,
    /// Signed integer (host i64, native C int)
    Integer,
    /// 64-bit floating point
    Real,
    /// Boolean
    Boolean,
    /// UTF-8 string
    String,
    /// Homogeneous array of a kind
    Array(Box<ValueKind>),
}

impl ValueKind {
    pub fn array_of(element: ValueKind) -> Self {
        ValueKind::Array(Box::new(element))
    }

    /// Whether this kind, or any nested element kind, is `Void`
    pub fn contains_void(&self) -> bool {
        match self {
            ValueKind::Void => true,
            ValueKind::Array(element) => element.contains_void(),
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ValueKind::Integer | ValueKind::Real | ValueKind::Boolean
        )
    }

    /// Parse from a string representation
    ///
    /// Accepts `array<T>` and `T[]` for arrays. Integer names are limited
    /// to 32-bit spellings and real names to 64-bit ones, since loaded
    /// symbols are called with exactly those C types.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();

        if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            return Self::parse(inner).map(Self::array_of);
        }
        if let Some(inner) = s.strip_suffix("[]") {
            return Self::parse(inner).map(Self::array_of);
        }

        match s.as_str() {
            "void" | "null" => Some(ValueKind::Void),
            "integer" | "int" | "i32" => Some(ValueKind::Integer),
            "real" | "double" | "f64" => Some(ValueKind::Real),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            "string" | "utf8" | "str" => Some(ValueKind::String),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Void => write!(f, "void"),
            ValueKind::Integer => write!(f, "integer"),
            ValueKind::Real => write!(f, "real"),
            ValueKind::Boolean => write!(f, "boolean"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Array(element) => write!(f, "array<{}>", element),
        }
    }
}

impl TryFrom<String> for ValueKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("unknown value kind '{}'", s))
    }
}

impl From<ValueKind> for String {
    fn from(kind: ValueKind) -> Self {
        kind.to_string()
    }
}

/// Declared argument kinds and return kind of one exported function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature {
    /// Argument kinds, in call order
    pub args: Vec<ValueKind>,
    /// Return kind
    pub ret: ValueKind,
}

impl Signature {
    pub fn new(args: Vec<ValueKind>, ret: ValueKind) -> Self {
        Self { args, ret }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Check the signature is well formed
    ///
    /// `void` is only allowed as the top-level return kind.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(index) = self.args.iter().position(ValueKind::contains_void) {
            return Err(format!("argument {} cannot be void", index));
        }
        if let ValueKind::Array(element) = &self.ret {
            if element.contains_void() {
                return Err("array element kind cannot be void".to_string());
            }
        }
        Ok(())
    }

    /// Parse from `(kind, kind, ...) -> kind`
    pub fn parse(signature: &str) -> Option<Self> {
        let (params, ret) = signature.split_once("->")?;
        let params = params.trim().strip_prefix('(')?.strip_suffix(')')?.trim();

        let mut args = Vec::new();
        if !params.is_empty() {
            for param in params.split(',') {
                args.push(ValueKind::parse(param)?);
            }
        }

        Some(Self {
            args,
            ret: ValueKind::parse(ret)?,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

impl TryFrom<String> for Signature {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("malformed signature '{}'", s))
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.to_string()
    }
}
