//! Error taxonomy and call status.
//!
//! Errors are detected inside the registry and dispatcher as [`BridgeError`],
//! summarized as a [`Status`] per call, and flattened to the host's narrow
//! status code only at the ABI boundary.

use std::fmt;

use libc::c_int;
use thiserror::Error;

use crate::config::ConfigError;
use crate::host::{HOST_FUNCTION_ERROR, HOST_NO_ERROR};
use crate::marshal::{MarshalError, ValueKind};
use crate::native::LoadError;

/// Error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("function not found: {0}")]
    NotFound(String),

    #[error("{name}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{name}: argument {index}: {source}")]
    TypeMismatch {
        name: String,
        index: usize,
        #[source]
        source: MarshalError,
    },

    #[error("{name}: native function failed with code {code}")]
    NativeFailure { name: String, code: i32 },

    #[error("{name}: result cannot be encoded as {kind}: {source}")]
    EncodingFailure {
        name: String,
        kind: ValueKind,
        #[source]
        source: MarshalError,
    },

    #[error("duplicate function name: {0}")]
    DuplicateName(String),

    #[error("invalid symbol name: '{0}'")]
    InvalidName(String),

    #[error("invalid signature for {name}: {reason}")]
    InvalidSignature { name: String, reason: String },

    #[error("module is not loaded")]
    NotLoaded,

    #[error("module '{module}' initialization failed with code {code}")]
    InitFailed { module: String, code: i32 },

    #[error(transparent)]
    Library(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// The per-call status this error is reported as.
    ///
    /// A call made while no module is loaded finds nothing to call. Errors
    /// that can only happen outside a call (registration, load,
    /// configuration) report as a native failure with code 0 should they
    /// ever reach the call path.
    pub fn status(&self) -> Status {
        match self {
            BridgeError::NotFound(_) | BridgeError::NotLoaded => Status::NotFound,
            BridgeError::ArityMismatch { .. } => Status::ArityMismatch,
            BridgeError::TypeMismatch { .. } => Status::TypeMismatch,
            BridgeError::NativeFailure { code, .. } => Status::NativeFailure(*code),
            BridgeError::EncodingFailure { .. } => Status::EncodingFailure,
            BridgeError::DuplicateName(_)
            | BridgeError::InvalidName(_)
            | BridgeError::InvalidSignature { .. }
            | BridgeError::InitFailed { .. }
            | BridgeError::Library(_)
            | BridgeError::Config(_) => Status::NativeFailure(0),
        }
    }
}

/// Outcome of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    NotFound,
    ArityMismatch,
    TypeMismatch,
    NativeFailure(i32),
    EncodingFailure,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Flatten to the host's status code.
    pub fn host_code(&self) -> c_int {
        match self {
            Status::Success => HOST_NO_ERROR,
            _ => HOST_FUNCTION_ERROR,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::NotFound => write!(f, "not found"),
            Status::ArityMismatch => write!(f, "arity mismatch"),
            Status::TypeMismatch => write!(f, "type mismatch"),
            Status::NativeFailure(code) => write!(f, "native failure ({})", code),
            Status::EncodingFailure => write!(f, "encoding failure"),
        }
    }
}
