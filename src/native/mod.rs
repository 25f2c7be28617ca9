//! Native library loading
//!
//! Binds C-ABI symbols from shared libraries as ordinary registry entries.
//! A Go `c-shared` build exports plain C functions, so a cgo library is
//! loaded exactly like a C one.
//!
//! ```text
//! square.json (NativeManifest)
//!       │
//!       ▼
//! LibraryLoader ──► DynamicLibrary (libloading)
//!       │
//!       ▼
//! bind(symbol, signature, failure) ──► NativeFn ──► FunctionRegistry
//! ```
//!
//! Only shapes that can be called soundly without a generic call builder
//! are bound: up to four C `int` arguments returning `int`, or up to four
//! `double` arguments returning `double`.

mod loader;
mod manifest;

use std::path::PathBuf;

use thiserror::Error;

use crate::marshal::Signature;

pub use loader::{bind, library_filename, DynamicLibrary, FailureConvention, LibraryLoader, MAX_NATIVE_ARGS};
pub use manifest::{register_manifest, ManifestExport, NativeManifest};

/// Errors raised while loading libraries and manifests
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("library '{0}' not found")]
    NotFound(String),

    #[error("failed to open library '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol '{symbol}' not found in '{}': {source}", library.display())]
    Symbol {
        symbol: String,
        library: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("invalid symbol name: '{0}'")]
    InvalidSymbol(String),

    #[error("cannot bind '{symbol}' with signature {signature}")]
    UnsupportedSignature { symbol: String, signature: Signature },

    #[error("failed to read manifest '{}': {source}", path.display())]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests;
