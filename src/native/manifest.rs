//! Native Export Manifest
//!
//! A JSON file describing which symbols of a shared library are exported to
//! the host and with what signatures:
//!
//! ```json
//! {
//!   "name": "gosquare",
//!   "library": "goSquare",
//!   "exports": [
//!     { "name": "square", "symbol": "GoSquare", "signature": "(integer) -> integer" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::loader::{bind, DynamicLibrary, FailureConvention, LibraryLoader};
use super::LoadError;
use crate::error::BridgeResult;
use crate::marshal::Signature;
use crate::registry::{FunctionRegistry, RegistryEntry};

/// Export manifest for one shared library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeManifest {
    /// Manifest name, used in logs
    pub name: String,

    /// Library path or bare name resolved by the loader
    pub library: String,

    /// Side-channel error function shared by every export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_symbol: Option<String>,

    #[serde(default)]
    pub exports: Vec<ManifestExport>,
}

impl NativeManifest {
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
            error_symbol: None,
            exports: Vec::new(),
        }
    }

    /// Load a manifest from a file
    ///
    /// A relative library path containing a directory is taken relative to
    /// the manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_json(&content)?;

        let library = Path::new(&manifest.library);
        if library.is_relative() && library.components().count() > 1 {
            if let Some(dir) = path.parent() {
                manifest.library = dir.join(library).display().to_string();
            }
        }
        Ok(manifest)
    }

    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_export(mut self, export: ManifestExport) -> Self {
        self.exports.push(export);
        self
    }

    /// Failure convention for `export`
    pub fn failure_for(&self, export: &ManifestExport) -> FailureConvention {
        FailureConvention {
            sentinel: export.sentinel,
            error_symbol: self.error_symbol.clone(),
        }
    }
}

/// One exported function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestExport {
    /// Name the host calls
    pub name: String,

    /// Symbol in the library, if different from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    pub signature: Signature,

    #[serde(default)]
    pub description: String,

    /// Return value meaning failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<i64>,

    #[serde(default)]
    pub blocking: bool,
}

impl ManifestExport {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            symbol: None,
            signature,
            description: String::new(),
            sentinel: None,
            blocking: false,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_sentinel(mut self, sentinel: i64) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Symbol looked up in the library
    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.name)
    }
}

/// Open the manifest's library and register every export
///
/// Fails on the first export that cannot be bound or registered.
pub fn register_manifest(
    registry: &mut FunctionRegistry,
    loader: &mut LibraryLoader,
    manifest: &NativeManifest,
) -> BridgeResult<Arc<DynamicLibrary>> {
    let library = loader.open(&manifest.library)?;

    for export in &manifest.exports {
        let func = bind(
            &library,
            export.symbol(),
            &export.signature,
            &manifest.failure_for(export),
        )?;
        let entry = RegistryEntry::new(export.name.clone(), export.signature.clone(), func)
            .with_description(export.description.clone())
            .with_blocking(export.blocking);
        registry.register_entry(entry)?;
    }

    info!(
        manifest = %manifest.name,
        library = %library.path().display(),
        exports = manifest.exports.len(),
        "registered native manifest"
    );
    Ok(library)
}
