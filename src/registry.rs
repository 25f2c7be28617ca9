//! Function Registry
//!
//! Maps exported symbol names to native functions and their signatures.
//! The registry is filled while a module loads and is read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::dispatch::CallFrame;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{NativeOutput, Signature};

/// Failure code signalled by a native function
///
/// Returned instead of a result; the dispatcher reports it as a native
/// failure and never hands it to the host as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError(pub i32);

impl NativeError {
    /// The native function panicked
    pub const PANICKED: NativeError = NativeError(-1000);
    /// The native function read an argument as the wrong kind or index
    pub const BAD_ACCESS: NativeError = NativeError(-1001);

    pub fn code(&self) -> i32 {
        self.0
    }
}

/// Result type of a native function
pub type NativeResult = Result<NativeOutput, NativeError>;

/// Native function callable by the dispatcher
pub type NativeFn = Arc<dyn Fn(&CallFrame<'_>) -> NativeResult + Send + Sync>;

/// Box a closure as a [`NativeFn`]
pub fn native_fn<F>(f: F) -> NativeFn
where
    F: Fn(&CallFrame<'_>) -> NativeResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One row of a static export table compiled into a module
#[derive(Clone, Copy)]
pub struct ExportDef {
    pub name: &'static str,
    /// Signature in `(kind, ...) -> kind` form
    pub signature: &'static str,
    pub func: fn(&CallFrame<'_>) -> NativeResult,
    pub description: &'static str,
    pub blocking: bool,
}

impl ExportDef {
    pub const fn new(
        name: &'static str,
        signature: &'static str,
        func: fn(&CallFrame<'_>) -> NativeResult,
    ) -> Self {
        Self {
            name,
            signature,
            func,
            description: "",
            blocking: false,
        }
    }

    pub const fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Mark the function as one that may block (I/O, locks)
    pub const fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

impl fmt::Debug for ExportDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportDef")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("blocking", &self.blocking)
            .finish()
    }
}

/// A registered function
pub struct RegistryEntry {
    pub name: String,
    pub signature: Signature,
    pub func: NativeFn,
    pub description: String,
    /// May block inside the native call
    pub blocking: bool,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, signature: Signature, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            signature,
            func,
            description: String::new(),
            blocking: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("blocking", &self.blocking)
            .finish()
    }
}

/// Registry of exported native functions
#[derive(Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static export table
    ///
    /// Fails on the first malformed row or duplicate name.
    pub fn from_table(table: &[ExportDef]) -> BridgeResult<Self> {
        let mut registry = Self::new();
        registry.register_table(table)?;
        Ok(registry)
    }

    pub fn register_table(&mut self, table: &[ExportDef]) -> BridgeResult<()> {
        for def in table {
            let signature =
                Signature::parse(def.signature).ok_or_else(|| BridgeError::InvalidSignature {
                    name: def.name.to_string(),
                    reason: format!("cannot parse '{}'", def.signature),
                })?;
            let func = def.func;
            let entry = RegistryEntry::new(def.name, signature, Arc::new(func))
                .with_description(def.description)
                .with_blocking(def.blocking);
            self.register_entry(entry)?;
        }
        Ok(())
    }

    /// Register a function under `name`
    pub fn register(&mut self, name: &str, signature: Signature, func: NativeFn) -> BridgeResult<()> {
        self.register_entry(RegistryEntry::new(name, signature, func))
    }

    pub fn register_entry(&mut self, entry: RegistryEntry) -> BridgeResult<()> {
        if !is_symbol_name(&entry.name) {
            return Err(BridgeError::InvalidName(entry.name));
        }
        entry
            .signature
            .validate()
            .map_err(|reason| BridgeError::InvalidSignature {
                name: entry.name.clone(),
                reason,
            })?;
        if self.entries.contains_key(&entry.name) {
            return Err(BridgeError::DuplicateName(entry.name));
        }

        debug!(
            name = %entry.name,
            signature = %entry.signature,
            blocking = entry.blocking,
            "registered native function"
        );
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> BridgeResult<&RegistryEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Whether `name` can be exported as a C symbol
fn is_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
