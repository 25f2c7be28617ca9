//! Hostlink - Typed Foreign-Function Bridge
//!
//! Exposes native, statically compiled functions to an embedding host
//! (a numerical or symbolic computing environment) through a stable,
//! versioned C calling convention.
//!
//! # Features
//!
//! - **Exact marshaling**: host values are checked against each function's
//!   declared signature and never coerced
//! - **Validated dispatch**: arity and argument kinds are checked before any
//!   native code runs
//! - **Lifecycle management**: one-time load and unload with process-wide
//!   state owned by the loaded module
//! - **Error translation**: structured errors inside, a flat status code at
//!   the host boundary, no panic crossing it
//! - **Native libraries**: C and Go (`c-shared`) symbols bound from shared
//!   objects through JSON export manifests
//!
//! # Example
//!
//! ```rust
//! use hostlink::{
//!     BridgeConfig, CallFrame, ExportDef, HostValue, ModuleDefinition, ModuleLifecycle,
//!     NativeOutput, NativeResult, Status,
//! };
//!
//! fn square(frame: &CallFrame<'_>) -> NativeResult {
//!     let n = frame.integer(0)? as i64;
//!     Ok(NativeOutput::Integer(n * n))
//! }
//!
//! static EXPORTS: &[ExportDef] = &[ExportDef::new("square", "(integer) -> integer", square)];
//! static MODULE: ModuleDefinition = ModuleDefinition::new("squares", EXPORTS);
//!
//! let lifecycle = ModuleLifecycle::new();
//! lifecycle.on_load(&MODULE, &BridgeConfig::default()).unwrap();
//!
//! let (result, status) = lifecycle.invoke("square", &[HostValue::Integer(7)]);
//! assert_eq!(status, Status::Success);
//! assert_eq!(result, HostValue::Integer(49));
//!
//! lifecycle.on_unload();
//! ```
//!
//! A module compiled as a `cdylib` exposes the same functions to the host
//! with [`export_module!`] and [`export_functions!`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │      Host       │  int square(lib_data, argc, args, res)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Host ABI     │  HostArg slots, status codes, last error
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌───────────────┐
//! │   Dispatcher    │ ───► │   Registry    │  name → (signature, fn)
//! └────────┬────────┘      └───────────────┘
//!          │ decode / encode
//!          ▼
//! ┌─────────────────┐
//! │ Native function │  Rust fn, or C symbol via libloading
//! └─────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod marshal;
pub mod native;
pub mod pool;
pub mod registry;

pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use dispatch::{CallFrame, Dispatcher};
pub use error::{BridgeError, BridgeResult, Status};
pub use host::{
    last_error_message, ArgBuffer, HostArg, BRIDGE_ABI_VERSION, HOST_FUNCTION_ERROR, HOST_NO_ERROR,
};
pub use lifecycle::{LoadOutcome, LoadedModule, ModuleDefinition, ModuleLifecycle};
pub use marshal::{
    decode, encode, HostValue, MarshalError, NativeInt, NativeOutput, NativeValue, Signature,
    ValueKind,
};
pub use native::{
    bind, register_manifest, DynamicLibrary, FailureConvention, LibraryLoader, LoadError,
    ManifestExport, NativeManifest,
};
pub use pool::{BufferPool, PooledBuffer};
pub use registry::{native_fn, ExportDef, FunctionRegistry, NativeError, NativeFn, NativeResult, RegistryEntry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
