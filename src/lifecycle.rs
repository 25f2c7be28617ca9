//! Module Lifecycle
//!
//! Brackets the active lifetime of a native module between the host's load
//! and unload notifications. Loading builds everything calls need (registry,
//! result buffer pool, opened libraries) and publishes it as one
//! [`LoadedModule`]; unloading unpublishes it.
//!
//! ```text
//!            on_load                      on_unload
//! Unloaded ──────────► Loaded(Arc<LoadedModule>) ──────────► Unloaded
//!    ▲   on_load again: AlreadyLoaded   │  on_unload again: no-op
//!    └──────────────────────────────────┘
//! ```
//!
//! Calls clone the published `Arc` and run without holding any lock, so a
//! module unloaded mid-call stays alive until that call returns. The
//! module's `teardown` hook and the pool drain run when the last reference
//! is dropped, never underneath a running call.
//!
//! Logging is installed only once a load has fully succeeded; a refused
//! load leaves the host's global subscriber untouched.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, BridgeResult, Status};
use crate::logging;
use crate::marshal::HostValue;
use crate::native::{register_manifest, DynamicLibrary, LibraryLoader, NativeManifest};
use crate::pool::BufferPool;
use crate::registry::{ExportDef, FunctionRegistry};

/// Static description of a native module
#[derive(Debug, Clone, Copy)]
pub struct ModuleDefinition {
    pub name: &'static str,
    pub exports: &'static [ExportDef],
    /// Runs before anything is registered; `Err(code)` refuses the load
    pub init: Option<fn() -> Result<(), i32>>,
    /// Runs once after unload, when no call is using the module any more
    pub teardown: Option<fn()>,
}

impl ModuleDefinition {
    pub const fn new(name: &'static str, exports: &'static [ExportDef]) -> Self {
        Self {
            name,
            exports,
            init: None,
            teardown: None,
        }
    }

    pub const fn with_init(mut self, init: fn() -> Result<(), i32>) -> Self {
        self.init = Some(init);
        self
    }

    pub const fn with_teardown(mut self, teardown: fn()) -> Self {
        self.teardown = Some(teardown);
        self
    }
}

/// Everything a loaded module owns
pub struct LoadedModule {
    name: &'static str,
    dispatcher: Dispatcher,
    pool: BufferPool,
    libraries: Vec<Arc<DynamicLibrary>>,
    teardown: Option<fn()>,
    host_data: usize,
}

impl LoadedModule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &FunctionRegistry {
        self.dispatcher.registry()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn libraries(&self) -> &[Arc<DynamicLibrary>] {
        &self.libraries
    }

    /// Opaque host handle passed at load, as an address
    pub fn host_data(&self) -> usize {
        self.host_data
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown {
            teardown();
        }
        let drained = self.pool.drain();
        debug!(module = self.name, drained, "module released");
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("functions", &self.registry().names())
            .field("libraries", &self.libraries)
            .finish()
    }
}

/// Result of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// A module was already loaded; nothing was re-initialized
    AlreadyLoaded,
}

/// Load/unload state machine for one module slot
pub struct ModuleLifecycle {
    current: RwLock<Option<Arc<LoadedModule>>>,
    /// Serializes load and unload
    transition: Mutex<()>,
}

impl ModuleLifecycle {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            transition: Mutex::new(()),
        }
    }

    pub fn on_load(&self, definition: &ModuleDefinition, config: &BridgeConfig) -> BridgeResult<LoadOutcome> {
        self.on_load_with_data(definition, config, 0)
    }

    /// Load `definition`, recording the host's opaque handle
    ///
    /// Nothing is published unless every step succeeds.
    pub fn on_load_with_data(
        &self,
        definition: &ModuleDefinition,
        config: &BridgeConfig,
        host_data: usize,
    ) -> BridgeResult<LoadOutcome> {
        let _guard = self.transition.lock();
        if let Some(loaded) = self.current.read().as_ref() {
            info!(module = loaded.name, "module already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        if let Some(init) = definition.init {
            init().map_err(|code| BridgeError::InitFailed {
                module: definition.name.to_string(),
                code,
            })?;
        }

        let (registry, libraries) = match build_registry(definition, config) {
            Ok(built) => built,
            Err(e) => {
                warn!(module = definition.name, error = %e, "module refused to load");
                if let Some(teardown) = definition.teardown {
                    teardown();
                }
                return Err(e);
            }
        };

        if config.logging.enabled {
            logging::init(&config.logging);
        }

        let module = LoadedModule {
            name: definition.name,
            dispatcher: Dispatcher::new(Arc::new(registry)),
            pool: BufferPool::from_config(&config.pool),
            libraries,
            teardown: definition.teardown,
            host_data,
        };
        info!(
            module = module.name,
            functions = module.registry().len(),
            libraries = module.libraries.len(),
            "module loaded"
        );
        *self.current.write() = Some(Arc::new(module));
        Ok(LoadOutcome::Loaded)
    }

    /// Unload the current module
    ///
    /// Returns `false` if nothing was loaded.
    pub fn on_unload(&self) -> bool {
        let _guard = self.transition.lock();
        let Some(module) = self.current.write().take() else {
            return false;
        };

        info!(
            module = module.name,
            in_flight = Arc::strong_count(&module) - 1,
            "module unloaded"
        );
        true
    }

    pub fn current(&self) -> BridgeResult<Arc<LoadedModule>> {
        self.current.read().clone().ok_or(BridgeError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Invoke `name` on the loaded module
    pub fn invoke(&self, name: &str, args: &[HostValue]) -> (HostValue, Status) {
        match self.current() {
            Ok(module) => module.dispatcher().invoke(name, args),
            Err(e) => (HostValue::Null, e.status()),
        }
    }
}

impl Default for ModuleLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

fn build_registry(
    definition: &ModuleDefinition,
    config: &BridgeConfig,
) -> BridgeResult<(FunctionRegistry, Vec<Arc<DynamicLibrary>>)> {
    let mut registry = FunctionRegistry::from_table(definition.exports)?;

    let mut loader = LibraryLoader::with_search_paths(&config.native.search_paths);
    for path in &config.native.manifests {
        let manifest = NativeManifest::load(path)?;
        register_manifest(&mut registry, &mut loader, &manifest)?;
    }
    Ok((registry, loader.into_libraries()))
}

static GLOBAL: Lazy<ModuleLifecycle> = Lazy::new(ModuleLifecycle::new);

/// The process-wide lifecycle behind the exported C symbols
pub fn global() -> &'static ModuleLifecycle {
    &GLOBAL
}
