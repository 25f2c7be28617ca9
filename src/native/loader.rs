//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for opening shared libraries and binding
//! their symbols as native functions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libc::c_int;
use libloading::Library;
use tracing::{debug, warn};

use super::LoadError;
use crate::dispatch::CallFrame;
use crate::marshal::{NativeOutput, Signature, ValueKind};
use crate::registry::{native_fn, NativeError, NativeFn, NativeResult};

/// Largest argument count a symbol can be bound with
pub const MAX_NATIVE_ARGS: usize = 4;

/// A dynamically loaded library
pub struct DynamicLibrary {
    path: PathBuf,
    library: Library,
}

impl DynamicLibrary {
    /// Open a library from the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initializers. The path comes
        // from the module's own configuration.
        let library = unsafe {
            Library::new(&path).map_err(|source| LoadError::Open {
                path: path.clone(),
                source,
            })?
        };

        debug!(path = %path.display(), "opened native library");
        Ok(Self { path, library })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        // Safety: the symbol is only looked up, never called.
        unsafe { self.library.get::<*const ()>(name.as_bytes()).is_ok() }
    }

    /// Resolve `name` as a value of type `T`
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type, and the value must not be used
    /// after this library is dropped.
    pub unsafe fn symbol<T: Copy>(&self, name: &str) -> Result<T, LoadError> {
        if name.is_empty() || name.contains('\0') {
            return Err(LoadError::InvalidSymbol(name.to_string()));
        }
        let symbol = self
            .library
            .get::<T>(name.as_bytes())
            .map_err(|source| LoadError::Symbol {
                symbol: name.to_string(),
                library: self.path.clone(),
                source,
            })?;
        Ok(*symbol)
    }
}

impl std::fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// How a bound symbol reports failure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureConvention {
    /// Returned value meaning failure; the code is the value itself
    pub sentinel: Option<i64>,
    /// `int (*)(void)` consulted after each call; non-zero is a failure code
    pub error_symbol: Option<String>,
}

impl FailureConvention {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn sentinel(value: i64) -> Self {
        Self {
            sentinel: Some(value),
            error_symbol: None,
        }
    }

    pub fn error_symbol(symbol: impl Into<String>) -> Self {
        Self {
            sentinel: None,
            error_symbol: Some(symbol.into()),
        }
    }
}

type RawCall = Box<dyn Fn(&CallFrame<'_>) -> NativeResult + Send + Sync>;
type ErrorFn = unsafe extern "C" fn() -> c_int;

fn raw<F>(f: F) -> RawCall
where
    F: Fn(&CallFrame<'_>) -> NativeResult + Send + Sync + 'static,
{
    Box::new(f)
}

/// A resolved symbol together with the library that backs it
struct BoundSymbol {
    call: RawCall,
    sentinel: Option<i64>,
    error_fn: Option<ErrorFn>,
    _library: Arc<DynamicLibrary>,
}

impl BoundSymbol {
    fn invoke(&self, frame: &CallFrame<'_>) -> NativeResult {
        let output = (self.call)(frame)?;

        if let Some(error_fn) = self.error_fn {
            // Safety: resolved with this exact type and kept alive by `_library`
            let code = unsafe { error_fn() };
            if code != 0 {
                return Err(NativeError(code));
            }
        }

        if let Some(sentinel) = self.sentinel {
            let hit = match output {
                NativeOutput::Integer(v) => v == sentinel,
                NativeOutput::Real(v) => v == sentinel as f64,
                _ => false,
            };
            if hit {
                return Err(NativeError(sentinel as i32));
            }
        }

        Ok(output)
    }
}

enum Shape {
    Integer(usize),
    Real(usize),
}

fn shape_of(signature: &Signature) -> Option<Shape> {
    let arity = signature.arity();
    if arity > MAX_NATIVE_ARGS {
        return None;
    }
    match signature.ret {
        ValueKind::Integer if signature.args.iter().all(|k| *k == ValueKind::Integer) => {
            Some(Shape::Integer(arity))
        }
        ValueKind::Real if signature.args.iter().all(|k| *k == ValueKind::Real) => {
            Some(Shape::Real(arity))
        }
        _ => None,
    }
}

/// Bind `symbol` from `library` as a native function with `signature`
pub fn bind(
    library: &Arc<DynamicLibrary>,
    symbol: &str,
    signature: &Signature,
    failure: &FailureConvention,
) -> Result<NativeFn, LoadError> {
    let shape = shape_of(signature).ok_or_else(|| LoadError::UnsupportedSignature {
        symbol: symbol.to_string(),
        signature: signature.clone(),
    })?;

    let call = match shape {
        Shape::Integer(arity) => integer_call(library, symbol, arity)?,
        Shape::Real(arity) => real_call(library, symbol, arity)?,
    };
    let error_fn = match &failure.error_symbol {
        Some(name) => Some(unsafe { library.symbol::<ErrorFn>(name)? }),
        None => None,
    };
    if failure.sentinel.is_some() && failure.error_symbol.is_some() {
        warn!(symbol, "both sentinel and error symbol configured; error symbol checked first");
    }

    let bound = BoundSymbol {
        call,
        sentinel: failure.sentinel,
        error_fn,
        _library: Arc::clone(library),
    };
    debug!(symbol, signature = %signature, library = %library.path().display(), "bound native symbol");
    Ok(native_fn(move |frame| bound.invoke(frame)))
}

/// The returned call must not outlive `library`.
fn integer_call(library: &DynamicLibrary, symbol: &str, arity: usize) -> Result<RawCall, LoadError> {
    type I = c_int;
    let call = match arity {
        0 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn() -> I>(symbol)? };
            raw(move |_| Ok(NativeOutput::from(unsafe { f() })))
        }
        1 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(I) -> I>(symbol)? };
            raw(move |a| Ok(NativeOutput::from(unsafe { f(a.integer(0)?) })))
        }
        2 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(I, I) -> I>(symbol)? };
            raw(move |a| Ok(NativeOutput::from(unsafe { f(a.integer(0)?, a.integer(1)?) })))
        }
        3 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(I, I, I) -> I>(symbol)? };
            raw(move |a| {
                Ok(NativeOutput::from(unsafe {
                    f(a.integer(0)?, a.integer(1)?, a.integer(2)?)
                }))
            })
        }
        _ => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(I, I, I, I) -> I>(symbol)? };
            raw(move |a| {
                Ok(NativeOutput::from(unsafe {
                    f(a.integer(0)?, a.integer(1)?, a.integer(2)?, a.integer(3)?)
                }))
            })
        }
    };
    Ok(call)
}

/// The returned call must not outlive `library`.
fn real_call(library: &DynamicLibrary, symbol: &str, arity: usize) -> Result<RawCall, LoadError> {
    type D = f64;
    let call = match arity {
        0 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn() -> D>(symbol)? };
            raw(move |_| Ok(NativeOutput::from(unsafe { f() })))
        }
        1 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(D) -> D>(symbol)? };
            raw(move |a| Ok(NativeOutput::from(unsafe { f(a.real(0)?) })))
        }
        2 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(D, D) -> D>(symbol)? };
            raw(move |a| Ok(NativeOutput::from(unsafe { f(a.real(0)?, a.real(1)?) })))
        }
        3 => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(D, D, D) -> D>(symbol)? };
            raw(move |a| Ok(NativeOutput::from(unsafe { f(a.real(0)?, a.real(1)?, a.real(2)?) })))
        }
        _ => {
            let f = unsafe { library.symbol::<unsafe extern "C" fn(D, D, D, D) -> D>(symbol)? };
            raw(move |a| {
                Ok(NativeOutput::from(unsafe {
                    f(a.real(0)?, a.real(1)?, a.real(2)?, a.real(3)?)
                }))
            })
        }
    };
    Ok(call)
}

/// Library loader with search paths
pub struct LibraryLoader {
    search_paths: Vec<PathBuf>,
    libraries: HashMap<String, Arc<DynamicLibrary>>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
            libraries: HashMap::new(),
        }
    }

    /// Search `paths` before the platform defaults
    pub fn with_search_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut search_paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        search_paths.extend(default_search_paths());
        Self {
            search_paths,
            libraries: HashMap::new(),
        }
    }

    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.push(path.as_ref().to_path_buf());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find a library file by path or bare name
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.exists() {
            return Some(path.to_path_buf());
        }

        let file_name = library_filename(name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.exists())
    }

    /// Open a library, reusing it if already open
    ///
    /// Bare names not found on the search paths are handed to the system
    /// loader as a last resort. Paths are never rewritten.
    pub fn open(&mut self, name: &str) -> Result<Arc<DynamicLibrary>, LoadError> {
        if let Some(lib) = self.libraries.get(name) {
            return Ok(Arc::clone(lib));
        }

        let not_found = || LoadError::NotFound(name.to_string());
        let library = match self.find_library(name) {
            Some(path) => DynamicLibrary::open(path)?,
            None => {
                let system_name = system_loader_name(name).ok_or_else(not_found)?;
                DynamicLibrary::open(system_name).map_err(|_| not_found())?
            }
        };
        let library = Arc::new(library);
        self.libraries.insert(name.to_string(), Arc::clone(&library));
        Ok(library)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DynamicLibrary>> {
        self.libraries.get(name).cloned()
    }

    /// Forget a library; it closes once no bound function uses it
    pub fn unload(&mut self, name: &str) -> bool {
        self.libraries.remove(name).is_some()
    }

    /// Names of open libraries, sorted
    pub fn loaded_libraries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.libraries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Hand over every open library
    pub fn into_libraries(self) -> Vec<Arc<DynamicLibrary>> {
        self.libraries.into_values().collect()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn split_env_paths(var: &str, paths: &mut Vec<PathBuf>) {
    if let Some(value) = std::env::var_os(var) {
        paths.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
    }
}

/// Default library search paths for this platform
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        for dir in ["/usr/local/lib", "/usr/lib", "/usr/lib64", "/lib", "/lib64"] {
            paths.push(PathBuf::from(dir));
        }
        split_env_paths("LD_LIBRARY_PATH", &mut paths);
    }

    #[cfg(target_os = "macos")]
    {
        for dir in ["/usr/local/lib", "/usr/lib", "/opt/homebrew/lib"] {
            paths.push(PathBuf::from(dir));
        }
        split_env_paths("DYLD_LIBRARY_PATH", &mut paths);
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Windows\\System32"));
        split_env_paths("PATH", &mut paths);
    }

    paths
}

/// Name to hand to the system loader, for bare library names only
pub(crate) fn system_loader_name(name: &str) -> Option<String> {
    let path = Path::new(name);
    if name.is_empty() || path.is_absolute() || path.components().count() != 1 {
        return None;
    }
    Some(library_filename(name))
}

/// Platform file name for a library
///
/// Names that already look like a file name (`libm.so.6`, `foo.dll`) are
/// returned unchanged.
pub fn library_filename(name: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        if name.starts_with("lib") && (name.ends_with(".so") || name.contains(".so.")) {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }

    #[cfg(target_os = "macos")]
    {
        if name.starts_with("lib") && name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.to_ascii_lowercase().ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        name.to_string()
    }
}
