//! Host ABI
//!
//! The C calling convention the host uses to reach exported functions:
//!
//! ```text
//! int name(void *lib_data, int64_t argc, const HostArg *args, HostArg *res)
//! ```
//!
//! Every argument and the result travel as a tagged [`HostArg`] slot. The
//! entry path reads the slots into [`HostValue`]s, runs the call through the
//! dispatcher and writes the result slot. Failures are flattened to
//! [`HOST_FUNCTION_ERROR`]; the message behind the last failure on the
//! calling thread is kept for [`last_error_message`].
//!
//! Result strings and arrays are owned by the calling thread and stay valid
//! until that thread makes its next call.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use libc::{c_char, c_int};
use tracing::{debug, error, trace};

use crate::config::BridgeConfig;
use crate::dispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::{ModuleDefinition, ModuleLifecycle};
use crate::marshal::{HostValue, MarshalError};
use crate::pool::{BufferPool, PooledBuffer};

/// Call succeeded
pub const HOST_NO_ERROR: c_int = 0;
/// Call failed; see [`last_error_message`]
pub const HOST_FUNCTION_ERROR: c_int = 1;

/// Version of this calling convention, reported by `bridge_version`
pub const BRIDGE_ABI_VERSION: u32 = 1;

pub const TAG_NULL: u32 = 0;
pub const TAG_INTEGER: u32 = 1;
pub const TAG_REAL: u32 = 2;
pub const TAG_BOOLEAN: u32 = 3;
pub const TAG_STRING: u32 = 4;
pub const TAG_ARRAY: u32 = 5;

/// Array payload: `len` slots starting at `data`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostArray {
    pub data: *const HostArg,
    pub len: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union HostPayload {
    pub integer: i64,
    pub real: f64,
    pub boolean: u8,
    /// UTF-8, NUL-terminated
    pub string: *const c_char,
    pub array: HostArray,
}

/// One tagged argument or result slot
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostArg {
    pub tag: u32,
    pub payload: HostPayload,
}

impl HostArg {
    pub const fn null() -> Self {
        Self {
            tag: TAG_NULL,
            payload: HostPayload { integer: 0 },
        }
    }

    pub const fn integer(value: i64) -> Self {
        Self {
            tag: TAG_INTEGER,
            payload: HostPayload { integer: value },
        }
    }

    pub const fn real(value: f64) -> Self {
        Self {
            tag: TAG_REAL,
            payload: HostPayload { real: value },
        }
    }

    pub const fn boolean(value: bool) -> Self {
        Self {
            tag: TAG_BOOLEAN,
            payload: HostPayload { boolean: value as u8 },
        }
    }

    pub const fn string(ptr: *const c_char) -> Self {
        Self {
            tag: TAG_STRING,
            payload: HostPayload { string: ptr },
        }
    }

    pub const fn array(data: *const HostArg, len: usize) -> Self {
        Self {
            tag: TAG_ARRAY,
            payload: HostPayload {
                array: HostArray { data, len },
            },
        }
    }

    /// Read the slot into an owned [`HostValue`]
    ///
    /// # Safety
    ///
    /// String and array pointers in the slot, recursively, must be valid
    /// for reads.
    pub unsafe fn read(&self) -> Result<HostValue, MarshalError> {
        match self.tag {
            TAG_NULL => Ok(HostValue::Null),
            TAG_INTEGER => Ok(HostValue::Integer(self.payload.integer)),
            TAG_REAL => Ok(HostValue::Real(self.payload.real)),
            TAG_BOOLEAN => match self.payload.boolean {
                0 => Ok(HostValue::Boolean(false)),
                1 => Ok(HostValue::Boolean(true)),
                other => Err(MarshalError::Malformed(format!("boolean byte {}", other))),
            },
            TAG_STRING => {
                let ptr = self.payload.string;
                if ptr.is_null() {
                    return Err(MarshalError::Malformed("null string pointer".to_string()));
                }
                CStr::from_ptr(ptr)
                    .to_str()
                    .map(|s| HostValue::String(s.to_owned()))
                    .map_err(|_| MarshalError::Malformed("string is not valid UTF-8".to_string()))
            }
            TAG_ARRAY => {
                let HostArray { data, len } = self.payload.array;
                if len == 0 {
                    return Ok(HostValue::Array(Vec::new()));
                }
                if data.is_null() {
                    return Err(MarshalError::Malformed("null array pointer".to_string()));
                }
                std::slice::from_raw_parts(data, len)
                    .iter()
                    .enumerate()
                    .map(|(index, slot)| {
                        slot.read().map_err(|e| MarshalError::Element {
                            index,
                            inner: Box::new(e),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(HostValue::Array)
            }
            tag => Err(MarshalError::Malformed(format!("unknown tag {}", tag))),
        }
    }
}

impl Default for HostArg {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for HostArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Safety: each arm reads the field its tag selects
        unsafe {
            match self.tag {
                TAG_NULL => write!(f, "HostArg::Null"),
                TAG_INTEGER => write!(f, "HostArg::Integer({})", self.payload.integer),
                TAG_REAL => write!(f, "HostArg::Real({})", self.payload.real),
                TAG_BOOLEAN => write!(f, "HostArg::Boolean({})", self.payload.boolean),
                TAG_STRING => write!(f, "HostArg::String({:p})", self.payload.string),
                TAG_ARRAY => write!(f, "HostArg::Array({:?})", self.payload.array),
                tag => write!(f, "HostArg::Unknown({})", tag),
            }
        }
    }
}

/// Owned argument slots built from host values
///
/// For hosts written in Rust, and for driving exported symbols directly.
#[derive(Default)]
pub struct ArgBuffer {
    args: Vec<HostArg>,
    strings: Vec<CString>,
    arrays: Vec<Vec<HostArg>>,
}

impl ArgBuffer {
    pub fn from_values(values: &[HostValue]) -> Result<Self, MarshalError> {
        let mut buffer = Self::default();
        for value in values {
            let slot = buffer.slot(value)?;
            buffer.args.push(slot);
        }
        Ok(buffer)
    }

    fn slot(&mut self, value: &HostValue) -> Result<HostArg, MarshalError> {
        Ok(match value {
            HostValue::Null => HostArg::null(),
            HostValue::Integer(v) => HostArg::integer(*v),
            HostValue::Real(v) => HostArg::real(*v),
            HostValue::Boolean(v) => HostArg::boolean(*v),
            HostValue::String(s) => {
                let c = CString::new(s.as_str()).map_err(|_| MarshalError::InteriorNul)?;
                let ptr = c.as_ptr();
                self.strings.push(c);
                HostArg::string(ptr)
            }
            HostValue::Array(items) => {
                let elements = items
                    .iter()
                    .map(|item| self.slot(item))
                    .collect::<Result<Vec<_>, _>>()?;
                let slot = HostArg::array(elements.as_ptr(), elements.len());
                self.arrays.push(elements);
                slot
            }
        })
    }

    pub fn as_ptr(&self) -> *const HostArg {
        self.args.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument count in the host's integer type
    pub fn argc(&self) -> i64 {
        self.args.len() as i64
    }
}

/// Storage behind the result slot of the last call on this thread
#[derive(Default)]
struct ResultStore {
    buffers: Vec<PooledBuffer>,
    arrays: Vec<Vec<HostArg>>,
}

impl ResultStore {
    fn clear(&mut self) {
        self.buffers.clear();
        self.arrays.clear();
    }

    fn slot(&mut self, value: &HostValue, pool: &BufferPool) -> HostArg {
        match value {
            HostValue::Null => HostArg::null(),
            HostValue::Integer(v) => HostArg::integer(*v),
            HostValue::Real(v) => HostArg::real(*v),
            HostValue::Boolean(v) => HostArg::boolean(*v),
            HostValue::String(s) => {
                let mut buf = pool.acquire();
                let ptr = buf.write_c_str(s);
                self.buffers.push(buf);
                HostArg::string(ptr)
            }
            HostValue::Array(items) => {
                let elements: Vec<HostArg> = items.iter().map(|item| self.slot(item, pool)).collect();
                let slot = HostArg::array(elements.as_ptr(), elements.len());
                self.arrays.push(elements);
                slot
            }
        }
    }
}

thread_local! {
    static RESULTS: RefCell<ResultStore> = RefCell::new(ResultStore::default());
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the last failed call on this thread
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|message| message.to_string_lossy().into_owned())
    })
}

/// Pointer form of [`last_error_message`]; null when the last call
/// succeeded. Valid until the next call on this thread.
pub fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Generic entry path behind every exported function symbol
///
/// # Safety
///
/// `args` must point to `argc` readable slots (or may be null when `argc`
/// is 0) and `res` must be null or point to a writable slot.
pub unsafe fn invoke_exported(
    lifecycle: &ModuleLifecycle,
    name: &str,
    lib_data: *mut c_void,
    argc: i64,
    args: *const HostArg,
    res: *mut HostArg,
) -> c_int {
    clear_last_error();
    RESULTS.with(|store| store.borrow_mut().clear());
    trace!(name, lib_data = ?lib_data, argc, "host call");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| call_exported(lifecycle, name, argc, args, res)));
    match outcome {
        Ok(Ok(())) => HOST_NO_ERROR,
        Ok(Err(e)) => {
            debug!(name, status = %e.status(), error = %e, "host call failed");
            set_last_error(e.to_string());
            HOST_FUNCTION_ERROR
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(name, %message, "panic at host boundary");
            set_last_error(format!("{}: panic: {}", name, message));
            HOST_FUNCTION_ERROR
        }
    }
}

unsafe fn call_exported(
    lifecycle: &ModuleLifecycle,
    name: &str,
    argc: i64,
    args: *const HostArg,
    res: *mut HostArg,
) -> BridgeResult<()> {
    let module = lifecycle.current()?;
    let entry = module.registry().lookup(name)?;

    let malformed = |index: usize, reason: &str| BridgeError::TypeMismatch {
        name: name.to_string(),
        index,
        source: MarshalError::Malformed(reason.to_string()),
    };

    let argc = usize::try_from(argc).map_err(|_| malformed(0, "negative argument count"))?;
    let arity = entry.signature.arity();
    if argc != arity {
        return Err(BridgeError::ArityMismatch {
            name: name.to_string(),
            expected: arity,
            got: argc,
        });
    }
    if argc > 0 && args.is_null() {
        return Err(malformed(0, "null argument vector"));
    }
    if res.is_null() {
        return Err(BridgeError::EncodingFailure {
            name: name.to_string(),
            kind: entry.signature.ret.clone(),
            source: MarshalError::Malformed("null result slot".to_string()),
        });
    }

    let slots = if argc == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(args, argc)
    };
    let values = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.read().map_err(|source| BridgeError::TypeMismatch {
                name: name.to_string(),
                index,
                source,
            })
        })
        .collect::<BridgeResult<Vec<_>>>()?;

    let result = dispatch::invoke_entry(entry, &values)?;
    let slot = RESULTS.with(|store| store.borrow_mut().slot(&result, module.pool()));
    res.write(slot);
    Ok(())
}

/// Load `definition` into `lifecycle` on behalf of the host
///
/// Configuration comes from [`BridgeConfig::from_env`]. Loading an already
/// loaded module succeeds without re-initializing.
pub fn initialize(lifecycle: &ModuleLifecycle, definition: &ModuleDefinition, lib_data: *mut c_void) -> c_int {
    clear_last_error();
    let host_data = lib_data as usize;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let config = BridgeConfig::from_env()?;
        lifecycle.on_load_with_data(definition, &config, host_data)
    }));
    match outcome {
        Ok(Ok(_)) => HOST_NO_ERROR,
        Ok(Err(e)) => {
            error!(module = definition.name, error = %e, "initialization failed");
            set_last_error(e.to_string());
            HOST_FUNCTION_ERROR
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(module = definition.name, %message, "panic during initialization");
            set_last_error(format!("{}: panic during initialization: {}", definition.name, message));
            HOST_FUNCTION_ERROR
        }
    }
}

/// Unload whatever module `lifecycle` holds on behalf of the host
pub fn uninitialize(lifecycle: &ModuleLifecycle, lib_data: *mut c_void) {
    trace!(lib_data = ?lib_data, "host unload");
    RESULTS.with(|store| store.borrow_mut().clear());
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| lifecycle.on_unload())) {
        let message = panic_message(payload.as_ref());
        error!(%message, "panic during unload");
        set_last_error(format!("panic during unload: {}", message));
    }
}

/// Export one C symbol per name, each dispatching to the registry entry of
/// the same name on the process-wide lifecycle.
///
/// ```ignore
/// hostlink::export_functions!(square, cube);
/// ```
#[macro_export]
macro_rules! export_functions {
    ($($name:ident),+ $(,)?) => {
        $(
            /// # Safety
            ///
            /// Called by the host with `argc` valid argument slots and a
            /// writable result slot.
            #[no_mangle]
            pub unsafe extern "C" fn $name(
                lib_data: *mut ::std::ffi::c_void,
                argc: i64,
                args: *const $crate::host::HostArg,
                res: *mut $crate::host::HostArg,
            ) -> ::std::os::raw::c_int {
                $crate::host::invoke_exported(
                    $crate::lifecycle::global(),
                    stringify!($name),
                    lib_data,
                    argc,
                    args,
                    res,
                )
            }
        )+
    };
}

/// Export the module's load/unload hooks, ABI version and error accessor.
///
/// ```ignore
/// static MODULE: ModuleDefinition = ModuleDefinition::new("squares", EXPORTS);
/// hostlink::export_module!(MODULE);
/// ```
#[macro_export]
macro_rules! export_module {
    ($definition:expr) => {
        #[no_mangle]
        pub extern "C" fn bridge_initialize(lib_data: *mut ::std::ffi::c_void) -> ::std::os::raw::c_int {
            $crate::host::initialize($crate::lifecycle::global(), &$definition, lib_data)
        }

        #[no_mangle]
        pub extern "C" fn bridge_uninitialize(lib_data: *mut ::std::ffi::c_void) {
            $crate::host::uninitialize($crate::lifecycle::global(), lib_data)
        }

        #[no_mangle]
        pub extern "C" fn bridge_version() -> u32 {
            $crate::host::BRIDGE_ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn bridge_last_error() -> *const ::std::os::raw::c_char {
            $crate::host::last_error_ptr()
        }
    };
}
