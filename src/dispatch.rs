//! Call Dispatcher
//!
//! Validates a host call against the registered signature, decodes every
//! argument into a [`CallFrame`], runs the native function and encodes its
//! result.
//!
//! Arguments are validated before anything executes: a call that fails
//! arity or kind checks never reaches native code.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::error::{BridgeError, BridgeResult, Status};
use crate::marshal::{self, HostValue, NativeInt, NativeOutput, NativeValue, Signature};
use crate::registry::{FunctionRegistry, NativeError, RegistryEntry};

/// Decoded arguments of one invocation
///
/// Lives on the dispatching thread's stack for the duration of the call.
/// Borrowed strings point into the host's argument values.
#[derive(Debug)]
pub struct CallFrame<'a> {
    name: &'a str,
    args: Vec<NativeValue<'a>>,
}

impl<'a> CallFrame<'a> {
    /// Decode `args` against `signature`
    ///
    /// Stops at the first argument that does not match.
    pub fn decode(name: &'a str, signature: &Signature, args: &'a [HostValue]) -> BridgeResult<Self> {
        let mut decoded = Vec::with_capacity(args.len());
        for (index, (value, kind)) in args.iter().zip(&signature.args).enumerate() {
            let native = marshal::decode(value, kind).map_err(|source| BridgeError::TypeMismatch {
                name: name.to_string(),
                index,
                source,
            })?;
            decoded.push(native);
        }
        Ok(Self {
            name,
            args: decoded,
        })
    }

    /// Build a frame from already-native values
    pub fn from_values(name: &'a str, args: Vec<NativeValue<'a>>) -> Self {
        Self { name, args }
    }

    /// Name of the function being called
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn args(&self) -> &[NativeValue<'a>] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NativeValue<'a>> {
        self.args.get(index)
    }

    pub fn integer(&self, index: usize) -> Result<NativeInt, NativeError> {
        self.get(index)
            .and_then(NativeValue::as_integer)
            .ok_or(NativeError::BAD_ACCESS)
    }

    pub fn real(&self, index: usize) -> Result<f64, NativeError> {
        self.get(index)
            .and_then(NativeValue::as_real)
            .ok_or(NativeError::BAD_ACCESS)
    }

    pub fn boolean(&self, index: usize) -> Result<bool, NativeError> {
        self.get(index)
            .and_then(NativeValue::as_bool)
            .ok_or(NativeError::BAD_ACCESS)
    }

    pub fn string(&self, index: usize) -> Result<&'a str, NativeError> {
        self.get(index)
            .and_then(NativeValue::as_str)
            .ok_or(NativeError::BAD_ACCESS)
    }

    pub fn array(&self, index: usize) -> Result<&[NativeValue<'a>], NativeError> {
        self.get(index)
            .and_then(NativeValue::as_array)
            .ok_or(NativeError::BAD_ACCESS)
    }
}

/// Dispatches host calls to registered native functions
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Invoke `name` and report the outcome as a status
    ///
    /// On failure the result is [`HostValue::Null`].
    pub fn invoke(&self, name: &str, args: &[HostValue]) -> (HostValue, Status) {
        match self.try_invoke(name, args) {
            Ok(value) => (value, Status::Success),
            Err(e) => (HostValue::Null, e.status()),
        }
    }

    /// Invoke `name`, keeping the detailed error
    pub fn try_invoke(&self, name: &str, args: &[HostValue]) -> BridgeResult<HostValue> {
        let result = self
            .registry
            .lookup(name)
            .and_then(|entry| invoke_entry(entry, args));
        if let Err(e) = &result {
            debug!(name, status = %e.status(), error = %e, "invocation failed");
        }
        result
    }
}

/// Run one call against a resolved entry
pub fn invoke_entry(entry: &RegistryEntry, args: &[HostValue]) -> BridgeResult<HostValue> {
    let signature = &entry.signature;
    if args.len() != signature.arity() {
        return Err(BridgeError::ArityMismatch {
            name: entry.name.clone(),
            expected: signature.arity(),
            got: args.len(),
        });
    }

    let frame = CallFrame::decode(&entry.name, signature, args)?;
    trace!(name = %entry.name, args = frame.len(), blocking = entry.blocking, "invoking native function");

    let output = call_native(entry, &frame)?;
    drop(frame);

    marshal::encode(output, &signature.ret).map_err(|source| BridgeError::EncodingFailure {
        name: entry.name.clone(),
        kind: signature.ret.clone(),
        source,
    })
}

/// Call the native function, containing any panic
fn call_native(entry: &RegistryEntry, frame: &CallFrame<'_>) -> BridgeResult<NativeOutput> {
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.func)(frame))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(NativeError(code))) => Err(BridgeError::NativeFailure {
            name: entry.name.clone(),
            code,
        }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(name = %entry.name, %message, "native function panicked");
            Err(BridgeError::NativeFailure {
                name: entry.name.clone(),
                code: NativeError::PANICKED.code(),
            })
        }
    }
}
