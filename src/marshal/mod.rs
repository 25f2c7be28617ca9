//! Type Marshaler
//!
//! Converts between the host's tagged values and native fixed-width values.
//!
//! ```text
//! HostValue ──decode(kind)──► NativeValue<'frame> ──► native fn
//!                                                        │
//! HostValue ◄──encode(kind)── NativeOutput ◄─────────────┘
//! ```
//!
//! Conversions are exact: a value whose kind differs from the declared kind
//! is rejected, never coerced.

mod types;
mod value;

pub use types::{Signature, ValueKind};
pub use value::{decode, encode, HostValue, MarshalError, NativeInt, NativeOutput, NativeValue};
