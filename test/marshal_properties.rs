//! Property-based tests for marshaling and dispatch.
//!
//! Random host values are pushed through decode/encode and through a
//! dispatcher to check that conversions are exact, that arity and kind
//! checks never let a bad call through, and that ABI slots round-trip.

use std::sync::Arc;

use hostlink::{
    decode, encode, ArgBuffer, CallFrame, Dispatcher, ExportDef, FunctionRegistry, HostValue,
    MarshalError, NativeOutput, NativeResult, NativeValue, Status, ValueKind,
};
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn square(frame: &CallFrame<'_>) -> NativeResult {
    let n = frame.integer(0)? as i64;
    Ok(NativeOutput::Integer(n * n))
}

fn concat(frame: &CallFrame<'_>) -> NativeResult {
    Ok(NativeOutput::String(format!("{}{}", frame.string(0)?, frame.string(1)?)))
}

static EXPORTS: &[ExportDef] = &[
    ExportDef::new("square", "(integer) -> integer", square),
    ExportDef::new("concat", "(string, string) -> string", concat),
];

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(FunctionRegistry::from_table(EXPORTS).unwrap()))
}

/// Any host value, nested arrays included.
fn host_value() -> impl Strategy<Value = HostValue> {
    let leaf = prop_oneof![
        Just(HostValue::Null),
        any::<i64>().prop_map(HostValue::Integer),
        any::<f64>().prop_map(HostValue::Real),
        any::<bool>().prop_map(HostValue::Boolean),
        "[a-z ]{0,12}".prop_map(HostValue::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop::collection::vec(inner, 0..6).prop_map(HostValue::Array)
    })
}

/// A scalar value that is not an integer.
fn non_integer() -> impl Strategy<Value = HostValue> {
    prop_oneof![
        Just(HostValue::Null),
        any::<f64>().prop_map(HostValue::Real),
        any::<bool>().prop_map(HostValue::Boolean),
        ".{0,8}".prop_map(HostValue::String),
    ]
}

// ============================================================================
// Round trips
// ============================================================================

proptest! {
    #[test]
    fn native_integer_round_trip(x in any::<i32>()) {
        let host = encode(NativeOutput::from(x), &ValueKind::Integer).unwrap();
        prop_assert_eq!(decode(&host, &ValueKind::Integer), Ok(NativeValue::Integer(x)));
    }

    #[test]
    fn host_integers_decode_iff_in_range(x in any::<i64>()) {
        let host = HostValue::Integer(x);
        let result = decode(&host, &ValueKind::Integer);
        if let Ok(native) = i32::try_from(x) {
            prop_assert_eq!(result, Ok(NativeValue::Integer(native)));
        } else {
            prop_assert_eq!(result, Err(MarshalError::OutOfRange(x)));
        }
    }

    #[test]
    fn strings_decode_borrowed(s in ".{0,32}") {
        let host = HostValue::String(s.clone());
        prop_assert_eq!(decode(&host, &ValueKind::String), Ok(NativeValue::Str(s.as_str())));
    }

    #[test]
    fn abi_slots_round_trip(value in host_value()) {
        let args = ArgBuffer::from_values(std::slice::from_ref(&value)).unwrap();
        let read = unsafe { (*args.as_ptr()).read() }.unwrap();
        match (&read, &value) {
            // NaN never equals itself
            (HostValue::Real(a), HostValue::Real(b)) => prop_assert_eq!(a.to_bits(), b.to_bits()),
            _ => {
                if !contains_nan(&value) {
                    prop_assert_eq!(&read, &value);
                }
            }
        }
    }
}

fn contains_nan(value: &HostValue) -> bool {
    match value {
        HostValue::Real(v) => v.is_nan(),
        HostValue::Array(items) => items.iter().any(contains_nan),
        _ => false,
    }
}

// ============================================================================
// Dispatch
// ============================================================================

proptest! {
    #[test]
    fn square_matches_native_arithmetic(x in any::<i32>()) {
        let (result, status) = dispatcher().invoke("square", &[HostValue::Integer(x as i64)]);
        prop_assert_eq!(status, Status::Success);
        prop_assert_eq!(result, HostValue::Integer(x as i64 * x as i64));
    }

    #[test]
    fn wrong_arity_always_rejected(args in prop::collection::vec(host_value(), 0..6)) {
        prop_assume!(args.len() != 1);
        let (result, status) = dispatcher().invoke("square", &args);
        prop_assert_eq!(status, Status::ArityMismatch);
        prop_assert_eq!(result, HostValue::Null);
    }

    #[test]
    fn wrong_kind_always_rejected(arg in non_integer()) {
        let (result, status) = dispatcher().invoke("square", &[arg]);
        prop_assert_eq!(status, Status::TypeMismatch);
        prop_assert_eq!(result, HostValue::Null);
    }

    #[test]
    fn any_value_for_integer_is_accepted_only_in_range(arg in host_value()) {
        let in_range = matches!(arg, HostValue::Integer(v) if i32::try_from(v).is_ok());
        let (_, status) = dispatcher().invoke("square", &[arg]);
        prop_assert_eq!(status.is_success(), in_range);
    }

    #[test]
    fn strings_concatenate(a in "[a-z]{0,10}", b in "[a-z]{0,10}") {
        let (result, status) = dispatcher().invoke(
            "concat",
            &[HostValue::String(a.clone()), HostValue::String(b.clone())],
        );
        prop_assert_eq!(status, Status::Success);
        prop_assert_eq!(result, HostValue::String(format!("{}{}", a, b)));
    }
}
