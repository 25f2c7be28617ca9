//! Native Loading Tests

use super::*;
use crate::dispatch::CallFrame;
use crate::marshal::{NativeOutput, NativeValue, ValueKind};
use crate::registry::{FunctionRegistry, NativeError};
use std::sync::Arc;

#[cfg(target_os = "linux")]
const LIBC: &str = "libc.so.6";
#[cfg(target_os = "linux")]
const LIBM: &str = "libm.so.6";

#[test]
fn test_library_filename() {
    #[cfg(target_os = "linux")]
    {
        assert_eq!(library_filename("goSquare"), "libgoSquare.so");
        assert_eq!(library_filename("libgoSquare.so"), "libgoSquare.so");
        assert_eq!(library_filename("libm.so.6"), "libm.so.6");
    }

    #[cfg(target_os = "macos")]
    {
        assert_eq!(library_filename("goSquare"), "libgoSquare.dylib");
        assert_eq!(library_filename("libgoSquare.dylib"), "libgoSquare.dylib");
    }

    #[cfg(target_os = "windows")]
    {
        assert_eq!(library_filename("goSquare"), "goSquare.dll");
        assert_eq!(library_filename("goSquare.DLL"), "goSquare.DLL");
    }
}

#[test]
fn test_loader_search_paths() {
    let loader = LibraryLoader::with_search_paths(["/opt/native/lib"]);
    assert_eq!(loader.search_paths()[0], std::path::PathBuf::from("/opt/native/lib"));
    assert!(loader.loaded_libraries().is_empty());
}

#[test]
fn test_system_loader_only_sees_bare_names() {
    use super::loader::system_loader_name;

    assert_eq!(system_loader_name("m"), Some(library_filename("m")));
    assert_eq!(system_loader_name("goSquare"), Some(library_filename("goSquare")));
    assert_eq!(system_loader_name("/abs/libx.so"), None);
    assert_eq!(system_loader_name("lib/libx.so"), None);
    assert_eq!(system_loader_name("./libx.so"), None);
    assert_eq!(system_loader_name(""), None);
}

#[test]
fn test_missing_library_path_is_not_rewritten() {
    let mut loader = LibraryLoader::new();
    let err = loader.open("/nonexistent/hostlink/libx.so").unwrap_err();
    assert!(matches!(err, LoadError::NotFound(name) if name == "/nonexistent/hostlink/libx.so"));
}

#[test]
fn test_missing_library() {
    let mut loader = LibraryLoader::new();
    let err = loader.open("definitely_not_a_real_library_xyz").unwrap_err();
    assert!(matches!(err, LoadError::NotFound(name) if name == "definitely_not_a_real_library_xyz"));
}

#[test]
fn test_manifest_parsing() {
    let json = r#"{
        "name": "gosquare",
        "library": "goSquare",
        "error_symbol": "GoLastError",
        "exports": [
            { "name": "square", "symbol": "GoSquare", "signature": "(integer) -> integer", "sentinel": -1 },
            { "name": "slow", "signature": "(real) -> real", "blocking": true, "description": "sleeps" }
        ]
    }"#;
    let manifest = NativeManifest::from_json(json).unwrap();
    assert_eq!(manifest.name, "gosquare");
    assert_eq!(manifest.exports.len(), 2);

    let square = &manifest.exports[0];
    assert_eq!(square.symbol(), "GoSquare");
    assert_eq!(square.signature.args, vec![ValueKind::Integer]);
    assert_eq!(
        manifest.failure_for(square),
        FailureConvention {
            sentinel: Some(-1),
            error_symbol: Some("GoLastError".to_string()),
        }
    );

    let slow = &manifest.exports[1];
    assert_eq!(slow.symbol(), "slow");
    assert!(slow.blocking);
    assert_eq!(slow.description, "sleeps");
}

#[test]
fn test_manifest_rejects_bad_signature() {
    let json = r#"{ "name": "m", "library": "x", "exports": [ { "name": "f", "signature": "int -> int" } ] }"#;
    assert!(matches!(
        NativeManifest::from_json(json),
        Err(LoadError::ManifestParse(_))
    ));
}

#[test]
fn test_manifest_rejects_64_bit_integers() {
    // labs takes and returns a C long, which no bound shape can call
    let json = r#"{ "name": "libc", "library": "libc.so.6",
                    "exports": [ { "name": "labs", "signature": "(i64) -> i64" } ] }"#;
    assert!(matches!(
        NativeManifest::from_json(json),
        Err(LoadError::ManifestParse(_))
    ));
}

#[test]
fn test_manifest_json_round_trip() {
    let manifest = NativeManifest::new("gosquare", "goSquare").with_export(
        ManifestExport::new("square", Signature::parse("(integer) -> integer").unwrap())
            .with_symbol("GoSquare")
            .with_sentinel(-1),
    );
    let json = manifest.to_json().unwrap();
    assert!(json.contains("\"(integer) -> integer\""));
    assert_eq!(NativeManifest::from_json(&json).unwrap(), manifest);
}

#[test]
fn test_manifest_load_missing_file() {
    assert!(matches!(
        NativeManifest::load("/nonexistent/square.json"),
        Err(LoadError::ManifestIo { .. })
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn test_bind_libc_abs() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };

    let sig = Signature::parse("(integer) -> integer").unwrap();
    let abs = bind(&libc, "abs", &sig, &FailureConvention::none()).unwrap();

    let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(-42)]);
    assert_eq!(abs(&frame), Ok(NativeOutput::Integer(42)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_bind_libm_cos() {
    let mut loader = LibraryLoader::new();
    let Ok(libm) = loader.open(LIBM) else {
        return;
    };

    let sig = Signature::parse("(real) -> real").unwrap();
    let cos = bind(&libm, "cos", &sig, &FailureConvention::none()).unwrap();

    let frame = CallFrame::from_values("cos", vec![NativeValue::Real(0.0)]);
    assert_eq!(cos(&frame), Ok(NativeOutput::Real(1.0)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_sentinel_becomes_failure() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };

    let sig = Signature::parse("(integer) -> integer").unwrap();
    let abs = bind(&libc, "abs", &sig, &FailureConvention::sentinel(7)).unwrap();

    let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(-7)]);
    assert_eq!(abs(&frame), Err(NativeError(7)));

    let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(-8)]);
    assert_eq!(abs(&frame), Ok(NativeOutput::Integer(8)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_unsupported_shapes() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };

    for sig in [
        "(string) -> integer",
        "(integer, real) -> integer",
        "(integer) -> real",
        "(integer, integer, integer, integer, integer) -> integer",
        "() -> void",
    ] {
        let sig = Signature::parse(sig).unwrap();
        let err = bind(&libc, "abs", &sig, &FailureConvention::none()).err();
        assert!(
            matches!(err, Some(LoadError::UnsupportedSignature { .. })),
            "{} should be unsupported",
            sig
        );
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_missing_symbol() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };
    assert!(libc.has_symbol("abs"));
    assert!(!libc.has_symbol("no_such_symbol_xyz"));

    let sig = Signature::parse("(integer) -> integer").unwrap();
    let err = bind(&libc, "no_such_symbol_xyz", &sig, &FailureConvention::none()).err();
    assert!(matches!(err, Some(LoadError::Symbol { .. })));
}

#[cfg(target_os = "linux")]
#[test]
fn test_register_manifest_and_reuse_library() {
    let mut loader = LibraryLoader::new();
    if loader.open(LIBC).is_err() {
        return;
    }

    let manifest = NativeManifest::new("libc", LIBC).with_export(
        ManifestExport::new("absolute", Signature::parse("(integer) -> integer").unwrap())
            .with_symbol("abs"),
    );
    let mut registry = FunctionRegistry::new();
    let library = register_manifest(&mut registry, &mut loader, &manifest).unwrap();

    assert!(Arc::ptr_eq(&library, &loader.get(LIBC).unwrap()));
    let entry = registry.lookup("absolute").unwrap();
    let frame = CallFrame::from_values("absolute", vec![NativeValue::Integer(-3)]);
    assert_eq!((entry.func)(&frame), Ok(NativeOutput::Integer(3)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_bind_libc_abs_negative_argument() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };

    let sig = Signature::parse("(int) -> int").unwrap();
    let abs = bind(&libc, "abs", &sig, &FailureConvention::none()).unwrap();
    for (n, expected) in [(-5, 5), (i32::MIN + 1, i32::MAX as i64), (0, 0)] {
        let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(n)]);
        assert_eq!(abs(&frame), Ok(NativeOutput::Integer(expected)));
    }
}

/// `getppid` stands in for a Go-style last-error export that always reports
/// a failure.
#[cfg(target_os = "linux")]
fn parent_pid() -> Option<i32> {
    let ppid = unsafe { libc::getppid() };
    (ppid != 0).then_some(ppid)
}

#[cfg(target_os = "linux")]
#[test]
fn test_error_symbol_becomes_failure() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };
    let Some(code) = parent_pid() else {
        return;
    };

    let sig = Signature::parse("(integer) -> integer").unwrap();
    let abs = bind(&libc, "abs", &sig, &FailureConvention::error_symbol("getppid")).unwrap();

    let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(-9)]);
    assert_eq!(abs(&frame), Err(NativeError(code)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_error_symbol_checked_before_sentinel() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };
    let Some(code) = parent_pid() else {
        return;
    };

    let sig = Signature::parse("(integer) -> integer").unwrap();
    if code == 5 {
        return;
    }
    let failure = FailureConvention {
        sentinel: Some(5),
        error_symbol: Some("getppid".to_string()),
    };
    let abs = bind(&libc, "abs", &sig, &failure).unwrap();

    // abs(-5) hits the sentinel too, but the error symbol's code wins
    let frame = CallFrame::from_values("abs", vec![NativeValue::Integer(-5)]);
    assert_eq!(abs(&frame), Err(NativeError(code)));
}

#[cfg(target_os = "linux")]
#[test]
fn test_missing_error_symbol() {
    let mut loader = LibraryLoader::new();
    let Ok(libc) = loader.open(LIBC) else {
        return;
    };

    let sig = Signature::parse("(integer) -> integer").unwrap();
    let failure = FailureConvention::error_symbol("no_such_error_symbol_xyz");
    assert!(matches!(
        bind(&libc, "abs", &sig, &failure).err(),
        Some(LoadError::Symbol { .. })
    ));
}
