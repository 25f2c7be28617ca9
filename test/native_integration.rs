//! Integration Tests for Native Library Loading
//!
//! Loads real system libraries through export manifests and calls their
//! symbols through a loaded module. Skipped where the libraries cannot be
//! opened.

#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};

use hostlink::{
    BridgeConfig, BridgeError, HostValue, LibraryLoader, LoadError, ModuleDefinition,
    ModuleLifecycle, Status,
};

static MODULE: ModuleDefinition = ModuleDefinition::new("native", &[]);

fn system_libraries_available() -> bool {
    let mut loader = LibraryLoader::new();
    loader.open("libc.so.6").is_ok() && loader.open("libm.so.6").is_ok()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hostlink-native-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_manifest(dir: &Path, file: &str, json: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, json).unwrap();
    path
}

fn config_with(manifests: Vec<PathBuf>) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.logging.enabled = false;
    config.native.manifests = manifests;
    config
}

#[test]
fn test_manifest_functions_callable() {
    if !system_libraries_available() {
        return;
    }
    let dir = scratch_dir("callable");
    let libc = write_manifest(
        &dir,
        "libc.json",
        r#"{
            "name": "libc",
            "library": "libc.so.6",
            "exports": [
                { "name": "abs", "signature": "(integer) -> integer", "description": "absolute value" }
            ]
        }"#,
    );
    let libm = write_manifest(
        &dir,
        "libm.json",
        r#"{
            "name": "libm",
            "library": "libm.so.6",
            "exports": [
                { "name": "cosine", "symbol": "cos", "signature": "(real) -> real" },
                { "name": "power", "symbol": "pow", "signature": "(real, real) -> real" }
            ]
        }"#,
    );

    let lifecycle = ModuleLifecycle::new();
    lifecycle.on_load(&MODULE, &config_with(vec![libc, libm])).unwrap();
    let module = lifecycle.current().unwrap();
    assert_eq!(module.libraries().len(), 2);
    assert_eq!(module.registry().names(), vec!["abs", "cosine", "power"]);

    let (result, status) = lifecycle.invoke("abs", &[HostValue::Integer(-42)]);
    assert_eq!(status, Status::Success);
    assert_eq!(result, HostValue::Integer(42));

    let (result, status) = lifecycle.invoke("cosine", &[HostValue::Real(0.0)]);
    assert_eq!(status, Status::Success);
    assert_eq!(result, HostValue::Real(1.0));

    let (result, status) = lifecycle.invoke("power", &[HostValue::Real(2.0), HostValue::Real(10.0)]);
    assert_eq!(status, Status::Success);
    assert_eq!(result, HostValue::Real(1024.0));

    // Bound symbols are validated like any other entry
    let (_, status) = lifecycle.invoke("abs", &[HostValue::Real(-1.0)]);
    assert_eq!(status, Status::TypeMismatch);
    let (_, status) = lifecycle.invoke("cosine", &[]);
    assert_eq!(status, Status::ArityMismatch);

    lifecycle.on_unload();
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_sentinel_reported_as_native_failure() {
    if !system_libraries_available() {
        return;
    }
    let dir = scratch_dir("sentinel");
    let manifest = write_manifest(
        &dir,
        "libc.json",
        r#"{
            "name": "libc",
            "library": "libc.so.6",
            "exports": [
                { "name": "abs", "signature": "(integer) -> integer", "sentinel": 13 }
            ]
        }"#,
    );

    let lifecycle = ModuleLifecycle::new();
    lifecycle.on_load(&MODULE, &config_with(vec![manifest])).unwrap();

    let (result, status) = lifecycle.invoke("abs", &[HostValue::Integer(-13)]);
    assert_eq!(status, Status::NativeFailure(13));
    assert_eq!(result, HostValue::Null);

    let (result, status) = lifecycle.invoke("abs", &[HostValue::Integer(-12)]);
    assert_eq!(status, Status::Success);
    assert_eq!(result, HostValue::Integer(12));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_unsupported_manifest_signature_refuses_load() {
    if !system_libraries_available() {
        return;
    }
    let dir = scratch_dir("unsupported");
    let manifest = write_manifest(
        &dir,
        "libc.json",
        r#"{
            "name": "libc",
            "library": "libc.so.6",
            "exports": [
                { "name": "strlen", "signature": "(string) -> integer" }
            ]
        }"#,
    );

    let lifecycle = ModuleLifecycle::new();
    let err = lifecycle
        .on_load(&MODULE, &config_with(vec![manifest]))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Library(LoadError::UnsupportedSignature { .. })
    ));
    assert!(!lifecycle.is_loaded());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_duplicate_between_table_and_manifest() {
    if !system_libraries_available() {
        return;
    }
    use hostlink::{CallFrame, ExportDef, NativeOutput, NativeResult};

    fn abs(frame: &CallFrame<'_>) -> NativeResult {
        Ok(NativeOutput::from(frame.integer(0)?.abs()))
    }
    static EXPORTS: &[ExportDef] = &[ExportDef::new("abs", "(integer) -> integer", abs)];
    static WITH_ABS: ModuleDefinition = ModuleDefinition::new("with-abs", EXPORTS);

    let dir = scratch_dir("duplicate");
    let manifest = write_manifest(
        &dir,
        "libc.json",
        r#"{ "name": "libc", "library": "libc.so.6",
             "exports": [ { "name": "abs", "signature": "(integer) -> integer" } ] }"#,
    );

    let lifecycle = ModuleLifecycle::new();
    let err = lifecycle
        .on_load(&WITH_ABS, &config_with(vec![manifest]))
        .unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateName(name) if name == "abs"));

    std::fs::remove_dir_all(&dir).unwrap();
}
