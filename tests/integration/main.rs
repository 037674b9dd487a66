//! Integration tests for Stratum
//!
//! These tests verify that configuration, loading, analysis and the CLI work
//! together on metadata images written to a temporary directory.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use stratum_analyzer::{Coordinator, InheritanceRequest, JsonModuleReader, PackagingConfig};
use stratum_core::{EdgeKind, NodeId, Outcome};
use tempfile::TempDir;

fn ty(namespace: &str, name: &str, extra: Value) -> Value {
    let mut value = json!({ "namespace": namespace, "name": name });
    if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        obj.extend(extra.clone());
    }
    value
}

fn write_image(dir: &Path, file: &str, name: &str, kind: &str, types: Vec<Value>) {
    let image = json!({
        "format": "stratum-module/1",
        "name": name,
        "kind": kind,
        "runtime": "managed",
        "types": types,
    });
    fs::write(dir.join(file), serde_json::to_vec_pretty(&image).unwrap()).unwrap();
}

/// Core.dll, Data.dll, App.exe and a native binary under `bin/`, plus a
/// packaging config next to it.
fn create_workspace() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let bin = temp_dir.path().join("bin");
    fs::create_dir_all(&bin).unwrap();

    write_image(&bin, "Core.dll", "Core", "library", vec![
        ty("Core", "Entity", json!({ "base": "System.Object" })),
        ty("Core", "IRepository`1", json!({ "generic_parameters": ["T"] })),
        ty("Core", "Clock", json!({})),
    ]);
    write_image(&bin, "Data.dll", "Data", "library", vec![
        ty("Data", "User", json!({ "base": "Core.Entity" })),
        ty("Data", "UserRepository", json!({
            "interfaces": ["Core.IRepository`1<Data.User>"],
            "methods": [{
                "name": "Save",
                "parameters": ["Data.User"],
                "calls": ["Core.Clock::Now"],
            }],
        })),
    ]);
    write_image(&bin, "App.exe", "App", "executable", vec![
        ty("App", "Program", json!({
            "fields": [{ "name": "users", "type": "Data.UserRepository" }],
        })),
    ]);
    fs::write(bin.join("libnative.dll"), [0x4d, 0x5a, 0x90, 0x00]).unwrap();

    fs::write(
        temp_dir.path().join("stratum.toml"),
        r#"
assembly_root = "bin"
ignore_platform_types = true

[[packages]]
name = "Domain"
includes = ["Core.dll", "Data.dll"]

[[packages.clusters]]
name = "Persistence"
patterns = ["Data.*Repository"]

[[packages]]
name = "Application"
includes = ["*.exe"]
"#,
    )
    .unwrap();

    temp_dir
}

fn json_coordinator() -> Coordinator {
    Coordinator::with_reader(Arc::new(JsonModuleReader::new()))
}

fn stratum(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_stratum"))
        .args(["--metadata", "json"])
        .args(args)
        .output()
        .expect("Failed to execute stratum")
}

/// Full pipeline: config file -> background analysis -> document
#[tokio::test]
async fn test_package_pipeline() {
    let workspace = create_workspace();
    let config = PackagingConfig::load(&workspace.path().join("stratum.toml")).unwrap();

    let handle = json_coordinator().spawn_package_analysis(config, vec!["domain".to_string()]);
    let analysis = handle.wait().await.unwrap().completed().unwrap();
    let doc = analysis.document;

    assert_eq!(doc.nodes().len(), 5);
    let kinds: Vec<EdgeKind> = doc.edges().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EdgeKind::DerivesFrom,
            EdgeKind::Implements,
            EdgeKind::References,
            EdgeKind::Calls,
        ]
    );
    assert_eq!(
        doc.cluster_of(NodeId::from_full_name("Data.UserRepository")),
        Some("Persistence")
    );
    // The native binary never matched an include pattern.
    assert!(analysis.skipped.is_empty());
}

#[tokio::test]
async fn test_inheritance_pipeline() {
    let workspace = create_workspace();
    let bin = workspace.path().join("bin");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let request = InheritanceRequest::new(&bin, "Core.Entity").ignore_platform_types(true);
    let handle = json_coordinator().spawn_inheritance(request, tx);

    let outcome = handle.wait().await.unwrap();
    let Outcome::Completed(doc) = outcome else {
        panic!("inheritance run was cancelled");
    };

    let names: Vec<&str> = doc.descriptors().iter().map(|d| d.full_name.as_str()).collect();
    assert_eq!(names, vec!["Core.Entity", "Data.User"]);
    assert!(doc.failed_items().is_empty());

    let mut reports = Vec::new();
    while let Some(value) = rx.recv().await {
        reports.push(value);
    }
    assert_eq!(reports.last(), Some(&1.0));
}

#[test]
fn test_cli_help() {
    let output = stratum(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Type dependency and inheritance graphs of compiled modules"));
}

#[test]
fn test_cli_analyze_writes_document() {
    let workspace = create_workspace();
    let out = workspace.path().join("graph.json");
    let config = workspace.path().join("stratum.toml");

    let output = stratum(&[
        "analyze",
        "--config",
        config.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let doc: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
    let edges = doc["edges"].as_array().unwrap();
    // Two packages: only App.Program -> Data.UserRepository crosses them.
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["kind"], "references");
    assert_eq!(doc["nodes"].as_array().unwrap().len(), 6);
}

#[test]
fn test_cli_inherit_unknown_type() {
    let workspace = create_workspace();
    let bin = workspace.path().join("bin");

    let output = stratum(&["inherit", "--dir", bin.to_str().unwrap(), "--type", "Core.Missing"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No nodes found"));
}

#[test]
fn test_cli_types() {
    let workspace = create_workspace();
    let module = workspace.path().join("bin/Data.dll");

    let output = stratum(&["types", "--module", module.to_str().unwrap(), "--filter", "repo"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Data.UserRepository");
}

#[test]
fn test_cli_reports_config_errors() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("stratum.toml");
    fs::write(&config, "assembly_root = \"missing\"\n[[packages]]\nname = \"A\"\n").unwrap();

    let output = stratum(&["analyze", "--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("module root does not exist"));
}

#[test]
fn test_cli_reads_binary_modules_by_default() {
    let workspace = create_workspace();
    let module = workspace.path().join("bin/Data.dll");

    let output = Command::new(env!("CARGO_BIN_EXE_stratum"))
        .args(["types", "--module", module.to_str().unwrap()])
        .output()
        .expect("Failed to execute stratum");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not a module"));
}
