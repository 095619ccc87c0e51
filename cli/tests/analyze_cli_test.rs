use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// `function make() { $p = new Point(); return $p; }  $q = new Point(); $x = $q->x;`
const PROGRAM_JSON: &str = r#"{
    "root": 10,
    "strings": ["make", "p", "Point", "q", "x"],
    "nodes": [
        {"data": {"tag": "object_instantiation", "class_name": 2}, "span": {"line": 2, "column": 10}},
        {"data": {"tag": "variable", "name": 1}},
        {"data": {"tag": "assignment", "target": 1, "value": 0}},
        {"data": {"tag": "variable", "name": 1}},
        {"data": {"tag": "return_stmt", "value": 3}},
        {"data": {"tag": "block", "statements": [2, 4]}},
        {"data": {"tag": "function_decl", "name": 0, "params": [], "body": 5}},
        {"data": {"tag": "object_instantiation", "class_name": 2}, "span": {"line": 5, "column": 6}},
        {"data": {"tag": "assignment", "target": 11, "value": 7}},
        {"data": {"tag": "assignment", "target": 13, "value": 12}},
        {"data": {"tag": "root", "statements": [6, 8, 9]}},
        {"data": {"tag": "variable", "name": 3}},
        {"data": {"tag": "property_access", "object": 14, "property": 4}},
        {"data": {"tag": "variable", "name": 4}},
        {"data": {"tag": "variable", "name": 3}}
    ]
}"#;

#[test]
fn prints_text_report() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.json");
    fs::write(&path, PROGRAM_JSON)?;

    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Escape analysis report"))
        .stdout(predicate::str::contains("global escape 1"))
        .stdout(predicate::str::contains("scalar replaced 1"))
        .stdout(predicate::str::contains("[returned]"));

    Ok(())
}

#[test]
fn prints_json_report() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.json");
    fs::write(&path, PROGRAM_JSON)?;

    let output = Command::cargo_bin("stackify")?
        .args(["analyze", path.to_str().unwrap(), "--format", "json"])
        .output()?;
    assert!(output.status.success());

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(doc["statistics"]["total_allocations"], 2);
    assert_eq!(doc["allocations"][0]["decision"], "escapes");
    assert_eq!(doc["allocations"][1]["location"], "scalar_replaced");
    assert_eq!(doc["allocations"][1]["fields"][0]["field"], "x");

    Ok(())
}

#[test]
fn config_file_changes_placement() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.json");
    fs::write(&path, PROGRAM_JSON)?;
    let cfg = dir.path().join("stackify.toml");
    fs::write(&cfg, "enable_scalar_replacement = false\nmax_object_size = 32\n")?;

    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", path.to_str().unwrap(), "--config", cfg.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("too_large"))
        .stdout(predicate::str::contains("scalar replaced 0"));

    Ok(())
}

#[test]
fn accepts_yaml_trees() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.yaml");
    fs::write(
        &path,
        r#"
root: 3
strings: [o, Foo]
nodes:
  - data: { tag: object_instantiation, class_name: 1 }
  - data: { tag: variable, name: 0 }
  - data: { tag: assignment, target: 1, value: 0 }
  - data: { tag: root, statements: [2] }
"#,
    )?;

    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("stack 1"))
        .stdout(predicate::str::contains("fits_on_stack"));

    Ok(())
}

#[test]
fn reports_unsupported_extension() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.txt");
    fs::write(&path, PROGRAM_JSON)?;

    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file extension '.txt'"));

    Ok(())
}

#[test]
fn reports_malformed_tree() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("prog.json");
    fs::write(&path, "{\"root\": 0, \"nodes\": [")?;

    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load syntax tree"));

    Ok(())
}

#[test]
fn rejects_parent_dir_paths() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.args(["analyze", "../prog.json"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Parent directory components"));

    Ok(())
}

#[test]
fn prints_default_config() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("stackify")?;
    cmd.arg("config");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("max_object_size = 256"))
        .stdout(predicate::str::contains("max_frame_size = 4096"))
        .stdout(predicate::str::contains("[default_sizes]"));

    Ok(())
}
