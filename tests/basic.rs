use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn dirsort() -> Result<Command> {
    let mut cmd = Command::cargo_bin("dirsort")?;
    cmd.env("RUST_LOG", "off").env("HOME", std::env::temp_dir());
    Ok(cmd)
}

#[test]
fn test_schema_generation() -> Result<()> {
    dirsort()?
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("$schema"))
        .stdout(predicate::str::contains("conflict_resolution"));
    Ok(())
}

#[test]
fn test_organize_then_undo() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("a.txt"), "hello")?;
    fs::write(root.join("song.mp3"), "ID3")?;

    dirsort()?
        .arg("organize")
        .arg(root)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("2 of 2 operation(s) succeeded"));
    assert!(root.join("all_Docs/Text/a.txt").exists());
    assert!(root.join("all_Audio/Music/song.mp3").exists());

    let log = fs::read_dir(root.join(".dirsort"))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "jsonl"))
        .expect("operation log");
    dirsort()?.arg("undo").arg("--log").arg(&log).assert().code(0);
    assert_eq!(fs::read_to_string(root.join("a.txt"))?, "hello");
    assert!(!root.join("all_Docs").exists());
    Ok(())
}

#[test]
fn test_dry_run_json_events() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "hello")?;

    let output = dirsort()?
        .args(["organize", "--dry-run", "--json"])
        .arg(dir.path())
        .output()?;
    assert_eq!(output.status.code(), Some(0));
    let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)?
        .lines()
        .map(|line| serde_json::from_str(line))
        .collect::<Result<_, _>>()?;
    let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert_eq!(
        types,
        vec!["scan_completed", "plan_built", "validated", "op_completed", "run_finished"]
    );
    assert!(dir.path().join("a.txt").exists());
    assert!(!dir.path().join(".dirsort").exists());
    Ok(())
}

#[test]
fn test_preview_is_deterministic() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "same")?;
    fs::write(dir.path().join("b.txt"), "same")?;
    fs::create_dir(dir.path().join("proj"))?;

    let run = || -> Result<Vec<u8>> {
        let output = dirsort()?.args(["preview", "--json"]).arg(dir.path()).output()?;
        assert!(output.status.success());
        Ok(output.stdout)
    };
    let first = run()?;
    assert_eq!(first, run()?);
    let plan: serde_json::Value = serde_json::from_slice(&first)?;
    assert_eq!(plan["operations"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn test_validation_failure_exit_code() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a.txt"), "hello")?;
    fs::write(dir.path().join("all_Docs"), "not a directory")?;

    dirsort()?
        .arg("validate")
        .arg(dir.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("parent-not-directory"));
    dirsort()?.arg("organize").arg(dir.path()).assert().code(2);
    assert!(dir.path().join("a.txt").exists());
    Ok(())
}

#[test]
fn test_missing_root_is_operational_failure() -> Result<()> {
    let dir = tempdir()?;
    dirsort()?
        .arg("organize")
        .arg(dir.path().join("nope"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
    Ok(())
}

#[test]
fn test_config_init_and_show() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("dirsort.toml");
    dirsort()?.args(["config", "init"]).arg(&path).assert().success();
    assert!(fs::read_to_string(&path)?.contains("managed_prefix = \"all_\""));
    dirsort()?.args(["config", "init"]).arg(&path).assert().code(1);
    dirsort()?
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("strategy = \"extension\""));
    Ok(())
}
