// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const PLATE: &str = "0\nSECTION\n2\nENTITIES\n\
0\nCIRCLE\n8\nHOLES\n10\n10\n20\n10\n40\n3\n\
0\nTEXT\n8\nNOTES\n10\n0\n20\n50\n1\nMATERIAL: SUS304\n\
0\nDIMENSION\n8\nDIMS\n10\n0\n20\n0\n42\n80\n\
0\nENDSEC\n0\nEOF\n";

const FLANGE: &str = "0\nSECTION\n2\nENTITIES\n\
0\nARC\n8\nOUTLINE\n10\n0\n20\n0\n40\n25\n50\n0\n51\n180\n\
0\nTEXT\n8\nNOTES\n10\n0\n20\n40\n1\n4-M8 THRU\n\
0\nINSERT\n8\n0\n2\nBOM_TABLE\n10\n100\n20\n0\n\
0\nENDSEC\n0\nEOF\n";

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn write_hash_embeddings_config(root: &Path) {
    fs::write(
        root.join(".cadgreprc.toml"),
        r#"
[embeddings]
provider = "hash"
dimension = 256
batch_size = 2
"#,
    )
    .unwrap();
}

fn setup_corpus() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_hash_embeddings_config(dir.path());
    write_file(&dir.path().join("drawings").join("plate.dxf"), PLATE);
    write_file(&dir.path().join("drawings").join("flange.dxf"), FLANGE);
    dir
}

fn json_output(cmd: &mut assert_cmd::Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn index_with_embeddings_then_search() {
    let dir = setup_corpus();

    let mut index = cargo_bin_cmd!("cadgrep");
    index
        .current_dir(dir.path())
        .args(["--format", "json", "index", "--embeddings", "--path"])
        .arg(dir.path());
    let report = json_output(&mut index);
    assert_eq!(report["index"]["indexed"], 2);
    assert_eq!(report["index"]["failed"], 0);
    assert_eq!(report["embeddings"]["drawings_embedded"], 2);

    let mut search = cargo_bin_cmd!("cadgrep");
    search
        .current_dir(dir.path())
        .args(["--format", "json", "search", "type:CIRCLE layer:HOLES", "-m", "3"]);
    let response = json_output(&mut search);
    assert_eq!(response["query"], "type:CIRCLE layer:HOLES");
    assert_eq!(response["count"], 3);
    let top = &response["results"][0];
    assert_eq!(top["entity_type"], "CIRCLE");
    assert_eq!(top["filename"], "plate.dxf");

    let mut per_drawing = cargo_bin_cmd!("cadgrep");
    per_drawing
        .current_dir(dir.path())
        .args(["--format", "json", "search", "notes", "--per-drawing"]);
    let response = json_output(&mut per_drawing);
    assert_eq!(response["count"], 2);

    let mut stats = cargo_bin_cmd!("cadgrep");
    stats.current_dir(dir.path()).args(["--format", "json", "stats"]);
    let stats = json_output(&mut stats);
    assert_eq!(stats["counts"]["drawings"], 2);
    assert_eq!(stats["counts"]["entities"], 6);
    assert_eq!(stats["counts"]["embedding_dim"], 256);
}

#[test]
fn search_from_subdirectory_uses_parent_store() {
    let dir = setup_corpus();
    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["index", "--embeddings"])
        .assert()
        .success();

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path().join("drawings"))
        .env("NO_COLOR", "1")
        .args(["search", "bom table"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found"))
        .stderr(predicate::str::contains("Using store from"));
}

#[test]
fn search_rejects_invalid_limit_and_empty_query() {
    let dir = setup_corpus();
    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["index"])
        .assert()
        .success();

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["search", "bolt", "-m", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("limit"));

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["search", "bolt", "-m", "101"])
        .assert()
        .failure();

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["search", "  "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn search_without_store_fails() {
    let dir = TempDir::new().unwrap();
    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["search", "bolt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cadgrep index"));
}

#[test]
fn parse_then_import_then_embed() {
    let dir = setup_corpus();
    write_file(&dir.path().join("drawings").join("broken.dxf"), "0\nSECTION\n");
    let out = dir.path().join("parsed");

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["parse", "drawings", "--index", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("FAIL"))
        .stdout(predicate::str::contains("Parsed 2 drawings, 1 failed"));

    assert!(out.join("plate.json").is_file());
    assert!(out.join("flange.json").is_file());
    let index = fs::read_to_string(out.join("index.jsonl")).unwrap();
    assert_eq!(index.lines().count(), 2);

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["import", "parsed", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Validated 2 drawings"));
    assert!(!dir.path().join(".cadgrep").exists());

    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["import", "parsed"])
        .assert()
        .success();

    let mut embed = cargo_bin_cmd!("cadgrep");
    embed
        .current_dir(dir.path())
        .args(["--format", "json", "embed", "--drawings"]);
    let report = json_output(&mut embed);
    assert_eq!(report["drawings_embedded"], 2);
    assert_eq!(report["entities_embedded"], 0);

    let mut again = cargo_bin_cmd!("cadgrep");
    again.current_dir(dir.path()).args(["--format", "json", "embed"]);
    let report = json_output(&mut again);
    assert_eq!(report["drawings_embedded"], 0);
    assert_eq!(report["entities_embedded"], 6);
}

#[test]
fn analyze_reports_summary() {
    let dir = setup_corpus();
    let mut analyze = cargo_bin_cmd!("cadgrep");
    analyze
        .current_dir(dir.path())
        .args(["--format", "json", "analyze", "drawings/flange.dxf"]);
    let report = json_output(&mut analyze);
    assert_eq!(report["filename"], "flange.dxf");
    assert_eq!(report["summary"]["has_bom"], true);
    assert_eq!(report["summary"]["total_entities"], 1);
    assert_eq!(report["texts"][0]["category"], "thread");

    let target = dir.path().join("report.json");
    cargo_bin_cmd!("cadgrep")
        .current_dir(dir.path())
        .args(["analyze", "drawings/plate.dxf", "--pretty", "-o"])
        .arg(&target)
        .assert()
        .success();
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(written["summary"]["materials"][0], "MATERIAL: SUS304");
    assert_eq!(written["summary"]["key_dimensions"][0]["measurement"], 80.0);
}

#[test]
fn completions_are_generated() {
    cargo_bin_cmd!("cadgrep")
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cadgrep"));
}
