use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cmd() -> assert_cmd::Command {
    assert_cmd::Command::from(Command::new(env!("CARGO_BIN_EXE_deckgen-cli")))
}

fn repo_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(name)
}

/// Command rooted in a scratch directory, reading the bundled sources and
/// templates and writing under `<scratch>/out`.
fn engine(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cmd();
    cmd.current_dir(dir.path())
        .arg("--source-root")
        .arg(repo_path("source"))
        .arg("--template-root")
        .arg(repo_path("resources/templates"))
        .arg("--output-root")
        .arg(dir.path().join("out"));
    cmd
}

#[test]
fn templates_lists_bundled_targets() {
    let dir = TempDir::new().unwrap();
    engine(&dir)
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"target\": \"plainlist\""))
        .stdout(predicate::str::contains("\"target\": \"csv\""))
        .stdout(predicate::str::contains("\"target\": \"jsonl\""));
}

#[test]
fn convert_writes_every_pair() {
    let dir = TempDir::new().unwrap();
    engine(&dir)
        .args(["convert", "--manifest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("6 pair(s), 0 failed, 0 stale"));

    let plain = std::fs::read_to_string(dir.path().join("out/plainlist/en.txt")).unwrap();
    assert!(plain.starts_with("VE: Data validation & encoding\nVE2: "));
    assert!(plain.ends_with("application security requirements\n"));

    let csv = std::fs::read_to_string(
        dir.path().join("out/csv/owasp_cornucopia_webapp_cards_fr_1.22.csv"),
    )
    .unwrap();
    assert!(csv.starts_with("key,kind,group,label,description,mappings,see\r\n"));
    assert!(csv.contains("VE3,card,VE,\"Brian peut"));
    assert!(csv.contains(",\"1-3, 7\",VE2\r\n"));

    let jsonl = std::fs::read(dir.path().join("out/jsonl/fr.jsonl")).unwrap();
    assert!(jsonl.is_ascii());
    assert!(dir.path().join("out/manifest.json").is_file());
}

#[test]
fn second_run_is_unchanged_and_check_passes() {
    let dir = TempDir::new().unwrap();
    engine(&dir).arg("convert").assert().success();
    let first = std::fs::read(dir.path().join("out/plainlist/fr.txt")).unwrap();

    engine(&dir)
        .arg("convert")
        .assert()
        .success()
        .stdout(predicate::str::contains("(created)").not())
        .stdout(predicate::str::contains("(unchanged)"));
    engine(&dir).args(["convert", "--check"]).assert().success();
    assert_eq!(first, std::fs::read(dir.path().join("out/plainlist/fr.txt")).unwrap());
}

#[test]
fn check_mode_flags_stale_outputs() {
    let dir = TempDir::new().unwrap();
    engine(&dir).args(["convert", "-l", "en", "-t", "plainlist"]).assert().success();
    std::fs::write(dir.path().join("out/plainlist/en.txt"), "edited\n").unwrap();

    engine(&dir)
        .args(["convert", "-l", "en", "-t", "plainlist", "--check"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("STALE"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/plainlist/en.txt")).unwrap(),
        "edited\n"
    );
}

#[test]
fn unknown_language_fails_its_pairs() {
    let dir = TempDir::new().unwrap();
    engine(&dir)
        .args(["convert", "-l", "en,de", "-t", "plainlist"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("FAIL  de/plainlist"))
        .stdout(predicate::str::contains("[not_found]"));
    assert!(dir.path().join("out/plainlist/en.txt").is_file());
}

#[test]
fn strict_mode_stops_at_first_failure() {
    let dir = TempDir::new().unwrap();
    engine(&dir)
        .args(["convert", "-l", "de,en", "--strict"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no source definition for language `de`"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn unknown_target_is_fatal() {
    let dir = TempDir::new().unwrap();
    engine(&dir)
        .args(["convert", "-t", "pdf"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown target: pdf"));
}

#[test]
fn broken_template_root_is_fatal() {
    let dir = TempDir::new().unwrap();
    let templates = dir.path().join("templates");
    std::fs::create_dir(&templates).unwrap();
    std::fs::write(
        templates.join("bad.tmpl"),
        "---\ntarget: bad\nversion: 1.0.0\nextension: txt\nplaceholders: [colour]\n---\n${colour}\n",
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .arg("--source-root")
        .arg(repo_path("source"))
        .arg("--template-root")
        .arg(&templates)
        .arg("convert")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to load template"));
}

#[test]
fn validate_reports_violations() {
    let dir = TempDir::new().unwrap();
    let sources = dir.path().join("source");
    std::fs::create_dir(&sources).unwrap();
    std::fs::write(
        sources.join("es.yaml"),
        "entries:\n  - key: VE2\n  - key: VE3\n    label: x\n    kind: joker\n",
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .arg("--source-root")
        .arg(&sources)
        .arg("--template-root")
        .arg(repo_path("resources/templates"))
        .arg("validate")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("FAIL  es"))
        .stdout(predicate::str::contains("entries[0].label (VE2)"))
        .stdout(predicate::str::contains("entries[1].kind (VE3)"));
}

#[test]
fn config_file_roots_are_relative_to_it() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("deckgen.yaml"),
        format!(
            "source_root: {}\ntemplate_root: {}\noutput_root: generated\n",
            repo_path("source").display(),
            repo_path("resources/templates").display()
        ),
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["convert", "-l", "fr", "-t", "plainlist"])
        .assert()
        .success();
    assert!(dir.path().join("generated/plainlist/fr.txt").is_file());
}

#[test]
fn missing_source_root_fails_instead_of_converting_nothing() {
    let dir = TempDir::new().unwrap();
    let run = |subcommand: &str| {
        cmd()
            .current_dir(dir.path())
            .arg("--source-root")
            .arg(dir.path().join("sorce"))
            .arg("--template-root")
            .arg(repo_path("resources/templates"))
            .arg("--output-root")
            .arg(dir.path().join("out"))
            .arg(subcommand)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no source definitions under"));
    };
    run("convert");
    run("validate");
    assert!(!dir.path().join("out").exists());
}
