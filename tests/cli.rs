use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// The binary with HOME and the working directory pointed into `home`, so no
/// real settings, `.env` or credentials leak into the test.
fn penny(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("penny").unwrap();
    cmd.env("HOME", home)
        .env_remove("YNAB_ACCESS_TOKEN")
        .env_remove("YNAB_BUDGET_ID")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("RUST_LOG")
        .current_dir(home);
    cmd
}

fn write_eml(dir: &Path, name: &str, subject: &str, body: &str) -> String {
    let raw = format!(
        "Message-ID: <{name}@mail.test>\r\nFrom: Venmo <venmo@venmo.com>\r\nTo: alex@example.com\r\n\
         Subject: {subject}\r\nDate: Tue, 9 Dec 2025 18:30:00 +0000\r\nContent-Type: text/plain\r\n\r\n{body}\r\n"
    );
    let path = dir.join(format!("{name}.eml"));
    std::fs::write(&path, raw).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    penny(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("categorize"))
        .stdout(predicate::str::contains("learn"))
        .stdout(predicate::str::contains("parse"));
}

#[test]
fn parse_prints_payment_candidate() {
    let home = tempfile::tempdir().unwrap();
    let file = write_eml(home.path(), "pay", "You paid Jane Doe $42.50", "");
    penny(home.path())
        .args(["parse", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("venmo_payment"))
        .stdout(predicate::str::contains("-$42.50"))
        .stdout(predicate::str::contains("You paid Jane Doe"));
}

#[test]
fn parse_falls_back_to_sender_and_reports_miss() {
    let home = tempfile::tempdir().unwrap();
    let file = write_eml(home.path(), "hello", "Lunch on Friday?", "see you there");
    penny(home.path())
        .args(["parse", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("venmo_payment"))
        .stdout(predicate::str::contains("Nothing extracted"));
}

#[test]
fn init_then_rules_roundtrip() {
    let home = tempfile::tempdir().unwrap();
    let data = home.path().join("data");
    penny(home.path())
        .args(["init", "--data-dir", &data.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote starter rules"));
    assert!(data.join("penny.db").exists());
    assert!(data.join("inbox").is_dir());

    penny(home.path())
        .args(["rules", "add", "Gas", "-k", "Shell", "-k", "chevron"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shell, chevron"));

    penny(home.path())
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pet"))
        .stdout(predicate::str::contains("Gas"))
        .stdout(predicate::str::contains("revision 2"));
}

#[test]
fn run_without_ledger_credentials_fails() {
    let home = tempfile::tempdir().unwrap();
    penny(home.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("YNAB_ACCESS_TOKEN"));
}

#[test]
fn learn_respects_disabled_switch() {
    let home = tempfile::tempdir().unwrap();
    let data = home.path().join("data");
    penny(home.path())
        .args(["init", "--data-dir", &data.to_string_lossy()])
        .assert()
        .success();
    std::fs::write(
        data.join("category_rules.yaml"),
        "rules: []\nlearning:\n  enabled: false\n",
    )
    .unwrap();

    // No ledger credentials are set, so reaching the ledger would fail.
    penny(home.path())
        .arg("learn")
        .assert()
        .success()
        .stdout(predicate::str::contains("Learning is disabled"));
}

#[test]
fn rules_add_rejects_bad_confidence() {
    let home = tempfile::tempdir().unwrap();
    penny(home.path())
        .args(["rules", "add", "Pet", "-k", "dog", "--confidence", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("between 0 and 1"));
}
