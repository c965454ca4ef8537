//! End-to-end checks of the `fdroid-dl` binary.

use std::process::Command;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fdroid-dl"))
}

#[test]
fn help_lists_commands() {
    let out = bin().arg("--help").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for command in ["update", "index", "metadata", "apk", "src", "--config"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn update_help_lists_toggles() {
    let out = bin().args(["update", "--help"]).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for phase in ["--no-index", "--no-metadata", "--no-apk", "--no-src", "--apk-versions"] {
        assert!(text.contains(phase), "missing {phase}");
    }
}

#[test]
fn version_matches_package() {
    let out = bin().arg("--version").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = bin().current_dir(dir.path()).output().unwrap();
    assert!(!out.status.success());
}
