// These tests check that basic CLI configs still work: argument parsing,
// configuration files, exit statuses, and that a batch survives dumps it
// can't read.
//
// Note that `cargo test` for an application adds our binary to
// the env as `CARGO_BIN_EXE_<name>`.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use minidump_synth::{
    x86_context, DumpString, Exception, Memory, Module, SynthMinidump, SystemInfo, Thread,
    STOCK_VERSION_INFO,
};
use test_assembler::{Endian, Section};

fn triage(args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_minidump-triage");
    Command::new(bin)
        .args(args)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// A dump whose thread 0x1234 faulted inside `crashy.dll`.
fn crashed_minidump() -> Vec<u8> {
    let context = x86_context(Endian::Little, 0xf00800, 0x1010);
    let stack = Memory::with_section(
        Section::with_endian(Endian::Little).append_repeated(0, 0x1000),
        0x1000,
    );
    let thread = Thread::new(Endian::Little, 0x1234, &stack, &context);
    let system_info = SystemInfo::new(Endian::Little);
    let name = DumpString::new("C:\\crashy\\crashy.dll", Endian::Little);
    let module = Module::new(
        Endian::Little,
        0xf00000,
        0x1000,
        &name,
        0,
        0,
        Some(&STOCK_VERSION_INFO),
    );
    let mut exception = Exception::new(Endian::Little);
    exception.thread_id = 0x1234;
    exception.exception_record.exception_code = 0xc0000005;
    exception.exception_record.exception_address = 0xf00800;
    SynthMinidump::with_endian(Endian::Little)
        .add_thread(thread)
        .add_system_info(system_info)
        .add_module(module)
        .add(name)
        .add_exception(exception)
        .add(context)
        .add_memory(stack)
        .finish()
        .unwrap()
}

#[test]
fn test_help() {
    let output = triage(&["--help"]);
    let stdout = String::from_utf8(output.stdout).unwrap();

    assert!(output.status.success());
    for flag in ["--rule", "--default-owner", "--create-tickets", "--no-pause"] {
        assert!(stdout.contains(flag), "--help doesn't mention {flag}");
    }
}

#[test]
fn test_missing_default_owner() {
    let dir = tempfile::tempdir().unwrap();
    let output = triage(&[path_arg(dir.path())]);
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr.contains("ConfigurationInvalid"), "{stderr}");
}

#[test]
fn test_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("triage.json");
    fs::write(&config, r#"{"rules": [{"filter": {"field": "module", "rule": "pattern", "value": "(("}, "owner": "X"}], "default_owner": "Triage"}"#).unwrap();

    let output = triage(&["--config", path_arg(&config), path_arg(dir.path())]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_rule() {
    let dir = tempfile::tempdir().unwrap();
    let output = triage(&[
        "--default-owner",
        "Triage",
        "--rule",
        "stack:exact:gfx.dll=Jane",
        path_arg(dir.path()),
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_tickets_need_a_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let output = triage(&[
        "--default-owner",
        "Triage",
        "--create-tickets",
        path_arg(dir.path()),
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unreadable_dumps_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["first.dmp", "second.dmp", "third.dmp"];
    for name in names {
        fs::write(dir.path().join(name), b"this is not a minidump").unwrap();
    }
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let output = triage(&[
        "--no-pause",
        "--default-owner",
        "Triage",
        "--rule",
        "module:exact:gfx.dll=Jane Doe",
        path_arg(dir.path()),
    ]);
    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert!(output.status.success(), "{stderr}");
    assert_eq!(stderr.matches("DumpUnreadable").count(), names.len(), "{stderr}");
    for name in names {
        assert!(stdout.contains(name), "{name} missing from {stdout}");
    }
    assert!(!stdout.contains("notes.txt"));
    assert!(stdout.contains("Triaged 0 of 3 dumps"), "{stdout}");
}

#[test]
fn test_json_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.dmp"), b"MDMP").unwrap();

    let output = triage(&[
        "--json",
        "--no-pause",
        "--verbose",
        "off",
        "--default-owner",
        "Triage",
        path_arg(dir.path()),
    ]);
    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert!(output.status.success());
    assert_eq!(stderr, "");
    let line: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(line["error"], "DumpUnreadable");
    assert!(line["dump"].as_str().unwrap().ends_with("broken.dmp"));
}

#[test]
fn test_json_never_pauses() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("crash.dmp"), crashed_minidump()).unwrap();

    // No --no-pause: JSON output alone must keep the prompt out.
    let output = triage(&[
        "--json",
        "--default-owner",
        "Triage",
        "--rule",
        "module:exact:crashy.dll=Jane Doe",
        path_arg(dir.path()),
    ]);
    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert!(output.status.success(), "{stderr}");
    assert!(!stderr.contains("Press Enter"), "{stderr}");
    let line: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(line["thread_id"], 0x1234);
    assert_eq!(line["matched_frame"], 0);
    assert_eq!(line["owner"], "Jane Doe");
}

#[test]
fn test_save_config() {
    let dir = tempfile::tempdir().unwrap();
    let dumps = dir.path().join("dumps");
    fs::create_dir(&dumps).unwrap();
    let saved = dir.path().join("saved.json");

    let output = triage(&[
        "--no-pause",
        "--default-owner",
        "Triage",
        "--rule",
        "module:exact:gfx.dll=Jane Doe",
        "--rule",
        "symbol:pattern/i:^net\\.dll!=Network",
        "--recursive",
        "--save-config",
        path_arg(&saved),
        path_arg(&dumps),
    ]);
    assert!(output.status.success());

    let text = fs::read_to_string(&saved).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["default_owner"], "Triage");
    assert_eq!(json["dumps"]["recursive"], true);
    assert_eq!(json["rules"].as_array().unwrap().len(), 2);
    assert_eq!(json["rules"][1]["filter"]["rule"], "pattern");
    assert_eq!(json["rules"][1]["filter"]["ignore_case"], true);
    assert_eq!(json["rules"][1]["owner"], "Network");

    // The saved file is enough to run again, and the command line still wins.
    let output = triage(&[
        "--no-pause",
        "--config",
        path_arg(&saved),
        "--default-owner",
        "Someone Else",
        "--save-config",
        path_arg(&saved),
    ]);
    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&saved).unwrap()).unwrap();
    assert_eq!(json["default_owner"], "Someone Else");
    assert_eq!(json["rules"].as_array().unwrap().len(), 2);
}
