mod common;

use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use common::{assign, func_block, ProgramBuilder};
use gob_formats::stk::{build_archive, StkSource};
use serde_json::Value;
use tempfile::tempdir;

#[test]
fn runs_a_program_from_a_data_directory() -> Result<()> {
    let mut code = func_block(&[assign(20, 3)]);
    code.push(0);
    let program = ProgramBuilder::new(32).place(0x68, &code).build();
    let archive = build_archive(
        &[StkSource {
            name: "INTRO.TOT",
            data: &program,
            pack: true,
        }],
        None,
    )?;

    let dir = tempdir().context("creating data directory")?;
    fs::write(dir.path().join("game.stk"), archive)?;
    let events_path = dir.path().join("events.json");

    let output = Command::new(env!("CARGO_BIN_EXE_gob_engine"))
        .arg("--data")
        .arg(dir.path())
        .arg("--events")
        .arg(&events_path)
        .args(["--max-ms", "1000"])
        .output()
        .context("executing gob_engine")?;
    assert!(
        output.status.success(),
        "gob_engine exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("intro"), "unexpected output: {stdout}");

    let log: Value = serde_json::from_str(&fs::read_to_string(&events_path)?)?;
    assert_eq!(log["program"], "intro");
    assert_eq!(log["terminate"], "running");
    assert!(log["video"].is_array());
    assert!(log["audio"].is_array());
    Ok(())
}

#[test]
fn rejects_a_run_without_data() {
    let output = Command::new(env!("CARGO_BIN_EXE_gob_engine"))
        .output()
        .expect("executing gob_engine");
    assert!(!output.status.success());
}
