//! Exercises the `veocreate` binary itself (not just the library): a
//! well-formed control script should produce a `.veo.zip` and a non-zero
//! exit status should be returned for a fatal configuration error.

use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;

fn write_fixture_templates(dir: &std::path::Path) {
    fs::write(dir.join("VEOReadme.txt"), b"This is a VERS V3 VEO.\n").unwrap();
    fs::write(
        dir.join("agls.tpl"),
        "http://www.prov.vic.gov.au/vers/schema/AGLS\thttp://www.w3.org/2001/XMLSchema\n<dc:title>$$column 3$$</dc:title>\n",
    )
    .unwrap();
}

#[test]
fn batch_run_builds_a_veo_archive() {
    let templates = tempfile::tempdir().unwrap();
    write_fixture_templates(templates.path());

    let content = tempfile::tempdir().unwrap();
    fs::create_dir(content.path().join("S-1")).unwrap();
    fs::write(content.path().join("S-1").join("a.bin"), b"payload").unwrap();

    let output = tempfile::tempdir().unwrap();
    let control_path = templates.path().join("control.txt");
    fs::write(
        &control_path,
        format!(
            "HASH\tSHA-256\nBV\tcliRecord\nAC\t{}\nIO\tRecord\t1\nMP\tagls.tpl\tx\tTitle\nIP\tS-1/a.bin\nend\n",
            content.path().join("S-1").display()
        ),
    )
    .unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("veocreate"));
    cmd.args([
        "--control",
        control_path.to_str().unwrap(),
        "--templates",
        templates.path().to_str().unwrap(),
        "--output",
        output.path().to_str().unwrap(),
    ]);
    cmd.assert().success();

    assert!(output.path().join("cliRecord.veo.zip").exists());
}

#[test]
fn unsupported_hash_flag_is_a_fatal_exit() {
    let templates = tempfile::tempdir().unwrap();
    write_fixture_templates(templates.path());
    let control_path = templates.path().join("control.txt");
    fs::write(&control_path, "end\n").unwrap();
    let output = tempfile::tempdir().unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("veocreate"));
    cmd.args([
        "--control",
        control_path.to_str().unwrap(),
        "--templates",
        templates.path().to_str().unwrap(),
        "--output",
        output.path().to_str().unwrap(),
        "--ha",
        "MD5",
    ]);
    cmd.assert().failure();
}
