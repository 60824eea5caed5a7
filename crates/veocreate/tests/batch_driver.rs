//! Drives the tab-separated control script end to end: a well-formed
//! record, a record with a recoverable error that should be skipped
//! without aborting the batch, and the `VEO` shorthand command.

mod common;

use std::fs;
use std::path::Path;

use veocreate::batch::{BatchOptions, SignerLoader, run_batch};
use veocreate::error::VeoError;
use veocreate::{HashAlgorithm, Signer};

struct FixtureLoader;

impl SignerLoader for FixtureLoader {
    fn load(&self, _pfx_path: &Path, _password: &str) -> Result<Signer, VeoError> {
        Ok(common::rsa_signer())
    }
}

fn setup(content_root_name: &str) -> (tempfile::TempDir, tempfile::TempDir, tempfile::TempDir, std::path::PathBuf) {
    let templates = common::template_dir();
    let content = tempfile::tempdir().unwrap();
    fs::create_dir_all(content.path().join(content_root_name)).unwrap();
    common::write_content_file(&content.path().join(content_root_name), "a.bin", b"payload");
    let output = tempfile::tempdir().unwrap();
    let control_path = templates.path().join("control.txt");
    (templates, content, output, control_path)
}

#[test]
fn well_formed_script_builds_a_signed_veo() {
    let (templates, content, output, control_path) = setup("S-1");
    let script = format!(
        "HASH\tSHA-256\nPFX\tirrelevant.pfx\tpw\nBV\tbatchRecord\nAC\t{}\nIO\tRecord\t1\nMP\tagls.tpl\tx\tTitle From Batch\nIP\tS-1/a.bin\nE\t2024-01-01T00:00:00Z\tCreated\ttester\ta description\t$$\nend\n",
        content.path().join("S-1").display()
    );
    fs::write(&control_path, script).unwrap();

    let mut opts = BatchOptions::new(control_path, templates.path().to_path_buf(), output.path().to_path_buf());
    opts.default_hash = HashAlgorithm::Sha256;
    let report = run_batch(&opts, &FixtureLoader).unwrap();

    assert_eq!(report.veos_built, 1);
    assert_eq!(report.veos_abandoned, 0);
    assert!(output.path().join("batchRecord.veo.zip").exists());
}

#[test]
fn a_bad_record_is_abandoned_but_the_batch_continues() {
    let (templates, content, output, control_path) = setup("S-2");
    let script = format!(
        concat!(
            "BV\tbrokenRecord\n",
            "IP\tno-such-root/a.bin\n", // fails: unknown content root, before any IO/MP
            "BV\tgoodRecord\n",
            "AC\t{}\n",
            "IO\tRecord\t0\n",
            "MP\tagls.tpl\tx\tTitle\n",
            "IP\tS-2/a.bin\n",
            "end\n",
        ),
        content.path().join("S-2").display()
    );
    fs::write(&control_path, script).unwrap();

    let mut opts = BatchOptions::new(control_path, templates.path().to_path_buf(), output.path().to_path_buf());
    opts.default_hash = HashAlgorithm::Sha256;
    let report = run_batch(&opts, &FixtureLoader).unwrap();

    assert_eq!(report.veos_built, 1);
    assert_eq!(report.veos_abandoned, 1);
    assert!(!output.path().join("brokenRecord.veo.zip").exists());
    assert!(output.path().join("goodRecord.veo.zip").exists());
}

#[test]
fn veo_shorthand_builds_a_complete_archive_in_one_record() {
    let (templates, content, output, control_path) = setup("S-3");
    let file_path = content.path().join("S-3").join("a.bin");
    let script = format!(
        "VEO\tshorthandRecord\tRecord\tagls.tpl\tTitle Via Shorthand\t$$\t{}\nend\n",
        file_path.display()
    );
    fs::write(&control_path, script).unwrap();

    let mut opts = BatchOptions::new(control_path, templates.path().to_path_buf(), output.path().to_path_buf());
    opts.default_hash = HashAlgorithm::Sha256;
    let report = run_batch(&opts, &FixtureLoader).unwrap();

    assert_eq!(report.veos_built, 1);
    assert_eq!(report.veos_abandoned, 0);
    assert!(output.path().join("shorthandRecord.veo.zip").exists());
}
