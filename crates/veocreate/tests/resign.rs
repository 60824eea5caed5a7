//! Scenario E: build and sign a VEO, then reopen its still-retained staging
//! directory in resign mode and add a second signer without disturbing the
//! manifests.

mod common;

use std::fs;
use std::thread::sleep;
use std::time::Duration;

use time::OffsetDateTime;
use veocreate::digest::HashAlgorithm;
use veocreate::VeoAssembler;

#[test]
fn resigning_adds_a_signer_without_touching_the_manifests() {
    let working = tempfile::tempdir().unwrap();
    let templates = common::template_dir();
    let content = tempfile::tempdir().unwrap();
    let file_path = common::write_content_file(content.path(), "a.bin", b"data");

    let mut asm = VeoAssembler::new(working.path(), "resignMe", HashAlgorithm::Sha256).unwrap();
    asm.add_readme(templates.path()).unwrap();
    asm.add_information_object("Record", 0).unwrap();
    asm.start_xml_mp("http://schema/agls", "http://syntax/xml").unwrap();
    asm.continue_mp_literal("<dc:title>Resign Fixture</dc:title>").unwrap();
    asm.finish_mp().unwrap();
    asm.add_information_piece(None).unwrap();
    asm.add_content_file("root/a.bin", &file_path).unwrap();
    asm.finish_information_piece().unwrap();
    asm.finish_information_object().unwrap();
    asm.finish_files().unwrap();
    asm.sign(&common::rsa_signer(), OffsetDateTime::UNIX_EPOCH).unwrap();

    let staging_dir = asm.staging_dir().to_path_buf();
    let content_xml_before = fs::read(staging_dir.join("VEOContent.xml")).unwrap();
    drop(asm);
    assert!(staging_dir.join("VEOContentSignature1.xml").exists());

    // Ensure the resign's mtime comparison has something to compare against.
    sleep(Duration::from_millis(10));

    let mut reopened = VeoAssembler::open_for_resign(staging_dir.clone(), HashAlgorithm::Sha256, false).unwrap();
    reopened.sign(&common::ecdsa_signer(), OffsetDateTime::UNIX_EPOCH).unwrap();

    let content_xml_after = fs::read(staging_dir.join("VEOContent.xml")).unwrap();
    assert_eq!(content_xml_before, content_xml_after, "resigning must not rewrite the manifest");
    assert!(staging_dir.join("VEOContentSignature1.xml").exists());
    assert!(staging_dir.join("VEOHistorySignature1.xml").exists());

    let output = tempfile::tempdir().unwrap();
    reopened.finalize(output.path(), false).unwrap();
    assert!(output.path().join("resignMe.veo.zip").exists());
}
