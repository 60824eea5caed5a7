//! End-to-end VEO assembly: one information object, one metadata package
//! rendered from a template, one information piece with a content file,
//! one event, signed by all three key algorithms, then finalized and read
//! back out of the archive.

mod common;

use std::fs;

use time::OffsetDateTime;
use veocreate::digest::HashAlgorithm;
use veocreate::{AssemblerState, VeoAssembler};

#[test]
fn single_record_veo_round_trips_through_all_signer_kinds() {
    let working = tempfile::tempdir().unwrap();
    let templates = common::template_dir();
    let content_src = tempfile::tempdir().unwrap();
    let file_path = common::write_content_file(content_src.path(), "a.docx", b"hello world");

    let mut asm = VeoAssembler::new(working.path(), "fullRecord", HashAlgorithm::Sha256).unwrap();
    asm.add_readme(templates.path()).unwrap();
    asm.add_information_object("Record", 1).unwrap();

    let template = veocreate::template::Template::from_file(&templates.path().join("agls.tpl")).unwrap();
    asm.start_mp(&template.schema_uri, &template.syntax_uri, None).unwrap();
    asm.continue_mp_template(&template, &["Annual Report".to_string()], OffsetDateTime::UNIX_EPOCH)
        .unwrap();
    asm.finish_mp().unwrap();

    asm.add_information_piece(Some("Primary")).unwrap();
    asm.add_content_file("S-100/a.docx", &file_path).unwrap();
    asm.finish_information_piece().unwrap();
    asm.finish_information_object().unwrap();

    asm.add_event(Some(OffsetDateTime::UNIX_EPOCH), "Created", "integration-test", &[], &[])
        .unwrap();
    asm.finish_files().unwrap();
    assert_eq!(asm.state(), AssemblerState::FinishedFiles);

    asm.sign(&common::rsa_signer(), OffsetDateTime::UNIX_EPOCH).unwrap();
    asm.sign(&common::dsa_signer(), OffsetDateTime::UNIX_EPOCH).unwrap();
    asm.sign(&common::ecdsa_signer(), OffsetDateTime::UNIX_EPOCH).unwrap();
    assert_eq!(asm.signer_count(), 3);

    let output = tempfile::tempdir().unwrap();
    let zip_path = asm.finalize(output.path(), false).unwrap();

    let zip_file = fs::File::open(&zip_path).unwrap();
    let mut archive = zip::ZipArchive::new(zip_file).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();

    for expected in [
        "fullRecord.veo/VEOReadme.txt",
        "fullRecord.veo/VEOContent.xml",
        "fullRecord.veo/VEOHistory.xml",
        "fullRecord.veo/VEOContentSignature1.xml",
        "fullRecord.veo/VEOContentSignature2.xml",
        "fullRecord.veo/VEOContentSignature3.xml",
        "fullRecord.veo/VEOHistorySignature1.xml",
        "fullRecord.veo/VEOHistorySignature2.xml",
        "fullRecord.veo/VEOHistorySignature3.xml",
        "fullRecord.veo/S-100/a.docx",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing entry {expected}");
    }

    let mut content_xml = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name("fullRecord.veo/VEOContent.xml").unwrap(),
        &mut content_xml,
    )
    .unwrap();
    let mp_pos = content_xml.find("<vers:MetadataPackage").unwrap();
    let ip_pos = content_xml.find("<vers:InformationPiece").unwrap();
    assert!(mp_pos < ip_pos);
    assert!(content_xml.contains("Annual Report"));

    assert!(!working.path().join("fullRecord.veo").exists());
}

#[test]
fn unsupported_hash_algorithm_is_fatal() {
    let err = HashAlgorithm::parse("MD5").unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn operation_from_wrong_state_is_recoverable_and_abandonable() {
    let working = tempfile::tempdir().unwrap();
    let mut asm = VeoAssembler::new(working.path(), "badOrder", HashAlgorithm::Sha256).unwrap();
    // no add_information_object yet: starting a metadata package directly is illegal.
    let err = asm.start_mp("schema", "syntax", None).unwrap_err();
    assert!(!err.is_fatal());
    let staging = asm.staging_dir().to_path_buf();
    asm.abandon(false);
    assert!(!staging.exists());
}
