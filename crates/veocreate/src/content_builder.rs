//! The `VEOContent.xml` state machine (spec §4.3). Every operation is a
//! strict check against the legal source states for that operation; this
//! type never auto-closes anything on the caller's behalf — that
//! convenience lives one layer up, in the assembler.

use std::path::Path;

use time::OffsetDateTime;

use crate::digest::{HashAlgorithm, hash_file};
use crate::error::{VeoError, codes};
use crate::template::Template;
use crate::xml_writer::{Attr, RDF_NAMESPACE, XmlWriter};

pub const CONTENT_VERSION: &str = "3.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    NotStarted,
    FirstIoStg,
    InMp,
    FirstIpStg,
    SecondIpStg,
    SecondIoStg,
    FinishedIo,
    Closed,
}

pub struct ContentBuilder {
    writer: Option<XmlWriter>,
    state: ContentState,
    hash: HashAlgorithm,
    current_mp_rdf: bool,
}

fn illegal(state: ContentState, method: &'static str) -> VeoError {
    VeoError::recoverable(
        codes::CB_ILLEGAL_TRANSITION,
        "content_builder",
        method,
        format!("{method} is not legal from state {state:?}"),
    )
}

impl ContentBuilder {
    pub fn start(path: &Path, hash: HashAlgorithm) -> Result<Self, VeoError> {
        let mut writer = XmlWriter::start(path, "vers:VEOContentFile")?;
        writer.emit_simple_element("vers:Version", &[], Some(CONTENT_VERSION))?;
        writer.emit_simple_element("vers:HashFunctionAlgorithm", &[], Some(hash.as_str()))?;
        Ok(Self {
            writer: Some(writer),
            state: ContentState::NotStarted,
            hash,
            current_mp_rdf: false,
        })
    }

    pub fn state(&self) -> ContentState {
        self.state
    }

    fn writer_mut(&mut self, method: &'static str) -> Result<&mut XmlWriter, VeoError> {
        self.writer
            .as_mut()
            .ok_or_else(|| illegal(ContentState::Closed, method))
    }

    pub fn start_io(&mut self, io_type: &str, depth: u32) -> Result<(), VeoError> {
        if io_type.trim().is_empty() {
            return Err(VeoError::recoverable(
                codes::CB_EMPTY_TYPE,
                "content_builder",
                "start_io",
                "information object type must not be empty",
            ));
        }
        match self.state {
            ContentState::NotStarted | ContentState::FinishedIo => {}
            other => return Err(illegal(other, "start_io")),
        }
        let w = self.writer_mut("start_io")?;
        w.emit_complex_open(
            "vers:InformationObject",
            &[("vers:Type", io_type), ("vers:Depth", &depth.to_string())],
        )?;
        self.state = ContentState::FirstIoStg;
        Ok(())
    }

    pub fn start_mp(
        &mut self,
        schema_uri: &str,
        syntax_uri: &str,
        resource_uri: Option<&str>,
    ) -> Result<(), VeoError> {
        if schema_uri.trim().is_empty() {
            return Err(VeoError::recoverable(
                codes::CB_NULL_SCHEMA_URI,
                "content_builder",
                "start_mp",
                "metadata package schema URI must not be empty",
            ));
        }
        if syntax_uri.trim().is_empty() {
            return Err(VeoError::recoverable(
                codes::CB_NULL_SYNTAX_URI,
                "content_builder",
                "start_mp",
                "metadata package syntax URI must not be empty",
            ));
        }
        match self.state {
            ContentState::FirstIoStg => {}
            other => return Err(illegal(other, "start_mp")),
        }

        let is_rdf = syntax_uri == RDF_NAMESPACE;
        let resource_uri = if is_rdf {
            let uri = resource_uri.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                VeoError::recoverable(
                    codes::CB_MISSING_RESOURCE_URI,
                    "content_builder",
                    "start_mp",
                    "RDF metadata packages require a resource URI",
                )
            })?;
            Some(uri)
        } else {
            None
        };

        let w = self.writer_mut("start_mp")?;
        w.emit_complex_open(
            "vers:MetadataPackage",
            &[("vers:SchemaURI", schema_uri), ("vers:SyntaxURI", syntax_uri)],
        )?;
        if let Some(resource_uri) = resource_uri {
            w.emit_complex_open("rdf:RDF", &[("xmlns:rdf", RDF_NAMESPACE)])?;
            w.emit_complex_open("rdf:Description", &[("rdf:about", resource_uri)])?;
        }
        self.current_mp_rdf = is_rdf;
        self.state = ContentState::InMp;
        Ok(())
    }

    pub fn append_template(
        &mut self,
        template: Option<&Template>,
        row: Option<&[String]>,
        now: OffsetDateTime,
    ) -> Result<(), VeoError> {
        let (template, row) = match (template, row) {
            (Some(t), Some(r)) => (t, r),
            _ => {
                return Err(VeoError::recoverable(
                    codes::CB_NULL_TEMPLATE_OR_ROW,
                    "content_builder",
                    "append_template",
                    "template and row are both required",
                ));
            }
        };
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "append_template"));
        }
        let rendered = template.render(row, now)?;
        self.writer_mut("append_template")?.write_literal(&rendered)
    }

    pub fn append_literal(&mut self, text: &str) -> Result<(), VeoError> {
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "append_literal"));
        }
        self.writer_mut("append_literal")?.write_literal(text)
    }

    pub fn emit_element(
        &mut self,
        tag: &str,
        attrs: &[Attr<'_>],
        value: Option<&str>,
    ) -> Result<(), VeoError> {
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "emit_element"));
        }
        self.writer_mut("emit_element")?
            .emit_simple_element(tag, attrs, value)
    }

    pub fn open_complex(&mut self, tag: &str, attrs: &[Attr<'_>]) -> Result<(), VeoError> {
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "open_complex"));
        }
        self.writer_mut("open_complex")?.emit_complex_open(tag, attrs)
    }

    pub fn close_complex(&mut self, tag: &str) -> Result<(), VeoError> {
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "close_complex"));
        }
        self.writer_mut("close_complex")?.emit_complex_close(tag)
    }

    pub fn finish_mp(&mut self) -> Result<(), VeoError> {
        if self.state != ContentState::InMp {
            return Err(illegal(self.state, "finish_mp"));
        }
        let rdf = self.current_mp_rdf;
        let w = self.writer_mut("finish_mp")?;
        if rdf {
            w.emit_complex_close("rdf:Description")?;
            w.emit_complex_close("rdf:RDF")?;
        }
        w.emit_complex_close("vers:MetadataPackage")?;
        self.current_mp_rdf = false;
        self.state = ContentState::FirstIoStg;
        Ok(())
    }

    pub fn start_ip(&mut self, label: Option<&str>) -> Result<(), VeoError> {
        match self.state {
            ContentState::FirstIoStg | ContentState::SecondIoStg => {}
            other => return Err(illegal(other, "start_ip")),
        }
        if let Some(label) = label
            && label.trim().is_empty()
        {
            return Err(VeoError::recoverable(
                codes::CB_BLANK_LABEL,
                "content_builder",
                "start_ip",
                "information piece label must not be blank when present",
            ));
        }
        let w = self.writer_mut("start_ip")?;
        w.emit_complex_open("vers:InformationPiece", &[])?;
        if let Some(label) = label {
            w.emit_simple_element("vers:Label", &[], Some(label))?;
        }
        self.state = ContentState::FirstIpStg;
        Ok(())
    }

    /// Hashes `source_path` and records `<vers:ContentFile>` for it.
    /// `archive_path` must have at least two segments and no `.`/`..`
    /// components, and must not be absolute.
    pub fn add_content_file(
        &mut self,
        archive_path: &str,
        source_path: &Path,
    ) -> Result<(), VeoError> {
        match self.state {
            ContentState::FirstIpStg | ContentState::SecondIpStg => {}
            other => return Err(illegal(other, "add_content_file")),
        }
        validate_archive_path(archive_path)?;
        let digest = hash_file(source_path, self.hash)?;
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest);
        let w = self.writer_mut("add_content_file")?;
        w.emit_complex_open("vers:ContentFile", &[])?;
        w.emit_simple_element("vers:PathName", &[], Some(archive_path))?;
        w.emit_simple_element("vers:HashValue", &[], Some(&encoded))?;
        w.emit_complex_close("vers:ContentFile")?;
        self.state = ContentState::SecondIpStg;
        Ok(())
    }

    pub fn finish_ip(&mut self) -> Result<(), VeoError> {
        match self.state {
            ContentState::SecondIpStg => {}
            ContentState::FirstIpStg => {
                return Err(VeoError::recoverable(
                    codes::CB_EMPTY_INFORMATION_PIECE,
                    "content_builder",
                    "finish_ip",
                    "an information piece must contain at least one content file",
                ));
            }
            other => return Err(illegal(other, "finish_ip")),
        }
        self.writer_mut("finish_ip")?.emit_complex_close("vers:InformationPiece")?;
        self.state = ContentState::SecondIoStg;
        Ok(())
    }

    pub fn finish_io(&mut self) -> Result<(), VeoError> {
        // Open question (a): finishing an IO that has metadata packages but
        // no information pieces (FirstIoStg) is explicitly permitted.
        match self.state {
            ContentState::FirstIoStg | ContentState::SecondIoStg => {}
            other => return Err(illegal(other, "finish_io")),
        }
        self.writer_mut("finish_io")?.emit_complex_close("vers:InformationObject")?;
        self.state = ContentState::FinishedIo;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), VeoError> {
        match self.state {
            ContentState::FinishedIo | ContentState::NotStarted => {}
            other => return Err(illegal(other, "close")),
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| illegal(ContentState::Closed, "close"))?;
        writer.end()?;
        self.state = ContentState::Closed;
        Ok(())
    }
}

fn validate_archive_path(archive_path: &str) -> Result<(), VeoError> {
    let bad = || {
        VeoError::recoverable(
            codes::CB_BAD_ARCHIVE_PATH,
            "content_builder",
            "add_content_file",
            format!(
                "`{archive_path}` must be a relative path with at least two segments and no `.`/`..` components"
            ),
        )
    };
    if archive_path.starts_with('/') || archive_path.starts_with('\\') {
        return Err(bad());
    }
    let segments: Vec<&str> = archive_path.split(['/', '\\']).collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(bad());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("VEOContent.xml")
    }

    #[test]
    fn full_lifecycle_produces_well_ordered_xml() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.docx");
        std::fs::write(&src, b"abc").unwrap();

        let mut cb = ContentBuilder::start(&content_path(&dir), HashAlgorithm::Sha1).unwrap();
        cb.start_io("Record", 1).unwrap();
        cb.start_mp("http://schema/agls", "http://syntax/xml", None)
            .unwrap();
        cb.append_literal("<dc:title>hi</dc:title>").unwrap();
        cb.finish_mp().unwrap();
        cb.start_ip(Some("Label")).unwrap();
        cb.add_content_file("S-37-6/a.docx", &src).unwrap();
        cb.finish_ip().unwrap();
        cb.finish_io().unwrap();
        cb.close().unwrap();

        let xml = std::fs::read_to_string(content_path(&dir)).unwrap();
        let mp_pos = xml.find("<vers:MetadataPackage").unwrap();
        let ip_pos = xml.find("<vers:InformationPiece").unwrap();
        assert!(mp_pos < ip_pos, "metadata packages must precede information pieces");
        assert!(xml.contains("qZk+NkcGgWq6PiVxeFDCbJzQ2J0="));
    }

    #[test]
    fn start_mp_illegal_after_start_ip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"x").unwrap();
        let mut cb = ContentBuilder::start(&content_path(&dir), HashAlgorithm::Sha256).unwrap();
        cb.start_io("Record", 0).unwrap();
        cb.start_ip(None).unwrap();
        cb.add_content_file("root/a.bin", &src).unwrap();
        cb.finish_ip().unwrap();
        let err = cb.start_mp("s", "t", None).unwrap_err();
        assert_eq!(err.code, codes::CB_ILLEGAL_TRANSITION);
    }

    #[test]
    fn finishing_empty_information_piece_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cb = ContentBuilder::start(&content_path(&dir), HashAlgorithm::Sha256).unwrap();
        cb.start_io("Record", 0).unwrap();
        cb.start_ip(None).unwrap();
        let err = cb.finish_ip().unwrap_err();
        assert_eq!(err.code, codes::CB_EMPTY_INFORMATION_PIECE);
    }

    #[test]
    fn finish_io_from_first_io_stg_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cb = ContentBuilder::start(&content_path(&dir), HashAlgorithm::Sha256).unwrap();
        cb.start_io("Record", 0).unwrap();
        cb.start_mp("s", "t", None).unwrap();
        cb.finish_mp().unwrap();
        cb.finish_io().unwrap();
        cb.close().unwrap();
    }

    #[test]
    fn rejects_archive_paths_with_dot_segments() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"x").unwrap();
        let mut cb = ContentBuilder::start(&content_path(&dir), HashAlgorithm::Sha256).unwrap();
        cb.start_io("Record", 0).unwrap();
        cb.start_ip(None).unwrap();
        let err = cb.add_content_file("root/../a.bin", &src).unwrap_err();
        assert_eq!(err.code, codes::CB_BAD_ARCHIVE_PATH);
    }
}
