//! The outer VEO state machine (spec §4.7): owns the staging directory,
//! coordinates the content/history builders, tracks external content-file
//! inclusions for the final ZIP, and drives signing and archive
//! finalisation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

use crate::content_builder::{ContentBuilder, ContentState};
use crate::digest::HashAlgorithm;
use crate::error::{VeoError, codes};
use crate::history_builder::HistoryBuilder;
use crate::signature_builder;
use crate::signer::Signer;
use crate::xml_writer::Attr;

const README_NAME: &str = "VEOReadme.txt";
const CONTENT_NAME: &str = "VEOContent.xml";
const HISTORY_NAME: &str = "VEOHistory.xml";

/// Coarse lifecycle phase tracked by the assembler itself (spec §4.7),
/// distinct from — and layered on top of — the content builder's finer
/// [`ContentState`] machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    VeoStarted,
    IoStarted,
    AddingMp,
    AddingIp,
    FinishedFiles,
    Signed,
    Finished,
}

pub struct VeoAssembler {
    staging_dir: PathBuf,
    hash: HashAlgorithm,
    state: AssemblerState,
    content: Option<ContentBuilder>,
    history: Option<HistoryBuilder>,
    /// Legacy `AC` content roots: final path segment of the source dir ->
    /// full source dir.
    content_roots: HashMap<String, PathBuf>,
    /// Every external content file registered so far, in registration
    /// order, as (source path, archive-relative destination).
    external_files: Vec<(PathBuf, String)>,
    destinations: HashSet<String>,
    signer_count: u32,
}

impl VeoAssembler {
    /// Validate `working_dir`, stage a fresh `<name>.veo` directory under
    /// it (deleting any pre-existing one of the same name), and open the
    /// content and history builders.
    pub fn new(working_dir: &Path, name: &str, hash: HashAlgorithm) -> Result<Self, VeoError> {
        if !working_dir.is_dir() {
            return Err(VeoError::fatal(
                codes::ASM_BAD_WORKING_DIR,
                "assembler",
                "new",
                format!("{} is not a directory", working_dir.display()),
            ));
        }
        if name.trim().is_empty() {
            return Err(VeoError::recoverable(
                codes::ASM_NULL_NAME,
                "assembler",
                "new",
                "VEO name must not be empty",
            ));
        }
        let veo_name = if name.ends_with(".veo") {
            name.to_string()
        } else {
            format!("{name}.veo")
        };
        let staging_dir = working_dir.join(&veo_name);
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir).map_err(|e| staging_io(&staging_dir, "new", e))?;
        }
        fs::create_dir_all(&staging_dir).map_err(|e| staging_io(&staging_dir, "new", e))?;

        let content = ContentBuilder::start(&staging_dir.join(CONTENT_NAME), hash)?;
        let history = HistoryBuilder::start(&staging_dir.join(HISTORY_NAME))?;

        Ok(Self {
            staging_dir,
            hash,
            state: AssemblerState::VeoStarted,
            content: Some(content),
            history: Some(history),
            content_roots: HashMap::new(),
            external_files: Vec::new(),
            destinations: HashSet::new(),
            signer_count: 0,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Copy `VEOReadme.txt` verbatim from `template_dir` into the staging
    /// directory.
    pub fn add_readme(&mut self, template_dir: &Path) -> Result<(), VeoError> {
        let src = template_dir.join(README_NAME);
        let dest = self.staging_dir.join(README_NAME);
        fs::copy(&src, &dest).map_err(|e| {
            VeoError::recoverable(
                codes::ASM_README_MISSING,
                "assembler",
                "add_readme",
                format!("cannot copy readme from {}: {e}", src.display()),
            )
        })?;
        Ok(())
    }

    /// Register `src_dir` as a legacy content root, keyed by its final path
    /// segment. Two roots sharing a final segment is a duplicate.
    pub fn register_content_root(&mut self, src_dir: &Path) -> Result<(), VeoError> {
        let key = src_dir
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                VeoError::recoverable(
                    codes::ASM_DUPLICATE_CONTENT_ROOT,
                    "assembler",
                    "register_content_root",
                    format!("{} has no usable final path segment", src_dir.display()),
                )
            })?
            .to_string();
        if self.content_roots.contains_key(&key) {
            return Err(VeoError::recoverable(
                codes::ASM_DUPLICATE_CONTENT_ROOT,
                "assembler",
                "register_content_root",
                format!("a content root ending in `{key}` is already registered"),
            ));
        }
        self.content_roots.insert(key, src_dir.to_path_buf());
        Ok(())
    }

    /// Resolve a short-form archive path (`root/rest...`) to its actual
    /// source path via the legacy content-root map.
    pub fn resolve_content_root(&self, archive_path: &str) -> Result<PathBuf, VeoError> {
        let mut segments = archive_path.splitn(2, ['/', '\\']);
        let root = segments.next().unwrap_or_default();
        let rest = segments.next().unwrap_or_default();
        let src_dir = self.content_roots.get(root).ok_or_else(|| {
            VeoError::recoverable(
                codes::ASM_UNKNOWN_CONTENT_ROOT,
                "assembler",
                "resolve_content_root",
                format!("no content root registered for `{root}`"),
            )
        })?;
        Ok(src_dir.join(rest))
    }

    fn content_mut(&mut self, method: &'static str) -> Result<&mut ContentBuilder, VeoError> {
        self.content.as_mut().ok_or_else(|| illegal_state(method))
    }

    fn history_mut(&mut self, method: &'static str) -> Result<&mut HistoryBuilder, VeoError> {
        self.history.as_mut().ok_or_else(|| illegal_state(method))
    }

    /// Close whatever is currently open (MP, IP, or IO) so a new structural
    /// operation can start cleanly. Mirrors §4.3's "auto-close convenience".
    fn auto_close_to_io_boundary(&mut self) -> Result<(), VeoError> {
        let cb = self.content_mut("auto_close")?;
        match cb.state() {
            ContentState::InMp => {
                cb.finish_mp()?;
                cb.finish_io()?;
            }
            ContentState::FirstIpStg | ContentState::SecondIpStg => {
                cb.finish_ip()?;
                cb.finish_io()?;
            }
            ContentState::FirstIoStg | ContentState::SecondIoStg => {
                cb.finish_io()?;
            }
            ContentState::NotStarted | ContentState::FinishedIo | ContentState::Closed => {}
        }
        Ok(())
    }

    pub fn add_information_object(&mut self, io_type: &str, depth: u32) -> Result<(), VeoError> {
        self.auto_close_to_io_boundary()?;
        self.content_mut("add_information_object")?.start_io(io_type, depth)?;
        self.state = AssemblerState::IoStarted;
        Ok(())
    }

    pub fn start_xml_mp(&mut self, schema_uri: &str, syntax_uri: &str) -> Result<(), VeoError> {
        self.content_mut("start_xml_mp")?.start_mp(schema_uri, syntax_uri, None)?;
        self.state = AssemblerState::AddingMp;
        Ok(())
    }

    pub fn start_rdf_mp(&mut self, schema_uri: &str, resource_uri: &str) -> Result<(), VeoError> {
        self.content_mut("start_rdf_mp")?
            .start_mp(schema_uri, crate::xml_writer::RDF_NAMESPACE, Some(resource_uri))?;
        self.state = AssemblerState::AddingMp;
        Ok(())
    }

    /// Start a metadata package whose syntax (XML vs RDF) is whatever
    /// `syntax_uri` says, as declared by a template's header (spec §4.6).
    /// `resource_uri` is required when `syntax_uri` names the RDF
    /// namespace and ignored otherwise.
    pub fn start_mp(
        &mut self,
        schema_uri: &str,
        syntax_uri: &str,
        resource_uri: Option<&str>,
    ) -> Result<(), VeoError> {
        self.content_mut("start_mp")?.start_mp(schema_uri, syntax_uri, resource_uri)?;
        self.state = AssemblerState::AddingMp;
        Ok(())
    }

    pub fn continue_mp_literal(&mut self, text: &str) -> Result<(), VeoError> {
        self.content_mut("continue_mp_literal")?.append_literal(text)
    }

    pub fn continue_mp_template(
        &mut self,
        template: &crate::template::Template,
        row: &[String],
        now: OffsetDateTime,
    ) -> Result<(), VeoError> {
        self.content_mut("continue_mp_template")?
            .append_template(Some(template), Some(row), now)
    }

    pub fn add_simple_element_to_mp(
        &mut self,
        tag: &str,
        attrs: &[Attr<'_>],
        value: Option<&str>,
    ) -> Result<(), VeoError> {
        self.content_mut("add_simple_element_to_mp")?.emit_element(tag, attrs, value)
    }

    pub fn start_complex_element_in_mp(&mut self, tag: &str, attrs: &[Attr<'_>]) -> Result<(), VeoError> {
        self.content_mut("start_complex_element_in_mp")?.open_complex(tag, attrs)
    }

    pub fn end_complex_element_in_mp(&mut self, tag: &str) -> Result<(), VeoError> {
        self.content_mut("end_complex_element_in_mp")?.close_complex(tag)
    }

    pub fn finish_mp(&mut self) -> Result<(), VeoError> {
        self.content_mut("finish_mp")?.finish_mp()?;
        self.state = AssemblerState::IoStarted;
        Ok(())
    }

    pub fn add_information_piece(&mut self, label: Option<&str>) -> Result<(), VeoError> {
        if self.content_mut("add_information_piece")?.state() == ContentState::InMp {
            self.content_mut("add_information_piece")?.finish_mp()?;
        }
        self.content_mut("add_information_piece")?.start_ip(label)?;
        self.state = AssemblerState::AddingIp;
        Ok(())
    }

    /// New-form content-file registration: hashes `source_path` into the
    /// content manifest and records it for inclusion in the final ZIP at
    /// `archive_path`, which must be unique within the VEO.
    pub fn add_content_file(&mut self, archive_path: &str, source_path: &Path) -> Result<(), VeoError> {
        if self.destinations.contains(archive_path) {
            return Err(VeoError::recoverable(
                codes::ASM_DUPLICATE_DESTINATION,
                "assembler",
                "add_content_file",
                format!("`{archive_path}` has already been registered in this VEO"),
            ));
        }
        self.content_mut("add_content_file")?.add_content_file(archive_path, source_path)?;
        self.destinations.insert(archive_path.to_string());
        self.external_files.push((source_path.to_path_buf(), archive_path.to_string()));
        self.state = AssemblerState::AddingIp;
        Ok(())
    }

    pub fn finish_information_piece(&mut self) -> Result<(), VeoError> {
        self.content_mut("finish_information_piece")?.finish_ip()?;
        self.state = AssemblerState::IoStarted;
        Ok(())
    }

    pub fn finish_information_object(&mut self) -> Result<(), VeoError> {
        self.content_mut("finish_information_object")?.finish_io()?;
        self.state = AssemblerState::IoStarted;
        Ok(())
    }

    pub fn add_event(
        &mut self,
        timestamp: Option<OffsetDateTime>,
        event_type: &str,
        initiator: &str,
        descriptions: &[String],
        errors: &[String],
    ) -> Result<(), VeoError> {
        if matches!(
            self.state,
            AssemblerState::FinishedFiles | AssemblerState::Signed | AssemblerState::Finished
        ) {
            return Err(VeoError::recoverable(
                codes::ASM_ILLEGAL_STATE,
                "assembler",
                "add_event",
                "cannot add an event once finish_files has been called",
            ));
        }
        self.history_mut("add_event")?
            .add_event(timestamp, event_type, initiator, descriptions, errors)
    }

    /// Close whatever structure is still open, then close both manifests.
    pub fn finish_files(&mut self) -> Result<(), VeoError> {
        self.auto_close_to_io_boundary()?;
        let content = self.content.take().ok_or_else(|| illegal_state("finish_files"))?;
        content.close()?;
        let history = self.history.take().ok_or_else(|| illegal_state("finish_files"))?;
        history.close()?;
        self.state = AssemblerState::FinishedFiles;
        Ok(())
    }

    /// Sign both manifests with `signer`. May be called once per signer;
    /// each call appends a new numbered signature pair.
    pub fn sign(&mut self, signer: &Signer, now: OffsetDateTime) -> Result<(), VeoError> {
        if !matches!(self.state, AssemblerState::FinishedFiles | AssemblerState::Signed) {
            return Err(VeoError::recoverable(
                codes::ASM_ILLEGAL_STATE,
                "assembler",
                "sign",
                "sign is only legal after finish_files",
            ));
        }
        signature_builder::sign(&self.staging_dir, CONTENT_NAME, signer, self.hash, now)?;
        signature_builder::sign(&self.staging_dir, HISTORY_NAME, signer, self.hash, now)?;
        self.signer_count += 1;
        self.state = AssemblerState::Signed;
        Ok(())
    }

    pub fn signer_count(&self) -> u32 {
        self.signer_count
    }

    /// Write the ZIP into `output_dir`, then remove the staging directory
    /// unless `retain` is set. Returns the path to the written archive.
    pub fn finalize(mut self, output_dir: &Path, retain: bool) -> Result<PathBuf, VeoError> {
        if !matches!(self.state, AssemblerState::FinishedFiles | AssemblerState::Signed) {
            return Err(VeoError::recoverable(
                codes::ASM_ILLEGAL_STATE,
                "assembler",
                "finalize",
                "finalize is only legal after finish_files",
            ));
        }

        let veo_name = self
            .staging_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("veo")
            .to_string();
        // Open question (c): reproduce the source's exact naming quirk.
        let zip_name = if veo_name.ends_with(".veo") {
            format!("{veo_name}.zip")
        } else {
            format!("{veo_name}.veo.zip")
        };
        let zip_path = output_dir.join(&zip_name);

        let file = fs::File::create(&zip_path).map_err(|e| zip_io(&zip_path, e))?;
        let mut writer = ZipWriter::new(file);
        let timestamp = ZipDateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap_or_default();

        // Walking a directory tree is filesystem-order, not a deterministic
        // order; sort by archive-relative name before writing so the
        // resulting ZIP is bit-stable across runs and platforms.
        let mut staged_entries: Vec<(PathBuf, String)> = WalkDir::new(&self.staging_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let rel = entry
                    .path()
                    .strip_prefix(self.staging_dir.parent().unwrap_or(&self.staging_dir))
                    .unwrap_or(entry.path());
                let name = rel.to_string_lossy().replace('\\', "/");
                (entry.path().to_path_buf(), name)
            })
            .collect();
        staged_entries.sort_by(|a, b| a.1.cmp(&b.1));

        for (path, name) in &staged_entries {
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(timestamp)
                .unix_permissions(0o644);
            writer.start_file(name, options).map_err(|e| zip_write_err(name, e))?;
            let bytes = fs::read(path).map_err(|e| staging_io(path, "finalize", e))?;
            std::io::Write::write_all(&mut writer, &bytes).map_err(|e| zip_write_err(name, e.into()))?;
        }

        let mut written_destinations: HashSet<&str> = HashSet::new();
        for (source, destination) in &self.external_files {
            if !written_destinations.insert(destination.as_str()) {
                continue;
            }
            let name = format!("{veo_name}/{destination}");
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(timestamp)
                .unix_permissions(0o644);
            writer.start_file(&name, options).map_err(|e| zip_write_err(&name, e))?;
            let bytes = fs::read(source).map_err(|e| staging_io(source, "finalize", e))?;
            std::io::Write::write_all(&mut writer, &bytes).map_err(|e| zip_write_err(&name, e.into()))?;
        }

        writer.finish().map_err(|e| zip_write_err(&zip_name, e))?;

        if !retain {
            fs::remove_dir_all(&self.staging_dir).map_err(|e| staging_io(&self.staging_dir, "finalize", e))?;
        }
        self.state = AssemblerState::Finished;
        Ok(zip_path)
    }

    /// Abandon the VEO: drop the builders and delete the staging directory
    /// unless `debug` is set. Used when any operation on this VEO fails.
    pub fn abandon(self, debug: bool) {
        if !debug {
            let _ = fs::remove_dir_all(&self.staging_dir);
        }
    }

    /// Resign mode (spec §4.7 "Auxiliary constructor"): open an existing
    /// staging directory with no content/history builders, pruning stale
    /// signature and report artifacts before the caller signs again.
    pub fn open_for_resign(staging_dir: PathBuf, hash: HashAlgorithm, force: bool) -> Result<Self, VeoError> {
        if !staging_dir.is_dir() {
            return Err(VeoError::fatal(
                codes::ASM_BAD_WORKING_DIR,
                "assembler",
                "open_for_resign",
                format!("{} is not a staging directory", staging_dir.display()),
            ));
        }
        let content_path = staging_dir.join(CONTENT_NAME);
        let content_mtime = fs::metadata(&content_path)
            .and_then(|m| m.modified())
            .map_err(|e| staging_io(&content_path, "open_for_resign", e))?;

        for entry in fs::read_dir(&staging_dir).map_err(|e| staging_io(&staging_dir, "open_for_resign", e))? {
            let entry = entry.map_err(|e| staging_io(&staging_dir, "open_for_resign", e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };

            let is_stale_content_signature = parse_numbered(name, "VEOContentSignature", ".xml").is_some()
                && (force
                    || entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(|mtime| mtime < content_mtime)
                        .unwrap_or(true));
            let is_history_signature = parse_numbered(name, "VEOHistorySignature", ".xml").is_some();
            let is_report_artifact = parse_numbered(name, "Report", ".html").is_some()
                || name == "index.html"
                || name == "ReportStyle.css";

            if is_stale_content_signature || is_history_signature || is_report_artifact {
                let _ = fs::remove_file(entry.path());
            }
        }

        Ok(Self {
            staging_dir,
            hash,
            state: AssemblerState::FinishedFiles,
            content: None,
            history: None,
            content_roots: HashMap::new(),
            external_files: Vec::new(),
            destinations: HashSet::new(),
            signer_count: 0,
        })
    }
}

/// Parse `<prefix><digits><suffix>` filenames, returning the numeric part.
fn parse_numbered(name: &str, prefix: &str, suffix: &str) -> Option<u32> {
    let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if middle.is_empty() || !middle.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    middle.parse().ok()
}

fn illegal_state(method: &'static str) -> VeoError {
    VeoError::recoverable(
        codes::ASM_ILLEGAL_STATE,
        "assembler",
        method,
        format!("{method} is not legal in the current assembler state"),
    )
}

fn staging_io(path: &Path, method: &'static str, e: std::io::Error) -> VeoError {
    VeoError::recoverable(
        codes::ASM_STAGING_IO,
        "assembler",
        method,
        format!("I/O failure on {}: {e}", path.display()),
    )
}

fn zip_io(path: &Path, e: std::io::Error) -> VeoError {
    VeoError::recoverable(
        codes::ASM_ZIP_IO,
        "assembler",
        "finalize",
        format!("cannot create {}: {e}", path.display()),
    )
}

fn zip_write_err(name: &str, e: zip::result::ZipError) -> VeoError {
    VeoError::recoverable(
        codes::ASM_ZIP_IO,
        "assembler",
        "finalize",
        format!("failed to write {name} into the archive: {e}"),
    )
}
