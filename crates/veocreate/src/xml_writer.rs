//! Streaming, UTF-8 XML writer. Not a tree builder: it never checks that a
//! `close_tag` matches the most recent `open_tag` — callers (the content and
//! history builders) own that discipline.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{VeoError, codes};

pub const VERS_NAMESPACE: &str = "http://www.prov.vic.gov.au/VERS";
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

const INDENT_UNIT: &str = "   ";

/// Replace the five XML special characters with entity references. A
/// `None`/empty input produces no output in the caller, so this only needs
/// to handle the non-empty case.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// An XML attribute pair, already escaped by the caller's choice of value
/// (attribute values here are always literal identifiers, never user text).
pub type Attr<'a> = (&'a str, &'a str);

pub struct XmlWriter {
    out: BufWriter<File>,
    indent: usize,
    root: String,
}

impl XmlWriter {
    /// Write the XML prolog and the opening `root` tag carrying the `vers:`
    /// namespace declaration.
    pub fn start(path: &Path, root: &str) -> Result<Self, VeoError> {
        let file = File::create(path).map_err(|e| {
            VeoError::recoverable(
                codes::XML_CREATE_FAILED,
                "xml_writer",
                "start",
                format!("failed to create {}: {e}", path.display()),
            )
        })?;
        let mut out = BufWriter::new(file);
        write!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\" ?>\n<{root} xmlns:vers=\"{VERS_NAMESPACE}\">\n"
        )
        .map_err(|e| io_err("start", e))?;
        Ok(Self {
            out,
            indent: 1,
            root: root.to_string(),
        })
    }

    fn write_indent(&mut self) -> std::io::Result<()> {
        for _ in 0..self.indent {
            self.out.write_all(INDENT_UNIT.as_bytes())?;
        }
        Ok(())
    }

    /// Write `s` verbatim. The caller asserts `s` is already valid XML.
    pub fn write_literal(&mut self, s: &str) -> Result<(), VeoError> {
        self.out
            .write_all(s.as_bytes())
            .map_err(|e| io_err("write_literal", e))
    }

    /// Write `s` with the five XML special characters escaped. `None` or an
    /// empty string produces no output.
    pub fn write_escaped_value(&mut self, s: Option<&str>) -> Result<(), VeoError> {
        match s {
            Some(s) if !s.is_empty() => self.write_literal(&escape(s)),
            _ => Ok(()),
        }
    }

    fn write_attrs(&mut self, attrs: &[Attr<'_>]) -> std::io::Result<()> {
        for (name, value) in attrs {
            write!(self.out, " {name}=\"{}\"", escape(value))?;
        }
        Ok(())
    }

    /// Emit `<tag attrs>value</tag>`, or a self-closed `<tag attrs/>` when
    /// `value` is `None` or blank.
    pub fn emit_simple_element(
        &mut self,
        tag: &str,
        attrs: &[Attr<'_>],
        value: Option<&str>,
    ) -> Result<(), VeoError> {
        self.write_indent().map_err(|e| io_err("emit_simple_element", e))?;
        self.out
            .write_all(format!("<{tag}").as_bytes())
            .map_err(|e| io_err("emit_simple_element", e))?;
        self.write_attrs(attrs)
            .map_err(|e| io_err("emit_simple_element", e))?;
        match value {
            Some(v) if !v.trim().is_empty() => {
                self.out
                    .write_all(b">")
                    .map_err(|e| io_err("emit_simple_element", e))?;
                self.write_literal(&escape(v))?;
                self.out
                    .write_all(format!("</{tag}>\n").as_bytes())
                    .map_err(|e| io_err("emit_simple_element", e))
            }
            _ => self
                .out
                .write_all(b"/>\n")
                .map_err(|e| io_err("emit_simple_element", e)),
        }
    }

    /// Open a complex (nested) element and bump the indent counter.
    pub fn emit_complex_open(&mut self, tag: &str, attrs: &[Attr<'_>]) -> Result<(), VeoError> {
        self.write_indent().map_err(|e| io_err("emit_complex_open", e))?;
        self.out
            .write_all(format!("<{tag}").as_bytes())
            .map_err(|e| io_err("emit_complex_open", e))?;
        self.write_attrs(attrs)
            .map_err(|e| io_err("emit_complex_open", e))?;
        self.out
            .write_all(b">\n")
            .map_err(|e| io_err("emit_complex_open", e))?;
        self.indent += 1;
        Ok(())
    }

    /// Close a complex element and drop the indent counter.
    pub fn emit_complex_close(&mut self, tag: &str) -> Result<(), VeoError> {
        self.indent = self.indent.saturating_sub(1);
        self.write_indent().map_err(|e| io_err("emit_complex_close", e))?;
        self.out
            .write_all(format!("</{tag}>\n").as_bytes())
            .map_err(|e| io_err("emit_complex_close", e))
    }

    /// Write `</root>` and flush+close the underlying file.
    pub fn end(mut self) -> Result<(), VeoError> {
        let root = self.root.clone();
        self.out
            .write_all(format!("</{root}>\n").as_bytes())
            .map_err(|e| io_err("end", e))?;
        self.out.flush().map_err(|e| {
            VeoError::recoverable(
                codes::XML_CLOSE_FAILED,
                "xml_writer",
                "end",
                format!("failed to flush: {e}"),
            )
        })
    }
}

fn io_err(method: &'static str, e: std::io::Error) -> VeoError {
    VeoError::recoverable(codes::XML_WRITE_FAILED, "xml_writer", method, e.to_string())
}
