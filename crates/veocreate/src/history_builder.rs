//! The `VEOHistory.xml` stream (spec §4.4). Unlike the content builder this
//! is not a state machine with illegal transitions to speak of: events may
//! be appended in any order relative to the content builder, the only rule
//! enforced by the caller (the assembler) is that no event is added after
//! `finish_files`.

use std::path::Path;

use time::OffsetDateTime;

use crate::error::{VeoError, codes};
use crate::template::format_timestamp;
use crate::xml_writer::XmlWriter;

pub const HISTORY_VERSION: &str = "3.0";

const NO_EVENT_TYPE: &str = "No event specified";
const NO_INITIATOR: &str = "No initiator specified";
const NO_DESCRIPTION: &str = "No event description specified";

pub struct HistoryBuilder {
    writer: Option<XmlWriter>,
}

impl HistoryBuilder {
    pub fn start(path: &Path) -> Result<Self, VeoError> {
        let mut writer = XmlWriter::start(path, "vers:VEOHistory")?;
        writer.emit_simple_element("vers:Version", &[], Some(HISTORY_VERSION))?;
        Ok(Self { writer: Some(writer) })
    }

    fn writer_mut(&mut self, method: &'static str) -> Result<&mut XmlWriter, VeoError> {
        self.writer.as_mut().ok_or_else(|| {
            VeoError::recoverable(
                codes::HB_CLOSED,
                "history_builder",
                method,
                "history manifest is already closed",
            )
        })
    }

    /// Append one `<vers:Event>`. `timestamp` is mandatory; blank `event_type`
    /// / `initiator` are replaced by sentinels; an empty `descriptions` gets
    /// one sentinel description; `errors` may be empty.
    pub fn add_event(
        &mut self,
        timestamp: Option<OffsetDateTime>,
        event_type: &str,
        initiator: &str,
        descriptions: &[String],
        errors: &[String],
    ) -> Result<(), VeoError> {
        let timestamp = timestamp.ok_or_else(|| {
            VeoError::recoverable(
                codes::HB_NULL_TIMESTAMP,
                "history_builder",
                "add_event",
                "event timestamp must not be null",
            )
        })?;

        let event_type = blank_or(event_type, NO_EVENT_TYPE);
        let initiator = blank_or(initiator, NO_INITIATOR);

        let w = self.writer_mut("add_event")?;
        w.emit_complex_open("vers:Event", &[])?;
        w.emit_simple_element("vers:EventDateTime", &[], Some(&format_timestamp(timestamp)))?;
        w.emit_simple_element("vers:EventType", &[], Some(event_type))?;
        w.emit_simple_element("vers:Initiator", &[], Some(initiator))?;
        if descriptions.is_empty() {
            w.emit_simple_element("vers:Description", &[], Some(NO_DESCRIPTION))?;
        } else {
            for description in descriptions {
                w.emit_simple_element("vers:Description", &[], Some(description))?;
            }
        }
        for error in errors {
            w.emit_simple_element("vers:Error", &[], Some(error))?;
        }
        w.emit_complex_close("vers:Event")?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), VeoError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| VeoError::recoverable(codes::HB_CLOSED, "history_builder", "close", "already closed"))?;
        writer.end()
    }
}

fn blank_or<'a>(s: &'a str, sentinel: &'a str) -> &'a str {
    if s.trim().is_empty() { sentinel } else { s }
}
