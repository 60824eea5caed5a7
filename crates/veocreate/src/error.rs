//! Stable error model shared by every component.
//!
//! Every failure carries a numeric identifier plus the module/method that
//! raised it, because the test harness asserts on the identifier rather than
//! on message text. [`Severity::Recoverable`] means "abandon the current VEO
//! and keep going"; [`Severity::Fatal`] means "abort the batch".

use std::fmt;

pub mod codes {
    //! Numeric identifiers, grouped by component in blocks of 100. Treat
    //! these as part of the external contract: never renumber an existing
    //! constant, only add new ones.

    // XML writer (1000-1099)
    pub const XML_CREATE_FAILED: u32 = 1001;
    pub const XML_WRITE_FAILED: u32 = 1002;
    pub const XML_CLOSE_FAILED: u32 = 1003;

    // Digest pipe (1100-1199)
    pub const DIGEST_UNSUPPORTED_ALGORITHM: u32 = 1101;
    pub const DIGEST_SOURCE_UNREADABLE: u32 = 1102;

    // Content builder (1200-1299)
    pub const CB_ILLEGAL_TRANSITION: u32 = 1201;
    pub const CB_EMPTY_TYPE: u32 = 1202;
    pub const CB_NULL_SCHEMA_URI: u32 = 1203;
    pub const CB_NULL_SYNTAX_URI: u32 = 1204;
    pub const CB_BLANK_LABEL: u32 = 1205;
    pub const CB_EMPTY_INFORMATION_PIECE: u32 = 1206;
    pub const CB_BAD_ARCHIVE_PATH: u32 = 1207;
    pub const CB_NULL_TEMPLATE_OR_ROW: u32 = 1208;
    pub const CB_MISSING_RESOURCE_URI: u32 = 1209;

    // History builder (1300-1399)
    pub const HB_NULL_TIMESTAMP: u32 = 1301;
    pub const HB_CLOSED: u32 = 1302;

    // Signature builder (1400-1499)
    pub const SIG_BAD_MANIFEST_NAME: u32 = 1401;
    pub const SIG_UNSUPPORTED_COMBINATION: u32 = 1402;
    pub const SIG_PRIMITIVE_FAILED: u32 = 1403;
    pub const SIG_NUMBERING_EXHAUSTED: u32 = 1404;
    pub const SIG_MANIFEST_UNREADABLE: u32 = 1405;

    // Template engine (1500-1599)
    pub const TPL_BAD_COLUMN_INDEX: u32 = 1501;
    pub const TPL_MISSING_ROW_VALUE: u32 = 1502;
    pub const TPL_UNKNOWN_TOKEN: u32 = 1503;
    pub const TPL_MALFORMED_HEADER: u32 = 1504;
    pub const TPL_UNREADABLE: u32 = 1505;

    // VEO assembler (1600-1699)
    pub const ASM_BAD_WORKING_DIR: u32 = 1601;
    pub const ASM_NULL_NAME: u32 = 1602;
    pub const ASM_STAGING_IO: u32 = 1603;
    pub const ASM_ILLEGAL_STATE: u32 = 1604;
    pub const ASM_DUPLICATE_CONTENT_ROOT: u32 = 1605;
    pub const ASM_UNKNOWN_CONTENT_ROOT: u32 = 1606;
    pub const ASM_DUPLICATE_DESTINATION: u32 = 1607;
    pub const ASM_README_MISSING: u32 = 1608;
    pub const ASM_ZIP_IO: u32 = 1609;
    pub const ASM_UNSUPPORTED_HASH: u32 = 1610;

    // Batch driver (1700-1799)
    pub const BATCH_SCRIPT_UNREADABLE: u32 = 1701;
    pub const BATCH_UNKNOWN_COMMAND: u32 = 1702;
    pub const BATCH_COMMAND_OUT_OF_ORDER: u32 = 1703;
    pub const BATCH_MALFORMED_LINE: u32 = 1704;
    pub const BATCH_NO_VEO_IN_FLIGHT: u32 = 1705;

    // Configuration (1800-1899)
    pub const CONFIG_UNREADABLE: u32 = 1801;
    pub const CONFIG_MALFORMED: u32 = 1802;
}

/// Whether an error is scoped to the current VEO or to the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abandon the current VEO; the caller (assembler or batch driver) may
    /// proceed with the next one.
    Recoverable,
    /// Abort the whole batch.
    Fatal,
}

/// A VEO-building error: stable numeric id, origin, and message.
#[derive(Debug, Clone)]
pub struct VeoError {
    pub code: u32,
    pub module: &'static str,
    pub method: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl VeoError {
    pub fn recoverable(
        code: u32,
        module: &'static str,
        method: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            module,
            method,
            message: message.into(),
            severity: Severity::Recoverable,
        }
    }

    pub fn fatal(
        code: u32,
        module: &'static str,
        method: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            module,
            method,
            message: message.into(),
            severity: Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for VeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}: {} (E{:04})",
            self.module, self.method, self.message, self.code
        )
    }
}

impl std::error::Error for VeoError {}

pub type VeoResult<T> = Result<T, VeoError>;
