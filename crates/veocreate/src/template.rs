//! Parses a template file (schema/syntax header line, then a body with
//! `$$...$$`-delimited substitutions) into an ordered fragment list, and
//! renders that list against a per-record data row.

use std::fs;
use std::path::Path;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{VeoError, codes};
use crate::xml_writer::escape;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Literal(String),
    Timestamp,
    /// Zero-based row index; rendered with XML escaping applied.
    Column(usize),
    /// Zero-based row index; rendered verbatim, caller guarantees XML safety.
    ColumnXml(usize),
}

#[derive(Debug, Clone)]
pub struct Template {
    pub schema_uri: String,
    pub syntax_uri: String,
    fragments: Vec<Fragment>,
}

impl Template {
    pub fn from_file(path: &Path) -> Result<Self, VeoError> {
        let text = fs::read_to_string(path).map_err(|e| {
            VeoError::recoverable(
                codes::TPL_UNREADABLE,
                "template",
                "from_file",
                format!("cannot read template {}: {e}", path.display()),
            )
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, VeoError> {
        let mut lines = text.splitn(2, '\n');
        let header = lines.next().unwrap_or_default();
        let body = lines.next().unwrap_or_default();

        let mut header_parts = header.trim_end_matches('\r').split('\t');
        let schema_uri = header_parts.next().unwrap_or_default().to_string();
        let syntax_uri = header_parts.next().unwrap_or_default().to_string();
        if schema_uri.is_empty() || syntax_uri.is_empty() || header_parts.next().is_some() {
            return Err(VeoError::recoverable(
                codes::TPL_MALFORMED_HEADER,
                "template",
                "parse",
                "template header must be exactly `schema-uri<TAB>syntax-uri`",
            ));
        }

        let fragments = parse_body(body)?;
        Ok(Self {
            schema_uri,
            syntax_uri,
            fragments,
        })
    }

    pub fn render(&self, row: &[String], now: OffsetDateTime) -> Result<String, VeoError> {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(s) => out.push_str(s),
                Fragment::Timestamp => out.push_str(&format_timestamp(now)),
                Fragment::Column(idx) => out.push_str(&escape(column(row, *idx)?)),
                Fragment::ColumnXml(idx) => out.push_str(column(row, *idx)?),
            }
        }
        Ok(out)
    }
}

fn column(row: &[String], idx: usize) -> Result<&str, VeoError> {
    row.get(idx).map(String::as_str).ok_or_else(|| {
        VeoError::recoverable(
            codes::TPL_MISSING_ROW_VALUE,
            "template",
            "render",
            format!("row has no value at column {} (0-based index {idx})", idx + 1),
        )
    })
}

pub fn format_timestamp(when: OffsetDateTime) -> String {
    when.format(&Rfc3339)
        .unwrap_or_else(|_| when.unix_timestamp().to_string())
}

/// Scan `body` as a two-state machine: literal text outside `$$...$$`,
/// substitution tokens inside. Unknown tokens are logged and dropped, not
/// treated as parse failures; malformed column indices abort parsing.
fn parse_body(body: &str) -> Result<Vec<Fragment>, VeoError> {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut chars = body.chars().peekable();
    let mut in_token = false;

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'$') {
            chars.next();
            if in_token {
                // literal currently holds the token body between markers
                if let Some(fragment) = parse_token(&literal)? {
                    fragments.push(fragment);
                }
                literal.clear();
            } else if !literal.is_empty() {
                fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
            }
            in_token = !in_token;
        } else {
            literal.push(c);
        }
    }

    if in_token {
        return Err(VeoError::recoverable(
            codes::TPL_MALFORMED_HEADER,
            "template",
            "parse",
            "template body has an unterminated `$$` substitution marker",
        ));
    }
    if !literal.is_empty() {
        fragments.push(Fragment::Literal(literal));
    }
    Ok(fragments)
}

fn parse_token(raw: &str) -> Result<Option<Fragment>, VeoError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut words = trimmed.split_whitespace();
    let head = words.next().unwrap();

    match head {
        "date" => Ok(Some(Fragment::Timestamp)),
        "column" => Ok(Some(Fragment::Column(parse_index(
            words.next(),
            trimmed,
        )?))),
        "column-xml" => Ok(Some(Fragment::ColumnXml(parse_index(
            words.next(),
            trimmed,
        )?))),
        bare => match bare.parse::<i64>() {
            Ok(n) if n >= 1 => Ok(Some(Fragment::Column((n - 1) as usize))),
            _ => {
                tracing::warn!(token = trimmed, "unknown template substitution token, ignoring");
                Ok(None)
            }
        },
    }
}

fn parse_index(word: Option<&str>, token: &str) -> Result<usize, VeoError> {
    let bad = || {
        VeoError::recoverable(
            codes::TPL_BAD_COLUMN_INDEX,
            "template",
            "parse",
            format!("`{token}` does not have a valid column index (N >= 1)"),
        )
    };
    let n: i64 = word.ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if n < 1 {
        return Err(bad());
    }
    Ok((n - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_header_and_renders_columns() {
        let tpl = Template::parse("http://schema/agls\thttp://syntax/xml\nTitle: $$column 2$$\n")
            .unwrap();
        assert_eq!(tpl.schema_uri, "http://schema/agls");
        assert_eq!(tpl.syntax_uri, "http://syntax/xml");
        let rendered = tpl
            .render(&row(&["id", "My <Title>"]), datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        assert_eq!(rendered, "Title: My &lt;Title&gt;");
    }

    #[test]
    fn bare_numeric_token_is_equivalent_to_column() {
        let tpl = Template::parse("s\tt\n$$1$$-$$2$$\n").unwrap();
        let rendered = tpl
            .render(&row(&["a", "b"]), datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        assert_eq!(rendered, "a-b");
    }

    #[test]
    fn column_xml_is_not_escaped() {
        let tpl = Template::parse("s\tt\n$$column-xml 1$$\n").unwrap();
        let rendered = tpl
            .render(&row(&["<raw/>"]), datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        assert_eq!(rendered, "<raw/>");
    }

    #[test]
    fn unknown_token_is_dropped_not_fatal() {
        let tpl = Template::parse("s\tt\nbefore $$frobnicate$$ after\n").unwrap();
        let rendered = tpl
            .render(&row(&[]), datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        assert_eq!(rendered, "before  after\n");
    }

    #[test]
    fn column_index_zero_is_an_error() {
        assert!(Template::parse("s\tt\n$$column 0$$\n").is_err());
    }

    #[test]
    fn missing_row_value_errors_at_render_time() {
        let tpl = Template::parse("s\tt\n$$column 1$$\n").unwrap();
        let err = tpl
            .render(&row(&[]), datetime!(2024-01-01 00:00 UTC))
            .unwrap_err();
        assert_eq!(err.code, codes::TPL_MISSING_ROW_VALUE);
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(Template::parse("only-one-uri\nbody\n").is_err());
    }
}
