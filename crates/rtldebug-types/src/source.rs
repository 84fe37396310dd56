//! Source locations from Yosys `src` attributes.
//!
//! Yosys records where each cell and wire came from as
//! `file:line[.col][-line[.col]]`. Cells merged from several places carry
//! several such spans joined by `|`; only the first is kept.

use std::fmt;

/// A span in a design source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Path of the source file, as written by the synthesis tool.
    pub file: String,
    /// First line of the span (1-based).
    pub start_line: u32,
    /// First column of the span (1-based), when recorded.
    pub start_column: Option<u32>,
    /// Last line of the span, when recorded.
    pub end_line: Option<u32>,
    /// Last column of the span, when recorded.
    pub end_column: Option<u32>,
}

impl Location {
    /// Parse a Yosys `src` attribute.
    ///
    /// Returns `None` if the attribute does not contain a recognizable span.
    pub fn parse(src: &str) -> Option<Self> {
        let first = src.split('|').next()?;
        let (file, span) = first.rsplit_once(':')?;
        if file.is_empty() {
            return None;
        }
        let (start, end) = match span.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (span, None),
        };
        let (start_line, start_column) = parse_position(start)?;
        let (end_line, end_column) = match end {
            Some(end) => {
                let (line, column) = parse_position(end)?;
                (Some(line), column)
            }
            None => (None, None),
        };
        Some(Self {
            file: file.to_owned(),
            start_line,
            start_column,
            end_line,
            end_column,
        })
    }
}

/// Parse `line[.col]`.
fn parse_position(text: &str) -> Option<(u32, Option<u32>)> {
    match text.split_once('.') {
        Some((line, column)) => Some((line.parse().ok()?, Some(column.parse().ok()?))),
        None => Some((text.parse().ok()?, None)),
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.start_line)?;
        if let Some(column) = self.start_column {
            write!(f, ".{column}")?;
        }
        if let Some(line) = self.end_line {
            write!(f, "-{line}")?;
            if let Some(column) = self.end_column {
                write!(f, ".{column}")?;
            }
        }
        Ok(())
    }
}
