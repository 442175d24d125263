//! Error and diagnostic types shared by the format readers and the pipeline.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::format::Format;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O operation failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Unbalanced conditionals, stray `#else`/`#endif`, or a directive missing its operand.
    #[error("malformed directive at line {line}: {details}")]
    MalformedDirective { line: usize, details: String },

    #[error("line {line} has {found} columns; expected {expected} (from the first data line)")]
    ColumnMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{what} mismatch at line {line}: header declares {declared}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        declared: usize,
        found: usize,
        line: usize,
    },

    #[error("failed to parse {format} data: {details} (at line {line})")]
    Parse {
        format: Format,
        line: usize,
        details: String,
    },

    #[error("index group '{0}' is not defined")]
    UnknownGroup(String),

    #[error("pipeline stage '{stage}' failed: {details}")]
    Stage { stage: String, details: String },

    #[error("can't infer a file format from {0:?}")]
    UnsupportedFormat(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(format: Format, line: usize, details: impl Into<String>) -> Self {
        Self::Parse {
            format,
            line,
            details: details.into(),
        }
    }

    pub fn malformed(line: usize, details: impl Into<String>) -> Self {
        Self::MalformedDirective {
            line,
            details: details.into(),
        }
    }
}

/// Where a duplicated name was seen.
#[derive(Clone, Debug, PartialEq)]
pub enum NameOrigin {
    /// A group header in an index listing, with its line number.
    IndexGroup { line: usize },
    /// A pipeline stage, with its position in the chain.
    PipelineStage { position: usize },
}

/// A non-fatal note that a name was seen more than once. The default policy for the
/// collection that produced it has already been applied; this is for reporting only.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateNameWarning {
    pub name: String,
    pub origin: NameOrigin,
}

impl fmt::Display for DuplicateNameWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            NameOrigin::IndexGroup { line } => write!(
                f,
                "duplicate index group '{}' at line {line}; keeping the first one",
                self.name
            ),
            NameOrigin::PipelineStage { position } => write!(
                f,
                "duplicate stage name '{}' at position {position}; lookups by name return the first",
                self.name
            ),
        }
    }
}
