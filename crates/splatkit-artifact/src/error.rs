use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a PLY file (missing 'ply' magic)")]
    NotPly,

    #[error("malformed PLY header at line {line}: {reason}")]
    MalformedHeader { line: usize, reason: String },

    #[error("unsupported PLY encoding: {0}")]
    UnsupportedFormat(String),

    #[error("missing splat fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("element '{element}' truncated: expected {expected} records, read {read}")]
    Truncated {
        element: String,
        expected: usize,
        read: usize,
    },

    #[error("bad value in element '{element}' record {record}: {reason}")]
    InvalidValue {
        element: String,
        record: usize,
        reason: String,
    },
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Required fields the artifact lacks, if that is what went wrong.
    pub fn missing_fields(&self) -> &[String] {
        match self {
            Self::MissingFields(fields) => fields,
            _ => &[],
        }
    }
}
