use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot file for step {step} (base {base:?})")]
    SnapshotNotFound { step: u32, base: PathBuf },

    #[error("truncated input in {context}: need {needed} bytes, {available} available")]
    TruncatedInput {
        context: String,
        needed: usize,
        available: usize,
    },

    #[error("corrupt {block} block: leading size {leading} != trailing size {trailing}")]
    CorruptBlock {
        block: &'static str,
        leading: u32,
        trailing: u32,
    },

    #[error("unknown particle category code: {code}")]
    UnknownCategory { code: i64 },

    #[error("particle count overflow: {requested} entries requested, {total} declared")]
    ParticleCountOverflow { requested: usize, total: usize },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: Box<SnapshotError>,
    },

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Non-fatal integrity finding recorded while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityWarning {
    #[error("size mismatch in {context}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("partial body: decoded {decoded} of {declared} declared records")]
    PartialBody { declared: usize, decoded: usize },
}

impl SnapshotError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn truncated(context: impl fmt::Display, needed: usize, available: usize) -> Self {
        Self::TruncatedInput {
            context: context.to_string(),
            needed,
            available,
        }
    }

    pub fn invalid_header(details: impl fmt::Display) -> Self {
        Self::InvalidHeader(details.to_string())
    }

    /// Attach the file being decoded, unless a path is already present.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Io { .. } | Self::Decode { .. } | Self::SnapshotNotFound { .. } => self,
            other => Self::Decode {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure with any file context stripped.
    pub fn root(&self) -> &SnapshotError {
        match self {
            Self::Decode { source, .. } => source.root(),
            other => other,
        }
    }

    /// Path of the file the failure happened in, when known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Decode { path, .. } | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }

    /// True when the step simply has no data on disk.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::SnapshotNotFound { .. })
    }
}
