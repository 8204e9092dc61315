//! Snapshot format detection from file extensions.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{Result, SnapshotError};

/// Which generation of the native format a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Current,
    Legacy,
}

/// Every on-disk layout the loader can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotFormat {
    Full(Generation),
    Compact(Generation),
    Extended(Generation),
    Gadget,
}

/// Probe order: newest and most specific first.
pub const PROBE_ORDER: [SnapshotFormat; 7] = [
    SnapshotFormat::Full(Generation::Current),
    SnapshotFormat::Compact(Generation::Current),
    SnapshotFormat::Extended(Generation::Current),
    SnapshotFormat::Full(Generation::Legacy),
    SnapshotFormat::Compact(Generation::Legacy),
    SnapshotFormat::Extended(Generation::Legacy),
    SnapshotFormat::Gadget,
];

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Full(Generation::Current) => "agf",
            SnapshotFormat::Compact(Generation::Current) => "agfc",
            SnapshotFormat::Extended(Generation::Current) => "agfe",
            SnapshotFormat::Full(Generation::Legacy) => "ag",
            SnapshotFormat::Compact(Generation::Legacy) => "agc",
            SnapshotFormat::Extended(Generation::Legacy) => "age",
            SnapshotFormat::Gadget => "gadget",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        PROBE_ORDER.into_iter().find(|format| format.extension() == ext)
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.extension())
    }
}

/// File chosen for one time step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSnapshot {
    pub step: u32,
    pub format: SnapshotFormat,
    pub path: PathBuf,
}

/// Base filename of a step: `<base_dir>/<step>` without extension.
pub fn step_base(base_dir: &Path, step: u32) -> PathBuf {
    base_dir.join(step.to_string())
}

/// Pick the first existing candidate file for `step`.
pub fn resolve(base_dir: &Path, step: u32) -> Result<ResolvedSnapshot> {
    let base = step_base(base_dir, step);

    for format in PROBE_ORDER {
        let path = base.with_extension(format.extension());
        if path.is_file() {
            debug!(step, path = %path.display(), format = %format, "Resolved snapshot file");
            return Ok(ResolvedSnapshot { step, format, path });
        }
    }

    Err(SnapshotError::SnapshotNotFound { step, base })
}
