//! Multi-format particle snapshot decoding.

pub mod classify;
pub mod cursor;
pub mod error;
pub mod format;
pub mod gadget;
pub mod loader;
pub mod native;
pub mod types;

pub use cursor::ByteCursor;
pub use error::{IntegrityWarning, Result, SnapshotError};
pub use format::{resolve, Generation, ResolvedSnapshot, SnapshotFormat, PROBE_ORDER};
pub use gadget::GadgetSnapshot;
pub use loader::{
    decode_file, DecodedSnapshot, LoadReport, LoaderConfig, SnapshotBody, SnapshotLoader,
};
pub use native::{ReadPolicy, RecordLayout};
pub use types::{
    GadgetHeader, GalaxyComponent, NativeHeader, Particle, ParticleKind, ParticleStats,
    RunParameters, RunUpdate, StepTiming,
};
