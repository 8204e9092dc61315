pub mod app;
pub mod snapshot;

pub use snapshot::{
    DecodedSnapshot, Particle, RunParameters, SnapshotError, SnapshotFormat, SnapshotLoader,
};
