//! Per-step decode entry point used by the run controller.

use std::{
    fs::File,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::{IntegrityWarning, Result, SnapshotError};
use super::format::{self, ResolvedSnapshot, SnapshotFormat};
use super::gadget::{self, GadgetSnapshot};
use super::native::{
    self, CompactSnapshot, ExtendedSnapshot, FullSnapshot, ReadPolicy, RecordLayout,
};
use super::types::{Particle, RunParameters, RunUpdate};

/// Format-specific decode result.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotBody {
    NativeFull(FullSnapshot),
    NativeCompact(CompactSnapshot),
    NativeExtended(ExtendedSnapshot),
    Block(GadgetSnapshot),
}

impl SnapshotBody {
    /// Particle count declared by the header.
    pub fn declared_particles(&self) -> u64 {
        match self {
            SnapshotBody::NativeFull(s) => s.header.total_particles(),
            SnapshotBody::NativeCompact(s) => s.header.total_particles(),
            SnapshotBody::NativeExtended(s) => s.header.total_particles(),
            SnapshotBody::Block(s) => s.header.total_particles() as u64,
        }
    }

    pub fn run_update(&self) -> RunUpdate {
        match self {
            SnapshotBody::NativeFull(s) => s.header.run_update(),
            SnapshotBody::NativeCompact(s) => s.header.run_update(),
            SnapshotBody::NativeExtended(s) => s.header.run_update(),
            SnapshotBody::Block(s) => s.header.run_update(),
        }
    }

    pub fn to_particles(&self) -> Result<Vec<Particle>> {
        match self {
            SnapshotBody::NativeFull(s) => s.records.iter().map(|r| r.to_particle()).collect(),
            SnapshotBody::NativeCompact(s) => {
                s.records.iter().map(|r| r.to_particle()).collect()
            }
            SnapshotBody::NativeExtended(s) => {
                s.records.iter().map(|r| r.to_particle()).collect()
            }
            SnapshotBody::Block(s) => s.to_particles(),
        }
    }
}

/// One decoded time step.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSnapshot {
    pub step: u32,
    pub format: SnapshotFormat,
    pub path: PathBuf,
    pub body: SnapshotBody,
    pub warnings: Vec<IntegrityWarning>,
}

impl DecodedSnapshot {
    pub fn to_particles(&self) -> Result<Vec<Particle>> {
        self.body.to_particles()
    }

    pub fn run_update(&self) -> RunUpdate {
        self.body.run_update()
    }
}

/// Decode the file picked by the resolver.
///
/// Decode failures carry the file path (see [`SnapshotError::path`]).
pub fn decode_file(resolved: &ResolvedSnapshot, policy: ReadPolicy) -> Result<DecodedSnapshot> {
    let path = &resolved.path;
    let file = File::open(path).map_err(|err| SnapshotError::io(path, err))?;
    // SAFETY: the map is read-only and dropped before this call returns.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|err| SnapshotError::io(path, err))?;

    let mut warnings = Vec::new();
    let body = decode_body(&mmap, resolved.format, policy, &mut warnings)
        .map_err(|err| err.in_file(path))?;

    debug!(
        step = resolved.step,
        format = %resolved.format,
        bytes = mmap.len(),
        declared = body.declared_particles(),
        warnings = warnings.len(),
        "Decoded snapshot"
    );

    Ok(DecodedSnapshot {
        step: resolved.step,
        format: resolved.format,
        path: path.clone(),
        body,
        warnings,
    })
}

fn decode_body(
    data: &[u8],
    format: SnapshotFormat,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<SnapshotBody> {
    let native_layout = || {
        RecordLayout::for_format(format).ok_or_else(|| {
            SnapshotError::invalid_header(format_args!("{format} has no native record layout"))
        })
    };

    match format {
        SnapshotFormat::Full(_) => native::decode_full(data, native_layout()?, policy, warnings)
            .map(SnapshotBody::NativeFull),
        SnapshotFormat::Compact(_) => {
            native::decode_compact(data, native_layout()?, policy, warnings)
                .map(SnapshotBody::NativeCompact)
        }
        SnapshotFormat::Extended(_) => {
            native::decode_extended(data, native_layout()?, policy, warnings)
                .map(SnapshotBody::NativeExtended)
        }
        SnapshotFormat::Gadget => gadget::decode_gadget(data, warnings).map(SnapshotBody::Block),
    }
}

fn default_cache_capacity() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub policy: ReadPolicy,
    /// Decoded steps kept in memory; 0 disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            policy: ReadPolicy::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedStep {
    snapshot: Arc<DecodedSnapshot>,
    stamp: FileStamp,
}

/// Identity of a file's contents as far as metadata can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: Option<u64>,
}

impl FileStamp {
    fn of(path: &Path) -> Self {
        match path.metadata() {
            Ok(meta) => Self {
                modified: meta.modified().ok(),
                len: Some(meta.len()),
            },
            Err(_) => Self {
                modified: None,
                len: None,
            },
        }
    }

    fn is_known(&self) -> bool {
        self.modified.is_some() && self.len.is_some()
    }
}

/// Outcome of a successful [`SnapshotLoader::load_into`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub step: u32,
    pub format: SnapshotFormat,
    pub path: PathBuf,
    pub particle_count: usize,
    pub warnings: Vec<IntegrityWarning>,
}

/// Resolves and decodes time steps under one data directory.
pub struct SnapshotLoader {
    base_dir: PathBuf,
    config: LoaderConfig,
    cache: Option<Mutex<LruCache<u32, CachedStep>>>,
}

impl SnapshotLoader {
    pub fn new(base_dir: impl Into<PathBuf>, config: LoaderConfig) -> Self {
        let cache = NonZeroUsize::new(config.cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            base_dir: base_dir.into(),
            config,
            cache,
        }
    }

    /// Resolve and decode `step`, serving repeated requests from the cache.
    pub fn decode_step(&self, step: u32) -> Result<Arc<DecodedSnapshot>> {
        let resolved = format::resolve(&self.base_dir, step)?;
        let stamp = FileStamp::of(&resolved.path);

        if let Some(hit) = self.fetch_from_cache(&resolved, stamp) {
            debug!(step, "Snapshot cache hit");
            return Ok(hit);
        }

        let snapshot = Arc::new(decode_file(&resolved, self.config.policy)?);
        if let Some(cache) = &self.cache {
            cache.lock().put(
                step,
                CachedStep {
                    snapshot: Arc::clone(&snapshot),
                    stamp,
                },
            );
        }
        Ok(snapshot)
    }

    fn fetch_from_cache(
        &self,
        resolved: &ResolvedSnapshot,
        stamp: FileStamp,
    ) -> Option<Arc<DecodedSnapshot>> {
        let cache = self.cache.as_ref()?;
        let mut cache_lock = cache.lock();
        let entry = cache_lock.get(&resolved.step)?;

        let stale =
            entry.snapshot.path != resolved.path || !stamp.is_known() || entry.stamp != stamp;
        if stale {
            cache_lock.pop(&resolved.step);
            return None;
        }

        Some(Arc::clone(&entry.snapshot))
    }

    /// Repopulate `particles` with step `step` and publish its run scalars.
    ///
    /// A missing step leaves `particles` and `params` untouched. Any other
    /// failure clears `particles`. Failures are logged here and returned.
    pub fn load_into(
        &self,
        step: u32,
        particles: &mut Vec<Particle>,
        params: &mut RunParameters,
    ) -> Result<LoadReport> {
        let decoded = self
            .decode_step(step)
            .and_then(|snapshot| match snapshot.to_particles() {
                Ok(list) => Ok((snapshot, list)),
                Err(err) => Err(err.in_file(&snapshot.path)),
            });

        match decoded {
            Ok((snapshot, list)) => {
                *particles = list;
                params.apply(&snapshot.run_update());
                info!(
                    step,
                    format = %snapshot.format,
                    particles = particles.len(),
                    "Loaded snapshot"
                );
                Ok(LoadReport {
                    step,
                    format: snapshot.format,
                    path: snapshot.path.clone(),
                    particle_count: particles.len(),
                    warnings: snapshot.warnings.clone(),
                })
            }
            Err(err) if err.is_not_found() => {
                warn!(step, error = %err, "No snapshot for step, skipping");
                Err(err)
            }
            Err(err) => {
                particles.clear();
                let path = err.path().unwrap_or(self.base_dir.as_path());
                error!(
                    step,
                    path = %path.display(),
                    error = %err,
                    "Failed to decode snapshot"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::snapshot::types::ParticleKind;
    use glam::DVec3;
    use std::fs;
    use tempfile::TempDir;

    fn native_header(counts: [i32; 3], dt: f64, end: f64) -> Vec<u8> {
        let mut bytes = Vec::new();
        for count in counts {
            bytes.extend_from_slice(&count.to_ne_bytes());
        }
        for value in [dt, end, 0.0] {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        bytes
    }

    fn write_compact(dir: &Path, step: u32, points: &[([f32; 3], f32, i32)]) {
        let mut bytes = native_header([points.len() as i32, 0, 0], 0.1, 5.0);
        for (pos, density, kind) in points {
            for value in pos {
                bytes.extend_from_slice(&value.to_ne_bytes());
            }
            bytes.extend_from_slice(&density.to_ne_bytes());
            bytes.extend_from_slice(&kind.to_ne_bytes());
        }
        fs::write(dir.join(format!("{step}.agfc")), bytes).unwrap();
    }

    fn framed(payload: &[u8], trailing: u32) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&trailing.to_ne_bytes());
        bytes
    }

    fn write_gadget(dir: &Path, step: u32, corrupt_positions: bool) {
        let mut header = Vec::new();
        for count in [0u32, 1, 0, 0, 0, 0] {
            header.extend_from_slice(&count.to_ne_bytes());
        }
        for mass in [0.0f64, 2.0, 0.0, 0.0, 0.0, 0.0] {
            header.extend_from_slice(&mass.to_ne_bytes());
        }
        header.resize(256, 0);

        let vec3: Vec<u8> = [1.0f32, 2.0, 3.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let position_trailer = if corrupt_positions { 99 } else { 12 };

        let mut bytes = framed(&header, 256);
        bytes.extend(framed(&vec3, position_trailer));
        bytes.extend(framed(&vec3, 12));
        bytes.extend(framed(&42u32.to_ne_bytes(), 4));
        fs::write(dir.join(format!("{step}.gadget")), bytes).unwrap();
    }

    fn loader(dir: &TempDir, cache_capacity: usize) -> SnapshotLoader {
        SnapshotLoader::new(
            dir.path(),
            LoaderConfig {
                policy: ReadPolicy::Strict,
                cache_capacity,
            },
        )
    }

    #[test]
    fn test_load_into__native_step__then_particles_and_run_parameters() {
        let dir = TempDir::new().unwrap();
        write_compact(
            dir.path(),
            0,
            &[([1.0, 2.0, 3.0], 0.5, 1), ([4.0, 5.0, 6.0], 1.5, 2)],
        );

        let mut particles = Vec::new();
        let mut params = RunParameters::default();
        let report = loader(&dir, 0)
            .load_into(0, &mut particles, &mut params)
            .unwrap();

        assert_eq!(report.particle_count, 2);
        assert_eq!(particles[1].position, DVec3::new(4.0, 5.0, 6.0));
        assert_eq!(particles[1].kind, ParticleKind::Gas);
        assert_eq!(params.total_particle_count, 2);
        assert_eq!(params.total_step_count, 50);
        assert_eq!(params.delta_time, 0.1);
    }

    #[test]
    fn test_load_into__missing_step__then_collection_unchanged() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 0, &[([1.0, 1.0, 1.0], 1.0, 1)]);

        let loader = loader(&dir, 0);
        let mut particles = Vec::new();
        let mut params = RunParameters::default();
        loader.load_into(0, &mut particles, &mut params).unwrap();
        let before = particles.clone();
        let params_before = params;

        let err = loader.load_into(9999, &mut particles, &mut params).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(particles, before);
        assert_eq!(params, params_before);
    }

    #[test]
    fn test_load_into__corrupt_gadget__then_collection_cleared() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 0, &[([1.0, 1.0, 1.0], 1.0, 1)]);
        write_gadget(dir.path(), 1, true);

        let loader = loader(&dir, 0);
        let mut particles = Vec::new();
        let mut params = RunParameters::default();
        loader.load_into(0, &mut particles, &mut params).unwrap();
        assert_eq!(particles.len(), 1);

        let err = loader.load_into(1, &mut particles, &mut params).unwrap_err();
        assert!(err.path().is_some_and(|path| path.ends_with("1.gadget")));
        assert!(matches!(
            err.root(),
            SnapshotError::CorruptBlock {
                block: "position",
                ..
            }
        ));
        assert!(particles.is_empty());
    }

    #[test]
    fn test_decode_body__each_format__then_matching_body_variant() {
        let empty_native = native_header([0, 0, 0], 0.1, 5.0);
        for format in crate::snapshot::PROBE_ORDER {
            let mut warnings = Vec::new();
            let result = decode_body(&empty_native, format, ReadPolicy::Strict, &mut warnings);
            match (format, result) {
                (SnapshotFormat::Full(_), Ok(SnapshotBody::NativeFull(_)))
                | (SnapshotFormat::Compact(_), Ok(SnapshotBody::NativeCompact(_)))
                | (SnapshotFormat::Extended(_), Ok(SnapshotBody::NativeExtended(_))) => {}
                // A native header is never a valid framed Gadget header block.
                (SnapshotFormat::Gadget, Err(_)) => {}
                (format, other) => panic!("{format} decoded as {other:?}"),
            }
        }
    }

    #[test]
    fn test_load_into__truncated_native_body__then_error_names_file() {
        let dir = TempDir::new().unwrap();
        write_compact(
            dir.path(),
            0,
            &[([1.0, 1.0, 1.0], 1.0, 1), ([2.0, 2.0, 2.0], 1.0, 2)],
        );
        let path = dir.path().join("0.agfc");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let mut particles = Vec::new();
        let mut params = RunParameters::default();
        let err = loader(&dir, 0)
            .load_into(0, &mut particles, &mut params)
            .unwrap_err();

        assert!(err.to_string().contains("0.agfc"));
        assert!(err.to_string().contains("need 40 bytes, 35 available"));
        assert_eq!(err.path(), Some(path.as_path()));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_load_into__unknown_type_code__then_error_names_file() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 6, &[([0.0, 0.0, 0.0], 1.0, 7)]);

        let mut particles = Vec::new();
        let mut params = RunParameters::default();
        let err = loader(&dir, 0)
            .load_into(6, &mut particles, &mut params)
            .unwrap_err();

        assert!(matches!(
            err.root(),
            SnapshotError::UnknownCategory { code: 7 }
        ));
        assert!(err.path().is_some_and(|path| path.ends_with("6.agfc")));
    }

    #[test]
    fn test_load_into__gadget_step__then_timing_left_untouched() {
        let dir = TempDir::new().unwrap();
        write_gadget(dir.path(), 4, false);

        let mut particles = Vec::new();
        let mut params = RunParameters {
            total_particle_count: 100,
            total_step_count: 30,
            delta_time: 0.5,
        };
        loader(&dir, 0)
            .load_into(4, &mut particles, &mut params)
            .unwrap();

        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].id, Some(42));
        assert_eq!(particles[0].mass, 2.0);
        assert_eq!(params.total_particle_count, 1);
        assert_eq!(params.total_step_count, 30);
        assert_eq!(params.delta_time, 0.5);
    }

    #[test]
    fn test_decode_step__repeated_request__then_served_from_cache() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 2, &[([0.0, 0.0, 0.0], 1.0, 3)]);

        let loader = loader(&dir, 4);
        let first = loader.decode_step(2).unwrap();
        let second = loader.decode_step(2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_decode_step__higher_precedence_file_appears__then_cache_bypassed() {
        let dir = TempDir::new().unwrap();
        write_gadget(dir.path(), 7, false);

        let loader = loader(&dir, 4);
        let first = loader.decode_step(7).unwrap();
        assert_eq!(first.format, SnapshotFormat::Gadget);

        write_compact(dir.path(), 7, &[([0.0, 0.0, 0.0], 1.0, 1)]);
        let second = loader.decode_step(7).unwrap();
        assert!(matches!(second.body, SnapshotBody::NativeCompact(_)));
    }

    #[test]
    fn test_decode_step__rewritten_with_same_mtime__then_length_invalidates() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 3, &[([0.0, 0.0, 0.0], 1.0, 1)]);
        let path = dir.path().join("3.agfc");
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let loader = loader(&dir, 4);
        let first = loader.decode_step(3).unwrap();
        assert_eq!(first.to_particles().unwrap().len(), 1);

        write_compact(
            dir.path(),
            3,
            &[([0.0, 0.0, 0.0], 1.0, 1), ([1.0, 1.0, 1.0], 1.0, 2)],
        );
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);

        let second = loader.decode_step(3).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.to_particles().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_step__cache_disabled__then_fresh_decode_each_time() {
        let dir = TempDir::new().unwrap();
        write_compact(dir.path(), 0, &[([0.0, 0.0, 0.0], 1.0, 1)]);

        let loader = loader(&dir, 0);
        let first = loader.decode_step(0).unwrap();
        let second = loader.decode_step(0).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_loader_config__empty_json__then_defaults() {
        let config: LoaderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.cache_capacity, 8);

        let lenient: LoaderConfig = serde_json::from_str(r#"{"policy":"lenient"}"#).unwrap();
        assert_eq!(lenient.policy, ReadPolicy::Lenient);
    }
}
