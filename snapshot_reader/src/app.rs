use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::snapshot::{
    LoadReport, LoaderConfig, Particle, ParticleStats, ReadPolicy, RunParameters,
    SnapshotFormat, SnapshotLoader,
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "snapshot-reader",
    author,
    version,
    about = "Decode and summarise particle simulation snapshots",
    long_about = None
)]
pub struct Args {
    /// Directory holding one snapshot file per time step (`<step>.<ext>`)
    #[arg(long, value_name = "PATH")]
    pub data_dir: PathBuf,

    /// Decode a single time step
    #[arg(long, conflicts_with = "all")]
    pub step: Option<u32>,

    /// Walk every time step of the run
    #[arg(long)]
    pub all: bool,

    /// How to treat legacy snapshots whose body is shorter than declared
    #[arg(long, value_enum, default_value_t = PolicyArg::Strict)]
    pub policy: PolicyArg,

    /// Number of decoded steps kept in memory (0 disables caching)
    #[arg(long, default_value_t = 8)]
    pub cache_size: usize,

    /// Print one JSON summary per step on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Strict,
    Lenient,
}

impl From<PolicyArg> for ReadPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Strict => ReadPolicy::Strict,
            PolicyArg::Lenient => ReadPolicy::Lenient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSelection {
    Single(u32),
    All,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub selection: StepSelection,
    pub loader: LoaderConfig,
    pub json: bool,
}

impl From<Args> for AppConfig {
    fn from(value: Args) -> Self {
        let selection = match (value.all, value.step) {
            (true, _) => StepSelection::All,
            (false, Some(step)) => StepSelection::Single(step),
            (false, None) => StepSelection::Single(0),
        };
        Self {
            data_dir: value.data_dir,
            selection,
            loader: LoaderConfig {
                policy: value.policy.into(),
                cache_capacity: value.cache_size,
            },
            json: value.json,
        }
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Per-step summary emitted by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub step: u32,
    pub format: String,
    pub path: PathBuf,
    pub particle_count: usize,
    pub run: RunParameters,
    pub stats: ParticleStats,
    pub warning_count: usize,
}

impl StepSummary {
    pub fn new(report: &LoadReport, particles: &[Particle], run: RunParameters) -> Self {
        Self {
            step: report.step,
            format: report.format.to_string(),
            path: report.path.clone(),
            particle_count: report.particle_count,
            run,
            stats: ParticleStats::from_particles(particles),
            warning_count: report.warnings.len(),
        }
    }
}

/// Totals of one CLI invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub decoded: usize,
    pub missing: usize,
    pub failed: usize,
}

pub fn run(config: &AppConfig) -> Result<RunSummary> {
    ensure_data_dir(&config.data_dir)?;

    let loader = SnapshotLoader::new(config.data_dir.clone(), config.loader.clone());
    let mut particles = Vec::new();
    let mut params = RunParameters::default();

    info!(
        data_dir = %config.data_dir.display(),
        policy = ?config.loader.policy,
        cache_size = config.loader.cache_capacity,
        "Starting snapshot reader"
    );

    match config.selection {
        StepSelection::Single(step) => {
            let report = loader
                .load_into(step, &mut particles, &mut params)
                .with_context(|| format!("failed to load step {step}"))?;
            emit(config, &StepSummary::new(&report, &particles, params))?;
            Ok(RunSummary {
                decoded: 1,
                ..Default::default()
            })
        }
        StepSelection::All => walk_run(config, &loader, &mut particles, &mut params),
    }
}

/// Visit every step of the run in order, skipping missing ones.
fn walk_run(
    config: &AppConfig,
    loader: &SnapshotLoader,
    particles: &mut Vec<Particle>,
    params: &mut RunParameters,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let first = loader
        .load_into(0, particles, params)
        .context("failed to load the first step of the run")?;
    emit(config, &StepSummary::new(&first, particles, *params))?;
    summary.decoded += 1;

    // The walk never goes past the last step file on disk.
    let on_disk = discover_steps(&config.data_dir)?
        .last()
        .map_or(1, |&last| u64::from(last) + 1);
    let step_count = match params.total_step_count {
        0 => on_disk,
        declared => declared.min(on_disk),
    };
    let last_step = u32::try_from(step_count).unwrap_or(u32::MAX);
    info!(
        declared = params.total_step_count,
        walking = last_step,
        "Walking run"
    );

    for step in 1..last_step {
        match loader.load_into(step, particles, params) {
            Ok(report) => {
                emit(config, &StepSummary::new(&report, particles, *params))?;
                summary.decoded += 1;
            }
            Err(err) if err.is_not_found() => summary.missing += 1,
            Err(_) => summary.failed += 1,
        }
    }

    info!(
        decoded = summary.decoded,
        missing = summary.missing,
        failed = summary.failed,
        "Run walk complete"
    );
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some steps could not be decoded");
    }
    Ok(summary)
}

fn emit(config: &AppConfig, summary: &StepSummary) -> Result<()> {
    if config.json {
        let line = serde_json::to_string(summary).context("failed to encode step summary")?;
        println!("{line}");
    } else {
        info!(
            step = summary.step,
            format = %summary.format,
            particles = summary.particle_count,
            stars = summary.stats.stars,
            gas = summary.stats.gas,
            dark_matter = summary.stats.dark_matter,
            mean_density = summary.stats.mean_density,
            warnings = summary.warning_count,
            "Step summary"
        );
    }
    Ok(())
}

/// Step indices that have at least one recognised snapshot file.
pub fn discover_steps(data_dir: &Path) -> Result<BTreeSet<u32>> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("failed to list {}", data_dir.display()))?;

    let mut steps = BTreeSet::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", data_dir.display()))?
            .path();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(SnapshotFormat::from_extension)
            .is_some();
        let step = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u32>().ok());
        if let (true, Some(step)) = (known, step) {
            steps.insert(step);
        }
    }
    Ok(steps)
}

pub fn ensure_data_dir(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect data directory {}", path.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("data directory is not a directory: {}", path.display());
    }
    Ok(())
}
