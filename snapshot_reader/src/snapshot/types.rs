//! Particle data model and the on-disk header layouts.

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::cursor::ByteCursor;
use super::error::{Result, SnapshotError};

/// Primary classification used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleKind {
    Star,
    Gas,
    DarkMatter,
}

impl ParticleKind {
    /// Kind for a renderer code, the value stored in native records.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ParticleKind::Star),
            2 => Some(ParticleKind::Gas),
            3 => Some(ParticleKind::DarkMatter),
            _ => None,
        }
    }

    /// Component assumed when a format stores only the kind.
    pub fn default_component(self) -> GalaxyComponent {
        match self {
            ParticleKind::Star | ParticleKind::Gas => GalaxyComponent::Disk,
            ParticleKind::DarkMatter => GalaxyComponent::Halo,
        }
    }
}

impl fmt::Display for ParticleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParticleKind::Star => "star",
            ParticleKind::Gas => "gas",
            ParticleKind::DarkMatter => "dark-matter",
        };
        f.write_str(name)
    }
}

/// Structural classification, orthogonal to [`ParticleKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GalaxyComponent {
    Disk,
    Bulge,
    Halo,
}

/// One body or fluid element at a single time step.
///
/// Gas-only quantities (temperature, pressure, internal energy) are zero for
/// other kinds and for formats that do not carry them. `id` is only present
/// for identity-bearing formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub internal_energy: f64,
    pub density: f64,
    pub kind: ParticleKind,
    pub component: GalaxyComponent,
    pub id: Option<u32>,
}

impl Particle {
    pub fn new(kind: ParticleKind, component: GalaxyComponent) -> Self {
        Self {
            position: DVec3::ZERO,
            velocity: DVec3::ZERO,
            mass: 0.0,
            temperature: 0.0,
            pressure: 0.0,
            internal_energy: 0.0,
            density: 0.0,
            kind,
            component,
            id: None,
        }
    }
}

/// Run-level scalars published to the run controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    pub total_particle_count: u64,
    pub total_step_count: u64,
    pub delta_time: f64,
}

impl RunParameters {
    pub fn apply(&mut self, update: &RunUpdate) {
        self.total_particle_count = update.total_particle_count;
        if let Some(timing) = update.timing {
            self.total_step_count = timing.total_step_count;
            self.delta_time = timing.delta_time;
        }
    }
}

/// Scalars derived from one decoded header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunUpdate {
    pub total_particle_count: u64,
    /// Only formats that store run timing fill this in.
    pub timing: Option<StepTiming>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTiming {
    pub total_step_count: u64,
    pub delta_time: f64,
}

/// Header shared by every native format generation - 36 bytes, packed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeHeader {
    pub counts: [u32; 3],
    pub delta_time: f64,
    pub end_time: f64,
    pub current_time: f64,
}

impl NativeHeader {
    pub const SIZE: usize = 3 * 4 + 3 * 8;

    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let mut counts = [0u32; 3];
        for (category, slot) in counts.iter_mut().enumerate() {
            let raw = cursor.read_i32()?;
            *slot = u32::try_from(raw).map_err(|_| {
                SnapshotError::invalid_header(format_args!(
                    "negative particle count {raw} for category {category}"
                ))
            })?;
        }

        Ok(Self {
            counts,
            delta_time: cursor.read_f64()?,
            end_time: cursor.read_f64()?,
            current_time: cursor.read_f64()?,
        })
    }

    pub fn total_particles(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// `end_time / delta_time`, truncated; zero when the ratio is meaningless.
    pub fn total_step_count(&self) -> u64 {
        let ratio = self.end_time / self.delta_time;
        if self.delta_time > 0.0 && ratio.is_finite() && ratio >= 0.0 {
            ratio.floor() as u64
        } else {
            warn!(
                delta_time = self.delta_time,
                end_time = self.end_time,
                "Native header has unusable timing, reporting zero steps"
            );
            0
        }
    }

    pub fn run_update(&self) -> RunUpdate {
        RunUpdate {
            total_particle_count: self.total_particles(),
            timing: Some(StepTiming {
                total_step_count: self.total_step_count(),
                delta_time: self.delta_time,
            }),
        }
    }
}

/// Number of raw particle categories in a Gadget snapshot.
pub const GADGET_CATEGORIES: usize = 6;

/// Gadget snapshot header block - 256 bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GadgetHeader {
    pub counts: [u32; GADGET_CATEGORIES],
    /// Fixed per-category mass; zero means masses are stored per particle.
    pub masses: [f64; GADGET_CATEGORIES],
    pub time: f64,
    pub redshift: f64,
    pub flag_sfr: i32,
    pub flag_feedback: i32,
    pub counts_total: [u32; GADGET_CATEGORIES],
    pub flag_cooling: i32,
    pub num_files: i32,
    pub box_size: f64,
    pub omega0: f64,
    pub omega_lambda: f64,
    pub hubble_param: f64,
}

impl GadgetHeader {
    pub const SIZE: usize = 256;
    const USED: usize = 6 * 4 + 6 * 8 + 2 * 8 + 2 * 4 + 6 * 4 + 2 * 4 + 4 * 8;

    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let mut counts = [0u32; GADGET_CATEGORIES];
        for slot in &mut counts {
            *slot = cursor.read_u32()?;
        }
        let mut masses = [0f64; GADGET_CATEGORIES];
        for slot in &mut masses {
            *slot = cursor.read_f64()?;
        }
        let time = cursor.read_f64()?;
        let redshift = cursor.read_f64()?;
        let flag_sfr = cursor.read_i32()?;
        let flag_feedback = cursor.read_i32()?;
        let mut counts_total = [0u32; GADGET_CATEGORIES];
        for slot in &mut counts_total {
            *slot = cursor.read_u32()?;
        }
        let header = Self {
            counts,
            masses,
            time,
            redshift,
            flag_sfr,
            flag_feedback,
            counts_total,
            flag_cooling: cursor.read_i32()?,
            num_files: cursor.read_i32()?,
            box_size: cursor.read_f64()?,
            omega0: cursor.read_f64()?,
            omega_lambda: cursor.read_f64()?,
            hubble_param: cursor.read_f64()?,
        };
        cursor.skip(Self::SIZE - Self::USED)?;
        Ok(header)
    }

    pub fn total_particles(&self) -> usize {
        self.counts.iter().map(|&c| c as usize).sum()
    }

    /// Gas is category 0.
    pub fn gas_count(&self) -> usize {
        self.counts[0] as usize
    }

    /// Particles whose mass is stored individually in the mass block.
    pub fn individual_mass_count(&self) -> usize {
        self.counts
            .iter()
            .zip(self.masses.iter())
            .filter(|(_, mass)| **mass == 0.0)
            .map(|(&count, _)| count as usize)
            .sum()
    }

    pub fn run_update(&self) -> RunUpdate {
        RunUpdate {
            total_particle_count: self.total_particles() as u64,
            timing: None,
        }
    }
}

/// Aggregate view of a decoded particle collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticleStats {
    pub total: usize,
    pub stars: usize,
    pub gas: usize,
    pub dark_matter: usize,
    pub disk: usize,
    pub bulge: usize,
    pub halo: usize,
    pub mean_density: f64,
    pub total_mass: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_min: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_max: Option<[f64; 3]>,
}

impl ParticleStats {
    pub fn from_particles(particles: &[Particle]) -> Self {
        let mut stats = ParticleStats {
            total: particles.len(),
            ..Default::default()
        };
        if particles.is_empty() {
            return stats;
        }

        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        let mut density_sum = 0.0;

        for particle in particles {
            match particle.kind {
                ParticleKind::Star => stats.stars += 1,
                ParticleKind::Gas => stats.gas += 1,
                ParticleKind::DarkMatter => stats.dark_matter += 1,
            }
            match particle.component {
                GalaxyComponent::Disk => stats.disk += 1,
                GalaxyComponent::Bulge => stats.bulge += 1,
                GalaxyComponent::Halo => stats.halo += 1,
            }
            density_sum += particle.density;
            stats.total_mass += particle.mass;
            min = min.min(particle.position);
            max = max.max(particle.position);
        }

        stats.mean_density = density_sum / particles.len() as f64;
        stats.bounds_min = Some(min.to_array());
        stats.bounds_max = Some(max.to_array());
        stats
    }
}
