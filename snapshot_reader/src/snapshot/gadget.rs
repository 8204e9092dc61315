//! Decoder for Gadget-style block snapshots.
//!
//! A snapshot is a sequence of blocks, each framed as
//! `u32 size | payload | u32 size`. The blocks consumed here are, in order:
//!
//! ```text
//! header   256 bytes
//! pos      N x f32x3
//! vel      N x f32x3
//! id       N x u32
//! mass     f32 per particle of every category with zero fixed mass (optional)
//! u        f32 per gas particle (only when there is gas)
//! ```
//!
//! Anything after the last consumed block is ignored.

use glam::DVec3;
use tracing::{debug, warn};

use super::classify::classify_gadget;
use super::cursor::ByteCursor;
use super::error::{IntegrityWarning, Result, SnapshotError};
use super::types::{GadgetHeader, Particle, GADGET_CATEGORIES};

/// Fully read block arrays of one Gadget snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GadgetSnapshot {
    pub header: GadgetHeader,
    pub positions: Vec<[f32; 3]>,
    pub velocities: Vec<[f32; 3]>,
    pub ids: Vec<u32>,
    /// Empty when every populated category has a fixed mass.
    pub masses: Vec<f32>,
    /// Gas particles only; empty when there is no gas.
    pub internal_energy: Vec<f32>,
}

pub fn decode_gadget(data: &[u8], warnings: &mut Vec<IntegrityWarning>) -> Result<GadgetSnapshot> {
    let mut cursor = ByteCursor::new(data, "gadget snapshot");

    let header_block = read_block(&mut cursor, "header", GadgetHeader::SIZE, warnings)?;
    let header = GadgetHeader::read(&mut ByteCursor::new(header_block, "gadget header"))?;

    let total = header.total_particles();
    let vector_bytes = total
        .checked_mul(12)
        .ok_or_else(|| SnapshotError::invalid_header(format_args!("{total} particles overflow")))?;

    let positions = read_vec3_block(&mut cursor, "position", total, vector_bytes, warnings)?;
    let velocities = read_vec3_block(&mut cursor, "velocity", total, vector_bytes, warnings)?;

    let ids_block = read_block(&mut cursor, "id", total * 4, warnings)?;
    let mut ids_cursor = ByteCursor::new(ids_block, "id block");
    let ids = (0..total)
        .map(|_| ids_cursor.read_u32())
        .collect::<Result<Vec<_>>>()?;

    let mass_count = header.individual_mass_count();
    let masses = if mass_count > 0 {
        read_f32_block(&mut cursor, "mass", mass_count, warnings)?
    } else {
        debug!("All populated categories have fixed masses, no mass block");
        Vec::new()
    };

    let gas_count = header.gas_count();
    let internal_energy = if gas_count > 0 {
        read_f32_block(&mut cursor, "internal energy", gas_count, warnings)?
    } else {
        Vec::new()
    };

    if !cursor.is_empty() {
        debug!(
            remaining = cursor.remaining(),
            "Ignoring trailing blocks after internal energy"
        );
    }

    Ok(GadgetSnapshot {
        header,
        positions,
        velocities,
        ids,
        masses,
        internal_energy,
    })
}

impl GadgetSnapshot {
    /// Assemble particles category by category, in file order.
    pub fn to_particles(&self) -> Result<Vec<Particle>> {
        let total = self.positions.len();
        let mut particles = Vec::with_capacity(total);
        let mut offset = 0usize;
        let mut mass_index = 0usize;
        let mut gas_index = 0usize;

        for category in 0..GADGET_CATEGORIES {
            let count = self.header.counts[category] as usize;
            if count == 0 {
                continue;
            }
            let (kind, component) = classify_gadget(category)?;
            let fixed_mass = self.header.masses[category];

            let end = offset + count;
            if end > total {
                return Err(SnapshotError::ParticleCountOverflow {
                    requested: end,
                    total,
                });
            }

            for index in offset..end {
                let mut particle = Particle::new(kind, component);
                particle.position = widen(self.positions[index]);
                particle.velocity = widen(self.velocities[index]);
                particle.id = Some(self.ids[index]);

                particle.mass = if fixed_mass != 0.0 {
                    fixed_mass
                } else {
                    let mass = take(&self.masses, mass_index)?;
                    mass_index += 1;
                    mass
                };

                if category == 0 {
                    particle.internal_energy = take(&self.internal_energy, gas_index)?;
                    gas_index += 1;
                }

                particles.push(particle);
            }
            offset = end;
        }

        Ok(particles)
    }
}

fn take(values: &[f32], index: usize) -> Result<f64> {
    values
        .get(index)
        .map(|&value| f64::from(value))
        .ok_or(SnapshotError::ParticleCountOverflow {
            requested: index + 1,
            total: values.len(),
        })
}

fn widen([x, y, z]: [f32; 3]) -> DVec3 {
    DVec3::new(f64::from(x), f64::from(y), f64::from(z))
}

/// Read one framed block and return exactly `expected` payload bytes.
///
/// Differing leading and trailing sizes are fatal. A declared size that
/// differs from `expected` is recorded as a warning; the payload must still
/// hold at least `expected` bytes.
fn read_block<'a>(
    cursor: &mut ByteCursor<'a>,
    block: &'static str,
    expected: usize,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<&'a [u8]> {
    let leading = cursor.read_u32()?;
    let payload = cursor.read_bytes(leading as usize)?;
    let trailing = cursor.read_u32()?;

    if leading != trailing {
        return Err(SnapshotError::CorruptBlock {
            block,
            leading,
            trailing,
        });
    }

    if payload.len() != expected {
        warn!(
            block,
            expected,
            declared = payload.len(),
            "Gadget block size differs from header counts"
        );
        warnings.push(IntegrityWarning::SizeMismatch {
            context: format!("{block} block"),
            expected,
            actual: payload.len(),
        });
        if payload.len() < expected {
            return Err(SnapshotError::truncated(
                format_args!("{block} block"),
                expected,
                payload.len(),
            ));
        }
    }

    Ok(&payload[..expected])
}

fn read_vec3_block(
    cursor: &mut ByteCursor<'_>,
    block: &'static str,
    count: usize,
    expected: usize,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<Vec<[f32; 3]>> {
    let payload = read_block(cursor, block, expected, warnings)?;
    let mut values = ByteCursor::new(payload, block);
    (0..count)
        .map(|_| -> Result<[f32; 3]> {
            Ok([values.read_f32()?, values.read_f32()?, values.read_f32()?])
        })
        .collect()
}

fn read_f32_block(
    cursor: &mut ByteCursor<'_>,
    block: &'static str,
    count: usize,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<Vec<f32>> {
    let payload = read_block(cursor, block, count * 4, warnings)?;
    let mut values = ByteCursor::new(payload, block);
    (0..count).map(|_| values.read_f32()).collect()
}
