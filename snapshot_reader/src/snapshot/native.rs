//! Decoders for the three native fixed-record formats.
//!
//! Every native file is a [`NativeHeader`] followed by `count` packed records,
//! where `count` is the sum of the three per-category counts in the header.
//!
//! ```text
//! full      pos f64x3 | vel f64x3 | mass | T | density       | type
//! compact   pos f32x3 | density f32                           | type
//! extended  pos f64x3 | vel f64x3 | mass | T | P | density | U | type
//! ```
//!
//! The type field is one byte in the full layout and in every legacy layout,
//! and four bytes in the current compact and extended layouts.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::classify::classify_native;
use super::cursor::ByteCursor;
use super::error::{IntegrityWarning, Result, SnapshotError};
use super::format::{Generation, SnapshotFormat};
use super::types::{NativeHeader, Particle};

/// Mass assigned to records that do not store one.
pub const COMPACT_DEFAULT_MASS: f64 = 1.0;

/// What to do when a legacy body is shorter than its header declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Fail with `TruncatedInput`.
    #[default]
    Strict,
    /// Decode the whole records present and record a warning.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeVariant {
    Full,
    Compact,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeWidth {
    U8,
    I32,
}

impl TypeWidth {
    fn size(self) -> usize {
        match self {
            TypeWidth::U8 => 1,
            TypeWidth::I32 => 4,
        }
    }

    fn read(self, cursor: &mut ByteCursor<'_>) -> Result<i64> {
        match self {
            TypeWidth::U8 => cursor.read_u8().map(i64::from),
            TypeWidth::I32 => cursor.read_i32().map(i64::from),
        }
    }
}

/// Per-particle record shape of one native format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub variant: NativeVariant,
    pub generation: Generation,
    pub type_width: TypeWidth,
}

impl RecordLayout {
    pub fn for_format(format: SnapshotFormat) -> Option<Self> {
        let (variant, generation) = match format {
            SnapshotFormat::Full(generation) => (NativeVariant::Full, generation),
            SnapshotFormat::Compact(generation) => (NativeVariant::Compact, generation),
            SnapshotFormat::Extended(generation) => (NativeVariant::Extended, generation),
            SnapshotFormat::Gadget => return None,
        };
        let type_width = match (variant, generation) {
            (NativeVariant::Full, _) | (_, Generation::Legacy) => TypeWidth::U8,
            (_, Generation::Current) => TypeWidth::I32,
        };
        Some(Self {
            variant,
            generation,
            type_width,
        })
    }

    pub fn record_size(&self) -> usize {
        let fields = match self.variant {
            NativeVariant::Full => 6 * 8 + 3 * 8,
            NativeVariant::Compact => 3 * 4 + 4,
            NativeVariant::Extended => 6 * 8 + 5 * 8,
        };
        fields + self.type_width.size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullRecord {
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    pub temperature: f64,
    pub density: f64,
    pub type_code: i64,
}

/// Single-precision record; widened only when assembled into a [`Particle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactRecord {
    pub position: [f32; 3],
    pub density: f32,
    pub type_code: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedRecord {
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub density: f64,
    pub internal_energy: f64,
    pub type_code: i64,
}

impl FullRecord {
    fn read(cursor: &mut ByteCursor<'_>, type_width: TypeWidth) -> Result<Self> {
        Ok(Self {
            position: cursor.read_dvec3()?,
            velocity: cursor.read_dvec3()?,
            mass: cursor.read_f64()?,
            temperature: cursor.read_f64()?,
            density: cursor.read_f64()?,
            type_code: type_width.read(cursor)?,
        })
    }

    pub fn to_particle(&self) -> Result<Particle> {
        let (kind, component) = classify_native(self.type_code)?;
        let mut particle = Particle::new(kind, component);
        particle.position = self.position;
        particle.velocity = self.velocity;
        particle.mass = self.mass;
        particle.temperature = self.temperature;
        particle.density = self.density;
        Ok(particle)
    }
}

impl CompactRecord {
    fn read(cursor: &mut ByteCursor<'_>, type_width: TypeWidth) -> Result<Self> {
        Ok(Self {
            position: [cursor.read_f32()?, cursor.read_f32()?, cursor.read_f32()?],
            density: cursor.read_f32()?,
            type_code: type_width.read(cursor)?,
        })
    }

    pub fn to_particle(&self) -> Result<Particle> {
        let (kind, component) = classify_native(self.type_code)?;
        let mut particle = Particle::new(kind, component);
        let [x, y, z] = self.position;
        particle.position = DVec3::new(f64::from(x), f64::from(y), f64::from(z));
        particle.density = f64::from(self.density);
        particle.mass = COMPACT_DEFAULT_MASS;
        Ok(particle)
    }
}

impl ExtendedRecord {
    fn read(cursor: &mut ByteCursor<'_>, type_width: TypeWidth) -> Result<Self> {
        Ok(Self {
            position: cursor.read_dvec3()?,
            velocity: cursor.read_dvec3()?,
            mass: cursor.read_f64()?,
            temperature: cursor.read_f64()?,
            pressure: cursor.read_f64()?,
            density: cursor.read_f64()?,
            internal_energy: cursor.read_f64()?,
            type_code: type_width.read(cursor)?,
        })
    }

    pub fn to_particle(&self) -> Result<Particle> {
        let (kind, component) = classify_native(self.type_code)?;
        let mut particle = Particle::new(kind, component);
        particle.position = self.position;
        particle.velocity = self.velocity;
        particle.mass = self.mass;
        particle.temperature = self.temperature;
        particle.pressure = self.pressure;
        particle.density = self.density;
        particle.internal_energy = self.internal_energy;
        Ok(particle)
    }
}

/// Header plus decoded records of one native file.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSnapshot<R> {
    pub header: NativeHeader,
    pub layout: RecordLayout,
    pub records: Vec<R>,
}

pub type FullSnapshot = NativeSnapshot<FullRecord>;
pub type CompactSnapshot = NativeSnapshot<CompactRecord>;
pub type ExtendedSnapshot = NativeSnapshot<ExtendedRecord>;

pub fn decode_full(
    data: &[u8],
    layout: RecordLayout,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<FullSnapshot> {
    decode_with(data, layout, policy, warnings, FullRecord::read)
}

pub fn decode_compact(
    data: &[u8],
    layout: RecordLayout,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<CompactSnapshot> {
    decode_with(data, layout, policy, warnings, CompactRecord::read)
}

pub fn decode_extended(
    data: &[u8],
    layout: RecordLayout,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<ExtendedSnapshot> {
    decode_with(data, layout, policy, warnings, ExtendedRecord::read)
}

fn decode_with<R>(
    data: &[u8],
    layout: RecordLayout,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
    read_record: fn(&mut ByteCursor<'_>, TypeWidth) -> Result<R>,
) -> Result<NativeSnapshot<R>> {
    let mut cursor = ByteCursor::new(data, "native header");
    let header = NativeHeader::read(&mut cursor)?;

    let declared = usize::try_from(header.total_particles())
        .map_err(|_| SnapshotError::invalid_header("particle count exceeds address space"))?;
    let record_size = layout.record_size();
    let expected = declared.checked_mul(record_size).ok_or_else(|| {
        SnapshotError::invalid_header(format_args!(
            "{declared} records of {record_size} bytes overflow"
        ))
    })?;

    let body = &data[NativeHeader::SIZE..];
    let record_count = body_record_count(
        body.len(),
        declared,
        expected,
        record_size,
        layout,
        policy,
        warnings,
    )?;

    let mut cursor = ByteCursor::new(&body[..record_count * record_size], "native body");
    let mut records = Vec::with_capacity(record_count);
    for _ in 0..record_count {
        records.push(read_record(&mut cursor, layout.type_width)?);
    }

    Ok(NativeSnapshot {
        header,
        layout,
        records,
    })
}

/// Number of records to decode from a body of `available` bytes.
fn body_record_count(
    available: usize,
    declared: usize,
    expected: usize,
    record_size: usize,
    layout: RecordLayout,
    policy: ReadPolicy,
    warnings: &mut Vec<IntegrityWarning>,
) -> Result<usize> {
    if available < expected {
        let lenient = policy == ReadPolicy::Lenient && layout.generation == Generation::Legacy;
        if !lenient {
            return Err(SnapshotError::truncated("native body", expected, available));
        }
        let decoded = available / record_size;
        warn!(
            declared,
            decoded,
            "Legacy snapshot body is short, decoding whole records only"
        );
        warnings.push(IntegrityWarning::PartialBody { declared, decoded });
        return Ok(decoded);
    }

    if available > expected {
        warn!(
            expected,
            actual = available,
            "Native body is longer than declared, ignoring trailing bytes"
        );
        warnings.push(IntegrityWarning::SizeMismatch {
            context: "native body".to_string(),
            expected,
            actual: available,
        });
    }

    Ok(declared)
}
