//! Raw category codes to the (kind, component) taxonomy.

use super::error::{Result, SnapshotError};
use super::types::{GalaxyComponent, ParticleKind};

/// Map a Gadget category index (0..=5) to kind and component.
pub fn classify_gadget(category: usize) -> Result<(ParticleKind, GalaxyComponent)> {
    match category {
        0 => Ok((ParticleKind::Gas, GalaxyComponent::Disk)),
        1 => Ok((ParticleKind::DarkMatter, GalaxyComponent::Halo)),
        2 | 4 | 5 => Ok((ParticleKind::Star, GalaxyComponent::Disk)),
        3 => Ok((ParticleKind::Star, GalaxyComponent::Bulge)),
        other => Err(SnapshotError::UnknownCategory {
            code: other as i64,
        }),
    }
}

/// Native records store only the kind code; the component follows from it.
pub fn classify_native(code: i64) -> Result<(ParticleKind, GalaxyComponent)> {
    let kind = ParticleKind::from_code(code).ok_or(SnapshotError::UnknownCategory { code })?;
    Ok((kind, kind.default_component()))
}
