#![allow(dead_code)]

use std::{fs, path::Path};

pub const STAR: i32 = 1;
pub const GAS: i32 = 2;
pub const DARK_MATTER: i32 = 3;

pub fn native_header(counts: [i32; 3], delta_time: f64, end_time: f64) -> Vec<u8> {
    let mut bytes = Vec::new();
    for count in counts {
        bytes.extend_from_slice(&count.to_ne_bytes());
    }
    for value in [delta_time, end_time, 0.0] {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    bytes
}

fn push_f64s(bytes: &mut Vec<u8>, values: &[f64]) {
    for value in values {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
}

fn push_f32s(bytes: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
}

/// `.agf`: position, velocity, mass, temperature, density, u8 type.
pub fn full_bytes(records: &[([f64; 3], i32)]) -> Vec<u8> {
    let mut bytes = native_header([records.len() as i32, 0, 0], 0.5, 10.0);
    for (index, (position, kind)) in records.iter().enumerate() {
        push_f64s(&mut bytes, position);
        push_f64s(&mut bytes, &[0.1, 0.2, 0.3]);
        push_f64s(&mut bytes, &[2.0, 100.0 + index as f64, 0.5]);
        bytes.push(*kind as u8);
    }
    bytes
}

/// `.agfc`: f32 position, f32 density, i32 type.
pub fn compact_bytes(records: &[([f32; 3], f32, i32)]) -> Vec<u8> {
    let mut bytes = native_header([records.len() as i32, 0, 0], 0.5, 10.0);
    for (position, density, kind) in records {
        push_f32s(&mut bytes, position);
        push_f32s(&mut bytes, &[*density]);
        bytes.extend_from_slice(&kind.to_ne_bytes());
    }
    bytes
}

/// `.agfe`: full fields plus pressure and internal energy, i32 type.
pub fn extended_bytes(records: &[([f64; 3], i32)]) -> Vec<u8> {
    let mut bytes = native_header([records.len() as i32, 0, 0], 0.5, 10.0);
    for (position, kind) in records {
        push_f64s(&mut bytes, position);
        push_f64s(&mut bytes, &[0.1, 0.2, 0.3]);
        push_f64s(&mut bytes, &[2.0, 100.0, 7.0, 0.5, 42.0]);
        bytes.extend_from_slice(&kind.to_ne_bytes());
    }
    bytes
}

/// Options for a synthetic Gadget file.
#[derive(Debug, Clone)]
pub struct GadgetFixture {
    pub counts: [u32; 6],
    pub masses: [f64; 6],
    /// Overrides the trailing size marker of the position block.
    pub position_trailer: Option<u32>,
}

impl GadgetFixture {
    pub fn new(counts: [u32; 6]) -> Self {
        Self {
            counts,
            masses: [0.0; 6],
            position_trailer: None,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|&count| count as usize).sum()
    }

    pub fn bytes(&self) -> Vec<u8> {
        let total = self.total();
        let mut header = Vec::with_capacity(256);
        for count in self.counts {
            header.extend_from_slice(&count.to_ne_bytes());
        }
        push_f64s(&mut header, &self.masses);
        header.resize(256, 0);

        let mut bytes = Vec::new();
        push_block(&mut bytes, &header, None);

        let positions: Vec<f32> = (0..total).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        push_block(&mut bytes, &f32_payload(&positions), self.position_trailer);

        let velocities: Vec<f32> = (0..total).flat_map(|i| [0.0, i as f32, 0.0]).collect();
        push_block(&mut bytes, &f32_payload(&velocities), None);

        let ids: Vec<u8> = (0..total as u32).flat_map(|id| id.to_ne_bytes()).collect();
        push_block(&mut bytes, &ids, None);

        let individual: usize = self
            .counts
            .iter()
            .zip(self.masses.iter())
            .filter(|(_, mass)| **mass == 0.0)
            .map(|(&count, _)| count as usize)
            .sum();
        if individual > 0 {
            let masses: Vec<f32> = (0..individual).map(|i| 1.0 + i as f32).collect();
            push_block(&mut bytes, &f32_payload(&masses), None);
        }

        let gas = self.counts[0] as usize;
        if gas > 0 {
            let energies: Vec<f32> = (0..gas).map(|i| 10.0 * (i + 1) as f32).collect();
            push_block(&mut bytes, &f32_payload(&energies), None);
        }
        bytes
    }
}

fn f32_payload(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    push_f32s(&mut bytes, values);
    bytes
}

fn push_block(bytes: &mut Vec<u8>, payload: &[u8], trailer: Option<u32>) {
    let size = payload.len() as u32;
    bytes.extend_from_slice(&size.to_ne_bytes());
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&trailer.unwrap_or(size).to_ne_bytes());
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).expect("write fixture");
}
