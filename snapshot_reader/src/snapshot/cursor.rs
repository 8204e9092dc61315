//! Forward-only reader for packed, native-endian binary fields.

use glam::DVec3;

use super::error::{Result, SnapshotError};

/// Sequential field reader over a borrowed byte slice.
///
/// Every read consumes exactly the encoded width of the field. Nothing is
/// aligned or padded, which matches the packed layouts of every snapshot
/// format this crate understands.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> ByteCursor<'a> {
    /// `context` names the region being read and shows up in truncation errors.
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            context,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `len` bytes as a sub-slice.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SnapshotError::truncated(
                format_args!("{} at offset {}", self.context, self.pos),
                len,
                self.remaining(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_ne_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_ne_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_ne_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.take().map(f32::from_ne_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.take().map(f64::from_ne_bytes)
    }

    /// Three consecutive `f64` values.
    pub fn read_dvec3(&mut self) -> Result<DVec3> {
        Ok(DVec3::new(
            self.read_f64()?,
            self.read_f64()?,
            self.read_f64()?,
        ))
    }

    /// Three consecutive `f32` values, widened to `f64`.
    pub fn read_vec3_f32(&mut self) -> Result<DVec3> {
        Ok(DVec3::new(
            f64::from(self.read_f32()?),
            f64::from(self.read_f32()?),
            f64::from(self.read_f32()?),
        ))
    }
}
