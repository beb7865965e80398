// In-memory voxel grids: intensity volumes and bit-packed occupancy masks.

use std::ops::Deref;

use bitvec::prelude::*;
use memmap2::Mmap;

use super::geometry::{ravel, unravel, AxisOrder, SpatialMetadata};
use crate::error::VolumeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl SampleType {
    pub fn size(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// How to turn raw bytes into scaled sample values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SampleLayout {
    pub sample_type: SampleType,
    pub byte_order: ByteOrder,
    pub slope: f64,
    pub intercept: f64,
}

macro_rules! read_as {
    ($ty:ty, $bytes:expr, $order:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(buf) as f64,
            ByteOrder::Big => <$ty>::from_be_bytes(buf) as f64,
        }
    }};
}

impl SampleLayout {
    fn decode(&self, bytes: &[u8]) -> f64 {
        let raw = match self.sample_type {
            SampleType::U8 => bytes[0] as f64,
            SampleType::I8 => bytes[0] as i8 as f64,
            SampleType::U16 => read_as!(u16, bytes, self.byte_order),
            SampleType::I16 => read_as!(i16, bytes, self.byte_order),
            SampleType::U32 => read_as!(u32, bytes, self.byte_order),
            SampleType::I32 => read_as!(i32, bytes, self.byte_order),
            SampleType::U64 => read_as!(u64, bytes, self.byte_order),
            SampleType::I64 => read_as!(i64, bytes, self.byte_order),
            SampleType::F32 => read_as!(f32, bytes, self.byte_order),
            SampleType::F64 => read_as!(f64, bytes, self.byte_order),
        };
        // A zero slope means "no scaling" in both NIfTI and DICOM.
        if self.slope != 0.0 {
            raw * self.slope + self.intercept
        } else {
            raw
        }
    }

    /// The first `count` samples of `data`, or `Truncated` when the data is
    /// shorter than the header claims.
    fn sample_bytes<'a>(&self, data: &'a [u8], count: usize) -> Result<&'a [u8], VolumeError> {
        let truncated = |expected| VolumeError::Truncated {
            expected,
            found: data.len(),
        };
        let expected = count
            .checked_mul(self.sample_type.size())
            .ok_or_else(|| truncated(usize::MAX))?;
        data.get(..expected).ok_or_else(|| truncated(expected))
    }

    /// Visit `count` consecutive samples in storage order.
    fn for_each(
        &self,
        data: &[u8],
        count: usize,
        mut visit: impl FnMut(usize, f64),
    ) -> Result<(), VolumeError> {
        let data = self.sample_bytes(data, count)?;
        for (i, sample) in data.chunks_exact(self.sample_type.size()).enumerate() {
            visit(i, self.decode(sample));
        }
        Ok(())
    }
}

/// Voxel bytes either mapped straight from an uncompressed file or inflated
/// into memory.
pub(crate) enum VoxelBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for VoxelBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            VoxelBytes::Mapped(map) => &map[..],
            VoxelBytes::Owned(buf) => buf.as_slice(),
        }
    }
}

/// Shape, axis layout and spatial placement of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMetadata {
    /// Storage shape, slowest to fastest varying axis.
    pub shape: [usize; 3],
    pub axis_order: AxisOrder,
    pub spatial: SpatialMetadata,
}

impl VolumeMetadata {
    /// `None` when the shape overflows `usize`.
    pub fn voxel_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
    }
}

/// A decoded header plus the undecoded sample bytes that follow it.
pub(crate) struct RawVolume {
    pub meta: VolumeMetadata,
    pub layout: SampleLayout,
    pub bytes: VoxelBytes,
    pub data_offset: usize,
}

impl RawVolume {
    fn samples(&self) -> Result<&[u8], VolumeError> {
        self.bytes.get(self.data_offset..).ok_or(VolumeError::Truncated {
            expected: self.data_offset,
            found: self.bytes.len(),
        })
    }

    /// Sample bytes and voxel count, checked against the header's shape
    /// before anything is sized from it.
    fn checked_samples(&self) -> Result<(&[u8], usize), VolumeError> {
        let data = self.samples()?;
        let count = self.meta.voxel_count().ok_or(VolumeError::Truncated {
            expected: usize::MAX,
            found: data.len(),
        })?;
        Ok((self.layout.sample_bytes(data, count)?, count))
    }

    pub(crate) fn into_volume(self) -> Result<Volume, VolumeError> {
        let (data, count) = self.checked_samples()?;
        let mut samples = vec![0f32; count];
        self.layout.for_each(data, count, |i, v| samples[i] = v as f32)?;
        Ok(Volume {
            meta: self.meta,
            samples,
        })
    }

    /// Threshold every sample at `> 0` without materialising intensities.
    pub(crate) fn into_occupancy(self) -> Result<OccupancyMask, VolumeError> {
        let (data, count) = self.checked_samples()?;
        let mut bits = bitvec![0; count];
        self.layout.for_each(data, count, |i, v| {
            if v > 0.0 {
                bits.set(i, true);
            }
        })?;
        Ok(OccupancyMask {
            shape: self.meta.shape,
            axis_order: self.meta.axis_order,
            bits,
        })
    }
}

/// A loaded scan. Immutable once built.
#[derive(Debug, Clone)]
pub struct Volume {
    meta: VolumeMetadata,
    samples: Vec<f32>,
}

impl Volume {
    pub fn metadata(&self) -> &VolumeMetadata {
        &self.meta
    }

    pub fn spatial(&self) -> SpatialMetadata {
        self.meta.spatial
    }

    /// Sample at a storage-order index.
    pub fn get(&self, index: [usize; 3]) -> Option<f32> {
        let shape = self.meta.shape;
        if index.iter().zip(shape.iter()).any(|(i, n)| i >= n) {
            return None;
        }
        self.samples.get(ravel(index, shape)).copied()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Boolean occupancy of one structure, on its source volume's storage grid.
#[derive(Debug, Clone)]
pub struct OccupancyMask {
    shape: [usize; 3],
    axis_order: AxisOrder,
    bits: BitVec,
}

impl OccupancyMask {
    /// Build a mask with the given storage-order voxels set. Indices outside
    /// the shape are ignored.
    pub fn from_storage_indices(
        shape: [usize; 3],
        axis_order: AxisOrder,
        occupied: impl IntoIterator<Item = [usize; 3]>,
    ) -> Self {
        let mut bits = bitvec![0; shape.iter().product::<usize>()];
        for index in occupied {
            if index.iter().zip(shape.iter()).all(|(i, n)| i < n) {
                bits.set(ravel(index, shape), true);
            }
        }
        Self {
            shape,
            axis_order,
            bits,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn axis_order(&self) -> AxisOrder {
        self.axis_order
    }

    pub fn occupied_count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Storage-order indices of every occupied voxel, in storage order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let shape = self.shape;
        self.bits.iter_ones().map(move |linear| unravel(linear, shape))
    }
}
