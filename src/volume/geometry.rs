// Voxel-index / physical-space geometry and storage-axis reconciliation.
//
// Every conversion between the order axes are stored in on disk and the
// physical (x, y, z) order goes through `storage_to_xyz` / `xyz_to_storage`.

use serde::Serialize;

/// Maps storage axes (slowest to fastest varying) onto physical axes.
///
/// `physical_axis[i]` is the physical axis (0 = x, 1 = y, 2 = z) that storage
/// axis `i` indexes. NIfTI and DICOM data are x-fastest, so a grid read from
/// either has storage shape `[nz, ny, nx]` and order [`AxisOrder::ZYX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisOrder {
    physical_axis: [usize; 3],
}

impl AxisOrder {
    /// Storage `[z, y, x]`: x varies fastest.
    pub const ZYX: AxisOrder = AxisOrder {
        physical_axis: [2, 1, 0],
    };

    /// Storage `[x, y, z]`: z varies fastest.
    pub const XYZ: AxisOrder = AxisOrder {
        physical_axis: [0, 1, 2],
    };

    /// Build an order from an arbitrary permutation of `[0, 1, 2]`.
    pub fn from_permutation(physical_axis: [usize; 3]) -> Option<Self> {
        let mut seen = [false; 3];
        for &axis in &physical_axis {
            if axis > 2 || seen[axis] {
                return None;
            }
            seen[axis] = true;
        }
        Some(Self { physical_axis })
    }

    pub fn physical_axes(&self) -> [usize; 3] {
        self.physical_axis
    }
}

/// Reorder a storage-order triple into physical (x, y, z) order.
pub fn storage_to_xyz<T: Copy>(storage: [T; 3], order: AxisOrder) -> [T; 3] {
    let mut xyz = storage;
    for (storage_axis, &physical) in order.physical_axis.iter().enumerate() {
        xyz[physical] = storage[storage_axis];
    }
    xyz
}

/// Inverse of [`storage_to_xyz`].
pub fn xyz_to_storage<T: Copy>(xyz: [T; 3], order: AxisOrder) -> [T; 3] {
    let mut storage = xyz;
    for (storage_axis, &physical) in order.physical_axis.iter().enumerate() {
        storage[storage_axis] = xyz[physical];
    }
    storage
}

/// Spacing (mm/voxel) and origin (mm), both in physical x, y, z order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpatialMetadata {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl SpatialMetadata {
    pub fn new(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self { spacing, origin }
    }

    /// Spacing must be finite and strictly positive, origin finite.
    pub fn validate(&self) -> Result<(), String> {
        for (axis, s) in self.spacing.iter().enumerate() {
            if !s.is_finite() || *s <= 0.0 {
                return Err(format!("spacing[{axis}] must be positive, got {s}"));
            }
        }
        for (axis, o) in self.origin.iter().enumerate() {
            if !o.is_finite() {
                return Err(format!("origin[{axis}] must be finite, got {o}"));
            }
        }
        Ok(())
    }

    /// `physical[i] = voxel[i] * spacing[i] + origin[i]`, xyz order in and out.
    pub fn voxel_to_physical(&self, voxel: [f64; 3]) -> [f64; 3] {
        [
            voxel[0] * self.spacing[0] + self.origin[0],
            voxel[1] * self.spacing[1] + self.origin[1],
            voxel[2] * self.spacing[2] + self.origin[2],
        ]
    }

    pub fn physical_to_voxel(&self, physical: [f64; 3]) -> [f64; 3] {
        [
            (physical[0] - self.origin[0]) / self.spacing[0],
            (physical[1] - self.origin[1]) / self.spacing[1],
            (physical[2] - self.origin[2]) / self.spacing[2],
        ]
    }
}

impl Default for SpatialMetadata {
    fn default() -> Self {
        Self::new([1.0; 3], [0.0; 3])
    }
}

/// Row-major unravel of a linear index over `shape` (last axis fastest).
pub(crate) fn unravel(linear: usize, shape: [usize; 3]) -> [usize; 3] {
    let plane = shape[1] * shape[2];
    [linear / plane, (linear / shape[2]) % shape[1], linear % shape[2]]
}

pub(crate) fn ravel(index: [usize; 3], shape: [usize; 3]) -> usize {
    (index[0] * shape[1] + index[1]) * shape[2] + index[2]
}
