// Mask result parser: turns a directory of per-structure occupancy masks into
// ordered, physically located landmark records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ordering::anatomical_cmp;
use crate::config::{CONFIDENCE_SATURATION_VOXELS, MASK_EXTENSIONS, VERTEBRA_MASK_PREFIX};
use crate::error::ExtractError;
use crate::volume::{load_mask, storage_to_xyz, OccupancyMask, SpatialMetadata};

/// Selects which mask files are structures of interest, by file-name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    prefix: String,
}

impl LabelFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The label encoded in `file_name`, or `None` when the file is not a
    /// qualifying mask.
    pub fn label_for<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let rest = file_name.strip_prefix(self.prefix.as_str())?;
        let label = MASK_EXTENSIONS
            .iter()
            .find_map(|ext| rest.strip_suffix(*ext))?;
        (!label.is_empty()).then_some(label)
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(VERTEBRA_MASK_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelPoint {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl From<[i64; 3]> for VoxelPoint {
    fn from([x, y, z]: [i64; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelBounds {
    pub min: VoxelPoint,
    pub max: VoxelPoint,
}

/// One located structure. All coordinates are in physical x, y, z order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub label: String,
    /// Centroid in voxel-index space, rounded half to even.
    #[serde(rename = "center")]
    pub center_voxel: VoxelPoint,
    /// Centroid in millimetres, rounded to 2 decimals.
    pub center_physical: PhysicalPoint,
    #[serde(rename = "bounds")]
    pub bounds_voxel: VoxelBounds,
    /// Size-based proxy in [0, 1], rounded to 3 decimals. This is not a
    /// probability reported by the model; see [`size_confidence`].
    pub confidence: f64,
    pub voxel_count: u64,
}

/// Confidence proxy derived from structure size alone: `count / 1000`,
/// saturating at 1.0. Larger masks are trusted more; nothing here is
/// calibrated against the model's own output probabilities.
pub fn size_confidence(voxel_count: u64) -> f64 {
    (voxel_count as f64 / CONFIDENCE_SATURATION_VOXELS as f64).min(1.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Centroid, bounds and count of a mask, or `None` when it is empty.
fn measure(label: &str, mask: &OccupancyMask, spatial: &SpatialMetadata) -> Option<LandmarkRecord> {
    let mut count = 0u64;
    let mut sum = [0f64; 3];
    let mut min = [usize::MAX; 3];
    let mut max = [0usize; 3];

    for index in mask.iter_occupied() {
        count += 1;
        for axis in 0..3 {
            sum[axis] += index[axis] as f64;
            min[axis] = min[axis].min(index[axis]);
            max[axis] = max[axis].max(index[axis]);
        }
    }
    if count == 0 {
        return None;
    }

    let order = mask.axis_order();
    let centroid = storage_to_xyz(sum.map(|s| s / count as f64), order);
    let min = storage_to_xyz(min.map(|v| v as i64), order);
    let max = storage_to_xyz(max.map(|v| v as i64), order);
    let physical = spatial.voxel_to_physical(centroid);

    Some(LandmarkRecord {
        label: label.to_string(),
        center_voxel: centroid.map(|c| c.round_ties_even() as i64).into(),
        center_physical: PhysicalPoint {
            x: round_to(physical[0], 2),
            y: round_to(physical[1], 2),
            z: round_to(physical[2], 2),
        },
        bounds_voxel: VoxelBounds {
            min: min.into(),
            max: max.into(),
        },
        confidence: round_to(size_confidence(count), 3),
        voxel_count: count,
    })
}

fn mask_files(dir: &Path, filter: &LabelFilter) -> Result<Vec<(String, PathBuf)>, ExtractError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ExtractError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ExtractError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if filter.label_for(&name).is_none() || !path.is_file() {
            continue;
        }
        files.push((name, path));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Parse every qualifying mask in `dir` into a landmark record, in
/// anatomical order.
///
/// A mask that cannot be read is skipped with a warning, as is an empty mask
/// or a second mask for a label already emitted. The call itself fails only
/// when `dir` cannot be listed or `spatial` is malformed.
pub fn extract(
    dir: &Path,
    spatial: &SpatialMetadata,
    filter: &LabelFilter,
) -> Result<Vec<LandmarkRecord>, ExtractError> {
    spatial.validate().map_err(ExtractError::MalformedMetadata)?;
    if !dir.is_dir() {
        return Err(ExtractError::MissingDirectory(dir.to_path_buf()));
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for (name, path) in mask_files(dir, filter)? {
        let Some(label) = filter.label_for(&name) else {
            continue;
        };
        if seen.contains(label) {
            warn!("Skipping {}: label {} already extracted", name, label);
            continue;
        }

        let mask = match load_mask(&path) {
            Ok(mask) => mask,
            Err(e) => {
                warn!("Skipping unreadable mask {}: {}", name, e);
                continue;
            }
        };

        match measure(label, &mask, spatial) {
            Some(record) => {
                debug!(
                    "{}: {} voxels, center {:?}",
                    record.label, record.voxel_count, record.center_voxel
                );
                seen.insert(label.to_string());
                records.push(record);
            }
            None => debug!("{}: empty mask", label),
        }
    }

    records.sort_by(|a, b| anatomical_cmp(&a.label, &b.label));
    Ok(records)
}
