// Volume I/O: NIfTI and DICOM readers, voxel grids and spatial geometry.

pub mod dicom;
pub mod geometry;
pub mod grid;
pub mod nifti;

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::detect::format::{detect_format, sniff_file, VolumeFormat};
use crate::error::VolumeError;

pub use geometry::{storage_to_xyz, xyz_to_storage, AxisOrder, SpatialMetadata};
pub use grid::{OccupancyMask, SampleType, Volume, VolumeMetadata};
pub use nifti::write_nifti;

use grid::{RawVolume, VoxelBytes};

fn map_file(path: &Path) -> Result<VoxelBytes, VolumeError> {
    let file = File::open(path).map_err(|e| VolumeError::io(path, e))?;
    // SAFETY: mapped read-only; files are not modified while loaded.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| VolumeError::io(path, e))?;
    Ok(VoxelBytes::Mapped(map))
}

fn open_raw(path: &Path) -> Result<RawVolume, VolumeError> {
    match sniff_file(path)? {
        VolumeFormat::Nifti => nifti::raw_from_bytes(map_file(path)?),
        VolumeFormat::Dicom => dicom::raw_from_bytes(map_file(path)?),
        VolumeFormat::Gzip => {
            let inflated = nifti::inflate(path)?;
            match detect_format(&inflated) {
                VolumeFormat::Nifti => nifti::raw_from_bytes(VoxelBytes::Owned(inflated)),
                other => Err(VolumeError::Unsupported(format!(
                    "gzip payload of {} is {:?}, expected NIfTI",
                    path.display(),
                    other
                ))),
            }
        }
        VolumeFormat::NiftiPair => Err(VolumeError::Unsupported(
            "NIfTI header/image pairs".to_string(),
        )),
        VolumeFormat::Unknown => Err(VolumeError::UnknownFormat(path.to_path_buf())),
    }
}

/// Read shape and spatial placement without decoding any samples.
pub fn load_metadata(path: &Path) -> Result<VolumeMetadata, VolumeError> {
    match sniff_file(path)? {
        VolumeFormat::Nifti => Ok(nifti::read_header(path, false)?.metadata()),
        VolumeFormat::Gzip => Ok(nifti::read_header(path, true)?.metadata()),
        VolumeFormat::Dicom => dicom::read_metadata(&map_file(path)?),
        VolumeFormat::NiftiPair => Err(VolumeError::Unsupported(
            "NIfTI header/image pairs".to_string(),
        )),
        VolumeFormat::Unknown => Err(VolumeError::UnknownFormat(path.to_path_buf())),
    }
}

/// Load a full intensity volume. Part of the loader API alongside
/// [`load_metadata`] and [`load_mask`]; the inference path itself only needs
/// metadata.
pub fn load_volume(path: &Path) -> Result<Volume, VolumeError> {
    let volume = open_raw(path)?.into_volume()?;
    debug!(
        "Loaded volume {} shape={:?}",
        path.display(),
        volume.metadata().shape
    );
    Ok(volume)
}

/// Load a mask file, thresholding samples at `> 0`.
pub fn load_mask(path: &Path) -> Result<OccupancyMask, VolumeError> {
    open_raw(path)?.into_occupancy()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let spatial = SpatialMetadata::new([0.5, 0.5, 2.0], [10.0, -5.0, 100.0]);
        // 3 x 2 x 2 (x, y, z), x fastest; voxel (2, 1, 1) set.
        let mut data = vec![0u8; 12];
        data[2 + 3 + 6] = 1;
        write_nifti(&path, [3, 2, 2], &spatial, &data).unwrap();
        path
    }

    #[test]
    fn test_load_mask_plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["mask.nii", "mask.nii.gz"] {
            let path = write_sample(dir.path(), name);
            let mask = load_mask(&path).unwrap();
            assert_eq!(mask.shape(), [2, 2, 3]);
            assert_eq!(mask.iter_occupied().collect::<Vec<_>>(), vec![[1, 1, 2]]);
        }
    }

    #[test]
    fn test_load_metadata_matches_written_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "scan.nii.gz");
        let meta = load_metadata(&path).unwrap();
        assert_eq!(meta.shape, [2, 2, 3]);
        assert_eq!(meta.spatial.spacing, [0.5, 0.5, 2.0]);
        assert_eq!(meta.spatial.origin, [10.0, -5.0, 100.0]);
    }

    #[test]
    fn test_load_volume_from_dicom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.dcm");
        std::fs::write(&path, dicom::tests::sample_file()).unwrap();
        let volume = load_volume(&path).unwrap();
        assert_eq!(volume.metadata().shape, [2, 2, 3]);
        assert_eq!(volume.samples().len(), 12);
    }

    #[test]
    fn test_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not a volume").unwrap();
        assert!(matches!(load_mask(&path), Err(VolumeError::UnknownFormat(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_metadata(Path::new("/nonexistent/mask.nii.gz")).unwrap_err();
        assert!(matches!(err, VolumeError::Io { .. }));
    }
}
