mod common;

use std::fs;

use common::write_mask;
use spine_landmarks::engine::extract::{extract, LabelFilter, PhysicalPoint, VoxelPoint};
use spine_landmarks::error::ExtractError;
use spine_landmarks::volume::SpatialMetadata;

#[test]
fn test_single_voxel_mask() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("vertebrae_L1.nii.gz"), [4, 4, 4], &[[0, 0, 0]]);

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.label, "L1");
    assert_eq!(r.center_voxel, VoxelPoint { x: 0, y: 0, z: 0 });
    assert_eq!(r.center_physical, PhysicalPoint { x: 0.0, y: 0.0, z: 0.0 });
    assert_eq!(r.bounds_voxel.min, VoxelPoint { x: 0, y: 0, z: 0 });
    assert_eq!(r.bounds_voxel.max, VoxelPoint { x: 0, y: 0, z: 0 });
    assert_eq!(r.voxel_count, 1);
    assert_eq!(r.confidence, 0.001);
}

#[test]
fn test_empty_mask_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("vertebrae_T3.nii.gz"), [3, 3, 3], &[]);
    write_mask(&dir.path().join("vertebrae_T4.nii.gz"), [3, 3, 3], &[[1, 1, 1]]);

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["T4"]);
}

#[test]
fn test_corrupt_mask_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("vertebrae_L1.nii.gz"), [3, 3, 3], &[[1, 1, 1]]);
    fs::write(dir.path().join("vertebrae_L2.nii.gz"), b"\x1f\x8b garbage").unwrap();

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "L1");
}

#[test]
fn test_storage_axes_map_to_physical_xyz() {
    // Deliberately non-cubic grid so any axis swap changes the answer.
    let dir = tempfile::tempdir().unwrap();
    write_mask(
        &dir.path().join("vertebrae_C3.nii.gz"),
        [5, 3, 2],
        &[[4, 1, 0], [4, 2, 1]],
    );
    let spatial = SpatialMetadata::new([0.5, 1.0, 2.5], [-10.0, 20.0, 30.0]);

    let records = extract(dir.path(), &spatial, &LabelFilter::default()).unwrap();
    let r = &records[0];
    // Centroid (4, 1.5, 0.5) rounds half to even.
    assert_eq!(r.center_voxel, VoxelPoint { x: 4, y: 2, z: 0 });
    assert_eq!(
        r.center_physical,
        PhysicalPoint { x: -8.0, y: 21.5, z: 31.25 }
    );
    assert_eq!(r.bounds_voxel.min, VoxelPoint { x: 4, y: 1, z: 0 });
    assert_eq!(r.bounds_voxel.max, VoxelPoint { x: 4, y: 2, z: 1 });
}

#[test]
fn test_records_in_anatomical_order() {
    let dir = tempfile::tempdir().unwrap();
    for label in ["T12", "L1", "C1", "T2", "S1"] {
        write_mask(
            &dir.path().join(format!("vertebrae_{label}.nii.gz")),
            [2, 2, 2],
            &[[0, 0, 0]],
        );
    }

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["C1", "T2", "T12", "L1", "S1"]);
}

#[test]
fn test_non_matching_files_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("rib_left_1.nii.gz"), [2, 2, 2], &[[0, 0, 0]]);
    write_mask(&dir.path().join("vertebrae_L4.nii.gz"), [2, 2, 2], &[[1, 0, 0]]);
    fs::write(dir.path().join("vertebrae_L5.txt"), b"notes").unwrap();
    fs::create_dir(dir.path().join("vertebrae_L3.nii.gz")).unwrap();

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "L4");
}

#[test]
fn test_custom_filter_prefix() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("rib_left_1.nii.gz"), [2, 2, 2], &[[0, 0, 0]]);

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::new("rib_")).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "left_1");
}

#[test]
fn test_duplicate_label_keeps_first_file() {
    let dir = tempfile::tempdir().unwrap();
    // "vertebrae_L1.nii" sorts before "vertebrae_L1.nii.gz".
    write_mask(&dir.path().join("vertebrae_L1.nii"), [3, 3, 3], &[[0, 0, 0]]);
    write_mask(
        &dir.path().join("vertebrae_L1.nii.gz"),
        [3, 3, 3],
        &[[0, 0, 0], [1, 1, 1]],
    );

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].voxel_count, 1);
}

#[test]
fn test_confidence_saturates() {
    let dir = tempfile::tempdir().unwrap();
    let voxels: Vec<[usize; 3]> = (0..3)
        .flat_map(|z| (0..20).flat_map(move |y| (0..20).map(move |x| [x, y, z])))
        .collect();
    write_mask(&dir.path().join("vertebrae_S1.nii.gz"), [20, 20, 3], &voxels);

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert_eq!(records[0].voxel_count, 1200);
    assert_eq!(records[0].confidence, 1.0);
}

#[test]
fn test_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = extract(
        &dir.path().join("absent"),
        &SpatialMetadata::default(),
        &LabelFilter::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractError::MissingDirectory(_)));
}

#[test]
fn test_malformed_spacing_fails() {
    let dir = tempfile::tempdir().unwrap();
    let spatial = SpatialMetadata::new([1.0, 0.0, 1.0], [0.0; 3]);
    let err = extract(dir.path(), &spatial, &LabelFilter::default()).unwrap_err();
    assert!(matches!(err, ExtractError::MalformedMetadata(_)));
}

#[test]
fn test_empty_directory_yields_no_records() {
    let dir = tempfile::tempdir().unwrap();
    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    assert!(records.is_empty());
}

#[test]
fn test_mask_with_inflated_header_dims_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_mask(&dir.path().join("vertebrae_L1.nii"), [3, 3, 3], &[[1, 1, 1]]);
    let bad = dir.path().join("vertebrae_L2.nii");
    write_mask(&bad, [3, 3, 3], &[[0, 0, 0]]);
    // dim[1..=3] claim 32767 voxels per axis over 27 bytes of data.
    let mut bytes = fs::read(&bad).unwrap();
    for axis in 0..3 {
        let at = 42 + 2 * axis;
        bytes[at..at + 2].copy_from_slice(&32767i16.to_le_bytes());
    }
    fs::write(&bad, bytes).unwrap();

    let records = extract(dir.path(), &SpatialMetadata::default(), &LabelFilter::default()).unwrap();
    let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["L1"]);
}
