mod common;

use std::fs;
use std::sync::Arc;

use common::{write_scan, FakeSegmenter};
use spine_landmarks::engine::extract::PhysicalPoint;
use spine_landmarks::engine::inference::{InferenceEngine, InferenceRequest};
use spine_landmarks::model::Device;
use spine_landmarks::volume::SpatialMetadata;

const DIMS: [usize; 3] = [6, 5, 4];

fn scan(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("scan.nii.gz");
    let spatial = SpatialMetadata::new([0.5, 0.5, 2.0], [-100.0, 50.0, 10.0]);
    write_scan(&path, DIMS, &spatial);
    path
}

#[tokio::test]
async fn test_run_extracts_ordered_landmarks() {
    let dir = tempfile::tempdir().unwrap();
    let input = scan(dir.path());
    let segmenter = Arc::new(
        FakeSegmenter::new(DIMS)
            .with_mask("vertebrae_L2", &[[1, 1, 3]])
            .with_mask("vertebrae_T12", &[[1, 1, 0], [3, 1, 0]])
            .with_mask("vertebrae_L1", &[[2, 2, 2]])
            .with_mask("rib_left_1", &[[0, 0, 0]]),
    );
    let engine = InferenceEngine::new(segmenter.clone());

    let result = engine
        .run(&InferenceRequest::new(&input, Device::Cpu).fast_mode(false))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.error.is_none());
    assert_eq!(result.device, Device::Cpu);
    assert!(!result.fast_mode);
    let labels: Vec<_> = result.vertebrae.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["T12", "L1", "L2"]);

    // Physical coordinates use the input scan's geometry.
    assert_eq!(
        result.vertebrae[0].center_physical,
        PhysicalPoint { x: -99.0, y: 50.5, z: 10.0 }
    );

    let request = segmenter.last_request().unwrap();
    assert_eq!(request.input, input);
    assert_eq!(request.structures.len(), 25);
    assert!(!request.fast);
    // Scratch output is gone once the run returns.
    assert!(!request.output_dir.exists());
}

#[tokio::test]
async fn test_requested_structures_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let input = scan(dir.path());
    let segmenter = Arc::new(FakeSegmenter::new(DIMS).with_mask("vertebrae_C2", &[[0, 0, 0]]));
    let engine = InferenceEngine::new(segmenter.clone());

    let request = InferenceRequest::new(&input, Device::Cuda)
        .structures(vec!["vertebrae_C2".to_string()]);
    let result = engine.run(&request).await;

    assert!(result.success);
    assert_eq!(result.vertebrae.len(), 1);
    let seen = segmenter.last_request().unwrap();
    assert_eq!(seen.structures, vec!["vertebrae_C2".to_string()]);
    assert_eq!(seen.device, Device::Cuda);
    assert!(seen.fast);
}

#[tokio::test]
async fn test_segmenter_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = scan(dir.path());
    let segmenter = Arc::new(FakeSegmenter::new(DIMS).failing_segment("CUDA out of memory"));
    let engine = InferenceEngine::new(segmenter.clone());

    let result = engine.run(&InferenceRequest::new(&input, Device::Cuda)).await;

    assert!(!result.success);
    assert!(result.vertebrae.is_empty());
    assert!(result.error.unwrap().contains("CUDA out of memory"));
    assert!(result.processing_time_ms >= 0.0);
    let request = segmenter.last_request().unwrap();
    assert!(!request.output_dir.exists());
}

#[tokio::test]
async fn test_unreadable_input_never_reaches_segmenter() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.dcm");
    fs::write(&input, b"definitely not a scan").unwrap();
    let segmenter = Arc::new(FakeSegmenter::new(DIMS));
    let engine = InferenceEngine::new(segmenter.clone());

    let result = engine.run(&InferenceRequest::new(&input, Device::Cpu)).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("failed to load input volume"));
    assert!(segmenter.last_request().is_none());
}

#[tokio::test]
async fn test_corrupt_mask_does_not_fail_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = scan(dir.path());
    let segmenter = Arc::new(
        FakeSegmenter::new(DIMS)
            .with_mask("vertebrae_L3", &[[0, 0, 0]])
            .with_corrupt_mask("vertebrae_L4"),
    );
    let engine = InferenceEngine::new(segmenter);

    let result = engine.run(&InferenceRequest::new(&input, Device::Cpu)).await;

    assert!(result.success);
    assert_eq!(result.vertebrae.len(), 1);
    assert_eq!(result.vertebrae[0].label, "L3");
}
