mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use common::FakeSegmenter;
use spine_landmarks::engine::cache::ModelCache;
use spine_landmarks::engine::downloader::{DownloadEvent, DownloadOutcome, DownloadPhase};
use spine_landmarks::error::CacheError;

fn drain(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phases(events: &[DownloadEvent]) -> Vec<(DownloadPhase, f64)> {
    events.iter().map(|e| (e.status, e.progress)).collect()
}

#[tokio::test]
async fn test_phases_when_weights_fetched_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let segmenter = Arc::new(FakeSegmenter::new([1, 1, 1]));
    let cache = ModelCache::new(dir.path(), segmenter.clone()).with_pacing(Duration::ZERO);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = cache.download("vertebrae", tx).await.unwrap();

    assert_eq!(
        phases(&drain(&mut rx)),
        vec![
            (DownloadPhase::Preparing, 0.0),
            (DownloadPhase::Downloading, 0.5),
            (DownloadPhase::Ready, 1.0),
        ]
    );
    match outcome {
        DownloadOutcome::Prepared(status) => assert!(!status.downloaded),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(*segmenter.prepared.lock(), vec!["vertebrae".to_string()]);
}

#[tokio::test]
async fn test_phases_when_weights_present_afterwards() {
    let dir = tempfile::tempdir().unwrap();
    let segmenter =
        FakeSegmenter::new([1, 1, 1]).writing_weights_to(dir.path().join("nnunet/results"));
    let cache = ModelCache::new(dir.path(), Arc::new(segmenter)).with_pacing(Duration::ZERO);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = cache.download("total_body", tx).await.unwrap();

    let events = drain(&mut rx);
    let last = events.last().unwrap();
    assert_eq!(last.status, DownloadPhase::Complete);
    assert_eq!(last.progress, 1.0);
    // Progress never goes backwards on success.
    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    match outcome {
        DownloadOutcome::Prepared(status) => {
            assert!(status.downloaded);
            assert_eq!(status.size_bytes, 4096);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_preparation_failure_becomes_error_phase() {
    let dir = tempfile::tempdir().unwrap();
    let segmenter = FakeSegmenter::new([1, 1, 1]).failing_prepare("network unreachable");
    let cache = ModelCache::new(dir.path(), Arc::new(segmenter)).with_pacing(Duration::ZERO);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = cache.download("vertebrae", tx).await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        phases(&events),
        vec![
            (DownloadPhase::Preparing, 0.0),
            (DownloadPhase::Downloading, 0.5),
            (DownloadPhase::Error, 0.0),
        ]
    );
    assert!(events[2].message.contains("network unreachable"));
    assert!(matches!(outcome, DownloadOutcome::Failed(m) if m.contains("network unreachable")));
}

#[tokio::test]
async fn test_unknown_task_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(dir.path(), Arc::new(FakeSegmenter::new([1, 1, 1])));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = cache.download("liver", tx).await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownTask { .. }));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_dropped_receiver_does_not_stop_preparation() {
    let dir = tempfile::tempdir().unwrap();
    let segmenter = Arc::new(FakeSegmenter::new([1, 1, 1]));
    let cache = ModelCache::new(dir.path(), segmenter.clone()).with_pacing(Duration::ZERO);
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let outcome = cache.download("vertebrae", tx).await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Prepared(_)));
    assert_eq!(segmenter.prepared.lock().len(), 1);
}

#[tokio::test]
async fn test_events_are_paced() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(dir.path(), Arc::new(FakeSegmenter::new([1, 1, 1])))
        .with_pacing(Duration::from_millis(20));
    let (tx, _rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    cache.download("vertebrae", tx).await.unwrap();
    // Three events, one pause after each.
    assert!(started.elapsed() >= Duration::from_millis(60));
}
