use std::sync::atomic::Ordering;
use std::time::Duration;

use tempfile::TempDir;
use webdiff::magick::BoundingBox;
use webdiff::pdiff::DiffOutcome;
use webdiff::{DiffError, ToolFailure};

use super::support::{service_with, test_config, write_file, FakeMagick, PROBE};

#[test]
fn test_generate_diff_runs_compare_once() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);
    let (a, b) = (dir.path().join("before.png"), dir.path().join("after.png"));

    let first = service.generate_diff(&a, &b).unwrap();
    let second = service.generate_diff(&a, &b).unwrap();

    assert_eq!(first, second);
    assert_eq!(fake.launches("compare"), 1);
    assert_eq!(fake.launches(PROBE), 1);
}

#[test]
fn test_compare_exit_codes() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);

    fake.compare_code.store(0, Ordering::SeqCst);
    let outcome = service
        .generate_diff(&dir.path().join("a.png"), &dir.path().join("a2.png"))
        .unwrap();
    assert!(matches!(outcome, DiffOutcome::Identical(_)));

    fake.compare_code.store(1, Ordering::SeqCst);
    let outcome = service
        .generate_diff(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    match &outcome {
        DiffOutcome::Different(artifact) => {
            assert!(!artifact.path().as_os_str().is_empty());
            assert!(artifact.path().exists());
            assert!(artifact.path().starts_with(dir.path()));
        }
        other => panic!("expected Different, got {other:?}"),
    }

    fake.compare_code.store(2, Ordering::SeqCst);
    let err = service
        .generate_diff(&dir.path().join("a.png"), &dir.path().join("small.png"))
        .unwrap_err();
    assert!(matches!(
        err,
        DiffError::ToolFailed(ToolFailure::ExitStatus { code: Some(2), .. })
    ));
}

#[test]
fn test_every_generation_gets_its_own_artifact() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);

    let ab = service
        .generate_diff(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    let ba = service
        .generate_diff(&dir.path().join("b.png"), &dir.path().join("a.png"))
        .unwrap();
    assert_ne!(ab.artifact(), ba.artifact());
    assert_eq!(fake.launches("compare"), 2);
}

#[test]
fn test_failed_compare_is_retried() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);
    let (a, b) = (dir.path().join("a.png"), dir.path().join("b.png"));

    fake.compare_code.store(2, Ordering::SeqCst);
    assert!(service.generate_diff(&a, &b).unwrap_err().is_retryable());

    fake.compare_code.store(1, Ordering::SeqCst);
    assert!(service.generate_diff(&a, &b).is_ok());
    assert_eq!(fake.launches("compare"), 2);
}

#[test]
fn test_unavailable_tool_launches_nothing() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::unavailable();
    let service = service_with(&dir, &fake);
    let diff = dir.path().join("diff.png");

    assert!(matches!(
        service.generate_diff(&dir.path().join("a.png"), &dir.path().join("b.png")),
        Err(DiffError::ToolUnavailable)
    ));
    assert!(matches!(service.dilate(&diff), Err(DiffError::ToolUnavailable)));
    assert!(matches!(
        service.extract_bounding_box(&diff),
        Err(DiffError::ToolUnavailable)
    ));

    assert_eq!(fake.work_launches(), 0);
    assert_eq!(fake.launches(PROBE), 1);
}

#[test]
fn test_tool_installed_later_after_reprobe() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::unavailable();
    let service = service_with(&dir, &fake);
    let (a, b) = (dir.path().join("a.png"), dir.path().join("b.png"));

    assert!(matches!(
        service.generate_diff(&a, &b),
        Err(DiffError::ToolUnavailable)
    ));
    assert_eq!(service.stats().perceptual.diffs.entries, 0);

    fake.available.store(true, Ordering::SeqCst);
    service.reprobe();

    assert!(service.generate_diff(&a, &b).is_ok());
    assert_eq!(fake.launches(PROBE), 2);
    assert_eq!(fake.launches("compare"), 1);
}

#[test]
fn test_dilate_is_memoized() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);

    let outcome = service
        .generate_diff(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    let first = service.dilate(outcome.artifact().path()).unwrap();
    let second = service.dilate(outcome.artifact().path()).unwrap();

    assert_eq!(first, second);
    assert_ne!(first.path(), outcome.artifact().path());
    assert_eq!(std::fs::read(first.path()).unwrap(), b"dilated image");
    assert_eq!(fake.launches("convert"), 1);
}

#[test]
fn test_dilate_failure_is_fatal_for_the_call() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);
    fake.convert_code.store(1, Ordering::SeqCst);
    let diff = write_file(&dir, "diff.png", b"diff image");

    let err = service.dilate(&diff).unwrap_err();
    assert!(matches!(
        err,
        DiffError::ToolFailed(ToolFailure::ExitStatus { code: Some(1), .. })
    ));
    assert_eq!(fake.launches("convert"), 1);
}

#[test]
fn test_bounding_box_from_geometry() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);

    let bbox = service
        .pdiff_bbox(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    assert_eq!(
        bbox,
        BoundingBox {
            width: 26,
            height: 94,
            left: 0,
            top: 830,
            right: 26,
            bottom: 924,
        }
    );

    service
        .pdiff_bbox(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    assert_eq!(fake.launches("identify"), 1);
}

#[test]
fn test_malformed_geometry_is_tool_failure() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);
    *fake.geometry.lock().unwrap() = "identify: no images defined".to_string();
    let diff = write_file(&dir, "diff.png", b"diff image");

    let err = service.extract_bounding_box(&diff).unwrap_err();
    assert!(matches!(
        err,
        DiffError::ToolFailed(ToolFailure::UnexpectedOutput { .. })
    ));

    *fake.geometry.lock().unwrap() = "3x4+5+6".to_string();
    let bbox = service.extract_bounding_box(&diff).unwrap();
    assert_eq!((bbox.right, bbox.bottom), (8, 10));
}

#[test]
fn test_pdiff_image_uses_identical_artifact_too() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    fake.compare_code.store(0, Ordering::SeqCst);
    let service = service_with(&dir, &fake);

    let dilated = service
        .pdiff_image(&dir.path().join("a.png"), &dir.path().join("b.png"))
        .unwrap();
    assert!(dilated.path().exists());
    assert_eq!(fake.launches("compare"), 1);
    assert_eq!(fake.launches("convert"), 1);
}

#[test]
fn test_timeout_is_distinguished_and_not_cached() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let mut config = test_config(dir.path());
    config.tool_timeout_secs = 1;
    let service = webdiff::DiffService::with_runner(config, fake.clone());
    let (a, b) = (dir.path().join("a.png"), dir.path().join("b.png"));

    *fake.delay.lock().unwrap() = Duration::from_secs(2);
    let err = service.generate_diff(&a, &b).unwrap_err();
    match err {
        DiffError::ToolFailed(failure) => assert!(failure.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }

    *fake.delay.lock().unwrap() = Duration::ZERO;
    assert!(service.generate_diff(&a, &b).is_ok());
    assert_eq!(fake.launches("compare"), 2);
}

#[test]
fn test_stats_track_each_stage() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);

    for _ in 0..3 {
        service
            .pdiff_image(&dir.path().join("a.png"), &dir.path().join("b.png"))
            .unwrap();
    }

    let stats = service.stats().perceptual;
    assert_eq!(stats.diffs.misses, 1);
    assert_eq!(stats.diffs.hits, 2);
    assert_eq!(stats.dilations.misses, 1);
    assert_eq!(stats.dilations.hits, 2);
    assert_eq!(stats.bounding_boxes.misses, 0);
}

#[test]
fn test_hit_keeps_diff_alive_through_eviction() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let mut config = test_config(dir.path());
    config.cache_capacity = 2;
    let service = webdiff::DiffService::with_runner(config, fake.clone());
    let a = dir.path().join("a.png");

    let first = service.generate_diff(&a, &dir.path().join("b.png")).unwrap();
    let second = service.generate_diff(&a, &dir.path().join("c.png")).unwrap();
    service.generate_diff(&a, &dir.path().join("b.png")).unwrap();
    service.generate_diff(&a, &dir.path().join("d.png")).unwrap();

    assert!(first.artifact().path().exists());
    assert!(!second.artifact().path().exists());
    assert!(service.dilate(first.artifact().path()).is_ok());
    assert_eq!(fake.launches("compare"), 3);
}

#[test]
fn test_dilating_an_evicted_diff_is_not_found() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let mut config = test_config(dir.path());
    config.cache_capacity = 1;
    let service = webdiff::DiffService::with_runner(config, fake.clone());
    let (a, b, c) = (
        dir.path().join("a.png"),
        dir.path().join("b.png"),
        dir.path().join("c.png"),
    );

    let first = service.generate_diff(&a, &b).unwrap();
    service.generate_diff(&a, &c).unwrap();

    let err = service.dilate(first.artifact().path()).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fake.launches("convert"), 0);

    let dilated = service.pdiff_image(&a, &b).unwrap();
    assert!(dilated.path().exists());
    assert_eq!(fake.launches("compare"), 3);
    assert_eq!(fake.launches("convert"), 1);
}
