//! Integration tests for the extraction pipeline.
//!
//! Tests cover:
//! - The result holding exactly the expected labels
//! - Defaults for missing, unreadable and undetected regions
//! - A reader error on one region leaving the others intact
//! - Boxes reaching past the image border
//! - The same label detected twice

mod common;

use std::sync::Arc;

use common::*;

#[test]
fn test_key_set_equals_expected_labels() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(
        &registry,
        "panel.rten",
        &[
            ("Total", [10, 10, 60, 30]),
            ("Reject", [70, 10, 90, 30]),
        ],
    );
    let reader = Arc::new(WidthReader::new(&[(50, Some("87")), (20, Some("3"))]));
    let pipeline = ExtractionPipeline::new(registry, reader.clone());

    let result = pipeline.extract(&white_image(200, 100), "panel.rten", &["Total", "Good"])?;

    assert_eq!(result.labels().collect::<Vec<_>>(), vec!["Good", "Total"]);
    assert_eq!(result.get("Total"), Some("87"));
    assert_eq!(result.get("Good"), Some("0"));
    // The unexpected label is never read
    assert_eq!(reader.calls(), 1);
    Ok(())
}

#[test]
fn test_zero_detections_yield_defaults() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(&registry, "empty.rten", &[]);
    let pipeline = ExtractionPipeline::new(registry, Arc::new(WidthReader::default()));

    let result = pipeline.extract(&white_image(64, 64), "empty.rten", &["Total", "Good"])?;
    let expected: ExtractionResult = [("Total", "0"), ("Good", "0")].into_iter().collect();
    assert_eq!(result, expected);
    Ok(())
}

#[test]
fn test_unreadable_region_keeps_default() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(&registry, "panel.rten", &[("Total", [0, 0, 30, 20])]);
    let pipeline = ExtractionPipeline::new(registry, Arc::new(WidthReader::new(&[(30, None)])));

    let result = pipeline.extract(&white_image(100, 100), "panel.rten", &["Total"])?;
    assert_eq!(result.get("Total"), Some("0"));
    Ok(())
}

#[test]
fn test_reader_error_keeps_default_for_that_label() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(
        &registry,
        "panel.rten",
        &[("Total", [10, 10, 60, 30]), ("Good", [100, 10, 140, 30])],
    );
    // Total crop is 50 px wide and makes the reader fail
    let reader = Arc::new(FailingReader {
        failing_width: 50,
        value: "42",
    });
    let pipeline = ExtractionPipeline::new(registry, reader);

    let result = pipeline.extract(&white_image(200, 100), "panel.rten", &["Total", "Good"])?;
    let expected: ExtractionResult = [("Total", "0"), ("Good", "42")].into_iter().collect();
    assert_eq!(result, expected);
    Ok(())
}

#[test]
fn test_boxes_past_the_border_are_clamped() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(
        &registry,
        "edges.rten",
        &[
            ("Total", [-20, -5, 30, 20]),
            ("Good", [180, 90, 260, 140]),
        ],
    );
    // Clamped widths: 30 and 20
    let reader = Arc::new(WidthReader::new(&[(30, Some("12")), (20, Some("7"))]));
    let pipeline = ExtractionPipeline::new(registry, reader);

    let result = pipeline.extract(&white_image(200, 100), "edges.rten", &["Total", "Good"])?;
    assert_eq!(result.get("Total"), Some("12"));
    assert_eq!(result.get("Good"), Some("7"));
    Ok(())
}

#[test]
fn test_duplicate_label_last_detection_wins() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    add_scripted_model(
        &registry,
        "dup.rten",
        &[
            ("Total", [0, 0, 40, 20]),
            ("Total", [50, 0, 75, 20]),
        ],
    );
    let reader = Arc::new(WidthReader::new(&[(40, Some("111")), (25, Some("222"))]));
    let pipeline = ExtractionPipeline::new(registry, reader.clone());

    let result = pipeline.extract(&white_image(100, 50), "dup.rten", &["Total"])?;
    assert_eq!(result.get("Total"), Some("222"));
    assert_eq!(reader.calls(), 1);
    Ok(())
}

#[test]
fn test_unknown_model_is_not_found() -> anyhow::Result<()> {
    let (registry, _dir) = create_test_registry();
    let pipeline = ExtractionPipeline::new(registry, Arc::new(WidthReader::default()));

    let err = pipeline
        .extract(&white_image(10, 10), "nope.rten", &["Total"])
        .err()
        .expect("extraction must fail");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}
