//! Rendering of per-unit log fields

use ingest_pipeline::LogFields;
use std::time::Duration;

#[test]
fn test_durations_are_rounded_to_milliseconds() {
    let render = |d| LogFields::default().with_duration(d).to_string();

    assert_eq!(render(Duration::from_micros(1_500)), "{d:1ms}");
    assert_eq!(render(Duration::from_millis(1_500)), "{d:1s 500ms}");
    assert_eq!(render(Duration::from_micros(250)), "{d:250us}");
    assert_eq!(render(Duration::ZERO), "{}");
}

#[test]
fn test_zero_counts_are_omitted() {
    let fields = LogFields::worker(3).with_counts(0, 0).with_msg("");
    assert_eq!(fields.to_string(), "{w:3}");
}

#[test]
fn test_builders_overwrite() {
    let fields = LogFields::worker(1)
        .with_msg("first")
        .with_msg("second")
        .with_counts(1, 1)
        .with_counts(5, 0);
    assert_eq!(fields.to_string(), "{w:1, c:5, m:second}");
}
