#![cfg(all(feature = "metrics", not(loom)))]
//! Tests for `jmswire` metrics helpers.
//!
//! Counters and gauges are checked with
//! `metrics_util::debugging::DebuggingRecorder` installed as a thread-local
//! recorder.

use jmswire::{
    engine::{EngineConfig, Open, ProtocolEngine, WireEngine},
    metrics::{self as jms_metrics, Direction},
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter(snapshotter: &Snapshotter, name: &str, direction: Option<&str>) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(k, _, _, _)| {
            k.key().name() == name
                && direction.is_none_or(|d| {
                    k.key()
                        .labels()
                        .any(|l| l.key() == "direction" && l.value() == d)
                })
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(c) => c,
            other => panic!("{name} is not a counter: {other:?}"),
        })
        .sum()
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn frame_metric_is_labelled_with_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || jms_metrics::inc_frames(direction));

    assert_eq!(counter(&snapshotter, jms_metrics::FRAMES_TOTAL, Some(label)), 1);
}

#[rstest]
#[case(1)]
#[case(3)]
fn error_metric_counts_failures(#[case] expected: u64) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        (0..expected).for_each(|_| jms_metrics::inc_errors());
    });

    assert_eq!(counter(&snapshotter, jms_metrics::ERRORS_TOTAL, None), expected);
}

#[test]
fn provider_gauge_tracks_increments_and_decrements() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        jms_metrics::inc_providers();
        jms_metrics::inc_providers();
        jms_metrics::dec_providers();
    });

    let gauge = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(k, _, _, _)| k.key().name() == jms_metrics::PROVIDERS_ACTIVE)
        .map(|(_, _, _, v)| v);
    assert!(
        matches!(gauge, Some(DebugValue::Gauge(g)) if (g.into_inner() - 1.0).abs() < f64::EPSILON),
        "unexpected gauge {gauge:?}"
    );
}

#[test]
fn engine_counts_frames_it_writes() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let mut engine = WireEngine::new(EngineConfig::default());
        engine
            .bind(Open {
                container_id: "metrics".into(),
                hostname: None,
                max_frame_size: 4096,
                idle_timeout_ms: None,
                username: None,
                password: None,
            })
            .expect("engine binds");
        engine.begin_session().expect("session begins");
    });

    assert_eq!(counter(&snapshotter, jms_metrics::FRAMES_TOTAL, Some("outbound")), 2);
    assert_eq!(counter(&snapshotter, jms_metrics::FRAMES_TOTAL, Some("inbound")), 0);
}
