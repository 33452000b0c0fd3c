//! Property-based tests for request parameter parsing and volume ID encoding.

use std::collections::HashMap;

use proptest::prelude::*;
use rbd_replication::params::{
    parse_scheduling, SchedulingInterval, SchedulingSpec, MIRRORING_MODE_KEY,
    SCHEDULING_INTERVAL_KEY, SCHEDULING_START_TIME_KEY,
};
use rbd_replication::volume_id::CsiIdentifier;

/// Generator for well-formed intervals such as `3m` or `12h`.
fn valid_interval() -> impl Strategy<Value = String> {
    "[0-9]{1,4}[mhd]"
}

/// Generator for optional start times.
fn start_time() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[0-2][0-9]:[0-5][0-9]:00(-0[0-9]:00)?")
}

/// Generator for parameter maps drawn from the keys the parser looks at.
fn any_parameters() -> impl Strategy<Value = HashMap<String, String>> {
    let key = prop_oneof![
        Just(MIRRORING_MODE_KEY.to_string()),
        Just(SCHEDULING_INTERVAL_KEY.to_string()),
        Just(SCHEDULING_START_TIME_KEY.to_string()),
        Just("force".to_string()),
    ];
    let value = prop_oneof![
        Just(String::new()),
        Just("snapshot".to_string()),
        Just("journal".to_string()),
        "[0-9]{0,3}[a-z]?",
        ".{0,12}",
    ];
    proptest::collection::hash_map(key, value, 0..4)
}

fn uuid() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
}

proptest! {
    /// A spec serialised back into parameters parses to the same spec.
    #[test]
    fn test_scheduling_round_trip(interval in valid_interval(), start in start_time()) {
        let spec = SchedulingSpec {
            interval: Some(SchedulingInterval::parse(&interval).unwrap()),
            start_time: start,
        };
        let parsed = parse_scheduling(&spec.to_parameters()).unwrap();
        prop_assert_eq!(parsed, spec);
    }

    /// Same parameter map, same outcome.
    #[test]
    fn test_scheduling_deterministic(params in any_parameters()) {
        let first = parse_scheduling(&params).map_err(|e| e.to_string());
        let second = parse_scheduling(&params).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    /// A start time never comes back without an interval.
    #[test]
    fn test_scheduling_start_time_implies_interval(params in any_parameters()) {
        if let Ok(spec) = parse_scheduling(&params) {
            prop_assert!(spec.start_time.is_none() || spec.interval.is_some());
        }
    }

    /// Bare numbers are never accepted as intervals.
    #[test]
    fn test_interval_without_suffix_rejected(n in "[0-9]{1,6}") {
        prop_assert!(SchedulingInterval::parse(&n).is_err());
    }

    /// Composed identifiers decompose to the same fields.
    #[test]
    fn test_volume_id_compose_decompose(
        version in any::<u16>(),
        cluster_id in "[a-z0-9-]{1,64}",
        pool_id in any::<i64>(),
        object_uuid in uuid(),
    ) {
        let ci = CsiIdentifier {
            encoding_version: version,
            cluster_id,
            location_id: pool_id,
            object_uuid,
        };
        let composed = ci.compose().unwrap();
        prop_assert!(composed.len() <= 128);
        prop_assert_eq!(CsiIdentifier::decompose(&composed).unwrap(), ci);
    }

    /// Arbitrary input never panics the decoder.
    #[test]
    fn test_volume_id_decompose_total(s in ".{0,160}") {
        let _ = CsiIdentifier::decompose(&s);
    }
}
