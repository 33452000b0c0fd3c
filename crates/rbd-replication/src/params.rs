//! Request parameter parsing.
//!
//! Extracts mirroring mode, force flag and snapshot scheduling from the
//! string map carried by replication requests. Everything here is pure: no
//! remote calls, same map in, same answer out.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::error::{ReplError, Result};
use crate::mirror::MirrorMode;

/// Parameter key selecting the mirroring mode.
pub const MIRRORING_MODE_KEY: &str = "mirroringMode";
/// Parameter key carrying the force flag.
pub const FORCE_KEY: &str = "force";
/// Parameter key carrying the snapshot schedule interval (`<num><m|h|d>`).
pub const SCHEDULING_INTERVAL_KEY: &str = "schedulingInterval";
/// Parameter key carrying the optional ISO-8601 schedule start time.
pub const SCHEDULING_START_TIME_KEY: &str = "schedulingStartTime";

static INTERVAL_RE: OnceLock<Regex> = OnceLock::new();

fn interval_re() -> &'static Regex {
    INTERVAL_RE.get_or_init(|| Regex::new(r"^\d+[mhd]$").expect("static regex is valid"))
}

/// A validated snapshot schedule interval such as `3m`, `12h` or `1d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulingInterval(String);

impl SchedulingInterval {
    /// Validates `raw` against `^\d+[mhd]$`.
    pub fn parse(raw: &str) -> Result<Self> {
        if interval_re().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ReplError::validation(
                "interval specified without d, h, m suffix",
            ))
        }
    }

    /// The interval as passed to the mirror client.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchedulingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated scheduling parameters. `None` stands for "none".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingSpec {
    /// Interval between scheduled snapshots.
    pub interval: Option<SchedulingInterval>,
    /// Opaque ISO-8601 start time; only ever set together with `interval`.
    pub start_time: Option<String>,
}

impl SchedulingSpec {
    /// Serialises the schedule back into request parameters.
    pub fn to_parameters(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(interval) = &self.interval {
            params.insert(
                SCHEDULING_INTERVAL_KEY.to_string(),
                interval.as_str().to_string(),
            );
            if let Some(start) = &self.start_time {
                params.insert(SCHEDULING_START_TIME_KEY.to_string(), start.clone());
            }
        }
        params
    }
}

/// Extracts the force option; defaults to `false` when unset.
pub fn parse_force(parameters: &HashMap<String, String>) -> Result<bool> {
    let Some(val) = parameters.get(FORCE_KEY) else {
        warn!(
            "{} is not set in parameters, setting to default ({})",
            FORCE_KEY, false
        );
        return Ok(false);
    };
    parse_bool(val).ok_or_else(|| {
        ReplError::internal(format!("parsing {FORCE_KEY}: invalid syntax for {val:?}"))
    })
}

/// Extracts the mirroring mode; defaults to snapshot when unset.
pub fn parse_mirror_mode(parameters: &HashMap<String, String>) -> Result<MirrorMode> {
    let Some(val) = parameters.get(MIRRORING_MODE_KEY) else {
        warn!(
            "{} is not set in parameters, setting mirroringMode to default ({})",
            MIRRORING_MODE_KEY,
            MirrorMode::Snapshot
        );
        return Ok(MirrorMode::Snapshot);
    };
    val.parse::<MirrorMode>().map_err(|_| {
        ReplError::validation(format!("{MIRRORING_MODE_KEY} {val} not supported"))
    })
}

/// Validates and extracts the snapshot scheduling parameters.
pub fn parse_scheduling(parameters: &HashMap<String, String>) -> Result<SchedulingSpec> {
    if let Some(mode) = parameters.get(MIRRORING_MODE_KEY) {
        if mode.parse::<MirrorMode>().is_err() {
            return Err(ReplError::validation(
                "scheduling is only supported for snapshot mode",
            ));
        }
    }

    let interval = parameters.get(SCHEDULING_INTERVAL_KEY);
    if matches!(interval, Some(i) if i.is_empty()) {
        return Err(ReplError::validation("scheduling interval cannot be empty"));
    }

    let start_time = parameters
        .get(SCHEDULING_START_TIME_KEY)
        .filter(|s| !s.is_empty());
    if interval.is_none() && start_time.is_some() {
        return Err(ReplError::validation(format!(
            "{SCHEDULING_START_TIME_KEY:?} parameter is supported only with {SCHEDULING_INTERVAL_KEY:?}"
        )));
    }

    match interval {
        Some(raw) => Ok(SchedulingSpec {
            interval: Some(SchedulingInterval::parse(raw)?),
            start_time: start_time.cloned(),
        }),
        None => Ok(SchedulingSpec::default()),
    }
}

// Accepts the same literals as the conventional boolean parser used by
// orchestrator tooling.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
