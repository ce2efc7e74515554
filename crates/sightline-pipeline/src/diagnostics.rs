//! Run diagnostics: wall-clock timing for each stage.
//!
//! Timings are collected on every run but kept out of the
//! [`RunReport`](crate::RunReport), so two runs over the same input
//! produce identical reports.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, FailureKind};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Timing of one attempted stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    /// Effective stage name.
    pub name: String,
    /// Operation identifier.
    pub op: String,
    /// Wall-clock duration of the stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Working image size after the stage.
    pub dimensions: Dimensions,
    /// Failure category when this stage stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// Diagnostics collected from a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// One entry per attempted stage, in execution order.
    pub stages: Vec<StageTiming>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Timing Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms ({} stages)",
            duration_ms(self.total_duration),
            self.stages.len(),
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<20} {:<20} {:>10} {:>8}  {}",
            "Stage", "Op", "Duration", "% Total", "Result"
        ));
        lines.push("-".repeat(76));

        for stage in &self.stages {
            let result = stage
                .failure
                .map_or_else(|| stage.dimensions.to_string(), |kind| kind.to_string());
            lines.push(format!(
                "{:<20} {:<20} {:>8.3}ms {:>7.1}%  {}",
                stage.name,
                stage.op,
                duration_ms(stage.duration),
                percent(stage.duration, self.total_duration),
                result,
            ));
        }

        lines.join("\n")
    }

    /// The slowest stage, if any ran.
    #[must_use]
    pub fn slowest(&self) -> Option<&StageTiming> {
        self.stages.iter().max_by_key(|stage| stage.duration)
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn percent(part: Duration, total: Duration) -> f64 {
    let total = total.as_secs_f64();
    if total > 0.0 {
        part.as_secs_f64() / total * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn timing(name: &str, millis: u64, failure: Option<FailureKind>) -> StageTiming {
        StageTiming {
            name: name.to_owned(),
            op: "blur".to_owned(),
            duration: Duration::from_millis(millis),
            dimensions: Dimensions {
                width: 8,
                height: 6,
            },
            failure,
        }
    }

    #[test]
    fn report_lists_every_stage() {
        let diagnostics = RunDiagnostics {
            stages: vec![
                timing("s1", 3, None),
                timing("edges", 1, Some(FailureKind::RuntimeFault)),
            ],
            total_duration: Duration::from_millis(4),
        };
        let report = diagnostics.report();
        assert!(report.contains("s1"));
        assert!(report.contains("8x6"));
        assert!(report.contains("edges"));
        assert!(report.contains("RuntimeFault"));
        assert!(report.contains("75.0%"));
    }

    #[test]
    fn slowest_stage() {
        let diagnostics = RunDiagnostics {
            stages: vec![timing("a", 1, None), timing("b", 9, None), timing("c", 2, None)],
            total_duration: Duration::from_millis(12),
        };
        assert_eq!(diagnostics.slowest().map(|s| s.name.as_str()), Some("b"));
        assert!(RunDiagnostics::default().slowest().is_none());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let diagnostics = RunDiagnostics {
            stages: vec![timing("a", 250, None)],
            total_duration: Duration::from_millis(500),
        };
        let value = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(value["total_duration"], serde_json::json!(0.5));
        assert_eq!(value["stages"][0]["duration"], serde_json::json!(0.25));
        assert!(value["stages"][0].get("failure").is_none());

        let back: RunDiagnostics = serde_json::from_value(value).unwrap();
        assert_eq!(back, diagnostics);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let value = serde_json::json!({"stages": [], "total_duration": -1.0});
        assert!(serde_json::from_value::<RunDiagnostics>(value).is_err());
    }

    #[test]
    fn zero_total_does_not_divide_by_zero() {
        assert!(percent(Duration::from_millis(1), Duration::ZERO).abs() < f64::EPSILON);
    }
}
