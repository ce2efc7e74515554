//! Structured run reports.
//!
//! A [`RunReport`] serializes to:
//!
//! ```json
//! {
//!   "engine": {
//!     "name": "sightline-pipeline",
//!     "version": "0.1.0",
//!     "url": "https://github.com/sightline-rs/sightline"
//!   },
//!   "status": {"state": "failed", "stage": "b", "kind": "UnknownOperation", "message": "..."},
//!   "stages": {
//!     "a": {},
//!     "b": {"error": {"kind": "UnknownOperation", "op": "unknownThing", ...}}
//!   }
//! }
//! ```
//!
//! Stage entries appear in execution order. Stages never reached have no
//! entry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{FailureKind, StageFailure};

/// Report key holding a stage's failure record.
pub const ERROR_KEY: &str = "error";

/// Fields one stage wrote about itself.
///
/// Handlers add fields with [`StageReport::insert`]. The [`ERROR_KEY`] is
/// written only by the executor when the stage fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<StageFailure>,
}

impl StageReport {
    /// Set a field, returning the previous value.
    ///
    /// [`ERROR_KEY`] is reserved; a field with that key is dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if key == ERROR_KEY {
            tracing::warn!(key = ERROR_KEY, "reserved stage report key, field dropped");
            return None;
        }
        self.fields.insert(key, value.into())
    }

    /// Field written by the stage.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields written by the stage.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns `true` if the stage wrote nothing and did not fail.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.error.is_none()
    }

    /// The failure recorded for this stage, if it stopped the run.
    #[must_use]
    pub const fn error(&self) -> Option<&StageFailure> {
        self.error.as_ref()
    }

    pub(crate) fn fail(&mut self, failure: StageFailure) {
        self.error = Some(failure);
    }
}

/// Identity of the engine that produced a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Crate name.
    pub name: String,
    /// Crate version.
    pub version: String,
    /// Source repository.
    pub url: String,
}

impl EngineInfo {
    /// Identity of this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            url: env!("CARGO_PKG_REPOSITORY").to_owned(),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunStatus {
    /// Every stage succeeded.
    Completed,
    /// A stage failed and the run stopped there.
    Failed {
        /// Effective name of the failing stage.
        stage: String,
        /// Failure category.
        kind: FailureKind,
        /// Human-readable description.
        message: String,
    },
}

impl RunStatus {
    /// Returns `true` for [`RunStatus::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Record of one run: engine identity, terminal status, and one entry per
/// attempted stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    engine: EngineInfo,
    status: RunStatus,
    stages: IndexMap<String, StageReport>,
}

impl RunReport {
    pub(crate) fn new(status: RunStatus, stages: IndexMap<String, StageReport>) -> Self {
        Self {
            engine: EngineInfo::current(),
            status,
            stages,
        }
    }

    /// Engine identity block.
    #[must_use]
    pub const fn engine(&self) -> &EngineInfo {
        &self.engine
    }

    /// Terminal status.
    #[must_use]
    pub const fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Returns `true` if every stage succeeded.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// The failure that stopped the run, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&StageFailure> {
        self.stages.values().next_back().and_then(StageReport::error)
    }

    /// Report of the stage with effective name `name`.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.get(name)
    }

    /// Effective names of attempted stages, in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    /// Stage entries in execution order.
    pub fn stages(&self) -> impl Iterator<Item = (&str, &StageReport)> {
        self.stages.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attempted stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
