//! sightline-pipeline: JSON-defined image processing pipelines (sans-IO).
//!
//! A pipeline is a JSON array of stages. Each stage names an operation
//! (`op`) plus its parameters; stages run in order against one working
//! image, and every stage writes a slot in a structured [`RunReport`].
//!
//! ```json
//! [
//!   {"op": "cvtColor", "code": "CV_BGR2GRAY"},
//!   {"op": "GaussianBlur", "sigma": "{{sigma}}", "name": "smooth"},
//!   {"op": "Canny", "threshold2": 80},
//!   {"op": "stageImage", "stage": "smooth"}
//! ]
//! ```
//!
//! Named stages keep a copy of their output that later stages can read.
//! Parameters of the form `{{name}}` are filled from [`Variables`].
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! images and byte slices. File-backed operations are registered by
//! front ends through [`Registry::register`].

pub mod decode;
pub mod definition;
pub mod diagnostics;
mod executor;
pub mod handlers;
pub mod params;
pub mod registry;
pub mod report;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

pub use decode::decode;
pub use definition::{INPUT_NAME, PipelineDefinition, StageDefinition};
pub use diagnostics::{RunDiagnostics, StageTiming};
pub use params::Params;
pub use registry::{Handler, Registry, StageError};
pub use report::{ERROR_KEY, EngineInfo, RunReport, RunStatus, StageReport};
pub use state::{ArtifactCache, ExecutionState, Variables};
pub use types::{Dimensions, DynamicImage, FailureKind, PipelineError, StageFailure};

/// A parsed definition bound to a handler registry.
///
/// Cloning is cheap and clones share both parts, so one pipeline can run
/// on many threads at once; each run owns its own [`ExecutionState`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    definition: Arc<PipelineDefinition>,
    registry: Arc<Registry>,
}

impl Pipeline {
    /// Pipeline using the built-in operations.
    #[must_use]
    pub fn new(definition: PipelineDefinition) -> Self {
        Self::with_registry(definition, Registry::builtin())
    }

    /// Pipeline using a caller-supplied registry.
    #[must_use]
    pub fn with_registry(definition: PipelineDefinition, registry: Arc<Registry>) -> Self {
        Self {
            definition: Arc::new(definition),
            registry,
        }
    }

    /// Parse a definition document and bind it to the built-in operations.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedDefinition`] if `text` is not a
    /// JSON array of stage objects.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(PipelineDefinition::from_json(text)?))
    }

    /// The parsed definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The handler registry stages are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run every stage against `input`.
    ///
    /// Always returns an outcome. A failing stage stops the run and is
    /// described by the report's status; the outcome then carries the
    /// working image as the failing stage left it.
    #[must_use = "the outcome carries the final image and report"]
    pub fn run(&self, input: DynamicImage, variables: &Variables) -> RunOutcome {
        let started = Instant::now();
        let mut state = ExecutionState::new(input, variables.clone());
        let mut timings = Vec::with_capacity(self.definition.len());

        let status = executor::execute(&self.definition, &self.registry, &mut state, &mut timings);

        let (image, cache, log, _variables) = state.into_parts();
        let diagnostics = RunDiagnostics {
            stages: timings,
            total_duration: started.elapsed(),
        };
        match &status {
            RunStatus::Completed => tracing::info!(
                stages = log.len(),
                cached = cache.len(),
                elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
                "pipeline completed"
            ),
            RunStatus::Failed { stage, kind, .. } => tracing::info!(
                stage = %stage,
                kind = %kind,
                stages = log.len(),
                elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
                "pipeline failed"
            ),
        }

        RunOutcome {
            image,
            report: RunReport::new(status, log),
            cached: cache.names().map(str::to_owned).collect(),
            diagnostics,
        }
    }

    /// Run in place: `image` is replaced by the final working image.
    #[must_use = "the report says whether the run completed"]
    pub fn process(&self, image: &mut DynamicImage, variables: &Variables) -> RunReport {
        let input = std::mem::replace(image, DynamicImage::new_rgb8(0, 0));
        let outcome = self.run(input, variables);
        *image = outcome.image;
        outcome.report
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final working image.
    pub image: DynamicImage,
    /// Structured report.
    pub report: RunReport,
    /// Names held in the artifact cache at run end, in insertion order.
    pub cached: Vec<String>,
    /// Per-stage wall-clock timings.
    pub diagnostics: RunDiagnostics,
}

impl RunOutcome {
    /// Returns `true` if every stage ran.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.report.is_completed()
    }

    /// The final image, or the failure that stopped the run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageFailed`] if a stage failed.
    pub fn into_result(self) -> Result<DynamicImage, PipelineError> {
        match self.report.failure() {
            Some(failure) => Err(PipelineError::StageFailed(Box::new(failure.clone()))),
            None => Ok(self.image),
        }
    }
}
