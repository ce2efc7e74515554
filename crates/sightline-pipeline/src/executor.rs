//! Stage sequencing.
//!
//! Stages run strictly in definition order against one
//! [`ExecutionState`]. The first failure stops the run: its report slot
//! receives a [`StageFailure`] and later stages never start.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crate::definition::{INPUT_NAME, PipelineDefinition, StageDefinition};
use crate::diagnostics::StageTiming;
use crate::params::Params;
use crate::registry::{Handler, Registry, is_noop};
use crate::report::{RunStatus, StageReport};
use crate::state::ExecutionState;
use crate::types::{FailureKind, StageFailure, describe};

type Failure = (FailureKind, String);

/// Run every stage of `definition` against `state`.
///
/// Per-stage timings are appended to `timings`, including the failing
/// stage.
pub(crate) fn execute(
    definition: &PipelineDefinition,
    registry: &Registry,
    state: &mut ExecutionState,
    timings: &mut Vec<StageTiming>,
) -> RunStatus {
    tracing::debug!(
        stages = definition.len(),
        input = %describe(state.image()),
        "pipeline.start"
    );

    for (index, stage) in definition.stages().iter().enumerate() {
        let name = stage.effective_name(index + 1);
        // Parameters resolve against the variables as they were when the
        // stage started, so the handler is free to update the table.
        let variables = state.variables().clone();
        let params = Params::new(stage.params(), &variables);
        let op = resolved_text(&params, "op");
        tracing::debug!(
            stage = %name,
            op = %op,
            comment = %resolved_text(&params, "comment"),
            image = %describe(state.image()),
            "pipeline.stage.start"
        );

        let started = Instant::now();
        let mut report = StageReport::default();
        let result = run_stage(stage, &name, &op, &params, registry, &mut report, state);
        timings.push(StageTiming {
            name: name.clone(),
            op: op.clone(),
            duration: started.elapsed(),
            dimensions: state.dimensions(),
            failure: result.as_ref().err().map(|(kind, _)| *kind),
        });

        let status = match result {
            Ok(()) => None,
            Err((kind, message)) => {
                tracing::error!(
                    stage = %name,
                    op = %op,
                    kind = %kind,
                    message = %message,
                    "pipeline.stage.failed"
                );
                report.fail(StageFailure {
                    kind,
                    op: op.clone(),
                    stage: name.clone(),
                    message: message.clone(),
                    params: stage.params().clone(),
                });
                Some(RunStatus::Failed {
                    stage: name.clone(),
                    kind,
                    message,
                })
            }
        };

        tracing::trace!(stage = %name, report = ?report, "pipeline.stage.done");
        if state.record(name.clone(), report) {
            tracing::warn!(
                stage = %name,
                "stage name repeats an earlier stage; the later entry replaces it"
            );
        }
        if let Some(status) = status {
            return status;
        }
    }

    tracing::debug!(
        stages = definition.len(),
        output = %describe(state.image()),
        "pipeline.end"
    );
    RunStatus::Completed
}

/// String field of the stage element after `{{var}}` substitution.
/// Missing and non-string values read as empty.
fn resolved_text(params: &Params<'_>, key: &str) -> String {
    params.optional_string(key).ok().flatten().unwrap_or_default()
}

fn run_stage(
    stage: &StageDefinition,
    name: &str,
    op: &str,
    params: &Params<'_>,
    registry: &Registry,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), Failure> {
    if name == INPUT_NAME {
        return Err((
            FailureKind::ReservedNameViolation,
            format!("stage name '{INPUT_NAME}' is reserved for the pipeline input"),
        ));
    }

    if !is_noop(op) {
        let handler = registry.get(op).ok_or_else(|| {
            let message = if op.is_empty() {
                "stage has no op".to_owned()
            } else {
                format!("no handler registered for '{op}'")
            };
            (FailureKind::UnknownOperation, message)
        })?;
        invoke(handler, params, report, state)?;
    }

    if let Some(explicit) = stage.name() {
        state.snapshot(explicit.to_owned());
    }

    let dimensions = state.dimensions();
    if dimensions.is_degenerate() {
        return Err((
            FailureKind::DegenerateArtifact,
            format!("stage left a degenerate {dimensions} image"),
        ));
    }
    Ok(())
}

fn invoke(
    handler: &dyn Handler,
    params: &Params<'_>,
    report: &mut StageReport,
    state: &mut ExecutionState,
) -> Result<(), Failure> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.apply(params, report, state))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err((err.kind(), err.to_string())),
        Err(payload) => Err((
            FailureKind::RuntimeFault,
            format!("handler panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
