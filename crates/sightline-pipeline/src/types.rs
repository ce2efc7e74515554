//! Shared types for the sightline pipeline engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `DynamicImage` so downstream crates can hand artifacts to
/// the engine without depending on `image` directly.
pub use image::DynamicImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image.
    #[must_use]
    pub fn of(image: &DynamicImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Short human-readable description of an artifact, e.g. `640x480 Rgb8`.
#[must_use]
pub fn describe(image: &DynamicImage) -> String {
    format!("{} {:?}", Dimensions::of(image), image.color())
}

/// Category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The definition document could not be parsed.
    MalformedDefinition,
    /// A stage used the reserved name `"input"`.
    ReservedNameViolation,
    /// No handler is registered for the stage's operation.
    UnknownOperation,
    /// A handler rejected its parameters or a referenced name.
    ParameterValidation,
    /// A library error or panic inside a handler.
    RuntimeFault,
    /// The working artifact has zero width or height after a stage.
    DegenerateArtifact,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MalformedDefinition => "MalformedDefinition",
            Self::ReservedNameViolation => "ReservedNameViolation",
            Self::UnknownOperation => "UnknownOperation",
            Self::ParameterValidation => "ParameterValidation",
            Self::RuntimeFault => "RuntimeFault",
            Self::DegenerateArtifact => "DegenerateArtifact",
        };
        f.write_str(name)
    }
}

/// Uniform record of the stage that stopped a run.
///
/// Written into the failing stage's report slot under `"error"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Operation identifier of the failing stage.
    pub op: String,
    /// Effective name of the failing stage.
    pub stage: String,
    /// Human-readable description.
    pub message: String,
    /// The stage's definition element, verbatim.
    pub params: serde_json::Value,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' ({}) failed with {}: {}",
            self.stage, self.op, self.kind, self.message,
        )
    }
}

/// Errors returned by the pipeline outside of a stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The definition document is not valid JSON or not an array.
    #[error("malformed pipeline definition: {message}{}", location_suffix(.line, .column))]
    MalformedDefinition {
        /// Parser message.
        message: String,
        /// 1-based line, when the parser reports one.
        line: Option<usize>,
        /// 1-based column, when the parser reports one.
        column: Option<usize>,
    },

    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A run stopped at a failing stage.
    #[error("{0}")]
    StageFailed(Box<StageFailure>),
}

impl PipelineError {
    /// The failure category of this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedDefinition { .. } => FailureKind::MalformedDefinition,
            Self::ImageDecode(_) | Self::EmptyInput => FailureKind::RuntimeFault,
            Self::StageFailed(failure) => failure.kind,
        }
    }
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" at line {line}, column {column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}
