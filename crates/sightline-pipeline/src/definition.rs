//! Pipeline definition documents.
//!
//! A definition is a JSON array of stage objects. Each object carries an
//! `op` (the operation identifier), an optional `name`, an optional
//! `comment`, and any operation-specific parameters:
//!
//! ```json
//! [
//!   {"op": "cvtColor", "code": "CV_BGR2GRAY"},
//!   {"op": "GaussianBlur", "name": "smooth", "sigma": 2.0},
//!   {"op": "Canny", "threshold1": 30, "threshold2": 90}
//! ]
//! ```
//!
//! Parsing only checks the top-level shape. An element that is not an
//! object, or has no `op`, parses to a stage with an empty operation
//! which then fails at run time as an unknown operation.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::PipelineError;

/// Artifact-cache name reserved for the run's input image.
pub const INPUT_NAME: &str = "input";

/// One element of a pipeline definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    op: String,
    name: Option<String>,
    comment: Option<String>,
    params: Value,
}

impl StageDefinition {
    /// Interpret a JSON value as a stage element.
    ///
    /// Never fails: missing or non-string fields are treated as absent.
    #[must_use]
    pub fn from_value(params: Value) -> Self {
        let field = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
        };
        Self {
            op: field("op").unwrap_or_default(),
            name: field("name"),
            comment: field("comment"),
            params,
        }
    }

    /// Operation identifier. Empty when the element had none.
    #[must_use]
    pub fn op(&self) -> &str {
        &self.op
    }

    /// Explicit stage name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Informational comment, if one was given.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// The element exactly as it appeared in the document.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Name under which this stage is reported: the explicit name, or
    /// `s<position>` for a 1-based `position`.
    #[must_use]
    pub fn effective_name(&self, position: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("s{position}"))
    }
}

/// An ordered, immutable sequence of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineDefinition {
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Parse a definition document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedDefinition`] if `text` is not
    /// valid JSON or its top level is not an array.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_str(text).map_err(malformed)?;
        Self::from_value(value)
    }

    /// Build a definition from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedDefinition`] if `value` is not
    /// an array.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        let Value::Array(elements) = value else {
            return Err(PipelineError::MalformedDefinition {
                message: format!(
                    "expected a JSON array of stages, found {}",
                    json_type_name(&value),
                ),
                line: None,
                column: None,
            });
        };
        Ok(elements.into_iter().map(StageDefinition::from_value).collect())
    }

    /// The stages, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the definition has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The document as a JSON array.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.stages.iter().map(|s| s.params.clone()).collect())
    }
}

impl FromIterator<StageDefinition> for PipelineDefinition {
    fn from_iter<I: IntoIterator<Item = StageDefinition>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

impl FromStr for PipelineDefinition {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

impl Serialize for PipelineDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn malformed(err: serde_json::Error) -> PipelineError {
    // serde_json appends " at line L column C" to its message; keep the
    // location in the structured fields instead.
    let text = err.to_string();
    let message = text
        .split_once(" at line ")
        .map_or(text.as_str(), |(head, _)| head)
        .to_owned();
    let (line, column) = if err.line() == 0 {
        (None, None)
    } else {
        (Some(err.line()), Some(err.column()))
    };
    PipelineError::MalformedDefinition {
        message,
        line,
        column,
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
