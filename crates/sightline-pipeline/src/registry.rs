//! Operation handlers and the registry that dispatches to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::params::Params;
use crate::report::StageReport;
use crate::state::ExecutionState;
use crate::types::FailureKind;

/// Operation prefixes that mark a stage as disabled.
pub const NOOP_PREFIXES: [&str; 2] = ["nop", "noop"];

/// Returns `true` if `op` names a no-op stage.
#[must_use]
pub fn is_noop(op: &str) -> bool {
    NOOP_PREFIXES.iter().any(|prefix| op.starts_with(prefix))
}

/// Expected failure returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A parameter is missing, mistyped, or out of range.
    #[error("{0}")]
    Invalid(String),

    /// A referenced stage has not produced an artifact or report.
    #[error("no earlier stage named '{0}'")]
    MissingReference(String),

    /// The operation itself failed.
    #[error("{0}")]
    Fault(String),

    /// An `image` crate operation failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl StageError {
    /// Shorthand for [`StageError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Shorthand for [`StageError::Fault`].
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }

    /// Failure category this error is reported under.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Invalid(_) | Self::MissingReference(_) => FailureKind::ParameterValidation,
            Self::Fault(_) | Self::Image(_) => FailureKind::RuntimeFault,
        }
    }
}

/// An operation that can appear in a pipeline definition.
///
/// Handlers are stateless: everything a stage needs arrives through its
/// parameters and the execution state.
pub trait Handler: Send + Sync {
    /// Run the operation.
    ///
    /// `report` is this stage's own report slot. Earlier stages are
    /// visible only through the read accessors of `state`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] describing why the stage cannot complete.
    fn apply(
        &self,
        params: &Params<'_>,
        report: &mut StageReport,
        state: &mut ExecutionState,
    ) -> Result<(), StageError>;
}

impl<F> Handler for F
where
    F: Fn(&Params<'_>, &mut StageReport, &mut ExecutionState) -> Result<(), StageError>
        + Send
        + Sync,
{
    fn apply(
        &self,
        params: &Params<'_>,
        report: &mut StageReport,
        state: &mut ExecutionState,
    ) -> Result<(), StageError> {
        self(params, report, state)
    }
}

static BUILTIN: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::with_builtins()));

/// Mapping from operation identifier to handler.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    /// A registry with no operations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in operation.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// The shared built-in registry, created on first use.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN)
    }

    /// Register `handler` for `op`, returning the handler it replaces.
    ///
    /// Identifiers starting with a [no-op prefix](NOOP_PREFIXES) are
    /// accepted but never dispatched.
    pub fn register<H: Handler + 'static>(
        &mut self,
        op: impl Into<String>,
        handler: H,
    ) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(op.into(), Arc::new(handler))
    }

    /// Handler for `op`.
    #[must_use]
    pub fn get(&self, op: &str) -> Option<&dyn Handler> {
        self.handlers.get(op).map(Arc::as_ref)
    }

    /// Returns `true` if `op` has a handler.
    #[must_use]
    pub fn contains(&self, op: &str) -> bool {
        self.handlers.contains_key(op)
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn ops(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }

    /// Number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("ops", &self.ops()).finish()
    }
}
