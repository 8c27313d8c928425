use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use towndoc_core::CoreError;

use crate::types::{Category, CheckContext, CheckResult};

/// Whether a check can act on what it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Diagnose,
    Repair,
}

impl Capability {
    pub fn can_fix(&self) -> bool {
        matches!(self, Self::Repair)
    }
}

/// Facts a check gathered during `run` that its `try_fix` needs.
///
/// The runner treats the plan as opaque and only hands it back to the check
/// that produced it. An empty plan means there is nothing to repair.
#[derive(Default)]
pub struct RepairPlan(Option<Box<dyn Any + Send>>);

impl RepairPlan {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send>(plan: T) -> Self {
        Self(Some(Box::new(plan)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the plan as `T`; `None` when empty or of another type.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|plan| plan.downcast_ref::<T>())
    }
}

impl fmt::Debug for RepairPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("RepairPlan(..)"),
            None => f.write_str("RepairPlan(empty)"),
        }
    }
}

/// Result of one `run`: what to show and what to fix.
#[derive(Debug)]
pub struct Outcome {
    pub result: CheckResult,
    pub plan: RepairPlan,
}

impl Outcome {
    pub fn new(result: CheckResult, plan: RepairPlan) -> Self {
        Self { result, plan }
    }

    /// A result with nothing to repair.
    pub fn report(result: CheckResult) -> Self {
        Self {
            result,
            plan: RepairPlan::none(),
        }
    }
}

impl From<CheckResult> for Outcome {
    fn from(result: CheckResult) -> Self {
        Self::report(result)
    }
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error("check cannot repair automatically")]
    Unsupported,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Command(String),

    #[error("refusing to {action}: {reason}")]
    Refused { action: String, reason: String },

    #[error("{} of the repairs failed: {}", .0.len(), .0.join("; "))]
    Partial(Vec<String>),
}

impl FixError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// `Ok` when no item failed, otherwise a `Partial` carrying every failure.
    pub fn collect(failures: Vec<String>) -> Result<(), FixError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::Partial(failures))
        }
    }
}

/// One unit of diagnosis.
pub trait Check {
    /// Stable kebab-case identifier.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn category(&self) -> Category;

    fn capability(&self) -> Capability {
        Capability::Diagnose
    }

    /// Gather evidence and classify it. Must not fail: evidence that cannot
    /// be collected degrades to a warning.
    fn run(&self, ctx: &CheckContext) -> Outcome;

    /// Apply the plan from the preceding `run`.
    fn try_fix(&self, _ctx: &CheckContext, _plan: &RepairPlan) -> Result<(), FixError> {
        Err(FixError::Unsupported)
    }
}
