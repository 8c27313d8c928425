//! Diagnose-and-repair engine for a town.
//!
//! Probes gather evidence, classifiers reduce it to small states, checks turn
//! states into results and repair plans, and the [`Doctor`] runs checks in
//! order and aggregates a [`Report`].

pub mod check;
pub mod checks;
pub mod classify;
pub mod doctor;
pub mod filter;
pub mod probe;
pub mod repair;
pub mod types;

pub use check::{Capability, Check, FixError, Outcome, RepairPlan};
pub use doctor::{Doctor, StreamOptions};
pub use types::{Category, CheckContext, CheckResult, CheckStatus, Report, ReportSummary};
