use std::collections::BTreeMap;

use tracing::info;
use towndoc_core::fsutil::dir_exists;
use towndoc_core::state::NamepoolState;
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::{plural, rigs_in_scope};
use crate::types::{Category, CheckContext, CheckResult};

/// rig -> reserved names with no worker directory behind them
type StaleNames = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
struct StaleReservations(StaleNames);

/// Finds worker names still reserved in a rig's name pool after the worker
/// directory is gone.
pub struct NamepoolStaleCheck;

fn stale_in(layout: &TownLayout, rig: &str, state: &NamepoolState) -> Vec<String> {
    let polecats = layout.polecats_dir(rig);
    state
        .reserved()
        .filter(|name| !dir_exists(&polecats.join(name)))
        .map(str::to_string)
        .collect()
}

impl Check for NamepoolStaleCheck {
    fn name(&self) -> &'static str {
        "namepool-stale"
    }

    fn description(&self) -> &'static str {
        "Detect name pool reservations without a worker"
    }

    fn category(&self) -> Category {
        Category::Rig
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match rigs_in_scope(ctx, &layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut stale = StaleNames::new();
        let mut problems = Vec::new();
        for rig in rigs {
            let path = layout.namepool_state(&rig);
            match NamepoolState::load(&path) {
                Ok(Some(state)) => {
                    let names = stale_in(&layout, &rig, &state);
                    if !names.is_empty() {
                        stale.insert(rig, names);
                    }
                }
                Ok(None) => {}
                Err(err) => problems.push(format!("{rig}: {err}")),
            }
        }

        if stale.is_empty() {
            if problems.is_empty() {
                return CheckResult::ok("No stale namepool reservations").into();
            }
            return CheckResult::warning("Could not read namepool state")
                .with_details(problems)
                .into();
        }

        let count: usize = stale.values().map(Vec::len).sum();
        let result = CheckResult::warning(format!(
            "Found {}",
            plural(count, "stale namepool reservation")
        ))
        .with_details(
            stale
                .iter()
                .map(|(rig, names)| format!("{rig}: {}", names.join(", "))),
        )
        .with_details(problems)
        .with_hint("Run with --fix to release reservations whose worker directory is gone");
        Outcome::new(result, RepairPlan::new(StaleReservations(stale)))
    }

    fn try_fix(&self, ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(StaleReservations(stale)) = plan.get::<StaleReservations>() else {
            return Ok(());
        };
        let layout = ctx.layout();
        let mut failures = Vec::new();

        for (rig, planned) in stale {
            let path = layout.namepool_state(rig);
            let mut state = match NamepoolState::load(&path) {
                Ok(Some(state)) => state,
                Ok(None) => continue,
                Err(err) => {
                    failures.push(format!("{rig}: {err}"));
                    continue;
                }
            };
            // Only release names that are still stale now.
            let current = stale_in(&layout, rig, &state);
            let release: Vec<&String> = planned.iter().filter(|n| current.contains(n)).collect();
            if release.is_empty() {
                continue;
            }
            for name in &release {
                state.in_use.remove(name.as_str());
            }
            match state.save(&path) {
                Ok(()) => info!(rig = %rig, released = ?release, "released stale namepool names"),
                Err(err) => failures.push(format!("{rig}: {err}")),
            }
        }
        FixError::collect(failures)
    }
}
