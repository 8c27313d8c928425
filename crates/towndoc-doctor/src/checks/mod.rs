//! The built-in checks and the registry that wires them to providers.

use std::collections::BTreeSet;
use std::sync::Arc;

use towndoc_core::config::DoctorConfig;
use towndoc_core::TownLayout;

use crate::check::Check;
use crate::probe::Providers;
use crate::types::{CheckContext, CheckResult};

pub mod beads_migration;
pub mod claude_settings;
pub mod dolt_hooks;
pub mod dolt_metadata;
pub mod dolt_orphans;
pub mod dolt_server;
pub mod namepool;
pub mod oj_daemon;
pub mod orphan_processes;
pub mod orphan_sessions;
pub mod pre_checkout_hook;
pub mod rig_git;
pub mod session_names;
pub mod stale_locks;
pub mod stale_redirect;

pub use beads_migration::BeadsMigrationCheck;
pub use claude_settings::ClaudeSettingsCheck;
pub use dolt_hooks::DoltHooksCheck;
pub use dolt_metadata::DoltMetadataCheck;
pub use dolt_orphans::DoltOrphanedDatabasesCheck;
pub use dolt_server::DoltServerReachableCheck;
pub use namepool::NamepoolStaleCheck;
pub use oj_daemon::OjDaemonCheck;
pub use orphan_processes::OrphanProcessCheck;
pub use orphan_sessions::OrphanSessionCheck;
pub use pre_checkout_hook::PreCheckoutHookCheck;
pub use rig_git::{GitExcludeCheck, RigIsGitRepoCheck};
pub use session_names::SessionNameCheck;
pub use stale_locks::StaleLockCheck;
pub use stale_redirect::StaleBeadsRedirectCheck;

/// Every built-in check, in registration order.
pub fn default_checks(providers: &Providers, config: &DoctorConfig) -> Vec<Box<dyn Check>> {
    vec![
        Box::new(BeadsMigrationCheck),
        Box::new(DoltServerReachableCheck::new(
            Arc::clone(&providers.dialer),
            config.dolt_host.clone(),
            config.dolt_port,
            config.dial_timeout(),
        )),
        Box::new(DoltMetadataCheck),
        Box::new(OjDaemonCheck::new(
            Arc::clone(&providers.commands),
            config.oj_dispatch,
            config.command_timeout(),
        )),
        Box::new(RigIsGitRepoCheck::new(Arc::clone(&providers.git))),
        Box::new(GitExcludeCheck::new(Arc::clone(&providers.git))),
        Box::new(NamepoolStaleCheck),
        Box::new(StaleLockCheck::new(Arc::clone(&providers.pids))),
        Box::new(ClaudeSettingsCheck::new(
            Arc::clone(&providers.git),
            Arc::clone(&providers.tmux),
        )),
        Box::new(OrphanSessionCheck::new(Arc::clone(&providers.tmux))),
        Box::new(SessionNameCheck::new(Arc::clone(&providers.tmux))),
        Box::new(OrphanProcessCheck::new(Arc::clone(&providers.processes))),
        Box::new(DoltOrphanedDatabasesCheck),
        Box::new(StaleBeadsRedirectCheck),
        Box::new(DoltHooksCheck::new(
            Arc::clone(&providers.commands),
            config.command_timeout(),
        )),
        Box::new(PreCheckoutHookCheck),
    ]
}

/// Warning for a check that could not read `what`.
pub(crate) fn unreadable(what: &str, err: impl std::fmt::Display) -> CheckResult {
    CheckResult::warning(format!("Could not read {what}")).with_detail(err.to_string())
}

/// Rigs from `mayor/rigs.json`, or a ready-made warning.
pub(crate) fn registered_rigs(layout: &TownLayout) -> Result<Vec<String>, CheckResult> {
    layout
        .registered_rigs()
        .map_err(|err| unreadable("mayor/rigs.json", err))
}

/// Rigs to inspect: the selected one, or every directory that is registered
/// or shaped like a rig.
pub(crate) fn rigs_in_scope(
    ctx: &CheckContext,
    layout: &TownLayout,
) -> Result<Vec<String>, CheckResult> {
    if let Some(rig) = &ctx.rig {
        return Ok(vec![rig.clone()]);
    }
    let mut rigs: BTreeSet<String> = registered_rigs(layout)?.into_iter().collect();
    let discovered = layout
        .pool_rigs()
        .and_then(|mut pools| {
            pools.extend(layout.likely_rigs()?);
            Ok(pools)
        })
        .map_err(|err| unreadable("town root", err))?;
    rigs.extend(discovered);
    Ok(rigs.into_iter().collect())
}

/// `n` followed by `word`, pluralised with a trailing `s`.
pub(crate) fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}
