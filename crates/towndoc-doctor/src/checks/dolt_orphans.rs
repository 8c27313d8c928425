use std::collections::BTreeSet;
use std::fs;

use tracing::{info, warn};
use towndoc_core::fsutil::{dir_exists, list_sub_dirs};
use towndoc_core::layout::HQ;
use towndoc_core::state::BeadsMetadata;
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::{registered_rigs, unreadable};
use crate::types::{Category, CheckContext, CheckResult};

#[derive(Debug)]
struct OrphanDatabases(Vec<String>);

/// Server databases that no town or rig metadata refers to.
pub struct DoltOrphanedDatabasesCheck;

/// Names a database directory may legitimately carry: `hq`, every
/// registered rig, and every `dolt_database` in their metadata. Metadata that
/// exists but cannot be read leaves the set unknown, so its errors come back
/// instead.
fn referenced_databases(
    layout: &TownLayout,
    rigs: &[String],
) -> Result<BTreeSet<String>, Vec<String>> {
    let mut names: BTreeSet<String> = rigs.iter().cloned().collect();
    names.insert(HQ.to_string());
    let mut problems = Vec::new();
    let dirs = std::iter::once(layout.town_beads_dir())
        .chain(rigs.iter().map(|rig| layout.rig_beads_dir(rig)));
    for dir in dirs {
        match BeadsMetadata::load(&dir) {
            Ok(Some(meta)) => {
                if let Some(db) = meta.dolt_database() {
                    names.insert(db.to_string());
                }
            }
            Ok(None) => {}
            Err(err) => problems.push(format!(
                "{}: {err}",
                dir.strip_prefix(layout.root()).unwrap_or(&dir).display()
            )),
        }
    }
    if problems.is_empty() {
        Ok(names)
    } else {
        Err(problems)
    }
}

fn find_orphans(layout: &TownLayout) -> Result<Vec<String>, CheckResult> {
    let rigs = registered_rigs(layout)?;
    let referenced = referenced_databases(layout, &rigs).map_err(|problems| {
        CheckResult::warning("Cannot tell orphaned databases apart: unreadable metadata")
            .with_details(problems)
            .with_hint("Repair the listed metadata.json files, then re-run")
    })?;
    let present =
        list_sub_dirs(&layout.dolt_data_dir()).map_err(|err| unreadable(".dolt-data/", err))?;
    Ok(present
        .into_iter()
        .filter(|name| !name.starts_with('.') && !referenced.contains(name))
        .collect())
}

impl Check for DoltOrphanedDatabasesCheck {
    fn name(&self) -> &'static str {
        "dolt-orphaned-databases"
    }

    fn description(&self) -> &'static str {
        "Detect Dolt databases no rig refers to"
    }

    fn category(&self) -> Category {
        Category::Cleanup
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        if !dir_exists(&layout.dolt_data_dir()) {
            return CheckResult::ok("No Dolt data directory").into();
        }
        let orphans = match find_orphans(&layout) {
            Ok(orphans) => orphans,
            Err(result) => return result.into(),
        };
        if orphans.is_empty() {
            return CheckResult::ok("No orphaned databases in .dolt-data/").into();
        }

        let result = CheckResult::warning(format!(
            "{} orphaned database(s) in .dolt-data/",
            orphans.len()
        ))
        .with_details(orphans.iter().map(|name| format!(".dolt-data/{name}")))
        .with_hint("Run with --fix to remove them (stop the Dolt server first)");
        Outcome::new(result, RepairPlan::new(OrphanDatabases(orphans)))
    }

    fn try_fix(&self, ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(OrphanDatabases(names)) = plan.get::<OrphanDatabases>() else {
            return Ok(());
        };
        let layout = ctx.layout();
        let still_orphaned: BTreeSet<String> = find_orphans(&layout)
            .map_err(|result| FixError::Refused {
                action: "remove databases from .dolt-data/".to_string(),
                reason: result.message,
            })?
            .into_iter()
            .collect();

        let mut failures = Vec::new();
        for name in names {
            if !still_orphaned.contains(name) {
                warn!(database = %name, "database is referenced again, leaving it");
                continue;
            }
            let path = layout.dolt_database_dir(name);
            match fs::remove_dir_all(&path) {
                Ok(()) => info!(path = %path.display(), "removed orphaned database"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => failures.push(format!("{}: {err}", path.display())),
            }
        }
        FixError::collect(failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::CheckStatus;

    fn database(town: &Path, name: &str) {
        fs::create_dir_all(town.join(".dolt-data").join(name).join(".dolt")).unwrap();
    }

    fn rigs(town: &Path, names: &[&str]) {
        fs::create_dir_all(town.join("mayor")).unwrap();
        let entries: Vec<String> = names.iter().map(|r| format!("\"{r}\":{{}}")).collect();
        fs::write(
            town.join("mayor").join("rigs.json"),
            format!("{{\"rigs\":{{{}}}}}", entries.join(",")),
        )
        .unwrap();
    }

    fn metadata(beads: &Path, db: &str) {
        fs::create_dir_all(beads).unwrap();
        fs::write(
            beads.join("metadata.json"),
            format!(r#"{{"backend":"dolt","dolt_database":"{db}"}}"#),
        )
        .unwrap();
    }

    #[test]
    fn missing_data_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let result = DoltOrphanedDatabasesCheck
            .run(&CheckContext::new(dir.path()))
            .result;
        assert_eq!(result.status, CheckStatus::Ok);
    }

    #[test]
    fn referenced_databases_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        database(town, "hq");
        database(town, "gastown");
        database(town, "beads_shared");
        rigs(town, &["gastown"]);
        metadata(&town.join("gastown").join(".beads"), "beads_shared");

        let result = DoltOrphanedDatabasesCheck.run(&CheckContext::new(town)).result;
        assert_eq!(result.status, CheckStatus::Ok);
    }

    #[test]
    fn detects_and_removes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        database(town, "hq");
        database(town, "wyvern");
        database(town, "beads_wy");
        rigs(town, &["wyvern"]);
        metadata(&town.join(".beads"), "hq");

        let ctx = CheckContext::new(town);
        let outcome = DoltOrphanedDatabasesCheck.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert_eq!(outcome.result.message, "1 orphaned database(s) in .dolt-data/");
        assert_eq!(outcome.result.details, vec![".dolt-data/beads_wy".to_string()]);
        assert!(outcome.result.fix_hint.is_some());

        DoltOrphanedDatabasesCheck.try_fix(&ctx, &outcome.plan).unwrap();
        assert!(!town.join(".dolt-data").join("beads_wy").exists());
        assert!(town.join(".dolt-data").join("hq").exists());
        assert!(town.join(".dolt-data").join("wyvern").exists());
    }

    #[test]
    fn unreadable_metadata_blocks_removal() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        database(town, "shared_db");
        rigs(town, &["gastown"]);
        let beads = town.join("gastown").join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(
            beads.join("metadata.json"),
            r#"{"backend":"dolt","dolt_database":"shared_db","#,
        )
        .unwrap();

        let ctx = CheckContext::new(town);
        let outcome = DoltOrphanedDatabasesCheck.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert!(outcome.result.message.contains("unreadable metadata"));
        assert!(outcome.result.details[0].starts_with("gastown/.beads: "));
        assert!(outcome.plan.is_empty());

        // A plan made before the metadata broke is refused too.
        let plan = RepairPlan::new(OrphanDatabases(vec!["shared_db".to_string()]));
        let err = DoltOrphanedDatabasesCheck.try_fix(&ctx, &plan).unwrap_err();
        assert!(matches!(err, FixError::Refused { .. }), "{err}");
        assert!(town.join(".dolt-data").join("shared_db").exists());
    }

    #[test]
    fn fix_spares_databases_referenced_since_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        database(town, "late");
        rigs(town, &[]);
        let ctx = CheckContext::new(town);
        let outcome = DoltOrphanedDatabasesCheck.run(&ctx);
        assert_eq!(outcome.result.details.len(), 1);

        metadata(&town.join(".beads"), "late");
        DoltOrphanedDatabasesCheck.try_fix(&ctx, &outcome.plan).unwrap();
        assert!(town.join(".dolt-data").join("late").exists());
    }
}
