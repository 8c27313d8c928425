use towndoc_core::layout::HQ;

use crate::check::{Check, Outcome};
use crate::checks::registered_rigs;
use crate::classify::{classify_migration, MigrationEvidence};
use crate::types::{Category, CheckContext, CheckResult};

/// Reports town and rig databases that have not fully moved to the Dolt
/// server. Migration itself is a separate, deliberate operation.
pub struct BeadsMigrationCheck;

impl Check for BeadsMigrationCheck {
    fn name(&self) -> &'static str {
        "beads-migration"
    }

    fn description(&self) -> &'static str {
        "Check that beads databases are migrated to Dolt"
    }

    fn category(&self) -> Category {
        Category::Infrastructure
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match registered_rigs(&layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut targets = vec![(HQ.to_string(), layout.town_beads_dir())];
        targets.extend(rigs.into_iter().map(|rig| {
            let dir = layout.rig_beads_dir(&rig);
            (rig, dir)
        }));

        let mut pending = Vec::new();
        let mut unreadable = Vec::new();
        let mut checked = 0;
        for (name, dir) in &targets {
            match MigrationEvidence::gather(&layout, name, dir) {
                Ok(evidence) => {
                    let classification = classify_migration(&evidence);
                    if classification.state.needs_migration() {
                        pending.push(classification.detail(name));
                    }
                    checked += 1;
                }
                Err(err) => unreadable.push(format!("{name}: could not read metadata: {err}")),
            }
        }

        if pending.is_empty() && unreadable.is_empty() {
            return CheckResult::ok(format!(
                "No beads databases need migration ({checked} checked)"
            ))
            .into();
        }
        if pending.is_empty() {
            return CheckResult::warning("Could not read beads metadata")
                .with_details(unreadable)
                .into();
        }

        CheckResult::warning(format!(
            "{} beads database(s) need migration to Dolt",
            pending.len()
        ))
        .with_details(pending.into_iter().chain(unreadable))
        .with_hint("Run 'gt dolt migrate' to move the listed databases to the Dolt server")
        .into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::fs;
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::CheckStatus;

    fn register(town: &Path, rigs: &[&str]) {
        fs::create_dir_all(town.join("mayor")).unwrap();
        let entries: Vec<String> = rigs.iter().map(|r| format!("\"{r}\":{{}}")).collect();
        fs::write(
            town.join("mayor").join("rigs.json"),
            format!("{{\"version\":1,\"rigs\":{{{}}}}}", entries.join(",")),
        )
        .unwrap();
    }

    #[test]
    fn empty_town_needs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        register(dir.path(), &[]);
        let result = BeadsMigrationCheck
            .run(&CheckContext::new(dir.path()))
            .result;
        assert_eq!(result.status, CheckStatus::Ok);
    }

    #[test]
    fn partially_migrated_rig_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        register(town, &["R"]);
        let beads = town.join("R").join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join("metadata.json"), r#"{"backend":"sqlite"}"#).unwrap();
        fs::write(beads.join("beads.db"), "").unwrap();
        let manifest = town.join(".dolt-data").join("R").join(".dolt");
        fs::create_dir_all(&manifest).unwrap();
        fs::write(manifest.join("manifest"), "").unwrap();

        let result = BeadsMigrationCheck.run(&CheckContext::new(town)).result;
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(
            result.details,
            vec!["R: partially migrated (metadata declares sqlite but .dolt-data/R exists)"
                .to_string()]
        );
    }

    #[test]
    fn migrated_hq_passes() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        register(town, &[]);
        fs::create_dir_all(town.join(".beads")).unwrap();
        fs::write(
            town.join(".beads").join("metadata.json"),
            r#"{"backend":"dolt","dolt_mode":"server","dolt_database":"hq"}"#,
        )
        .unwrap();
        fs::create_dir_all(town.join(".dolt-data").join("hq").join(".dolt")).unwrap();

        let result = BeadsMigrationCheck.run(&CheckContext::new(town)).result;
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.message, "No beads databases need migration (1 checked)");
    }

    #[test]
    fn corrupt_registry_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mayor")).unwrap();
        fs::write(dir.path().join("mayor").join("rigs.json"), "{nope").unwrap();
        let result = BeadsMigrationCheck
            .run(&CheckContext::new(dir.path()))
            .result;
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.message, "Could not read mayor/rigs.json");
    }
}
