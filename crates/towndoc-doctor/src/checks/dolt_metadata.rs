use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use towndoc_core::fsutil::dir_exists;
use towndoc_core::layout::HQ;
use towndoc_core::state::{BeadsMetadata, BACKEND_DOLT, DEFAULT_JSONL_EXPORT, DOLT_MODE_SERVER};
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::registered_rigs;
use crate::types::{Category, CheckContext, CheckResult};

#[derive(Debug)]
struct MissingMetadata(Vec<String>);

/// Databases with server data whose `metadata.json` does not point at the
/// server.
pub struct DoltMetadataCheck;

/// True when the beads directory is configured for the shared server.
/// Any non-empty database name is accepted so rigs may share one database.
pub fn has_server_metadata(beads_dir: &Path) -> bool {
    let Ok(Some(meta)) = BeadsMetadata::load(beads_dir) else {
        return false;
    };
    meta.is_dolt()
        && meta.is_server_mode()
        && meta.dolt_database().is_some()
        && meta.jsonl_export() == Some(DEFAULT_JSONL_EXPORT)
}

fn beads_dir_for(layout: &TownLayout, name: &str) -> PathBuf {
    if name == HQ {
        layout.town_beads_dir()
    } else {
        layout.rig_beads_dir(name)
    }
}

/// Merge the server fields into the existing metadata for `name`.
///
/// An existing `dolt_database` is kept. Otherwise a rig inherits the town's
/// database name and falls back to its own.
pub fn write_server_metadata(layout: &TownLayout, name: &str) -> Result<(), FixError> {
    let beads_dir = beads_dir_for(layout, name);
    fs::create_dir_all(&beads_dir).map_err(|err| FixError::io("create", &beads_dir, err))?;

    // A corrupt file is replaced rather than blocking the repair.
    let mut meta = BeadsMetadata::load(&beads_dir)
        .ok()
        .flatten()
        .unwrap_or_default();

    if meta.dolt_database().is_none() {
        let town_db = if name == HQ {
            None
        } else {
            BeadsMetadata::load(&layout.town_beads_dir())
                .ok()
                .flatten()
                .and_then(|town| town.dolt_database().map(str::to_string))
        };
        meta.set("dolt_database", town_db.as_deref().unwrap_or(name));
    }
    meta.set("database", BACKEND_DOLT);
    meta.set("backend", BACKEND_DOLT);
    meta.set("dolt_mode", DOLT_MODE_SERVER);
    meta.set("jsonl_export", DEFAULT_JSONL_EXPORT);
    meta.save(&beads_dir)?;
    info!(name, dir = %beads_dir.display(), "wrote dolt server metadata");
    Ok(())
}

impl Check for DoltMetadataCheck {
    fn name(&self) -> &'static str {
        "dolt-metadata"
    }

    fn description(&self) -> &'static str {
        "Check that metadata.json has Dolt server config"
    }

    fn category(&self) -> Category {
        Category::Infrastructure
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        if !dir_exists(&layout.dolt_data_dir()) {
            return CheckResult::ok("No Dolt data directory (dolt not in use)").into();
        }
        let rigs = match registered_rigs(&layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut details = Vec::new();
        let mut missing = Vec::new();
        let mut ok = 0;

        if dir_exists(&layout.dolt_database_dir(HQ)) {
            if has_server_metadata(&layout.town_beads_dir()) {
                ok += 1;
            } else {
                details.push(format!("Missing dolt config: {HQ} (town root .beads/)"));
                missing.push(HQ.to_string());
            }
        }

        for rig in rigs {
            if !dir_exists(&layout.dolt_database_dir(&rig)) {
                continue;
            }
            let beads_dir = layout.rig_beads_dir(&rig);
            if !dir_exists(&beads_dir) {
                details.push(format!("Missing dolt config: {rig} (no .beads directory)"));
                missing.push(rig);
            } else if has_server_metadata(&beads_dir) {
                ok += 1;
            } else {
                let rel = beads_dir
                    .strip_prefix(layout.root())
                    .unwrap_or(&beads_dir)
                    .display()
                    .to_string();
                details.push(format!("Missing dolt config: {rig} ({rel})"));
                missing.push(rig);
            }
        }

        if missing.is_empty() {
            return CheckResult::ok(format!("All {ok} rig(s) have Dolt server metadata")).into();
        }

        let result = CheckResult::warning(format!(
            "{} rig(s) missing Dolt server metadata",
            missing.len()
        ))
        .with_details(details)
        .with_hint("Run 'gt dolt fix-metadata' to update all metadata.json files");
        Outcome::new(result, RepairPlan::new(MissingMetadata(missing)))
    }

    fn try_fix(&self, ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(MissingMetadata(names)) = plan.get::<MissingMetadata>() else {
            return Ok(());
        };
        let layout = ctx.layout();
        let failures = names
            .iter()
            .filter_map(|name| {
                write_server_metadata(&layout, name)
                    .err()
                    .map(|err| format!("{name}: {err}"))
            })
            .collect();
        FixError::collect(failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;
    use crate::types::CheckStatus;

    fn town(rigs: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mayor")).unwrap();
        let entries: Vec<String> = rigs.iter().map(|r| format!("\"{r}\":{{}}")).collect();
        fs::write(
            dir.path().join("mayor").join("rigs.json"),
            format!("{{\"rigs\":{{{}}}}}", entries.join(",")),
        )
        .unwrap();
        dir
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path.join("metadata.json")).unwrap()).unwrap()
    }

    #[test]
    fn skipped_without_dolt_data() {
        let dir = town(&["myrig"]);
        let result = DoltMetadataCheck.run(&CheckContext::new(dir.path())).result;
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.message, "No Dolt data directory (dolt not in use)");
    }

    #[test]
    fn shared_database_name_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("metadata.json"),
            r#"{"backend":"dolt","dolt_mode":"server","dolt_database":"beads_hq","jsonl_export":"issues.jsonl"}"#,
        )
        .unwrap();
        assert!(has_server_metadata(dir.path()));

        fs::write(
            dir.path().join("metadata.json"),
            r#"{"backend":"dolt","dolt_mode":"server","dolt_database":"","jsonl_export":"issues.jsonl"}"#,
        )
        .unwrap();
        assert!(!has_server_metadata(dir.path()));
    }

    #[test]
    fn reports_and_fixes_missing_metadata() {
        let dir = town(&["myrig"]);
        let root = dir.path();
        fs::create_dir_all(root.join(".dolt-data").join("myrig")).unwrap();
        let beads = root.join("myrig").join("mayor").join("rig").join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join("metadata.json"), r#"{"prefix":"gt"}"#).unwrap();

        let ctx = CheckContext::new(root);
        let outcome = DoltMetadataCheck.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert_eq!(
            outcome.result.details,
            vec!["Missing dolt config: myrig (myrig/mayor/rig/.beads)".to_string()]
        );

        DoltMetadataCheck.try_fix(&ctx, &outcome.plan).unwrap();
        let meta = read(&beads);
        assert_eq!(meta["backend"], "dolt");
        assert_eq!(meta["database"], "dolt");
        assert_eq!(meta["dolt_mode"], "server");
        assert_eq!(meta["dolt_database"], "myrig");
        assert_eq!(meta["jsonl_export"], "issues.jsonl");
        assert_eq!(meta["prefix"], "gt");
        assert!(fs::read_to_string(beads.join("metadata.json"))
            .unwrap()
            .ends_with('\n'));

        assert_eq!(DoltMetadataCheck.run(&ctx).result.status, CheckStatus::Ok);
    }

    #[test]
    fn rig_inherits_town_database_name() {
        let dir = town(&["myrig"]);
        let root = dir.path();
        fs::create_dir_all(root.join(".beads")).unwrap();
        fs::write(
            root.join(".beads").join("metadata.json"),
            r#"{"dolt_database":"beads_hq","backend":"dolt","dolt_mode":"server"}"#,
        )
        .unwrap();
        let beads = root.join("myrig").join("mayor").join("rig").join(".beads");
        fs::create_dir_all(&beads).unwrap();

        write_server_metadata(&TownLayout::new(root), "myrig").unwrap();
        assert_eq!(read(&beads)["dolt_database"], "beads_hq");
    }

    #[test]
    fn existing_database_name_is_preserved() {
        let dir = town(&["myrig"]);
        let root = dir.path();
        fs::create_dir_all(root.join(".beads")).unwrap();
        fs::write(
            root.join(".beads").join("metadata.json"),
            r#"{"dolt_database":"beads_hq"}"#,
        )
        .unwrap();
        let beads = root.join("myrig").join("mayor").join("rig").join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join("metadata.json"), r#"{"dolt_database":"custom_db"}"#).unwrap();

        write_server_metadata(&TownLayout::new(root), "myrig").unwrap();
        assert_eq!(read(&beads)["dolt_database"], "custom_db");
    }

    #[test]
    fn hq_is_checked_when_its_data_exists() {
        let dir = town(&[]);
        let root = dir.path();
        fs::create_dir_all(root.join(".dolt-data").join("hq")).unwrap();
        let ctx = CheckContext::new(root);
        let outcome = DoltMetadataCheck.run(&ctx);
        assert_eq!(
            outcome.result.details,
            vec!["Missing dolt config: hq (town root .beads/)".to_string()]
        );
        DoltMetadataCheck.try_fix(&ctx, &outcome.plan).unwrap();
        assert_eq!(read(&root.join(".beads"))["dolt_database"], "hq");
    }
}
