//! Backend migration state of one beads database.
//!
//! Three sources of evidence can disagree: the backend declared in
//! `metadata.json`, embedded artifacts in the `.beads` directory, and a
//! server data directory under `.dolt-data/`.

use std::fmt;
use std::fs;
use std::path::Path;

use towndoc_core::error::Result;
use towndoc_core::fsutil::dir_exists;
use towndoc_core::layout::TownLayout;
use towndoc_core::state::{BeadsMetadata, BACKEND_DOLT, DEFAULT_JSONL_EXPORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NoBeads,
    NeverMigrated,
    PartiallyMigrated,
    FullyMigrated,
}

impl MigrationState {
    pub fn needs_migration(&self) -> bool {
        matches!(self, Self::NeverMigrated | Self::PartiallyMigrated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoBeads => "no beads",
            Self::NeverMigrated => "not migrated",
            Self::PartiallyMigrated => "partially migrated",
            Self::FullyMigrated => "fully migrated",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed facts for one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationEvidence {
    /// `hq` or the rig name.
    pub name: String,
    pub has_metadata: bool,
    /// Declared `backend`, `None` when the field or the file is absent.
    pub backend: Option<String>,
    /// Database name the server data would live under.
    pub database: String,
    /// A `*.db` single-file database in the beads directory.
    pub has_embedded_db: bool,
    /// A JSONL export in the beads directory.
    pub has_jsonl: bool,
    /// `.dolt-data/<database>/.dolt` exists.
    pub has_server_data: bool,
    /// `.dolt-data/<name>` exists in any form.
    pub has_named_data_dir: bool,
}

impl MigrationEvidence {
    /// Collect evidence for `name` whose beads live in `beads_dir`.
    pub fn gather(layout: &TownLayout, name: &str, beads_dir: &Path) -> Result<Self> {
        let metadata = BeadsMetadata::load(beads_dir)?;
        let backend = metadata
            .as_ref()
            .and_then(|m| m.backend())
            .map(str::to_string);
        let database = metadata
            .as_ref()
            .and_then(|m| m.dolt_database())
            .unwrap_or(name)
            .to_string();
        let jsonl_name = metadata
            .as_ref()
            .and_then(|m| m.jsonl_export())
            .unwrap_or(DEFAULT_JSONL_EXPORT)
            .to_string();

        let (has_embedded_db, has_jsonl) = scan_artifacts(beads_dir, &jsonl_name);

        Ok(Self {
            name: name.to_string(),
            has_metadata: metadata.is_some(),
            backend,
            has_server_data: dir_exists(&layout.dolt_database_dir(&database).join(".dolt")),
            has_named_data_dir: dir_exists(&layout.dolt_database_dir(name)),
            database,
            has_embedded_db,
            has_jsonl,
        })
    }

    fn declares_server(&self) -> bool {
        self.backend.as_deref() == Some(BACKEND_DOLT)
    }
}

fn scan_artifacts(beads_dir: &Path, jsonl_name: &str) -> (bool, bool) {
    let Ok(entries) = fs::read_dir(beads_dir) else {
        return (false, false);
    };
    let mut db = false;
    let mut jsonl = false;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".db") {
            db = true;
        } else if name == jsonl_name {
            jsonl = true;
        }
    }
    (db, jsonl)
}

/// A state with the evidence that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: MigrationState,
    pub reason: String,
}

impl Classification {
    fn new(state: MigrationState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: reason.into(),
        }
    }

    /// `<name>: <state> (<reason>)`.
    pub fn detail(&self, name: &str) -> String {
        format!("{name}: {} ({})", self.state, self.reason)
    }
}

/// Apply the decision table, first match wins.
pub fn classify_migration(ev: &MigrationEvidence) -> Classification {
    use MigrationState::*;

    if !ev.has_metadata && !ev.has_embedded_db && !ev.has_jsonl && !ev.has_named_data_dir {
        return Classification::new(NoBeads, "no metadata or data files");
    }
    if ev.declares_server() {
        if ev.has_server_data {
            return Classification::new(
                FullyMigrated,
                format!("dolt server data at .dolt-data/{}", ev.database),
            );
        }
        return Classification::new(
            PartiallyMigrated,
            format!(
                "metadata declares dolt but .dolt-data/{} is missing",
                ev.database
            ),
        );
    }

    let declared = ev.backend.as_deref().unwrap_or("no backend");
    if ev.has_named_data_dir {
        return Classification::new(
            PartiallyMigrated,
            format!("metadata declares {declared} but .dolt-data/{} exists", ev.name),
        );
    }
    if ev.has_jsonl && !ev.has_embedded_db {
        return Classification::new(NeverMigrated, "JSONL only");
    }
    if ev.has_embedded_db {
        return Classification::new(NeverMigrated, format!("{declared} database file present"));
    }
    Classification::new(NeverMigrated, format!("metadata declares {declared}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ev() -> MigrationEvidence {
        MigrationEvidence {
            name: "R".into(),
            database: "R".into(),
            ..MigrationEvidence::default()
        }
    }

    #[test]
    fn nothing_at_all_is_no_beads() {
        let c = classify_migration(&ev());
        assert_eq!(c.state, MigrationState::NoBeads);
        assert!(!c.state.needs_migration());
    }

    #[test]
    fn declared_and_present_is_fully_migrated() {
        let c = classify_migration(&MigrationEvidence {
            has_metadata: true,
            backend: Some("dolt".into()),
            has_server_data: true,
            has_named_data_dir: true,
            ..ev()
        });
        assert_eq!(c.state, MigrationState::FullyMigrated);
        assert!(!c.state.needs_migration());
    }

    #[test]
    fn declared_ahead_of_reality_is_partial() {
        let c = classify_migration(&MigrationEvidence {
            has_metadata: true,
            backend: Some("dolt".into()),
            has_embedded_db: true,
            ..ev()
        });
        assert_eq!(c.state, MigrationState::PartiallyMigrated);
        assert!(c.state.needs_migration());
        assert_eq!(c.reason, "metadata declares dolt but .dolt-data/R is missing");
    }

    #[test]
    fn reality_ahead_of_declaration_is_partial() {
        let c = classify_migration(&MigrationEvidence {
            has_metadata: true,
            backend: Some("sqlite".into()),
            has_embedded_db: true,
            has_named_data_dir: true,
            has_server_data: true,
            ..ev()
        });
        assert_eq!(c.state, MigrationState::PartiallyMigrated);
        assert_eq!(
            c.detail("R"),
            "R: partially migrated (metadata declares sqlite but .dolt-data/R exists)"
        );
    }

    #[test]
    fn data_dir_without_metadata_is_partial() {
        let c = classify_migration(&MigrationEvidence {
            has_named_data_dir: true,
            ..ev()
        });
        assert_eq!(c.state, MigrationState::PartiallyMigrated);
    }

    #[test]
    fn embedded_only_is_never_migrated() {
        let jsonl = classify_migration(&MigrationEvidence {
            has_metadata: true,
            backend: Some("sqlite".into()),
            has_jsonl: true,
            ..ev()
        });
        assert_eq!(jsonl.state, MigrationState::NeverMigrated);
        assert_eq!(jsonl.reason, "JSONL only");

        let db = classify_migration(&MigrationEvidence {
            has_metadata: true,
            backend: Some("sqlite".into()),
            has_jsonl: true,
            has_embedded_db: true,
            ..ev()
        });
        assert_eq!(db.state, MigrationState::NeverMigrated);
        assert!(db.state.needs_migration());
    }

    #[test]
    fn gather_reads_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let beads = town.join("R").join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join("metadata.json"), r#"{"backend":"sqlite"}"#).unwrap();
        fs::write(beads.join("beads.db"), "").unwrap();
        let manifest_dir = town.join(".dolt-data").join("R").join(".dolt");
        fs::create_dir_all(&manifest_dir).unwrap();
        fs::write(manifest_dir.join("manifest"), "m").unwrap();

        let layout = TownLayout::new(town);
        let ev = MigrationEvidence::gather(&layout, "R", &beads).unwrap();
        assert!(ev.has_metadata);
        assert!(ev.has_embedded_db);
        assert!(!ev.has_jsonl);
        assert!(ev.has_named_data_dir);
        assert!(ev.has_server_data);
        assert_eq!(ev.backend.as_deref(), Some("sqlite"));

        let c = classify_migration(&ev);
        assert_eq!(c.state, MigrationState::PartiallyMigrated);
        assert!(c.detail("R").contains("partially migrated"));
    }
}
