//! Directory conventions of a town.
//!
//! ```text
//! <town>/mayor/rigs.json
//! <town>/.beads/                      town-level ("hq") database
//! <town>/.dolt-data/<db>/.dolt        centralized server data
//! <town>/<rig>/mayor/rig/             authoritative clone
//! <town>/<rig>/{witness,refinery}/rig/
//! <town>/<rig>/crew/<name>/
//! <town>/<rig>/polecats/<name>/<rig>/
//! <town>/<rig>/.runtime/namepool-state.json
//! ```

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::{dir_exists, list_sub_dirs, path_exists, read_json};
use crate::state::RigsRegistry;

pub const HQ: &str = "hq";
pub const BEADS_DIR: &str = ".beads";
pub const DOLT_DATA_DIR: &str = ".dolt-data";
pub const RUNTIME_DIR: &str = ".runtime";
pub const CREW_DIR: &str = "crew";
pub const POLECATS_DIR: &str = "polecats";

/// Top-level directories that are never rigs.
const NON_RIG_DIRS: [&str; 4] = ["mayor", "deacon", "daemon", "docs"];

#[derive(Debug, Clone)]
pub struct TownLayout {
    root: PathBuf,
}

impl TownLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mayor_dir(&self) -> PathBuf {
        self.root.join("mayor")
    }

    pub fn rigs_json(&self) -> PathBuf {
        self.mayor_dir().join("rigs.json")
    }

    pub fn town_beads_dir(&self) -> PathBuf {
        self.root.join(BEADS_DIR)
    }

    pub fn dolt_data_dir(&self) -> PathBuf {
        self.root.join(DOLT_DATA_DIR)
    }

    pub fn dolt_database_dir(&self, database: &str) -> PathBuf {
        self.dolt_data_dir().join(database)
    }

    pub fn rig_path(&self, rig: &str) -> PathBuf {
        self.root.join(rig)
    }

    pub fn crew_dir(&self, rig: &str) -> PathBuf {
        self.rig_path(rig).join(CREW_DIR)
    }

    pub fn polecats_dir(&self, rig: &str) -> PathBuf {
        self.rig_path(rig).join(POLECATS_DIR)
    }

    pub fn namepool_state(&self, rig: &str) -> PathBuf {
        self.rig_path(rig)
            .join(RUNTIME_DIR)
            .join("namepool-state.json")
    }

    /// The beads directory a rig actually uses: the tracked one inside the
    /// mayor clone when present, otherwise the rig-root one.
    pub fn rig_beads_dir(&self, rig: &str) -> PathBuf {
        let tracked = self.rig_path(rig).join("mayor").join("rig").join(BEADS_DIR);
        if dir_exists(&tracked) {
            return tracked;
        }
        self.rig_path(rig).join(BEADS_DIR)
    }

    /// Rigs listed in `mayor/rigs.json`, sorted. A missing registry is empty.
    pub fn registered_rigs(&self) -> Result<Vec<String>> {
        let registry: Option<RigsRegistry> = read_json(&self.rigs_json())?;
        Ok(registry
            .map(|r| r.rigs.into_keys().collect())
            .unwrap_or_default())
    }

    /// Top-level directories shaped like a rig: they expose a crew or
    /// polecat pool directory.
    pub fn pool_rigs(&self) -> Result<Vec<String>> {
        Ok(self
            .candidate_dirs()?
            .into_iter()
            .filter(|name| {
                dir_exists(&self.crew_dir(name)) || dir_exists(&self.polecats_dir(name))
            })
            .collect())
    }

    /// Looser rig detection: anything with a git dir, a mayor clone, or a
    /// beads directory.
    pub fn likely_rigs(&self) -> Result<Vec<String>> {
        Ok(self
            .candidate_dirs()?
            .into_iter()
            .filter(|name| {
                let rig = self.rig_path(name);
                path_exists(&rig.join(".git"))
                    || dir_exists(&rig.join("mayor").join("rig"))
                    || dir_exists(&rig.join(BEADS_DIR))
            })
            .collect())
    }

    /// Every top-level directory that could be a rig: not hidden and not one
    /// of the town's own directories.
    pub fn candidate_dirs(&self) -> Result<Vec<String>> {
        Ok(list_sub_dirs(&self.root)?
            .into_iter()
            .filter(|name| !name.starts_with('.') && !NON_RIG_DIRS.contains(&name.as_str()))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pool_rigs_require_crew_or_polecats() {
        let town = tempfile::tempdir().unwrap();
        let root = town.path();
        fs::create_dir_all(root.join("gastown/crew")).unwrap();
        fs::create_dir_all(root.join("gastown/polecats")).unwrap();
        fs::create_dir_all(root.join("niflheim/crew")).unwrap();
        fs::create_dir_all(root.join("grctool/polecats")).unwrap();
        fs::create_dir_all(root.join("not-a-rig")).unwrap();
        fs::create_dir_all(root.join("mayor/crew")).unwrap();
        fs::create_dir_all(root.join(".hidden/crew")).unwrap();

        let layout = TownLayout::new(root);
        assert_eq!(
            layout.pool_rigs().unwrap(),
            vec!["gastown", "grctool", "niflheim"]
        );
    }

    #[test]
    fn rig_beads_dir_prefers_mayor_clone() {
        let town = tempfile::tempdir().unwrap();
        let layout = TownLayout::new(town.path());
        assert_eq!(
            layout.rig_beads_dir("alpha"),
            town.path().join("alpha/.beads")
        );

        fs::create_dir_all(town.path().join("alpha/mayor/rig/.beads")).unwrap();
        assert_eq!(
            layout.rig_beads_dir("alpha"),
            town.path().join("alpha/mayor/rig/.beads")
        );
    }

    #[test]
    fn registered_rigs_reads_registry() {
        let town = tempfile::tempdir().unwrap();
        fs::create_dir_all(town.path().join("mayor")).unwrap();
        fs::write(
            town.path().join("mayor/rigs.json"),
            r#"{"version":1,"rigs":{"zeta":{"git_url":"x"},"alpha":{}}}"#,
        )
        .unwrap();
        let layout = TownLayout::new(town.path());
        assert_eq!(layout.registered_rigs().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn registered_rigs_missing_registry_is_empty() {
        let town = tempfile::tempdir().unwrap();
        let layout = TownLayout::new(town.path());
        assert!(layout.registered_rigs().unwrap().is_empty());
    }

    #[test]
    fn likely_rigs_accepts_git_or_beads() {
        let town = tempfile::tempdir().unwrap();
        let root = town.path();
        fs::create_dir_all(root.join("a/.git")).unwrap();
        fs::create_dir_all(root.join("b/mayor/rig")).unwrap();
        fs::create_dir_all(root.join("c/.beads")).unwrap();
        fs::create_dir_all(root.join("d/src")).unwrap();
        let layout = TownLayout::new(root);
        assert_eq!(layout.likely_rigs().unwrap(), vec!["a", "b", "c"]);
    }
}
