#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use towndoc_core::config::DoctorConfig;
use towndoc_doctor::checks::default_checks;
use towndoc_doctor::probe::{InMemoryTmux, Providers, StaticDialer};
use towndoc_doctor::{CheckContext, CheckResult, CheckStatus, Doctor, Report};

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn register(town: &Path, rigs: &[&str]) {
    let entries: Vec<String> = rigs.iter().map(|r| format!("\"{r}\":{{}}")).collect();
    write(
        &town.join("mayor/rigs.json"),
        &format!("{{\"version\":1,\"rigs\":{{{}}}}}", entries.join(",")),
    );
}

fn doctor(providers: &Providers) -> Doctor {
    Doctor::with_checks(default_checks(providers, &DoctorConfig::default()))
}

fn result<'a>(report: &'a Report, name: &str) -> &'a CheckResult {
    report
        .results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no result for {name}"))
}

#[test]
fn empty_town_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    register(dir.path(), &[]);
    let report = doctor(&Providers::in_memory()).run(&CheckContext::new(dir.path()));
    let unhealthy: Vec<(&str, &str)> = report
        .results
        .iter()
        .filter(|r| r.status != CheckStatus::Ok)
        .map(|r| (r.name.as_str(), r.message.as_str()))
        .collect();
    assert_eq!(unhealthy, Vec::<(&str, &str)>::new());
    assert!(report.is_healthy());
}

#[test]
fn server_mode_without_server_is_split_brain() {
    let dir = tempfile::tempdir().unwrap();
    let town = dir.path();
    register(town, &["gastown"]);
    write(
        &town.join("gastown/.beads/metadata.json"),
        r#"{"backend":"dolt","dolt_mode":"server","dolt_database":"gastown"}"#,
    );
    let ctx = CheckContext::new(town);

    let report = doctor(&Providers::in_memory()).run(&ctx);
    let split = result(&report, "dolt-server-reachable");
    assert_eq!(split.status, CheckStatus::Error);
    assert!(split.message.starts_with("SPLIT-BRAIN RISK: 1 rig(s)"), "{}", split.message);
    assert!(split
        .details
        .contains(&"Rigs expecting server: gastown".to_string()));
    assert!(report.has_errors());

    let migration = result(&report, "beads-migration");
    assert_eq!(migration.status, CheckStatus::Warning);
    assert_eq!(
        migration.details,
        vec![
            "gastown: partially migrated (metadata declares dolt but .dolt-data/gastown is missing)"
                .to_string()
        ]
    );

    let providers = Providers {
        dialer: Arc::new(StaticDialer::accepting(&["127.0.0.1:3307"])),
        ..Providers::in_memory()
    };
    let report = doctor(&providers).run(&ctx);
    assert_eq!(
        result(&report, "dolt-server-reachable").status,
        CheckStatus::Ok
    );
}

#[test]
fn fix_run_cleans_town_but_spares_crew() {
    let dir = tempfile::tempdir().unwrap();
    let town = dir.path();
    register(town, &["gastown"]);
    fs::create_dir_all(town.join("gastown/crew/joe")).unwrap();
    fs::create_dir_all(town.join("gastown/polecats/nux")).unwrap();
    write(
        &town.join("gastown/.runtime/namepool-state.json"),
        r#"{"rig_name":"gastown","in_use":{"nux":true,"ghost":true}}"#,
    );

    let tmux = Arc::new(InMemoryTmux::with_sessions([
        "hq-mayor",
        "hq-boot",
        "gt-ghost-witness",
        "gt-ghost-crew-max",
        "gt-gastown-polecat-nux",
        "gt-gastown-crew_joe",
        "main",
    ]));
    let providers = Providers {
        tmux: tmux.clone(),
        ..Providers::in_memory()
    };

    let report = doctor(&providers).fix(&CheckContext::new(town));

    assert_eq!(tmux.killed(), vec!["gt-ghost-witness".to_string()]);
    assert_eq!(
        tmux.renamed(),
        vec![(
            "gt-gastown-polecat-nux".to_string(),
            "gt-gastown-nux".to_string()
        )]
    );
    let sessions = tmux.sessions();
    assert!(sessions.contains(&"hq-boot".to_string()));
    assert!(sessions.contains(&"gt-ghost-crew-max".to_string()));
    assert!(sessions.contains(&"gt-gastown-crew_joe".to_string()));

    // Crew sessions keep both checks from converging.
    assert_eq!(result(&report, "orphan-sessions").status, CheckStatus::Warning);
    assert_eq!(result(&report, "session-names").status, CheckStatus::Warning);

    let namepool = result(&report, "namepool-stale");
    assert!(namepool.fixed);
    let state = fs::read_to_string(town.join("gastown/.runtime/namepool-state.json")).unwrap();
    assert!(!state.contains("ghost"));
    assert!(state.contains("nux"));
    assert_eq!(report.summary.fixed, 1);
}

#[test]
fn rig_scope_reaches_rig_only_checks() {
    let dir = tempfile::tempdir().unwrap();
    let town = dir.path();
    register(town, &["gastown"]);
    fs::create_dir_all(town.join("gastown/mayor/rig")).unwrap();

    let report = doctor(&Providers::in_memory()).run(&CheckContext::new(town).with_rig("gastown"));
    let repo = result(&report, "rig-is-git-repo");
    assert_eq!(repo.status, CheckStatus::Error);
    assert_eq!(repo.message, "No mayor/rig clone found");
    assert_eq!(
        result(&report, "git-exclude-configured").status,
        CheckStatus::Warning
    );
}

#[test]
fn town_checkout_without_branch_guard_fails_until_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let town = dir.path();
    register(town, &[]);
    fs::create_dir_all(town.join(".git/hooks")).unwrap();
    let ctx = CheckContext::new(town);

    let report = doctor(&Providers::in_memory()).run(&ctx);
    assert_eq!(result(&report, "pre-checkout-hook").status, CheckStatus::Error);
    assert!(report.has_errors());

    let report = doctor(&Providers::in_memory()).fix(&ctx);
    let hook = result(&report, "pre-checkout-hook");
    assert!(hook.fixed, "{}", hook.message);
    assert!(report.is_healthy());
    assert!(town.join(".git/hooks/pre-checkout").is_file());
}
