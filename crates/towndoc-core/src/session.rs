//! Session naming grammar.
//!
//! Town-level sessions use reserved names (`hq-mayor`, `hq-deacon`,
//! `hq-boot`). Rig
//! sessions are `gt-<rig>-<rest>` where `<rest>` is `witness`, `refinery`,
//! `crew-<name>`, or a task-worker name.
//!
//! The grammar splits on the first dash after the rig prefix, so a rig name
//! containing `-` cannot be told apart from a worker name that starts with
//! the remainder. Identities therefore reject dashed rig names, which keeps
//! `parse(canonical(id)) == id` for every identity that can be built.

use std::fmt;

use crate::error::{CoreError, Result};

pub const TOWN_PREFIX: &str = "hq-";
pub const RIG_PREFIX: &str = "gt-";
pub const MAYOR_SESSION: &str = "hq-mayor";
pub const DEACON_SESSION: &str = "hq-deacon";
/// Short-lived boot watchdog that wakes the deacon.
pub const BOOT_SESSION: &str = "hq-boot";

/// Reserved town-level sessions that never belong to a rig.
pub const TOWN_SESSIONS: [&str; 3] = [MAYOR_SESSION, DEACON_SESSION, BOOT_SESSION];

const CREW_MARKER: &str = "crew-";
const LEGACY_CREW_MARKER: &str = "crew_";
const LEGACY_POLECAT_MARKER: &str = "polecat-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Town coordinator (mayor).
    Coordinator,
    /// Town watcher (deacon).
    Watcher,
    /// Per-rig singleton: witness or refinery.
    RigRole,
    /// Shared collaborator clone (crew).
    Collaborator,
    /// Disposable pool worker (polecat).
    TaskWorker,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    kind: SessionKind,
    rig: Option<String>,
    name: String,
}

impl SessionIdentity {
    pub fn coordinator() -> Self {
        Self {
            kind: SessionKind::Coordinator,
            rig: None,
            name: "mayor".to_string(),
        }
    }

    pub fn watcher() -> Self {
        Self {
            kind: SessionKind::Watcher,
            rig: None,
            name: "deacon".to_string(),
        }
    }

    pub fn rig_role(rig: &str, role: &str) -> Result<Self> {
        validate_rig(rig)?;
        if role != "witness" && role != "refinery" {
            return Err(CoreError::InvalidIdentity(format!(
                "unknown rig role {role:?}"
            )));
        }
        Ok(Self {
            kind: SessionKind::RigRole,
            rig: Some(rig.to_string()),
            name: role.to_string(),
        })
    }

    pub fn collaborator(rig: &str, name: &str) -> Result<Self> {
        validate_rig(rig)?;
        validate_worker(name)?;
        Ok(Self {
            kind: SessionKind::Collaborator,
            rig: Some(rig.to_string()),
            name: name.to_string(),
        })
    }

    pub fn task_worker(rig: &str, name: &str) -> Result<Self> {
        validate_rig(rig)?;
        validate_worker(name)?;
        if name == "witness" || name == "refinery" || name.starts_with(CREW_MARKER) {
            return Err(CoreError::InvalidIdentity(format!(
                "worker name {name:?} collides with a role name"
            )));
        }
        Ok(Self {
            kind: SessionKind::TaskWorker,
            rig: Some(rig.to_string()),
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn rig(&self) -> Option<&str> {
        self.rig.as_deref()
    }

    /// Role for singletons, worker name for pool members.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_collaborator(&self) -> bool {
        self.kind == SessionKind::Collaborator
    }

    pub fn canonical_name(&self) -> String {
        let rig = self.rig.as_deref().unwrap_or_default();
        match self.kind {
            SessionKind::Coordinator => MAYOR_SESSION.to_string(),
            SessionKind::Watcher => DEACON_SESSION.to_string(),
            SessionKind::RigRole | SessionKind::TaskWorker => {
                format!("{RIG_PREFIX}{rig}-{}", self.name)
            }
            SessionKind::Collaborator => format!("{RIG_PREFIX}{rig}-{CREW_MARKER}{}", self.name),
        }
    }

    /// Parse a session name in the current grammar.
    pub fn parse(session: &str) -> Result<Self> {
        match session {
            MAYOR_SESSION => return Ok(Self::coordinator()),
            DEACON_SESSION => return Ok(Self::watcher()),
            _ => {}
        }
        let (rig, rest) = split_rig(session)?;
        match rest {
            "witness" | "refinery" => Self::rig_role(rig, rest),
            _ => match rest.strip_prefix(CREW_MARKER) {
                Some(name) if !name.is_empty() => Self::collaborator(rig, name),
                _ => Self::task_worker(rig, rest),
            },
        }
    }

    /// Parse a session name, also accepting naming schemes from older
    /// releases: `gt-mayor`, `gt-deacon`, `gt-<rig>-polecat-<name>` and
    /// `gt-<rig>-crew_<name>`.
    pub fn parse_lenient(session: &str) -> Result<Self> {
        match session {
            "gt-mayor" => return Ok(Self::coordinator()),
            "gt-deacon" => return Ok(Self::watcher()),
            _ => {}
        }
        if let Ok((rig, rest)) = split_rig(session) {
            if let Some(name) = rest.strip_prefix(LEGACY_POLECAT_MARKER) {
                if !name.is_empty() {
                    return Self::task_worker(rig, name);
                }
            }
            if let Some(name) = rest.strip_prefix(LEGACY_CREW_MARKER) {
                if !name.is_empty() {
                    return Self::collaborator(rig, name);
                }
            }
        }
        Self::parse(session)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

/// True for names owned by this tool (`hq-*` or `gt-*`).
pub fn has_own_prefix(session: &str) -> bool {
    session.starts_with(TOWN_PREFIX) || session.starts_with(RIG_PREFIX)
}

/// True for `gt-<rig>-crew-<name>`.
pub fn is_crew_session(session: &str) -> bool {
    let parts: Vec<&str> = session.splitn(4, '-').collect();
    parts.len() == 4 && parts[0] == "gt" && parts[2] == "crew" && !parts[3].is_empty()
}

fn split_rig(session: &str) -> Result<(&str, &str)> {
    let rest = session
        .strip_prefix(RIG_PREFIX)
        .ok_or_else(|| CoreError::InvalidSessionName(session.to_string()))?;
    match rest.split_once('-') {
        Some((rig, rest)) if !rig.is_empty() && !rest.is_empty() => Ok((rig, rest)),
        _ => Err(CoreError::InvalidSessionName(session.to_string())),
    }
}

fn validate_rig(rig: &str) -> Result<()> {
    if rig.is_empty() {
        return Err(CoreError::InvalidIdentity("rig name is empty".to_string()));
    }
    if rig.contains('-') {
        return Err(CoreError::InvalidIdentity(format!(
            "rig name {rig:?} contains '-'"
        )));
    }
    if rig.chars().any(|c| c.is_whitespace() || c == '.' || c == ':') {
        return Err(CoreError::InvalidIdentity(format!(
            "rig name {rig:?} contains characters tmux rejects"
        )));
    }
    Ok(())
}

fn validate_worker(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidIdentity("worker name is empty".to_string()));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '.' || c == ':') {
        return Err(CoreError::InvalidIdentity(format!(
            "worker name {name:?} contains characters tmux rejects"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_town_sessions() {
        assert_eq!(
            SessionIdentity::parse("hq-mayor").unwrap().kind(),
            SessionKind::Coordinator
        );
        assert_eq!(
            SessionIdentity::parse("hq-deacon").unwrap().kind(),
            SessionKind::Watcher
        );
        assert!(SessionIdentity::parse("hq-other").is_err());
    }

    #[test]
    fn parse_rig_sessions() {
        let witness = SessionIdentity::parse("gt-gastown-witness").unwrap();
        assert_eq!(witness.kind(), SessionKind::RigRole);
        assert_eq!(witness.rig(), Some("gastown"));
        assert_eq!(witness.name(), "witness");

        let crew = SessionIdentity::parse("gt-gastown-crew-my-worker").unwrap();
        assert_eq!(crew.kind(), SessionKind::Collaborator);
        assert_eq!(crew.name(), "my-worker");

        let polecat = SessionIdentity::parse("gt-niflheim-fix-auth-bug").unwrap();
        assert_eq!(polecat.kind(), SessionKind::TaskWorker);
        assert_eq!(polecat.rig(), Some("niflheim"));
        assert_eq!(polecat.name(), "fix-auth-bug");
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["gastown-witness", "gt-", "gt-x", "gt--witness", "other-session"] {
            assert!(SessionIdentity::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn hyphenated_rig_parses_as_first_segment() {
        let id = SessionIdentity::parse("gt-my-rig-witness").unwrap();
        assert_eq!(id.rig(), Some("my"));
        assert_eq!(id.kind(), SessionKind::TaskWorker);
        assert_eq!(id.name(), "rig-witness");
        assert!(SessionIdentity::rig_role("my-rig", "witness").is_err());
    }

    #[test]
    fn round_trip_for_constructible_identities() {
        let ids = vec![
            SessionIdentity::coordinator(),
            SessionIdentity::watcher(),
            SessionIdentity::rig_role("gastown", "witness").unwrap(),
            SessionIdentity::rig_role("beads", "refinery").unwrap(),
            SessionIdentity::collaborator("gastown", "max").unwrap(),
            SessionIdentity::collaborator("gastown", "joe-bob").unwrap(),
            SessionIdentity::collaborator("gastown", "crew").unwrap(),
            SessionIdentity::task_worker("gastown", "morsov").unwrap(),
            SessionIdentity::task_worker("gastown", "Toast").unwrap(),
            SessionIdentity::task_worker("gastown", "fix-auth-bug").unwrap(),
            SessionIdentity::task_worker("gastown", "crew").unwrap(),
        ];
        for id in ids {
            let name = id.canonical_name();
            assert_eq!(SessionIdentity::parse(&name).unwrap(), id, "{name}");
        }
    }

    #[test]
    fn task_worker_rejects_role_names() {
        assert!(SessionIdentity::task_worker("gastown", "witness").is_err());
        assert!(SessionIdentity::task_worker("gastown", "refinery").is_err());
        assert!(SessionIdentity::task_worker("gastown", "crew-max").is_err());
        assert!(SessionIdentity::task_worker("gastown", "").is_err());
        assert!(SessionIdentity::collaborator("gastown", "has space").is_err());
    }

    #[test]
    fn lenient_parse_maps_legacy_names() {
        let cases = [
            ("gt-mayor", "hq-mayor"),
            ("gt-deacon", "hq-deacon"),
            ("gt-gastown-polecat-nux", "gt-gastown-nux"),
            ("gt-gastown-crew_max", "gt-gastown-crew-max"),
            ("gt-gastown-witness", "gt-gastown-witness"),
        ];
        for (legacy, canonical) in cases {
            let id = SessionIdentity::parse_lenient(legacy).unwrap();
            assert_eq!(id.canonical_name(), canonical, "{legacy}");
        }
        assert!(SessionIdentity::parse_lenient("gt-mayor")
            .unwrap()
            .rig()
            .is_none());
        assert!(SessionIdentity::parse_lenient("gt-gastown-crew_max")
            .unwrap()
            .is_collaborator());
    }

    #[test]
    fn crew_session_detection() {
        let cases = [
            ("gt-gastown-crew-joe", true),
            ("gt-rig-crew-a", true),
            ("gt-gastown-witness", false),
            ("gt-gastown-polecat1", false),
            ("hq-mayor", false),
            ("other-session", false),
            ("gt-crew", false),
            ("gt-rig-crew-", false),
        ];
        for (name, want) in cases {
            assert_eq!(is_crew_session(name), want, "{name}");
        }
    }

    #[test]
    fn own_prefix() {
        assert!(has_own_prefix("hq-mayor"));
        assert!(has_own_prefix("gt-x-y"));
        assert!(!has_own_prefix("work"));
    }
}
