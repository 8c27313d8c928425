use std::collections::BTreeSet;

use towndoc_core::session::{has_own_prefix, TOWN_SESSIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClass {
    /// Not named by this tool; never evaluated.
    Foreign,
    Valid,
    Orphan,
}

/// Decide whether a session still belongs to a live rig.
///
/// Rig sessions are `gt-<rig>-<rest>`, split into at most three parts, so a
/// rig name containing `-` is read as its first segment only.
pub fn classify_session(name: &str, valid_rigs: &BTreeSet<String>) -> SessionClass {
    if !has_own_prefix(name) {
        return SessionClass::Foreign;
    }
    if TOWN_SESSIONS.contains(&name) {
        return SessionClass::Valid;
    }
    let parts: Vec<&str> = name.splitn(3, '-').collect();
    if parts.len() < 3 || parts[0] != "gt" {
        return SessionClass::Orphan;
    }
    if valid_rigs.contains(parts[1]) {
        SessionClass::Valid
    } else {
        SessionClass::Orphan
    }
}
