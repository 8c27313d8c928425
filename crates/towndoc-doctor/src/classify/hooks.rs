use std::sync::OnceLock;

use regex::Regex;

const SHIM_MARKER: &str = "bd-shim";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// No hook, or one unrelated to beads.
    Absent,
    /// Thin shim that delegates to `bd hooks run`, or inline logic that
    /// already skips the JSONL sync for dolt.
    Current,
    /// Inline JSONL-sync hook from before the dolt backend existed.
    Stale,
}

fn bd_word() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bbd\b").ok()).as_ref()
}

/// Classify the contents of a `post-merge` hook for a dolt-backed database.
pub fn classify_post_merge_hook(content: &str) -> HookState {
    let mentions_bd = bd_word().is_some_and(|re| re.is_match(content));
    if content.trim().is_empty() || !mentions_bd {
        return HookState::Absent;
    }
    if content.contains(SHIM_MARKER) || content.contains("dolt") {
        return HookState::Current;
    }
    HookState::Stale
}
