use std::collections::HashSet;

/// Upper bound on parent hops before giving up.
pub const MAX_ANCESTRY_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    Supervised,
    Orphaned,
}

/// Walk `pid` and its ancestors looking for a supervisor.
///
/// The process itself counts, so a pane leader is supervised. Reaching the
/// root (pid 1 or 0), a failed lookup, a repeated pid or the depth bound all
/// classify as orphaned.
pub fn classify_ancestry<F>(pid: i32, supervisors: &HashSet<i32>, mut parent_of: F) -> Supervision
where
    F: FnMut(i32) -> Result<i32, String>,
{
    let mut visited = HashSet::new();
    let mut current = pid;
    for _ in 0..MAX_ANCESTRY_DEPTH {
        if supervisors.contains(&current) {
            return Supervision::Supervised;
        }
        if current <= 1 || !visited.insert(current) {
            return Supervision::Orphaned;
        }
        current = match parent_of(current) {
            Ok(ppid) => ppid,
            Err(_) => return Supervision::Orphaned,
        };
    }
    Supervision::Orphaned
}
