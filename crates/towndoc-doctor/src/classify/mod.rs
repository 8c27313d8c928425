//! Pure reductions from raw evidence to small states.

pub mod ancestry;
pub mod hooks;
pub mod migration;
pub mod session;

pub use ancestry::{classify_ancestry, Supervision, MAX_ANCESTRY_DEPTH};
pub use hooks::{classify_post_merge_hook, HookState};
pub use migration::{classify_migration, Classification, MigrationEvidence, MigrationState};
pub use session::{classify_session, SessionClass};
