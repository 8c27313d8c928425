//! Shared building blocks for inspecting a town: configuration, logging,
//! on-disk layout, persisted state files, and session naming.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod layout;
pub mod logging;
pub mod session;
pub mod state;

pub use error::CoreError;
pub use layout::TownLayout;
pub use session::{SessionIdentity, SessionKind};
