//! Persisted state files owned by the orchestration layer.
//!
//! These are read as evidence and, for a few of them, rewritten whole during
//! repair. Unknown fields survive a rewrite.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::fsutil::{read_json, write_json_atomic};

pub const BACKEND_DOLT: &str = "dolt";
pub const DOLT_MODE_SERVER: &str = "server";
pub const DEFAULT_JSONL_EXPORT: &str = "issues.jsonl";
pub const DEFAULT_NAMEPOOL_THEME: &str = "mad-max";
pub const DEFAULT_NAMEPOOL_SIZE: u32 = 50;

/// `mayor/rigs.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RigsRegistry {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub rigs: BTreeMap<String, Value>,
}

/// `.beads/metadata.json`, kept as a raw map so a rewrite preserves keys this
/// crate does not know about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeadsMetadata {
    fields: Map<String, Value>,
}

impl BeadsMetadata {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Load `<beads_dir>/metadata.json`; `Ok(None)` when absent.
    pub fn load(beads_dir: &Path) -> Result<Option<Self>> {
        let path = beads_dir.join("metadata.json");
        let value: Option<Value> = read_json(&path)?;
        match value {
            None => Ok(None),
            Some(Value::Object(fields)) => Ok(Some(Self { fields })),
            Some(_) => Err(CoreError::Config(format!(
                "{}: expected a JSON object",
                path.display()
            ))),
        }
    }

    pub fn save(&self, beads_dir: &Path) -> Result<()> {
        write_json_atomic(&beads_dir.join("metadata.json"), &self.fields, 0o600)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn backend(&self) -> Option<&str> {
        self.str_field("backend")
    }

    pub fn dolt_mode(&self) -> Option<&str> {
        self.str_field("dolt_mode")
    }

    pub fn dolt_database(&self) -> Option<&str> {
        self.str_field("dolt_database")
    }

    pub fn jsonl_export(&self) -> Option<&str> {
        self.str_field("jsonl_export")
    }

    pub fn server_host(&self) -> Option<&str> {
        self.str_field("dolt_server_host")
    }

    /// Port as a number or numeric string.
    pub fn server_port(&self) -> Option<u16> {
        match self.fields.get("dolt_server_port")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_dolt(&self) -> bool {
        self.backend() == Some(BACKEND_DOLT)
    }

    pub fn is_server_mode(&self) -> bool {
        self.dolt_mode() == Some(DOLT_MODE_SERVER)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.fields
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// `<rig>/.runtime/namepool-state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamepoolState {
    #[serde(default)]
    pub rig_name: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub in_use: BTreeMap<String, bool>,
    #[serde(default)]
    pub overflow_next: u32,
    #[serde(default = "default_pool_size")]
    pub max_size: u32,
    /// `custom_names`, `reserved` and anything newer, written back as read.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_theme() -> String {
    DEFAULT_NAMEPOOL_THEME.to_string()
}

fn default_pool_size() -> u32 {
    DEFAULT_NAMEPOOL_SIZE
}

impl NamepoolState {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self, 0o644)
    }

    /// Names currently marked as reserved.
    pub fn reserved(&self) -> impl Iterator<Item = &str> {
        self.in_use
            .iter()
            .filter(|(_, used)| **used)
            .map(|(name, _)| name.as_str())
    }
}

/// `<worker>/.runtime/agent.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentLock {
    pub pid: i32,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
}

impl AgentLock {
    pub const FILE_NAME: &'static str = "agent.lock";

    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }
}
