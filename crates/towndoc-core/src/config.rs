use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, Result};

pub const DEFAULT_DOLT_PORT: u16 = 3307;
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

pub const ENV_TOWN_ROOT: &str = "TOWNDOC_TOWN_ROOT";
pub const ENV_LOG: &str = "TOWNDOC_LOG";
pub const ENV_DOLT_HOST: &str = "GT_DOLT_HOST";
pub const ENV_SLING_OJ: &str = "GT_SLING_OJ";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["console", "json"];

#[derive(Debug, Clone)]
pub struct Config {
    pub town_root: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub doctor: DoctorConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct DoctorConfig {
    /// Checks at or above this duration are flagged slow. Zero disables.
    pub slow_threshold_ms: u64,
    pub dial_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub dolt_port: u16,
    /// Remote database host; when set it wins over per-rig metadata.
    pub dolt_host: Option<String>,
    /// Job-dispatch integration switch (`GT_SLING_OJ=1`).
    pub oj_dispatch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            town_root: None,
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: "console".to_string(),
            },
            doctor: DoctorConfig::default(),
        }
    }
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 0,
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            dolt_port: DEFAULT_DOLT_PORT,
            dolt_host: None,
            oj_dispatch: false,
        }
    }
}

impl DoctorConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        (self.slow_threshold_ms > 0).then(|| Duration::from_millis(self.slow_threshold_ms))
    }
}

impl Config {
    pub fn dial_timeout(&self) -> Duration {
        self.doctor.dial_timeout()
    }

    pub fn command_timeout(&self) -> Duration {
        self.doctor.command_timeout()
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        self.doctor.slow_threshold()
    }

    pub fn validate(&self) -> Result<()> {
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(CoreError::Config(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        let format = self.logging.format.to_ascii_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(CoreError::Config(format!(
                "logging.format must be one of {}",
                LOG_FORMATS.join(", ")
            )));
        }
        if self.doctor.dial_timeout_ms == 0 {
            return Err(CoreError::Config(
                "doctor.dial_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.doctor.command_timeout_ms == 0 {
            return Err(CoreError::Config(
                "doctor.command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.doctor.dolt_port == 0 {
            return Err(CoreError::Config(
                "doctor.dolt_port must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(default)]
    town_root: String,
    #[serde(default)]
    logging: PartialLoggingConfig,
    #[serde(default)]
    doctor: PartialDoctorConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLoggingConfig {
    #[serde(default)]
    level: String,
    #[serde(default)]
    format: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartialDoctorConfig {
    #[serde(default)]
    slow_threshold_ms: Option<u64>,
    #[serde(default)]
    dial_timeout_ms: Option<u64>,
    #[serde(default)]
    command_timeout_ms: Option<u64>,
    #[serde(default)]
    dolt_port: Option<u16>,
    #[serde(default)]
    dolt_host: String,
}

/// Load config with precedence defaults < config file < environment.
///
/// An explicitly named file must be readable; the default location is optional.
pub fn load_config(config_file: Option<&str>) -> Result<(Config, Option<PathBuf>)> {
    load_config_with_env(config_file, |key| std::env::var(key).ok())
}

pub fn load_config_with_env<F>(
    config_file: Option<&str>,
    lookup: F,
) -> Result<(Config, Option<PathBuf>)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = Config::default();

    let explicit = config_file
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let (path_to_try, required) = match explicit {
        Some(path) => (Some(path), true),
        None => (default_config_path(&lookup), false),
    };

    let mut used = None;
    if let Some(path) = path_to_try {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let parsed: PartialConfig = if text.trim().is_empty() {
                    PartialConfig::default()
                } else {
                    serde_yaml::from_str(&text)?
                };
                apply_partial(&mut cfg, parsed, &lookup)?;
                used = Some(path);
            }
            Err(err) => {
                if required {
                    return Err(CoreError::io("read config", path, err));
                }
            }
        }
    }

    apply_env(&mut cfg, &lookup);
    Ok((cfg, used))
}

fn default_config_path<F>(lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(xdg) = lookup("XDG_CONFIG_HOME").filter(|v| !v.trim().is_empty()) {
        return Some(PathBuf::from(xdg).join("towndoc").join("config.yaml"));
    }
    lookup("HOME")
        .filter(|v| !v.trim().is_empty())
        .map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("towndoc")
                .join("config.yaml")
        })
}

fn apply_partial<F>(cfg: &mut Config, partial: PartialConfig, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if !partial.town_root.trim().is_empty() {
        cfg.town_root = Some(expand_tilde(partial.town_root.trim(), lookup)?);
    }
    if !partial.logging.level.trim().is_empty() {
        cfg.logging.level = partial.logging.level.trim().to_string();
    }
    if !partial.logging.format.trim().is_empty() {
        cfg.logging.format = partial.logging.format.trim().to_string();
    }
    if let Some(ms) = partial.doctor.slow_threshold_ms {
        cfg.doctor.slow_threshold_ms = ms;
    }
    if let Some(ms) = partial.doctor.dial_timeout_ms {
        cfg.doctor.dial_timeout_ms = ms;
    }
    if let Some(ms) = partial.doctor.command_timeout_ms {
        cfg.doctor.command_timeout_ms = ms;
    }
    if let Some(port) = partial.doctor.dolt_port {
        cfg.doctor.dolt_port = port;
    }
    if !partial.doctor.dolt_host.trim().is_empty() {
        cfg.doctor.dolt_host = Some(partial.doctor.dolt_host.trim().to_string());
    }
    Ok(())
}

fn apply_env<F>(cfg: &mut Config, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = lookup(ENV_TOWN_ROOT).filter(|v| !v.trim().is_empty()) {
        cfg.town_root = Some(PathBuf::from(root.trim()));
    }
    if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
        cfg.logging.level = level.trim().to_string();
    }
    if let Some(host) = lookup(ENV_DOLT_HOST).filter(|v| !v.trim().is_empty()) {
        cfg.doctor.dolt_host = Some(host.trim().to_string());
    }
    if let Some(flag) = lookup(ENV_SLING_OJ) {
        cfg.doctor.oj_dispatch = flag.trim() == "1";
    }
}

fn expand_tilde<F>(input: &str, lookup: &F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let home = || {
        lookup("HOME")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CoreError::Config("failed to resolve HOME".to_string()))
    };
    if input == "~" {
        return Ok(PathBuf::from(home()?));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        return Ok(PathBuf::from(home()?).join(rest));
    }
    Ok(Path::new(input).to_path_buf())
}
