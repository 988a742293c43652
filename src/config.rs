use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "PHRACK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://www.phrack.org/archives/tgz".to_string()
}

fn default_user_agent() -> String {
    format!("phrack-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub heartbeat: Duration,
    #[serde(default = "default_filler")]
    pub filler: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            filler: default_filler(),
        }
    }
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(1)
}

fn default_filler() -> String {
    ".".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("phrack-tui").join("phrack-tui.log"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = apply_env(cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.source.base_url.trim().is_empty() {
        base.source.base_url = other.source.base_url;
    }
    if !other.source.user_agent.trim().is_empty() {
        base.source.user_agent = other.source.user_agent;
    }
    if !other.source.timeout.is_zero() {
        base.source.timeout = other.source.timeout;
    }

    if !other.ui.heartbeat.is_zero() {
        base.ui.heartbeat = other.ui.heartbeat;
    }
    if !other.ui.filler.is_empty() {
        base.ui.filler = other.ui.filler;
    }

    if !other.log.level.trim().is_empty() {
        base.log.level = other.log.level;
    }
    base.log.file = other.log.file;

    base
}

fn apply_env(mut cfg: Config, prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "source.base_url" => {
            if !value.trim().is_empty() {
                cfg.source.base_url = value;
            }
        }
        "source.user_agent" => {
            if !value.trim().is_empty() {
                cfg.source.user_agent = value;
            }
        }
        "source.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.source.timeout = duration;
            }
        }
        "ui.heartbeat" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                if !duration.is_zero() {
                    cfg.ui.heartbeat = duration;
                }
            }
        }
        "ui.filler" => {
            if !value.is_empty() {
                cfg.ui.filler = value;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.file" => {
            cfg.log.file = if value.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("phrack-tui").join("config.yaml"))
}
