use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "PATREON_TUI";

/// Politeness floor: requests are never spaced closer than this, even if the
/// config asks for less.
pub const MIN_REQUEST_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_REQUEST_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub patreon: PatreonConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatreonConfig {
    /// Opaque session cookie header value. Optional; without it patron-only
    /// content is simply not visible.
    #[serde(default)]
    pub cookies: String,
    #[serde(default)]
    pub campaigns: Vec<CampaignSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractConfig {
    /// Only extract from posts published after this date (YYYY-MM-DD).
    #[serde(default)]
    pub published_after: String,
    #[serde(default = "default_delay_min", with = "humantime_serde")]
    pub request_delay_min: Duration,
    #[serde(default = "default_delay_max", with = "humantime_serde")]
    pub request_delay_max: Duration,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            published_after: String::new(),
            request_delay_min: default_delay_min(),
            request_delay_max: default_delay_max(),
        }
    }
}

fn default_delay_min() -> Duration {
    MIN_REQUEST_DELAY
}

fn default_delay_max() -> Duration {
    DEFAULT_MAX_REQUEST_DELAY
}

impl ExtractConfig {
    /// Minimum inter-request delay, floored to one second.
    pub fn delay_min(&self) -> Duration {
        self.request_delay_min.max(MIN_REQUEST_DELAY)
    }

    /// Maximum inter-request delay, never below the effective minimum.
    pub fn delay_max(&self) -> Duration {
        let max = if self.request_delay_max.is_zero() {
            DEFAULT_MAX_REQUEST_DELAY
        } else {
            self.request_delay_max
        };
        max.max(self.delay_min())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
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
    cfg = merge_config(cfg, load_env(prefix)?);

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
    if !other.patreon.cookies.is_empty() {
        base.patreon.cookies = other.patreon.cookies;
    }
    if !other.patreon.campaigns.is_empty() {
        base.patreon.campaigns = other.patreon.campaigns;
    }

    if !other.extract.published_after.is_empty() {
        base.extract.published_after = other.extract.published_after;
    }
    if other.extract.request_delay_min != default_delay_min() {
        base.extract.request_delay_min = other.extract.request_delay_min;
    }
    if other.extract.request_delay_max != default_delay_max() {
        base.extract.request_delay_max = other.extract.request_delay_max;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "patreon.cookies" => cfg.patreon.cookies = value,
        "extract.published_after" => cfg.extract.published_after = value,
        "extract.request_delay_min" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.extract.request_delay_min = duration;
            }
        }
        "extract.request_delay_max" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.extract.request_delay_max = duration;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("patreon-tui").join("config.yaml"))
}
