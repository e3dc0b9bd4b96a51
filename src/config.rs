use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use siphon_plugin::LogLevel;

pub const APP_NAME: &str = "siphon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_FILE: &str = "siphon.yaml";
pub const ENV_PREFIX: &str = "SIPHON_";

/// Resolve the siphon root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("SIPHON_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./siphon")
    }
}

/// Process-wide settings. Every key can be overridden by a `SIPHON_<KEY>`
/// environment variable, which in turn may come from `<root>/config/.env`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Upper bound on runtime worker threads.
    pub proc_num: usize,
    pub log_level: LogLevel,
    /// When set, text and JSON event logs are also written here, rotated daily.
    pub log_dir: Option<PathBuf>,
    /// Address the metrics exporter listens on.
    pub exporter_listen: String,
    /// Directory holding one `.yaml` file per flow. Defaults to `<root>/flows`.
    pub flow_dir: Option<PathBuf>,
    /// Scheduler polling cadence.
    pub loop_sleep_ms: u64,
    /// Default for the `include` parameter of every stage.
    pub plugin_include: bool,
    /// Named pattern groups that `regexp` parameters may refer to.
    pub regexp: BTreeMap<String, Vec<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proc_num: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            log_level: LogLevel::Info,
            log_dir: None,
            exporter_listen: "127.0.0.1:8080".to_string(),
            flow_dir: None,
            loop_sleep_ms: 100,
            plugin_include: true,
            regexp: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load `<root>/config/.env`, then `<root>/config/siphon.yaml` (if any),
    /// then apply `SIPHON_*` overrides.
    pub fn load(root: &Path) -> Result<Self> {
        let config_dir = root.join("config");

        let env_file = config_dir.join(".env");
        if env_file.exists() {
            dotenvy::from_path(&env_file)
                .with_context(|| format!("could not load {}", env_file.display()))?;
        }

        let file = config_dir.join(CONFIG_FILE);
        let mut config = if file.exists() {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;
            Self::from_yaml(&text).with_context(|| format!("could not parse {}", file.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        if config.flow_dir.is_none() {
            config.flow_dir = Some(root.join("flows"));
        }
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_bw::from_str(text)?)
    }

    /// Apply `SIPHON_<KEY>` overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{}", key.to_uppercase()));

        if let Some(v) = var("proc_num") {
            self.proc_num = parse_env("proc_num", &v)?;
        }
        if let Some(v) = var("log_level") {
            self.log_level = parse_env("log_level", &v)?;
        }
        if let Some(v) = var("log_dir") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("exporter_listen") {
            self.exporter_listen = v;
        }
        if let Some(v) = var("flow_dir") {
            self.flow_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("loop_sleep_ms") {
            self.loop_sleep_ms = parse_env("loop_sleep_ms", &v)?;
        }
        if let Some(v) = var("plugin_include") {
            self.plugin_include = parse_env("plugin_include", &v)?;
        }
        Ok(())
    }

    pub fn flow_dir(&self) -> PathBuf {
        self.flow_dir
            .clone()
            .unwrap_or_else(|| resolve_root_dir().join("flows"))
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms.max(1))
    }

    pub fn regexp_group(&self, name: &str) -> Option<&[String]> {
        self.regexp.get(name).map(Vec::as_slice)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    match value.trim().parse::<T>() {
        Ok(v) => Ok(v),
        Err(_) => bail!("invalid value `{value}` for {ENV_PREFIX}{}", key.to_uppercase()),
    }
}

/// Parse a duration given as whole seconds (`90`) or with a unit suffix
/// (`30s`, `5m`, `2h`, `1d`).
pub fn parse_duration_secs(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(secs);
    }
    let unit = text.chars().last()?;
    let value: u64 = text[..text.len() - unit.len_utf8()].trim().parse().ok()?;
    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return None,
    };
    value.checked_mul(scale)
}
