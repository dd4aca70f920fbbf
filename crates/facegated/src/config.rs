use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "FACEGATE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Layered as defaults, then an optional TOML file, then `FACEGATE_*`
/// environment variables. Command-line flags are applied by `main`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address.
    pub bind: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity a match must strictly exceed.
    pub similarity_threshold: f32,
    /// Base URL of the authorization service.
    pub authority_url: String,
    /// When false, matches are never verified and no roster is fetched.
    pub verification_enabled: bool,
    pub verify_timeout_secs: u64,
    pub roster_timeout_secs: u64,
    /// Image enrolled as `enrolled_user` when the roster yields nothing.
    pub reference_image: Option<PathBuf>,
    pub monitor_enabled: bool,
    pub monitor_interval_ms: u64,
    /// Largest accepted request body, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            model_dir: facegate_core::default_model_dir(),
            similarity_threshold: facegate_core::DEFAULT_SIMILARITY_THRESHOLD,
            authority_url: "http://localhost:3000".to_string(),
            verification_enabled: true,
            verify_timeout_secs: 5,
            roster_timeout_secs: 10,
            reference_image: None,
            monitor_enabled: true,
            monitor_interval_ms: 100,
            max_frame_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Defaults, overlaid with `file` (if any) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `FACEGATE_*` variables as resolved by `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = env("BIND") {
            self.bind = v;
        }
        if let Some(v) = env("MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("AUTHORITY_URL") {
            self.authority_url = v;
        }
        if let Some(v) = env("REFERENCE_IMAGE") {
            self.reference_image = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        env_parsed(&env, "SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        env_parsed(&env, "VERIFY_TIMEOUT_SECS", &mut self.verify_timeout_secs);
        env_parsed(&env, "ROSTER_TIMEOUT_SECS", &mut self.roster_timeout_secs);
        env_parsed(&env, "MONITOR_INTERVAL_MS", &mut self.monitor_interval_ms);
        env_parsed(&env, "MAX_FRAME_BYTES", &mut self.max_frame_bytes);
        env_flag(&env, "VERIFICATION_ENABLED", &mut self.verification_enabled);
        env_flag(&env, "MONITOR_ENABLED", &mut self.monitor_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold {} outside [-1, 1]",
                self.similarity_threshold
            )));
        }
        if self.verify_timeout_secs == 0 {
            return Err(ConfigError::Invalid("verify_timeout_secs must be positive".into()));
        }
        if self.roster_timeout_secs == 0 {
            return Err(ConfigError::Invalid("roster_timeout_secs must be positive".into()));
        }
        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid("monitor_interval_ms must be positive".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn roster_timeout(&self) -> Duration {
        Duration::from_secs(self.roster_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn env_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    let Some(raw) = env(name) else { return };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(var = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparseable value"),
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut bool) {
    let Some(raw) = env(name) else { return };
    match parse_flag(&raw) {
        Some(v) => *slot = v,
        None => tracing::warn!(var = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparseable flag"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
