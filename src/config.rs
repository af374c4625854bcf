//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/vsync.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7420"
//!
//! [backoff]
//! base_secs = 60
//! multiplier = 2
//! max_secs = 21600
//!
//! [github]
//! api_base = "https://api.github.com"
//! token_env = "GITHUB_TOKEN"
//! timeout_secs = 15
//! ```
//!
//! `[backoff]` and `[github]` are optional; the values above are the
//! defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use vector_sync_core::backoff::{BackoffPolicy, MAX_BACKOFF_SECS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}

/// Failure backoff: the n-th consecutive failure waits
/// `min(base_secs * multiplier^(n-1), max_secs)`.
#[derive(Debug, Deserialize, Clone)]
pub struct BackoffConfig {
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_secs")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            multiplier: default_multiplier(),
            max_secs: default_max_secs(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_secs, self.multiplier, self.max_secs)
    }
}

fn default_base_secs() -> u64 {
    60
}
fn default_multiplier() -> u32 {
    2
}
fn default_max_secs() -> u64 {
    6 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the acting user's token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GithubConfig {
    /// Read the token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    // Validate backoff
    if config.backoff.base_secs == 0 {
        anyhow::bail!("backoff.base_secs must be > 0");
    }
    if config.backoff.multiplier < 1 {
        anyhow::bail!("backoff.multiplier must be >= 1");
    }
    if config.backoff.max_secs < config.backoff.base_secs {
        anyhow::bail!("backoff.max_secs must be >= backoff.base_secs");
    }
    if config.backoff.max_secs > MAX_BACKOFF_SECS {
        anyhow::bail!("backoff.max_secs must be <= {}", MAX_BACKOFF_SECS);
    }

    // Validate github
    if config.github.timeout_secs == 0 {
        anyhow::bail!("github.timeout_secs must be > 0");
    }
    if !config.github.api_base.starts_with("http://")
        && !config.github.api_base.starts_with("https://")
    {
        anyhow::bail!(
            "github.api_base must be an http(s) URL, got '{}'",
            config.github.api_base
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/vsync.sqlite\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7420");
        assert_eq!(cfg.backoff.base_secs, 60);
        assert_eq!(cfg.backoff.multiplier, 2);
        assert_eq!(cfg.backoff.max_secs, 21600);
        assert_eq!(cfg.github.token_env, "GITHUB_TOKEN");
        assert_eq!(cfg.backoff.policy(), BackoffPolicy::default());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let err = parse(
            "[db]\npath = \"x\"\n[backoff]\nbase_secs = 600\nmax_secs = 60\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("backoff.max_secs"));
    }

    #[test]
    fn rejects_oversized_backoff() {
        let err = parse(
            "[db]\npath = \"x\"\n[backoff]\nbase_secs = 10000000000000\nmax_secs = 10000000000000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("backoff.max_secs must be <="));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = parse("[db]\npath = \"x\"\n[github]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("github.timeout_secs"));
    }
}
