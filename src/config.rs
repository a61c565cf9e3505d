use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_REGION;
use crate::pricing::is_region_code;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Environment variable holding the chat platform (Discord bot) token.
pub const BOT_TOKEN_VAR: &str = "BOT_TOKEN";

/// Environment variable holding the gg.deals API key.
pub const PRICING_API_KEY_VAR: &str = "GGDEALS_API_KEY";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// The two required secrets. Environment variables take precedence over the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub pricing_api_key: String,
}

/// How price alerts leave the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    /// Post to the entry's channel through the Discord REST API.
    #[default]
    Discord,
    /// Print alerts as JSON lines on stdout.
    Stdout,
}

/// Runtime settings. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// SQLite file holding the watchlist.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a price lookup is served from memory.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Delay between polling cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Region used by commands when none is given.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// The single region the polling monitor checks for every entry.
    #[serde(default = "default_region")]
    pub poll_region: String,

    #[serde(default)]
    pub notifier: NotifierKind,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("game_watchlist.db")
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    30 * 60
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_ttl_secs: default_cache_ttl(),
            poll_interval_secs: default_poll_interval(),
            default_region: default_region(),
            poll_region: default_region(),
            notifier: NotifierKind::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Parse config from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve the runtime config: the TOML file if present (defaults otherwise),
    /// then credential overrides from the environment, then validation.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay credentials from an environment lookup. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(BOT_TOKEN_VAR).filter(|v| !v.trim().is_empty()) {
            self.credentials.bot_token = token.trim().to_string();
        }
        if let Some(key) = lookup(PRICING_API_KEY_VAR).filter(|v| !v.trim().is_empty()) {
            self.credentials.pricing_api_key = key.trim().to_string();
        }
    }

    /// Both secrets are required.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.bot_token.trim().is_empty() {
            bail!("{BOT_TOKEN_VAR} not set (environment, .env or [credentials].bot_token)");
        }
        if self.credentials.pricing_api_key.trim().is_empty() {
            bail!(
                "{PRICING_API_KEY_VAR} not set (environment, .env or [credentials].pricing_api_key)"
            );
        }
        if self.settings.cache_ttl_secs == 0 {
            bail!("settings.cache_ttl_secs must be positive");
        }
        if self.settings.poll_interval_secs == 0 {
            bail!("settings.poll_interval_secs must be positive");
        }
        for (key, region) in [
            ("default_region", &self.settings.default_region),
            ("poll_region", &self.settings.poll_region),
        ] {
            if !is_region_code(region.trim()) {
                bail!("settings.{key} `{region}` is not a two or three letter region code");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_gets_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.settings.cache_ttl_secs, 300);
        assert_eq!(config.settings.poll_interval_secs, 1800);
        assert_eq!(config.settings.poll_region, "us");
        assert_eq!(config.settings.notifier, NotifierKind::Discord);
        assert_eq!(config.settings.database_path, PathBuf::from("game_watchlist.db"));
    }

    #[test]
    fn file_overrides() {
        let config = AppConfig::parse(
            r#"
            [credentials]
            bot_token = "bot"
            pricing_api_key = "key"

            [settings]
            cache_ttl_secs = 60
            poll_interval_secs = 120
            database_path = "/var/lib/watch.db"
            notifier = "stdout"
            "#,
        )
        .unwrap();
        assert_eq!(config.credentials.bot_token, "bot");
        assert_eq!(config.settings.cache_ttl_secs, 60);
        assert_eq!(config.settings.poll_interval_secs, 120);
        assert_eq!(config.settings.notifier, NotifierKind::Stdout);
        assert_eq!(config.settings.default_region, "us");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_wins_over_file() {
        let mut config = AppConfig::parse(
            r#"
            [credentials]
            bot_token = "file-bot"
            pricing_api_key = "file-key"
            "#,
        )
        .unwrap();
        config.apply_env(env(&[(PRICING_API_KEY_VAR, "env-key"), (BOT_TOKEN_VAR, "  ")]));
        assert_eq!(config.credentials.pricing_api_key, "env-key");
        assert_eq!(config.credentials.bot_token, "file-bot");
    }

    #[test]
    fn missing_secret_fails_validation() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[(BOT_TOKEN_VAR, "bot")]));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(PRICING_API_KEY_VAR));

        let mut config = AppConfig::default();
        config.apply_env(env(&[(PRICING_API_KEY_VAR, "key")]));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(BOT_TOKEN_VAR));
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[(BOT_TOKEN_VAR, "bot"), (PRICING_API_KEY_VAR, "key")]));
        config.settings.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_region_rejected() {
        let mut config = AppConfig::parse(
            r#"
            [credentials]
            bot_token = "bot"
            pricing_api_key = "key"

            [settings]
            default_region = "EU"
            poll_region = "europe"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_region"));

        config.settings.poll_region = "gb".into();
        assert!(config.validate().is_ok());

        config.settings.default_region = "".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_region"));
    }
}
