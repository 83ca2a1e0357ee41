//! Configuration file loading and merging

use super::schema::Config;
use crate::error::{Result, WafError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        // Priority order:
        // 1. $WAF_ENGINE_CONFIG
        // 2. $XDG_CONFIG_HOME/waf-engine/config.toml
        // 3. ~/.config/waf-engine/config.toml

        if let Ok(path) = env::var("WAF_ENGINE_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("waf-engine/config.toml");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".config/waf-engine/config.toml");
        }

        PathBuf::from("config.toml")
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| WafError::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load the seed rules and access entries embedded in the binary
    pub fn load_builtin() -> Result<Config> {
        const BUILTIN_TOML: &str = include_str!("../builtin-rules.toml");
        let config: Config = toml::from_str(BUILTIN_TOML)?;
        Ok(config)
    }

    /// Merge user config on top of built-in config.
    ///
    /// Rules sharing an id with a built-in rule replace it in place, other
    /// user rules are appended in their given order. Access entries are
    /// appended. Scalar sections come from the user config.
    pub fn merge_configs(builtin: Config, user: Config) -> Config {
        let mut merged = builtin;

        for rule in user.rules {
            match merged.rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => merged.rules.push(rule),
            }
        }

        // Explicit ids in the user file may collide with seeded ones
        for mut entry in user.access {
            if entry
                .id
                .is_some_and(|id| merged.access.iter().any(|a| a.id == Some(id)))
            {
                entry.id = None;
            }
            merged.access.push(entry);
        }

        merged.common = user.common;
        merged.engine = user.engine;
        merged.telemetry = user.telemetry;
        merged.matching = user.matching;

        merged
    }

    /// Load config with built-in as lowest-priority fallback
    /// Priority: User config > Built-in config
    pub fn load_with_builtins() -> Result<Config> {
        let builtin = Self::load_builtin()?;
        let path = Self::default_config_path();

        if path.exists() {
            let user = Self::load_from_file(&path)?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            tracing::debug!("User config not found at {:?}, using built-in defaults", path);
            Ok(builtin)
        }
    }

    /// Load config from optional path or default with built-in merge
    /// Priority: Explicit path > User config > Built-in config
    pub fn load_or_builtin(path: Option<PathBuf>) -> Result<Config> {
        if let Some(p) = path {
            let user = Self::load_from_file(&p)?;
            let builtin = Self::load_builtin()?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            Self::load_with_builtins()
        }
    }
}
