use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Contents of `config.json`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SmartDefault)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnitrayConfig {
    /// Accumulated smooth scroll delta after which a scroll is forwarded to an item.
    #[default = 1.0]
    pub scroll_threshold: f64,

    /// Start our own StatusNotifierWatcher process if none is running.
    #[default = true]
    pub spawn_watcher: bool,

    /// Levels of a menu to fetch when it is opened, -1 for all of them.
    #[default(-1)]
    pub menu_depth: i32,
}

impl SnitrayConfig {
    pub fn host_config(&self) -> sni_host::HostConfig {
        sni_host::HostConfig { scroll_threshold: self.scroll_threshold, menu_depth: self.menu_depth }
    }

    fn validate(self) -> Result<Self> {
        if !(self.scroll_threshold > 0.0) {
            bail!("scroll-threshold must be positive, but got {}", self.scroll_threshold);
        }
        if self.menu_depth < -1 {
            bail!("menu-depth must be -1 or more, but got {}", self.menu_depth);
        }
        Ok(self)
    }
}

pub fn parse(content: &str) -> Result<SnitrayConfig> {
    let config: SnitrayConfig = serde_json::from_str(content).context("Failed to parse configuration")?;
    config.validate()
}

/// Read the configuration file. A missing file is the default configuration.
pub fn read_from_file(path: impl AsRef<Path>) -> Result<SnitrayConfig> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("No configuration at {}, using defaults", path.display());
        return Ok(SnitrayConfig::default());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SnitrayConfig::default();
        assert_eq!(config.scroll_threshold, 1.0);
        assert!(config.spawn_watcher);
        assert_eq!(config.menu_depth, -1);
        assert_eq!(parse("{}").unwrap(), config);
    }

    #[test]
    fn test_parse_partial() {
        let config = parse(r#"{ "scroll-threshold": 2.5, "spawn-watcher": false }"#).unwrap();
        assert_eq!(config, SnitrayConfig { scroll_threshold: 2.5, spawn_watcher: false, menu_depth: -1 });
        assert_eq!(config.host_config(), sni_host::HostConfig { scroll_threshold: 2.5, menu_depth: -1 });
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse(r#"{ "scroll-threshold": 0 }"#).is_err());
        assert!(parse(r#"{ "menu-depth": -4 }"#).is_err());
        assert!(parse(r#"{ "scroll_threshold": 1.0 }"#).is_err());
        assert!(parse("[").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = read_from_file("/nonexistent/snitray/config.json").unwrap();
        assert_eq!(config, SnitrayConfig::default());
    }
}
