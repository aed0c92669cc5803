use core::time::Duration;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use plugin_core::PluginSpec;
use serde::{Deserialize, Serialize};
use sticky_engine::EngineSettings;

/// `config:` block of the `sticky` plugin spec.
///
/// Example YAML:
/// ```yaml
/// data_file: ./bot-store/sticky-data.json
/// autosave_secs: 300
/// fetch_limit: 20
/// gateway_timeout_ms: 10000
/// admins: ["@mod:example.org"]
/// bot_users: ["@other-bot:example.org"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StickyConfig {
    /// Defaults to `sticky-data.json` in the bot's state directory.
    pub data_file: Option<PathBuf>,
    /// 0 disables periodic saving.
    pub autosave_secs: u64,
    pub fetch_limit: usize,
    pub gateway_timeout_ms: u64,
    pub persist_on_change: bool,
    /// Users allowed to change stickies. Empty means everyone.
    pub admins: Vec<String>,
    /// Other bot accounts whose messages never count as chat traffic.
    pub bot_users: Vec<String>,
}

impl Default for StickyConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            data_file: None,
            autosave_secs: 300,
            fetch_limit: engine.fetch_limit,
            gateway_timeout_ms: u64::try_from(engine.gateway_timeout.as_millis())
                .unwrap_or(10_000),
            persist_on_change: engine.persist_on_change,
            admins: Vec::new(),
            bot_users: Vec::new(),
        }
    }
}

impl StickyConfig {
    pub fn from_spec(spec: &PluginSpec) -> Result<Self> {
        if spec.config.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(spec.config.clone()).context("parsing sticky plugin config")
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            fetch_limit: self.fetch_limit.max(1),
            gateway_timeout: Duration::from_millis(self.gateway_timeout_ms.max(1)),
            persist_on_change: self.persist_on_change,
        }
    }

    #[must_use]
    pub fn data_file(&self, state_dir: &Path) -> PathBuf {
        self.data_file
            .clone()
            .unwrap_or_else(|| state_dir.join("sticky-data.json"))
    }

    #[must_use]
    pub const fn autosave_every(&self) -> Option<Duration> {
        if self.autosave_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.autosave_secs))
        }
    }

    #[must_use]
    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.is_empty() || self.admins.iter().any(|a| a.eq_ignore_ascii_case(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::PluginTriggers;

    fn spec_with(config: &str) -> PluginSpec {
        PluginSpec {
            id: "sticky".to_owned(),
            enabled: true,
            triggers: PluginTriggers::default(),
            config: serde_yaml::from_str(config).unwrap(),
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = StickyConfig::from_spec(&spec_with("~")).unwrap();
        assert_eq!(cfg, StickyConfig::default());
        let engine = cfg.engine_settings();
        assert_eq!(engine.fetch_limit, 20);
        assert_eq!(engine.gateway_timeout, Duration::from_secs(10));
        assert_eq!(cfg.autosave_every(), Some(Duration::from_secs(300)));
        assert_eq!(
            cfg.data_file(Path::new("/srv/bot")),
            PathBuf::from("/srv/bot/sticky-data.json")
        );
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let cfg = StickyConfig::from_spec(&spec_with(
            "fetch_limit: 50\nautosave_secs: 0\nadmins: ['@Mod:example.org']",
        ))
        .unwrap();
        assert_eq!(cfg.fetch_limit, 50);
        assert_eq!(cfg.autosave_every(), None);
        assert_eq!(cfg.gateway_timeout_ms, 10_000);
        assert!(cfg.is_admin("@mod:example.org"));
        assert!(!cfg.is_admin("@random:example.org"));
    }

    #[test]
    fn everyone_is_admin_without_a_list() {
        assert!(StickyConfig::default().is_admin("@anyone:example.org"));
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(StickyConfig::from_spec(&spec_with("fetch_limit: lots")).is_err());
    }
}
