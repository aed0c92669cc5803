use std::path::Path;

use anyhow::{Context as _, Result};
use plugin_core::{
    PluginRegistry, PluginSpec,
    factory::{PluginEnv, PluginFactory},
};
use plugin_sticky::StickyPluginFactory;
use tracing::{info, warn};

use crate::BotConfig;

fn factories() -> Vec<Box<dyn PluginFactory>> {
    vec![Box::new(StickyPluginFactory)]
}

/// Builds every known plugin from its default spec, the matching entry in
/// `config.yaml` and `<plugins_dir>/<id>/config.yaml`, in that order.
pub async fn build_registry(
    config: &BotConfig,
    env: &PluginEnv,
    plugins_dir: &Path,
) -> Result<PluginRegistry> {
    let factories = factories();
    let defaults: Vec<PluginSpec> = factories.iter().map(|f| f.default_spec()).collect();

    for spec in &config.plugins {
        if !defaults.iter().any(|d| d.id == spec.id) {
            warn!("Unknown plugin ID: {}", spec.id);
        }
    }

    let registry = PluginRegistry::new();
    for (factory, default) in factories.iter().zip(defaults) {
        let configured = config.plugins.iter().find(|s| s.id == default.id);
        let mut spec = merge_spec(default, configured);
        if let Some(file_cfg) = load_plugin_config(plugins_dir, &spec.id) {
            spec.config = merge_yaml(file_cfg, spec.config);
        }
        if !spec.enabled {
            info!(plugin = %spec.id, "Plugin disabled in config");
            continue;
        }

        let plugin = factory
            .build(env, &spec)
            .await
            .with_context(|| format!("building plugin {}", spec.id))?;
        registry.register(spec, plugin).await;
    }

    Ok(registry)
}

/// Overlays a configured spec on a plugin default. Configured commands are
/// kept and the defaults are added after them.
fn merge_spec(default: PluginSpec, configured: Option<&PluginSpec>) -> PluginSpec {
    let Some(configured) = configured else {
        return default;
    };
    let mut spec = configured.clone();
    for cmd in default.triggers.commands {
        if !spec
            .triggers
            .commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&cmd))
        {
            spec.triggers.commands.push(cmd);
        }
    }
    if spec.config.is_null() {
        spec.config = default.config;
    }
    spec
}

/// Deep-merges two YAML values. Mappings merge key by key, sequences
/// concatenate, and for any other pair `file_cfg` wins.
fn merge_yaml(file_cfg: serde_yaml::Value, spec_cfg: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value::{Mapping, Null, Sequence};
    match (file_cfg, spec_cfg) {
        (Mapping(mut a), Mapping(b)) => {
            for (k, v_b) in b {
                match a.get_mut(&k) {
                    Some(v_a) => {
                        let merged = merge_yaml(v_a.clone(), v_b);
                        *v_a = merged;
                    }
                    None => {
                        a.insert(k, v_b);
                    }
                }
            }
            Mapping(a)
        }
        (Sequence(mut a), Sequence(b)) => {
            a.extend(b);
            Sequence(a)
        }
        (Null, b) => b,
        (a, _b) => a,
    }
}

fn load_plugin_config(root: &Path, id: &str) -> Option<serde_yaml::Value> {
    let path = root.join(id).join("config.yaml");
    match std::fs::read_to_string(&path) {
        Ok(s) => match serde_yaml::from_str::<serde_yaml::Value>(&s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(plugin = %id, file = %path.display(), error = %e, "Failed to parse plugin config YAML");
                None
            }
        },
        Err(e) => {
            if path.exists() {
                warn!(plugin = %id, file = %path.display(), error = %e, "Failed to read plugin config file");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::PluginTriggers;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn spec(id: &str, commands: &[&str], config: &str) -> PluginSpec {
        PluginSpec {
            id: id.to_owned(),
            enabled: true,
            triggers: PluginTriggers {
                commands: commands.iter().map(|c| (*c).to_owned()).collect(),
            },
            config: yaml(config),
        }
    }

    #[test]
    fn missing_config_keeps_default() {
        let merged = merge_spec(spec("sticky", &["!sticky"], "~"), None);
        assert_eq!(merged.triggers.commands, ["!sticky"]);
    }

    #[test]
    fn configured_spec_adds_commands_and_keeps_default_once() {
        let mut configured = spec("sticky", &["!pin", "!STICKY"], "fetch_limit: 30");
        configured.enabled = false;
        let merged = merge_spec(spec("sticky", &["!sticky"], "~"), Some(&configured));
        assert!(!merged.enabled);
        assert_eq!(merged.triggers.commands, ["!pin", "!STICKY"]);
        assert_eq!(merged.config, yaml("fetch_limit: 30"));
    }

    #[test]
    fn yaml_merge_prefers_file_values() {
        let merged = merge_yaml(
            yaml("fetch_limit: 10\nadmins: ['@a:x']\nautosave_secs: 60"),
            yaml("fetch_limit: 30\nadmins: ['@b:x']"),
        );
        assert_eq!(
            merged,
            yaml("fetch_limit: 10\nadmins: ['@a:x', '@b:x']\nautosave_secs: 60")
        );
        assert_eq!(merge_yaml(serde_yaml::Value::Null, yaml("a: 1")), yaml("a: 1"));
    }

    #[test]
    fn plugin_config_file_is_read_from_plugin_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sticky")).unwrap();
        std::fs::write(dir.path().join("sticky/config.yaml"), "fetch_limit: 40\n").unwrap();

        assert_eq!(
            load_plugin_config(dir.path(), "sticky"),
            Some(yaml("fetch_limit: 40"))
        );
        assert_eq!(load_plugin_config(dir.path(), "other"), None);
    }

    #[test]
    fn broken_plugin_config_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sticky")).unwrap();
        std::fs::write(dir.path().join("sticky/config.yaml"), "fetch_limit: [\n").unwrap();
        assert_eq!(load_plugin_config(dir.path(), "sticky"), None);
    }
}
