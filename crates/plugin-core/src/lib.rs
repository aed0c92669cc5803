pub mod factory;

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use matrix_sdk::{
    room::Room,
    ruma::{
        OwnedUserId,
        events::room::message::{OriginalSyncRoomMessageEvent, RoomMessageEventContent},
    },
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Everything a plugin needs to act on one incoming message.
#[derive(Clone)]
pub struct PluginContext {
    pub room: Room,
    pub sender: OwnedUserId,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn help(&self) -> &'static str;

    /// Whether [`Plugin::on_room_message`] should see every room message.
    fn handles_room_messages(&self) -> bool {
        false
    }

    /// Runs when one of the plugin's commands is invoked; `args` is the text
    /// after the command token.
    async fn run(&self, ctx: &PluginContext, args: &str, spec: &PluginSpec) -> Result<()>;

    async fn on_room_message(
        &self,
        _ctx: &PluginContext,
        _event: &OriginalSyncRoomMessageEvent,
        _spec: &PluginSpec,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once before the process exits.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PluginTriggers {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginSpec {
    pub id: String,
    #[serde(default = "enabled_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: PluginTriggers,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

const fn enabled_true() -> bool {
    true
}

#[derive(Clone)]
pub struct PluginEntry {
    pub spec: PluginSpec,
    pub plugin: Arc<dyn Plugin>,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, PluginEntry>,
    by_command: HashMap<String, String>,
}

/// Live plugins, addressable by id or by `!command`.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a plugin and its command triggers.
    pub async fn register(&self, spec: PluginSpec, plugin: Arc<dyn Plugin>) -> Option<PluginEntry> {
        let mut inner = self.inner.write().await;
        let id = spec.id.clone();
        inner.by_command.retain(|_, existing| *existing != id);
        for cmd in &spec.triggers.commands {
            inner.by_command.insert(normalize_cmd(cmd), id.clone());
        }
        inner.by_id.insert(id, PluginEntry { spec, plugin })
    }

    pub async fn entry_by_command(&self, token: &str) -> Option<PluginEntry> {
        let inner = self.inner.read().await;
        inner
            .by_command
            .get(&normalize_cmd(token))
            .and_then(|id| inner.by_id.get(id))
            .filter(|entry| entry.spec.enabled)
            .cloned()
    }

    /// Enabled plugins that want to see every room message.
    pub async fn passive(&self) -> Vec<PluginEntry> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .values()
            .filter(|entry| entry.spec.enabled && entry.plugin.handles_room_messages())
            .cloned()
            .collect()
    }

    pub async fn entries(&self) -> Vec<(String, PluginEntry)> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Sorted list of every registered command token.
    pub async fn commands(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut commands: Vec<String> = inner.by_command.keys().cloned().collect();
        commands.sort();
        commands
    }
}

#[must_use]
pub fn normalize_cmd(s: &str) -> String {
    let lower = s.trim().to_lowercase();
    if lower.starts_with('!') {
        lower
    } else {
        format!("!{lower}")
    }
}

#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Replies in the context room as an `m.notice`, which other bots ignore.
pub async fn send_notice(ctx: &PluginContext, text: impl Into<String>) -> Result<()> {
    let content = RoomMessageEventContent::notice_plain(text.into());
    ctx.room.send(content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        passive: bool,
    }

    #[async_trait]
    impl Plugin for Dummy {
        fn id(&self) -> &'static str {
            "dummy"
        }

        fn help(&self) -> &'static str {
            "test plugin"
        }

        fn handles_room_messages(&self) -> bool {
            self.passive
        }

        async fn run(&self, _ctx: &PluginContext, _args: &str, _spec: &PluginSpec) -> Result<()> {
            Ok(())
        }
    }

    fn spec(id: &str, commands: &[&str], enabled: bool) -> PluginSpec {
        PluginSpec {
            id: id.to_owned(),
            enabled,
            triggers: PluginTriggers {
                commands: commands.iter().map(|c| (*c).to_owned()).collect(),
            },
            config: serde_yaml::Value::default(),
        }
    }

    #[test]
    fn commands_are_normalized() {
        assert_eq!(normalize_cmd("sticky"), "!sticky");
        assert_eq!(normalize_cmd("!Sticky "), "!sticky");
    }

    #[tokio::test]
    async fn lookup_by_command_respects_enabled_flag() {
        let registry = PluginRegistry::new();
        registry
            .register(spec("a", &["sticky"], true), Arc::new(Dummy { passive: true }))
            .await;
        registry
            .register(spec("b", &["!off"], false), Arc::new(Dummy { passive: true }))
            .await;

        assert_eq!(
            registry.entry_by_command("!STICKY").await.map(|e| e.spec.id),
            Some("a".to_owned())
        );
        assert!(registry.entry_by_command("!off").await.is_none());
        assert_eq!(registry.passive().await.len(), 1);
        assert_eq!(registry.commands().await, ["!off", "!sticky"]);
    }

    #[tokio::test]
    async fn re_registering_replaces_triggers() {
        let registry = PluginRegistry::new();
        registry
            .register(spec("a", &["!old"], true), Arc::new(Dummy { passive: false }))
            .await;
        let previous = registry
            .register(spec("a", &["!new"], true), Arc::new(Dummy { passive: false }))
            .await;

        assert!(previous.is_some());
        assert!(registry.entry_by_command("!old").await.is_none());
        assert!(registry.entry_by_command("!new").await.is_some());
        assert!(registry.passive().await.is_empty());
        assert_eq!(registry.entries().await.len(), 1);
    }
}
