//! `!sticky` commands and the passive listener that keeps sticky messages
//! at the bottom of their rooms.

mod command;
mod config;
mod matrix_gateway;

use core::{fmt::Write as _, future::Future};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use matrix_sdk::{room::Room, ruma::events::room::message::OriginalSyncRoomMessageEvent};
use plugin_core::{
    Plugin, PluginContext, PluginSpec, PluginTriggers, send_notice,
    factory::{PluginEnv, PluginFactory},
};
use sticky_engine::{
    ChannelId, InboundMessage, JsonFilePersistence, MessagingGateway, ResendController, StickyError, StickySnapshot,
    StickyStatus, SystemClock, UserId, spawn_autosave,
};
use tokio::{
    sync::Mutex,
    task::{JoinHandle, JoinSet},
};
use tracing::{error, info, warn};

pub use command::{CommandError, StickyCommand, USAGE, parse, parse_color};
pub use config::StickyConfig;
pub use matrix_gateway::MatrixGateway;

pub const PLUGIN_ID: &str = "sticky";
const SUMMARY: &str = "Keep a message pinned to the bottom of the room";

#[derive(Debug)]
pub struct StickyPluginFactory;

#[async_trait]
impl PluginFactory for StickyPluginFactory {
    fn default_spec(&self) -> PluginSpec {
        PluginSpec {
            id: PLUGIN_ID.to_owned(),
            enabled: true,
            triggers: PluginTriggers {
                commands: vec!["!sticky".to_owned()],
            },
            config: serde_yaml::Value::Null,
        }
    }

    async fn build(&self, env: &PluginEnv, spec: &PluginSpec) -> Result<Arc<dyn Plugin>> {
        let config = StickyConfig::from_spec(spec)?;
        let data_file = config.data_file(&env.state_dir);
        let gateway = Arc::new(MatrixGateway::new(
            env.client.clone(),
            config.bot_users.iter().cloned(),
        ));

        let controller = ResendController::new(
            Arc::clone(&gateway) as Arc<dyn MessagingGateway>,
            Arc::new(SystemClock),
            config.engine_settings(),
        )
        .with_persistence(Arc::new(JsonFilePersistence::new(data_file.clone())));

        match controller.load_persisted().await {
            Ok(restored) => info!(restored, file = %data_file.display(), "Loaded sticky messages"),
            Err(e) => {
                error!(error = %e, file = %data_file.display(), "Could not load sticky messages; starting empty");
            }
        }

        let controller = Arc::new(controller);
        let autosave = config
            .autosave_every()
            .map(|every| spawn_autosave(Arc::clone(&controller), every));

        Ok(Arc::new(Sticky {
            controller,
            gateway,
            config,
            autosave: Mutex::new(autosave),
            evaluations: Evaluations::default(),
        }))
    }
}

#[derive(Debug)]
pub struct Sticky {
    controller: Arc<ResendController>,
    gateway: Arc<MatrixGateway>,
    config: StickyConfig,
    autosave: Mutex<Option<JoinHandle<()>>>,
    evaluations: Evaluations,
}

/// Resend evaluations running off the sync loop.
#[derive(Debug, Default)]
struct Evaluations {
    tasks: Mutex<JoinSet<()>>,
}

impl Evaluations {
    async fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Waits for every evaluation spawned so far, returning how many were
    /// still outstanding.
    async fn drain(&self) -> usize {
        let mut tasks = core::mem::take(&mut *self.tasks.lock().await);
        let mut outstanding = 0;
        while let Some(result) = tasks.join_next().await {
            outstanding += 1;
            if let Err(e) = result {
                warn!(error = %e, "Sticky evaluation task failed");
            }
        }
        outstanding
    }
}

fn channel_of(room: &Room) -> ChannelId {
    ChannelId::new(room.room_id().as_str())
}

impl Sticky {
    async fn execute(&self, channel: ChannelId, command: StickyCommand) -> Option<String> {
        match command {
            // The reposted sticky is its own confirmation; a reply would sit
            // below it.
            StickyCommand::Set(content) => match self.controller.set_sticky(channel, content).await {
                Ok(_) => None,
                Err(StickyError::Removed) => Some("The sticky was removed before it could be posted.".to_owned()),
                Err(e) => Some(format!(
                    "⚠️ Sticky saved but posting failed ({e}). It will be posted after the next message."
                )),
            },
            StickyCommand::Remove => Some(if self.controller.remove_sticky(&channel).await {
                "🗑️ Sticky message removed.".to_owned()
            } else {
                "There is no sticky message in this room.".to_owned()
            }),
            StickyCommand::Show => Some(describe(&self.controller.status(&channel).await)),
            StickyCommand::List => Some(describe_all(&self.controller.list().await)),
            StickyCommand::Reset => {
                let cleared = self.controller.reset_all().await;
                Some(format!("Cleared {cleared} sticky message(s) in all rooms."))
            }
            StickyCommand::Help => Some(help_reply(self.help())),
        }
    }
}

fn describe(status: &StickyStatus) -> String {
    let Some(record) = &status.record else {
        return "There is no sticky message in this room.".to_owned();
    };
    let mut out = format!("📌 {}\n", record.content.summary(120));
    match &record.last_message_id {
        Some(id) => {
            _ = writeln!(out, "Last posted as {id}");
        }
        None => out.push_str("Not posted yet; waiting for the next message\n"),
    }
    _ = write!(
        out,
        "Chat rate: {} msg/min → cooldown {}s, repost after {} messages",
        status.rate,
        status.policy.cooldown.as_secs(),
        status.policy.message_threshold
    );
    out
}

fn help_reply(summary: &str) -> String {
    format!("📌 {summary}\n\n{USAGE}")
}

fn describe_all(records: &StickySnapshot) -> String {
    if records.is_empty() {
        return "No sticky messages are set.".to_owned();
    }
    let mut out = format!("📌 {} sticky message(s):", records.len());
    for (channel, record) in records {
        let posted = record
            .last_message_id
            .as_ref()
            .map_or_else(|| "not posted yet".to_owned(), |id| format!("posted as {id}"));
        _ = write!(out, "\n• {channel}: {} ({posted})", record.content.summary(80));
    }
    out
}

#[async_trait]
impl Plugin for Sticky {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn help(&self) -> &'static str {
        SUMMARY
    }

    fn handles_room_messages(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &PluginContext, args: &str, _spec: &PluginSpec) -> Result<()> {
        let command = match command::parse(args) {
            Ok(command) => command,
            Err(e) => return send_notice(ctx, format!("⚠️ {e}\n\n{USAGE}")).await,
        };
        if command.is_mutating() && !self.config.is_admin(ctx.sender.as_str()) {
            warn!(sender = %ctx.sender, room = %ctx.room.room_id(), "Rejected sticky command from non-admin");
            return send_notice(ctx, "⛔ Only sticky admins can change sticky messages.").await;
        }

        match self.execute(channel_of(&ctx.room), command).await {
            Some(reply) => send_notice(ctx, reply).await,
            None => Ok(()),
        }
    }

    async fn on_room_message(
        &self,
        ctx: &PluginContext,
        event: &OriginalSyncRoomMessageEvent,
        _spec: &PluginSpec,
    ) -> Result<()> {
        let message = InboundMessage {
            channel: channel_of(&ctx.room),
            author: UserId::new(event.sender.as_str()),
            is_bot: self.gateway.is_bot(&event.sender, &event.content.msgtype),
        };
        let controller = Arc::clone(&self.controller);
        self.evaluations
            .spawn(async move {
                controller.on_message(&message).await;
            })
            .await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.autosave.lock().await.take() {
            handle.abort();
        }
        let outstanding = self.evaluations.drain().await;
        if outstanding > 0 {
            info!(outstanding, "Waited for sticky evaluations before saving");
        }
        self.controller
            .save_snapshot()
            .await
            .context("saving sticky messages on shutdown")
    }
}
