mod logging;
mod plugins;
mod session;

use core::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent},
        message::{MessageType, OriginalSyncRoomMessageEvent},
    },
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::logging::{LogFormat, init_tracing};
use plugin_core::{PluginContext, PluginRegistry, PluginSpec, factory::PluginEnv, truncate};

#[derive(Parser, Debug)]
#[command(
    name = "sticky-bot",
    version,
    about = "Matrix bot that keeps sticky messages at the bottom of busy rooms"
)]
pub(crate) struct Args {
    /// Homeserver base URL, e.g. `https://matrix-client.matrix.org`.
    #[arg(long, env = "MATRIX_HOMESERVER")]
    homeserver: String,

    /// Username (localpart or full user ID)
    #[arg(long, env = "MATRIX_USERNAME")]
    pub(crate) username: String,

    /// Password (if omitted, will prompt if needed)
    #[arg(long, env = "MATRIX_PASSWORD")]
    pub(crate) password: Option<String>,

    /// Directory for persistent state (encryption keys, sync cache, sticky data)
    #[arg(long, env = "MATRIX_STORE", default_value = "./bot-store")]
    store: PathBuf,

    /// JSON session file for access token/device info
    #[arg(long, env = "MATRIX_SESSION_FILE", default_value = "./session.json")]
    pub(crate) session_file: PathBuf,

    /// Device display name
    #[arg(long, env = "MATRIX_DEVICE_NAME", default_value = "sticky-bot")]
    pub(crate) device_name: String,

    /// Path to the YAML config listing plugin specs
    #[arg(long, env = "MATRIX_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Directory holding per-plugin `<id>/config.yaml` overrides
    #[arg(long, env = "PLUGINS_DIR", default_value = "./plugins")]
    plugins_dir: PathBuf,

    /// Disable auto-joining rooms when invited
    #[arg(long)]
    no_autojoin: bool,

    /// Sync timeout in milliseconds
    #[arg(long, env = "MATRIX_SYNC_TIMEOUT_MS", default_value_t = 30000)]
    sync_timeout_ms: u64,

    /// Log output format
    #[arg(long, env = "RUST_LOG_MODE", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub(crate) struct BotConfig {
    #[serde(default, alias = "tools")]
    pub(crate) plugins: Vec<PluginSpec>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.log_format)?;

    fs::create_dir_all(&args.store)
        .with_context(|| format!("creating store directory at {}", args.store.display()))?;

    // SQLite store keeps E2EE state across restarts
    let client = Client::builder()
        .homeserver_url(&args.homeserver)
        .handle_refresh_tokens()
        .sqlite_store(&args.store, None)
        .build()
        .await
        .context("building matrix client")?;

    session::restore_or_login(&client, &args).await?;

    let config = load_config(&args.config)?;
    let env = PluginEnv {
        client: client.clone(),
        state_dir: args.store.clone(),
    };
    let registry = plugins::build_registry(&config, &env, &args.plugins_dir).await?;
    info!(commands = ?registry.commands().await, "Registered plugin commands");

    if !args.no_autojoin {
        client.add_event_handler(
            async move |ev: StrippedRoomMemberEvent, room: Room, client: Client| {
                if ev.content.membership != MembershipState::Invite {
                    return;
                }
                let Some(own_id) = client.user_id() else {
                    return;
                };
                if ev.state_key != own_id.as_str() {
                    return;
                }
                info!(room_id = %room.room_id(), "Auto-joining invited room");
                if let Err(e) = room.join().await {
                    warn!(error = %e, "Failed to accept invite");
                }
            },
        );
    }

    {
        let registry = registry.clone();
        client.add_event_handler(
            move |ev: OriginalSyncRoomMessageEvent, room: Room, client: Client| {
                let registry = registry.clone();
                async move { handle_room_message(&registry, ev, room, client).await }
            },
        );
    }

    info!(
        timeout_ms = args.sync_timeout_ms,
        "Starting sync… Press Ctrl+C to stop."
    );
    let settings = SyncSettings::new().timeout(Duration::from_millis(args.sync_timeout_ms));
    let outcome = tokio::select! {
        res = client.sync(settings) => res.map_err(|e| anyhow!("sync terminated: {e}")),
        res = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            res.context("listening for Ctrl+C")
        }
    };

    shutdown_plugins(&registry).await;
    outcome
}

/// Runs `!command` plugins, then every passive plugin, for one room message.
async fn handle_room_message(
    registry: &PluginRegistry,
    ev: OriginalSyncRoomMessageEvent,
    room: Room,
    client: Client,
) {
    let Some(own_id) = client.user_id().map(ToOwned::to_owned) else {
        return;
    };
    if ev.sender == own_id {
        return;
    }

    let body = match &ev.content.msgtype {
        MessageType::Text(t) => Some(t.body.trim()),
        MessageType::Notice(n) => Some(n.body.trim()),
        MessageType::Emote(e) => Some(e.body.trim()),
        MessageType::Audio(_)
        | MessageType::File(_)
        | MessageType::Image(_)
        | MessageType::Location(_)
        | MessageType::ServerNotice(_)
        | MessageType::Video(_)
        | MessageType::VerificationRequest(_)
        | _ => None,
    };
    debug!(room_id = %room.room_id(), sender = %ev.sender, body = ?body.map(|b| truncate(b, 200)), "Incoming message");

    let ctx = PluginContext {
        room,
        sender: ev.sender.clone(),
    };

    if let Some((cmd, args)) = body.and_then(split_command)
        && let Some(entry) = registry.entry_by_command(cmd).await
    {
        info!(plugin = %entry.spec.id, cmd = %cmd, sender = %ctx.sender, "Running command");
        if let Err(e) = entry.plugin.run(&ctx, args, &entry.spec).await {
            warn!(error = %e, plugin = %entry.spec.id, "Plugin failed");
        }
    }

    for entry in registry.passive().await {
        if let Err(e) = entry.plugin.on_room_message(&ctx, &ev, &entry.spec).await {
            warn!(error = %e, plugin = %entry.spec.id, "Plugin on_room_message failed");
        }
    }
}

/// Splits `!cmd rest of line` into the command token and its trimmed arguments.
fn split_command(body: &str) -> Option<(&str, &str)> {
    if !body.starts_with('!') {
        return None;
    }
    let (cmd, args) = body
        .split_once(char::is_whitespace)
        .unwrap_or((body, ""));
    Some((cmd, args.trim()))
}

async fn shutdown_plugins(registry: &PluginRegistry) {
    for (id, entry) in registry.entries().await {
        match entry.plugin.shutdown().await {
            Ok(()) => debug!(plugin = %id, "Plugin shut down"),
            Err(e) => warn!(error = %e, plugin = %id, "Plugin shutdown failed"),
        }
    }
}

fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        info!(file = %path.display(), "No config file; using plugin defaults");
        return Ok(BotConfig::default());
    }
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {}", path.display()))?;
    if yaml.trim().is_empty() {
        return Ok(BotConfig::default());
    }
    let cfg: BotConfig = serde_yaml::from_str(&yaml).context("parsing YAML config")?;
    Ok(cfg)
}
