use core::{fmt, future::Future, time::Duration};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    ChannelId, Clock, GatewayError, InboundMessage, MessageId, MessagingGateway, Persistence,
    PersistenceError, RateTracker, RecentMessage, StickyContent, StickyError,
    StickyRecord, StickySnapshot, StickyStore, ThresholdPolicy, ThresholdSnapshot, Timestamp,
};

/// Tunables that are not part of the rate policy.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How many recent messages to scan for the current sticky.
    pub fetch_limit: usize,
    /// Upper bound on any single gateway call.
    pub gateway_timeout: Duration,
    /// Save the store after `set_sticky`, `remove_sticky` and `reset_all`.
    pub persist_on_change: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fetch_limit: 20,
            gateway_timeout: Duration::from_secs(10),
            persist_on_change: true,
        }
    }
}

/// Why a resend happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendReason {
    /// The tracked message was not in the recent window (or never posted).
    Missing,
    /// Enough traffic followed the tracked message.
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Fetch,
    Delete,
    Send,
}

/// Outcome of evaluating one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Bot-authored messages never drive the engine.
    IgnoredBot,
    /// No sticky in this channel.
    Idle,
    CoolingDown { remaining: Duration },
    /// Another evaluation for this channel is talking to the gateway.
    InFlight,
    BelowThreshold { intervening: usize, threshold: usize },
    Resent {
        message_id: MessageId,
        reason: ResendReason,
    },
    /// A gateway call failed; the record is untouched and the next message retries.
    Failed { stage: FailedStage },
}

/// Read-only view for status commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyStatus {
    pub record: Option<StickyRecord>,
    pub rate: usize,
    pub policy: ThresholdSnapshot,
}

/// One lock per channel guarding the fetch, delete, send sequence.
///
/// Message triggers only `try_acquire` and give up when busy; command-layer
/// operations wait their turn.
#[derive(Debug, Default)]
struct ChannelLocks {
    locks: DashMap<ChannelId, Arc<Mutex<()>>>,
}

impl ChannelLocks {
    fn handle(&self, channel: &ChannelId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(channel.clone()).or_default().value())
    }

    fn try_acquire(&self, channel: &ChannelId) -> Option<OwnedMutexGuard<()>> {
        self.handle(channel).try_lock_owned().ok()
    }

    async fn acquire(&self, channel: &ChannelId) -> OwnedMutexGuard<()> {
        self.handle(channel).lock_owned().await
    }
}

/// The per-channel sticky state machine.
///
/// A channel is IDLE while it has no [`StickyRecord`] and ACTIVE otherwise.
/// Inbound messages on an ACTIVE channel may trigger a delete-and-repost.
pub struct ResendController {
    gateway: Arc<dyn MessagingGateway>,
    clock: Arc<dyn Clock>,
    rates: Arc<RateTracker>,
    store: Arc<StickyStore>,
    persistence: Option<Arc<dyn Persistence>>,
    settings: EngineSettings,
    locks: ChannelLocks,
    /// Held from snapshot to durable write so saves land in snapshot order.
    save_lock: Mutex<()>,
}

impl fmt::Debug for ResendController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendController")
            .field("settings", &self.settings)
            .field("persistent", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl ResendController {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            gateway,
            clock,
            rates: Arc::new(RateTracker::new()),
            store: Arc::new(StickyStore::new()),
            persistence: None,
            settings,
            locks: ChannelLocks::default(),
            save_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_rate_tracker(mut self, rates: Arc<RateTracker>) -> Self {
        self.rates = rates;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<StickyStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Installs `content` as the channel's sticky and posts it right away.
    ///
    /// A previously posted sticky is deleted best-effort. If the post fails
    /// the record is kept without a message id, so the next qualifying
    /// message reposts it.
    pub async fn set_sticky(
        &self,
        channel: ChannelId,
        content: StickyContent,
    ) -> Result<MessageId, StickyError> {
        let guard = self.locks.acquire(&channel).await;

        let previous = self.store.set(channel.clone(), content.clone()).await;
        if let Some(old_id) = previous.and_then(|record| record.last_message_id) {
            match self
                .bounded("delete", self.gateway.delete_message(&channel, &old_id))
                .await
            {
                Ok(()) | Err(GatewayError::NotFound) => {}
                Err(e) => {
                    warn!(channel = %channel, message_id = %old_id, error = %e, "Could not delete replaced sticky");
                }
            }
        }

        let outcome = match self
            .bounded("send", self.gateway.send_message(&channel, &content))
            .await
        {
            Ok(sent) => {
                if self.record_sent(&channel, &sent.id, self.clock.now()).await {
                    info!(channel = %channel, message_id = %sent.id, "Sticky set");
                    Ok(sent.id)
                } else {
                    Err(StickyError::Removed)
                }
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Initial sticky post failed; will retry on next message");
                Err(StickyError::Send(e))
            }
        };
        drop(guard);

        self.persist_on_change().await;
        outcome
    }

    /// Removes the channel's sticky and its last posted message.
    ///
    /// Returns `false` when the channel had no sticky; that case makes no
    /// gateway calls.
    pub async fn remove_sticky(&self, channel: &ChannelId) -> bool {
        let guard = self.locks.acquire(channel).await;

        let Some(record) = self.store.get(channel).await else {
            return false;
        };
        if let Some(message_id) = &record.last_message_id {
            match self
                .bounded("delete", self.gateway.delete_message(channel, message_id))
                .await
            {
                Ok(()) | Err(GatewayError::NotFound) => {}
                Err(e) => {
                    warn!(channel = %channel, message_id = %message_id, error = %e, "Could not delete sticky message; removing record anyway");
                }
            }
        }
        self.store.remove(channel).await;
        drop(guard);

        info!(channel = %channel, "Sticky removed");
        self.persist_on_change().await;
        true
    }

    /// Drops every sticky record without touching posted messages.
    ///
    /// A resend already in flight when this runs deletes the message it
    /// posts instead of recording it.
    pub async fn reset_all(&self) -> usize {
        let cleared = self.store.clear().await;
        info!(cleared, "Sticky store reset");
        self.persist_on_change().await;
        cleared
    }

    /// Every channel's record, ordered by channel id.
    pub async fn list(&self) -> StickySnapshot {
        self.store.snapshot().await
    }

    pub async fn status(&self, channel: &ChannelId) -> StickyStatus {
        let rate = self.rates.current_rate(channel);
        StickyStatus {
            record: self.store.get(channel).await,
            rate,
            policy: ThresholdPolicy::evaluate(rate),
        }
    }

    /// Feeds one inbound message through the state machine.
    pub async fn on_message(&self, message: &InboundMessage) -> Decision {
        if message.is_bot {
            return Decision::IgnoredBot;
        }
        let channel = &message.channel;
        let now = self.clock.now();
        self.rates.record_message(channel, now);

        let Some(record) = self.store.get(channel).await else {
            return Decision::Idle;
        };
        let rate = self.rates.current_rate(channel);
        let policy = ThresholdPolicy::evaluate(rate);
        if let Some(remaining) = cooldown_remaining(&record, policy, now) {
            debug!(channel = %channel, rate, remaining_ms = remaining.as_millis(), "Sticky cooling down");
            return Decision::CoolingDown { remaining };
        }

        let Some(guard) = self.locks.try_acquire(channel) else {
            debug!(channel = %channel, "Sticky evaluation already in flight; dropping trigger");
            return Decision::InFlight;
        };

        // Another evaluation may have finished between the read above and the lock.
        let Some(record) = self.store.get(channel).await else {
            return Decision::Idle;
        };
        if let Some(remaining) = cooldown_remaining(&record, policy, now) {
            return Decision::CoolingDown { remaining };
        }

        let decision = self.evaluate(channel, &record, policy, now).await;
        drop(guard);

        match &decision {
            Decision::Resent { message_id, reason } => {
                info!(channel = %channel, message_id = %message_id, reason = ?reason, rate, "Sticky resent");
            }
            other => debug!(channel = %channel, rate, decision = ?other, "Sticky evaluated"),
        }
        decision
    }

    async fn evaluate(
        &self,
        channel: &ChannelId,
        record: &StickyRecord,
        policy: ThresholdSnapshot,
        now: Timestamp,
    ) -> Decision {
        let recent = match self
            .bounded(
                "fetch",
                self.gateway
                    .fetch_recent_messages(channel, self.settings.fetch_limit),
            )
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Fetching recent messages failed");
                return Decision::Failed {
                    stage: FailedStage::Fetch,
                };
            }
        };

        let tracked = record
            .last_message_id
            .as_ref()
            .and_then(|id| recent.iter().find(|m| &m.id == id));

        let reason = match tracked {
            None => ResendReason::Missing,
            Some(sticky) => {
                let intervening = count_after(&recent, sticky);
                if intervening < policy.message_threshold {
                    return Decision::BelowThreshold {
                        intervening,
                        threshold: policy.message_threshold,
                    };
                }
                ResendReason::Threshold
            }
        };

        self.resend(channel, record, now, reason).await
    }

    async fn resend(
        &self,
        channel: &ChannelId,
        record: &StickyRecord,
        now: Timestamp,
        reason: ResendReason,
    ) -> Decision {
        if let Some(old_id) = &record.last_message_id {
            match self
                .bounded("delete", self.gateway.delete_message(channel, old_id))
                .await
            {
                Ok(()) => {}
                Err(GatewayError::NotFound) => {
                    debug!(channel = %channel, message_id = %old_id, "Old sticky already gone");
                }
                Err(e) => {
                    warn!(channel = %channel, message_id = %old_id, error = %e, "Deleting old sticky failed");
                    return Decision::Failed {
                        stage: FailedStage::Delete,
                    };
                }
            }
        }

        match self
            .bounded("send", self.gateway.send_message(channel, &record.content))
            .await
        {
            Ok(sent) => {
                if !self.record_sent(channel, &sent.id, now).await {
                    return Decision::Idle;
                }
                Decision::Resent {
                    message_id: sent.id,
                    reason,
                }
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Reposting sticky failed");
                Decision::Failed {
                    stage: FailedStage::Send,
                }
            }
        }
    }

    /// Stores `message_id` as the channel's current sticky message.
    ///
    /// When the record vanished while the message was being posted (a remove
    /// or reset ran concurrently), the new message is deleted best-effort and
    /// `false` is returned.
    async fn record_sent(&self, channel: &ChannelId, message_id: &MessageId, at: Timestamp) -> bool {
        if self
            .store
            .update_after_resend(channel, message_id.clone(), at)
            .await
        {
            return true;
        }
        info!(channel = %channel, message_id = %message_id, "Sticky removed while posting; deleting the new message");
        match self
            .bounded("delete", self.gateway.delete_message(channel, message_id))
            .await
        {
            Ok(()) | Err(GatewayError::NotFound) => {}
            Err(e) => {
                warn!(channel = %channel, message_id = %message_id, error = %e, "Could not delete orphaned sticky");
            }
        }
        false
    }

    /// Loads persisted records into the store, returning how many were loaded.
    pub async fn load_persisted(&self) -> Result<usize, PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let snapshot = persistence.load().await?;
        let count = snapshot.len();
        self.store.restore(snapshot).await;
        info!(records = count, "Sticky records loaded");
        Ok(count)
    }

    /// Writes a consistent snapshot of the store. No-op without persistence.
    ///
    /// Concurrent callers are serialized, so the file always ends up holding
    /// the newest snapshot taken.
    pub async fn save_snapshot(&self) -> Result<(), PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _saving = self.save_lock.lock().await;
        let snapshot = self.store.snapshot().await;
        persistence.save(&snapshot).await
    }

    async fn persist_on_change(&self) {
        if !self.settings.persist_on_change {
            return;
        }
        if let Err(e) = self.save_snapshot().await {
            error!(error = %e, "Saving sticky data failed; continuing from memory");
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let after = self.settings.gateway_timeout;
        tokio::time::timeout(after, call)
            .await
            .unwrap_or(Err(GatewayError::Timeout { op, after }))
    }
}

fn cooldown_remaining(
    record: &StickyRecord,
    policy: ThresholdSnapshot,
    now: Timestamp,
) -> Option<Duration> {
    let last = record.last_sent_at?;
    let elapsed = now.saturating_since(last);
    (elapsed < policy.cooldown).then(|| policy.cooldown.saturating_sub(elapsed))
}

/// Non-bot messages strictly newer than `sticky`.
fn count_after(recent: &[RecentMessage], sticky: &RecentMessage) -> usize {
    recent
        .iter()
        .filter(|m| m.timestamp > sticky.timestamp && !m.is_bot)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StickyContent, UserId};

    fn msg(id: &str, ts: u64, is_bot: bool) -> RecentMessage {
        RecentMessage {
            id: MessageId::from(id),
            author: UserId::from(if is_bot { "@bot:x" } else { "@user:x" }),
            is_bot,
            timestamp: Timestamp::from_millis(ts),
        }
    }

    #[test]
    fn count_after_skips_bots_and_older_messages() {
        let sticky = msg("$s", 100, true);
        let recent = vec![
            msg("$4", 140, false),
            msg("$3", 130, true),
            msg("$2", 120, false),
            sticky.clone(),
            msg("$0", 90, false),
            msg("$same", 100, false),
        ];
        assert_eq!(count_after(&recent, &sticky), 2);
    }

    #[test]
    fn cooldown_is_open_for_never_sent_records() {
        let record = StickyRecord::new(StickyContent::text("x"));
        let policy = ThresholdPolicy::evaluate(0);
        assert_eq!(
            cooldown_remaining(&record, policy, Timestamp::from_millis(0)),
            None
        );
    }

    #[test]
    fn cooldown_reports_remaining_time() {
        let mut record = StickyRecord::new(StickyContent::text("x"));
        record.last_sent_at = Some(Timestamp::from_millis(1_000));
        let policy = ThresholdPolicy::evaluate(0);
        assert_eq!(
            cooldown_remaining(&record, policy, Timestamp::from_millis(2_000)),
            Some(Duration::from_millis(2_000))
        );
        assert_eq!(
            cooldown_remaining(&record, policy, Timestamp::from_millis(4_000)),
            None
        );
    }
}
