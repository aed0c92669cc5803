use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{ChannelId, MessageId, StickyContent, Timestamp};

/// Durable state of one channel's sticky. The channel id is the store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyRecord {
    pub content: StickyContent,
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    #[serde(default)]
    pub last_sent_at: Option<Timestamp>,
}

impl StickyRecord {
    #[must_use]
    pub const fn new(content: StickyContent) -> Self {
        Self {
            content,
            last_message_id: None,
            last_sent_at: None,
        }
    }
}

/// Point-in-time copy of every record, keyed by channel, in stable order.
pub type StickySnapshot = BTreeMap<ChannelId, StickyRecord>;

/// One sticky record per channel.
#[derive(Debug, Default)]
pub struct StickyStore {
    records: RwLock<HashMap<ChannelId, StickyRecord>>,
}

impl StickyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or fully overwrites the channel's record, returning the old one.
    pub async fn set(&self, channel: ChannelId, content: StickyContent) -> Option<StickyRecord> {
        self.records
            .write()
            .await
            .insert(channel, StickyRecord::new(content))
    }

    pub async fn get(&self, channel: &ChannelId) -> Option<StickyRecord> {
        self.records.read().await.get(channel).cloned()
    }

    /// Records a successful post. `last_sent_at` never moves backwards.
    ///
    /// Returns `false` (and logs) when the channel has no record.
    pub async fn update_after_resend(
        &self,
        channel: &ChannelId,
        message_id: MessageId,
        at: Timestamp,
    ) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(channel) else {
            debug!(channel = %channel, message_id = %message_id, "Sticky update for channel without a record");
            return false;
        };
        record.last_message_id = Some(message_id);
        record.last_sent_at = Some(record.last_sent_at.map_or(at, |prev| prev.max(at)));
        true
    }

    pub async fn remove(&self, channel: &ChannelId) -> Option<StickyRecord> {
        self.records.write().await.remove(channel)
    }

    pub async fn snapshot(&self) -> StickySnapshot {
        self.records
            .read()
            .await
            .iter()
            .map(|(channel, record)| (channel.clone(), record.clone()))
            .collect()
    }

    /// Replaces every record with the contents of `snapshot`.
    pub async fn restore(&self, snapshot: StickySnapshot) {
        let mut records = self.records.write().await;
        records.clear();
        records.extend(snapshot);
    }

    /// Drops every record, returning how many there were.
    pub async fn clear(&self) -> usize {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan() -> ChannelId {
        ChannelId::from("!c:example.org")
    }

    #[tokio::test]
    async fn set_overwrites_and_resets_tracking() {
        let store = StickyStore::new();
        assert!(store.set(chan(), StickyContent::text("one")).await.is_none());
        store
            .update_after_resend(&chan(), MessageId::from("$1"), Timestamp::from_millis(10))
            .await;

        let previous = store.set(chan(), StickyContent::text("two")).await.unwrap();
        assert_eq!(previous.last_message_id, Some(MessageId::from("$1")));

        let current = store.get(&chan()).await.unwrap();
        assert_eq!(current.content, StickyContent::text("two"));
        assert!(current.last_message_id.is_none());
        assert!(current.last_sent_at.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn last_sent_at_never_goes_backwards() {
        let store = StickyStore::new();
        store.set(chan(), StickyContent::text("x")).await;
        store
            .update_after_resend(&chan(), MessageId::from("$2"), Timestamp::from_millis(500))
            .await;
        store
            .update_after_resend(&chan(), MessageId::from("$3"), Timestamp::from_millis(100))
            .await;

        let record = store.get(&chan()).await.unwrap();
        assert_eq!(record.last_message_id, Some(MessageId::from("$3")));
        assert_eq!(record.last_sent_at, Some(Timestamp::from_millis(500)));
    }

    #[tokio::test]
    async fn update_without_record_is_a_noop() {
        let store = StickyStore::new();
        let updated = store
            .update_after_resend(&chan(), MessageId::from("$1"), Timestamp::from_millis(1))
            .await;
        assert!(!updated);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_restore_and_clear() {
        let store = StickyStore::new();
        store.set(ChannelId::from("b"), StickyContent::text("b")).await;
        store.set(ChannelId::from("a"), StickyContent::text("a")).await;

        let snapshot = store.snapshot().await;
        let keys: Vec<_> = snapshot.keys().map(ChannelId::as_str).collect();
        assert_eq!(keys, ["a", "b"]);

        let other = StickyStore::new();
        other.set(ChannelId::from("z"), StickyContent::text("z")).await;
        other.restore(snapshot).await;
        assert!(other.get(&ChannelId::from("z")).await.is_none());
        assert_eq!(other.len().await, 2);

        assert_eq!(other.clear().await, 2);
        assert!(other.is_empty().await);
        assert!(store.remove(&ChannelId::from("a")).await.is_some());
        assert!(store.remove(&ChannelId::from("a")).await.is_none());
    }
}
