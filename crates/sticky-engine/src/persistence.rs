use core::time::Duration;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{PersistenceError, ResendController, StickySnapshot};

/// Durable home of the sticky store.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> Result<StickySnapshot, PersistenceError>;
    async fn save(&self, snapshot: &StickySnapshot) -> Result<(), PersistenceError>;
}

/// Pretty-printed JSON object keyed by channel id.
///
/// Saves write a sibling temp file and rename it over the target so a crash
/// mid-write never leaves a truncated file behind. Saves through one value
/// (or its clones) run one at a time, since they share the temp file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> Result<StickySnapshot, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(file = %self.path.display(), "No sticky data file yet; starting empty");
                return Ok(StickySnapshot::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, snapshot: &StickySnapshot) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(snapshot).map_err(PersistenceError::Encode)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let temp = self.temp_path();
        let _writing = self.write_lock.lock().await;
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        debug!(file = %self.path.display(), records = snapshot.len(), "Sticky data saved");
        Ok(())
    }
}

/// Saves the controller's store every `every`, starting one period from now.
///
/// Failures are logged and the loop keeps going; abort the handle to stop.
pub fn spawn_autosave(controller: Arc<ResendController>, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = controller.save_snapshot().await {
                error!(error = %e, "Periodic sticky save failed; continuing from memory");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelId, EmbedSpec, MessageId, StickyContent, StickyRecord, Timestamp};

    fn sample() -> StickySnapshot {
        let mut snapshot = StickySnapshot::new();
        snapshot.insert(
            ChannelId::from("!a:example.org"),
            StickyRecord {
                content: StickyContent::text("read the rules"),
                last_message_id: Some(MessageId::from("$m1")),
                last_sent_at: Some(Timestamp::from_millis(1_700_000_000_000)),
            },
        );
        snapshot.insert(
            ChannelId::from("!b:example.org"),
            StickyRecord::new(StickyContent::Embed(EmbedSpec {
                title: "Welcome".to_owned(),
                description: "Say hi".to_owned(),
                color: EmbedSpec::DEFAULT_COLOR,
                footer: None,
                thumbnail: None,
                image: None,
            })),
        );
        snapshot
    }

    #[tokio::test]
    async fn save_then_load_returns_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("nested").join("sticky-data.json"));

        store.save(&sample()).await.unwrap();
        assert!(!dir.path().join("nested").join("sticky-data.json.tmp").exists());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn file_layout_is_keyed_by_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("sticky-data.json"));
        store.save(&sample()).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let a = &value["!a:example.org"];
        assert_eq!(a["content"]["type"], "text");
        assert_eq!(a["last_message_id"], "$m1");
        assert_eq!(a["last_sent_at"], 1_700_000_000_000_u64);
        assert!(value["!b:example.org"]["last_message_id"].is_null());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_saves_leave_one_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFilePersistence::new(dir.path().join("sticky-data.json")));

        let full = sample();
        let mut partial = sample();
        partial.remove(&ChannelId::from("!b:example.org"));
        let empty = StickySnapshot::new();
        let candidates = [full, partial, empty];

        for _ in 0..50 {
            let mut saves = tokio::task::JoinSet::new();
            for snapshot in candidates.iter().cycle().take(4).cloned() {
                let store = Arc::clone(&store);
                saves.spawn(async move { store.save(&snapshot).await });
            }
            while let Some(result) = saves.join_next().await {
                result.unwrap().unwrap();
            }

            let loaded = store.load().await.unwrap();
            assert!(candidates.contains(&loaded));
            assert!(!dir.path().join("sticky-data.json.tmp").exists());
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sticky-data.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = JsonFilePersistence::new(&path).load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Decode { .. }));
    }
}
