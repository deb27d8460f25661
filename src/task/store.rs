//! Per-task lifecycle state, keyed by `(username, token)`, with sliding TTL.
//!
//! [`TaskStateStore`] is the seam to whatever backs task state (a key-value
//! server in production). [`MemoryTaskStore`] is the in-process version used
//! by the CLI and tests.
//!
//! Semantics every implementation follows:
//!
//! * `create` is idempotent. A second call for the same key resets `status`
//!   to `Received` but never overwrites `filename`.
//! * Every mutation pushes the record's expiry to `now + ttl`.
//! * Reads and updates of an expired record fail with
//!   [`StoreError::NotFound`], and the record is dropped.

use crate::error::StoreError;
use crate::task::status::TaskStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Logical record stored per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub filename: String,
    /// Empty until the task reaches `Done`.
    pub link: String,
}

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    async fn create(
        &self,
        username: &str,
        task_id: &str,
        filename: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        username: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), StoreError>;

    async fn update_link(&self, username: &str, task_id: &str, link: &str)
        -> Result<(), StoreError>;

    async fn get(&self, username: &str, task_id: &str) -> Result<TaskRecord, StoreError>;

    /// Every live task of `username`, keyed by task token.
    async fn list_all(&self, username: &str) -> Result<HashMap<String, TaskRecord>, StoreError>;
}

// ── In-memory implementation ─────────────────────────────────────────────

/// Stand-in for "never" when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug)]
struct Entry {
    record: TaskRecord,
    ttl: Duration,
    expires_at: Instant,
}

impl Entry {
    fn touch(&mut self) {
        self.expires_at = expiry(Instant::now(), self.ttl);
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type UserTasks = HashMap<String, Entry>;

/// Thread-safe in-memory [`TaskStateStore`].
///
/// Each operation holds the lock for a single map lookup and never across an
/// await point.
#[derive(Debug, Default, Clone)]
pub struct MemoryTaskStore {
    users: Arc<Mutex<HashMap<String, UserTasks>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut users = self.users.lock();
        let mut removed = 0;
        for tasks in users.values_mut() {
            let before = tasks.len();
            tasks.retain(|_, e| e.is_live(now));
            removed += before - tasks.len();
        }
        users.retain(|_, tasks| !tasks.is_empty());
        if removed > 0 {
            debug!("Purged {} expired task records", removed);
        }
        removed
    }

    /// Purge expired records every `interval` until the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Mutex<HashMap<String, UserTasks>>> = Arc::downgrade(&self.users);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(users) = weak.upgrade() else {
                    debug!("Task store dropped, sweeper exiting");
                    break;
                };
                MemoryTaskStore { users }.purge_expired();
            }
        })
    }

    /// Total live records across all users.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.users
            .lock()
            .values()
            .map(|t| t.values().filter(|e| e.is_live(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on a live entry. Expired entries are removed and reported as
    /// missing.
    fn with_live<R>(
        &self,
        username: &str,
        task_id: &str,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> Result<R, StoreError> {
        let now = Instant::now();
        let mut users = self.users.lock();
        let tasks = users
            .get_mut(username)
            .ok_or_else(|| not_found(username, task_id))?;

        let live = tasks.get(task_id).map(|e| e.is_live(now));
        match live {
            Some(true) => {}
            Some(false) => {
                tasks.remove(task_id);
                return Err(not_found(username, task_id));
            }
            None => return Err(not_found(username, task_id)),
        }
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| not_found(username, task_id))?;
        Ok(f(entry))
    }
}

fn not_found(username: &str, task_id: &str) -> StoreError {
    StoreError::NotFound {
        username: username.to_string(),
        task_id: task_id.to_string(),
    }
}

#[async_trait]
impl TaskStateStore for MemoryTaskStore {
    async fn create(
        &self,
        username: &str,
        task_id: &str,
        filename: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut users = self.users.lock();
        let tasks = users.entry(username.to_string()).or_default();
        match tasks.get_mut(task_id) {
            Some(entry) if entry.is_live(now) => {
                entry.record.status = TaskStatus::Received;
                entry.ttl = ttl;
                entry.touch();
            }
            _ => {
                tasks.insert(
                    task_id.to_string(),
                    Entry {
                        record: TaskRecord {
                            status: TaskStatus::Received,
                            filename: filename.to_string(),
                            link: String::new(),
                        },
                        ttl,
                        expires_at: expiry(now, ttl),
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        username: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        self.with_live(username, task_id, |entry| {
            entry.record.status = status;
            entry.touch();
        })
    }

    async fn update_link(
        &self,
        username: &str,
        task_id: &str,
        link: &str,
    ) -> Result<(), StoreError> {
        self.with_live(username, task_id, |entry| {
            entry.record.link = link.to_string();
            entry.touch();
        })
    }

    async fn get(&self, username: &str, task_id: &str) -> Result<TaskRecord, StoreError> {
        self.with_live(username, task_id, |entry| entry.record.clone())
    }

    async fn list_all(&self, username: &str) -> Result<HashMap<String, TaskRecord>, StoreError> {
        let now = Instant::now();
        let mut users = self.users.lock();
        let Some(tasks) = users.get_mut(username) else {
            return Ok(HashMap::new());
        };
        tasks.retain(|_, e| e.is_live(now));
        Ok(tasks
            .iter()
            .map(|(id, e)| (id.clone(), e.record.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn create_is_idempotent_and_keeps_filename() {
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", TTL).await.unwrap();
        store.update_status("u", "t", TaskStatus::Translating).await.unwrap();
        store.create("u", "t", "b.pdf", TTL).await.unwrap();

        let rec = store.get("u", "t").await.unwrap();
        assert_eq!(rec.filename, "a.pdf");
        assert_eq!(rec.status, TaskStatus::Received);
        assert!(rec.link.is_empty());
    }

    #[tokio::test]
    async fn updates_on_missing_record_fail() {
        let store = MemoryTaskStore::new();
        let err = store.update_status("u", "nope", TaskStatus::Done).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.update_link("u", "nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn link_and_status_are_independent() {
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", TTL).await.unwrap();
        store.update_link("u", "t", "http://x/mds/respMd-1.md").await.unwrap();
        store.update_status("u", "t", TaskStatus::Done).await.unwrap();
        let rec = store.get("u", "t").await.unwrap();
        assert_eq!(rec.status, TaskStatus::Done);
        assert_eq!(rec.link, "http://x/mds/respMd-1.md");
        assert_eq!(rec.filename, "a.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl() {
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", TTL).await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(store.get("u", "t").await.is_err());
        assert!(matches!(
            store.update_status("u", "t", TaskStatus::Error).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_ttl_never_expires() {
        let ttl = crate::config::PipelineConfig::builder()
            .task_ttl_secs(u64::MAX)
            .build()
            .unwrap()
            .task_ttl();
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", ttl).await.unwrap();
        store.update_status("u", "t", TaskStatus::Translating).await.unwrap();
        store.update_link("u", "t", "https://dl/x.md").await.unwrap();
        assert_eq!(store.get("u", "t").await.unwrap().link, "https://dl/x.md");
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_slide_the_expiry() {
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        store.update_status("u", "t", TaskStatus::Translating).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        let rec = store.get("u", "t").await.unwrap();
        assert_eq!(rec.status, TaskStatus::Translating);
    }

    #[tokio::test(start_paused = true)]
    async fn list_all_drops_expired_entries() {
        let store = MemoryTaskStore::new();
        store.create("u", "old", "old.pdf", Duration::from_secs(10)).await.unwrap();
        store.create("u", "new", "new.pdf", TTL).await.unwrap();
        store.create("other", "x", "x.pdf", TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let listed = store.list_all("u").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key("new"));
        assert_eq!(store.len(), 2);
        assert!(store.list_all("nobody").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_in_background() {
        let store = MemoryTaskStore::new();
        store.create("u", "t", "a.pdf", Duration::from_secs(5)).await.unwrap();
        let sweeper = store.spawn_sweeper(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.users.lock().is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(sweeper.is_finished());
    }
}
