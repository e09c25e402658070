//! Task repository over the per-user document, with a read cache and realtime snapshots.

use std::sync::Arc;

use dashmap::DashMap;
use db::models::{
    task::{Task, TaskValidationError},
    user::UserDocument,
};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

/// Snapshots buffered per subscriber before it starts lagging.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum TaskRepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user document not found")]
    UserNotFound,
    #[error("task not found")]
    TaskNotFound,
    #[error(transparent)]
    Validation(#[from] TaskValidationError),
}

#[derive(Clone)]
pub struct TaskRepo {
    pool: SqlitePool,
    cache: Arc<DashMap<String, Vec<Task>>>,
    channels: Arc<DashMap<String, broadcast::Sender<Vec<Task>>>>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// All tasks of `uid`; a missing user document reads as an empty list.
    pub async fn get_all_tasks(&self, uid: &str) -> Result<Vec<Task>, TaskRepoError> {
        if let Some(tasks) = self.cached(uid) {
            return Ok(tasks);
        }

        let lock = self.write_lock(uid);
        let result = {
            let _guard = lock.lock().await;
            self.load(uid).await
        };
        self.release_lock(uid, lock);
        result
    }

    /// Replaces the task with the same id, or appends it.
    pub async fn upsert_task(&self, uid: &str, task: Task) -> Result<Task, TaskRepoError> {
        let lock = self.write_lock(uid);
        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(uid, task).await
        };
        self.release_lock(uid, lock);
        result
    }

    async fn upsert_locked(&self, uid: &str, task: Task) -> Result<Task, TaskRepoError> {
        let mut tasks = self.load(uid).await?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.write(uid, tasks).await?;
        info!(uid = %uid, task_id = %task.id, "Upserted task");
        Ok(task)
    }

    /// Applies `edit` to the task with `task_id` and persists the result.
    pub async fn update_task<F>(
        &self,
        uid: &str,
        task_id: &str,
        edit: F,
    ) -> Result<Task, TaskRepoError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskValidationError>,
    {
        let lock = self.write_lock(uid);
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(uid, task_id, edit).await
        };
        self.release_lock(uid, lock);
        result
    }

    async fn update_locked<F>(
        &self,
        uid: &str,
        task_id: &str,
        edit: F,
    ) -> Result<Task, TaskRepoError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskValidationError>,
    {
        let mut tasks = self.load(uid).await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(TaskRepoError::TaskNotFound)?;
        edit(task)?;
        let updated = task.clone();
        self.write(uid, tasks).await?;
        info!(uid = %uid, task_id = %task_id, "Updated task");
        Ok(updated)
    }

    /// Returns whether a task was removed. Nothing is written when the id is unknown.
    pub async fn delete_task(&self, uid: &str, task_id: &str) -> Result<bool, TaskRepoError> {
        let lock = self.write_lock(uid);
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(uid, task_id).await
        };
        self.release_lock(uid, lock);
        result
    }

    async fn delete_locked(&self, uid: &str, task_id: &str) -> Result<bool, TaskRepoError> {
        let mut tasks = self.load(uid).await?;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            debug!(uid = %uid, task_id = %task_id, "Delete of unknown task ignored");
            return Ok(false);
        }
        self.write(uid, tasks).await?;
        info!(uid = %uid, task_id = %task_id, "Deleted task");
        Ok(true)
    }

    pub async fn replace_all(&self, uid: &str, tasks: Vec<Task>) -> Result<(), TaskRepoError> {
        let lock = self.write_lock(uid);
        let result = {
            let _guard = lock.lock().await;
            let count = tasks.len();
            self.write(uid, tasks)
                .await
                .inspect(|_| info!(uid = %uid, task_count = count, "Replaced task list"))
        };
        self.release_lock(uid, lock);
        result
    }

    /// Receiver of whole-list snapshots for `uid`, one per successful write.
    /// The task list of a subscribed user stays cached until [`Self::unsubscribe`].
    pub fn subscribe(&self, uid: &str) -> broadcast::Receiver<Vec<Task>> {
        self.channels
            .entry(uid.to_string())
            .or_insert_with(|| broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drops the channel, cache entry and idle write lock once nobody listens any more.
    pub fn unsubscribe(&self, uid: &str) {
        let removed = self
            .channels
            .remove_if(uid, |_, tx| tx.receiver_count() == 0)
            .is_some();
        if removed {
            self.cache.remove(uid);
            self.write_locks.remove_if(uid, |_, lock| Arc::strong_count(lock) == 1);
            debug!(uid = %uid, "Removed idle task subscription");
        }
    }

    pub fn subscriber_count(&self, uid: &str) -> usize {
        self.channels
            .get(uid)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Whether `uid` still has a snapshot channel.
    pub fn is_watched(&self, uid: &str) -> bool {
        self.channels.contains_key(uid)
    }

    fn cached(&self, uid: &str) -> Option<Vec<Task>> {
        self.cache.get(uid).map(|tasks| tasks.clone())
    }

    fn write_lock(&self, uid: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(uid.to_string())
            .or_default()
            .clone()
    }

    /// Drops our handle and evicts the lock when no other caller holds or waits on it.
    fn release_lock(&self, uid: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.write_locks.remove_if(uid, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Current list of `uid`. Caller holds the write lock for `uid`.
    async fn load(&self, uid: &str) -> Result<Vec<Task>, TaskRepoError> {
        if let Some(tasks) = self.cached(uid) {
            return Ok(tasks);
        }
        let tasks = UserDocument::find_tasks(&self.pool, uid)
            .await?
            .unwrap_or_default();
        if self.is_watched(uid) {
            debug!(uid = %uid, task_count = tasks.len(), "Loaded tasks into cache");
            self.cache.insert(uid.to_string(), tasks.clone());
        }
        Ok(tasks)
    }

    /// Persists `tasks` and publishes the snapshot. Caller holds the write lock for `uid`.
    async fn write(&self, uid: &str, tasks: Vec<Task>) -> Result<(), TaskRepoError> {
        let affected = UserDocument::replace_tasks(&self.pool, uid, &tasks).await?;
        if affected == 0 {
            return Err(TaskRepoError::UserNotFound);
        }
        // An existing entry is kept current even if its subscription just went away.
        if self.is_watched(uid) || self.cache.contains_key(uid) {
            self.cache.insert(uid.to_string(), tasks.clone());
        }
        let sender = self.channels.get(uid).map(|tx| tx.clone());
        if let Some(tx) = sender {
            // No receivers is fine; the snapshot is simply not delivered.
            let _ = tx.send(tasks);
        }
        Ok(())
    }
}
