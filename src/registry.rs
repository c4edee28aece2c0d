//! In-memory task registry
//!
//! The registry is created once at process start and handed to both the
//! submission service and the pipeline. Records live only as long as the
//! process; terminal records are evicted according to `RegistryConfig`.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{Result, SubtitlerError};
use crate::task::{Artifacts, TaskId, TaskRecord, TaskState, TaskStatus};

#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    config: RegistryConfig,
}

impl TaskRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a fresh record and return whatever the eviction policy dropped
    pub fn insert(&self, record: TaskRecord) -> Result<Vec<TaskRecord>> {
        let mut tasks = self.write();
        if tasks.contains_key(&record.id) {
            return Err(SubtitlerError::Internal(format!("Task id {} already registered", record.id)));
        }
        let evicted = Self::evict(&mut tasks, &self.config);
        tasks.insert(record.id, record);
        Ok(evicted)
    }

    /// Apply the eviction policy without inserting anything
    pub fn prune(&self) -> Vec<TaskRecord> {
        let mut tasks = self.write();
        Self::evict(&mut tasks, &self.config)
    }

    fn evict(tasks: &mut HashMap<TaskId, TaskRecord>, config: &RegistryConfig) -> Vec<TaskRecord> {
        let mut evicted = Vec::new();

        if let Some(retention) = config.retention_secs {
            let cutoff = Utc::now() - ChronoDuration::seconds(retention as i64);
            let expired: Vec<TaskId> = tasks
                .values()
                .filter(|r| r.state.is_terminal() && r.finished_at.is_some_and(|f| f < cutoff))
                .map(|r| r.id)
                .collect();
            for id in expired {
                evicted.extend(tasks.remove(&id));
            }
        }

        // Leave room for the record about to be inserted
        if tasks.len() >= config.max_tasks {
            let mut terminal: Vec<(chrono::DateTime<Utc>, TaskId)> = tasks
                .values()
                .filter(|r| r.state.is_terminal())
                .map(|r| (r.finished_at.unwrap_or(r.created_at), r.id))
                .collect();
            terminal.sort_by_key(|(finished, _)| *finished);

            let excess = tasks.len() + 1 - config.max_tasks;
            for (_, id) in terminal.into_iter().take(excess) {
                evicted.extend(tasks.remove(&id));
            }
            if tasks.len() >= config.max_tasks {
                warn!("Task registry holds {} active tasks, above the cap of {}", tasks.len(), config.max_tasks);
            }
        }

        if !evicted.is_empty() {
            debug!("Evicted {} terminal task records", evicted.len());
        }
        evicted
    }

    pub fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        self.read().get(id).cloned().ok_or(SubtitlerError::TaskNotFound(*id))
    }

    pub fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.read()
            .get(id)
            .map(TaskRecord::status)
            .ok_or(SubtitlerError::TaskNotFound(*id))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn with_record<T>(&self, id: &TaskId, f: impl FnOnce(&mut TaskRecord) -> Result<T>) -> Result<T> {
        let mut tasks = self.write();
        let record = tasks.get_mut(id).ok_or(SubtitlerError::TaskNotFound(*id))?;
        f(record)
    }

    /// Move a non-terminal task to `state`; illegal edges are rejected
    pub fn transition(&self, id: &TaskId, state: TaskState, progress: u8, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_record(id, |record| {
            if !record.state.can_transition_to(state) {
                return Err(SubtitlerError::Internal(format!(
                    "Illegal transition {} -> {} for task {}",
                    record.state, state, record.id
                )));
            }
            record.state = state;
            record.progress = record.progress.max(progress.min(100));
            record.message = message;
            Ok(())
        })
    }

    /// Update progress and message within the current state
    pub fn update_progress(&self, id: &TaskId, progress: u8, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_record(id, |record| {
            if record.state.is_terminal() {
                return Ok(());
            }
            record.progress = record.progress.max(progress.min(100));
            record.message = message;
            Ok(())
        })
    }

    pub fn set_title(&self, id: &TaskId, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        self.with_record(id, |record| {
            record.title = Some(title);
            Ok(())
        })
    }

    pub fn set_local_path(&self, id: &TaskId, path: PathBuf) -> Result<()> {
        self.with_record(id, |record| {
            record.local_path = Some(path);
            Ok(())
        })
    }

    /// Detach the materialized media path so it is cleaned up exactly once
    pub fn take_local_path(&self, id: &TaskId) -> Result<Option<PathBuf>> {
        self.with_record(id, |record| Ok(record.local_path.take()))
    }

    pub fn complete(&self, id: &TaskId, artifacts: Artifacts, warnings: Vec<String>, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_record(id, |record| {
            if !record.state.can_transition_to(TaskState::Completed) {
                return Err(SubtitlerError::Internal(format!(
                    "Cannot complete task {} from state {}",
                    record.id, record.state
                )));
            }
            record.state = TaskState::Completed;
            record.progress = 100;
            record.message = message;
            record.artifacts = Some(artifacts);
            record.warnings = warnings;
            record.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn fail(&self, id: &TaskId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_record(id, |record| {
            if !record.state.can_transition_to(TaskState::Error) {
                return Err(SubtitlerError::Internal(format!(
                    "Cannot fail task {} from state {}",
                    record.id, record.state
                )));
            }
            record.state = TaskState::Error;
            record.message = message;
            record.finished_at = Some(Utc::now());
            Ok(())
        })
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
