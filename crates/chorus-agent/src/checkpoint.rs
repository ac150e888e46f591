//! Thread checkpoints
//!
//! A checkpoint is written whenever a thread yields: on suspension and on
//! completion. Failed runs write nothing, so a thread always reloads from
//! its last yield point.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::state::{ConversationState, ThreadId};

/// Where a thread stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Waiting for human input
    Suspended { prompt: String },
    /// The last run reached the terminal node
    Done,
}

/// Persisted thread snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: ConversationState,
    #[serde(flatten)]
    pub status: ThreadStatus,
    /// Unix timestamp (milliseconds) of the write
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, state: ConversationState, status: ThreadStatus) -> Self {
        Self {
            thread_id,
            state,
            status,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.status, ThreadStatus::Suspended { .. })
    }
}

/// Storage for thread checkpoints keyed by thread id
pub trait CheckpointStore: Send + Sync {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>>;

    /// Replace the thread's checkpoint
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove a thread; returns whether it existed
    fn delete(&self, thread_id: &ThreadId) -> Result<bool>;

    /// All stored thread ids, sorted
    fn list(&self) -> Result<Vec<ThreadId>>;
}

/// Process-local checkpoint store
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<ThreadId, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        Ok(self.threads.read().get(thread_id).cloned())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.threads
            .write()
            .insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, thread_id: &ThreadId) -> Result<bool> {
        Ok(self.threads.write().remove(thread_id).is_some())
    }

    fn list(&self) -> Result<Vec<ThreadId>> {
        let mut ids: Vec<_> = self.threads.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON file per thread under a directory
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default location: `<data_local_dir>/chorus/threads`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("chorus").join("threads"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        self.dir.join(format!("{}.json", thread_id.as_str()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let path = self.path_for(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.thread_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(thread_id = %checkpoint.thread_id, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    fn delete(&self, thread_id: &ThreadId) -> Result<bool> {
        let path = self.path_for(thread_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<ThreadId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ThreadId::parse(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Storage handed to the graph: thread checkpoints plus long-term memory
#[derive(Clone)]
pub struct Persistence {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub memory: Arc<MemoryStore>,
}

impl Persistence {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, memory: Arc<MemoryStore>) -> Self {
        Self {
            checkpoints,
            memory,
        }
    }

    /// Everything kept in process memory
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(MemoryStore::new()),
        )
    }
}
