//! Conversation store: the ordered, persisted turn history.
//!
//! The in-memory copy is authoritative. Every mutation is mirrored to a JSON
//! file (write to temp, then rename); a failed write is logged and the
//! in-memory change stands.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result};
use crate::types::ConversationTurn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    turns: Vec<ConversationTurn>,
}

#[derive(Debug, Default)]
struct HistoryState {
    turns: Vec<ConversationTurn>,
    /// Bumped on every mutation; orders writes to disk.
    revision: u64,
    /// Bumped when the history is cleared or replaced wholesale.
    epoch: u64,
}

/// Position in the history captured together with a snapshot.
///
/// Used to merge a compaction summary back without dropping turns appended
/// while the summary was being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryMark {
    epoch: u64,
    len: usize,
}

impl HistoryMark {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct HistoryStore {
    state: RwLock<HistoryState>,
    path: Option<PathBuf>,
    /// Revision most recently written (or attempted) to disk.
    written: Mutex<u64>,
}

impl HistoryStore {
    /// Open the store backed by `path`. A missing or unreadable file yields
    /// an empty history.
    pub async fn open(path: PathBuf) -> Self {
        let turns = match load_file(&path).await {
            Ok(turns) => {
                info!(path = %path.display(), turns = turns.len(), "Loaded conversation history");
                turns
            }
            Err(e) => {
                warn!(path = %path.display(), %e, "Starting with empty history");
                Vec::new()
            }
        };
        Self {
            state: RwLock::new(HistoryState {
                turns,
                ..Default::default()
            }),
            path: Some(path),
            written: Mutex::new(0),
        }
    }

    /// A store with no durable mirror.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(HistoryState::default()),
            path: None,
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one turn. Returns the new history length.
    pub async fn append(&self, turn: ConversationTurn) -> usize {
        self.append_all(vec![turn]).await
    }

    /// Append several turns as one mutation, so no concurrent append can
    /// interleave with them. Returns the new history length.
    pub async fn append_all(&self, turns: Vec<ConversationTurn>) -> usize {
        let (len, revision, snapshot) = {
            let mut state = self.state.write().await;
            state.turns.extend(turns);
            state.revision += 1;
            (state.turns.len(), state.revision, state.turns.clone())
        };
        self.persist(revision, snapshot).await;
        len
    }

    pub async fn snapshot(&self) -> Vec<ConversationTurn> {
        self.state.read().await.turns.clone()
    }

    /// Snapshot plus a mark identifying exactly the turns it contains.
    pub async fn snapshot_marked(&self) -> (Vec<ConversationTurn>, HistoryMark) {
        let state = self.state.read().await;
        let mark = HistoryMark {
            epoch: state.epoch,
            len: state.turns.len(),
        };
        (state.turns.clone(), mark)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.turns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.turns.is_empty()
    }

    pub async fn clear(&self) {
        self.replace_all(Vec::new()).await;
    }

    /// Replace the whole history.
    pub async fn replace_all(&self, turns: Vec<ConversationTurn>) {
        let (revision, snapshot) = {
            let mut state = self.state.write().await;
            state.turns = turns;
            state.revision += 1;
            state.epoch += 1;
            (state.revision, state.turns.clone())
        };
        self.persist(revision, snapshot).await;
    }

    /// Replace the turns covered by `mark` with `turns`, keeping anything
    /// appended after the mark was taken.
    ///
    /// Returns `false` (and changes nothing) when the history was cleared or
    /// replaced since the mark was taken.
    pub async fn replace_prefix(&self, mark: HistoryMark, turns: Vec<ConversationTurn>) -> bool {
        let (revision, snapshot) = {
            let mut state = self.state.write().await;
            if state.epoch != mark.epoch || state.turns.len() < mark.len {
                return false;
            }
            let tail = state.turns.split_off(mark.len);
            state.turns = turns;
            state.turns.extend(tail);
            state.revision += 1;
            state.epoch += 1;
            (state.revision, state.turns.clone())
        };
        self.persist(revision, snapshot).await;
        true
    }

    async fn persist(&self, revision: u64, turns: Vec<ConversationTurn>) {
        let Some(path) = &self.path else {
            return;
        };

        let mut written = self.written.lock().await;
        if revision <= *written {
            debug!(revision, "Skipping stale history write");
            return;
        }
        *written = revision;

        if let Err(e) = write_file(path, turns).await {
            warn!(path = %path.display(), %e, "Failed to persist history");
        }
    }
}

async fn load_file(path: &Path) -> Result<Vec<ConversationTurn>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path).await?;
    let file: HistoryFile = serde_json::from_str(&data)?;
    Ok(file.turns)
}

async fn write_file(path: &Path, turns: Vec<ConversationTurn>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ParleyError::Persistence(format!("{}: {e}", parent.display())))?;
    }
    let data = serde_json::to_string_pretty(&HistoryFile { turns })?;
    // Atomic write: write to temp then rename
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data.as_bytes())
        .await
        .map_err(|e| ParleyError::Persistence(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ParleyError::Persistence(format!("{}: {e}", path.display())))?;
    Ok(())
}
