//! Rolling decision memory backed by a JSON Lines log.
//!
//! [`DecisionMemory`] is owned explicitly and shared through `Arc`; it has no
//! global state. Entries are appended in insertion order and never rewritten.
//! A persistent memory writes each entry to its log before it becomes visible
//! in memory, so a failed write leaves both views unchanged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::decision::Decision;
use crate::error::MemoryError;

/// Default number of recent decisions shown to the model.
pub const DEFAULT_MEMORY_WINDOW: usize = 8;

/// Longest action text shown per prompt line, in characters.
const MAX_ACTION_CHARS: usize = 80;

/// One archived decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// The evaluated action.
    pub action: String,
    /// The context it was evaluated in.
    pub context: String,
    /// The decision reached.
    pub decision: Decision,
    /// When the decision was archived.
    pub recorded_at: DateTime<Utc>,
}

struct MemoryInner {
    entries: Vec<MemoryEntry>,
    log: Option<File>,
}

/// Append-only store of past decisions.
pub struct DecisionMemory {
    path: Option<PathBuf>,
    window: usize,
    inner: Mutex<MemoryInner>,
}

impl DecisionMemory {
    /// An ephemeral memory that is lost when dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            window: DEFAULT_MEMORY_WINDOW,
            inner: Mutex::new(MemoryInner { entries: Vec::new(), log: None }),
        }
    }

    /// Open (or create) the log at `path`, loading every entry it holds.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| MemoryError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_log(&path, &contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(e)),
        };

        let log = OpenOptions::new().create(true).append(true).open(&path).await.map_err(io_error)?;

        info!(path = %path.display(), entries = entries.len(), "decision memory opened");
        Ok(Self {
            path: Some(path),
            window: DEFAULT_MEMORY_WINDOW,
            inner: Mutex::new(MemoryInner { entries, log: Some(log) }),
        })
    }

    /// Use `window` as the size of [`recent_window`](Self::recent_window).
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// The configured memory window.
    pub fn window(&self) -> usize {
        self.window
    }

    /// The backing log, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Archive a decision.
    pub async fn record(
        &self,
        action: &str,
        context: &str,
        decision: &Decision,
    ) -> Result<MemoryEntry, MemoryError> {
        let entry = MemoryEntry {
            action: action.to_string(),
            context: context.to_string(),
            decision: decision.clone(),
            recorded_at: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        if let (Some(log), Some(path)) = (inner.log.as_mut(), self.path.as_ref()) {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            let io_error = |source| {
                error!(path = %path.display(), error = %source, "memory append failed");
                MemoryError::Io { path: path.clone(), source }
            };
            log.write_all(line.as_bytes()).await.map_err(io_error)?;
            log.flush().await.map_err(io_error)?;
        }
        inner.entries.push(entry.clone());
        debug!(entries = inner.entries.len(), decision = %decision.decision, "decision recorded");
        Ok(entry)
    }

    /// The last `n` entries, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        let inner = self.inner.lock().await;
        let start = inner.entries.len().saturating_sub(n);
        inner.entries[start..].to_vec()
    }

    /// The last [`window`](Self::window) entries, oldest first.
    pub async fn recent_window(&self) -> Vec<MemoryEntry> {
        self.recent(self.window).await
    }

    /// Every entry, oldest first.
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }
}

fn parse_log(path: &Path, contents: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| MemoryError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Render entries for the prompt, one `{i}. [{decision}] {action}` line each.
pub fn format_for_prompt(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return "No prior decisions recorded.".to_string();
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| format!("{}. [{}] {}", i + 1, entry.decision.decision, truncate(&entry.action)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(action: &str) -> String {
    let action = action.trim();
    match action.char_indices().nth(MAX_ACTION_CHARS) {
        Some((cut, _)) => format!("{}...", &action[..cut]),
        None => action.to_string(),
    }
}
