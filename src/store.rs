//! `scores.json`: query id -> role -> list of score results.
//!
//! Every update is a read-merge-write of the whole file so that entries
//! written by an earlier run (or an earlier record) are never lost. Under
//! concurrency all updates for one file go through a single [`ScoreWriter`].

use chrono::Local;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::{CrasError, Result};
use crate::scorer::ScoreResult;

pub const SCORES_FILE: &str = "scores.json";

pub type RoleScores = BTreeMap<String, Vec<ScoreResult>>;
pub type ScoreMap = BTreeMap<String, RoleScores>;

/// Number of results stored for `query_id`, summed over roles.
pub fn scored_count(map: &ScoreMap, query_id: &str) -> usize {
    map.get(query_id)
        .map(|roles| roles.values().map(Vec::len).sum())
        .unwrap_or(0)
}

/// Read the store. A missing file is an empty store; a malformed one is moved
/// aside to `scores.json.corrupt-<timestamp>` and also treated as empty.
pub fn load_scores(path: &Path) -> Result<ScoreMap> {
    load_or_recover(path).map(|(map, _)| map)
}

/// Like [`load_scores`], also returning where a corrupt file was moved to.
pub fn load_or_recover(path: &Path) -> Result<(ScoreMap, Option<PathBuf>)> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((ScoreMap::new(), None)),
        Err(e) => return Err(CrasError::io(path, e)),
    };
    match serde_json::from_str(&raw) {
        Ok(map) => Ok((map, None)),
        Err(e) => {
            let backup = corrupt_backup_path(path);
            log::warn!(
                "{} is not a valid score store ({e}); moving it to {} and starting fresh",
                path.display(),
                backup.display()
            );
            fs::rename(path, &backup).map_err(|e| CrasError::io(path, e))?;
            Ok((ScoreMap::new(), Some(backup)))
        }
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let ts = Local::now().format("%Y%m%d-%H%M%S%3f");
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| SCORES_FILE.to_string());
    path.with_file_name(format!("{name}.corrupt-{ts}"))
}

/// Write the whole store atomically (temp file, then rename).
pub fn save_scores(path: &Path, map: &ScoreMap) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(map)?;
    fs::write(&tmp, body).map_err(|e| CrasError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CrasError::io(path, e))?;
    Ok(())
}

/// Read the latest on-disk state, append `result` under `query_id`/`role`, write back.
pub fn append_score(path: &Path, query_id: &str, role: &str, result: ScoreResult) -> Result<ScoreMap> {
    let mut map = load_scores(path)?;
    map.entry(query_id.to_string())
        .or_default()
        .entry(role.to_string())
        .or_default()
        .push(result);
    save_scores(path, &map)?;
    Ok(map)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub query_id: String,
    pub role: String,
    pub result: ScoreResult,
}

/// Sending half handed to scoring workers.
#[derive(Debug, Clone)]
pub struct ScoreSender {
    tx: mpsc::UnboundedSender<ScoreUpdate>,
}

impl ScoreSender {
    pub fn send(&self, update: ScoreUpdate) -> Result<()> {
        self.tx.send(update).map_err(|_| CrasError::WriterStopped)
    }
}

/// The only task allowed to touch one `scores.json` while a pool is running.
pub struct ScoreWriter {
    handle: JoinHandle<Result<usize>>,
}

impl ScoreWriter {
    pub fn spawn(path: impl Into<PathBuf>) -> (ScoreSender, Self) {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ScoreUpdate>();
        let handle = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            while let Some(u) = rx.blocking_recv() {
                append_score(&path, &u.query_id, &u.role, u.result)?;
                written += 1;
                log::debug!("stored score for '{}' / '{}' in {}", u.query_id, u.role, path.display());
            }
            Ok(written)
        });
        (ScoreSender { tx }, Self { handle })
    }

    /// Wait until every queued update is on disk. All senders must be dropped
    /// first or this never returns.
    pub async fn finish(self) -> Result<usize> {
        self.handle.await.map_err(|e| CrasError::Io {
            path: PathBuf::from(SCORES_FILE),
            source: io::Error::new(io::ErrorKind::Other, format!("score writer panicked: {e}")),
        })?
    }
}
