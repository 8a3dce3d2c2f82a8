//! Filesystem-backed [`CheckpointStore`]: append-only, versioned files under a configured
//! directory, written atomically via temp-file-then-rename so a crash mid-write never
//! corrupts the previous checkpoint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::domain::Checkpoint;
use crate::ports::CheckpointStore;

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn file_name(timestamp_millis: i64) -> String {
        format!("{timestamp_millis:020}.json")
    }

    async fn latest_file(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                names.push(entry.path());
            }
        }
        names.sort();
        Ok(names.into_iter().next_back())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let dir = self.session_dir(&checkpoint.session_id);
        fs::create_dir_all(&dir).await?;

        let file_name = Self::file_name(checkpoint.taken_at.timestamp_millis());
        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!("{file_name}.tmp"));

        let json = serde_json::to_vec_pretty(checkpoint)?;
        fs::write(&tmp_path, &json).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    async fn load_latest(&self, session_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        let dir = self.session_dir(session_id);
        let Some(path) = Self::latest_file(&dir).await? else {
            return Ok(None);
        };
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(?path, %err, "failed to read checkpoint file");
                return Ok(None);
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(err) => {
                tracing::warn!(?path, %err, "corrupt checkpoint, ignoring");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::domain::budget::BudgetPoolState;
    use crate::domain::checkpoint::{AggregatedStats, Phase, QueueSnapshot};
    use crate::domain::{SharedContext, SharedEconomics};

    fn sample_checkpoint(session_id: &str) -> Checkpoint {
        Checkpoint {
            session_id: session_id.into(),
            taken_at: Utc::now(),
            phase: Phase::WaveLoop,
            plan: None,
            queue: QueueSnapshot { tasks: vec![], current_wave: 0, wave_membership: HashMap::new() },
            stats: AggregatedStats::default(),
            health_records: vec![],
            budget: BudgetPoolState {
                total_tokens_budget: 1000,
                total_cost_budget: 10.0,
                deadline: None,
                tokens_used: 0,
                cost_used: 0.0,
                tokens_reserved: 0,
                cost_reserved: 0.0,
            },
            decision_log: vec![],
            error_log: vec![],
            original_prompt: "do the thing".into(),
            shared_context: SharedContext::default(),
            shared_economics: SharedEconomics::default(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let checkpoint = sample_checkpoint("session-1");
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load_latest("session-1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "session-1");
        assert_eq!(loaded.original_prompt, "do the thing");
    }

    #[tokio::test]
    async fn load_latest_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load_latest("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_returns_none_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let session_dir = dir.path().join("broken");
        fs::create_dir_all(&session_dir).await.unwrap();
        fs::write(session_dir.join("00000000000000000001.json"), b"not json").await.unwrap();

        assert!(store.load_latest("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_save_is_the_one_loaded() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let mut first = sample_checkpoint("session-2");
        first.original_prompt = "first".into();
        store.save(&first).await.unwrap();

        let mut second = sample_checkpoint("session-2");
        second.taken_at = first.taken_at + chrono::Duration::milliseconds(1);
        second.original_prompt = "second".into();
        store.save(&second).await.unwrap();

        let loaded = store.load_latest("session-2").await.unwrap().unwrap();
        assert_eq!(loaded.original_prompt, "second");
    }
}
