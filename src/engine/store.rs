use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::{
    error::StoreError,
    models::{Submission, SubmissionStatus, Verdict},
};

/// Keyed submission storage. Readers may call `get` at any time; status
/// changes go through `compare_and_swap_status` and `complete`, which refuse
/// any transition the state machine does not allow.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn put(&self, submission: Submission) -> Result<(), StoreError>;

    async fn get(&self, id: &Uuid) -> Option<Submission>;

    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: SubmissionStatus,
        next: SubmissionStatus,
    ) -> Result<Submission, StoreError>;

    /// Moves a `Processing` submission to the verdict's terminal status.
    async fn complete(&self, id: Uuid, verdict: Verdict) -> Result<Submission, StoreError>;
}

#[derive(Clone)]
pub struct InMemorySubmissionStore {
    records: Arc<DashMap<Uuid, Submission>>,
    persistence_path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl InMemorySubmissionStore {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn persist(&self, record: &Submission) {
        let Some(path) = &self.persistence_path else {
            return;
        };
        let _guard = self.write_lock.lock().await;
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(submission_id = %record.id, error = %err, "failed to encode record");
                return;
            }
        };
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        match options.open(path).await {
            Ok(mut file) => {
                let mut buf = line.into_bytes();
                buf.push(b'\n');
                if let Err(err) = tokio::io::AsyncWriteExt::write_all(&mut file, &buf).await {
                    tracing::warn!(path = %path.display(), error = %err, "failed to persist record");
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to open results log");
            }
        }
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn put(&self, submission: Submission) -> Result<(), StoreError> {
        match self.records.entry(submission.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(submission.id)),
            Entry::Vacant(slot) => {
                slot.insert(submission);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &Uuid) -> Option<Submission> {
        self.records.get(id).map(|e| e.value().clone())
    }

    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: SubmissionStatus,
        next: SubmissionStatus,
    ) -> Result<Submission, StoreError> {
        if !expected.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                from: expected,
                to: next,
            });
        }
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status != expected {
            return Err(StoreError::StatusConflict {
                id,
                expected,
                actual: entry.status,
            });
        }
        entry.status = next;
        if next.is_terminal() {
            entry.completed_at = Some(Utc::now());
        }
        Ok(entry.clone())
    }

    async fn complete(&self, id: Uuid, verdict: Verdict) -> Result<Submission, StoreError> {
        let snapshot = {
            let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if !entry.status.can_transition_to(verdict.status) || !verdict.status.is_terminal() {
                return Err(StoreError::IllegalTransition {
                    from: entry.status,
                    to: verdict.status,
                });
            }
            entry.status = verdict.status;
            entry.stdout = verdict.stdout;
            entry.stderr = verdict.stderr;
            entry.exit_code = verdict.exit_code;
            entry.execution_time_ms = verdict.execution_time_ms;
            entry.truncated = verdict.truncated;
            entry.completed_at = Some(Utc::now());
            entry.clone()
        };
        self.persist(&snapshot).await;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemorySubmissionStore, SubmissionStore};
    use crate::engine::{
        error::StoreError,
        models::{Submission, SubmissionStatus, Verdict},
    };

    fn submission() -> Submission {
        Submission::new(3, "print(1+1)".into(), String::new(), 5.0, 256_000)
    }

    fn completed() -> Verdict {
        Verdict {
            status: SubmissionStatus::Completed,
            stdout: "2\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            execution_time_ms: Some(5),
            truncated: false,
        }
    }

    #[tokio::test]
    async fn only_one_claim_wins() {
        let store = InMemorySubmissionStore::new(None);
        let s = submission();
        let id = s.id;
        store.put(s).await.unwrap();

        store
            .compare_and_swap_status(id, SubmissionStatus::InQueue, SubmissionStatus::Processing)
            .await
            .unwrap();
        let second = store
            .compare_and_swap_status(id, SubmissionStatus::InQueue, SubmissionStatus::Processing)
            .await;
        assert!(matches!(second, Err(StoreError::StatusConflict { .. })));
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected() {
        let store = InMemorySubmissionStore::new(None);
        let s = submission();
        store.put(s.clone()).await.unwrap();
        assert!(matches!(store.put(s).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn complete_requires_processing_and_is_final() {
        let store = InMemorySubmissionStore::new(None);
        let s = submission();
        let id = s.id;
        store.put(s).await.unwrap();

        let early = store.complete(id, completed()).await;
        assert!(matches!(early, Err(StoreError::IllegalTransition { .. })));

        store
            .compare_and_swap_status(id, SubmissionStatus::InQueue, SubmissionStatus::Processing)
            .await
            .unwrap();
        let done = store.complete(id, completed()).await.unwrap();
        assert_eq!(done.status, SubmissionStatus::Completed);
        assert!(done.completed_at.is_some());

        let again = store.complete(id, Verdict::error("late")).await;
        assert!(matches!(again, Err(StoreError::IllegalTransition { .. })));

        let first = store.get(&id).await.unwrap();
        let second = store.get(&id).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn backward_transitions_are_illegal() {
        let store = InMemorySubmissionStore::new(None);
        let err = store
            .compare_and_swap_status(
                uuid::Uuid::new_v4(),
                SubmissionStatus::Processing,
                SubmissionStatus::InQueue,
            )
            .await;
        assert!(matches!(err, Err(StoreError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn terminal_records_are_appended_to_results_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let store = InMemorySubmissionStore::new(Some(path.clone()));
        let s = submission();
        let id = s.id;
        store.put(s).await.unwrap();
        store
            .compare_and_swap_status(id, SubmissionStatus::InQueue, SubmissionStatus::Processing)
            .await
            .unwrap();
        store.complete(id, completed()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["submission_id"], id.to_string());
        assert_eq!(line["status"], "Completed");
    }
}
