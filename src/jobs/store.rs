use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

use crate::error::{HistoryError, HistoryResult};
use crate::models::Job;

/// In-memory job records, one `watch` cell per job.
///
/// Writers replace the whole record under the cell's lock; readers get clones.
/// Status changes must follow `JobStatus::can_transition_to` and progress never
/// moves backwards.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, watch::Sender<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        let (tx, _rx) = watch::channel(job.clone());
        self.jobs.write().await.insert(job.id, tx);
    }

    pub async fn snapshot(&self, id: &str) -> HistoryResult<Job> {
        let jobs = self.jobs.read().await;
        let cell = jobs
            .get(id)
            .ok_or_else(|| HistoryError::NotFound(format!("job {}", id)))?;
        let job = cell.borrow().clone();
        Ok(job)
    }

    pub async fn subscribe(&self, id: &str) -> HistoryResult<watch::Receiver<Job>> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| HistoryError::NotFound(format!("job {}", id)))
    }

    /// Apply `change` to a copy of the record and publish it if the transition is legal.
    pub async fn update<F>(&self, id: &str, change: F) -> HistoryResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let jobs = self.jobs.read().await;
        let cell = jobs
            .get(id)
            .ok_or_else(|| HistoryError::NotFound(format!("job {}", id)))?;

        let mut outcome = Ok(());
        cell.send_if_modified(|current| {
            let mut next = current.clone();
            change(&mut next);
            if !current.status.can_transition_to(next.status) {
                outcome = Err(HistoryError::InvalidTransition {
                    from: current.status.to_string(),
                    to: next.status.to_string(),
                });
                return false;
            }
            next.progress = next.progress.max(current.progress).min(100);
            *current = next;
            true
        });
        outcome?;

        let job = cell.borrow().clone();
        Ok(job)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, JobStatus, ReportRequest, Source};

    fn pending(id: &str) -> Job {
        let request = ReportRequest {
            source: Source::Sleeper,
            league_id: "42".to_string(),
            identity: Identity::username("mike"),
            start_year: None,
            end_year: None,
        };
        Job::pending(id.to_string(), &request)
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let store = JobStore::new();
        store.insert(pending("a")).await;

        store
            .update("a", |job| {
                job.status = JobStatus::Running;
                job.progress = 40;
            })
            .await
            .unwrap();
        let job = store.update("a", |job| job.progress = 10).await.unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(store.snapshot("a").await.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_rejected() {
        let store = JobStore::new();
        store.insert(pending("a")).await;

        let err = store.update("a", |job| job.status = JobStatus::Completed).await;
        assert!(matches!(err, Err(HistoryError::InvalidTransition { .. })));
        assert_eq!(store.snapshot("a").await.unwrap().status, JobStatus::Pending);

        store.update("a", |job| job.status = JobStatus::Running).await.unwrap();
        store.update("a", |job| job.status = JobStatus::Failed).await.unwrap();
        let err = store.update("a", |job| job.status = JobStatus::Running).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = JobStore::new();
        assert!(matches!(store.snapshot("nope").await, Err(HistoryError::NotFound(_))));
        assert!(store.subscribe("nope").await.is_err());
        assert_eq!(store.len().await, 0);
    }
}
