//! In-memory registry of sync jobs, one slot per user.
//!
//! Owned by the orchestration layer and passed by reference to whoever
//! starts runs. The sync engine itself never reads or writes it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::download::Progress;
use crate::sync::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    pub report: Option<SyncReport>,
    pub error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("a sync job for {0} is already running")]
    AlreadyRunning(String),

    #[error("no sync job recorded for {0}")]
    NotFound(String),
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a job for `user`. Fails while one is still running;
    /// a finished job is replaced.
    pub fn create(&self, user: &str) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs
            .get(user)
            .is_some_and(|job| job.state == JobState::Running)
        {
            return Err(JobError::AlreadyRunning(user.to_string()));
        }
        jobs.insert(
            user.to_string(),
            JobStatus {
                state: JobState::Running,
                started_at: Utc::now(),
                finished_at: None,
                progress: Progress::default(),
                report: None,
                error: None,
            },
        );
        Ok(())
    }

    pub fn update(&self, user: &str, progress: Progress) -> Result<(), JobError> {
        self.with_job(user, |job| job.progress = progress)
    }

    pub fn get(&self, user: &str) -> Option<JobStatus> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }

    pub fn complete(&self, user: &str, report: &SyncReport) -> Result<(), JobError> {
        self.with_job(user, |job| {
            job.state = JobState::Completed;
            job.finished_at = Some(Utc::now());
            job.progress = Progress {
                total: report.candidates as u64,
                downloaded: report.downloaded,
                failed: report.failed,
                skipped: report.skipped,
            };
            job.report = Some(report.clone());
        })
    }

    pub fn fail(&self, user: &str, message: impl Into<String>) -> Result<(), JobError> {
        let message = message.into();
        self.with_job(user, |job| {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
            job.error = Some(message);
        })
    }

    fn with_job(&self, user: &str, f: impl FnOnce(&mut JobStatus)) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(user)
            .ok_or_else(|| JobError::NotFound(user.to_string()))?;
        f(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SyncMode;

    fn report() -> SyncReport {
        SyncReport {
            mode: SyncMode::Incremental,
            migrated: 0,
            listed: 10,
            candidates: 3,
            downloaded: 2,
            failed: 1,
            skipped: 0,
            total: 42,
            errors: Vec::new(),
            interrupted: false,
        }
    }

    #[test]
    fn test_one_running_job_per_user() {
        let registry = JobRegistry::new();
        registry.create("alice").unwrap();
        assert_eq!(
            registry.create("alice"),
            Err(JobError::AlreadyRunning("alice".into()))
        );
        registry.create("bob").unwrap();
    }

    #[test]
    fn test_finished_job_can_be_restarted() {
        let registry = JobRegistry::new();
        registry.create("alice").unwrap();
        registry.fail("alice", "listing failed").unwrap();
        let failed = registry.get("alice").unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("listing failed"));

        registry.create("alice").unwrap();
        let job = registry.get("alice").unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_update_and_complete() {
        let registry = JobRegistry::new();
        registry.create("alice").unwrap();
        registry
            .update(
                "alice",
                Progress {
                    total: 3,
                    downloaded: 1,
                    failed: 0,
                    skipped: 0,
                },
            )
            .unwrap();
        assert_eq!(registry.get("alice").unwrap().progress.downloaded, 1);

        registry.complete("alice", &report()).unwrap();
        let job = registry.get("alice").unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress.failed, 1);
        assert_eq!(job.report.unwrap().total, 42);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_unknown_user() {
        let registry = JobRegistry::new();
        assert!(registry.get("nobody").is_none());
        assert_eq!(
            registry.update("nobody", Progress::default()),
            Err(JobError::NotFound("nobody".into()))
        );
    }
}
