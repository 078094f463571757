//! Job registry: named jobs with their own timers.
//!
//! Each started job owns a timer loop that waits on its cadence and a
//! cancellation token. Stopping a job cancels the wait but never an execution
//! already in flight. Task bodies run on their own spawned task, so an error
//! or a panic is recorded on the job and the loop carries on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use studybell_engine::health::JobCounts;

use crate::SchedulerError;
use crate::cadence::Cadence;

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A job body. Called once per firing.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a [`TaskFn`].
pub fn task<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> TaskFuture { Box::pin(f()) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Recurring,
    OneTime,
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Recurring(Cadence),
    At(DateTime<Utc>),
}

impl Schedule {
    fn describe(&self) -> String {
        match self {
            Schedule::Recurring(cadence) => cadence.to_string(),
            Schedule::At(at) => format!("once at {}", at.to_rfc3339()),
        }
    }
}

struct JobEntry {
    kind: JobKind,
    schedule: Schedule,
    task: TaskFn,
    state: JobState,
    cancel: Option<CancellationToken>,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    run_count: u64,
    failure_count: u64,
    last_error: Option<String>,
    /// Set once a one-time or bulk job has started its single execution.
    fired: bool,
}

/// Introspection view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub kind: JobKind,
    pub cadence: String,
    pub state: JobState,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

/// Result of one execution of a job body.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Process-wide set of jobs. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    shutdown: CancellationToken,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a recurring job in the `created` state. Call [`start`](Self::start)
    /// to arm it.
    pub fn register(
        &self,
        name: &str,
        cadence: Cadence,
        task: TaskFn,
    ) -> Result<(), SchedulerError> {
        cadence.validate()?;
        self.insert(name, JobKind::Recurring, Schedule::Recurring(cadence), task)?;
        tracing::info!(job = %name, cadence = %cadence, "Job registered");
        Ok(())
    }

    /// Register and start a job that fires once at `at` and then removes itself.
    pub fn schedule_once(
        &self,
        name: &str,
        at: DateTime<Utc>,
        task: TaskFn,
    ) -> Result<(), SchedulerError> {
        self.insert(name, JobKind::OneTime, Schedule::At(at), task)?;
        self.start(name)
    }

    /// Register and start a bulk job that fires immediately and then removes itself.
    pub fn schedule_bulk(&self, name: &str, task: TaskFn) -> Result<(), SchedulerError> {
        self.insert(name, JobKind::Bulk, Schedule::At(Utc::now()), task)?;
        self.start(name)
    }

    fn insert(
        &self,
        name: &str,
        kind: JobKind,
        schedule: Schedule,
        task: TaskFn,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }
        jobs.insert(
            name.to_string(),
            JobEntry {
                kind,
                schedule,
                task,
                state: JobState::Created,
                cancel: None,
                last_run_at: None,
                next_run_at: None,
                run_count: 0,
                failure_count: 0,
                last_error: None,
                fired: false,
            },
        );
        Ok(())
    }

    /// Arm the job's timer. Starting a running job is a no-op.
    pub fn start(&self, name: &str) -> Result<(), SchedulerError> {
        let (schedule, cancel) = {
            let mut jobs = self.jobs.lock();
            let entry = jobs
                .get_mut(name)
                .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
            if entry.state == JobState::Running {
                return Ok(());
            }
            let cancel = self.shutdown.child_token();
            entry.cancel = Some(cancel.clone());
            entry.state = JobState::Running;
            (entry.schedule, cancel)
        };

        let registry = self.clone();
        let job = name.to_string();
        match schedule {
            Schedule::Recurring(cadence) => {
                tokio::spawn(async move { registry.recurring_loop(job, cadence, cancel).await });
            }
            Schedule::At(at) => {
                tokio::spawn(async move { registry.single_shot(job, at, cancel).await });
            }
        }

        tracing::info!(job = %name, "Job started");
        Ok(())
    }

    /// Prevent future firings. An execution already in flight completes.
    pub fn stop(&self, name: &str) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        if let Some(cancel) = entry.cancel.take() {
            cancel.cancel();
        }
        if entry.state == JobState::Running {
            entry.state = JobState::Stopped;
            tracing::info!(job = %name, "Job stopped");
        }
        entry.next_run_at = None;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        let entry = self
            .jobs
            .lock()
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        if let Some(cancel) = entry.cancel {
            cancel.cancel();
        }
        tracing::info!(job = %name, "Job removed");
        Ok(())
    }

    /// Execute the job body now, outside its cadence.
    ///
    /// The job's timer is unaffected. A one-time or bulk job that has
    /// already fired reports `UnknownJob` once it is gone.
    pub async fn run_now(&self, name: &str) -> Result<RunReport, SchedulerError> {
        if !self.jobs.lock().contains_key(name) {
            return Err(SchedulerError::UnknownJob(name.to_string()));
        }
        tracing::info!(job = %name, "Manual job run requested");
        self.execute(name)
            .await
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    /// Start every job that is not running yet.
    pub fn start_all(&self) {
        let names: Vec<String> = self
            .jobs
            .lock()
            .iter()
            .filter(|(_, e)| e.state != JobState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            // Only fails if the job was removed in between.
            let _ = self.start(&name);
        }
    }

    /// Cancel every timer. In-flight executions complete on their own.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut jobs = self.jobs.lock();
        for entry in jobs.values_mut() {
            entry.cancel = None;
            if entry.state == JobState::Running {
                entry.state = JobState::Stopped;
            }
            entry.next_run_at = None;
        }
        tracing::info!(jobs = jobs.len(), "Job registry shut down");
    }

    /// Every job, sorted by name.
    pub fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock();
        let mut statuses: Vec<JobStatus> = jobs
            .iter()
            .map(|(name, e)| JobStatus {
                name: name.clone(),
                kind: e.kind,
                cadence: e.schedule.describe(),
                state: e.state,
                running: e.state == JobState::Running,
                last_run_at: e.last_run_at,
                next_run_at: e.next_run_at,
                run_count: e.run_count,
                failure_count: e.failure_count,
                last_error: e.last_error.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn job_status(&self, name: &str) -> Result<JobStatus, SchedulerError> {
        self.status()
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    /// Running vs not-running job counts, for health scoring.
    pub fn counts(&self) -> JobCounts {
        let jobs = self.jobs.lock();
        let running = jobs
            .values()
            .filter(|e| e.state == JobState::Running)
            .count() as u64;
        JobCounts {
            running,
            stopped: jobs.len() as u64 - running,
        }
    }

    async fn recurring_loop(&self, name: String, cadence: Cadence, cancel: CancellationToken) {
        let mut previous: Option<DateTime<Utc>> = None;
        while !cancel.is_cancelled() {
            let now = Utc::now();
            let next = match previous {
                Some(slot) => cadence.following(slot, now),
                None => cadence.next_after(now),
            };
            previous = Some(next);
            self.set_next_run(&name, Some(next));

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if self.execute(&name).await.is_none() {
                break;
            }
        }
        tracing::debug!(job = %name, "Job timer exited");
    }

    async fn single_shot(&self, name: String, at: DateTime<Utc>, cancel: CancellationToken) {
        self.set_next_run(&name, Some(at));

        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        self.execute(&name).await;
    }

    fn set_next_run(&self, name: &str, next: Option<DateTime<Utc>>) {
        if let Some(entry) = self.jobs.lock().get_mut(name) {
            entry.next_run_at = next;
        }
    }

    /// Run the body once and record the outcome. `None` if the job is gone
    /// or is a single-shot job that already fired.
    async fn execute(&self, name: &str) -> Option<RunReport> {
        let started_at = Utc::now();
        let (task, kind) = {
            let mut jobs = self.jobs.lock();
            let entry = jobs.get_mut(name)?;
            if entry.kind != JobKind::Recurring {
                if entry.fired {
                    return None;
                }
                entry.fired = true;
            }
            entry.last_run_at = Some(started_at);
            (entry.task.clone(), entry.kind)
        };

        tracing::debug!(job = %name, "Job execution started");

        let error = match tokio::spawn(async move { task().await }).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(join) if join.is_panic() => Some("task panicked".to_string()),
            Err(join) => Some(join.to_string()),
        };
        let finished_at = Utc::now();

        match &error {
            None => tracing::info!(
                job = %name,
                duration_ms = (finished_at - started_at).num_milliseconds(),
                "Job completed"
            ),
            Some(e) => tracing::error!(job = %name, error = %e, "Job failed"),
        }

        {
            let mut jobs = self.jobs.lock();
            if kind == JobKind::Recurring {
                if let Some(entry) = jobs.get_mut(name) {
                    entry.run_count += 1;
                    if let Some(e) = &error {
                        entry.failure_count += 1;
                        entry.last_error = Some(e.clone());
                    }
                }
            } else if let Some(entry) = jobs.remove(name) {
                if let Some(cancel) = entry.cancel {
                    cancel.cancel();
                }
                tracing::info!(job = %name, "Single-shot job finished and removed");
            }
        }

        Some(RunReport {
            job: name.to_string(),
            succeeded: error.is_none(),
            error,
            started_at,
            finished_at,
        })
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
