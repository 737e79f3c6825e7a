//! 1Hz tick-loop scheduler over a JSON-persisted job list (§4.8).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cron::{CronSchedule, MinuteCron};
use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{CronJob, JobKind};

/// Invoked when a job fires. Implementations typically forward
/// `job.payload.message` to the model runtime (§4.8 step 2, §4.9).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &CronJob) -> std::result::Result<(), String>;
}

struct Inner {
    jobs: Vec<CronJob>,
}

/// Shared job-management surface: add/remove/enable/list. Cloning is cheap
/// (an `Arc` around the same store and job list the tick loop drives).
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<Inner>>,
    cron_cache: Arc<Mutex<HashMap<String, Arc<dyn CronSchedule>>>>,
    store: Arc<JobStore>,
}

impl SchedulerHandle {
    fn persist(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        self.store.save(&inner.jobs)
    }

    pub fn add_job(&self, job: CronJob) -> Result<CronJob> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.jobs.iter().any(|j| j.name == job.name) {
                return Err(SchedulerError::Duplicate(job.name));
            }
            self.register_if_cron(&job)?;
            inner.jobs.push(job.clone());
        }
        self.persist()?;
        info!(job_id = %job.id, name = %job.name, "job added");
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.jobs.len();
            inner.jobs.retain(|j| j.id != id);
            if inner.jobs.len() == before {
                return Err(SchedulerError::NotFound(id.to_string()));
            }
        }
        self.cron_cache.lock().unwrap().remove(id);
        self.persist()?;
        info!(job_id = id, "job removed");
        Ok(())
    }

    /// Enabling a cron job re-registers its matcher; disabling removes it
    /// (§4.8 "enabling a cron job re-registers it; disabling removes its
    /// registration").
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let job = {
            let mut inner = self.inner.lock().unwrap();
            let job = inner
                .jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            job.enabled = enabled;
            job.clone()
        };
        if enabled {
            self.register_if_cron(&job)?;
        } else {
            self.cron_cache.lock().unwrap().remove(id);
        }
        self.persist()?;
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<CronJob> {
        self.inner.lock().unwrap().jobs.clone()
    }

    pub fn get_job(&self, id: &str) -> Option<CronJob> {
        self.inner.lock().unwrap().jobs.iter().find(|j| j.id == id).cloned()
    }

    fn register_if_cron(&self, job: &CronJob) -> Result<()> {
        if let JobKind::Cron { expression } = &job.kind {
            let matcher = MinuteCron::parse(expression)?;
            self.cron_cache
                .lock()
                .unwrap()
                .insert(job.id.clone(), Arc::new(matcher));
        }
        Ok(())
    }
}

const TICK: Duration = Duration::from_secs(1);
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SchedulerEngine {
    handle: SchedulerHandle,
    handler: Option<Arc<dyn JobHandler>>,
    running: Arc<Mutex<HashSet<String>>>,
    in_flight: Arc<AtomicI64>,
    drain_notify: Arc<tokio::sync::Notify>,
}

impl SchedulerEngine {
    /// Loads the job list from `path` (empty if the file does not exist)
    /// and registers matchers for any enabled cron jobs.
    pub fn new(path: impl AsRef<std::path::Path>, handler: Option<Arc<dyn JobHandler>>) -> Result<Self> {
        let store = Arc::new(JobStore::new(path));
        let jobs = store.load()?;
        let cron_cache = Arc::new(Mutex::new(HashMap::new()));
        for job in jobs.iter().filter(|j| j.enabled) {
            if let JobKind::Cron { expression } = &job.kind {
                match MinuteCron::parse(expression) {
                    Ok(matcher) => {
                        cron_cache.lock().unwrap().insert(job.id.clone(), Arc::new(matcher));
                    }
                    Err(e) => warn!(job_id = %job.id, error = %e, "failed to register cron job on load"),
                }
            }
        }
        let handle = SchedulerHandle {
            inner: Arc::new(Mutex::new(Inner { jobs })),
            cron_cache,
            store,
        };
        Ok(Self {
            handle,
            handler,
            running: Arc::new(Mutex::new(HashSet::new())),
            in_flight: Arc::new(AtomicI64::new(0)),
            drain_notify: Arc::new(tokio::sync::Notify::new()),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// 1Hz tick loop. Exits when `ctx` is cancelled.
    pub async fn run(&self, ctx: CancellationToken) {
        info!("scheduler engine started");
        let mut ticker = interval(TICK);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("scheduler engine tick loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// Cancels the caller-owned `ctx` and waits up to 5s for in-flight job
    /// handlers to drain (§4.8 `Stop`).
    pub async fn stop(&self, ctx: CancellationToken) {
        ctx.cancel();
        let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!("scheduler stop timed out waiting for jobs to drain");
                break;
            }
            let _ = tokio::time::timeout(remaining, self.drain_notify.notified()).await;
        }
    }

    fn tick(&self) {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let due: Vec<CronJob> = {
            let inner = self.handle.inner.lock().unwrap();
            let cron_cache = self.handle.cron_cache.lock().unwrap();
            inner
                .jobs
                .iter()
                .filter(|job| job.enabled && self.is_due(job, now, now_ms, &cron_cache))
                .cloned()
                .collect()
        };

        for job in due {
            if self.handler.is_none() {
                continue;
            }
            let already_running = {
                let mut running = self.running.lock().unwrap();
                !running.insert(job.id.clone())
            };
            if already_running {
                continue;
            }
            self.spawn_job(job, now_ms);
        }
    }

    fn is_due(
        &self,
        job: &CronJob,
        now: chrono::DateTime<Utc>,
        now_ms: i64,
        cron_cache: &HashMap<String, Arc<dyn CronSchedule>>,
    ) -> bool {
        match &job.kind {
            JobKind::Every { interval_ms } => job
                .state
                .last_run_ms
                .map(|last| now_ms - last >= *interval_ms)
                .unwrap_or(true),
            JobKind::At { at_ms } => now_ms >= *at_ms,
            JobKind::Cron { .. } => cron_cache
                .get(&job.id)
                .map(|matcher| matcher.matches(now))
                .unwrap_or(false),
        }
    }

    fn spawn_job(&self, job: CronJob, now_ms: i64) {
        let handler = self.handler.clone().unwrap();
        let handle = self.handle.clone();
        let running = self.running.clone();
        let in_flight = self.in_flight.clone();
        let drain_notify = self.drain_notify.clone();

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let result = handler.handle(&job).await;

            {
                let mut inner = handle.inner.lock().unwrap();
                if let Some(stored) = inner.jobs.iter_mut().find(|j| j.id == job.id) {
                    stored.state.last_run_ms = Some(now_ms);
                    match &result {
                        Ok(()) => {
                            stored.state.last_status = Some("ok".to_string());
                            stored.state.last_error = None;
                        }
                        Err(e) => {
                            stored.state.last_status = Some("error".to_string());
                            stored.state.last_error = Some(e.clone());
                        }
                    }
                    if stored.delete_after_run {
                        let id = stored.id.clone();
                        inner.jobs.retain(|j| j.id != id);
                    } else if matches!(job.kind, JobKind::At { .. }) {
                        // one-shot `at` jobs disable themselves even without
                        // `delete_after_run` (§4.8 "on fire the job is disabled").
                        stored.enabled = false;
                    }
                }
            }

            if let Err(e) = result {
                error!(job_id = %job.id, name = %job.name, error = %e, "job handler returned an error");
            }
            if let Err(e) = handle.persist() {
                error!(job_id = %job.id, error = %e, "failed to persist scheduler state after run");
            }
            if matches!(job.kind, JobKind::Cron { .. }) {
                // deletion/disable removes the cron registration too.
                let still_registered = handle.get_job(&job.id).map(|j| j.enabled).unwrap_or(false);
                if !still_registered {
                    handle.cron_cache.lock().unwrap().remove(&job.id);
                }
            }

            running.lock().unwrap().remove(&job.id);
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drain_notify.notify_waiters();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CronPayload;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &CronJob) -> std::result::Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn every_job_fires_once_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let engine = SchedulerEngine::new(
            dir.path().join("jobs.json"),
            Some(Arc::new(CountingHandler { count: count.clone() })),
        )
        .unwrap();
        engine
            .handle()
            .add_job(CronJob::new(
                "ping",
                JobKind::Every { interval_ms: 0 },
                CronPayload {
                    message: "hi".into(),
                    ..Default::default()
                },
            ))
            .unwrap();

        engine.tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn at_job_disables_itself_after_firing() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let engine = SchedulerEngine::new(
            dir.path().join("jobs.json"),
            Some(Arc::new(CountingHandler { count: count.clone() })),
        )
        .unwrap();
        let job = engine
            .handle()
            .add_job(CronJob::new(
                "reminder",
                JobKind::At { at_ms: 0 },
                CronPayload {
                    message: "hi".into(),
                    ..Default::default()
                },
            ))
            .unwrap();

        engine.tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!engine.handle().get_job(&job.id).unwrap().enabled);
    }

    #[tokio::test]
    async fn delete_after_run_removes_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let engine = SchedulerEngine::new(
            dir.path().join("jobs.json"),
            Some(Arc::new(CountingHandler { count: count.clone() })),
        )
        .unwrap();
        let mut job = CronJob::new(
            "once",
            JobKind::Every { interval_ms: 0 },
            CronPayload {
                message: "hi".into(),
                ..Default::default()
            },
        );
        job.delete_after_run = true;
        let job = engine.handle().add_job(job).unwrap();

        engine.tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.handle().get_job(&job.id).is_none());
    }

    #[test]
    fn duplicate_job_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SchedulerEngine::new(dir.path().join("jobs.json"), None).unwrap();
        let payload = CronPayload {
            message: "hi".into(),
            ..Default::default()
        };
        engine
            .handle()
            .add_job(CronJob::new("dup", JobKind::Every { interval_ms: 1000 }, payload.clone()))
            .unwrap();
        let result = engine
            .handle()
            .add_job(CronJob::new("dup", JobKind::Every { interval_ms: 1000 }, payload));
        assert!(result.is_err());
    }
}
