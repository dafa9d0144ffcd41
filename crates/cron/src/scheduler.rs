//! Minute-tick cron scheduler.
//!
//! Tasks are registered under a sanitized name with a parsed cron
//! expression and an async closure. `run()` ticks once per minute,
//! spawning every matching task independently; a task failure is logged
//! and recorded but never cancels the schedule.

use crate::parser::{CronExpression, matches, parse_cron};
use futures::FutureExt;
use futures::future::BoxFuture;
use krill::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// An async task closure fired on each matching tick.
pub type CronTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct ScheduledTask {
    name: String,
    expression: CronExpression,
    expression_source: String,
    task: CronTask,
    delete_after_run: bool,
    stagger_ms: u64,
    enabled: bool,
}

/// Terminal status of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Cancelled,
}

/// History entry for one fired task.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub task_name: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<String>,
}

/// Listing view of a scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct CronTaskInfo {
    pub name: String,
    pub expression: String,
    pub enabled: bool,
    pub delete_after_run: bool,
    pub stagger_ms: u64,
}

/// Paging/filter parameters for [`CronScheduler::list`].
#[derive(Debug, Clone)]
pub struct CronListParams {
    pub limit: usize,
    pub offset: usize,
    pub query: Option<String>,
    pub enabled: Option<bool>,
    pub sort_by: String,
    pub sort_dir: String,
}

impl Default for CronListParams {
    fn default() -> Self {
        CronListParams {
            limit: 50,
            offset: 0,
            query: None,
            enabled: None,
            sort_by: "name".into(),
            sort_dir: "asc".into(),
        }
    }
}

/// Paging/filter parameters for [`CronScheduler::list_runs`].
#[derive(Debug, Clone)]
pub struct CronRunsParams {
    pub limit: usize,
    pub offset: usize,
    pub query: Option<String>,
    pub statuses: Option<Vec<RunStatus>>,
    pub delivery_statuses: Option<Vec<String>>,
    pub scope: Option<String>,
    pub sort_by: String,
    pub sort_dir: String,
}

impl Default for CronRunsParams {
    fn default() -> Self {
        CronRunsParams {
            limit: 50,
            offset: 0,
            query: None,
            statuses: None,
            delivery_statuses: None,
            scope: None,
            sort_by: "started_at".into(),
            sort_dir: "desc".into(),
        }
    }
}

const MAX_RUN_HISTORY: usize = 1000;

struct Inner {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    runs: Mutex<Vec<RunRecord>>,
    running: AtomicBool,
    abort: AtomicBool,
    stop_token: Mutex<CancellationToken>,
}

/// Cron-based task scheduler driven by a once-per-minute tick loop.
#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip path separators and `..` from a task name. Names that reduce to
/// nothing are invalid.
fn sanitize_task_name(name: &str) -> Result<String> {
    let mut sanitized = name.replace(['/', '\\'], "");
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "");
    }
    let sanitized = sanitized.trim().to_string();
    if sanitized.is_empty() {
        return Err(Error::with_detail(
            ErrorKind::InvalidArgument,
            "Task name is empty after sanitization",
            name.to_string(),
        ));
    }
    Ok(sanitized)
}

impl CronScheduler {
    pub fn new() -> Self {
        CronScheduler {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                runs: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                abort: AtomicBool::new(false),
                stop_token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Register (or replace) a recurring task.
    pub fn schedule(
        &self,
        name: &str,
        cron_expr: &str,
        task: CronTask,
        delete_after_run: bool,
        stagger_ms: u64,
    ) -> Result<String> {
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "Task name must not be empty"));
        }

        let name = sanitize_task_name(name)?;
        let expression = parse_cron(cron_expr)?;

        let mut tasks = self.inner.tasks.lock();
        if tasks.contains_key(&name) {
            log::warn!("Replacing existing cron task '{name}'");
        }
        tasks.insert(
            name.clone(),
            ScheduledTask {
                name: name.clone(),
                expression,
                expression_source: cron_expr.to_string(),
                task,
                delete_after_run,
                stagger_ms,
                enabled: true,
            },
        );
        log::info!("Scheduled cron task '{name}' with expression '{cron_expr}'");
        Ok(name)
    }

    /// Remove a task by name.
    pub fn cancel(&self, name: &str) -> Result<()> {
        let mut tasks = self.inner.tasks.lock();
        if tasks.remove(name).is_none() {
            return Err(Error::with_detail(
                ErrorKind::NotFound,
                "No cron task with this name",
                name.to_string(),
            ));
        }
        log::info!("Cancelled cron task '{name}'");
        Ok(())
    }

    /// Toggle a task's enabled flag.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut tasks = self.inner.tasks.lock();
        match tasks.get_mut(name) {
            Some(task) => {
                task.enabled = enabled;
                Ok(())
            }
            None => Err(Error::with_detail(
                ErrorKind::NotFound,
                "No cron task with this name",
                name.to_string(),
            )),
        }
    }

    /// Fire a task immediately, outside its cron schedule.
    pub fn manual_run(&self, name: &str) -> Result<()> {
        let (task, delete_after_run) = {
            let tasks = self.inner.tasks.lock();
            match tasks.get(name) {
                Some(entry) => (entry.task.clone(), entry.delete_after_run),
                None => {
                    return Err(Error::with_detail(
                        ErrorKind::NotFound,
                        "No cron task with this name",
                        name.to_string(),
                    ));
                }
            }
        };
        self.spawn_run(name.to_string(), task, 0, delete_after_run);
        Ok(())
    }

    /// Request cooperative abort of currently running tasks. Cleared at
    /// the next tick.
    pub fn abort_current(&self) {
        self.inner.abort.store(true, Ordering::Release);
    }

    /// Whether a cooperative abort has been requested.
    pub fn abort_requested(&self) -> bool {
        self.inner.abort.load(Ordering::Acquire)
    }

    /// Tick loop. Runs until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        let token = {
            let mut guard = self.inner.stop_token.lock();
            *guard = CancellationToken::new();
            guard.clone()
        };
        self.inner.running.store(true, Ordering::Release);
        log::info!("Cron scheduler started");

        while self.inner.running.load(Ordering::Acquire) {
            // Wait until just past the next minute boundary.
            let now = OffsetDateTime::now_utc();
            let into_minute_ms = (now.unix_timestamp_nanos() / 1_000_000).rem_euclid(60_000) as u64;
            let wait = Duration::from_millis(60_000 - into_minute_ms + 1_000);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if !self.inner.running.load(Ordering::Acquire) {
                break;
            }

            self.inner.abort.store(false, Ordering::Release);
            self.fire_matching(OffsetDateTime::now_utc());
        }

        self.inner.running.store(false, Ordering::Release);
        log::info!("Cron scheduler stopped");
    }

    /// Spawn every enabled task whose expression matches `tick_time`.
    /// Exposed for the tick loop and for deterministic tests.
    pub fn fire_matching(&self, tick_time: OffsetDateTime) {
        let matching: Vec<(String, CronTask, u64, bool)> = {
            let tasks = self.inner.tasks.lock();
            tasks
                .values()
                .filter(|t| t.enabled && matches(&t.expression, tick_time))
                .map(|t| (t.name.clone(), t.task.clone(), t.stagger_ms, t.delete_after_run))
                .collect()
        };

        for (name, task, stagger_ms, delete_after_run) in matching {
            log::debug!("Firing cron task '{name}'");
            self.spawn_run(name, task, stagger_ms, delete_after_run);
        }
    }

    fn spawn_run(&self, name: String, task: CronTask, stagger_ms: u64, delete_after_run: bool) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if stagger_ms > 0 {
                tokio::time::sleep(Duration::from_millis(stagger_ms)).await;
            }

            let started_at = krill::timestamp_ms();
            let outcome = std::panic::AssertUnwindSafe(task()).catch_unwind().await;

            let (status, error) = match outcome {
                Ok(Ok(())) => (RunStatus::Ok, None),
                Ok(Err(e)) => {
                    log::error!("Cron task '{name}' failed: {e}");
                    (RunStatus::Error, Some(e.to_string()))
                }
                Err(_) => {
                    log::error!("Cron task '{name}' panicked");
                    (RunStatus::Error, Some("task panicked".to_string()))
                }
            };

            {
                let mut runs = inner.runs.lock();
                runs.push(RunRecord {
                    task_name: name.clone(),
                    started_at,
                    finished_at: Some(krill::timestamp_ms()),
                    status,
                    error,
                    delivery_status: None,
                });
                if runs.len() > MAX_RUN_HISTORY {
                    let excess = runs.len() - MAX_RUN_HISTORY;
                    runs.drain(..excess);
                }
            }

            if delete_after_run && status == RunStatus::Ok {
                let mut tasks = inner.tasks.lock();
                if tasks.remove(&name).is_some() {
                    log::info!("One-shot cron task '{name}' completed and was removed");
                }
            }
        });
    }

    /// Signal the tick loop to exit. Running tasks finish on their own.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            log::info!("Cron scheduler stopping...");
        }
        self.inner.stop_token.lock().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.inner.tasks.lock().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.tasks.lock().contains_key(name)
    }

    /// List scheduled tasks with filtering, sorting, and paging.
    pub fn list(&self, params: &CronListParams) -> Vec<CronTaskInfo> {
        let mut entries: Vec<CronTaskInfo> = {
            let tasks = self.inner.tasks.lock();
            tasks
                .values()
                .filter(|t| {
                    params
                        .query
                        .as_ref()
                        .map(|q| t.name.contains(q.as_str()))
                        .unwrap_or(true)
                })
                .filter(|t| params.enabled.map(|e| t.enabled == e).unwrap_or(true))
                .map(|t| CronTaskInfo {
                    name: t.name.clone(),
                    expression: t.expression_source.clone(),
                    enabled: t.enabled,
                    delete_after_run: t.delete_after_run,
                    stagger_ms: t.stagger_ms,
                })
                .collect()
        };

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if params.sort_dir == "desc" {
            entries.reverse();
        }

        entries.into_iter().skip(params.offset).take(params.limit).collect()
    }

    /// List run history with filtering, sorting, and paging. Defaults to
    /// most recent first.
    pub fn list_runs(&self, params: &CronRunsParams) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = {
            let runs = self.inner.runs.lock();
            runs.iter()
                .filter(|r| {
                    params
                        .query
                        .as_ref()
                        .map(|q| r.task_name.contains(q.as_str()))
                        .unwrap_or(true)
                })
                .filter(|r| {
                    params
                        .statuses
                        .as_ref()
                        .map(|s| s.contains(&r.status))
                        .unwrap_or(true)
                })
                .filter(|r| {
                    params
                        .delivery_statuses
                        .as_ref()
                        .map(|ds| {
                            r.delivery_status
                                .as_ref()
                                .map(|d| ds.contains(d))
                                .unwrap_or(false)
                        })
                        .unwrap_or(true)
                })
                .cloned()
                .collect()
        };

        records.sort_by_key(|r| r.started_at);
        if params.sort_dir == "desc" {
            records.reverse();
        }

        records.into_iter().skip(params.offset).take(params.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_task() -> CronTask {
        Arc::new(|| async { Ok::<(), anyhow::Error>(()) }.boxed())
    }

    fn counting_task() -> (CronTask, Arc<std::sync::atomic::AtomicUsize>) {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        let task: CronTask = Arc::new(move || {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        });
        (task, count)
    }

    #[test]
    fn schedule_validates_inputs() {
        let sched = CronScheduler::new();
        assert!(sched.schedule("", "* * * * *", noop_task(), false, 0).is_err());
        assert!(sched.schedule("x", "not a cron", noop_task(), false, 0).is_err());
        assert!(sched.schedule("x", "* * * * *", noop_task(), false, 0).is_ok());
        assert_eq!(sched.size(), 1);
    }

    #[test]
    fn schedule_replaces_existing_name() {
        let sched = CronScheduler::new();
        sched.schedule("dup", "* * * * *", noop_task(), false, 0).unwrap();
        sched.schedule("dup", "*/5 * * * *", noop_task(), false, 0).unwrap();
        assert_eq!(sched.size(), 1);
    }

    #[test]
    fn task_names_are_sanitized() {
        let sched = CronScheduler::new();
        let name = sched
            .schedule("../../etc/passwd", "* * * * *", noop_task(), false, 0)
            .unwrap();
        assert!(!name.contains(".."));
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));

        let name = sched.schedule("path\\to\\job", "* * * * *", noop_task(), false, 0).unwrap();
        assert!(!name.contains('\\'));
    }

    #[test]
    fn name_reducing_to_empty_is_rejected() {
        let sched = CronScheduler::new();
        let err = sched.schedule("../../", "* * * * *", noop_task(), false, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn cancel_unknown_is_not_found() {
        let sched = CronScheduler::new();
        let err = sched.cancel("nonexistent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn manual_run_executes_task() {
        let sched = CronScheduler::new();
        let (task, count) = counting_task();
        sched.schedule("manual", "* * * * *", task, false, 0).unwrap();

        assert!(sched.manual_run("missing").is_err());
        sched.manual_run("manual").unwrap();

        for _ in 0..50 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_fires_matching_task_once_and_keeps_it() {
        let sched = CronScheduler::new();
        let (task, count) = counting_task();
        sched.schedule("wake", "* * * * *", task, false, 0).unwrap();

        sched.fire_matching(OffsetDateTime::now_utc());
        for _ in 0..50 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sched.contains("wake"));
        assert_eq!(sched.size(), 1);
    }

    #[tokio::test]
    async fn one_shot_task_is_removed_after_success() {
        let sched = CronScheduler::new();
        let (task, count) = counting_task();
        sched.schedule("once", "* * * * *", task, true, 0).unwrap();

        sched.fire_matching(OffsetDateTime::now_utc());
        for _ in 0..100 {
            if sched.size() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sched.size(), 0);
        assert!(sched.task_names().is_empty());
    }

    #[tokio::test]
    async fn failing_task_is_recorded_and_kept() {
        let sched = CronScheduler::new();
        let task: CronTask =
            Arc::new(|| async { Err::<(), anyhow::Error>(anyhow::anyhow!("boom")) }.boxed());
        sched.schedule("flaky", "* * * * *", task, true, 0).unwrap();

        sched.fire_matching(OffsetDateTime::now_utc());
        for _ in 0..50 {
            if !sched.list_runs(&CronRunsParams::default()).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let runs = sched.list_runs(&CronRunsParams::default());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Error);
        assert_eq!(runs[0].error.as_deref(), Some("boom"));
        // delete_after_run only applies to successful runs.
        assert_eq!(sched.size(), 1);
    }

    #[tokio::test]
    async fn stagger_delays_execution() {
        let sched = CronScheduler::new();
        let (task, count) = counting_task();
        sched.schedule("staggered", "* * * * *", task, false, 100).unwrap();

        sched.fire_matching(OffsetDateTime::now_utc());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for _ in 0..50 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn list_defaults_and_paging() {
        let sched = CronScheduler::new();
        for name in ["charlie", "alpha", "bravo"] {
            sched.schedule(name, "* * * * *", noop_task(), false, 0).unwrap();
        }

        let params = CronListParams::default();
        assert_eq!(params.limit, 50);
        assert_eq!(params.offset, 0);
        assert_eq!(params.sort_by, "name");
        assert_eq!(params.sort_dir, "asc");

        let all = sched.list(&params);
        let names: Vec<&str> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);

        let desc = sched.list(&CronListParams { sort_dir: "desc".into(), ..Default::default() });
        assert_eq!(desc[0].name, "charlie");

        let paged = sched.list(&CronListParams { limit: 1, offset: 1, ..Default::default() });
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].name, "bravo");

        let beyond = sched.list(&CronListParams { offset: 100, ..Default::default() });
        assert!(beyond.is_empty());
    }

    #[test]
    fn list_applies_query_filter() {
        let sched = CronScheduler::new();
        for name in ["heartbeat-check", "heartbeat-send", "cleanup-logs"] {
            sched.schedule(name, "* * * * *", noop_task(), false, 0).unwrap();
        }
        let result = sched.list(&CronListParams {
            query: Some("heartbeat".into()),
            ..Default::default()
        });
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn runs_params_defaults() {
        let params = CronRunsParams::default();
        assert_eq!(params.limit, 50);
        assert_eq!(params.offset, 0);
        assert_eq!(params.sort_by, "started_at");
        assert_eq!(params.sort_dir, "desc");
        assert!(params.statuses.is_none());
    }

    #[test]
    fn abort_flag_is_settable() {
        let sched = CronScheduler::new();
        assert!(!sched.abort_requested());
        sched.abort_current();
        assert!(sched.abort_requested());
    }

    #[tokio::test]
    async fn stop_ends_run_loop() {
        let sched = CronScheduler::new();
        let sched2 = sched.clone();
        let handle = tokio::spawn(async move { sched2.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sched.is_running());
        sched.stop();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(!sched.is_running());
    }
}
