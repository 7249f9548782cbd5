//! Job executor with fixed-delay retry logic.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::store::JobStore;
use super::types::{Job, RetryPolicy};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> Result<serde_json::Value, String> + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs.
    pub poll_interval: Duration,
    /// Thread name, for logging.
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Background job executor.
///
/// Polls a job store for pending jobs and executes them with registered
/// handlers. A failing handler is retried `max_attempts` times with a fixed
/// delay; exhausting the attempts dead-letters the job so the failure
/// propagates to whoever polls its status.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
    policy: RetryPolicy,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            policy,
        }
    }

    /// Register a handler for a job kind.
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    /// Spawn the executor in a background thread.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || {
                executor_loop(self, config, shutdown_rx);
            })
            .expect("failed to spawn job executor thread");

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    fn run_with_retries(&self, job: &Job) {
        let Some(handler) = self.handlers.get(&job.kind) else {
            warn!(job_id = %job.id, kind = %job.kind, "no handler registered for job kind");
            self.store
                .dead_letter(job.id, format!("no handler for kind '{}'", job.kind), 0);
            return;
        };

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match handler(job) {
                Ok(result) => {
                    info!(job_id = %job.id, kind = %job.kind, attempt, "job completed");
                    self.store.complete(job.id, result);
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job.id, kind = %job.kind, attempt, error = %e, "job attempt failed");
                    last_error = e;
                    if attempt < self.policy.max_attempts {
                        thread::sleep(self.policy.retry_delay);
                    }
                }
            }
        }

        self.store
            .dead_letter(job.id, last_error, self.policy.max_attempts);
    }
}

fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(name = %config.name, "job executor started");

    loop {
        match shutdown_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!(name = %config.name, "job executor shutting down");
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        while let Some(job) = executor.store.claim_next_pending() {
            executor.run_with_retries(&job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use surplus_core::UserId;

    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobStatus, RetryPolicy};

    fn wait_until_terminal(store: &Arc<InMemoryJobStore>, id: crate::jobs::JobId) -> Job {
        for _ in 0..200 {
            if let Some(job) = store.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("job did not reach a terminal status in time");
    }

    #[test]
    fn flaky_handler_succeeds_within_the_retry_budget() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(
            store.clone(),
            RetryPolicy::fixed(3, Duration::from_millis(5)),
        );

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_seen = attempts.clone();
        executor.register_handler("flaky", move |_job| {
            // Fails twice, then succeeds on the final allowed attempt.
            if attempts_seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient".to_string())
            } else {
                Ok(json!({"ok": true}))
            }
        });

        let handle = executor.spawn(JobExecutorConfig {
            poll_interval: Duration::from_millis(5),
            name: "test-executor".to_string(),
        });

        let job = Job::new("flaky", UserId::new(), json!({}));
        let id = job.id;
        store.enqueue(job);

        let job = wait_until_terminal(&store, id);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        handle.shutdown();
    }

    #[test]
    fn exhausted_retries_dead_letter_the_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(
            store.clone(),
            RetryPolicy::fixed(2, Duration::from_millis(5)),
        );
        executor.register_handler("doomed", |_job| Err("boom".to_string()));

        let handle = executor.spawn(JobExecutorConfig {
            poll_interval: Duration::from_millis(5),
            name: "test-executor".to_string(),
        });

        let job = Job::new("doomed", UserId::new(), json!({}));
        let id = job.id;
        store.enqueue(job);

        let job = wait_until_terminal(&store, id);
        match job.status {
            JobStatus::DeadLettered { error, attempts } => {
                assert_eq!(error, "boom");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected dead-lettered job, got {other:?}"),
        }

        handle.shutdown();
    }

    #[test]
    fn unknown_kind_is_dead_lettered_immediately() {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = JobExecutor::new(store.clone(), RetryPolicy::default());

        let handle = executor.spawn(JobExecutorConfig {
            poll_interval: Duration::from_millis(5),
            name: "test-executor".to_string(),
        });

        let job = Job::new("nobody.handles.this", UserId::new(), json!({}));
        let id = job.id;
        store.enqueue(job);

        let job = wait_until_terminal(&store, id);
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 0, .. }));

        handle.shutdown();
    }
}
