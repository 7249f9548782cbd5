//! Job queue storage.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;

use surplus_core::UserId;

use super::types::{Job, JobId, JobStatus};

/// Storage for queued/running/terminal jobs.
pub trait JobStore: Send + Sync {
    /// Add a new pending job to the back of the queue.
    fn enqueue(&self, job: Job);

    /// Pop the oldest pending job and mark it running.
    fn claim_next_pending(&self) -> Option<Job>;

    /// Mark a job completed with its result.
    fn complete(&self, id: JobId, result: JsonValue);

    /// Mark a job dead-lettered after exhausting retries.
    fn dead_letter(&self, id: JobId, error: String, attempts: u32);

    fn get(&self, id: JobId) -> Option<Job>;

    fn list_for_user(&self, user_id: UserId) -> Vec<Job>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: Job) {
        (**self).enqueue(job)
    }

    fn claim_next_pending(&self) -> Option<Job> {
        (**self).claim_next_pending()
    }

    fn complete(&self, id: JobId, result: JsonValue) {
        (**self).complete(id, result)
    }

    fn dead_letter(&self, id: JobId, error: String, attempts: u32) {
        (**self).dead_letter(id, error, attempts)
    }

    fn get(&self, id: JobId) -> Option<Job> {
        (**self).get(id)
    }

    fn list_for_user(&self, user_id: UserId) -> Vec<Job> {
        (**self).list_for_user(user_id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<JobId>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        self.inner.lock().ok().map(|mut inner| f(&mut inner))
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) {
        self.with_inner(|inner| {
            inner.queue.push_back(job.id);
            inner.jobs.insert(job.id, job);
        });
    }

    fn claim_next_pending(&self) -> Option<Job> {
        self.with_inner(|inner| {
            let id = inner.queue.pop_front()?;
            let job = inner.jobs.get_mut(&id)?;
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
            Some(job.clone())
        })
        .flatten()
    }

    fn complete(&self, id: JobId, result: JsonValue) {
        self.with_inner(|inner| {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.updated_at = Utc::now();
            }
        });
    }

    fn dead_letter(&self, id: JobId, error: String, attempts: u32) {
        self.with_inner(|inner| {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::DeadLettered { error, attempts };
                job.updated_at = Utc::now();
            }
        });
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.with_inner(|inner| inner.jobs.get(&id).cloned()).flatten()
    }

    fn list_for_user(&self, user_id: UserId) -> Vec<Job> {
        self.with_inner(|inner| {
            let mut jobs: Vec<_> = inner
                .jobs
                .values()
                .filter(|j| j.requested_by == user_id)
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            jobs
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claim_pops_in_fifo_order_and_marks_running() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();

        let first = Job::new("reports.store_sales", user, json!({}));
        let second = Job::new("reports.store_sales", user, json!({}));
        let first_id = first.id;
        store.enqueue(first);
        store.enqueue(second);

        let claimed = store.claim_next_pending().unwrap();
        assert_eq!(claimed.id, first_id);
        assert_eq!(claimed.status, JobStatus::Running);
    }

    #[test]
    fn terminal_transitions_are_visible_to_pollers() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();

        let job = Job::new("reports.store_sales", user, json!({}));
        let id = job.id;
        store.enqueue(job);
        store.claim_next_pending().unwrap();

        store.dead_letter(id, "projection unavailable".to_string(), 3);

        let job = store.get(id).unwrap();
        assert!(job.status.is_terminal());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 3, .. }));
    }
}
