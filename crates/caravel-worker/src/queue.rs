//! The in-process work queue
//!
//! One queue for all four job kinds. Durability comes from the deployment
//! rows, not the queue process: the worker's startup sweep re-enqueues
//! rows stranded mid-lifecycle, so losing queued jobs on restart loses no
//! work.
//!
//! Guarantees:
//!
//! - **Deduplication**: enqueueing a job whose id is already pending or
//!   executing is a no-op, so engine-side retries never double-submit.
//! - **Per-deployment serialization**: two jobs touching the same
//!   deployment never execute concurrently; the second waits.
//! - **Priority**: high-priority jobs (dependency auto-provisioning) are
//!   taken before normal ones.
//! - **Retry**: failed jobs are re-scheduled with exponential backoff up
//!   to a bounded attempt count, then parked in the failed set.
//! - **Trimming**: completed/failed sets are rings with bounded size.

use async_trait::async_trait;
use caravel_engine::{EngineError, Job, JobPriority, JobQueue};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Attempts per job before it is parked as failed
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles per attempt)
    pub backoff_base: Duration,
    /// Completed-set ring size
    pub keep_completed: usize,
    /// Failed-set ring size
    pub keep_failed: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            keep_completed: 200,
            keep_failed: 500,
        }
    }
}

/// Counters exposed for observability and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    /// retries waiting for their backoff to elapse
    scheduled: Vec<(Instant, Job)>,
    /// ids currently pending or scheduled
    queued_ids: BTreeSet<String>,
    /// ids currently executing
    active_ids: BTreeSet<String>,
    /// deployments with an executing job
    active_deployments: BTreeSet<Uuid>,
    attempts: HashMap<String, u32>,
    completed: VecDeque<String>,
    failed: VecDeque<(String, String)>,
}

/// In-process implementation of the platform's single work queue
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    settings: QueueSettings,
}

impl WorkQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            settings,
        }
    }

    /// Take the next runnable job, waiting until one is available.
    ///
    /// Skips jobs whose deployment already has an executing job; they stay
    /// queued and become runnable when the active job settles.
    pub async fn pop(&self) -> Job {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                self.promote_due(&mut state);
                if let Some(job) = Self::take_runnable(&mut state) {
                    return job;
                }
                state
                    .scheduled
                    .iter()
                    .map(|(due, _)| *due)
                    .min()
                    .map(|due| due.saturating_duration_since(Instant::now()))
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Non-blocking variant of [`pop`](Self::pop), for drain loops and tests
    pub fn try_pop(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        self.promote_due(&mut state);
        Self::take_runnable(&mut state)
    }

    /// Mark an executing job successfully finished
    pub fn complete(&self, job: &Job) {
        let mut state = self.state.lock().unwrap();
        state.active_ids.remove(&job.id);
        state.active_deployments.remove(&job.deployment_id);
        state.attempts.remove(&job.id);
        state.completed.push_back(job.id.clone());
        while state.completed.len() > self.settings.keep_completed {
            state.completed.pop_front();
        }
        self.notify.notify_one();
    }

    /// Record a failed execution. Returns `true` when the job was
    /// re-scheduled, `false` when its attempts are exhausted and it was
    /// parked in the failed set.
    pub fn retry_or_park(&self, job: &Job, error: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.active_ids.remove(&job.id);
        state.active_deployments.remove(&job.deployment_id);

        let attempts = state.attempts.entry(job.id.clone()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;

        if attempts < self.settings.max_attempts {
            // 5s -> 10s -> 20s with the default base
            let delay = self.settings.backoff_base * 2u32.saturating_pow(attempts - 1);
            debug!(job = %job.id, attempts, delay_secs = delay.as_secs(), "Re-scheduling job");
            state.queued_ids.insert(job.id.clone());
            state.scheduled.push((Instant::now() + delay, job.clone()));
            self.notify.notify_one();
            true
        } else {
            warn!(job = %job.id, attempts, error = %error, "Job attempts exhausted");
            state.attempts.remove(&job.id);
            state.failed.push_back((job.id.clone(), error.to_string()));
            while state.failed.len() > self.settings.keep_failed {
                state.failed.pop_front();
            }
            self.notify.notify_one();
            false
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            pending: state.high.len() + state.normal.len(),
            scheduled: state.scheduled.len(),
            active: state.active_ids.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    fn promote_due(&self, state: &mut QueueState) {
        let now = Instant::now();
        let mut index = 0;
        while index < state.scheduled.len() {
            if state.scheduled[index].0 <= now {
                let (_, job) = state.scheduled.remove(index);
                Self::push(state, job);
            } else {
                index += 1;
            }
        }
    }

    fn push(state: &mut QueueState, job: Job) {
        match job.priority {
            JobPriority::High => state.high.push_back(job),
            JobPriority::Normal => state.normal.push_back(job),
        }
    }

    fn take_runnable(state: &mut QueueState) -> Option<Job> {
        for deque in [&mut state.high, &mut state.normal] {
            let position = deque
                .iter()
                .position(|job| !state.active_deployments.contains(&job.deployment_id));
            if let Some(position) = position {
                let job = deque.remove(position).expect("position just found");
                state.queued_ids.remove(&job.id);
                state.active_ids.insert(job.id.clone());
                state.active_deployments.insert(job.deployment_id);
                return Some(job);
            }
        }
        None
    }
}

#[async_trait]
impl JobQueue for WorkQueue {
    async fn enqueue(&self, job: Job) -> caravel_engine::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Queue("queue lock poisoned".to_string()))?;
        if state.queued_ids.contains(&job.id) || state.active_ids.contains(&job.id) {
            debug!(job = %job.id, "Duplicate enqueue ignored");
            return Ok(());
        }
        debug!(job = %job.id, priority = ?job.priority, "Job enqueued");
        state.queued_ids.insert(job.id.clone());
        Self::push(&mut state, job);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_engine::{JobKind, JobPriority};

    fn queue() -> WorkQueue {
        WorkQueue::new(QueueSettings {
            backoff_base: Duration::from_millis(5),
            ..QueueSettings::default()
        })
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let q = queue();
        let id = Uuid::new_v4();
        q.enqueue(Job::new(JobKind::Deploy, id)).await.unwrap();
        q.enqueue(Job::new(JobKind::Deploy, id)).await.unwrap();
        assert_eq!(q.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_high_priority_first() {
        let q = queue();
        let normal = Job::new(JobKind::Deploy, Uuid::new_v4());
        let high = Job::new(JobKind::Deploy, Uuid::new_v4()).with_priority(JobPriority::High);
        q.enqueue(normal).await.unwrap();
        q.enqueue(high.clone()).await.unwrap();
        assert_eq!(q.try_pop().unwrap().id, high.id);
    }

    #[tokio::test]
    async fn test_same_deployment_serialized() {
        let q = queue();
        let id = Uuid::new_v4();
        let deploy = Job::new(JobKind::Deploy, id);
        let upgrade = Job::new(JobKind::Upgrade, id);
        q.enqueue(deploy.clone()).await.unwrap();
        q.enqueue(upgrade.clone()).await.unwrap();

        let first = q.try_pop().unwrap();
        assert_eq!(first.id, deploy.id);
        // the racing upgrade must wait for the active deploy
        assert!(q.try_pop().is_none());
        q.complete(&first);
        assert_eq!(q.try_pop().unwrap().id, upgrade.id);
    }

    #[tokio::test]
    async fn test_retry_backoff_then_park() {
        let q = queue();
        let job = Job::new(JobKind::Deploy, Uuid::new_v4());
        q.enqueue(job.clone()).await.unwrap();

        for attempt in 1..3 {
            let popped = q.try_pop().unwrap();
            assert!(q.retry_or_park(&popped, "boom"), "attempt {}", attempt);
            // not runnable until the backoff elapses
            assert!(q.try_pop().is_none());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let popped = q.try_pop().unwrap();
        assert!(!q.retry_or_park(&popped, "boom"));
        assert_eq!(q.stats().failed, 1);
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_enqueue() {
        let q = std::sync::Arc::new(queue());
        let popper = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = Job::new(JobKind::Deploy, Uuid::new_v4());
        q.enqueue(job.clone()).await.unwrap();
        let popped = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.id, job.id);
    }
}
