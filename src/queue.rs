//! Bounded in-memory job queues.
//!
//! Each backend gets one [`JobQueue`]: an insertion-ordered map of queued
//! jobs with byte-capacity accounting, per-token concurrency caps, and a
//! hybrid FIFO-bounded-priority pop. [`JobQueueContainer`] routes
//! operations to the queue of a backend, or to a single unified queue.

use chrono::{DateTime, Duration, FixedOffset};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::{
    DEFAULT_MAX_JOBS_TO_CONSIDER, DEFAULT_MAX_WAITING_TIME_MINUTES, UNIFIED_BACKEND_KEY,
};
use crate::error::{SchedulerError, SchedulerResult};
use crate::priority::{BurstScoreTable, JobPriority, PriorityConfig};

/// An entry held in a job queue.
#[derive(Debug, Clone)]
pub struct JobQueueEntry {
    token: String,
    program: Vec<u8>,
    priority: JobPriority,
}

impl JobQueueEntry {
    /// Byte footprint used for capacity accounting: fixed overhead plus
    /// token and serialized-program lengths.
    fn cost_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.token.len() + self.program.len()
    }
}

/// Tunables of a single job queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum number of bytes the queue can store.
    pub capacity_bytes: usize,
    /// Maximum number of jobs to consider when ranking by priority.
    pub max_jobs_to_consider: usize,
    /// Maximum waiting time per job before it is popped unconditionally.
    pub max_waiting_time_per_job: Duration,
    /// Role to the maximum number of concurrent jobs per token. Roles not
    /// present in the mapping are uncapped.
    pub max_concurrent_jobs_per_token: HashMap<String, usize>,
}

impl QueueSettings {
    /// Settings with the default pop window and no per-token caps.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            max_jobs_to_consider: DEFAULT_MAX_JOBS_TO_CONSIDER,
            max_waiting_time_per_job: Duration::minutes(DEFAULT_MAX_WAITING_TIME_MINUTES),
            max_concurrent_jobs_per_token: HashMap::new(),
        }
    }
}

/// Bounded priority queue for a single backend.
pub struct JobQueue {
    settings: QueueSettings,
    current_bytes: usize,
    jobs: IndexMap<String, JobQueueEntry>,
    token_job_counts: HashMap<String, usize>,
    priority_config: Arc<PriorityConfig>,
    burst_scores: Arc<BurstScoreTable>,
}

impl JobQueue {
    /// Create an empty queue sharing the process-wide priority state.
    pub fn new(
        settings: QueueSettings,
        priority_config: Arc<PriorityConfig>,
        burst_scores: Arc<BurstScoreTable>,
    ) -> Self {
        Self {
            settings,
            current_bytes: 0,
            jobs: IndexMap::new(),
            token_job_counts: HashMap::new(),
            priority_config,
            burst_scores,
        }
    }

    /// Push a job onto the queue.
    ///
    /// Returns `Ok(false)` when the job is refused by a per-token cap or by
    /// the byte capacity. A duplicate job ID is an invariant violation and
    /// fails with [`SchedulerError::DuplicateJobId`].
    pub fn try_push(
        &mut self,
        job_id: &str,
        program: Vec<u8>,
        token: &str,
        role: &str,
        queued_at: DateTime<FixedOffset>,
        timeout: Duration,
    ) -> SchedulerResult<bool> {
        if self.jobs.contains_key(job_id) {
            return Err(SchedulerError::DuplicateJobId(job_id.to_string()));
        }

        if let Some(cap) = self.settings.max_concurrent_jobs_per_token.get(role) {
            let count = self.token_job_counts.get(token).copied().unwrap_or(0);
            if count >= *cap {
                return Ok(false);
            }
        }

        let priority = JobPriority::new(&self.priority_config, token, role, queued_at, timeout);
        let entry = JobQueueEntry {
            token: token.to_string(),
            program,
            priority,
        };

        if self.current_bytes + entry.cost_bytes() > self.settings.capacity_bytes {
            return Ok(false);
        }

        self.burst_scores.update(token, queued_at);

        self.current_bytes += entry.cost_bytes();
        self.token_job_counts
            .entry(token.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
        self.jobs.insert(job_id.to_string(), entry);
        Ok(true)
    }

    /// Pop the next job to run, or `None` if the queue is empty.
    ///
    /// Only the first `max_jobs_to_consider` entries in insertion order are
    /// candidates. The earliest candidate whose waiting time exceeds
    /// `max_waiting_time_per_job` wins outright; otherwise the candidate
    /// with the highest total priority does, ties going to the earlier
    /// insertion.
    pub fn try_pop(&mut self, current_time: DateTime<FixedOffset>) -> Option<(String, Vec<u8>)> {
        if self.jobs.is_empty() {
            return None;
        }

        let num_candidates = self.settings.max_jobs_to_consider.min(self.jobs.len());
        let max_age = self.settings.max_waiting_time_per_job;

        let mut selected: Option<String> = None;
        let mut best_priority = f64::NEG_INFINITY;
        let mut best_id: Option<&str> = None;

        for (job_id, entry) in self.jobs.iter().take(num_candidates) {
            if entry.priority.waiting_time(current_time) > max_age {
                selected = Some(job_id.clone());
                break;
            }
            let priority = entry.priority.calc_priority(
                &self.priority_config,
                &self.burst_scores,
                current_time,
                max_age,
            );
            if priority > best_priority {
                best_priority = priority;
                best_id = Some(job_id.as_str());
            }
        }

        let job_id = selected.or_else(|| best_id.map(str::to_string))?;
        let entry = self.jobs.shift_remove(&job_id)?;
        self.forget_entry(&entry);
        Some((job_id, entry.program))
    }

    /// Remove a job from the queue, returning whether it was present.
    pub fn try_remove(&mut self, job_id: &str) -> bool {
        match self.jobs.shift_remove(job_id) {
            Some(entry) => {
                self.forget_entry(&entry);
                true
            }
            None => false,
        }
    }

    fn forget_entry(&mut self, entry: &JobQueueEntry) {
        self.current_bytes -= entry.cost_bytes();
        if let Some(count) = self.token_job_counts.get_mut(&entry.token) {
            *count -= 1;
            if *count == 0 {
                self.token_job_counts.remove(&entry.token);
            }
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Bytes currently accounted against the capacity.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Number of queued jobs held by the given token.
    pub fn token_job_count(&self, token: &str) -> usize {
        self.token_job_counts.get(token).copied().unwrap_or(0)
    }
}

/// Container routing queue operations to one queue per backend, or to a
/// single unified queue.
pub struct JobQueueContainer {
    queues: HashMap<String, JobQueue>,
    unify_backends: bool,
}

impl JobQueueContainer {
    /// Build one queue per backend, or a single `all` queue when
    /// `unify_backends` is set. All queues share the same priority
    /// configuration and burst-score table.
    pub fn new<I>(
        backends: I,
        settings: QueueSettings,
        priority_config: Arc<PriorityConfig>,
        unify_backends: bool,
    ) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let burst_scores = Arc::new(BurstScoreTable::new(priority_config.burst_score_half_life));
        let queues = if unify_backends {
            let mut queues = HashMap::new();
            queues.insert(
                UNIFIED_BACKEND_KEY.to_string(),
                JobQueue::new(
                    settings,
                    Arc::clone(&priority_config),
                    Arc::clone(&burst_scores),
                ),
            );
            queues
        } else {
            backends
                .into_iter()
                .map(|backend| {
                    (
                        backend,
                        JobQueue::new(
                            settings.clone(),
                            Arc::clone(&priority_config),
                            Arc::clone(&burst_scores),
                        ),
                    )
                })
                .collect()
        };

        Self {
            queues,
            unify_backends,
        }
    }

    /// Whether a queue exists for the given backend. Always true in
    /// unified mode.
    pub fn contains(&self, backend: &str) -> bool {
        self.unify_backends || self.queues.contains_key(backend)
    }

    /// Get the queue for a backend.
    pub fn get(&self, backend: &str) -> SchedulerResult<&JobQueue> {
        let key = self.resolve(backend);
        self.queues
            .get(key)
            .ok_or_else(|| SchedulerError::UnknownBackend(backend.to_string()))
    }

    /// Get the queue for a backend, mutably.
    pub fn get_mut(&mut self, backend: &str) -> SchedulerResult<&mut JobQueue> {
        let key = if self.unify_backends {
            UNIFIED_BACKEND_KEY
        } else {
            backend
        };
        self.queues
            .get_mut(key)
            .ok_or_else(|| SchedulerError::UnknownBackend(backend.to_string()))
    }

    fn resolve<'a>(&self, backend: &'a str) -> &'a str {
        if self.unify_backends {
            UNIFIED_BACKEND_KEY
        } else {
            backend
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::jst;
    use chrono::TimeZone;

    fn t0() -> DateTime<FixedOffset> {
        jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    fn queue_with(settings: QueueSettings) -> JobQueue {
        let config = Arc::new(PriorityConfig::default());
        let burst = Arc::new(BurstScoreTable::new(config.burst_score_half_life));
        JobQueue::new(settings, config, burst)
    }

    fn push(
        queue: &mut JobQueue,
        job_id: &str,
        token: &str,
        role: &str,
        queued_at: DateTime<FixedOffset>,
        timeout: Duration,
    ) -> bool {
        queue
            .try_push(job_id, b"program".to_vec(), token, role, queued_at, timeout)
            .unwrap()
    }

    #[test]
    fn test_push_pop_accounting() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(push(&mut queue, "a", "t1", "guest", t0(), Duration::seconds(1)));
        assert!(push(&mut queue, "b", "t1", "guest", t0(), Duration::seconds(1)));
        assert!(push(&mut queue, "c", "t2", "guest", t0(), Duration::seconds(1)));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.token_job_count("t1"), 2);
        assert_eq!(queue.token_job_count("t2"), 1);
        let bytes_full = queue.current_bytes();
        assert!(bytes_full > 0);

        assert!(queue.try_pop(t0() + Duration::seconds(1)).is_some());
        assert!(queue.try_remove("c"));
        assert_eq!(queue.token_job_count("t2"), 0);
        assert_eq!(queue.len(), 1);
        assert!(queue.current_bytes() < bytes_full);

        assert!(queue.try_pop(t0() + Duration::seconds(2)).is_some());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.current_bytes(), 0);
        assert_eq!(queue.token_job_count("t1"), 0);
    }

    #[test]
    fn test_push_duplicate_id_is_invariant_violation() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(push(&mut queue, "a", "t1", "guest", t0(), Duration::seconds(1)));
        let result = queue.try_push(
            "a",
            b"program".to_vec(),
            "t1",
            "guest",
            t0(),
            Duration::seconds(1),
        );
        assert!(matches!(result, Err(SchedulerError::DuplicateJobId(_))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_push_refused_by_capacity() {
        let mut queue = queue_with(QueueSettings::with_capacity(0));
        assert!(!push(&mut queue, "a", "t1", "guest", t0(), Duration::seconds(1)));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.current_bytes(), 0);
    }

    #[test]
    fn test_push_refused_by_token_cap() {
        let mut settings = QueueSettings::with_capacity(1 << 20);
        settings
            .max_concurrent_jobs_per_token
            .insert("guest".to_string(), 2);
        let mut queue = queue_with(settings);

        assert!(push(&mut queue, "a", "t1", "guest", t0(), Duration::seconds(1)));
        assert!(push(&mut queue, "b", "t1", "guest", t0(), Duration::seconds(1)));
        assert!(!push(&mut queue, "c", "t1", "guest", t0(), Duration::seconds(1)));
        // A different token is unaffected, and uncapped roles are not limited.
        assert!(push(&mut queue, "d", "t2", "guest", t0(), Duration::seconds(1)));
        assert!(push(&mut queue, "e", "t1", "admin", t0(), Duration::seconds(1)));

        // Removing frees the slot.
        assert!(queue.try_remove("a"));
        assert!(push(&mut queue, "f", "t1", "guest", t0(), Duration::seconds(1)));
    }

    #[test]
    fn test_pop_empty_queue() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(queue.try_pop(t0()).is_none());
    }

    #[test]
    fn test_pop_prefers_shorter_timeout() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(push(&mut queue, "slow", "t1", "guest", t0(), Duration::seconds(60)));
        assert!(push(&mut queue, "fast", "t2", "guest", t0(), Duration::seconds(1)));

        let (job_id, _) = queue.try_pop(t0() + Duration::seconds(1)).unwrap();
        assert_eq!(job_id, "fast");
    }

    #[test]
    fn test_pop_tie_breaks_by_insertion_order() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(push(&mut queue, "first", "t1", "guest", t0(), Duration::seconds(1)));
        assert!(push(&mut queue, "second", "t2", "guest", t0(), Duration::seconds(1)));

        let (job_id, _) = queue.try_pop(t0() + Duration::seconds(1)).unwrap();
        assert_eq!(job_id, "first");
    }

    #[test]
    fn test_pop_starvation_avoidance_order() {
        let mut settings = QueueSettings::with_capacity(1 << 20);
        settings.max_jobs_to_consider = 3;
        settings.max_waiting_time_per_job = Duration::minutes(30);
        let mut queue = queue_with(settings);

        let now = t0();
        assert!(push(
            &mut queue,
            "admin-20m",
            "t1",
            "admin",
            now - Duration::minutes(20),
            Duration::milliseconds(1),
        ));
        assert!(push(
            &mut queue,
            "dev-40m-fast",
            "t2",
            "developer",
            now - Duration::minutes(40),
            Duration::milliseconds(900),
        ));
        assert!(push(
            &mut queue,
            "dev-40m",
            "t3",
            "developer",
            now - Duration::minutes(40),
            Duration::seconds(1),
        ));
        assert!(push(
            &mut queue,
            "guest-35m",
            "t4",
            "guest",
            now - Duration::minutes(35),
            Duration::seconds(1),
        ));
        assert!(push(
            &mut queue,
            "admin-60m",
            "t5",
            "admin",
            now - Duration::minutes(60),
            Duration::seconds(1),
        ));

        let mut order = Vec::new();
        while let Some((job_id, _)) = queue.try_pop(now) {
            order.push(job_id);
        }
        assert_eq!(
            order,
            vec![
                "dev-40m-fast",
                "dev-40m",
                "guest-35m",
                "admin-60m",
                "admin-20m"
            ]
        );
    }

    #[test]
    fn test_remove_absent_job() {
        let mut queue = queue_with(QueueSettings::with_capacity(1 << 20));
        assert!(!queue.try_remove("missing"));
    }

    #[test]
    fn test_container_routes_per_backend() {
        let config = Arc::new(PriorityConfig::default());
        let mut container = JobQueueContainer::new(
            vec!["qpu".to_string(), "emulator".to_string()],
            QueueSettings::with_capacity(1 << 20),
            config,
            false,
        );

        assert!(container.contains("qpu"));
        assert!(container.contains("emulator"));
        assert!(!container.contains("nope"));
        assert!(matches!(
            container.get_mut("nope"),
            Err(SchedulerError::UnknownBackend(_))
        ));

        let queue = container.get_mut("qpu").unwrap();
        assert!(queue
            .try_push(
                "a",
                b"program".to_vec(),
                "t1",
                "guest",
                t0(),
                Duration::seconds(1)
            )
            .unwrap());
        assert_eq!(container.get("qpu").unwrap().len(), 1);
        assert_eq!(container.get("emulator").unwrap().len(), 0);
    }

    #[test]
    fn test_container_unified_mode() {
        let config = Arc::new(PriorityConfig::default());
        let mut container = JobQueueContainer::new(
            vec!["qpu".to_string()],
            QueueSettings::with_capacity(1 << 20),
            config,
            true,
        );

        // Any key resolves to the single unified queue.
        assert!(container.contains("anything"));
        let queue = container.get_mut("whatever").unwrap();
        assert!(queue
            .try_push(
                "a",
                b"program".to_vec(),
                "t1",
                "guest",
                t0(),
                Duration::seconds(1)
            )
            .unwrap());
        assert_eq!(container.get("other").unwrap().len(), 1);
    }
}
