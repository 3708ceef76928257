//! Job manager and thread pool (spec §4.8): one job per input pipeline.
//! The single-threaded variant runs jobs to completion in registration
//! order; the multi-threaded variant submits each job to a shared pool
//! whose workers grow on demand and shrink after sitting idle for ten
//! minutes. On any job error the cue-sync queue is cancelled so sibling
//! jobs waiting on it unblock; the run's final status is the first
//! non-OK status observed.
//!
//! Grounded on `crate::cue_queue::SyncPointQueue`'s mutex+condvar shape,
//! generalized from "one cue map" to "one task queue".

use crate::cue_queue::SyncPointQueue;
use crate::error::{PackagerError, Result};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one job within a `JobManager`'s registry. One per input
/// pipeline, assigned when the job is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Where a registered job currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

struct Inner {
    queue: VecDeque<Task>,
    terminated: bool,
    idle_workers: usize,
    live_workers: usize,
}

/// A pool of worker threads that grow on demand and shrink after an idle
/// timeout. Shared across every job submitted through a `JobManager`.
pub struct ThreadPool {
    state: Mutex<Inner>,
    condvar: Condvar,
}

impl ThreadPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Inner { queue: VecDeque::new(), terminated: false, idle_workers: 0, live_workers: 0 }),
            condvar: Condvar::new(),
        })
    }

    /// Submits `task` to run on a worker thread exactly once. Spawns a
    /// new worker if none is idle. Returns an error once the pool has
    /// been told to terminate.
    pub fn post_task(self: &Arc<Self>, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(PackagerError::Stopped);
        }
        state.queue.push_back(task);
        let need_worker = state.idle_workers == 0;
        if need_worker {
            state.live_workers += 1;
        }
        self.condvar.notify_one();
        if need_worker {
            let pool = Arc::clone(self);
            thread::spawn(move || pool.worker_loop());
        }
        Ok(())
    }

    /// Number of worker threads currently alive (running or idle).
    pub fn worker_count(&self) -> usize {
        self.state.lock().live_workers
    }

    /// Refuses further tasks and drains whatever is already queued;
    /// tasks currently running are allowed to finish. Does not join
    /// worker threads.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        self.condvar.notify_all();
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock();
                loop {
                    if let Some(task) = state.queue.pop_front() {
                        break Some(task);
                    }
                    if state.terminated {
                        break None;
                    }
                    state.idle_workers += 1;
                    let timed_out = self.condvar.wait_for(&mut state, WORKER_IDLE_TIMEOUT).timed_out();
                    state.idle_workers -= 1;
                    if timed_out && state.queue.is_empty() {
                        break None;
                    }
                }
            };
            let Some(task) = task else {
                break;
            };
            task();
        }
        self.state.lock().live_workers -= 1;
    }
}

/// One unit of work a `JobManager` runs: a per-stream pipeline drive
/// closure, reduced to its outcome.
pub type JobFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Runs a batch of jobs either serially on the calling thread or fanned
/// out across a `ThreadPool`, cancelling `cue_queue` on the first
/// failure so siblings rendezvousing on it unblock instead of hanging.
pub struct JobManager {
    pool: Option<Arc<ThreadPool>>,
    cue_queue: Option<Arc<SyncPointQueue>>,
    registry: DashMap<JobId, JobStatus>,
}

impl JobManager {
    /// Single-threaded: jobs run to completion in registration order on
    /// the calling thread.
    pub fn single_threaded() -> Self {
        Self { pool: None, cue_queue: None, registry: DashMap::new() }
    }

    /// Multi-threaded: jobs are submitted to `pool` and run concurrently.
    pub fn multi_threaded(pool: Arc<ThreadPool>) -> Self {
        Self { pool: Some(pool), cue_queue: None, registry: DashMap::new() }
    }

    /// Registers the cue-sync queue to cancel on the first job failure.
    pub fn with_cue_queue(mut self, cue_queue: Arc<SyncPointQueue>) -> Self {
        self.cue_queue = Some(cue_queue);
        self
    }

    /// Current status of a job previously returned by `run`'s internal
    /// bookkeeping; `None` if `job_id` was never registered here.
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.registry.get(&job_id).map(|s| *s)
    }

    /// Runs every job, returning the first non-OK status. On the
    /// single-threaded path a failing job stops later jobs from
    /// starting; on the thread-pool path every job has already been
    /// submitted by the time one fails, so the rest still run to
    /// completion (their results are collected and only the first
    /// failure is reported).
    pub fn run(&self, jobs: Vec<JobFn>) -> Result<()> {
        let ids: Vec<JobId> = jobs.iter().map(|_| JobId::new()).collect();
        for id in &ids {
            self.registry.insert(*id, JobStatus::Running);
        }
        match &self.pool {
            None => self.run_single_threaded(ids, jobs),
            Some(pool) => self.run_multi_threaded(pool, ids, jobs),
        }
    }

    fn run_single_threaded(&self, ids: Vec<JobId>, jobs: Vec<JobFn>) -> Result<()> {
        let mut first_failure = None;
        for (id, job) in ids.into_iter().zip(jobs) {
            let result = job();
            match &result {
                Ok(()) => {
                    self.registry.insert(id, JobStatus::Completed);
                }
                Err(err) => {
                    warn!(error = %err, "job failed, cancelling cue queue");
                    self.registry.insert(id, JobStatus::Failed);
                    if let Some(queue) = &self.cue_queue {
                        queue.cancel();
                    }
                }
            }
            if let Err(err) = result {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
                break;
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_multi_threaded(&self, pool: &Arc<ThreadPool>, ids: Vec<JobId>, jobs: Vec<JobFn>) -> Result<()> {
        let results: Arc<Mutex<Vec<(JobId, Result<()>)>>> = Arc::new(Mutex::new(Vec::with_capacity(jobs.len())));
        let done = Arc::new((Mutex::new(0usize), Condvar::new()));
        let total = jobs.len();
        let cue_queue = self.cue_queue.clone();
        let registry = &self.registry;

        for (id, job) in ids.into_iter().zip(jobs) {
            let results = Arc::clone(&results);
            let done = Arc::clone(&done);
            let cue_queue = cue_queue.clone();
            let posted = pool.post_task(Box::new(move || {
                let result = job();
                if let Err(err) = &result {
                    debug!(error = %err, "job failed");
                    if let Some(queue) = &cue_queue {
                        queue.cancel();
                    }
                }
                results.lock().push((id, result));
                let (count, condvar) = &*done;
                *count.lock() += 1;
                condvar.notify_all();
            }));
            if posted.is_err() {
                results.lock().push((id, Err(PackagerError::Stopped)));
                let (count, condvar) = &*done;
                *count.lock() += 1;
                condvar.notify_all();
            }
        }

        let (count, condvar) = &*done;
        let mut guard = count.lock();
        while *guard < total {
            condvar.wait(&mut guard);
        }
        drop(guard);

        let mut outcomes = results.lock();
        let mut first_failure = None;
        for (id, result) in outcomes.drain(..) {
            match &result {
                Ok(()) => {
                    registry.insert(id, JobStatus::Completed);
                }
                Err(_) => {
                    registry.insert(id, JobStatus::Failed);
                }
            }
            if result.is_err() && first_failure.is_none() {
                first_failure = Some(result);
            }
        }
        first_failure.unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn single_threaded_runs_jobs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = JobManager::single_threaded();
        let jobs: Vec<JobFn> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                Box::new(move || {
                    log.lock().push(i);
                    Ok(())
                }) as JobFn
            })
            .collect();
        manager.run(jobs).unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn single_threaded_stops_after_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = JobManager::single_threaded();
        let log1 = Arc::clone(&log);
        let log2 = Arc::clone(&log);
        let jobs: Vec<JobFn> = vec![
            Box::new(move || {
                log1.lock().push(0);
                Err(PackagerError::MuxerFailure("boom".into()))
            }),
            Box::new(move || {
                log2.lock().push(1);
                Ok(())
            }),
        ];
        let result = manager.run(jobs);
        assert!(result.is_err());
        assert_eq!(*log.lock(), vec![0]);
    }

    #[test]
    fn multi_threaded_runs_every_job_exactly_once() {
        let pool = ThreadPool::new();
        let manager = JobManager::multi_threaded(Arc::clone(&pool));
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<JobFn> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as JobFn
            })
            .collect();
        manager.run(jobs).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        pool.terminate();
    }

    #[test]
    fn multi_threaded_reports_first_failure_but_runs_all_jobs() {
        let pool = ThreadPool::new();
        let manager = JobManager::multi_threaded(Arc::clone(&pool));
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<JobFn> = (0..4)
            .map(|i| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if i == 2 {
                        Err(PackagerError::ChunkingError("bad sample".into()))
                    } else {
                        Ok(())
                    }
                }) as JobFn
            })
            .collect();
        let result = manager.run(jobs);
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        pool.terminate();
    }

    #[test]
    fn terminate_refuses_further_tasks() {
        let pool = ThreadPool::new();
        pool.terminate();
        let result = pool.post_task(Box::new(|| {}));
        assert!(result.is_err());
    }

    #[test]
    fn registry_tracks_completed_and_failed_jobs() {
        let manager = JobManager::single_threaded();
        let jobs: Vec<JobFn> = vec![
            Box::new(|| Ok(())),
            Box::new(|| Err(PackagerError::MuxerFailure("boom".into()))),
        ];
        let _ = manager.run(jobs);
        let statuses: Vec<JobStatus> = manager.registry.iter().map(|e| *e.value()).collect();
        assert!(statuses.contains(&JobStatus::Completed));
        assert!(statuses.contains(&JobStatus::Failed));
    }
}
