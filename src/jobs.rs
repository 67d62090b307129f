//! Background execution of analysis runs on a dedicated thread pool

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{DeaError, Result};
use crate::pipeline::{run_analysis, AnalysisInput, RunOutput};

/// Handle ids are unique across every queue in the process
static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of a submitted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunHandle(u64);

/// State of a submitted run
#[derive(Debug, Clone)]
pub enum RunStatus {
    Pending,
    Done(Arc<RunOutput>),
    Failed(Arc<DeaError>),
}

impl RunStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Pending)
    }
}

#[derive(Default)]
struct Shared {
    statuses: Mutex<HashMap<RunHandle, RunStatus>>,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<RunHandle, RunStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Queue of analysis runs
///
/// `submit` returns immediately; the run executes on the queue's own rayon pool.
/// Statuses stay available for the life of the queue.
pub struct RunQueue {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
}

impl RunQueue {
    /// Create a queue; `threads == 0` lets rayon pick the pool size
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dea-run-{}", i))
            .build()
            .map_err(|e| DeaError::Internal {
                reason: format!("cannot start run thread pool: {}", e),
            })?;
        Ok(Self {
            pool,
            shared: Arc::new(Shared::default()),
        })
    }

    /// Schedule a run without blocking
    pub fn submit(&self, input: AnalysisInput) -> RunHandle {
        self.spawn(move || run_analysis(&input))
    }

    fn spawn<F>(&self, job: F) -> RunHandle
    where
        F: FnOnce() -> Result<RunOutput> + Send + 'static,
    {
        let handle = RunHandle(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed));
        self.shared.lock().insert(handle, RunStatus::Pending);
        log::debug!("Run {} submitted", handle.0);

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            let status = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(output)) => RunStatus::Done(Arc::new(output)),
                Ok(Err(e)) => {
                    log::warn!("Run {} failed: {}", handle.0, e);
                    RunStatus::Failed(Arc::new(e))
                }
                Err(payload) => {
                    let reason = format!("run panicked: {}", panic_message(payload.as_ref()));
                    log::warn!("Run {} failed: {}", handle.0, reason);
                    RunStatus::Failed(Arc::new(DeaError::Internal { reason }))
                }
            };
            shared.lock().insert(handle, status);
            shared.finished.notify_all();
        });
        handle
    }

    /// Current status; `None` for a handle this queue never issued
    pub fn poll(&self, handle: &RunHandle) -> Option<RunStatus> {
        self.shared.lock().get(handle).cloned()
    }

    /// Block until the run leaves `Pending`
    pub fn wait(&self, handle: &RunHandle) -> Option<RunStatus> {
        let mut statuses = self.shared.lock();
        loop {
            match statuses.get(handle) {
                None => return None,
                Some(RunStatus::Pending) => {
                    statuses = self
                        .shared
                        .finished
                        .wait(statuses)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(status) => return Some(status.clone()),
            }
        }
    }

    /// Remove a finished run from the queue and return its status
    ///
    /// Pending runs are left in place and reported as `Pending`.
    pub fn take(&self, handle: &RunHandle) -> Option<RunStatus> {
        let mut statuses = self.shared.lock();
        match statuses.get(handle) {
            Some(RunStatus::Pending) => Some(RunStatus::Pending),
            Some(_) => statuses.remove(handle),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisParams;
    use crate::pipeline::tests::simulated_tables;

    #[test]
    fn test_submit_and_wait() {
        let queue = RunQueue::new(2).unwrap();
        let (counts, metadata) = simulated_tables(30, 3, 5);
        let handle = queue.submit(AnalysisInput::new(counts, metadata, AnalysisParams::default()));

        match queue.wait(&handle) {
            Some(RunStatus::Done(output)) => {
                assert!(output.artifact.contains("matrice:"));
                assert!(!output.heatmap_png.is_empty());
                assert!(!output.volcano_png.is_empty());
            }
            other => panic!("unexpected status {:?}", other),
        }

        // Polling a finished run is idempotent
        assert!(!queue.poll(&handle).unwrap().is_pending());
        let first = queue.poll(&handle).unwrap();
        let second = queue.poll(&handle).unwrap();
        match (first, second) {
            (RunStatus::Done(a), RunStatus::Done(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("run should stay done"),
        }
    }

    #[test]
    fn test_failed_run() {
        let queue = RunQueue::new(1).unwrap();
        let input = AnalysisInput::new(b"".to_vec(), b"".to_vec(), AnalysisParams::default());
        let handle = queue.submit(input);
        match queue.wait(&handle) {
            Some(RunStatus::Failed(e)) => assert!(matches!(*e, DeaError::Parse { .. })),
            _ => panic!("empty input should fail"),
        }
    }

    #[test]
    fn test_panic_becomes_internal_error() {
        let queue = RunQueue::new(1).unwrap();
        let handle = queue.spawn(|| panic!("boom"));
        match queue.wait(&handle) {
            Some(RunStatus::Failed(e)) => {
                assert!(matches!(*e, DeaError::Internal { .. }));
                assert!(e.to_string().contains("boom"));
            }
            _ => panic!("panicking run should fail"),
        }
    }

    #[test]
    fn test_unknown_handle() {
        let queue = RunQueue::new(1).unwrap();
        let other = RunQueue::new(1).unwrap();
        let handle = other.spawn(|| Err(DeaError::invalid("never mind")));
        assert!(queue.poll(&handle).is_none());
        assert!(queue.wait(&handle).is_none());
        assert!(other.wait(&handle).is_some());
    }

    #[test]
    fn test_handles_are_not_shared_between_queues() {
        let first = RunQueue::new(1).unwrap();
        let second = RunQueue::new(1).unwrap();
        let a = first.spawn(|| Err(DeaError::invalid("first queue")));
        let b = second.spawn(|| Err(DeaError::invalid("second queue")));
        assert_ne!(a, b);

        // Both queues hold a run, yet neither answers for the other's handle
        assert!(first.wait(&a).is_some());
        assert!(second.wait(&b).is_some());
        assert!(first.poll(&b).is_none());
        assert!(second.poll(&a).is_none());
        match second.poll(&b) {
            Some(RunStatus::Failed(e)) => assert!(e.to_string().contains("second queue")),
            _ => panic!("second queue should report its own run"),
        }
    }

    #[test]
    fn test_take_releases_finished_run() {
        let queue = RunQueue::new(1).unwrap();
        let handle = queue.spawn(|| Err(DeaError::invalid("bad alpha")));
        queue.wait(&handle);
        match queue.take(&handle) {
            Some(RunStatus::Failed(e)) => {
                let e = Arc::try_unwrap(e).unwrap();
                assert!(matches!(e, DeaError::InvalidParameter { .. }));
            }
            _ => panic!("run should have failed"),
        }
        assert!(queue.poll(&handle).is_none());
    }
}
