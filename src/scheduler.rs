use crossbeam::channel::{bounded, Sender, TrySendError};
use log::{error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub trait Scheduler {
    /// Queues `f` to run concurrently. Never blocks; returns false when the job
    /// was rejected.
    fn spawn<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static;
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads fed by a bounded queue.
///
/// Jobs are fire-and-forget. A panicking job is caught and logged so the worker
/// survives. When the queue is full new jobs are dropped. Dropping the pool lets
/// the workers finish what is already queued and exit.
pub struct HandlerPool {
    jobs: Sender<Job>,
    dropped: Arc<AtomicUsize>,
}

impl HandlerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (jobs, job_rx) = bounded::<Job>(queue_capacity.max(1));

        for n in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("midi-handler-{n}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("MIDI handler panicked");
                        }
                    }
                });
            if let Err(e) = spawned {
                error!("Failed to start handler worker {}: {}", n, e);
            }
        }

        Self {
            jobs,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs rejected because the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Scheduler for HandlerPool {
    fn spawn<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.jobs.try_send(Box::new(f)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Handler queue full, dropping invocation ({} dropped so far)", dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("Handler workers are gone, dropping invocation");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs() {
        let pool = HandlerPool::new(2, 8);
        let (tx, rx) = unbounded();

        for n in 0..4 {
            let tx = tx.clone();
            assert!(pool.spawn(move || {
                tx.send(n).unwrap();
            }));
        }

        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = HandlerPool::new(1, 4);
        let (tx, rx) = unbounded();

        pool.spawn(|| panic!("handler blew up"));
        pool.spawn(move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let pool = HandlerPool::new(1, 1);
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        // occupy the only worker
        pool.spawn(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        assert!(pool.spawn(|| {}));
        assert!(!pool.spawn(|| {}));
        assert_eq!(pool.dropped(), 1);

        drop(release_tx);
    }
}
