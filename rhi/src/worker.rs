//! Background worker pool used for material loading.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::GraphicsError;

type Job = Box<dyn FnOnce() + Send>;

/// A fixed set of named threads pulling boxed jobs from a shared queue.
///
/// Jobs start in submission order but may finish in any order. A panicking
/// job is logged and does not take its thread down. Dropping the pool lets
/// queued jobs finish, then joins every thread.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one) named `"{name}-{index}"`.
    pub fn new(name: &str, threads: usize) -> Result<Self, GraphicsError> {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            let worker = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&receiver))
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "Failed to spawn worker thread {name}-{index}: {e}"
                    ))
                })?;
            workers.push(worker);
        }
        log::debug!("WorkerPool '{}': {} threads", name, threads);

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue `job` on the pool.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(Box::new(job)).is_ok());
        if !queued {
            log::error!("WorkerPool: all workers have exited, job dropped");
        }
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log::error!("WorkerPool: worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(WorkerPool: Send, Sync);

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        // The lock is released before the job runs.
        let job = receiver.lock().recv();
        let Ok(job) = job else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("WorkerPool: job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_jobs_run_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new("test", 3).unwrap();
            for _ in 0..32 {
                let counter = Arc::clone(&counter);
                pool.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_zero_threads_spawns_one() {
        let pool = WorkerPool::new("test", 0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_workers_are_named() {
        let names = Arc::new(Mutex::new(HashSet::new()));
        {
            let pool = WorkerPool::new("loader", 2).unwrap();
            for _ in 0..8 {
                let names = Arc::clone(&names);
                pool.spawn(move || {
                    if let Some(name) = std::thread::current().name() {
                        names.lock().insert(name.to_string());
                    }
                });
            }
        }
        assert!(names.lock().iter().all(|n| n.starts_with("loader-")));
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new("test", 1).unwrap();
        pool.spawn(|| panic!("boom"));
        pool.spawn(move || tx.send(7).unwrap());
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
