//! Fixed-size worker thread pool.
//!
//! A mutex-and-condvar guarded FIFO task queue drained by `N` worker
//! threads, stopped by flipping an atomic flag and broadcasting. Tasks
//! are fire-and-forget: workers just run a boxed closure and discard
//! its return value.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{NetError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    stopping: AtomicBool,
}

/// A fixed-size pool of worker threads consuming one shared task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads. `size` is not adjusted here — callers
    /// resolve "0 means auto" against CPU count in `relay-config` before
    /// reaching this constructor.
    pub fn new(size: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let workers = (0..size)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("relay-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Pushes `task` to the tail of the queue and wakes one worker.
    ///
    /// Fails with [`NetError::PoolStopped`] once [`WorkerPool::stop`] has
    /// been called; the caller (the reactor's dispatch loop) treats this
    /// as its own signal to exit.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().expect("worker pool queue mutex poisoned");
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(NetError::PoolStopped);
        }
        queue.push_back(Box::new(task));
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Signals all workers to stop once the queue drains, then joins them.
    ///
    /// Consumes `self`: a stopped pool cannot be restarted, matching the
    /// original's `Stop()`-on-destruction lifecycle.
    pub fn stop(mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("worker pool queue mutex poisoned");
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.stopping.load(Ordering::SeqCst) {
                    break None;
                }
                queue = shared
                    .condvar
                    .wait(queue)
                    .expect("worker pool queue mutex poisoned");
            }
        };

        match task {
            Some(task) => task(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = WorkerPool::new(4);
        let (tx, rx) = mpsc::channel();
        for i in 0..50 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort_unstable();
        assert_eq!(results, (0..50).collect::<Vec<_>>());
        pool.stop();
    }

    #[test]
    fn submit_after_stop_is_rejected() {
        let pool = WorkerPool::new(2);
        let shared = Arc::clone(&pool.shared);
        shared.stopping.store(true, Ordering::SeqCst);
        assert!(matches!(pool.submit(|| {}), Err(NetError::PoolStopped)));
        pool.stop();
    }
}
