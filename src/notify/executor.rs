//! Execution contexts for listener callbacks.

use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a listener's callback runs
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs jobs immediately on the calling thread (the marker callback thread,
/// or the delay thread for delayed listeners)
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Spawns jobs onto a tokio runtime
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running inside.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

/// Queues jobs for a thread that drains them itself (typically a UI loop)
pub struct QueueExecutor {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl QueueExecutor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Run every job queued so far on the calling thread.
    ///
    /// # Returns
    /// Number of jobs run
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the receiver before running so jobs may queue more work
            let job = {
                let mut rx = self.rx.lock().unwrap_or_else(|err| err.into_inner());
                rx.try_recv().ok()
            };
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for QueueExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for QueueExecutor {
    fn execute(&self, job: Job) {
        // The receiver lives as long as self
        let _ = self.tx.send(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        InlineExecutor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_runs_only_when_drained() {
        let executor = QueueExecutor::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            executor.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(executor.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(executor.run_pending(), 0);
    }

    #[test]
    fn test_tokio_executor_spawns_on_runtime() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let executor = TokioExecutor::new(rt.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();

        executor.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        }));

        let name = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap();
        assert_ne!(name, std::thread::current().name().map(str::to_string));
    }
}
