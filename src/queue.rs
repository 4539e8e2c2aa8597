//! Serial execution contexts.
//!
//! A [`SerialQueue`] owns one OS thread and runs submitted work strictly in
//! submission order, one job at a time. The controller keeps three of them:
//! the session queue (every hardware mutation), the frame-delivery queue (raw
//! video/audio buffers) and the main queue (observer callbacks).

use crossbeam::channel::{self, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialQueue {
    label: String,
    sender: Option<Sender<Job>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl SerialQueue {
    /// Spawn a new queue whose worker thread is named after `label`.
    pub fn new<S: Into<String>>(label: S) -> std::io::Result<Self> {
        let label = label.into();
        let (sender, receiver) = channel::unbounded::<Job>();
        let worker_label = label.clone();

        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                debug!("Serial queue {} started", worker_label);
                for job in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job on serial queue {} panicked", worker_label);
                    }
                }
                debug!("Serial queue {} stopped", worker_label);
            })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            label,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Enqueue `work` and return immediately.
    pub fn run_async<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            warn!("Serial queue {} is shut down, dropping job", self.label);
            return;
        };
        if sender.send(Box::new(work)).is_err() {
            warn!("Serial queue {} is gone, dropping job", self.label);
        }
    }

    /// Enqueue `work` and block until it has run, returning its result.
    ///
    /// Called from this queue's own worker the work runs inline instead of
    /// deadlocking. A panic inside `work` is resumed on the calling thread.
    pub fn run_sync<F, R>(&self, work: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return work();
        }

        let Some(sender) = &self.sender else {
            warn!("Serial queue {} is shut down, running job inline", self.label);
            return work();
        };

        let (result_tx, result_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            let _ = result_tx.send(result);
        });

        if let Err(rejected) = sender.send(job) {
            warn!("Serial queue {} is gone, running job inline", self.label);
            (rejected.into_inner())();
        }

        match result_rx.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("serial queue {} dropped a synchronous job", self.label),
        }
    }

    /// Enqueue `work` once `delay` has elapsed.
    pub fn run_after<F>(&self, delay: Duration, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.clone() else {
            warn!("Serial queue {} is shut down, dropping delayed job", self.label);
            return;
        };
        let label = self.label.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}.timer", self.label))
            .spawn(move || {
                thread::sleep(delay);
                if sender.send(Box::new(work)).is_err() {
                    debug!("Serial queue {} closed before delayed job fired", label);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to schedule delayed job on {}: {}", self.label, e);
        }
    }

    /// Block until every job submitted before this call has run.
    pub fn barrier(&self) {
        self.run_sync(|| ());
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if self.is_current() {
                // Dropped from inside one of our own jobs; the worker exits on
                // its own once the channel drains.
                return;
            }
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = SerialQueue::new("test.order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            queue.run_async(move || seen.lock().push(i));
        }
        queue.barrier();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_never_overlap() {
        let queue = Arc::new(SerialQueue::new("test.exclusive").unwrap());
        let active = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let active = Arc::clone(&active);
                        let overlaps = Arc::clone(&overlaps);
                        queue.run_sync(move || {
                            if active.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(50));
                            active.store(false, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in submitters {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_sync_returns_value() {
        let queue = SerialQueue::new("test.value").unwrap();
        assert_eq!(queue.run_sync(|| 21 * 2), 42);
    }

    #[test]
    fn test_nested_run_sync_runs_inline() {
        let queue = Arc::new(SerialQueue::new("test.nested").unwrap());
        let inner = Arc::clone(&queue);
        let value = queue.run_sync(move || {
            assert!(inner.is_current());
            inner.run_sync(|| 7)
        });
        assert_eq!(value, 7);
        assert!(!queue.is_current());
    }

    #[test]
    fn test_panicking_job_does_not_kill_queue() {
        let queue = SerialQueue::new("test.panic").unwrap();
        queue.run_async(|| panic!("boom"));
        assert_eq!(queue.run_sync(|| "alive"), "alive");
    }

    #[test]
    fn test_run_after_waits_for_delay() {
        let queue = SerialQueue::new("test.delay").unwrap();
        let (tx, rx) = channel::bounded(1);
        let submitted = std::time::Instant::now();
        queue.run_after(Duration::from_millis(50), move || {
            let _ = tx.send(submitted.elapsed());
        });
        let elapsed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(elapsed >= Duration::from_millis(50));
    }
}
