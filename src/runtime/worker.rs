//! Worker lifecycle: one-time setup followed by a repeated step.
//!
//! A [`Worker`] owns a [`Job`] and at most one thread running it. The loop
//! is the same whether it runs on a spawned thread ([`Worker::start`]) or
//! on the caller's thread ([`Worker::run_inline`]):
//!
//! ```text
//! running = true
//! job.init(flag)
//! while running { job.frame(flag) }
//! ```
//!
//! Cancellation is cooperative. `stop` clears the flag and joins; a job
//! blocked inside a system call keeps the thread alive until that call
//! returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Unit of repeated work driven by a [`Worker`].
pub trait Job: Send + 'static {
    /// Runs exactly once, before the first `frame`.
    fn init(&mut self, flag: &RunFlag);

    /// Runs repeatedly while the flag is set.
    fn frame(&mut self, flag: &RunFlag);
}

/// Shared running flag. Jobs call [`RunFlag::stop`] to end their own loop
/// after the current `init`/`frame` call returns.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Errors reported by worker lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// `start` was called while the loop is still running.
    AlreadyRunning,
    /// The job did not come back from its thread (it panicked or the
    /// spawn failed), so there is nothing left to run.
    JobLost,
    /// The job panicked on its thread.
    Panicked,
    /// The OS refused to spawn a thread.
    Spawn(String),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::AlreadyRunning => write!(f, "worker is already running"),
            WorkerError::JobLost => {
                write!(f, "worker job was lost to a panic or failed spawn")
            }
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Owns a job and the (optional) background thread executing it.
///
/// The job travels to the thread on `start` and comes back when the thread
/// is joined, so its state can be inspected or the worker restarted.
/// Dropping a worker stops it and joins its thread.
pub struct Worker<J: Job> {
    name: String,
    flag: RunFlag,
    job: Option<J>,
    thread: Option<JoinHandle<J>>,
}

impl<J: Job> Worker<J> {
    /// Create an idle worker.
    pub fn new(name: impl Into<String>, job: J) -> Self {
        Self {
            name: name.into(),
            flag: RunFlag::default(),
            job: Some(job),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_running()
    }

    /// The job, when it is not out on a thread.
    pub fn job(&self) -> Option<&J> {
        self.job.as_ref()
    }

    /// Spawn a thread running `init` then `frame` until stopped.
    ///
    /// A previous thread whose job already stopped itself is joined first;
    /// one that is still running makes this fail with
    /// [`WorkerError::AlreadyRunning`].
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.thread.is_some() {
            if self.flag.is_running() {
                return Err(WorkerError::AlreadyRunning);
            }
            self.join()?;
        }

        let mut job = self.job.take().ok_or(WorkerError::JobLost)?;
        let flag = self.flag.clone();
        self.flag.set();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                run_loop(&mut job, &flag);
                job
            });

        match spawned {
            Ok(handle) => {
                debug!(worker = %self.name, "Worker started");
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure (and the job inside it) is gone with the failed spawn.
                self.flag.stop();
                Err(WorkerError::Spawn(e.to_string()))
            }
        }
    }

    /// Clear the running flag and wait for the thread, if any, to finish.
    ///
    /// Safe to call in any state; an idle worker only has its flag cleared.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        self.flag.stop();
        self.join()
    }

    /// Run the loop on the calling thread until the flag is cleared.
    pub fn run_inline(&mut self) -> Result<(), WorkerError> {
        if self.thread.is_some() {
            if self.flag.is_running() {
                return Err(WorkerError::AlreadyRunning);
            }
            self.join()?;
        }

        let job = self.job.as_mut().ok_or(WorkerError::JobLost)?;
        self.flag.set();
        run_loop(job, &self.flag);
        Ok(())
    }

    /// Clear the flag and let the thread finish on its own, without joining.
    ///
    /// The job is not recoverable afterwards.
    pub fn detach(mut self) {
        self.flag.stop();
        if self.thread.take().is_some() {
            debug!(worker = %self.name, "Worker detached");
        }
    }

    fn join(&mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(job) => {
                    self.job = Some(job);
                    debug!(worker = %self.name, "Worker joined");
                }
                Err(_) => {
                    warn!(worker = %self.name, "Worker thread panicked");
                    return Err(WorkerError::Panicked);
                }
            }
        }
        Ok(())
    }
}

impl<J: Job> Drop for Worker<J> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl<J: Job> std::fmt::Debug for Worker<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.flag.is_running())
            .field("has_thread", &self.thread.is_some())
            .finish()
    }
}

fn run_loop<J: Job>(job: &mut J, flag: &RunFlag) {
    job.init(flag);
    while flag.is_running() {
        job.frame(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts calls; stops itself after `limit` frames.
    #[derive(Default)]
    struct Counter {
        inits: usize,
        frames: usize,
        limit: Option<usize>,
        stop_in_init: bool,
    }

    impl Job for Counter {
        fn init(&mut self, flag: &RunFlag) {
            self.inits += 1;
            if self.stop_in_init {
                flag.stop();
            }
        }

        fn frame(&mut self, flag: &RunFlag) {
            self.frames += 1;
            if Some(self.frames) == self.limit {
                flag.stop();
            }
        }
    }

    /// Spins with a short sleep until stopped externally.
    struct Spinner {
        frames: Arc<AtomicUsize>,
    }

    impl Job for Spinner {
        fn init(&mut self, _flag: &RunFlag) {}

        fn frame(&mut self, _flag: &RunFlag) {
            self.frames.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(1));
        }
    }

    struct Panicker;

    impl Job for Panicker {
        fn init(&mut self, _flag: &RunFlag) {
            panic!("init failed");
        }

        fn frame(&mut self, _flag: &RunFlag) {}
    }

    #[test]
    fn test_run_inline_until_self_stop() {
        let mut worker = Worker::new(
            "counter",
            Counter {
                limit: Some(3),
                ..Default::default()
            },
        );

        worker.run_inline().unwrap();

        let job = worker.job().unwrap();
        assert_eq!(job.inits, 1);
        assert_eq!(job.frames, 3);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_stop_in_init_skips_frames() {
        let mut worker = Worker::new(
            "counter",
            Counter {
                stop_in_init: true,
                ..Default::default()
            },
        );

        worker.run_inline().unwrap();
        assert_eq!(worker.job().unwrap().frames, 0);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_start_then_immediate_stop() {
        let frames = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new(
            "spinner",
            Spinner {
                frames: Arc::clone(&frames),
            },
        );

        worker.start().unwrap();
        worker.stop().unwrap();

        assert!(!worker.is_running());
        assert!(worker.job().is_some());
    }

    #[test]
    fn test_start_rejected_while_running() {
        let frames = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new("spinner", Spinner { frames });

        worker.start().unwrap();
        assert_eq!(worker.start(), Err(WorkerError::AlreadyRunning));
        assert_eq!(worker.run_inline(), Err(WorkerError::AlreadyRunning));
        worker.stop().unwrap();
    }

    #[test]
    fn test_restart_after_self_stop() {
        let mut worker = Worker::new(
            "counter",
            Counter {
                limit: Some(2),
                ..Default::default()
            },
        );

        worker.start().unwrap();
        while worker.is_running() {
            thread::sleep(Duration::from_millis(1));
        }

        // The finished thread is joined and the job comes back for a second run.
        worker.start().unwrap();
        worker.stop().unwrap();
        assert_eq!(worker.job().unwrap().inits, 2);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut worker = Worker::new("counter", Counter::default());
        worker.stop().unwrap();
        worker.stop().unwrap();
        assert!(!worker.is_running());
        assert_eq!(worker.job().unwrap().inits, 0);
    }

    #[test]
    fn test_background_frames_run_until_stop() {
        let frames = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new(
            "spinner",
            Spinner {
                frames: Arc::clone(&frames),
            },
        );

        worker.start().unwrap();
        while frames.load(Ordering::Relaxed) < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        worker.stop().unwrap();

        let seen = frames.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(frames.load(Ordering::Relaxed), seen);
    }

    #[test]
    fn test_panicking_job_reported_on_stop() {
        let mut worker = Worker::new("panicker", Panicker);
        worker.start().unwrap();
        assert_eq!(worker.stop(), Err(WorkerError::Panicked));
        assert!(worker.job().is_none());
    }

    #[test]
    fn test_restart_after_panic_reports_lost_job() {
        let mut worker = Worker::new("panicker", Panicker);
        worker.start().unwrap();
        assert_eq!(worker.stop(), Err(WorkerError::Panicked));

        assert_eq!(worker.start(), Err(WorkerError::JobLost));
        assert_eq!(worker.run_inline(), Err(WorkerError::JobLost));
        assert!(!worker.is_running());
        assert!(worker
            .start()
            .unwrap_err()
            .to_string()
            .contains("panic"));
    }

    #[test]
    fn test_drop_joins_thread() {
        let frames = Arc::new(AtomicUsize::new(0));
        {
            let mut worker = Worker::new(
                "spinner",
                Spinner {
                    frames: Arc::clone(&frames),
                },
            );
            worker.start().unwrap();
        }

        // Only the worker's job held a clone; after the join it has been dropped.
        assert_eq!(Arc::strong_count(&frames), 1);
    }
}
