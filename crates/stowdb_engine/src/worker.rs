//! The engine's task queue.
//!
//! One dedicated thread drains a FIFO job channel. Every state mutation and
//! every signal delivery happens on this thread, so jobs never run
//! concurrently with each other.

use crate::error::EngineResult;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tracing::{error, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Worker {
    sender: mpsc::Sender<Job>,
}

impl Worker {
    /// Spawns the worker thread. It exits once every sender is gone and the
    /// queue is drained.
    pub(crate) fn spawn(name: &str) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("engine job panicked; continuing with the next job");
                    }
                }
            })?;

        Ok(Self { sender })
    }

    pub(crate) fn submit(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("engine worker has stopped; job dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = Worker::spawn("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            worker.submit(Box::new(move || seen.lock().push(i)));
        }
        worker.submit(Box::new(move || done_tx.send(()).unwrap()));

        done_rx.recv().unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_does_not_stop_the_worker() {
        let worker = Worker::spawn("test-worker").unwrap();
        let (done_tx, done_rx) = mpsc::channel();

        worker.submit(Box::new(|| panic!("boom")));
        worker.submit(Box::new(move || done_tx.send(7).unwrap()));

        assert_eq!(done_rx.recv().unwrap(), 7);
    }
}
