//! Delivery of final results to the thread that owns the UI.
//!
//! Completion work runs on the runtime's workers. Callback-style operations
//! hand their final callback to a `Dispatcher`, which decides where it runs.

use tokio::sync::mpsc;

/// A unit of work to run on the receiving side of a dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs jobs on the calling worker. For hosts that marshal callbacks onto
/// their own UI thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Sending half of a UI run loop. Jobs wait until the `MainLoop` runs them.
#[derive(Debug, Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// Receiving half of a UI run loop, owned by the UI thread.
#[derive(Debug)]
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainQueue {
    pub fn new() -> (MainQueue, MainLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MainQueue { tx }, MainLoop { rx })
    }
}

impl Dispatcher for MainQueue {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("main loop is gone; dropping dispatched callback");
        }
    }
}

impl MainLoop {
    /// Run every job already queued, without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it. Returns false once every
    /// `MainQueue` has been dropped and the queue is drained.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}
