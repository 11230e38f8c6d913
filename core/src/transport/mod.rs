//! The seam between the executor and whatever performs network I/O.
//!
//! # Design
//! A transport hands out cancellable data tasks. Each task is created with a
//! completion handler that the transport must invoke exactly once, with the
//! raw `(data?, response?, error?)` signals of the call. Cancellation is a
//! request: a task cancelled before it finished reports
//! `TransportError::Cancelled` through the same handler.
//!
//! `UreqTransport` performs real HTTP on the runtime's blocking pool.
//! `FakeTransport` records what it was asked to do and lets tests script the
//! outcome of every task.

mod blocking;
pub mod fake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::http::{RequestDescriptor, TransportOutcome};

pub use blocking::UreqTransport;
pub use fake::FakeTransport;

/// Identifier of a data task, unique per transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Transport-level failure of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Io(String),
}

/// Invoked once when a task finishes, with the task's id and raw outcome.
pub type CompletionHandler = Box<dyn FnOnce(TaskId, TransportOutcome) + Send + 'static>;

/// A started-or-startable network call.
pub trait DataTask: Send + Sync {
    fn id(&self) -> TaskId;

    /// Start the call. Calling it again has no effect.
    fn resume(&self);

    /// Ask the call to stop. Best effort.
    fn cancel(&self);
}

/// Creates data tasks for request descriptors.
pub trait Transport: Send + Sync {
    fn data_task(
        &self,
        request: &RequestDescriptor,
        on_complete: CompletionHandler,
    ) -> Arc<dyn DataTask>;
}
