//! One-shot result channel used by every executor operation.
//!
//! A `Responder` and its `Pending` are created together. The responder is
//! consumed by `deliver`, so a result can be sent at most once; if it is
//! dropped without delivering, its drop guard sends `UnknownError(None)`, so
//! the waiting side always gets exactly one result.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::RequestError;
use crate::transport::TaskId;

pub(crate) fn channel<T>() -> (Responder<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Responder { tx: Some(tx) },
        Pending { rx, task_id: None },
    )
}

pub(crate) struct Responder<T> {
    tx: Option<oneshot::Sender<Result<T, RequestError>>>,
}

impl<T> Responder<T> {
    pub(crate) fn deliver(mut self, result: Result<T, RequestError>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped waiting; nothing to do then.
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!("operation ended without a result");
            let _ = tx.send(Err(RequestError::UnknownError(None)));
        }
    }
}

/// The eventual result of one executor operation.
///
/// Resolves exactly once. `task_id` is set when the operation went to the
/// transport, and can be passed to `RequestExecutor::cancel`.
#[must_use = "a Pending does nothing unless awaited"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, RequestError>>,
    task_id: Option<TaskId>,
}

impl<T> Pending<T> {
    /// A result that is already known.
    pub(crate) fn ready(result: Result<T, RequestError>) -> Self {
        let (responder, pending) = channel();
        responder.deliver(result);
        pending
    }

    pub(crate) fn with_task(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::UnknownError(None))))
    }
}
