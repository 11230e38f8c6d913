//! In-memory transport for tests and previews.
//!
//! Every `data_task` call is recorded. A resumed task completes immediately
//! with the next queued outcome (see `respond_with`); with nothing queued it
//! stays pending until `finish` is called or it is cancelled. Cancelling a
//! pending task reports `TransportError::Cancelled`, the way a real session
//! reports a cancelled call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CompletionHandler, DataTask, TaskId, Transport, TransportError};
use crate::http::{RequestDescriptor, TransportOutcome};

#[derive(Default)]
struct FakeState {
    next_id: u64,
    queued: VecDeque<TransportOutcome>,
    requests: Vec<RequestDescriptor>,
    resumed: Vec<TaskId>,
    cancelled: Vec<TaskId>,
    pending: HashMap<TaskId, CompletionHandler>,
}

/// A scriptable `Transport` that never touches the network.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of the next resumed task.
    pub fn respond_with(&self, outcome: TransportOutcome) -> &Self {
        self.state().queued.push_back(outcome);
        self
    }

    /// Complete a pending task. Returns false if the task is not pending.
    pub fn finish(&self, id: TaskId, outcome: TransportOutcome) -> bool {
        let handler = self.state().pending.remove(&id);
        match handler {
            Some(handler) => {
                handler(id, outcome);
                true
            }
            None => false,
        }
    }

    /// Every descriptor handed to `data_task`, in order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.state().requests.clone()
    }

    pub fn data_task_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn resumed(&self) -> Vec<TaskId> {
        self.state().resumed.clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.state().cancelled.clone()
    }

    /// How many times `cancel` was called on `id`.
    pub fn cancel_count(&self, id: TaskId) -> usize {
        self.state().cancelled.iter().filter(|c| **c == id).count()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.state().pending.contains_key(&id)
    }
}

impl Transport for FakeTransport {
    fn data_task(
        &self,
        request: &RequestDescriptor,
        on_complete: CompletionHandler,
    ) -> Arc<dyn DataTask> {
        let mut state = self.state();
        state.next_id += 1;
        let id = TaskId::new(state.next_id);
        state.requests.push(request.clone());
        state.pending.insert(id, on_complete);
        Arc::new(FakeTask {
            id,
            transport: self.clone(),
        })
    }
}

struct FakeTask {
    id: TaskId,
    transport: FakeTransport,
}

impl DataTask for FakeTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        let ready = {
            let mut state = self.transport.state();
            if state.resumed.contains(&self.id) {
                return;
            }
            state.resumed.push(self.id);
            match state.queued.pop_front() {
                Some(outcome) => state.pending.remove(&self.id).map(|h| (h, outcome)),
                None => None,
            }
        };
        if let Some((handler, outcome)) = ready {
            handler(self.id, outcome);
        }
    }

    fn cancel(&self) {
        let handler = {
            let mut state = self.transport.state();
            state.cancelled.push(self.id);
            state.pending.remove(&self.id)
        };
        if let Some(handler) = handler {
            handler(self.id, TransportOutcome::failed(TransportError::Cancelled));
        }
    }
}
