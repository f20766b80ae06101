//! In-process fan-out of `WorkflowEvent`s.
//!
//! Events are hints, never the source of truth: a driver that misses one
//! (lagged receiver, event published by another process) still converges
//! because it re-reads checkpoints on its poll interval. `RunWatch` turns
//! the stream into the wake-up a run driver waits on.

use docflow_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast channel shared by the engine, worker pools and run drivers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may fall behind before
    /// it sees a lag instead of the dropped events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Wake-ups for one run. Subscribe before the first evaluation of the
    /// run so that a task finishing in between is not missed.
    pub fn watch_run(&self, run_id: Uuid) -> RunWatch {
        RunWatch {
            run_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish to current subscribers; dropped when there are none.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Subscription filtered to the task completions of one run.
pub struct RunWatch {
    run_id: Uuid,
    receiver: broadcast::Receiver<WorkflowEvent>,
}

impl RunWatch {
    /// Resolve when a task of the watched run finishes, or when events were
    /// dropped and the run should be re-evaluated anyway. Never resolves once
    /// the bus is gone; callers race it against their poll interval.
    pub async fn task_finished(&mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(WorkflowEvent::TaskFinished { run_id, .. }) if run_id == self.run_id => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(run_id = %self.run_id, skipped, "run watch lagged");
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}
