//! Waiting for a run to reach its terminal lifecycle phase.

use std::collections::VecDeque;
use std::time::Duration;

use gateway_protocol::LifecycleEvent;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::CompletionError;

/// How a completion wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub run_id: String,
    pub status: CompletionStatus,
}

/// The `runId` a call returned, e.g. from `chat.send`.
pub fn run_id_from_payload(payload: &Value) -> Option<&str> {
    payload
        .get("runId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

pub(crate) type CompletionReply = oneshot::Sender<Result<Completion, CompletionError>>;

struct PendingCompletion {
    run_id: String,
    deadline: Instant,
    reply: CompletionReply,
}

/// How many ended run ids are remembered for waits that arrive late.
const RECENTLY_ENDED: usize = 64;

/// Single-slot waiter. Owned by the connection's dispatch task.
pub(crate) struct CompletionWaiter {
    slot: Option<PendingCompletion>,
    /// Runs whose `end` arrived on this connection, oldest first.
    ended: VecDeque<String>,
}

impl CompletionWaiter {
    pub fn new() -> Self {
        Self {
            slot: None,
            ended: VecDeque::with_capacity(RECENTLY_ENDED),
        }
    }

    /// Start waiting for `run_id`. A run that already ended on this
    /// connection completes at once. A second wait while one is live is
    /// refused; a slot whose caller went away is reused.
    pub fn register(
        &mut self,
        run_id: String,
        timeout: Duration,
        now: Instant,
        reply: CompletionReply,
    ) {
        if self.ended.contains(&run_id) {
            debug!(%run_id, "run already ended");
            let _ = reply.send(Ok(Completion {
                run_id,
                status: CompletionStatus::Completed,
            }));
            return;
        }
        if let Some(current) = &self.slot {
            if !current.reply.is_closed() {
                let _ = reply.send(Err(CompletionError::AlreadyWaiting {
                    run_id: current.run_id.clone(),
                }));
                return;
            }
            debug!(run_id = %current.run_id, "replacing abandoned completion wait");
        }
        debug!(%run_id, timeout_ms = timeout.as_millis() as u64, "waiting for run completion");
        self.slot = Some(PendingCompletion {
            run_id,
            deadline: now + timeout,
            reply,
        });
    }

    /// Settle the wait if `event` ends the awaited run. Returns whether it did.
    pub fn on_lifecycle(&mut self, event: &LifecycleEvent) -> bool {
        if event.phase.is_terminal() {
            self.remember_ended(&event.run_id);
        }
        let matches = self
            .slot
            .as_ref()
            .is_some_and(|pending| pending.run_id == event.run_id);
        if !matches || !event.phase.is_terminal() {
            trace!(run_id = %event.run_id, phase = event.phase.as_str(), "lifecycle event");
            return false;
        }
        self.settle(CompletionStatus::Completed)
    }

    pub fn expire(&mut self, now: Instant) -> bool {
        if self.slot.as_ref().is_some_and(|pending| pending.deadline <= now) {
            return self.settle(CompletionStatus::Timeout);
        }
        false
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slot.as_ref().map(|pending| pending.deadline)
    }

    /// Fail a live wait because the connection is gone.
    pub fn close(&mut self) {
        if let Some(pending) = self.slot.take() {
            let _ = pending.reply.send(Err(CompletionError::ConnectionClosed {
                run_id: pending.run_id,
            }));
        }
    }

    fn remember_ended(&mut self, run_id: &str) {
        if self.ended.iter().any(|ended| ended == run_id) {
            return;
        }
        if self.ended.len() == RECENTLY_ENDED {
            self.ended.pop_front();
        }
        self.ended.push_back(run_id.to_string());
    }

    fn settle(&mut self, status: CompletionStatus) -> bool {
        let Some(pending) = self.slot.take() else {
            return false;
        };
        debug!(run_id = %pending.run_id, ?status, "completion wait settled");
        let _ = pending.reply.send(Ok(Completion {
            run_id: pending.run_id,
            status,
        }));
        true
    }
}
