//! Correlation of outbound requests with their responses.
//!
//! Owned by the connection's dispatch task; nothing here is shared.

use std::collections::HashMap;
use std::time::Duration;

use gateway_protocol::ResponseFrame;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CallError;

pub(crate) type CallReply = oneshot::Sender<Result<Value, CallError>>;

struct PendingCall {
    method: String,
    timeout: Duration,
    deadline: Instant,
    reply: CallReply,
}

/// In-flight calls keyed by request id. Each entry is settled exactly once:
/// by its response, by its deadline, or by connection teardown.
pub(crate) struct PendingCalls {
    next_id: u64,
    calls: HashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            calls: HashMap::new(),
        }
    }

    /// Allocate the next request id and track the call under it.
    pub fn register(
        &mut self,
        method: &str,
        timeout: Duration,
        now: Instant,
        reply: CallReply,
    ) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.calls.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                timeout,
                deadline: now + timeout,
                reply,
            },
        );
        id
    }

    /// Settle the call the response belongs to. Responses for unknown or
    /// already-settled ids are dropped.
    pub fn resolve(&mut self, response: ResponseFrame) -> bool {
        let Some(call) = self.calls.remove(&response.id) else {
            debug!(id = %response.id, "dropping response for unknown request");
            return false;
        };
        let id = response.id.clone();
        let result = response.into_result().map_err(|error| CallError::Remote {
            method: call.method.clone(),
            error,
        });
        if call.reply.send(result).is_err() {
            debug!(%id, method = %call.method, "caller went away before response");
        }
        true
    }

    /// Settle one call with `error`.
    pub fn reject(&mut self, id: &str, error: CallError) -> bool {
        match self.calls.remove(id) {
            Some(call) => {
                let _ = call.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Time out every call whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(call) = self.calls.remove(id) {
                warn!(%id, method = %call.method, "request timed out");
                let _ = call.reply.send(Err(CallError::Timeout {
                    method: call.method,
                    after: call.timeout,
                }));
            }
        }
        expired.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.calls.values().map(|call| call.deadline).min()
    }

    /// Fail every outstanding call. Used when the connection goes away.
    pub fn reject_all(&mut self) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            let _ = call.reply.send(Err(CallError::ConnectionClosed));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.calls.len()
    }
}
