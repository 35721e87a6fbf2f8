//! One gateway connection and the task that owns its state.
//!
//! A single dispatch task holds the transport, the table of in-flight calls
//! and the completion slot. Callers talk to it through [`Connection`], which
//! only sends commands and awaits replies. All state changes happen inside
//! the task's `select!` loop.

use std::time::Duration;

use gateway_protocol::{ConnectChallenge, Inbound, RequestFrame};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::{Completion, CompletionReply, CompletionWaiter};
use crate::error::{CallError, CompletionError};
use crate::pending::{CallReply, PendingCalls};
use crate::transport::{Transport, TransportEvent};

/// First challenge, or the reason the connection ended before one arrived.
pub(crate) type ChallengeReceiver = oneshot::Receiver<Result<ConnectChallenge, String>>;

enum Command {
    Call {
        method: String,
        params: Value,
        timeout: Duration,
        reply: CallReply,
    },
    AwaitCompletion {
        run_id: String,
        timeout: Duration,
        reply: CompletionReply,
    },
    Close,
}

/// Handle to a running connection.
///
/// Dropping the handle closes the connection.
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    call_timeout: Duration,
    task: JoinHandle<()>,
}

struct Dispatcher {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: PendingCalls,
    completion: CompletionWaiter,
    challenge: Option<oneshot::Sender<Result<ConnectChallenge, String>>>,
}

impl Connection {
    /// Start the dispatch task over `transport`.
    pub(crate) fn spawn(transport: Transport, call_timeout: Duration) -> (Self, ChallengeReceiver) {
        let (outbound, inbound) = transport.into_parts();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (challenge_tx, challenge_rx) = oneshot::channel();

        let dispatcher = Dispatcher {
            outbound,
            inbound,
            commands: commands_rx,
            pending: PendingCalls::new(),
            completion: CompletionWaiter::new(),
            challenge: Some(challenge_tx),
        };
        let task = tokio::spawn(dispatcher.run());

        (
            Self {
                commands: commands_tx,
                call_timeout,
                task,
            },
            challenge_rx,
        )
    }

    /// Send `method` and wait for its response under the default call timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        self.call_with_timeout(method, params, self.call_timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                method: method.to_string(),
                params,
                timeout,
                reply,
            })
            .map_err(|_| CallError::ConnectionClosed)?;
        rx.await.unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Wait until `run_id` ends or `timeout` passes, whichever comes first.
    pub async fn await_completion(
        &self,
        run_id: &str,
        timeout: Duration,
    ) -> Result<Completion, CompletionError> {
        let closed = || CompletionError::ConnectionClosed {
            run_id: run_id.to_string(),
        };
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::AwaitCompletion {
                run_id: run_id.to_string(),
                timeout,
                reply,
            })
            .map_err(|_| closed())?;
        rx.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Whether the dispatch task has stopped.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the socket, fail anything still waiting, and wait for the
    /// dispatch task to finish.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            warn!(error = %e, "dispatch task ended abnormally");
        }
    }
}

impl Dispatcher {
    async fn run(mut self) {
        let reason = loop {
            let deadline = earliest(self.pending.next_deadline(), self.completion.next_deadline());
            tokio::select! {
                // Commands first, so a call or wait already queued is in
                // place before the next frame is handled.
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Call { method, params, timeout, reply }) => {
                        self.send_call(&method, params, timeout, reply).await;
                    }
                    Some(Command::AwaitCompletion { run_id, timeout, reply }) => {
                        self.completion.register(run_id, timeout, Instant::now(), reply);
                    }
                    Some(Command::Close) | None => break "closed by client".to_string(),
                },
                event = self.inbound.recv() => match event {
                    Some(TransportEvent::Text(text)) => self.dispatch(&text),
                    Some(TransportEvent::Closed(reason)) => {
                        break reason.unwrap_or_else(|| "closed by gateway".to_string());
                    }
                    Some(TransportEvent::Error(error)) => {
                        warn!(%error, "transport error");
                        break error;
                    }
                    None => break "transport ended".to_string(),
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    let now = Instant::now();
                    self.pending.expire(now);
                    self.completion.expire(now);
                }
            }
        };
        self.shutdown(reason);
    }

    async fn send_call(&mut self, method: &str, params: Value, timeout: Duration, reply: CallReply) {
        let id = self.pending.register(method, timeout, Instant::now(), reply);
        let text = match RequestFrame::new(id.clone(), method, params).to_text() {
            Ok(text) => text,
            Err(e) => {
                self.pending.reject(
                    &id,
                    CallError::Encode {
                        method: method.to_string(),
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };
        debug!(%id, %method, "sending request");
        if self.outbound.send(text).await.is_err() {
            self.pending.reject(&id, CallError::ConnectionClosed);
        }
    }

    fn dispatch(&mut self, text: &str) {
        match Inbound::decode(text) {
            Ok(Inbound::Challenge(challenge)) => match self.challenge.take() {
                Some(tx) => {
                    debug!(nonce_len = challenge.nonce.len(), "received connect challenge");
                    let _ = tx.send(Ok(challenge));
                }
                None => debug!("ignoring repeated connect challenge"),
            },
            Ok(Inbound::Response(response)) => {
                self.pending.resolve(response);
            }
            Ok(Inbound::Lifecycle(event)) => {
                self.completion.on_lifecycle(&event);
            }
            Ok(Inbound::Event(event)) => {
                debug!(event = %event.event, seq = ?event.seq, "ignoring event");
            }
            Ok(Inbound::Request(request)) => {
                debug!(id = %request.id, method = %request.method, "ignoring gateway request");
            }
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn shutdown(mut self, reason: String) {
        if let Some(tx) = self.challenge.take() {
            let _ = tx.send(Err(reason.clone()));
        }
        let rejected = self.pending.reject_all();
        self.completion.close();
        info!(%reason, rejected, "gateway connection closed");
        // Dropping `outbound` stops the writer, which closes the socket.
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
