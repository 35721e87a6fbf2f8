use std::fmt;
use std::time::Duration;

use gateway_protocol::HelloOk;
use serde_json::Value;

use crate::completion::Completion;
use crate::connection::Connection;
use crate::error::{CallError, CompletionError};

/// A connection that completed the handshake. Only this type can issue
/// business calls.
pub struct AuthenticatedSession {
    connection: Connection,
    device_id: String,
    role: String,
    granted_scopes: Vec<String>,
    hello: HelloOk,
    completion_timeout: Duration,
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("device_id", &self.device_id)
            .field("role", &self.role)
            .field("granted_scopes", &self.granted_scopes)
            .finish_non_exhaustive()
    }
}

impl AuthenticatedSession {
    pub(crate) fn new(
        connection: Connection,
        device_id: String,
        role: String,
        granted_scopes: Vec<String>,
        hello: HelloOk,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            device_id,
            role,
            granted_scopes,
            hello,
            completion_timeout,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    /// The gateway's `hello-ok` payload.
    pub fn hello(&self) -> &HelloOk {
        &self.hello
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        self.connection.call(method, params).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.connection.call_with_timeout(method, params, timeout).await
    }

    /// Wait for `run_id` to end. `None` uses the configured completion
    /// timeout.
    pub async fn await_completion(
        &self,
        run_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Completion, CompletionError> {
        let timeout = timeout.unwrap_or(self.completion_timeout);
        self.connection.await_completion(run_id, timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Close the connection. Anything still waiting is rejected.
    pub async fn close(self) {
        self.connection.close().await;
    }
}
