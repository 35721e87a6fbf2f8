//! Error taxonomy of the client core.
//!
//! Connection and authentication failures end the invocation. Call and
//! completion failures belong to the individual operation.

use std::time::Duration;

use gateway_protocol::ErrorShape;

use crate::identity::IdentityError;
use crate::signer::SignerError;

/// The gateway could not be reached, or the socket went away before the
/// handshake finished.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid gateway url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("gateway unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("no challenge from gateway within {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("connection closed before the gateway sent a challenge: {reason}")]
    ClosedBeforeChallenge { reason: String },
    #[error("connection closed during the handshake")]
    ClosedDuringHandshake,
    #[error("gateway did not answer connect within {}ms", .after.as_millis())]
    HandshakeTimeout { after: Duration },
}

/// The gateway answered the handshake, and the answer was a rejection or
/// unusable.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("gateway rejected connect{}: {error}", if *.after_retry { " after retry" } else { "" })]
    Rejected { error: ErrorShape, after_retry: bool },
    #[error("malformed connect response: {0}")]
    MalformedResponse(String),
    #[error("failed to encode connect request: {0}")]
    Protocol(String),
    #[error("failed to sign connect payload: {0}")]
    Signing(#[from] SignerError),
}

/// Failure of one correlated call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("{method} timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("{method} failed: {error}")]
    Remote { method: String, error: ErrorShape },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("failed to encode {method} request: {reason}")]
    Encode { method: String, reason: String },
}

/// Failure of a completion wait. A wait that runs out of time is not an
/// error; see [`crate::CompletionStatus::Timeout`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("connection closed while waiting for run {run_id}")]
    ConnectionClosed { run_id: String },
    #[error("already waiting for run {run_id}")]
    AlreadyWaiting { run_id: String },
}

/// Failure to produce an [`crate::AuthenticatedSession`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Gateway error detail, when the gateway answered with `ok: false`.
    pub fn remote_error(&self) -> Option<&ErrorShape> {
        match self {
            Self::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<SignerError> for ClientError {
    fn from(error: SignerError) -> Self {
        Self::Auth(AuthError::Signing(error))
    }
}
