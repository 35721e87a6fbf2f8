//! Failure kinds of one invocation and the exit status each maps to.
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | success, including a completion wait that timed out |
//! | 2    | usage error or invalid configuration |
//! | 3    | connection error |
//! | 4    | authentication error |
//! | 5    | call timeout |
//! | 6    | gateway answered with `ok: false` |
//! | 7    | connection lost while waiting for completion |
//! | 8    | device identity could not be stored |
//! | 130  | interrupted |

use gateway_client::{CallError, ClientError, CompletionError};

pub const USAGE: u8 = 2;
pub const CONNECTION: u8 = 3;
pub const AUTH: u8 = 4;
pub const CALL_TIMEOUT: u8 = 5;
pub const REMOTE: u8 = 6;
pub const COMPLETION_LOST: u8 = 7;
pub const IDENTITY: u8 = 8;
pub const INTERRUPTED: u8 = 130;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("interrupted")]
    Interrupted,
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Usage(_) => USAGE,
            Self::Client(ClientError::Connection(_)) => CONNECTION,
            Self::Client(ClientError::Auth(_)) => AUTH,
            Self::Client(ClientError::Identity(_)) => IDENTITY,
            Self::Call(CallError::Timeout { .. }) => CALL_TIMEOUT,
            Self::Call(CallError::Remote { .. }) => REMOTE,
            Self::Call(CallError::ConnectionClosed) => CONNECTION,
            Self::Call(CallError::Encode { .. }) => USAGE,
            Self::Completion(_) => COMPLETION_LOST,
            Self::Interrupted => INTERRUPTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_client::{AuthError, ConnectionError};
    use gateway_protocol::ErrorShape;
    use std::time::Duration;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let cases: Vec<(CliError, u8)> = vec![
            (CliError::Config(anyhow::anyhow!("bad port")), 2),
            (CliError::Usage("--params is not JSON".into()), 2),
            (
                ClientError::Connection(ConnectionError::Timeout {
                    after: Duration::from_secs(10),
                })
                .into(),
                3,
            ),
            (
                ClientError::Auth(AuthError::Rejected {
                    error: ErrorShape::new("UNAUTHORIZED", "nope"),
                    after_retry: false,
                })
                .into(),
                4,
            ),
            (
                CallError::Timeout {
                    method: "status".into(),
                    after: Duration::from_secs(30),
                }
                .into(),
                5,
            ),
            (
                CallError::Remote {
                    method: "status".into(),
                    error: ErrorShape::new("NOT_FOUND", "gone"),
                }
                .into(),
                6,
            ),
            (CallError::ConnectionClosed.into(), 3),
            (
                CompletionError::ConnectionClosed {
                    run_id: "r1".into(),
                }
                .into(),
                7,
            ),
            (CliError::Interrupted, 130),
        ];
        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{error}");
        }
    }

    #[test]
    fn test_messages_carry_gateway_detail() {
        let error: CliError = CallError::Remote {
            method: "chat.send".into(),
            error: ErrorShape::new("INVALID_REQUEST", "sessionKey required"),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "chat.send failed: INVALID_REQUEST: sessionKey required"
        );
    }
}
