//! Challenge, signed connect, and device-token bookkeeping.
//!
//! ```text
//! Connecting --challenge--> ChallengeReceived --sign+connect--> AttemptingAuth
//!                                                                  |     |
//!                            stale cached token, first attempt ----+     |
//!                            (clear entry, retry with gateway token)     |
//!                                                                        v
//!                                                     Authenticated | Failed
//! ```
//!
//! Closure or timeout before the challenge is a connection failure. A
//! rejected `connect` is an authentication failure.

use std::future::Future;
use std::time::Duration;

use gateway_protocol::{
    CONNECT_METHOD, ClientInfo, ConnectChallenge, ConnectParams, DeviceBlock, ErrorShape, HelloOk,
    SignedPayload,
};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{AuthError, CallError, ClientError, ConnectionError};
use crate::identity::{DeviceIdentity, IdentityStore, now_ms};
use crate::session::AuthenticatedSession;
use crate::signer;
use crate::token_cache::TokenCache;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    ChallengeReceived,
    AttemptingAuth,
    Authenticated,
    Failed,
}

/// Which credential a connect attempt carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Device,
    Gateway,
    None,
}

enum AttemptError {
    Rejected(ErrorShape),
    Fatal(ClientError),
}

/// Drives one connection from socket open to an authenticated session.
pub struct HandshakeController {
    client: ClientInfo,
    user_agent: String,
    role: String,
    scopes: Vec<String>,
    connect_timeout: Duration,
    call_timeout: Duration,
    completion_timeout: Duration,
    identity: DeviceIdentity,
    tokens: TokenCache,
    gateway_token: Option<String>,
    state: HandshakeState,
}

/// Open a WebSocket to the configured gateway and authenticate over it.
///
/// `gateway_token` is the shared bearer token used when no device token is
/// cached, and for the single retry after a stale device token.
pub async fn connect_and_authenticate(
    config: &ClientConfig,
    gateway_token: Option<String>,
) -> Result<AuthenticatedSession, ClientError> {
    let url = config.gateway.url()?;
    let mut controller = HandshakeController::from_config(config, gateway_token)?;
    debug!(%url, "connecting to gateway");
    controller.run(async move { Transport::connect(&url).await }).await
}

/// Authenticate over an already open transport.
pub async fn authenticate_over(
    transport: Transport,
    config: &ClientConfig,
    gateway_token: Option<String>,
) -> Result<AuthenticatedSession, ClientError> {
    let mut controller = HandshakeController::from_config(config, gateway_token)?;
    controller.run(async move { Ok(transport) }).await
}

impl HandshakeController {
    pub fn new(
        config: &ClientConfig,
        identity: DeviceIdentity,
        tokens: TokenCache,
        gateway_token: Option<String>,
    ) -> Self {
        Self {
            client: config.client.to_client_info(),
            user_agent: config.client.user_agent(),
            role: config.auth.role.clone(),
            scopes: config.auth.scopes.clone(),
            connect_timeout: config.timeouts.connect(),
            call_timeout: config.timeouts.call(),
            completion_timeout: config.timeouts.completion(),
            identity,
            tokens,
            gateway_token: gateway_token.filter(|token| !token.is_empty()),
            state: HandshakeState::Connecting,
        }
    }

    /// Load (or create) the identity and token cache under the configured
    /// state directory.
    pub fn from_config(
        config: &ClientConfig,
        gateway_token: Option<String>,
    ) -> Result<Self, ClientError> {
        let state_dir = config.state.resolve_dir();
        let identity = IdentityStore::new(&state_dir).load_or_create()?;
        let tokens = TokenCache::new(&state_dir);
        Ok(Self::new(config, identity, tokens, gateway_token))
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake over the transport `open` yields.
    pub async fn run<F>(&mut self, open: F) -> Result<AuthenticatedSession, ClientError>
    where
        F: Future<Output = Result<Transport, ConnectionError>>,
    {
        self.transition(HandshakeState::Connecting);
        let (connection, challenge) = match self.establish(open).await {
            Ok(established) => established,
            Err(e) => {
                self.transition(HandshakeState::Failed);
                return Err(e.into());
            }
        };
        self.transition(HandshakeState::ChallengeReceived);
        debug!(nonce_len = challenge.nonce.len(), ts = ?challenge.ts, "challenge received");

        match self.authenticate(&connection).await {
            Ok(hello) => {
                self.transition(HandshakeState::Authenticated);
                info!(
                    device_id = %self.identity.device_id,
                    role = %self.role,
                    protocol = ?hello.protocol,
                    "authenticated with gateway"
                );
                let granted_scopes = hello
                    .auth
                    .as_ref()
                    .and_then(|auth| auth.scopes.clone())
                    .unwrap_or_else(|| self.scopes.clone());
                Ok(AuthenticatedSession::new(
                    connection,
                    self.identity.device_id.clone(),
                    self.role.clone(),
                    granted_scopes,
                    hello,
                    self.completion_timeout,
                ))
            }
            Err(e) => {
                self.transition(HandshakeState::Failed);
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Open the transport and wait for the first challenge, both under the
    /// connect deadline.
    async fn establish<F>(&self, open: F) -> Result<(Connection, ConnectChallenge), ConnectionError>
    where
        F: Future<Output = Result<Transport, ConnectionError>>,
    {
        let call_timeout = self.call_timeout;
        let opening = async move {
            let transport = open.await?;
            let (connection, challenge) = Connection::spawn(transport, call_timeout);
            match challenge.await {
                Ok(Ok(challenge)) => Ok((connection, challenge)),
                Ok(Err(reason)) => Err(ConnectionError::ClosedBeforeChallenge { reason }),
                Err(_) => Err(ConnectionError::ClosedBeforeChallenge {
                    reason: "connection task stopped".into(),
                }),
            }
        };
        tokio::time::timeout(self.connect_timeout, opening)
            .await
            .map_err(|_| ConnectionError::Timeout {
                after: self.connect_timeout,
            })?
    }

    async fn authenticate(&mut self, connection: &Connection) -> Result<HelloOk, ClientError> {
        let cached = self.tokens.load(&self.identity.device_id, &self.role);
        let (token, source) = match cached {
            Some(entry) => (Some(entry.token), TokenSource::Device),
            None => match &self.gateway_token {
                Some(token) => (Some(token.clone()), TokenSource::Gateway),
                None => (None, TokenSource::None),
            },
        };

        let error = match self.attempt(connection, token, source).await {
            Ok(hello) => return Ok(hello),
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Rejected(error)) => error,
        };

        if source != TokenSource::Device || !error.is_stale_device_token() {
            return Err(AuthError::Rejected {
                error,
                after_retry: false,
            }
            .into());
        }

        warn!(error = %error, "cached device token rejected; retrying with gateway token");
        if let Err(e) = self.tokens.clear(&self.identity.device_id, &self.role) {
            warn!(error = %e, "failed to clear stale device token");
        }

        let retry_source = if self.gateway_token.is_some() {
            TokenSource::Gateway
        } else {
            TokenSource::None
        };
        match self
            .attempt(connection, self.gateway_token.clone(), retry_source)
            .await
        {
            Ok(hello) => Ok(hello),
            Err(AttemptError::Fatal(e)) => Err(e),
            Err(AttemptError::Rejected(error)) => Err(AuthError::Rejected {
                error,
                after_retry: true,
            }
            .into()),
        }
    }

    async fn attempt(
        &mut self,
        connection: &Connection,
        token: Option<String>,
        source: TokenSource,
    ) -> Result<HelloOk, AttemptError> {
        self.transition(HandshakeState::AttemptingAuth);
        debug!(token_source = ?source, "sending connect");

        let params = self
            .connect_params(token)
            .and_then(|params| {
                params
                    .to_value()
                    .map_err(|e| AuthError::Protocol(e.to_string()))
            })
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        let payload = match connection
            .call_with_timeout(CONNECT_METHOD, params, self.connect_timeout)
            .await
        {
            Ok(payload) => payload,
            Err(CallError::Remote { error, .. }) => return Err(AttemptError::Rejected(error)),
            Err(CallError::Timeout { after, .. }) => {
                return Err(AttemptError::Fatal(
                    ConnectionError::HandshakeTimeout { after }.into(),
                ));
            }
            Err(CallError::ConnectionClosed) => {
                return Err(AttemptError::Fatal(ConnectionError::ClosedDuringHandshake.into()));
            }
            Err(CallError::Encode { reason, .. }) => {
                return Err(AttemptError::Fatal(AuthError::Protocol(reason).into()));
            }
        };

        let hello = HelloOk::from_payload(&payload)
            .map_err(|e| AttemptError::Fatal(AuthError::MalformedResponse(e.to_string()).into()))?;
        if let Some(auth) = &hello.auth {
            let scopes = auth.scopes.as_deref().unwrap_or(&self.scopes);
            // Best effort: the session is already authenticated.
            if let Err(e) =
                self.tokens
                    .store(&self.identity.device_id, &self.role, &auth.device_token, scopes)
            {
                warn!(error = %e, "failed to cache device token");
            }
        }
        Ok(hello)
    }

    fn connect_params(&self, token: Option<String>) -> Result<ConnectParams, AuthError> {
        let signed_at = now_ms();
        let payload = SignedPayload {
            device_id: &self.identity.device_id,
            client_id: &self.client.id,
            client_mode: &self.client.mode,
            role: &self.role,
            scopes: &self.scopes,
            signed_at_ms: signed_at,
            token: token.as_deref(),
        }
        .to_canonical_string();
        let signature = signer::sign(self.identity.private_key_pem(), &payload)?;
        let public_key = signer::public_key_base64url(&self.identity.public_key_pem)?;

        Ok(
            ConnectParams::new(self.client.clone(), self.role.clone(), self.scopes.clone())
                .with_device(DeviceBlock {
                    id: self.identity.device_id.clone(),
                    public_key,
                    signature,
                    signed_at,
                })
                .with_token(token)
                .with_user_agent(self.user_agent.clone()),
        )
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "handshake state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportPeer;
    use gateway_protocol::{GatewayFrame, ResponseFrame};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    struct Fixture {
        _dir: tempfile::TempDir,
        config: ClientConfig,
        identity: DeviceIdentity,
        tokens: TokenCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ClientConfig::default();
        config.state.dir = Some(dir.path().to_path_buf());
        config.auth.scopes = vec!["operator.read".into()];
        let identity = IdentityStore::new(dir.path()).load_or_create().expect("identity");
        let tokens = TokenCache::new(dir.path());
        Fixture {
            _dir: dir,
            config,
            identity,
            tokens,
        }
    }

    fn controller(fixture: &Fixture, gateway_token: Option<&str>) -> HandshakeController {
        HandshakeController::new(
            &fixture.config,
            fixture.identity.clone(),
            fixture.tokens.clone(),
            gateway_token.map(String::from),
        )
    }

    async fn challenge(peer: &TransportPeer) {
        peer.push(r#"{"type":"event","event":"connect.challenge","data":{"nonce":"abc"}}"#)
            .await;
    }

    async fn reply(peer: &TransportPeer, frame: ResponseFrame) {
        peer.push(serde_json::to_string(&GatewayFrame::Response(frame)).expect("json"))
            .await;
    }

    fn auth_token(request: &Value) -> Option<&str> {
        request["params"]["auth"]["token"].as_str()
    }

    #[tokio::test]
    async fn test_signed_connect_and_token_cached() {
        let fixture = fixture();
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let request = peer.recv_json().await.expect("connect");
            reply(
                &peer,
                ResponseFrame::ok(
                    request["id"].as_str().expect("id"),
                    json!({"auth": {"deviceToken": "tok1"}}),
                ),
            )
            .await;
            (request, peer)
        });

        let mut handshake = controller(&fixture, Some("shared"));
        let session = handshake.run(async { Ok(transport) }).await.expect("session");
        let (request, _peer) = gateway.await.expect("gateway");

        assert_eq!(handshake.state(), HandshakeState::Authenticated);
        assert_eq!(request["method"], "connect");
        assert_eq!(request["id"], "0");
        assert_eq!(auth_token(&request), Some("shared"));

        let device = &request["params"]["device"];
        let signed_at = device["signedAt"].as_u64().expect("signedAt");
        let expected_payload = format!(
            "v1|{}|cli|cli|operator|operator.read|{signed_at}|shared",
            fixture.identity.device_id
        );
        let verified = signer::verify(
            device["publicKey"].as_str().expect("publicKey"),
            &expected_payload,
            device["signature"].as_str().expect("signature"),
        )
        .expect("verify");
        assert!(verified);

        let cached = fixture
            .tokens
            .load(&fixture.identity.device_id, "operator")
            .expect("cached");
        assert_eq!(cached.token, "tok1");
        assert_eq!(cached.scopes, vec!["operator.read".to_string()]);
        assert_eq!(session.granted_scopes(), ["operator.read".to_string()]);
        session.close().await;
    }

    #[tokio::test]
    async fn test_rejection_without_cached_token_does_not_retry() {
        let fixture = fixture();
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let request = peer.recv_json().await.expect("connect");
            reply(
                &peer,
                ResponseFrame::err(
                    request["id"].as_str().expect("id"),
                    ErrorShape::new("DEVICE_TOKEN_MISMATCH", "device token mismatch"),
                ),
            )
            .await;
            // The client closes instead of retrying
            let next = peer.recv_json().await;
            (next, peer)
        });

        let mut handshake = controller(&fixture, Some("shared"));
        let error = handshake
            .run(async { Ok(transport) })
            .await
            .expect_err("rejected");
        assert!(matches!(
            error,
            ClientError::Auth(AuthError::Rejected { after_retry: false, .. })
        ));
        assert_eq!(handshake.state(), HandshakeState::Failed);

        let (next, _peer) = gateway.await.expect("gateway");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_non_stale_rejection_keeps_cached_token() {
        let fixture = fixture();
        fixture
            .tokens
            .store(&fixture.identity.device_id, "operator", "tok1", &[])
            .expect("store");
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let request = peer.recv_json().await.expect("connect");
            reply(
                &peer,
                ResponseFrame::err(
                    request["id"].as_str().expect("id"),
                    ErrorShape::new("UNAUTHORIZED", "device signature invalid"),
                ),
            )
            .await;
            peer
        });

        let error = controller(&fixture, Some("shared"))
            .run(async { Ok(transport) })
            .await
            .expect_err("rejected");
        assert!(matches!(
            error,
            ClientError::Auth(AuthError::Rejected { after_retry: false, .. })
        ));
        let _peer = gateway.await.expect("gateway");
        assert!(fixture.tokens.load(&fixture.identity.device_id, "operator").is_some());
    }

    #[tokio::test]
    async fn test_close_before_challenge() {
        let fixture = fixture();
        let (transport, peer) = Transport::in_memory();
        peer.close(Some("1008 policy violation")).await;

        let error = controller(&fixture, None)
            .run(async { Ok(transport) })
            .await
            .expect_err("closed");
        assert!(matches!(
            error,
            ClientError::Connection(ConnectionError::ClosedBeforeChallenge { reason }) if reason == "1008 policy violation"
        ));
    }

    #[tokio::test]
    async fn test_close_during_connect() {
        let fixture = fixture();
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let _request = peer.recv_json().await.expect("connect");
            peer.close(None).await;
            peer
        });

        let error = controller(&fixture, None)
            .run(async { Ok(transport) })
            .await
            .expect_err("closed");
        assert!(matches!(
            error,
            ClientError::Connection(ConnectionError::ClosedDuringHandshake)
        ));
        let _peer = gateway.await.expect("gateway");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_challenge_times_out() {
        let fixture = fixture();
        let (transport, _peer) = Transport::in_memory();
        let mut handshake = controller(&fixture, None);
        let error = handshake
            .run(async { Ok(transport) })
            .await
            .expect_err("timeout");
        assert!(matches!(
            error,
            ClientError::Connection(ConnectionError::Timeout { after }) if after == Duration::from_secs(10)
        ));
        assert_eq!(handshake.state(), HandshakeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_connect_is_handshake_timeout() {
        let fixture = fixture();
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let request = peer.recv_json().await;
            (request, peer)
        });

        let error = controller(&fixture, None)
            .run(async { Ok(transport) })
            .await
            .expect_err("timeout");
        // Bounded by connect_ms (10s), not call_ms (30s)
        assert!(matches!(
            error,
            ClientError::Connection(ConnectionError::HandshakeTimeout { after }) if after == Duration::from_secs(10)
        ));
        let (request, _peer) = gateway.await.expect("gateway");
        assert!(auth_token(&request.expect("connect")).is_none());
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let fixture = fixture();
        let error = controller(&fixture, None)
            .run(async {
                Err(ConnectionError::Unreachable {
                    url: "ws://127.0.0.1:1/".into(),
                    reason: "refused".into(),
                })
            })
            .await
            .expect_err("unreachable");
        assert!(matches!(
            error,
            ClientError::Connection(ConnectionError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_hello_is_auth_error() {
        let fixture = fixture();
        let (transport, mut peer) = Transport::in_memory();
        let gateway = tokio::spawn(async move {
            challenge(&peer).await;
            let request = peer.recv_json().await.expect("connect");
            reply(&peer, ResponseFrame::ok(request["id"].as_str().expect("id"), json!("ok"))).await;
            peer
        });

        let error = controller(&fixture, None)
            .run(async { Ok(transport) })
            .await
            .expect_err("malformed");
        assert!(matches!(
            error,
            ClientError::Auth(AuthError::MalformedResponse(_))
        ));
        let _peer = gateway.await.expect("gateway");
    }
}
