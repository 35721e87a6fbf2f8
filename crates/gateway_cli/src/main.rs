//! # gatewayctl
//!
//! One authenticated command per invocation against an agent gateway.
//!
//! ```bash
//! gatewayctl status
//! gatewayctl sessions --limit 20
//! gatewayctl history --session main
//! gatewayctl send --wait "summarize today's tickets"
//! gatewayctl call cron.list --params '{}'
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::future::Future;
use std::process::ExitCode;

use clap::Parser;
use gateway_client::logging::init_logging;
use gateway_client::{AuthenticatedSession, ClientConfig, connect_and_authenticate};
use serde_json::Value;
use tracing::{debug, info, warn};

mod cli;
mod commands;
mod exit;

use cli::{Cli, Command};
use exit::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: failed to encode output: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");

            // Print chain of errors
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  Caused by: {cause}");
                source = std::error::Error::source(cause);
            }

            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            init_logging(&ClientConfig::default().logging);
            return Err(e);
        }
    };
    init_logging(&config.logging);
    let token = cli.gateway_token(&config);
    debug!(has_token = token.is_some(), "resolved gateway token");

    let session = tokio::select! {
        session = connect_and_authenticate(&config, token) => session?,
        () = wait_for_signal() => return Err(CliError::Interrupted),
    };

    run_command(session, &cli.command, wait_for_signal()).await
}

/// Run `command` unless `interrupt` resolves first. Either way the session is
/// closed before returning, which fails the in-flight call or wait.
async fn run_command(
    session: AuthenticatedSession,
    command: &Command,
    interrupt: impl Future<Output = ()>,
) -> Result<Value, CliError> {
    let outcome = tokio::select! {
        outcome = commands::execute(&session, command) => outcome,
        () = interrupt => {
            warn!("interrupted, closing gateway connection");
            Err(CliError::Interrupted)
        }
    };
    session.close().await;
    outcome
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                return ctrl_c().await;
            }
        };
        tokio::select! {
            () = ctrl_c() => {}
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C"),
        Err(e) => {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_client::{Transport, TransportPeer, authenticate_over};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn next_request(peer: &mut TransportPeer) -> serde_json::Value {
        peer.recv_json().await.expect("client request")
    }

    async fn respond(peer: &TransportPeer, request: &serde_json::Value, payload: serde_json::Value) {
        peer.push(json!({"type": "res", "id": request["id"], "ok": true, "payload": payload}).to_string())
            .await;
    }

    /// Authenticate over an in-memory transport. The returned peer has
    /// already answered `connect`.
    async fn session(dir: &tempfile::TempDir) -> (AuthenticatedSession, TransportPeer) {
        let mut config = ClientConfig::default();
        config.state.dir = Some(dir.path().to_path_buf());
        let (transport, mut peer) = Transport::in_memory();
        peer.push(json!({"type": "event", "event": "connect.challenge", "data": {"nonce": "abc"}}).to_string())
            .await;
        let (session, peer) = tokio::join!(authenticate_over(transport, &config, None), async move {
            let connect = next_request(&mut peer).await;
            respond(&peer, &connect, json!({})).await;
            peer
        });
        (session.expect("authenticated"), peer)
    }

    fn send(wait: bool) -> Command {
        Command::Send {
            message: vec!["hi".into()],
            session: "main".into(),
            idempotency_key: Some("k1".into()),
            wait,
            wait_timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn test_interrupt_during_call_closes_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (session, mut peer) = session(&dir).await;
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            assert_eq!(request["method"], "chat.send");
            // Never answer; interrupt instead
            let _ = interrupt_tx.send(());
            peer
        });

        let error = run_command(session, &send(false), async {
            let _ = interrupt_rx.await;
        })
        .await
        .expect_err("interrupted");
        assert!(matches!(error, CliError::Interrupted));
        assert_eq!(error.exit_code(), exit::INTERRUPTED);

        let mut peer = gateway.await.expect("gateway");
        assert!(peer.recv_json().await.is_none(), "socket closed");
    }

    #[tokio::test]
    async fn test_interrupt_during_completion_wait() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (session, mut peer) = session(&dir).await;
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            respond(&peer, &request, json!({"runId": "r1"})).await;
            peer.push(
                json!({"type": "event", "event": "agent", "data": {"stream": "lifecycle", "runId": "r1", "phase": "start"}})
                    .to_string(),
            )
            .await;
            // The run never ends; interrupt while the client waits for it
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = interrupt_tx.send(());
            peer
        });

        let error = run_command(session, &send(true), async {
            let _ = interrupt_rx.await;
        })
        .await
        .expect_err("interrupted");
        assert!(matches!(error, CliError::Interrupted));
        assert_eq!(error.exit_code(), exit::INTERRUPTED);

        let mut peer = gateway.await.expect("gateway");
        assert!(peer.recv_json().await.is_none(), "socket closed");
    }

    #[tokio::test]
    async fn test_command_finishes_without_interrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (session, mut peer) = session(&dir).await;

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            assert_eq!(request["method"], "status");
            respond(&peer, &request, json!({"ok": true})).await;
            peer
        });

        let output = run_command(session, &Command::Status, std::future::pending())
            .await
            .expect("status");
        assert_eq!(output, json!({"ok": true}));
        let _peer = gateway.await.expect("gateway");
    }
}
