//! Gateway methods behind each subcommand. Params and results are passed
//! through as JSON; only `runId` is read back, to chain `send --wait`.

use std::time::Duration;

use gateway_client::{AuthenticatedSession, run_id_from_payload};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::cli::Command;
use crate::exit::CliError;

/// Method name and params for `command`.
pub fn request(command: &Command) -> Result<(String, Value), CliError> {
    let (method, params) = match command {
        Command::Status => ("status", json!({})),
        Command::Sessions { limit } => {
            let mut params = Map::new();
            if let Some(limit) = limit {
                params.insert("limit".into(), json!(limit));
            }
            ("sessions.list", Value::Object(params))
        }
        Command::History { session, limit } => {
            let mut params = Map::new();
            params.insert("sessionKey".into(), json!(session));
            if let Some(limit) = limit {
                params.insert("limit".into(), json!(limit));
            }
            ("chat.history", Value::Object(params))
        }
        Command::Send {
            message,
            session,
            idempotency_key,
            ..
        } => {
            let key = idempotency_key
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            (
                "chat.send",
                json!({
                    "sessionKey": session,
                    "message": message.join(" "),
                    "idempotencyKey": key,
                }),
            )
        }
        Command::Call { method, params } => {
            let params: Value = serde_json::from_str(params)
                .map_err(|e| CliError::Usage(format!("--params is not valid JSON: {e}")))?;
            if !params.is_object() {
                return Err(CliError::Usage("--params must be a JSON object".into()));
            }
            return Ok((method.clone(), params));
        }
    };
    Ok((method.to_string(), params))
}

/// Run `command` on an authenticated session and return what to print.
pub async fn execute(
    session: &AuthenticatedSession,
    command: &Command,
) -> Result<Value, CliError> {
    let (method, params) = request(command)?;
    let payload = session.call(&method, params).await?;

    let Command::Send {
        wait: true,
        wait_timeout_ms,
        ..
    } = command
    else {
        return Ok(payload);
    };

    let Some(run_id) = run_id_from_payload(&payload) else {
        warn!("chat.send returned no runId; nothing to wait for");
        return Ok(payload);
    };
    info!(%run_id, "waiting for run to finish");
    let completion = session
        .await_completion(run_id, wait_timeout_ms.map(Duration::from_millis))
        .await?;
    Ok(json!({
        "response": payload,
        "completion": completion,
    }))
}
