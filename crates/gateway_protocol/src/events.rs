//! Run lifecycle events pushed on the `agent` event stream.

use serde::Deserialize;
use serde_json::Value;

use crate::event_names;
use crate::frames::FrameError;

const LIFECYCLE_STREAM: &str = "lifecycle";

/// Phase of a run as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    Start,
    End,
    Error,
    Other(String),
}

/// A lifecycle event for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub run_id: String,
    pub phase: LifecyclePhase,
}

#[derive(Deserialize)]
struct AgentEventData {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(rename = "runId", default)]
    run_id: Option<String>,
    // Some gateways nest the phase one level down: {"data": {"phase": "end"}}.
    #[serde(default)]
    data: Option<Value>,
}

impl LifecyclePhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "start" => Self::Start,
            "end" => Self::End,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only `end` completes a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Error => "error",
            Self::Other(other) => other,
        }
    }
}

impl LifecycleEvent {
    pub fn new(run_id: impl Into<String>, phase: LifecyclePhase) -> Self {
        Self {
            run_id: run_id.into(),
            phase,
        }
    }

    /// Extract a lifecycle event from the data of an `agent` event.
    ///
    /// Returns `Ok(None)` for agent events on other streams.
    pub fn from_agent_data(data: &Value) -> Result<Option<Self>, FrameError> {
        let malformed = |reason: &str| FrameError::MalformedEvent {
            event: event_names::AGENT.into(),
            reason: reason.into(),
        };

        let parsed = AgentEventData::deserialize(data).map_err(|e| malformed(&e.to_string()))?;
        if parsed.stream.as_deref() != Some(LIFECYCLE_STREAM) {
            return Ok(None);
        }

        let run_id = parsed
            .run_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("lifecycle event without runId"))?;
        let phase = parsed
            .phase
            .or_else(|| {
                parsed
                    .data
                    .as_ref()
                    .and_then(|nested| nested.get("phase"))
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .ok_or_else(|| malformed("lifecycle event without phase"))?;

        Ok(Some(Self {
            run_id,
            phase: LifecyclePhase::parse(&phase),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_lifecycle() {
        let event = LifecycleEvent::from_agent_data(
            &json!({"stream": "lifecycle", "phase": "start", "runId": "r9"}),
        )
        .expect("parse")
        .expect("lifecycle");
        assert_eq!(event, LifecycleEvent::new("r9", LifecyclePhase::Start));
        assert!(!event.phase.is_terminal());
    }

    #[test]
    fn test_nested_phase() {
        let event = LifecycleEvent::from_agent_data(
            &json!({"stream": "lifecycle", "runId": "r2", "data": {"phase": "end"}}),
        )
        .expect("parse")
        .expect("lifecycle");
        assert!(event.phase.is_terminal());
    }

    #[test]
    fn test_other_stream_is_ignored() {
        let parsed =
            LifecycleEvent::from_agent_data(&json!({"stream": "tool", "runId": "r2"})).expect("parse");
        assert!(parsed.is_none());
    }

    #[test]
    fn test_missing_run_id() {
        let result = LifecycleEvent::from_agent_data(&json!({"stream": "lifecycle", "phase": "end"}));
        assert!(matches!(result, Err(FrameError::MalformedEvent { .. })));
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(LifecyclePhase::parse("error"), LifecyclePhase::Error);
        assert_eq!(
            LifecyclePhase::parse("paused"),
            LifecyclePhase::Other("paused".into())
        );
        assert!(!LifecyclePhase::parse("error").is_terminal());
        assert_eq!(LifecyclePhase::parse("paused").as_str(), "paused");
    }
}
