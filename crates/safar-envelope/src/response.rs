//! Outbound envelope composition with strict identifier echo.
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{EnvelopeError, EnvelopeIdentifiers};

pub const MESSAGE_VERSION: &str = "1.0";
const HTTP_METHOD: &str = "POST";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates the outcome classes an action can produce.
pub enum OutcomeStatus {
    Success,
    ValidationError,
    ResolutionFailure,
    DownstreamFailure,
}

impl OutcomeStatus {
    pub fn http_status_code(self) -> u16 {
        match self {
            OutcomeStatus::Success => 200,
            OutcomeStatus::ValidationError => 400,
            OutcomeStatus::ResolutionFailure => 404,
            OutcomeStatus::DownstreamFailure => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The structured result of one dispatched action, before envelope wrapping.
pub struct ActionOutcome {
    pub status: OutcomeStatus,
    pub body: Value,
}

impl ActionOutcome {
    pub fn success(body: Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            body,
        }
    }

    /// Builds a failure outcome with the stable machine code, human message,
    /// and timestamp every error body carries.
    pub fn failure(status: OutcomeStatus, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({
                "error": message.into(),
                "error_code": error_code,
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        }
    }
}

/// Wraps an outcome in the caller's invocation envelope.
///
/// `actionGroup` and `apiPath` are copied verbatim from the inbound event;
/// the configured fallback group is used only when the event omitted the
/// field. Anything else is a hard protocol violation on the caller's side.
pub fn compose_response(
    identifiers: &EnvelopeIdentifiers,
    fallback_action_group: &str,
    outcome: &ActionOutcome,
) -> Result<Value, EnvelopeError> {
    let body = serde_json::to_string(&outcome.body)?;
    Ok(json!({
        "messageVersion": MESSAGE_VERSION,
        "response": {
            "actionGroup": identifiers
                .action_group
                .as_deref()
                .unwrap_or(fallback_action_group),
            "apiPath": identifiers.api_path.as_deref().unwrap_or(""),
            "httpMethod": HTTP_METHOD,
            "httpStatusCode": outcome.status.http_status_code(),
            "responseBody": {
                "application/json": {
                    "body": body,
                }
            }
        }
    }))
}

/// Internal invariant check: the composed envelope must echo the inbound
/// identifiers. A mismatch here is a bug in the composer, never user input.
pub fn verify_envelope_echo(
    identifiers: &EnvelopeIdentifiers,
    fallback_action_group: &str,
    response: &Value,
) -> Result<(), EnvelopeError> {
    let expected_group = identifiers
        .action_group
        .as_deref()
        .unwrap_or(fallback_action_group);
    let expected_path = identifiers.api_path.as_deref().unwrap_or("");

    let composed_group = response
        .pointer("/response/actionGroup")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let composed_path = response
        .pointer("/response/apiPath")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if composed_group != expected_group {
        return Err(EnvelopeError::ProtocolMismatch(format!(
            "actionGroup '{composed_group}' does not echo inbound '{expected_group}'"
        )));
    }
    if composed_path != expected_path {
        return Err(EnvelopeError::ProtocolMismatch(format!(
            "apiPath '{composed_path}' does not echo inbound '{expected_path}'"
        )));
    }
    Ok(())
}
