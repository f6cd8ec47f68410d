//! Action-invocation envelope handling: inbound payload normalization and
//! outbound response composition.
//!
//! The caller's protocol is strict about identifier echo: a response whose
//! `actionGroup`/`apiPath` differ from the inbound invocation's is discarded
//! wholesale, so both sides of the envelope live in one crate and share the
//! same identifier type.
use thiserror::Error;

mod invocation;
mod response;

pub use invocation::{
    extract_identifiers, normalize_invocation, EnvelopeIdentifiers, NormalizedInvocation,
};
pub use response::{compose_response, verify_envelope_echo, ActionOutcome, OutcomeStatus};

pub const ERROR_MALFORMED_PAYLOAD: &str = "malformed_payload";
pub const ERROR_MISSING_PARAMETER: &str = "missing_parameter";
pub const ERROR_MISSING_REQUIRED_DATA: &str = "missing_required_data";
pub const ERROR_IMMUTABLE_SLOT: &str = "immutable_slot";
pub const ERROR_UNKNOWN_ACTION: &str = "unknown_action";
pub const ERROR_STATE_NOT_PERMITTED: &str = "state_not_permitted";
pub const ERROR_SESSION_UNAVAILABLE: &str = "session_unavailable";
pub const ERROR_LOCATION_NOT_FOUND: &str = "location_not_found";
pub const ERROR_LOCATION_RESOLUTION_FAILED: &str = "location_resolution_failed";
pub const ERROR_RIDE_CREATION_FAILED: &str = "ride_creation_failed";
pub const ERROR_RIDE_STATUS_FAILED: &str = "ride_status_failed";
pub const ERROR_RIDE_CANCELLATION_FAILED: &str = "ride_cancellation_failed";

#[derive(Debug, Error)]
/// Failures raised while normalizing or composing envelopes.
pub enum EnvelopeError {
    #[error("malformed invocation payload: {0}")]
    MalformedPayload(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}
