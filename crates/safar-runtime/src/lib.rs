//! Turn orchestration: one inbound action invocation in, one outbound
//! envelope out.
//!
//! Each invocation is an independent, short-lived unit of work. All dialogue
//! state lives in the session store; the per-session lock is held for the
//! whole turn so the state transition either commits after the collaborator
//! call succeeds or not at all.
use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use safar_core::current_unix_timestamp;
use safar_dialogue::{
    apply_greeting, apply_location_resolved, apply_ride_created, apply_status_delivered, decide,
    ActionRoute, Decision, Intent,
};
use safar_dispatch::{LocationResolver, RideApi, RideCreationRequest};
use safar_envelope::{
    compose_response, extract_identifiers, normalize_invocation, verify_envelope_echo,
    ActionOutcome, OutcomeStatus, ERROR_LOCATION_NOT_FOUND, ERROR_LOCATION_RESOLUTION_FAILED,
    ERROR_MALFORMED_PAYLOAD, ERROR_MISSING_REQUIRED_DATA, ERROR_RIDE_CANCELLATION_FAILED,
    ERROR_RIDE_CREATION_FAILED, ERROR_RIDE_STATUS_FAILED, ERROR_SESSION_UNAVAILABLE,
    ERROR_UNKNOWN_ACTION,
};
use safar_session::{
    DialogueState, DriverInfo, ResolvedLocation, SessionDocument, SessionGuard, SessionStore,
};

mod config;

pub use config::{init_tracing, RuntimeConfig, DEFAULT_FALLBACK_ACTION_GROUP};

/// Stateless worker handling booking-dialogue action invocations.
pub struct TurnRuntime {
    store: SessionStore,
    location_resolver: Arc<dyn LocationResolver>,
    ride_api: Arc<dyn RideApi>,
    fallback_action_group: String,
}

impl TurnRuntime {
    pub fn new(
        store: SessionStore,
        location_resolver: Arc<dyn LocationResolver>,
        ride_api: Arc<dyn RideApi>,
        fallback_action_group: impl Into<String>,
    ) -> Self {
        Self {
            store,
            location_resolver,
            ride_api,
            fallback_action_group: fallback_action_group.into(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Handles one inbound invocation end to end. Failures are never
    /// transport-level: every path composes a well-formed envelope whose
    /// identifiers echo the inbound event.
    pub async fn handle_invocation(&self, event: &Value) -> Value {
        let identifiers = extract_identifiers(event);
        let outcome = self.evaluate_turn(event).await;
        tracing::info!(
            target: "safar::runtime",
            api_path = identifiers.api_path.as_deref().unwrap_or(""),
            status = ?outcome.status,
            "handled invocation"
        );

        let response =
            match compose_response(&identifiers, &self.fallback_action_group, &outcome) {
                Ok(response) => response,
                Err(error) => {
                    tracing::error!(
                        target: "safar::runtime",
                        error = %error,
                        "failed to compose response envelope"
                    );
                    fallback_envelope(&self.fallback_action_group, &identifiers.api_path)
                }
            };
        if let Err(error) =
            verify_envelope_echo(&identifiers, &self.fallback_action_group, &response)
        {
            // Never expected to fire; the composer copies identifiers verbatim.
            tracing::error!(target: "safar::runtime", error = %error, "envelope echo invariant violated");
        }
        response
    }

    async fn evaluate_turn(&self, event: &Value) -> ActionOutcome {
        let normalized = match normalize_invocation(event) {
            Ok(normalized) => normalized,
            Err(error) => {
                return ActionOutcome::failure(
                    OutcomeStatus::ValidationError,
                    ERROR_MALFORMED_PAYLOAD,
                    error.to_string(),
                );
            }
        };

        let Some(session_id) = normalized.session_id.clone() else {
            return ActionOutcome::failure(
                OutcomeStatus::ValidationError,
                ERROR_SESSION_UNAVAILABLE,
                "Session id is required",
            );
        };

        let api_path = normalized.identifiers.api_path.clone().unwrap_or_default();
        let Some(route) = ActionRoute::from_api_path(&api_path) else {
            return ActionOutcome::failure(
                OutcomeStatus::ValidationError,
                ERROR_UNKNOWN_ACTION,
                format!("Unknown API path: {api_path}"),
            );
        };

        let guard = match self.store.lock_session(&session_id) {
            Ok(guard) => guard,
            Err(error) => {
                return ActionOutcome::failure(
                    OutcomeStatus::DownstreamFailure,
                    ERROR_SESSION_UNAVAILABLE,
                    format!("Session store unavailable: {error:#}"),
                );
            }
        };
        let now = current_unix_timestamp();
        let mut document = match guard.load_or_create(now) {
            Ok(document) => document,
            Err(error) => {
                return ActionOutcome::failure(
                    OutcomeStatus::DownstreamFailure,
                    ERROR_SESSION_UNAVAILABLE,
                    format!("Session store unavailable: {error:#}"),
                );
            }
        };

        seed_slots_from_attributes(&mut document, &normalized.session_attributes);

        match decide(&document, route, &normalized.parameters) {
            Decision::Greet => {
                let prompt = apply_greeting(&mut document);
                if let Err(outcome) = commit_turn(&guard, &mut document, now) {
                    return outcome;
                }
                ActionOutcome::success(json!({"success": true, "message": prompt}))
            }
            Decision::DeliverDriverDetails => {
                let body = json!({
                    "success": true,
                    "ride_id": document.ride_id.clone(),
                    "status": "driver_assigned",
                    "driver": document.driver.clone(),
                    "eta": document.driver_eta.clone(),
                });
                apply_status_delivered(&mut document);
                if let Err(outcome) = commit_turn(&guard, &mut document, now) {
                    return outcome;
                }
                ActionOutcome::success(body)
            }
            Decision::AcceptWithoutBooking { message } => {
                ActionOutcome::success(json!({"success": true, "message": message}))
            }
            Decision::Reject(rejection) => {
                ActionOutcome::failure(rejection.status, rejection.error_code, rejection.message)
            }
            Decision::Execute(intent) => self.execute_intent(&guard, document, now, intent).await,
        }
    }

    async fn execute_intent(
        &self,
        guard: &SessionGuard,
        mut document: SessionDocument,
        now: u64,
        intent: Intent,
    ) -> ActionOutcome {
        match intent {
            Intent::ResolveLocation { slot, text } => {
                match self.location_resolver.resolve(&text).await {
                    Ok(Some(location)) => {
                        let mut body = json!({
                            "success": true,
                            "type": slot.as_str(),
                            "location": location.address.clone(),
                            "coordinates": {"lat": location.lat, "lng": location.lng},
                            "place_id": location.place_id.clone(),
                        });
                        let prompt = apply_location_resolved(&mut document, slot, location);
                        if let Err(outcome) = commit_turn(guard, &mut document, now) {
                            return outcome;
                        }
                        body["message"] = Value::String(prompt);
                        ActionOutcome::success(body)
                    }
                    Ok(None) => ActionOutcome::failure(
                        OutcomeStatus::ResolutionFailure,
                        ERROR_LOCATION_NOT_FOUND,
                        format!(
                            "Could not resolve location: {text}. Please describe it differently."
                        ),
                    ),
                    Err(error) => ActionOutcome::failure(
                        OutcomeStatus::DownstreamFailure,
                        ERROR_LOCATION_RESOLUTION_FAILED,
                        format!("Location resolution failed: {error}"),
                    ),
                }
            }
            Intent::CreateRide { phone_number } => {
                let (Some(pickup), Some(drop)) = (
                    document.pickup_location.clone(),
                    document.drop_location.clone(),
                ) else {
                    // decide() only emits this intent with both slots present.
                    return ActionOutcome::failure(
                        OutcomeStatus::ValidationError,
                        ERROR_MISSING_REQUIRED_DATA,
                        "Missing required fields: pickup location, drop location",
                    );
                };
                let request = RideCreationRequest {
                    phone_number: phone_number.clone(),
                    pickup: pickup.clone(),
                    drop: drop.clone(),
                };
                match self.ride_api.create_ride(&request).await {
                    Ok(created) => {
                        apply_ride_created(&mut document, &phone_number, &created.ride_id);
                        if let Err(outcome) = commit_turn(guard, &mut document, now) {
                            return outcome;
                        }
                        ActionOutcome::success(json!({
                            "success": true,
                            "ride_id": created.ride_id,
                            "message": created.message,
                            "details": {
                                "pickup": pickup.address,
                                "drop": drop.address,
                                "phone": phone_number,
                            },
                        }))
                    }
                    Err(error) => ActionOutcome::failure(
                        OutcomeStatus::DownstreamFailure,
                        ERROR_RIDE_CREATION_FAILED,
                        format!("Failed to create ride: {error}"),
                    ),
                }
            }
            Intent::FetchRideStatus { ride_id } => {
                match self.ride_api.ride_status(&ride_id).await {
                    Ok(report) => ActionOutcome::success(json!({
                        "success": true,
                        "ride_id": report.ride_id,
                        "status": report.status,
                        "driver": report.driver,
                        "eta": report.eta,
                    })),
                    Err(error) => ActionOutcome::failure(
                        OutcomeStatus::DownstreamFailure,
                        ERROR_RIDE_STATUS_FAILED,
                        format!("Failed to get ride status: {error}"),
                    ),
                }
            }
            Intent::CancelRide { ride_id } => {
                if let Some(ride_id) = &ride_id {
                    if let Err(error) = self.ride_api.cancel_ride(ride_id).await {
                        return ActionOutcome::failure(
                            OutcomeStatus::DownstreamFailure,
                            ERROR_RIDE_CANCELLATION_FAILED,
                            format!("Failed to cancel ride: {error}"),
                        );
                    }
                }
                // Cancellation terminates the session and destroys its data.
                if let Err(error) = guard.destroy() {
                    return ActionOutcome::failure(
                        OutcomeStatus::DownstreamFailure,
                        ERROR_SESSION_UNAVAILABLE,
                        format!("Failed to destroy session: {error:#}"),
                    );
                }
                ActionOutcome::success(json!({
                    "success": true,
                    "message": "Your ride has been cancelled",
                    "ride_id": ride_id,
                }))
            }
        }
    }

    /// Out-of-band driver acceptance entering the state machine. Returns true
    /// when the session transitioned; duplicate deliveries are safe no-ops.
    pub async fn apply_driver_assignment(
        &self,
        session_id: &str,
        driver: DriverInfo,
        eta: Option<String>,
    ) -> Result<bool> {
        let guard = self
            .store
            .lock_session(session_id)
            .with_context(|| format!("failed to lock session {session_id}"))?;
        let now = current_unix_timestamp();
        let Some(mut document) = guard.load(now)? else {
            bail!("no active session {session_id} for driver assignment");
        };
        if document.ride_id.is_none() {
            bail!("session {session_id} has no ride awaiting driver assignment");
        }

        let transitioned =
            safar_dialogue::apply_driver_assignment(&mut document, driver, eta);
        if transitioned {
            guard.commit(&mut document, now)?;
            tracing::info!(
                target: "safar::runtime",
                session_id = %session_id,
                ride_id = document.ride_id.as_deref().unwrap_or(""),
                "driver assignment recorded"
            );
        } else {
            tracing::debug!(
                target: "safar::runtime",
                session_id = %session_id,
                "driver assignment redelivery ignored"
            );
        }
        Ok(transitioned)
    }
}

fn commit_turn(
    guard: &SessionGuard,
    document: &mut SessionDocument,
    now: u64,
) -> Result<(), ActionOutcome> {
    guard.commit(document, now).map_err(|error| {
        tracing::error!(
            target: "safar::runtime",
            session_id = %guard.session_id(),
            error = %format!("{error:#}"),
            "failed to commit session turn"
        );
        ActionOutcome::failure(
            OutcomeStatus::DownstreamFailure,
            ERROR_SESSION_UNAVAILABLE,
            format!("Failed to persist session: {error:#}"),
        )
    })
}

/// Seeds location slots carried by the external conversational layer when the
/// stored session lacks them, keeping the forward-only state ordering intact.
fn seed_slots_from_attributes(
    document: &mut SessionDocument,
    attributes: &BTreeMap<String, Value>,
) -> bool {
    let mut seeded = false;
    if document.pickup_location.is_none() {
        if let Some(location) = attribute_location(attributes, "pickup_location") {
            document.pickup_location = Some(location);
            if matches!(
                document.state,
                DialogueState::Greeting | DialogueState::AwaitPickup
            ) {
                document.state = DialogueState::AwaitDrop;
            }
            seeded = true;
        }
    }
    if document.pickup_location.is_some() && document.drop_location.is_none() {
        if let Some(location) = attribute_location(attributes, "drop_location") {
            document.drop_location = Some(location);
            if document.state == DialogueState::AwaitDrop {
                document.state = DialogueState::AwaitPhone;
            }
            seeded = true;
        }
    }
    seeded
}

fn attribute_location(
    attributes: &BTreeMap<String, Value>,
    key: &str,
) -> Option<ResolvedLocation> {
    let value = attributes.get(key)?;
    let value = match value {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
        Value::Object(_) => value.clone(),
        _ => return None,
    };

    if let Ok(location) = serde_json::from_value::<ResolvedLocation>(value.clone()) {
        return Some(location);
    }
    // Legacy shape: {"address": ..., "coordinates": {"lat": ..., "lng": ...}}.
    let address = value.get("address")?.as_str()?.to_string();
    let coordinates = value.get("coordinates")?;
    Some(ResolvedLocation {
        address,
        lat: coordinates.get("lat")?.as_f64()?,
        lng: coordinates.get("lng")?.as_f64()?,
        place_id: value
            .get("place_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn fallback_envelope(fallback_action_group: &str, api_path: &Option<String>) -> Value {
    json!({
        "messageVersion": "1.0",
        "response": {
            "actionGroup": fallback_action_group,
            "apiPath": api_path.as_deref().unwrap_or(""),
            "httpMethod": "POST",
            "httpStatusCode": 500,
            "responseBody": {
                "application/json": {
                    "body": "{\"error\":\"internal envelope composition failure\"}",
                }
            }
        }
    })
}
