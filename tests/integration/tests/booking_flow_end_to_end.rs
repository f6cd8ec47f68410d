use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use safar_dispatch::{
    DispatchError, LocationResolver, RideApi, RideCreated, RideCreationRequest, RideStatusReport,
};
use safar_envelope::ERROR_STATE_NOT_PERMITTED;
use safar_runtime::TurnRuntime;
use safar_session::{DriverInfo, ResolvedLocation, SessionStore};

const ACTION_GROUP: &str = "safe_safari_action_group";

struct FixtureResolver {
    known: BTreeMap<String, ResolvedLocation>,
}

impl FixtureResolver {
    fn new() -> Self {
        let mut known = BTreeMap::new();
        known.insert(
            "GM nagar".to_string(),
            ResolvedLocation {
                address: "GM Nagar, Coimbatore, Tamil Nadu, India".to_string(),
                lat: 11.0168,
                lng: 76.9558,
                place_id: Some("ChIJGmNagar".to_string()),
            },
        );
        known.insert(
            "Gandhipuram".to_string(),
            ResolvedLocation {
                address: "Gandhipuram, Coimbatore, Tamil Nadu, India".to_string(),
                lat: 11.0175,
                lng: 76.9674,
                place_id: Some("ChIJGandhipuram".to_string()),
            },
        );
        Self { known }
    }
}

#[async_trait]
impl LocationResolver for FixtureResolver {
    async fn resolve(&self, text: &str) -> Result<Option<ResolvedLocation>, DispatchError> {
        Ok(self.known.get(text).cloned())
    }
}

struct RecordingRideApi {
    created: Mutex<Vec<RideCreationRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl RecordingRideApi {
    fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RideApi for RecordingRideApi {
    async fn create_ride(
        &self,
        request: &RideCreationRequest,
    ) -> Result<RideCreated, DispatchError> {
        self.created.lock().unwrap().push(request.clone());
        Ok(RideCreated {
            ride_id: "88421".to_string(),
            message: "Ride created successfully".to_string(),
        })
    }

    async fn cancel_ride(&self, ride_id: &str) -> Result<(), DispatchError> {
        self.cancelled.lock().unwrap().push(ride_id.to_string());
        Ok(())
    }

    async fn ride_status(&self, ride_id: &str) -> Result<RideStatusReport, DispatchError> {
        Ok(RideStatusReport {
            ride_id: ride_id.to_string(),
            status: "searching_driver".to_string(),
            driver: None,
            eta: None,
        })
    }
}

struct Stack {
    runtime: TurnRuntime,
    ride_api: Arc<RecordingRideApi>,
    _root: TempDir,
}

fn stack() -> Stack {
    stack_with_ttl(3_600)
}

fn stack_with_ttl(ttl_seconds: u64) -> Stack {
    let root = TempDir::new().expect("temp session root");
    let store = SessionStore::new(root.path(), ttl_seconds).expect("session store");
    let ride_api = Arc::new(RecordingRideApi::new());
    let runtime = TurnRuntime::new(
        store,
        Arc::new(FixtureResolver::new()),
        ride_api.clone() as Arc<dyn RideApi>,
        ACTION_GROUP,
    );
    Stack {
        runtime,
        ride_api,
        _root: root,
    }
}

fn invocation(session_id: &str, api_path: &str, params: &[(&str, &str)]) -> Value {
    let parameters: Vec<Value> = params
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    json!({
        "actionGroup": ACTION_GROUP,
        "apiPath": api_path,
        "sessionId": session_id,
        "parameters": parameters,
    })
}

fn status_of(response: &Value) -> u64 {
    response
        .pointer("/response/httpStatusCode")
        .and_then(Value::as_u64)
        .expect("httpStatusCode")
}

fn body_of(response: &Value) -> Value {
    let raw = response
        .pointer("/response/responseBody/application~1json/body")
        .and_then(Value::as_str)
        .expect("body string");
    serde_json::from_str(raw).expect("body parses")
}

fn assert_envelope_echo(response: &Value, api_path: &str) {
    assert_eq!(
        response.get("messageVersion").and_then(Value::as_str),
        Some("1.0")
    );
    assert_eq!(
        response.pointer("/response/actionGroup").and_then(Value::as_str),
        Some(ACTION_GROUP)
    );
    assert_eq!(
        response.pointer("/response/apiPath").and_then(Value::as_str),
        Some(api_path)
    );
    assert_eq!(
        response.pointer("/response/httpMethod").and_then(Value::as_str),
        Some("POST")
    );
}

#[tokio::test]
async fn integration_full_booking_lifecycle() {
    let stack = stack();
    let session = "booking_lifecycle";

    // Greeting turn: any input yields the pickup prompt.
    let greet = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "hello")],
        ))
        .await;
    assert_envelope_echo(&greet, "/resolve-location");
    assert_eq!(status_of(&greet), 200);
    assert!(body_of(&greet)["message"]
        .as_str()
        .expect("prompt")
        .contains("pick you up"));

    // Pickup resolution.
    let pickup = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "GM nagar"), ("type", "pickup")],
        ))
        .await;
    assert_envelope_echo(&pickup, "/resolve-location");
    assert_eq!(status_of(&pickup), 200);
    let pickup_body = body_of(&pickup);
    assert_eq!(
        pickup_body["location"].as_str(),
        Some("GM Nagar, Coimbatore, Tamil Nadu, India")
    );
    assert_eq!(pickup_body["coordinates"]["lat"].as_f64(), Some(11.0168));

    // Drop resolution arrives via the nested requestBody shape; both wire
    // shapes must behave identically.
    let drop_event = json!({
        "actionGroup": ACTION_GROUP,
        "apiPath": "/resolve-location",
        "sessionId": session,
        "requestBody": {
            "content": {
                "application/json": {
                    "properties": [
                        {"name": "location_text", "value": "Gandhipuram"},
                        {"name": "type", "value": "drop"}
                    ]
                }
            }
        }
    });
    let drop_turn = stack.runtime.handle_invocation(&drop_event).await;
    assert_envelope_echo(&drop_turn, "/resolve-location");
    assert_eq!(status_of(&drop_turn), 200);
    assert!(body_of(&drop_turn)["message"]
        .as_str()
        .expect("prompt")
        .contains("phone number"));

    // Booking.
    let create = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/create-ride",
            &[("phone_number", "1234567893")],
        ))
        .await;
    assert_envelope_echo(&create, "/create-ride");
    assert_eq!(status_of(&create), 200);
    let create_body = body_of(&create);
    assert_eq!(create_body["ride_id"].as_str(), Some("88421"));

    let created = stack.ride_api.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].phone_number, "1234567893");
    drop(created);

    // Out-of-band driver acceptance.
    let transitioned = stack
        .runtime
        .apply_driver_assignment(
            session,
            DriverInfo {
                name: "Raja".to_string(),
                phone: "3698521470".to_string(),
                vehicle_number: "TN 01 AB 1234".to_string(),
            },
            Some("5 minutes".to_string()),
        )
        .await
        .expect("driver push");
    assert!(transitioned);

    // Status delivery hands over driver details and completes the session.
    let status = stack
        .runtime
        .handle_invocation(&invocation(session, "/get-ride-status", &[("ride_id", "88421")]))
        .await;
    assert_envelope_echo(&status, "/get-ride-status");
    assert_eq!(status_of(&status), 200);
    let status_body = body_of(&status);
    assert_eq!(status_body["driver"]["name"].as_str(), Some("Raja"));
    assert_eq!(status_body["driver"]["vehicle_number"].as_str(), Some("TN 01 AB 1234"));
    assert_eq!(status_body["eta"].as_str(), Some("5 minutes"));

    // One ride per session: a new booking attempt is accepted but refused.
    let rebook = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/create-ride",
            &[("phone_number", "1234567893")],
        ))
        .await;
    assert_eq!(status_of(&rebook), 200);
    assert!(body_of(&rebook)["message"]
        .as_str()
        .expect("message")
        .contains("new session"));
    assert_eq!(stack.ride_api.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn integration_cancellation_mid_flow_destroys_session() {
    let stack = stack();
    let session = "cancel_mid_flow";

    stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "hello")],
        ))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "GM nagar"), ("type", "pickup")],
        ))
        .await;

    let cancel = stack
        .runtime
        .handle_invocation(&invocation(session, "/cancel-ride", &[("reason", "changed plans")]))
        .await;
    assert_envelope_echo(&cancel, "/cancel-ride");
    assert_eq!(status_of(&cancel), 200);
    // No ride was ever created, so nothing downstream to cancel.
    assert!(stack.ride_api.cancelled.lock().unwrap().is_empty());

    // The next turn observes a brand-new session back at greeting.
    let fresh = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "GM nagar")],
        ))
        .await;
    assert_eq!(status_of(&fresh), 200);
    assert!(body_of(&fresh)["message"]
        .as_str()
        .expect("prompt")
        .contains("pick you up"));
}

#[tokio::test]
async fn integration_expired_session_restarts_at_greeting() {
    let stack = stack_with_ttl(1);
    let session = "ttl_expiry";

    stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "hello")],
        ))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "GM nagar"), ("type", "pickup")],
        ))
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;

    // Past the TTL the same session id greets again; the old pickup is gone.
    let after = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "Gandhipuram"), ("type", "drop")],
        ))
        .await;
    assert_eq!(status_of(&after), 200);
    assert!(body_of(&after)["message"]
        .as_str()
        .expect("prompt")
        .contains("pick you up"));
}

#[tokio::test]
async fn integration_cancelled_session_rejects_further_booking_turns() {
    let stack = stack();
    let session = "post_cancel";

    stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "hello")],
        ))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(session, "/cancel-ride", &[("reason", "nevermind")]))
        .await;

    // Cancellation destroyed the document, so the id starts over cleanly
    // rather than reporting a dead session.
    let next = stack
        .runtime
        .handle_invocation(&invocation(
            session,
            "/resolve-location",
            &[("location_text", "GM nagar")],
        ))
        .await;
    assert_eq!(status_of(&next), 200);

    // A second booking attempt in an already-booked session is the refusal
    // path that keeps the one-ride-per-session rule observable end to end.
    let other = "second_booking";
    stack
        .runtime
        .handle_invocation(&invocation(other, "/resolve-location", &[("location_text", "x")]))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(
            other,
            "/resolve-location",
            &[("location_text", "GM nagar"), ("type", "pickup")],
        ))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(
            other,
            "/resolve-location",
            &[("location_text", "Gandhipuram"), ("type", "drop")],
        ))
        .await;
    stack
        .runtime
        .handle_invocation(&invocation(other, "/create-ride", &[("phone_number", "12345")]))
        .await;
    let rebook = stack
        .runtime
        .handle_invocation(&invocation(other, "/create-ride", &[("phone_number", "12345")]))
        .await;
    assert_eq!(status_of(&rebook), 400);
    assert_eq!(
        body_of(&rebook)["error_code"].as_str(),
        Some(ERROR_STATE_NOT_PERMITTED)
    );
}
