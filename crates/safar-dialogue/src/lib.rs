//! The dialogue state machine: the step-ordering authority for the booking
//! flow.
//!
//! Everything here is a pure function of the session snapshot and the
//! normalized invocation. Deciding a turn never performs I/O; the runtime
//! executes the emitted intent against the collaborators and then applies
//! the matching transition.
use std::collections::BTreeMap;

use safar_envelope::{
    OutcomeStatus, ERROR_IMMUTABLE_SLOT, ERROR_MISSING_PARAMETER, ERROR_MISSING_REQUIRED_DATA,
    ERROR_STATE_NOT_PERMITTED,
};
use safar_session::{DialogueState, DriverInfo, ResolvedLocation, SessionDocument};

pub const PROMPT_GREETING: &str =
    "Welcome to Safar. Where should we pick you up?";
pub const PROMPT_ASK_DROP: &str = "Where would you like to go?";
pub const PROMPT_ASK_PHONE: &str = "What phone number should the driver call?";
pub const MESSAGE_RIDE_COMPLETE: &str =
    "This session's ride is complete. Start a new session to book another ride.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The backend capability a caller addressed via `apiPath`.
pub enum ActionRoute {
    ResolveLocation,
    CreateRide,
    GetRideStatus,
    CancelRide,
}

impl ActionRoute {
    pub fn from_api_path(api_path: &str) -> Option<Self> {
        match api_path.trim() {
            "/resolve-location" => Some(Self::ResolveLocation),
            "/create-ride" => Some(Self::CreateRide),
            "/get-ride-status" => Some(Self::GetRideStatus),
            "/cancel-ride" => Some(Self::CancelRide),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which location slot a resolution targets.
pub enum LocationSlot {
    Pickup,
    Drop,
}

impl LocationSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            LocationSlot::Pickup => "pickup",
            LocationSlot::Drop => "drop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A validated intent for the dispatcher to execute.
pub enum Intent {
    ResolveLocation { slot: LocationSlot, text: String },
    CreateRide { phone_number: String },
    FetchRideStatus { ride_id: String },
    CancelRide { ride_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A locally recoverable refusal: the session state stays put.
pub struct Rejection {
    pub status: OutcomeStatus,
    pub error_code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What the state machine wants done with one inbound turn.
pub enum Decision {
    /// Emit the pickup prompt and advance out of greeting; no backend call.
    Greet,
    /// Answer from the recorded driver details and mark them delivered.
    DeliverDriverDetails,
    /// Accept the turn without restarting booking (one ride per session).
    AcceptWithoutBooking { message: String },
    Execute(Intent),
    Reject(Rejection),
}

/// Decides the next allowed transition for one normalized invocation.
pub fn decide(
    document: &SessionDocument,
    route: ActionRoute,
    parameters: &BTreeMap<String, String>,
) -> Decision {
    // Explicit cancellation is honored from every state.
    if route == ActionRoute::CancelRide {
        let ride_id = document
            .ride_id
            .clone()
            .or_else(|| non_empty_parameter(parameters, "ride_id"));
        return Decision::Execute(Intent::CancelRide { ride_id });
    }

    match document.state {
        DialogueState::Greeting => Decision::Greet,
        DialogueState::AwaitPickup | DialogueState::AwaitDrop | DialogueState::AwaitPhone => {
            match route {
                ActionRoute::ResolveLocation => decide_resolution(document, parameters),
                ActionRoute::CreateRide => decide_ride_creation(document, parameters),
                ActionRoute::GetRideStatus => decide_status(document, parameters),
                ActionRoute::CancelRide => unreachable!("cancellation handled above"),
            }
        }
        DialogueState::RideRequested => match route {
            ActionRoute::ResolveLocation => Decision::Reject(Rejection {
                status: OutcomeStatus::ValidationError,
                error_code: ERROR_STATE_NOT_PERMITTED,
                message: "Locations are fixed once a ride has been requested".to_string(),
            }),
            ActionRoute::CreateRide => Decision::Reject(Rejection {
                status: OutcomeStatus::ValidationError,
                error_code: ERROR_STATE_NOT_PERMITTED,
                message: "A ride has already been requested for this session".to_string(),
            }),
            ActionRoute::GetRideStatus => decide_status(document, parameters),
            ActionRoute::CancelRide => unreachable!("cancellation handled above"),
        },
        DialogueState::DriverAssigned => match route {
            ActionRoute::GetRideStatus => Decision::DeliverDriverDetails,
            ActionRoute::ResolveLocation | ActionRoute::CreateRide => {
                Decision::Reject(Rejection {
                    status: OutcomeStatus::ValidationError,
                    error_code: ERROR_STATE_NOT_PERMITTED,
                    message: "A driver is already assigned for this session's ride".to_string(),
                })
            }
            ActionRoute::CancelRide => unreachable!("cancellation handled above"),
        },
        DialogueState::Complete => match route {
            ActionRoute::GetRideStatus => decide_status(document, parameters),
            ActionRoute::ResolveLocation | ActionRoute::CreateRide => {
                Decision::AcceptWithoutBooking {
                    message: MESSAGE_RIDE_COMPLETE.to_string(),
                }
            }
            ActionRoute::CancelRide => unreachable!("cancellation handled above"),
        },
        DialogueState::Cancelled => Decision::Reject(Rejection {
            status: OutcomeStatus::ValidationError,
            error_code: ERROR_STATE_NOT_PERMITTED,
            message: "This session has been cancelled".to_string(),
        }),
    }
}

fn decide_resolution(
    document: &SessionDocument,
    parameters: &BTreeMap<String, String>,
) -> Decision {
    let Some(text) = non_empty_parameter(parameters, "location_text") else {
        return Decision::Reject(Rejection {
            status: OutcomeStatus::ValidationError,
            error_code: ERROR_MISSING_PARAMETER,
            message: "Location text is required".to_string(),
        });
    };

    let slot = match parameters.get("type").map(String::as_str) {
        None | Some("pickup") => LocationSlot::Pickup,
        Some("drop") => LocationSlot::Drop,
        Some(other) => {
            return Decision::Reject(Rejection {
                status: OutcomeStatus::ValidationError,
                error_code: ERROR_MISSING_PARAMETER,
                message: format!("Location type '{other}' must be 'pickup' or 'drop'"),
            });
        }
    };

    // Locations are immutable once set; strict step ordering otherwise.
    match slot {
        LocationSlot::Pickup if document.pickup_location.is_some() => {
            Decision::Reject(Rejection {
                status: OutcomeStatus::ValidationError,
                error_code: ERROR_IMMUTABLE_SLOT,
                message: "Pickup location is already set and cannot be changed".to_string(),
            })
        }
        LocationSlot::Drop if document.drop_location.is_some() => Decision::Reject(Rejection {
            status: OutcomeStatus::ValidationError,
            error_code: ERROR_IMMUTABLE_SLOT,
            message: "Drop location is already set and cannot be changed".to_string(),
        }),
        LocationSlot::Drop if document.pickup_location.is_none() => {
            Decision::Reject(Rejection {
                status: OutcomeStatus::ValidationError,
                error_code: ERROR_STATE_NOT_PERMITTED,
                message: "Pickup location must be resolved before the drop location".to_string(),
            })
        }
        _ => Decision::Execute(Intent::ResolveLocation { slot, text }),
    }
}

fn decide_status(document: &SessionDocument, parameters: &BTreeMap<String, String>) -> Decision {
    let ride_id = non_empty_parameter(parameters, "ride_id").or_else(|| document.ride_id.clone());
    match ride_id {
        Some(ride_id) => Decision::Execute(Intent::FetchRideStatus { ride_id }),
        None => Decision::Reject(Rejection {
            status: OutcomeStatus::ValidationError,
            error_code: ERROR_MISSING_PARAMETER,
            message: "Ride ID is required".to_string(),
        }),
    }
}

/// Every missing booking prerequisite, in slot order, as user-facing names.
pub fn missing_booking_fields(
    document: &SessionDocument,
    parameters: &BTreeMap<String, String>,
) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if document.pickup_location.is_none() {
        missing.push("pickup location");
    }
    if document.drop_location.is_none() {
        missing.push("drop location");
    }
    if non_empty_parameter(parameters, "phone_number").is_none() {
        missing.push("phone number");
    }
    missing
}

fn decide_ride_creation(
    document: &SessionDocument,
    parameters: &BTreeMap<String, String>,
) -> Decision {
    let missing = missing_booking_fields(document, parameters);
    if missing.is_empty() {
        let phone_number = non_empty_parameter(parameters, "phone_number")
            .unwrap_or_default();
        return Decision::Execute(Intent::CreateRide { phone_number });
    }
    // All missing prerequisites are reported in one combined message.
    Decision::Reject(Rejection {
        status: OutcomeStatus::ValidationError,
        error_code: ERROR_MISSING_REQUIRED_DATA,
        message: format!("Missing required fields: {}", missing.join(", ")),
    })
}

fn non_empty_parameter(parameters: &BTreeMap<String, String>, name: &str) -> Option<String> {
    parameters
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Greeting turn: emit the pickup prompt and advance to `AwaitPickup`.
pub fn apply_greeting(document: &mut SessionDocument) -> &'static str {
    document.state = DialogueState::AwaitPickup;
    PROMPT_GREETING
}

/// Records a resolved location slot and advances the dialogue, returning the
/// follow-up prompt. Precondition: `decide` emitted the matching intent.
pub fn apply_location_resolved(
    document: &mut SessionDocument,
    slot: LocationSlot,
    location: ResolvedLocation,
) -> String {
    match slot {
        LocationSlot::Pickup => {
            let prompt = format!("Pickup set to {}. {}", location.address, PROMPT_ASK_DROP);
            document.pickup_location = Some(location);
            document.state = DialogueState::AwaitDrop;
            prompt
        }
        LocationSlot::Drop => {
            let prompt = format!("Drop set to {}. {}", location.address, PROMPT_ASK_PHONE);
            document.drop_location = Some(location);
            document.state = DialogueState::AwaitPhone;
            prompt
        }
    }
}

/// Records the created ride and the phone number it was booked under.
pub fn apply_ride_created(document: &mut SessionDocument, phone_number: &str, ride_id: &str) {
    document.phone_number = Some(phone_number.to_string());
    document.ride_id = Some(ride_id.to_string());
    document.state = DialogueState::RideRequested;
}

/// Out-of-band driver acceptance. Returns true when the transition happened;
/// redelivery of the same assignment is a safe no-op.
pub fn apply_driver_assignment(
    document: &mut SessionDocument,
    driver: DriverInfo,
    eta: Option<String>,
) -> bool {
    match document.state {
        DialogueState::RideRequested if document.ride_id.is_some() => {
            document.driver = Some(driver);
            document.driver_eta = eta;
            document.state = DialogueState::DriverAssigned;
            true
        }
        DialogueState::DriverAssigned | DialogueState::Complete => false,
        _ => false,
    }
}

/// Driver details have been delivered to the caller once; the booking is done.
pub fn apply_status_delivered(document: &mut SessionDocument) {
    document.state = DialogueState::Complete;
}
