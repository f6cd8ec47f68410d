//! Collaborator seams for the booking dialogue: location resolution and the
//! downstream ride API.
//!
//! The traits are the unit the runtime is tested against; the HTTP
//! implementations carry bounded timeouts and surface transport, timeout,
//! and non-success responses as downstream failures with the collaborator's
//! detail preserved.
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use safar_session::{DriverInfo, ResolvedLocation};

mod places;
mod ride_api;

pub use places::{HttpLocationResolver, LocationResolverConfig};
pub use ride_api::{HttpRideApi, RideApiConfig};

#[derive(Debug, Error)]
/// Failures surfaced by collaborator calls.
pub enum DispatchError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("collaborator returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
/// Everything the ride API needs to create one booking.
pub struct RideCreationRequest {
    pub phone_number: String,
    pub pickup: ResolvedLocation,
    pub drop: ResolvedLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A successfully created ride: the downstream id plus its confirmation copy.
pub struct RideCreated {
    pub ride_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Downstream view of a ride's progress.
pub struct RideStatusReport {
    pub ride_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

#[async_trait]
/// Resolves free-form location text to an address plus coordinates.
pub trait LocationResolver: Send + Sync {
    /// `Ok(None)` means the text yielded no candidate at all.
    async fn resolve(&self, text: &str) -> Result<Option<ResolvedLocation>, DispatchError>;
}

#[async_trait]
/// The downstream ride-dispatch backend, seen only through its contract.
pub trait RideApi: Send + Sync {
    async fn create_ride(
        &self,
        request: &RideCreationRequest,
    ) -> Result<RideCreated, DispatchError>;
    async fn cancel_ride(&self, ride_id: &str) -> Result<(), DispatchError>;
    async fn ride_status(&self, ride_id: &str) -> Result<RideStatusReport, DispatchError>;
}
