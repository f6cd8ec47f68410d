//! HTTP client for the downstream ride-dispatch backend.
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use safar_session::DriverInfo;

use crate::{DispatchError, RideApi, RideCreated, RideCreationRequest, RideStatusReport};

const CREATE_RIDE_PATH: &str = "/map/admin/create-admin-ride";
const CANCEL_RIDE_PATH: &str = "/map/admin/cancel-ride";
const RIDE_STATUS_PATH: &str = "/map/admin/ride-status";

const DEFAULT_CONFIRMATION: &str = "Ride created successfully";

#[derive(Debug, Clone)]
/// Public struct `RideApiConfig` used across Safar components.
pub struct RideApiConfig {
    pub base_url: String,
    /// Country calling code sent alongside the bare phone number.
    pub phone_code: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Reqwest-backed implementation of the ride API contract.
pub struct HttpRideApi {
    client: reqwest::Client,
    base_url: String,
    phone_code: String,
}

impl HttpRideApi {
    pub fn new(config: RideApiConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            phone_code: config.phone_code,
        })
    }

    async fn read_success_body(response: reqwest::Response) -> Result<String, DispatchError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DispatchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl RideApi for HttpRideApi {
    async fn create_ride(
        &self,
        request: &RideCreationRequest,
    ) -> Result<RideCreated, DispatchError> {
        let payload = json!({
            "phone_code": self.phone_code,
            "phone_number": request.phone_number,
            "origin_latitude": request.pickup.lat,
            "origin_longitude": request.pickup.lng,
            "destination_latitude": request.drop.lat,
            "destination_longitude": request.drop.lng,
            "pickup_location": request.pickup.address,
            "drop_location": request.drop.address,
            "distance": "N/A",
            "duration": "N/A",
        });
        tracing::info!(
            target: "safar::dispatch",
            pickup = %request.pickup.address,
            drop = %request.drop.address,
            "creating ride"
        );

        let response = self
            .client
            .post(format!("{}{CREATE_RIDE_PATH}", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let body = Self::read_success_body(response).await?;
        let confirmation = serde_json::from_str::<RideConfirmation>(&body)?;

        let Some(ride_id) = confirmation.ride_id else {
            return Err(DispatchError::InvalidResponse(
                "ride confirmation carries no ride_id".to_string(),
            ));
        };
        Ok(RideCreated {
            ride_id: ride_id.into_string(),
            message: confirmation
                .message
                .unwrap_or_else(|| DEFAULT_CONFIRMATION.to_string()),
        })
    }

    async fn cancel_ride(&self, ride_id: &str) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(format!("{}{CANCEL_RIDE_PATH}/{ride_id}", self.base_url))
            .send()
            .await?;
        Self::read_success_body(response).await?;
        tracing::info!(target: "safar::dispatch", ride_id = %ride_id, "cancelled ride");
        Ok(())
    }

    async fn ride_status(&self, ride_id: &str) -> Result<RideStatusReport, DispatchError> {
        let response = self
            .client
            .get(format!("{}{RIDE_STATUS_PATH}/{ride_id}", self.base_url))
            .send()
            .await?;
        let body = Self::read_success_body(response).await?;
        let report = serde_json::from_str::<RideStatusPayload>(&body)?;
        Ok(RideStatusReport {
            ride_id: report
                .ride_id
                .map(RideIdField::into_string)
                .unwrap_or_else(|| ride_id.to_string()),
            status: report.status,
            driver: report.driver,
            eta: report.eta,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RideConfirmation {
    #[serde(default)]
    ride_id: Option<RideIdField>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RideStatusPayload {
    #[serde(default)]
    ride_id: Option<RideIdField>,
    status: String,
    #[serde(default)]
    driver: Option<DriverInfo>,
    #[serde(default)]
    eta: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
/// The backend emits ride ids as either JSON numbers or strings.
enum RideIdField {
    Number(u64),
    Text(String),
}

impl RideIdField {
    fn into_string(self) -> String {
        match self {
            RideIdField::Number(value) => value.to_string(),
            RideIdField::Text(value) => value,
        }
    }
}
