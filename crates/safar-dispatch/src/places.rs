//! Geocoding-backed location resolution.
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use safar_session::ResolvedLocation;

use crate::{DispatchError, LocationResolver};

const GEOCODE_STATUS_OK: &str = "OK";
const GEOCODE_STATUS_ZERO_RESULTS: &str = "ZERO_RESULTS";

#[derive(Debug, Clone)]
/// Public struct `LocationResolverConfig` used across Safar components.
pub struct LocationResolverConfig {
    pub api_base: String,
    pub api_key: String,
    /// Geocoder component filter, e.g. `country:IN`.
    pub components: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Location resolver backed by a Google-style geocoding endpoint.
pub struct HttpLocationResolver {
    client: reqwest::Client,
    config: LocationResolverConfig,
}

impl HttpLocationResolver {
    pub fn new(config: LocationResolverConfig) -> Result<Self, DispatchError> {
        if config.api_key.trim().is_empty() {
            return Err(DispatchError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LocationResolver for HttpLocationResolver {
    async fn resolve(&self, text: &str) -> Result<Option<ResolvedLocation>, DispatchError> {
        let mut query = vec![
            ("address".to_string(), text.to_string()),
            ("key".to_string(), self.config.api_key.clone()),
        ];
        if let Some(components) = &self.config.components {
            query.push(("components".to_string(), components.clone()));
        }

        let response = self
            .client
            .get(&self.config.api_base)
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DispatchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload = serde_json::from_str::<GeocodePayload>(&body)?;
        match payload.status.as_str() {
            GEOCODE_STATUS_OK => {}
            GEOCODE_STATUS_ZERO_RESULTS => return Ok(None),
            other => {
                return Err(DispatchError::InvalidResponse(format!(
                    "geocoder status '{other}'"
                )));
            }
        }

        let Some(candidate) = payload.results.into_iter().next() else {
            return Ok(None);
        };
        tracing::debug!(
            target: "safar::dispatch",
            address = %candidate.formatted_address,
            "resolved location text"
        );
        Ok(Some(ResolvedLocation {
            address: candidate.formatted_address,
            lat: candidate.geometry.location.lat,
            lng: candidate.geometry.location.lng,
            place_id: candidate.place_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GeocodePayload {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeocodeCandidate {
    formatted_address: String,
    geometry: GeocodeGeometry,
    #[serde(default)]
    place_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: GeocodeLatLng,
}

#[derive(Debug, Deserialize)]
struct GeocodeLatLng {
    lat: f64,
    lng: f64,
}
