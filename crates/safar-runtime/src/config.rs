//! Environment-driven runtime configuration and tracing bootstrap.
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use safar_dispatch::{
    HttpLocationResolver, HttpRideApi, LocationResolverConfig, RideApiConfig,
};
use safar_session::{SessionStore, DEFAULT_SESSION_TTL_SECONDS};

use crate::TurnRuntime;

/// Action group echoed when the inbound invocation omits its own.
pub const DEFAULT_FALLBACK_ACTION_GROUP: &str = "safe_safari_action_group";

const DEFAULT_PLACES_API_BASE: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_PLACES_COMPONENTS: &str = "country:IN";
const DEFAULT_PHONE_CODE: &str = "+91";
const DEFAULT_SESSION_ROOT: &str = "safar-sessions";
const DEFAULT_COLLABORATOR_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
/// Everything the runtime needs, resolved from the process environment.
pub struct RuntimeConfig {
    pub ride_api_base_url: String,
    pub places_api_base: String,
    pub places_api_key: String,
    pub fallback_action_group: String,
    pub session_root: String,
    pub session_ttl_seconds: u64,
    pub collaborator_timeout_ms: u64,
}

impl RuntimeConfig {
    /// Reads the `SAFAR_*` environment surface. The ride API base URL and
    /// the places API key have no usable defaults and must be present.
    pub fn from_env() -> Result<Self> {
        let Some(ride_api_base_url) = non_empty_env_var("SAFAR_RIDE_API_BASE_URL") else {
            bail!("SAFAR_RIDE_API_BASE_URL is required");
        };
        let Some(places_api_key) = non_empty_env_var("SAFAR_PLACES_API_KEY") else {
            bail!("SAFAR_PLACES_API_KEY is required");
        };

        Ok(Self {
            ride_api_base_url,
            places_api_base: non_empty_env_var("SAFAR_PLACES_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PLACES_API_BASE.to_string()),
            places_api_key,
            fallback_action_group: non_empty_env_var("SAFAR_FALLBACK_ACTION_GROUP")
                .unwrap_or_else(|| DEFAULT_FALLBACK_ACTION_GROUP.to_string()),
            session_root: non_empty_env_var("SAFAR_SESSION_ROOT")
                .unwrap_or_else(|| DEFAULT_SESSION_ROOT.to_string()),
            session_ttl_seconds: parsed_env_var(
                "SAFAR_SESSION_TTL_SECONDS",
                DEFAULT_SESSION_TTL_SECONDS,
            )?,
            collaborator_timeout_ms: parsed_env_var(
                "SAFAR_COLLABORATOR_TIMEOUT_MS",
                DEFAULT_COLLABORATOR_TIMEOUT_MS,
            )?,
        })
    }

    /// Builds the runtime with the HTTP collaborator implementations.
    pub fn build_runtime(&self) -> Result<TurnRuntime> {
        let store = SessionStore::new(&self.session_root, self.session_ttl_seconds)?;
        let location_resolver = HttpLocationResolver::new(LocationResolverConfig {
            api_base: self.places_api_base.clone(),
            api_key: self.places_api_key.clone(),
            components: Some(DEFAULT_PLACES_COMPONENTS.to_string()),
            request_timeout_ms: self.collaborator_timeout_ms,
        })
        .context("failed to build location resolver client")?;
        let ride_api = HttpRideApi::new(RideApiConfig {
            base_url: self.ride_api_base_url.clone(),
            phone_code: DEFAULT_PHONE_CODE.to_string(),
            request_timeout_ms: self.collaborator_timeout_ms,
        })
        .context("failed to build ride API client")?;

        Ok(TurnRuntime::new(
            store,
            Arc::new(location_resolver),
            Arc::new(ride_api),
            self.fallback_action_group.clone(),
        ))
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_env_var(name: &str, default: u64) -> Result<u64> {
    match non_empty_env_var(name) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'")),
        None => Ok(default),
    }
}

/// Initializes tracing for binaries and long-lived test harnesses. Honors
/// `RUST_LOG`, defaulting to warnings.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
