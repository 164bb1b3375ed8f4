//! Application configuration loaded from environment variables.
//!
//! Every tunable has a default so embedded clients can run with an empty
//! environment; only the proxy's API key is needed for real directions.

use crate::services::fare::FareConfig;
use crate::services::lifecycle::PickupEtaPolicy;
use crate::services::live_location::PublisherConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Directions proxy ---
    /// Server port
    pub port: u16,
    /// Google Maps REST key (server side only)
    pub google_maps_key: Option<String>,
    /// Upstream Google Directions endpoint
    pub google_directions_url: String,
    pub directions_region: String,
    pub directions_language: String,

    // --- Route provider adapter ---
    /// Primary provider endpoint (normally this proxy's `/api/directions`)
    pub directions_api_url: String,
    /// OSRM base URL for the fallback provider
    pub osrm_url: String,
    /// Per-call timeout for either provider
    pub route_timeout: Duration,

    /// GCP project ID (Firestore backend)
    pub gcp_project_id: String,

    // --- Ride core tunables ---
    pub fare: FareConfig,
    pub publisher: PublisherConfig,
    pub pickup_eta: PickupEtaPolicy,
}

impl Config {
    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            google_maps_key: Some("test_maps_key".to_string()),
            google_directions_url: "http://127.0.0.1:9/maps/api/directions/json".to_string(),
            directions_region: "ec".to_string(),
            directions_language: "es".to_string(),
            directions_api_url: "http://127.0.0.1:9/api/directions".to_string(),
            osrm_url: "http://127.0.0.1:9".to_string(),
            route_timeout: Duration::from_secs(2),
            gcp_project_id: "test-project".to_string(),
            fare: FareConfig::default(),
            publisher: PublisherConfig::default(),
            pickup_eta: PickupEtaPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let fare_defaults = FareConfig::default();
        let publisher_defaults = PublisherConfig::default();
        let pickup_defaults = PickupEtaPolicy::default();

        let fare = FareConfig {
            base: env_parse("FARE_BASE", fare_defaults.base),
            per_km: env_parse("FARE_PER_KM", fare_defaults.per_km),
            min_fare: env_parse("FARE_MIN", fare_defaults.min_fare),
            decimals: env_parse("FARE_DECIMALS", fare_defaults.decimals),
        };

        let publisher = PublisherConfig {
            min_write_interval: Duration::from_millis(env_parse(
                "LIVE_MIN_WRITE_MS",
                publisher_defaults.min_write_interval.as_millis() as u64,
            )),
            poll_interval: Duration::from_millis(env_parse(
                "LIVE_POLL_INTERVAL_MS",
                publisher_defaults.poll_interval.as_millis() as u64,
            )),
        };
        if publisher.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("LIVE_POLL_INTERVAL_MS"));
        }

        let pickup_eta = PickupEtaPolicy {
            factor: env_parse("PICKUP_ETA_FACTOR", pickup_defaults.factor),
            min_minutes: env_parse("PICKUP_ETA_MIN", pickup_defaults.min_minutes),
        };

        Ok(Self {
            port: env_parse("PORT", 8080),
            google_maps_key: env::var("GOOGLE_MAPS_REST_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            google_directions_url: env::var("GOOGLE_DIRECTIONS_URL").unwrap_or_else(|_| {
                "https://maps.googleapis.com/maps/api/directions/json".to_string()
            }),
            directions_region: env::var("DIRECTIONS_REGION").unwrap_or_else(|_| "ec".to_string()),
            directions_language: env::var("DIRECTIONS_LANGUAGE")
                .unwrap_or_else(|_| "es".to_string()),
            directions_api_url: env::var("DIRECTIONS_API_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080/api/directions".to_string()),
            osrm_url: env::var("OSRM_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "https://router.project-osrm.org".to_string()),
            route_timeout: Duration::from_secs(env_parse("ROUTE_TIMEOUT_SECS", 15)),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            fare,
            publisher,
            pickup_eta,
        })
    }

    /// The proxy cannot serve directions without a key.
    pub fn require_maps_key(&self) -> Result<&str, ConfigError> {
        self.google_maps_key
            .as_deref()
            .ok_or(ConfigError::Missing("GOOGLE_MAPS_REST_KEY"))
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring malformed config value");
            default
        }),
        Err(_) => default,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
