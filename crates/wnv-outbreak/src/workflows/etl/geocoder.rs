use crate::config::{GeocoderConfig, HttpConfig};
use crate::http::{HttpClient, HttpError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;
use tracing::debug;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointCategory {
    Residential,
}

impl PointCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Residential => "Residential",
        }
    }
}

impl fmt::Display for PointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A matched address in the geocoder's coordinate space (lon/lat).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeocodedPoint {
    pub x: f64,
    pub y: f64,
    pub category: PointCategory,
}

impl GeocodedPoint {
    pub const fn residential(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            category: PointCategory::Residential,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Request(#[from] HttpError),
}

pub trait Geocoder: Debug {
    /// Resolves one street address. `Ok(None)` means the service answered but
    /// found no match.
    fn geocode(&self, street_address: &str) -> Result<Option<GeocodedPoint>, GeocodeError>;
}

/// US Census Bureau one-line address geocoder.
#[derive(Debug)]
pub struct CensusGeocoder {
    client: HttpClient,
    config: GeocoderConfig,
}

impl CensusGeocoder {
    pub fn new(config: GeocoderConfig, http: &HttpConfig) -> Result<Self, GeocodeError> {
        let retry = RetryPolicy::exponential(http.max_attempts, RETRY_BASE_DELAY);
        Self::with_retry(config, http, retry)
    }

    pub fn with_retry(
        config: GeocoderConfig,
        http: &HttpConfig,
        retry: RetryPolicy,
    ) -> Result<Self, GeocodeError> {
        Ok(Self {
            client: HttpClient::new(http, retry)?,
            config,
        })
    }

    /// The one-line address sent to the service.
    pub fn qualified_address(&self, street_address: &str) -> String {
        let street = street_address.trim();
        let suffix = self.config.locality_suffix.trim();
        if suffix.is_empty() {
            street.to_string()
        } else {
            format!("{street} {suffix}")
        }
    }
}

#[derive(Debug, Deserialize)]
struct CensusResponse {
    #[serde(default)]
    result: Option<CensusResult>,
}

#[derive(Debug, Deserialize)]
struct CensusResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: Coordinates,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    x: f64,
    y: f64,
}

impl Geocoder for CensusGeocoder {
    fn geocode(&self, street_address: &str) -> Result<Option<GeocodedPoint>, GeocodeError> {
        let address = self.qualified_address(street_address);
        debug!(address = %address, "geocoding");

        let response: CensusResponse = self.client.get_json(
            &self.config.endpoint,
            &[
                ("address", address.as_str()),
                ("benchmark", self.config.benchmark.as_str()),
                ("format", "json"),
            ],
        )?;

        Ok(response
            .result
            .and_then(|result| result.address_matches.into_iter().next())
            .map(|first| GeocodedPoint::residential(first.coordinates.x, first.coordinates.y)))
    }
}
