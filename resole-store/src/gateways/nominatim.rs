use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{reject, transport_error};
use resole_core::{GatewayError, GeocodingGateway};
use resole_shared::GeoPoint;

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// OpenStreetMap Nominatim search API.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeocodingGateway for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let places: Vec<Place> = response.json().await.map_err(transport_error)?;
        let Some(place) = places.into_iter().next() else {
            debug!("Nominatim returned no match");
            return Ok(None);
        };

        let lat = place
            .lat
            .parse::<f64>()
            .map_err(|e| GatewayError::Decode(format!("lat: {}", e)))?;
        let lon = place
            .lon
            .parse::<f64>()
            .map_err(|e| GatewayError::Decode(format!("lon: {}", e)))?;

        Ok(Some(GeoPoint::new(lat, lon)))
    }
}
