//! HTTP client implementation for the Fitbit Web API.
//!
//! This module provides a reqwest-based implementation of the [`WearableClient`](crate::WearableClient) trait.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::token::TokenManager;
use crate::utils::local_date_string;
use crate::{VitalsError, WearableClient, WearableMetrics};

pub const FITBIT_API_BASE: &str = "https://api.fitbit.com";

/// Per-day endpoints fetched for every bundle, in bundle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WearableEndpoint {
    Profile,
    Steps,
    Heart,
    Sleep,
    CoreTemperature,
    SkinTemperature,
    OxygenSaturation,
    BreathingRate,
}

impl WearableEndpoint {
    pub const ALL: [WearableEndpoint; 8] = [
        WearableEndpoint::Profile,
        WearableEndpoint::Steps,
        WearableEndpoint::Heart,
        WearableEndpoint::Sleep,
        WearableEndpoint::CoreTemperature,
        WearableEndpoint::SkinTemperature,
        WearableEndpoint::OxygenSaturation,
        WearableEndpoint::BreathingRate,
    ];

    /// Path below the API base for the given `YYYY-MM-DD` date.
    pub fn path(self, date: &str) -> String {
        match self {
            WearableEndpoint::Profile => "/1/user/-/profile.json".to_string(),
            WearableEndpoint::Steps => format!("/1/user/-/activities/steps/date/{date}/1d.json"),
            WearableEndpoint::Heart => format!("/1/user/-/activities/heart/date/{date}/1d.json"),
            WearableEndpoint::Sleep => format!("/1.2/user/-/sleep/date/{date}.json"),
            WearableEndpoint::CoreTemperature => format!("/1/user/-/temp/core/date/{date}.json"),
            WearableEndpoint::SkinTemperature => format!("/1/user/-/temp/skin/date/{date}.json"),
            WearableEndpoint::OxygenSaturation => format!("/1/user/-/spo2/date/{date}.json"),
            WearableEndpoint::BreathingRate => format!("/1/user/-/br/date/{date}.json"),
        }
    }
}

/// Client for the Fitbit Web API using reqwest.
#[derive(Clone)]
pub struct ReqwestWearableClient {
    base_url: String,
    tokens: Arc<TokenManager>,
    client: reqwest::Client,
}

impl ReqwestWearableClient {
    /// Create a new client instance.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API (e.g., "https://api.fitbit.com")
    /// * `tokens` - Source of bearer tokens; refreshed transparently when close to expiry
    pub fn new(base_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Build an authenticated GET request.
    fn get_request(&self, path: &str, token: &SecretString) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT_LANGUAGE, "en_US")
    }

    /// Execute a request and expect a JSON response.
    async fn execute_json(&self, request: reqwest::RequestBuilder) -> Result<Value, VitalsError> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Extract error information from a failed response.
    async fn error_from_response(resp: reqwest::Response) -> VitalsError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(status, "wearable API returned an error");
        VitalsError::from_status(status, body)
    }

    /// Authenticated GET of a single path, refreshing the token first if needed.
    pub async fn api_fetch(&self, path: &str) -> Result<Value, VitalsError> {
        let token = self.tokens.ensure_access_token().await?;
        self.execute_json(self.get_request(path, &token)).await
    }
}

#[async_trait]
impl WearableClient for ReqwestWearableClient {
    async fn fetch_bundle(&self) -> Result<WearableMetrics, VitalsError> {
        let date = local_date_string();
        let token = self.tokens.ensure_access_token().await?;

        let requests = WearableEndpoint::ALL
            .iter()
            .map(|endpoint| self.execute_json(self.get_request(&endpoint.path(&date), &token)));
        let mut responses = try_join_all(requests).await?.into_iter();
        let mut next = || responses.next().unwrap_or(Value::Null);

        tracing::debug!(%date, "wearable bundle fetched");
        Ok(WearableMetrics {
            profile: next(),
            steps: next(),
            heart: next(),
            sleep: next(),
            temperature: next(),
            skin_temperature: next(),
            oxygen_saturation: next(),
            breathing_rate: next(),
        })
    }
}
