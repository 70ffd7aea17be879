//! Health-data aggregation, wearable token handling and lifecycle-driven sync.
//!
//! The crate is split along the seams of the pipeline: [`device`] reads raw records,
//! [`aggregate`] and [`score`] derive summaries from them, [`token`] and
//! [`http_client`] talk to the Fitbit Web API, and [`sync`] ties everything to the
//! application lifecycle.

use async_trait::async_trait;
use thiserror::Error;

pub mod aggregate;
pub mod config;
pub mod device;
pub mod extract;
pub mod http_client;
pub mod observability;
pub mod records;
pub mod score;
pub mod session;
pub mod sync;
pub mod token;
pub mod utils;

pub use aggregate::{AggregatedSummary, aggregate};
pub use extract::{WearableMetrics, WearableVitals};
pub use records::{RawHealthDataset, RawRecord, RecordType, TimeRange};
pub use score::{HealthRating, score};

const BODY_SNIPPET_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("wearable account not connected")]
    NotConnected,
    #[error("wearable session expired and no refresh token is available")]
    SessionExpired,
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("health data permission denied")]
    PermissionDenied,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("token storage error: {0}")]
    Storage(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VitalsError {
    /// Build an `Upstream` error, keeping only the head of the response body.
    pub fn from_status(status: u16, body: impl AsRef<str>) -> Self {
        let body: String = body.as_ref().chars().take(BODY_SNIPPET_LEN).collect();
        VitalsError::Upstream { status, body }
    }

    /// Errors the user has to act on (reconnect, grant permission).
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            VitalsError::NotConnected | VitalsError::SessionExpired | VitalsError::PermissionDenied
        )
    }
}

/// Access to the wearable vendor API.
#[async_trait]
pub trait WearableClient: Send + Sync + 'static {
    /// Fetch today's profile and vitals endpoints as one all-or-nothing bundle.
    async fn fetch_bundle(&self) -> Result<WearableMetrics, VitalsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_truncates_body() {
        let long = "x".repeat(1000);
        match VitalsError::from_status(502, &long) {
            VitalsError::Upstream { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), BODY_SNIPPET_LEN);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn user_action_errors() {
        assert!(VitalsError::NotConnected.needs_user_action());
        assert!(VitalsError::SessionExpired.needs_user_action());
        assert!(!VitalsError::from_status(500, "boom").needs_user_action());
    }
}
