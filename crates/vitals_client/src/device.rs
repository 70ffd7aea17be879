//! Reads raw records from the on-device health store, with an injectable
//! fallback dataset for when the store is unavailable or access was refused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::VitalsError;
use crate::records::{RawHealthDataset, RawRecord, RecordType, TimeRange};
use crate::utils::iso8601;

/// Time filter understood by the device store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeFilter {
    pub operator: &'static str,
    pub start_time: String,
    pub end_time: String,
}

impl TimeRangeFilter {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            operator: "between",
            start_time: iso8601(start),
            end_time: iso8601(end),
        }
    }
}

/// The platform health store (Health Connect, HealthKit bridge, ...).
#[async_trait]
pub trait HealthStore: Send + Sync + 'static {
    /// Whether the store is installed and usable on this device.
    async fn initialize(&self) -> Result<bool, VitalsError>;

    /// Request read access; returns the types actually granted.
    async fn request_permission(
        &self,
        types: &[RecordType],
    ) -> Result<Vec<RecordType>, VitalsError>;

    async fn read_records(
        &self,
        record_type: RecordType,
        filter: &TimeRangeFilter,
    ) -> Result<Vec<RawRecord>, VitalsError>;
}

/// Dataset served when real data cannot be read.
pub trait FallbackSource: Send + Sync + 'static {
    fn dataset(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> RawHealthDataset;
}

/// Fixed demo data placed relative to the end of the requested window.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticDataset;

impl FallbackSource for SyntheticDataset {
    fn dataset(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> RawHealthDataset {
        let hours_ago = |h: f64| end - Duration::minutes((h * 60.0) as i64);
        let heart = |from: DateTime<Utc>, to: DateTime<Utc>, bpm: u32| {
            RawRecord::new(from, Some(to))
                .with("samples", json!([{ "time": from, "beatsPerMinute": bpm }]))
        };
        let weigh_in = end - Duration::days(3);

        [
            (
                RecordType::Steps,
                vec![RawRecord::new(start, Some(end)).with("count", json!(8500))],
            ),
            (
                RecordType::HeartRate,
                vec![
                    heart(start, end, 72),
                    heart(hours_ago(2.0), hours_ago(1.5), 68),
                ],
            ),
            (
                RecordType::ActiveCaloriesBurned,
                vec![
                    RawRecord::new(start, Some(end))
                        .with("energy", json!({ "inKilocalories": 450 })),
                ],
            ),
            (
                RecordType::SleepSession,
                vec![RawRecord::new(hours_ago(10.0), Some(hours_ago(2.0)))],
            ),
            (
                RecordType::Weight,
                vec![
                    RawRecord::new(weigh_in, Some(weigh_in))
                        .with("weight", json!({ "inKilograms": 70.5 })),
                ],
            ),
        ]
        .into_iter()
        .collect()
    }
}

pub struct DeviceHealthReader {
    store: Option<Arc<dyn HealthStore>>,
    fallback: Option<Arc<dyn FallbackSource>>,
    initialized: AtomicBool,
    permissions_granted: AtomicBool,
}

impl DeviceHealthReader {
    /// Reader over `store` (or none, on platforms without one) with the synthetic fallback.
    pub fn new(store: Option<Arc<dyn HealthStore>>) -> Self {
        Self {
            store,
            fallback: Some(Arc::new(SyntheticDataset)),
            initialized: AtomicBool::new(false),
            permissions_granted: AtomicBool::new(false),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Fail with `PermissionDenied` instead of serving a fallback dataset.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn is_available(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn permissions_granted(&self) -> bool {
        self.permissions_granted.load(Ordering::SeqCst)
    }

    /// Probe the store. A missing store or an initialization error counts as unavailable.
    pub async fn initialize(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let ready = match store.initialize().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "health store initialization failed");
                false
            }
        };
        self.initialized.store(ready, Ordering::SeqCst);
        ready
    }

    /// Ask for read access to the whole catalog; granted when any type is granted.
    pub async fn request_permissions(&self) -> bool {
        if !self.is_available() && !self.initialize().await {
            info!("health store not available; fallback data will be used");
            self.permissions_granted.store(false, Ordering::SeqCst);
            return false;
        }
        let Some(store) = &self.store else {
            return false;
        };
        let granted = match store.request_permission(&RecordType::ALL).await {
            Ok(types) => {
                debug!(granted = types.len(), "health permissions resolved");
                !types.is_empty()
            }
            Err(e) => {
                warn!(error = %e, "health permission request failed");
                false
            }
        };
        self.permissions_granted.store(granted, Ordering::SeqCst);
        granted
    }

    pub async fn fetch(&self, range: TimeRange) -> Result<RawHealthDataset, VitalsError> {
        let (start, end) = range.window_ending(Utc::now());
        self.fetch_between(start, end).await
    }

    /// Read every catalog type in `[start, end]`. Types that fail or return
    /// nothing are left out of the dataset.
    pub async fn fetch_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawHealthDataset, VitalsError> {
        let store = match (&self.store, self.permissions_granted()) {
            (Some(store), true) => store,
            _ => {
                let fallback = self.fallback.as_ref().ok_or(VitalsError::PermissionDenied)?;
                debug!("serving fallback health dataset");
                return Ok(fallback.dataset(start, end));
            }
        };

        let filter = TimeRangeFilter::between(start, end);
        let mut dataset = RawHealthDataset::new();
        for record_type in RecordType::ALL {
            match store.read_records(record_type, &filter).await {
                Ok(records) => dataset.insert(record_type, records),
                Err(e) => warn!(%record_type, error = %e, "failed to read health records"),
            }
        }
        debug!(types = dataset.len(), "health dataset read");
        Ok(dataset)
    }
}
