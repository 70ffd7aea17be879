//! Lifecycle-driven upload of health data to the sync server.
//!
//! [`SyncScheduler::run`] consumes [`LifecycleEvent`]s and moves between two
//! states. While `Active` a timer task fires one sync attempt per period (the
//! first one immediately); going to the background cancels the timer but lets an
//! attempt that already started finish on its own task. Overlapping attempts are
//! skipped rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_SYNC_INTERVAL_SECS;
use crate::device::DeviceHealthReader;
use crate::observability;
use crate::records::{RawHealthDataset, TimeRange};
use crate::session::SessionContext;
use crate::{VitalsError, WearableClient, WearableVitals};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Foreground,
    Background,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Active,
    Suspended,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Delivered,
    SkippedNoSession,
    SkippedInFlight,
    Failed(VitalsError),
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Delivered => "delivered",
            SyncOutcome::SkippedNoSession => "skipped_no_session",
            SyncOutcome::SkippedInFlight => "skipped_in_flight",
            SyncOutcome::Failed(_) => "failed",
        }
    }
}

/// Body posted to the sync server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub user_id: String,
    pub email: String,
    pub data: RawHealthDataset,
    pub fitbit_metrics: WearableVitals,
}

/// Destination of sync payloads.
#[async_trait]
pub trait SyncSink: Send + Sync + 'static {
    async fn deliver(&self, payload: &SyncPayload, bearer: &SecretString) -> Result<(), VitalsError>;
}

/// Posts payloads as JSON to a fixed URL.
#[derive(Clone)]
pub struct HttpSyncSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSyncSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl SyncSink for HttpSyncSink {
    async fn deliver(&self, payload: &SyncPayload, bearer: &SecretString) -> Result<(), VitalsError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(bearer.expose_secret())
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(());
        }

        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned));
        warn!(
            status = status.as_u16(),
            message = message.as_deref().unwrap_or(""),
            "sync server rejected payload"
        );
        Err(VitalsError::from_status(status.as_u16(), body))
    }
}

struct SyncWorker {
    session: SessionContext,
    device: Arc<DeviceHealthReader>,
    wearable: Arc<dyn WearableClient>,
    sink: Arc<dyn SyncSink>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncWorker {
    async fn sync_once(&self, window: TimeRange) -> SyncOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("previous sync still running; skipping");
            metrics::counter!(observability::SYNC_SKIPPED_TOTAL, "reason" => "in_flight").increment(1);
            return SyncOutcome::SkippedInFlight;
        }
        let _in_flight = InFlight(&self.in_flight);

        let Some(session) = self.session.current().await else {
            metrics::counter!(observability::SYNC_SKIPPED_TOTAL, "reason" => "no_session").increment(1);
            return SyncOutcome::SkippedNoSession;
        };

        let attempt = Uuid::new_v4();
        metrics::counter!(observability::SYNC_ATTEMPTS_TOTAL).increment(1);
        debug!(%attempt, user_id = %session.user_id, "sync attempt started");

        let data = match self.device.fetch(window).await {
            Ok(data) => data,
            Err(e) => return self.failed(attempt, e),
        };

        let fitbit_metrics = match self.wearable.fetch_bundle().await {
            Ok(bundle) => WearableVitals::from_metrics(&bundle),
            Err(VitalsError::NotConnected) => WearableVitals::default(),
            Err(e) => {
                warn!(%attempt, error = %e, "wearable fetch failed; sending without vitals");
                metrics::counter!(observability::WEARABLE_FAILURES_TOTAL).increment(1);
                WearableVitals::default()
            }
        };

        let bearer = match session.id_token().await {
            Ok(token) => token,
            Err(e) => return self.failed(attempt, e),
        };

        let payload = SyncPayload {
            user_id: session.user_id.clone(),
            email: session.email.clone(),
            data,
            fitbit_metrics,
        };
        match self.sink.deliver(&payload, &bearer).await {
            Ok(()) => {
                metrics::counter!(observability::SYNC_DELIVERED_TOTAL).increment(1);
                info!(%attempt, types = payload.data.len(), "health data synced");
                SyncOutcome::Delivered
            }
            Err(e) => self.failed(attempt, e),
        }
    }

    fn failed(&self, attempt: Uuid, error: VitalsError) -> SyncOutcome {
        metrics::counter!(observability::SYNC_FAILURES_TOTAL).increment(1);
        warn!(%attempt, error = %error, "sync attempt failed");
        SyncOutcome::Failed(error)
    }
}

#[derive(Clone)]
pub struct SyncScheduler {
    worker: Arc<SyncWorker>,
    period: Duration,
    window: TimeRange,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl SyncScheduler {
    pub fn new(
        session: SessionContext,
        device: Arc<DeviceHealthReader>,
        wearable: Arc<dyn WearableClient>,
        sink: Arc<dyn SyncSink>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Suspended);
        Self {
            worker: Arc::new(SyncWorker {
                session,
                device,
                wearable,
                sink,
                in_flight: AtomicBool::new(false),
            }),
            period: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            window: TimeRange::default(),
            state: Arc::new(state),
        }
    }

    /// Period between attempts while active. Zero is rejected.
    pub fn with_interval(mut self, period: Duration) -> Result<Self, VitalsError> {
        if period.is_zero() {
            return Err(VitalsError::InvalidInput(
                "sync interval must be greater than zero".into(),
            ));
        }
        self.period = period;
        Ok(self)
    }

    /// Trailing window read on each attempt. Clones made earlier keep their own.
    pub fn with_window(mut self, window: TimeRange) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> TimeRange {
        self.window
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run one attempt now, on the caller's task.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.worker.sync_once(self.window).await
    }

    /// Drive the state machine until the event channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<LifecycleEvent>) {
        let mut timer: Option<JoinHandle<()>> = None;

        while let Some(event) = events.recv().await {
            match (self.state(), event) {
                (SchedulerState::Suspended, LifecycleEvent::Foreground) => {
                    if let Some(previous) = timer.take() {
                        previous.abort();
                    }
                    timer = Some(self.spawn_timer());
                    self.state.send_replace(SchedulerState::Active);
                    info!(period_secs = self.period.as_secs(), "sync scheduler active");
                }
                (SchedulerState::Active, LifecycleEvent::Background) => {
                    if let Some(previous) = timer.take() {
                        previous.abort();
                    }
                    self.state.send_replace(SchedulerState::Suspended);
                    info!("sync scheduler suspended");
                }
                (state, event) => debug!(?state, ?event, "lifecycle event ignored"),
            }
        }

        if let Some(previous) = timer.take() {
            previous.abort();
        }
        self.state.send_replace(SchedulerState::Suspended);
        debug!("lifecycle channel closed; scheduler stopped");
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let worker = self.worker.clone();
        let window = self.window;
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let worker = worker.clone();
                // detached so suspending never cancels an upload halfway
                tokio::spawn(async move {
                    let outcome = worker.sync_once(window).await;
                    debug!(outcome = outcome.as_str(), "scheduled sync finished");
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WearableMetrics;
    use crate::session::{Session, StaticIdentityToken};
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(SyncPayload, String)>>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl RecordingSink {
        async fn count(&self) -> usize {
            self.delivered.lock().await.len()
        }
    }

    #[async_trait]
    impl SyncSink for RecordingSink {
        async fn deliver(&self, payload: &SyncPayload, bearer: &SecretString) -> Result<(), VitalsError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(VitalsError::from_status(500, r#"{"message":"boom"}"#));
            }
            self.delivered
                .lock()
                .await
                .push((payload.clone(), bearer.expose_secret().to_string()));
            Ok(())
        }
    }

    struct FakeWearable(Option<WearableMetrics>);

    #[async_trait]
    impl WearableClient for FakeWearable {
        async fn fetch_bundle(&self) -> Result<WearableMetrics, VitalsError> {
            self.0
                .clone()
                .ok_or_else(|| VitalsError::from_status(503, "unavailable"))
        }
    }

    fn vitals_bundle() -> WearableMetrics {
        WearableMetrics {
            skin_temperature: json!({"value": 33.1}),
            breathing_rate: json!({"value": {"breathingRate": 14.6}}),
            oxygen_saturation: json!({"value": {"avg": 96.2}}),
            ..Default::default()
        }
    }

    async fn scheduler(
        sink: Arc<RecordingSink>,
        wearable: Option<WearableMetrics>,
        signed_in: bool,
    ) -> SyncScheduler {
        let session = SessionContext::new();
        if signed_in {
            let identity = Arc::new(StaticIdentityToken::new("firebase-id-token"));
            session
                .sign_in(Session::new("user-1", "alice@example.com", identity).unwrap())
                .await;
        }
        SyncScheduler::new(
            session,
            Arc::new(DeviceHealthReader::new(None)),
            Arc::new(FakeWearable(wearable)),
            sink,
        )
    }

    #[tokio::test]
    async fn sync_now_posts_payload_with_bearer() {
        let sink = Arc::new(RecordingSink::default());
        let s = scheduler(sink.clone(), Some(vitals_bundle()), true).await;

        assert!(matches!(s.sync_now().await, SyncOutcome::Delivered));

        let delivered = sink.delivered.lock().await;
        let (payload, bearer) = &delivered[0];
        assert_eq!(bearer, "firebase-id-token");
        assert_eq!(payload.user_id, "user-1");
        assert_eq!(payload.email, "alice@example.com");
        assert!(payload.data.records(crate::RecordType::Steps).is_some());
        assert_eq!(payload.fitbit_metrics.skin_temperature.as_deref(), Some("33.1"));
        assert_eq!(payload.fitbit_metrics.breathing_rate.as_deref(), Some("14.6"));
        assert_eq!(payload.fitbit_metrics.oxygen_saturation.as_deref(), Some("96.2"));
    }

    #[tokio::test]
    async fn no_session_skips_silently() {
        let sink = Arc::new(RecordingSink::default());
        let s = scheduler(sink.clone(), None, false).await;
        assert!(matches!(s.sync_now().await, SyncOutcome::SkippedNoSession));
        assert_eq!(sink.count().await, 0);
    }

    #[tokio::test]
    async fn wearable_failure_sends_null_vitals() {
        let sink = Arc::new(RecordingSink::default());
        let s = scheduler(sink.clone(), None, true).await;
        assert!(matches!(s.sync_now().await, SyncOutcome::Delivered));

        let delivered = sink.delivered.lock().await;
        let body = serde_json::to_value(&delivered[0].0).unwrap();
        assert_eq!(
            body["fitbitMetrics"],
            json!({"skinTemperature": null, "breathingRate": null, "oxygenSaturation": null})
        );
    }

    #[tokio::test]
    async fn sink_failure_is_reported() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let s = scheduler(sink, None, true).await;
        match s.sync_now().await {
            SyncOutcome::Failed(VitalsError::Upstream { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_attempt_is_skipped() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let s = scheduler(sink.clone(), None, true).await;

        let (first, second) = tokio::join!(s.sync_now(), s.sync_now());
        assert!(matches!(first, SyncOutcome::Delivered));
        assert!(matches!(second, SyncOutcome::SkippedInFlight));

        // flag is released once the first attempt completes
        assert!(matches!(s.sync_now().await, SyncOutcome::Delivered));
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_syncs_immediately_then_periodically_until_background() {
        let sink = Arc::new(RecordingSink::default());
        let s = scheduler(sink.clone(), Some(vitals_bundle()), true)
            .await
            .with_interval(Duration::from_secs(10))
            .unwrap();
        let (tx, rx) = mpsc::channel(8);
        let runner = {
            let s = s.clone();
            tokio::spawn(async move { s.run(rx).await })
        };

        tx.send(LifecycleEvent::Foreground).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(s.state(), SchedulerState::Active);
        assert_eq!(sink.count().await, 1);

        // a repeated foreground event must not start a second timer
        tx.send(LifecycleEvent::Foreground).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.count().await, 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.count().await, 3);

        tx.send(LifecycleEvent::Background).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(s.state(), SchedulerState::Suspended);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.count().await, 3);

        tx.send(LifecycleEvent::Foreground).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.count().await, 4);

        drop(tx);
        runner.await.unwrap();
        assert_eq!(s.state(), SchedulerState::Suspended);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.count().await, 4);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let s = scheduler(Arc::new(RecordingSink::default()), None, true).await;
        match s.with_interval(Duration::ZERO) {
            Err(VitalsError::InvalidInput(msg)) => assert!(msg.contains("interval")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("zero interval accepted"),
        }
    }

    /// Fallback that remembers the span of every window it was asked for.
    #[derive(Default)]
    struct WindowSpy(std::sync::Mutex<Vec<chrono::Duration>>);

    impl crate::device::FallbackSource for WindowSpy {
        fn dataset(
            &self,
            start: chrono::DateTime<chrono::Utc>,
            end: chrono::DateTime<chrono::Utc>,
        ) -> RawHealthDataset {
            self.0.lock().unwrap().push(end - start);
            RawHealthDataset::new()
        }
    }

    #[tokio::test]
    async fn window_applies_even_after_scheduler_was_cloned() {
        let spy = Arc::new(WindowSpy::default());
        let session = SessionContext::new();
        let identity = Arc::new(StaticIdentityToken::new("firebase-id-token"));
        session
            .sign_in(Session::new("user-1", "alice@example.com", identity).unwrap())
            .await;
        let base = SyncScheduler::new(
            session,
            Arc::new(DeviceHealthReader::new(None).with_fallback(spy.clone())),
            Arc::new(FakeWearable(None)),
            Arc::new(RecordingSink::default()),
        );
        let shared = base.clone();
        let weekly = base.with_window(TimeRange::Week);
        assert_eq!(weekly.window(), TimeRange::Week);
        assert_eq!(shared.window(), TimeRange::Day);

        assert!(matches!(weekly.sync_now().await, SyncOutcome::Delivered));
        assert!(matches!(shared.sync_now().await, SyncOutcome::Delivered));
        assert_eq!(
            *spy.0.lock().unwrap(),
            vec![chrono::Duration::days(7), chrono::Duration::hours(24)]
        );
    }

    #[test]
    fn lifecycle_event_parses_lowercase() {
        let e: LifecycleEvent = serde_json::from_value(json!("background")).unwrap();
        assert_eq!(e, LifecycleEvent::Background);
        assert_eq!(serde_json::to_value(SchedulerState::Active).unwrap(), json!("active"));
    }
}
