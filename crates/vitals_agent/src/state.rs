//! Shared state wired from configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{Mutex, mpsc};
use vitals_client::config::Config;
use vitals_client::device::{DeviceHealthReader, HealthStore};
use vitals_client::http_client::ReqwestWearableClient;
use vitals_client::session::SessionContext;
use vitals_client::sync::{HttpSyncSink, LifecycleEvent, SyncScheduler, SyncSink};
use vitals_client::token::{
    AuthorizationRequest, Authorizer, FileTokenStore, OAuthConfig, TokenManager, TokenRecord,
};
use vitals_client::{TimeRange, VitalsError, WearableClient};

/// Authorizer fed by the host: the app runs the browser consent screen and
/// posts the resulting authorization code, which is exchanged here.
pub struct PendingGrantAuthorizer {
    oauth: OAuthConfig,
    client: reqwest::Client,
    pending: Mutex<Option<String>>,
    // state nonce of the last consent URL handed out
    issued_state: Mutex<Option<String>>,
}

impl PendingGrantAuthorizer {
    pub fn new(oauth: OAuthConfig) -> Self {
        Self {
            oauth,
            client: reqwest::Client::new(),
            pending: Mutex::new(None),
            issued_state: Mutex::new(None),
        }
    }

    pub async fn offer(&self, code: impl Into<String>) {
        *self.pending.lock().await = Some(code.into());
    }

    /// Mint the `state` nonce for a new consent URL, replacing any earlier one.
    pub async fn issue_state(&self) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        *self.issued_state.lock().await = Some(nonce.clone());
        nonce
    }

    /// Consume the issued nonce. Fails when none is pending or `state` differs;
    /// either way the nonce cannot be replayed.
    pub async fn verify_state(&self, state: &str) -> Result<(), VitalsError> {
        match self.issued_state.lock().await.take() {
            Some(expected) if expected == state => Ok(()),
            Some(_) => Err(VitalsError::Authorization("authorization state mismatch".into())),
            None => Err(VitalsError::Authorization(
                "no authorization in progress; request a consent URL first".into(),
            )),
        }
    }
}

#[async_trait]
impl Authorizer for PendingGrantAuthorizer {
    async fn authorize(&self, request: AuthorizationRequest) -> Result<TokenRecord, VitalsError> {
        let code = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| VitalsError::Authorization("no authorization code supplied".into()))?;
        tracing::debug!(
            forced = request
                .additional_parameters
                .iter()
                .any(|(k, v)| k == "prompt" && v == "login"),
            "exchanging authorization code"
        );
        self.oauth.exchange_code(&self.client, &code).await
    }
}

/// Everything the agent needs, before the scheduler is assembled.
pub struct AgentComponents {
    pub session: SessionContext,
    pub device: Arc<DeviceHealthReader>,
    pub tokens: Arc<TokenManager>,
    pub grants: Arc<PendingGrantAuthorizer>,
    pub wearable: Arc<dyn WearableClient>,
    pub sink: Arc<dyn SyncSink>,
    pub sync_interval: Duration,
    pub sync_window: TimeRange,
}

impl AgentComponents {
    /// Production wiring. `store` is the platform health store, if the host has one.
    pub fn from_config(config: &Config, store: Option<Arc<dyn HealthStore>>) -> Self {
        let grants = Arc::new(PendingGrantAuthorizer::new(config.fitbit.clone()));
        let tokens = Arc::new(
            TokenManager::new(
                Arc::new(FileTokenStore::new(config.token_path.clone())),
                config.fitbit.clone(),
            )
            .with_authorizer(grants.clone()),
        );
        let wearable = Arc::new(ReqwestWearableClient::new(
            &config.fitbit_api_base,
            tokens.clone(),
        ));
        Self {
            session: SessionContext::new(),
            device: Arc::new(DeviceHealthReader::new(store)),
            tokens,
            grants,
            wearable,
            sink: Arc::new(HttpSyncSink::new(config.sync_url.clone())),
            sync_interval: config.sync_interval,
            sync_window: config.sync_window,
        }
    }
}

pub struct AgentState {
    pub session: SessionContext,
    pub device: Arc<DeviceHealthReader>,
    pub tokens: Arc<TokenManager>,
    pub grants: Arc<PendingGrantAuthorizer>,
    pub wearable: Arc<dyn WearableClient>,
    pub scheduler: SyncScheduler,
    pub lifecycle: mpsc::Sender<LifecycleEvent>,
    pub metrics: Option<PrometheusHandle>,
    pub(crate) connect_lock: Mutex<()>,
}

impl AgentState {
    /// Assemble the state; the returned receiver must be handed to [`SyncScheduler::run`].
    pub fn new(
        components: AgentComponents,
        metrics: Option<PrometheusHandle>,
    ) -> Result<(Self, mpsc::Receiver<LifecycleEvent>), VitalsError> {
        let (lifecycle, events) = mpsc::channel(16);
        let scheduler = SyncScheduler::new(
            components.session.clone(),
            components.device.clone(),
            components.wearable.clone(),
            components.sink,
        )
        .with_interval(components.sync_interval)?
        .with_window(components.sync_window);

        let state = Self {
            session: components.session,
            device: components.device,
            tokens: components.tokens,
            grants: components.grants,
            wearable: components.wearable,
            scheduler,
            lifecycle,
            metrics,
            connect_lock: Mutex::new(()),
        };
        Ok((state, events))
    }
}
