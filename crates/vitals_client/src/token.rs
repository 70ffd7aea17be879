//! Wearable OAuth credentials: persistence, proactive refresh and revocation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::VitalsError;
use crate::observability;

pub const FITBIT_AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";
pub const FITBIT_TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";
pub const FITBIT_REVOKE_URL: &str = "https://api.fitbit.com/oauth2/revoke";

pub const FITBIT_SCOPES: &[&str] = &[
    "activity",
    "heartrate",
    "location",
    "nutrition",
    "profile",
    "settings",
    "sleep",
    "social",
    "weight",
    "temperature",
    "respiratory_rate",
    "oxygen_saturation",
];

/// Tokens within this many seconds of expiry are refreshed before use.
pub const EXPIRY_SKEW_SECS: i64 = 60;

fn expiry_skew() -> Duration {
    Duration::seconds(EXPIRY_SKEW_SECS)
}

/// Persisted wearable credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default, alias = "expiresAt")]
    pub access_token_expiration_date: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// A record without an expiration date is treated as expired.
    pub fn expires_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        match self.access_token_expiration_date {
            Some(exp) => now + skew >= exp,
            None => true,
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_token_expiration_date", &self.access_token_expiration_date)
            .finish()
    }
}

/// Key-value persistence for the single credential record.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    async fn get(&self) -> Result<Option<TokenRecord>, VitalsError>;
    async fn set(&self, record: &TokenRecord) -> Result<(), VitalsError>;
    async fn clear(&self) -> Result<(), VitalsError>;
}

/// JSON file store; survives process restarts.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn storage_err(e: std::io::Error) -> VitalsError {
    VitalsError::Storage(e.to_string())
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self) -> Result<Option<TokenRecord>, VitalsError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn set(&self, record: &TokenRecord) -> Result<(), VitalsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        // write-then-rename so a crash never leaves a truncated record behind
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(record)?)
            .await
            .map_err(storage_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(storage_err)
    }

    async fn clear(&self) -> Result<(), VitalsError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }
}

/// In-memory store for tests and hosts without a writable filesystem.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            inner: RwLock::new(Some(record)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<TokenRecord>, VitalsError> {
        Ok(self.inner.read().await.clone())
    }

    async fn set(&self, record: &TokenRecord) -> Result<(), VitalsError> {
        *self.inner.write().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), VitalsError> {
        *self.inner.write().await = None;
        Ok(())
    }
}

/// OAuth client registration and endpoints. Fitbit does not support PKCE.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
}

impl OAuthConfig {
    pub fn fitbit(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_url: String::new(),
            authorize_url: FITBIT_AUTHORIZE_URL.into(),
            token_url: FITBIT_TOKEN_URL.into(),
            revoke_url: FITBIT_REVOKE_URL.into(),
            scopes: FITBIT_SCOPES.iter().map(|s| s.to_string()).collect(),
            use_pkce: false,
        }
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret.expose_secret());
        format!("Basic {}", STANDARD.encode(raw))
    }

    /// Exchange an authorization code for tokens (authorization-code grant, no PKCE).
    pub async fn exchange_code(
        &self,
        client: &reqwest::Client,
        code: &str,
    ) -> Result<TokenRecord, VitalsError> {
        let resp = client
            .post(&self.token_url)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth_header())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VitalsError::Authorization(format!(
                "code exchange failed with status {}: {}",
                status.as_u16(),
                body.chars().take(256).collect::<String>()
            )));
        }
        let tokens: TokenResponse = resp.json().await?;
        Ok(tokens.into_record(None))
    }

    /// Authorization-code request handed to the interactive authorizer.
    pub fn authorization_request(&self, options: AuthorizeOptions) -> AuthorizationRequest {
        let mut additional_parameters = Vec::new();
        if options.force_login {
            additional_parameters.push(("prompt".to_string(), "login".to_string()));
        }
        AuthorizationRequest {
            authorize_url: self.authorize_url.clone(),
            client_id: self.client_id.clone(),
            redirect_url: self.redirect_url.clone(),
            scopes: self.scopes.clone(),
            use_pkce: self.use_pkce,
            additional_parameters,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeOptions {
    #[serde(default)]
    pub force_login: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationRequest {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
    pub additional_parameters: Vec<(String, String)>,
}

impl AuthorizationRequest {
    /// Browser URL for the authorization-code flow.
    pub fn url(&self, state: &str) -> Result<reqwest::Url, VitalsError> {
        let mut url = reqwest::Url::parse(&self.authorize_url)
            .map_err(|e| VitalsError::Config(format!("invalid authorize url: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_url)
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state);
            for (k, v) in &self.additional_parameters {
                q.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Interactive authorization (browser redirect and code exchange), supplied by the host.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, request: AuthorizationRequest) -> Result<TokenRecord, VitalsError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    /// Normalize into a record; fields the server omitted keep their `previous` value.
    fn into_record(self, previous: Option<TokenRecord>) -> TokenRecord {
        let previous = previous.unwrap_or_else(|| TokenRecord {
            access_token: String::new(),
            refresh_token: None,
            token_type: None,
            scope: None,
            id_token: None,
            access_token_expiration_date: None,
        });
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous.refresh_token),
            token_type: self.token_type.or(previous.token_type),
            scope: self.scope.or(previous.scope),
            id_token: self.id_token.or(previous.id_token),
            access_token_expiration_date: Some(Utc::now() + Duration::seconds(self.expires_in)),
        }
    }
}

/// Hands out valid access tokens, refreshing them when they are about to expire.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    oauth: OAuthConfig,
    authorizer: Option<Arc<dyn Authorizer>>,
    client: reqwest::Client,
    // one refresh at a time: Fitbit rotates refresh tokens on every use
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, oauth: OAuthConfig) -> Self {
        Self {
            store,
            oauth,
            authorizer: None,
            client: reqwest::Client::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    pub async fn tokens(&self) -> Result<Option<TokenRecord>, VitalsError> {
        self.store.get().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.store.get().await, Ok(Some(_)))
    }

    /// Run the interactive flow and persist the resulting credentials.
    pub async fn authorize(&self, options: AuthorizeOptions) -> Result<TokenRecord, VitalsError> {
        let authorizer = self
            .authorizer
            .as_ref()
            .ok_or_else(|| VitalsError::Authorization("no authorizer configured".into()))?;
        let record = authorizer
            .authorize(self.oauth.authorization_request(options))
            .await?;
        // an in-flight refresh must not overwrite the new grant
        let _guard = self.refresh_lock.lock().await;
        self.store.set(&record).await?;
        info!(force_login = options.force_login, "wearable account connected");
        Ok(record)
    }

    /// Return an access token that is valid for at least [`EXPIRY_SKEW_SECS`].
    pub async fn ensure_access_token(&self) -> Result<SecretString, VitalsError> {
        let current = self.store.get().await?.ok_or(VitalsError::NotConnected)?;
        if !current.expires_within(expiry_skew(), Utc::now()) {
            return Ok(SecretString::new(current.access_token.into()));
        }

        let _guard = self.refresh_lock.lock().await;
        // another caller may have refreshed while we waited
        let current = self.store.get().await?.ok_or(VitalsError::NotConnected)?;
        if !current.expires_within(expiry_skew(), Utc::now()) {
            return Ok(SecretString::new(current.access_token.into()));
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!("access token expired without refresh token; clearing credentials");
            self.store.clear().await?;
            return Err(VitalsError::SessionExpired);
        };

        let merged = self.refresh(current.clone(), &refresh_token).await?;
        match self.store.get().await? {
            Some(stored) if stored == current => {}
            Some(stored) if !stored.expires_within(expiry_skew(), Utc::now()) => {
                debug!("credentials replaced during refresh; using the stored grant");
                return Ok(SecretString::new(stored.access_token.into()));
            }
            Some(_) => return Err(VitalsError::SessionExpired),
            None => return Err(VitalsError::NotConnected),
        }
        self.store.set(&merged).await?;
        Ok(SecretString::new(merged.access_token.into()))
    }

    async fn refresh(
        &self,
        current: TokenRecord,
        refresh_token: &str,
    ) -> Result<TokenRecord, VitalsError> {
        debug!("refreshing wearable access token");
        metrics::counter!(observability::TOKEN_REFRESH_TOTAL).increment(1);
        let resp = self
            .client
            .post(&self.oauth.token_url)
            .header(reqwest::header::AUTHORIZATION, self.oauth.basic_auth_header())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // invalid_grant: the refresh token was revoked or already used
            if matches!(status.as_u16(), 400 | 401) {
                warn!(status = status.as_u16(), "token refresh rejected; clearing credentials");
                if self.store.get().await?.as_ref() == Some(&current) {
                    self.store.clear().await?;
                }
                return Err(VitalsError::SessionExpired);
            }
            return Err(VitalsError::from_status(status.as_u16(), body));
        }

        let next: TokenResponse = resp.json().await?;
        info!(expires_in = next.expires_in, "wearable access token refreshed");
        Ok(next.into_record(Some(current)))
    }

    /// Revoke both tokens remotely (best effort) and forget them locally.
    pub async fn disconnect(&self) -> Result<(), VitalsError> {
        // waits out a refresh so the rotated tokens are the ones revoked
        let _guard = self.refresh_lock.lock().await;
        let current = match self.store.get().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "could not read stored credentials before revoking");
                None
            }
        };
        if let Some(record) = current {
            self.revoke(&record.access_token, "access").await;
            if let Some(refresh) = record.refresh_token.as_deref() {
                self.revoke(refresh, "refresh").await;
            }
        }
        self.store.clear().await?;
        info!("wearable account disconnected");
        Ok(())
    }

    async fn revoke(&self, token: &str, kind: &'static str) {
        let result = self
            .client
            .post(&self.oauth.revoke_url)
            .header(reqwest::header::AUTHORIZATION, self.oauth.basic_auth_header())
            .form(&[("token", token)])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => debug!(kind, "token revoked"),
            Ok(resp) => warn!(kind, status = resp.status().as_u16(), "token revocation rejected"),
            Err(e) => warn!(kind, error = %e, "token revocation failed"),
        }
    }
}
