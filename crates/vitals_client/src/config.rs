use std::path::PathBuf;
use std::time::Duration;

use crate::VitalsError;
use crate::http_client::FITBIT_API_BASE;
use crate::records::TimeRange;
use crate::token::OAuthConfig;
use secrecy::SecretString;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TOKEN_PATH: &str = ".vitals/fitbit_tokens.json";

#[derive(Clone, Debug)]
pub struct Config {
    pub sync_url: String,
    pub sync_interval: Duration,
    pub sync_window: TimeRange,
    pub fitbit: OAuthConfig,
    pub fitbit_api_base: String,
    pub token_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, VitalsError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function, so tests never touch the process environment.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, VitalsError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let sync_url = get("VITALS_SYNC_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| VitalsError::Config("VITALS_SYNC_URL missing".into()))?;
        reqwest::Url::parse(&sync_url)
            .map_err(|e| VitalsError::Config(format!("VITALS_SYNC_URL invalid: {e}")))?;

        let sync_interval = match get("VITALS_SYNC_INTERVAL_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(VitalsError::Config(format!(
                        "VITALS_SYNC_INTERVAL_SECS must be a positive integer, got {raw:?}"
                    )));
                }
            },
            None => Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        };

        let sync_window = match get("VITALS_SYNC_WINDOW") {
            Some(raw) => raw
                .parse::<TimeRange>()
                .map_err(|_| VitalsError::Config(format!("VITALS_SYNC_WINDOW invalid: {raw:?}")))?,
            None => TimeRange::default(),
        };

        let client_id = get("VITALS_FITBIT_CLIENT_ID").unwrap_or_default();
        let client_secret = get("VITALS_FITBIT_CLIENT_SECRET").unwrap_or_default();
        let mut fitbit = OAuthConfig::fitbit(client_id, SecretString::new(client_secret.into()));
        if let Some(redirect) = get("VITALS_FITBIT_REDIRECT_URL") {
            fitbit.redirect_url = redirect;
        }
        if let Some(url) = get("VITALS_FITBIT_AUTHORIZE_URL") {
            fitbit.authorize_url = url;
        }
        if let Some(url) = get("VITALS_FITBIT_TOKEN_URL") {
            fitbit.token_url = url;
        }
        if let Some(url) = get("VITALS_FITBIT_REVOKE_URL") {
            fitbit.revoke_url = url;
        }

        let fitbit_api_base = get("VITALS_FITBIT_API_BASE").unwrap_or_else(|| FITBIT_API_BASE.into());
        let token_path = get("VITALS_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH));

        Ok(Self {
            sync_url,
            sync_interval,
            sync_window,
            fitbit,
            fitbit_api_base,
            token_path,
        })
    }

    /// Whether a Fitbit client id was provided; without one the wearable stays disconnected.
    pub fn wearable_enabled(&self) -> bool {
        !self.fitbit.client_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl FnMut(&str) -> Option<String> + 'a {
        move |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn from_env_missing_sync_url() {
        let res = Config::from_env_with(env(&[("VITALS_FITBIT_CLIENT_ID", "abc")]));
        assert!(matches!(res, Err(VitalsError::Config(_))));
    }

    #[test]
    fn from_env_applies_defaults() {
        let cfg = Config::from_env_with(env(&[("VITALS_SYNC_URL", "http://localhost:8080/sync")]))
            .expect("cfg");
        assert_eq!(cfg.sync_interval, Duration::from_secs(10));
        assert_eq!(cfg.sync_window, TimeRange::Day);
        assert_eq!(cfg.fitbit_api_base, "https://api.fitbit.com");
        assert_eq!(cfg.token_path, PathBuf::from(".vitals/fitbit_tokens.json"));
        assert!(!cfg.wearable_enabled());
    }

    #[test]
    fn from_env_reads_values() {
        let cfg = Config::from_env_with(env(&[
            ("VITALS_SYNC_URL", "https://sync.example.com/api/health"),
            ("VITALS_SYNC_INTERVAL_SECS", "30"),
            ("VITALS_SYNC_WINDOW", "7d"),
            ("VITALS_FITBIT_CLIENT_ID", "23ABCD"),
            ("VITALS_FITBIT_CLIENT_SECRET", "shh"),
            ("VITALS_FITBIT_TOKEN_URL", "http://127.0.0.1:9000/oauth2/token"),
            ("VITALS_TOKEN_PATH", "/tmp/tokens.json"),
        ]))
        .expect("cfg");
        assert_eq!(cfg.sync_interval, Duration::from_secs(30));
        assert_eq!(cfg.sync_window, TimeRange::Week);
        assert_eq!(cfg.fitbit.client_id, "23ABCD");
        assert_eq!(cfg.fitbit.token_url, "http://127.0.0.1:9000/oauth2/token");
        assert_eq!(cfg.fitbit.revoke_url, crate::token::FITBIT_REVOKE_URL);
        assert!(cfg.wearable_enabled());
    }

    #[test]
    fn from_env_rejects_bad_numbers_and_ranges() {
        let bad_interval = Config::from_env_with(env(&[
            ("VITALS_SYNC_URL", "http://localhost/sync"),
            ("VITALS_SYNC_INTERVAL_SECS", "0"),
        ]));
        assert!(matches!(bad_interval, Err(VitalsError::Config(_))));

        let bad_window = Config::from_env_with(env(&[
            ("VITALS_SYNC_URL", "http://localhost/sync"),
            ("VITALS_SYNC_WINDOW", "1y"),
        ]));
        assert!(matches!(bad_window, Err(VitalsError::Config(_))));
    }
}
