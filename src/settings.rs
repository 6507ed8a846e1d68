use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const BASE_URL_ENV: &str = "CHAT_API_BASE_URL";
pub const TYPING_PAUSE_ENV: &str = "CHAT_TYPING_PAUSE_MS";
pub const REQUEST_TIMEOUT_ENV: &str = "CHAT_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8186";
pub const DEFAULT_TYPING_PAUSE_MS: u64 = 15;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid base url {value:?}: {source}")]
    BaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base url must use http or https, got {0:?}")]
    Scheme(String),
    #[error("invalid value for {var}: {value:?}")]
    Number { var: &'static str, value: String },
}

/// One layer of client settings. Every field is optional so layers can be
/// stacked: CLI flags over environment over built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SettingsLayer {
    pub base_url: Option<String>,
    pub typing_pause_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl SettingsLayer {
    pub fn defaults() -> Self {
        Self {
            base_url: Some(DEFAULT_BASE_URL.into()),
            typing_pause_ms: Some(DEFAULT_TYPING_PAUSE_MS),
            request_timeout_secs: None,
        }
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the environment layer from an arbitrary lookup so tests do not
    /// have to touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            base_url: non_empty(BASE_URL_ENV),
            typing_pause_ms: non_empty(TYPING_PAUSE_ENV)
                .map(|v| parse_number(TYPING_PAUSE_ENV, &v))
                .transpose()?,
            request_timeout_secs: non_empty(REQUEST_TIMEOUT_ENV)
                .map(|v| parse_number(REQUEST_TIMEOUT_ENV, &v))
                .transpose()?,
        })
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::Number {
        var,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: Url,
    pub typing_pause: Duration,
    pub request_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url parses"),
            typing_pause: Duration::from_millis(DEFAULT_TYPING_PAUSE_MS),
            request_timeout: None,
        }
    }
}

pub fn resolve_client_settings(
    defaults: &SettingsLayer,
    env: &SettingsLayer,
    cli: &SettingsLayer,
) -> Result<ClientSettings, SettingsError> {
    let base_url = cli
        .base_url
        .clone()
        .or_else(|| env.base_url.clone())
        .or_else(|| defaults.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.into());

    let typing_pause_ms = cli
        .typing_pause_ms
        .or(env.typing_pause_ms)
        .or(defaults.typing_pause_ms)
        .unwrap_or(DEFAULT_TYPING_PAUSE_MS);

    let request_timeout_secs = cli
        .request_timeout_secs
        .or(env.request_timeout_secs)
        .or(defaults.request_timeout_secs);

    Ok(ClientSettings {
        base_url: parse_base_url(&base_url)?,
        typing_pause: Duration::from_millis(typing_pause_ms),
        request_timeout: request_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs),
    })
}

fn parse_base_url(raw: &str) -> Result<Url, SettingsError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|source| SettingsError::BaseUrl {
        value: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SettingsError::Scheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_cli_over_env_over_defaults() {
        let defaults = SettingsLayer::defaults();
        let env = SettingsLayer {
            base_url: Some("http://env-host:9000".into()),
            typing_pause_ms: Some(40),
            request_timeout_secs: Some(30),
        };
        let cli = SettingsLayer {
            base_url: Some("https://cli-host/".into()),
            typing_pause_ms: None,
            request_timeout_secs: None,
        };

        let eff = resolve_client_settings(&defaults, &env, &cli).unwrap();

        assert_eq!(eff.base_url.as_str(), "https://cli-host/"); // from cli
        assert_eq!(eff.typing_pause, Duration::from_millis(40)); // from env
        assert_eq!(eff.request_timeout, Some(Duration::from_secs(30))); // from env
    }

    #[test]
    fn defaults_only() {
        let eff = resolve_client_settings(
            &SettingsLayer::defaults(),
            &SettingsLayer::default(),
            &SettingsLayer::default(),
        )
        .unwrap();
        assert_eq!(eff, ClientSettings::default());
        assert_eq!(eff.base_url.host_str(), Some("localhost"));
        assert_eq!(eff.base_url.port(), Some(8186));
        assert!(eff.request_timeout.is_none());
    }

    #[test]
    fn env_layer_reads_lookup_and_ignores_blank_values() {
        let env = SettingsLayer::from_lookup(|key| match key {
            BASE_URL_ENV => Some("   ".into()),
            TYPING_PAUSE_ENV => Some("0".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(env.base_url, None);
        assert_eq!(env.typing_pause_ms, Some(0));
        assert_eq!(env.request_timeout_secs, None);
    }

    #[test]
    fn rejects_bad_numbers_and_schemes() {
        let err = SettingsLayer::from_lookup(|key| {
            (key == REQUEST_TIMEOUT_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SettingsError::Number { var: REQUEST_TIMEOUT_ENV, .. }));

        let cli = SettingsLayer {
            base_url: Some("ftp://example.com".into()),
            ..Default::default()
        };
        let err = resolve_client_settings(&SettingsLayer::defaults(), &SettingsLayer::default(), &cli)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Scheme(s) if s == "ftp"));
    }
}
