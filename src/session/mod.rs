//! Session helpers for event pages
//!
//! Looks up a session's id by its title in the page's event bundle and
//! fetches the session's video duration from the static-videos endpoint.

mod format;

pub use format::format_duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::utils::SessionError;
use crate::utils::constants::DEFAULT_DURATION_ENDPOINT;

/// Session endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL; requests go to `{endpoint}/{event_uuid}/{session_id}`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Language key of the duration payload
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_endpoint() -> String {
    DEFAULT_DURATION_ENDPOINT.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            language: default_language(),
        }
    }
}

/// Event data a page exposes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBundle {
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub sessions_previews: Option<Vec<SessionPreview>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPreview {
    pub uuid: String,

    #[serde(default)]
    pub title: Option<LocalizedTitle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalizedTitle {
    #[serde(default)]
    pub en: Option<String>,

    #[serde(default)]
    pub base: Option<String>,
}

impl SessionPreview {
    /// English title, else the base title, else empty
    pub fn display_title(&self) -> &str {
        self.title
            .as_ref()
            .and_then(|t| t.en.as_deref().or(t.base.as_deref()))
            .unwrap_or("")
    }
}

/// Id of the session whose title is exactly `title`
pub fn uuid_by_title<'a>(bundle: &'a EventBundle, title: &str) -> Option<&'a str> {
    let Some(previews) = bundle.sessions_previews.as_ref() else {
        warn!("uuid_by_title: sessionsPreviews not available");
        return None;
    };

    previews
        .iter()
        .find(|preview| preview.display_title() == title)
        .map(|preview| preview.uuid.as_str())
}

/// `payload[language].duration_ms`
pub fn duration_from_payload(payload: &Value, language: &str) -> Option<f64> {
    payload.get(language)?.get("duration_ms")?.as_f64()
}

/// Client for the session static-videos endpoint
#[derive(Debug, Clone)]
pub struct DurationClient {
    http: reqwest::Client,
    config: SessionConfig,
    event_uuid: Option<String>,
}

impl DurationClient {
    pub fn new(config: SessionConfig, event_uuid: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            event_uuid,
        }
    }

    /// Client for the event described by `bundle`
    pub fn for_bundle(config: SessionConfig, bundle: &EventBundle) -> Self {
        Self::new(config, bundle.uuid.clone())
    }

    pub fn session_url(&self, session_id: &str) -> Result<String, SessionError> {
        let event_uuid = self
            .event_uuid
            .as_deref()
            .ok_or(SessionError::MissingBundleField("uuid"))?;
        Ok(format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            event_uuid,
            session_id
        ))
    }

    /// Raw duration in milliseconds; `Ok(None)` when the payload has none
    pub async fn fetch_duration_ms(&self, session_id: &str) -> Result<Option<f64>, SessionError> {
        let url = self.session_url(session_id)?;
        debug!("Fetching session duration from {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::BadStatus {
                status: status.as_u16(),
                url,
            });
        }

        let payload: Value = response.json().await?;
        Ok(duration_from_payload(&payload, &self.config.language))
    }

    /// Formatted duration, or `None` on any failure (failures are logged)
    pub async fn duration_label(&self, session_id: &str) -> Option<String> {
        if session_id.is_empty() {
            return None;
        }

        match self.fetch_duration_ms(session_id).await {
            Ok(Some(ms)) => format_duration(ms),
            Ok(None) => None,
            Err(SessionError::MissingBundleField(field)) => {
                warn!("duration_label: event bundle {} not available", field);
                None
            }
            Err(e) => {
                error!("duration_label error: {}", e);
                None
            }
        }
    }

    pub async fn duration_label_by_title(&self, bundle: &EventBundle, title: &str) -> Option<String> {
        let Some(session_id) = uuid_by_title(bundle, title) else {
            warn!("duration_label_by_title: session not found for title {:?}", title);
            return None;
        };
        self.duration_label(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> EventBundle {
        serde_json::from_value(json!({
            "uuid": "evt-1",
            "sessionsPreviews": [
                { "uuid": "s-1", "title": { "en": "Keynote", "base": "Ouverture" } },
                { "uuid": "s-2", "title": { "base": "Workshop" } },
                { "uuid": "s-3" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_uuid_by_title_prefers_english() {
        let bundle = bundle();
        assert_eq!(uuid_by_title(&bundle, "Keynote"), Some("s-1"));
        assert_eq!(uuid_by_title(&bundle, "Ouverture"), None);
        assert_eq!(uuid_by_title(&bundle, "Workshop"), Some("s-2"));
        assert_eq!(uuid_by_title(&bundle, ""), Some("s-3"));
        assert_eq!(uuid_by_title(&bundle, "Missing"), None);
    }

    #[test]
    fn test_uuid_by_title_without_previews() {
        let bundle = EventBundle::default();
        assert_eq!(uuid_by_title(&bundle, "Keynote"), None);
    }

    #[test]
    fn test_duration_from_payload() {
        let payload = json!({ "en": { "duration_ms": 3661000 }, "fr": {} });
        assert_eq!(duration_from_payload(&payload, "en"), Some(3_661_000.0));
        assert_eq!(duration_from_payload(&payload, "fr"), None);
        assert_eq!(duration_from_payload(&payload, "de"), None);
    }

    #[test]
    fn test_session_url() {
        let config = SessionConfig {
            endpoint: "https://example.test/videos/".to_string(),
            ..SessionConfig::default()
        };
        let client = DurationClient::for_bundle(config.clone(), &bundle());
        assert_eq!(
            client.session_url("s-1").unwrap(),
            "https://example.test/videos/evt-1/s-1"
        );

        let orphan = DurationClient::new(config, None);
        assert!(matches!(
            orphan.session_url("s-1"),
            Err(SessionError::MissingBundleField("uuid"))
        ));
    }

    #[tokio::test]
    async fn test_label_short_circuits_without_network() {
        let client = DurationClient::new(SessionConfig::default(), None);
        assert_eq!(client.duration_label("").await, None);
        // Missing event uuid fails before any request is made
        assert_eq!(client.duration_label("s-1").await, None);
        assert_eq!(
            client
                .duration_label_by_title(&EventBundle::default(), "Keynote")
                .await,
            None
        );
    }
}
