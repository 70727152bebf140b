//! Analytics event ingestion with pluggable providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::AnalyticsConfig;

/// A tracked analytics event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
}

/// Several events submitted in one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsEventBatch {
    #[serde(default)]
    pub events: Vec<AnalyticsEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("analytics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("analytics provider rejected event with status {0}")]
    Rejected(u16),
}

/// A destination for analytics events.
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    async fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Logs events through `tracing`; always enabled.
#[derive(Debug, Default)]
pub struct ConsoleProvider;

#[async_trait]
impl AnalyticsProvider for ConsoleProvider {
    fn name(&self) -> &'static str {
        "console"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        tracing::debug!(
            event = %event.name,
            category = event.category.as_deref().unwrap_or(""),
            session = event.session_id.as_deref().unwrap_or(""),
            properties = ?event.properties,
            "Analytics event"
        );
        Ok(())
    }
}

/// Google Analytics 4 via the Measurement Protocol.
#[derive(Debug, Clone)]
pub struct GoogleAnalyticsProvider {
    measurement_id: String,
    api_secret: String,
    endpoint: String,
    http: reqwest::Client,
}

impl GoogleAnalyticsProvider {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(
        measurement_id: impl Into<String>,
        api_secret: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            endpoint: endpoint.into(),
            http: http_client(Self::DEFAULT_TIMEOUT),
        }
    }

    /// Bound every collect request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(timeout);
        self
    }

    /// Measurement Protocol payload for one event.
    fn payload(event: &AnalyticsEvent) -> Value {
        let mut params = Map::new();
        for (key, value) in &event.properties {
            params.insert(key.clone(), value.clone());
        }
        if let Some(category) = &event.category {
            params.insert("event_category".into(), json!(category));
        }
        if let Some(label) = &event.label {
            params.insert("event_label".into(), json!(label));
        }
        if let Some(value) = event.value {
            params.insert("value".into(), json!(value));
        }
        if let Some(session_id) = &event.session_id {
            params.insert("session_id".into(), json!(session_id));
        }

        let mut body = json!({
            "client_id": event.session_id.as_deref().unwrap_or("anonymous"),
            "events": [{ "name": event.name, "params": params }],
        });
        if let Some(user_id) = &event.user_id {
            body["user_id"] = json!(user_id);
        }
        if let Some(ts) = event.timestamp {
            body["timestamp_micros"] = json!(ts.timestamp_micros());
        }
        body
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default analytics HTTP client");
            reqwest::Client::new()
        })
}

#[async_trait]
impl AnalyticsProvider for GoogleAnalyticsProvider {
    fn name(&self) -> &'static str {
        "google_analytics"
    }

    fn is_enabled(&self) -> bool {
        !self.measurement_id.is_empty() && !self.api_secret.is_empty()
    }

    async fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[
                ("measurement_id", self.measurement_id.as_str()),
                ("api_secret", self.api_secret.as_str()),
            ])
            .json(&Self::payload(event))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnalyticsError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fans events out to every enabled provider.
#[derive(Clone)]
pub struct AnalyticsService {
    providers: Vec<Arc<dyn AnalyticsProvider>>,
}

impl AnalyticsService {
    pub fn new(providers: Vec<Arc<dyn AnalyticsProvider>>) -> Self {
        Self { providers }
    }

    /// Build the provider list from configuration. The console provider is always present.
    pub fn from_config(cfg: &AnalyticsConfig) -> Self {
        let mut providers: Vec<Arc<dyn AnalyticsProvider>> = vec![Arc::new(ConsoleProvider)];

        let measurement_id = cfg.google_measurement_id.as_deref().unwrap_or("");
        if !measurement_id.is_empty() {
            let api_secret = cfg.google_api_secret.as_deref().unwrap_or("");
            let ga = GoogleAnalyticsProvider::new(measurement_id, api_secret, &cfg.google_endpoint)
                .with_timeout(cfg.timeout());
            if ga.is_enabled() {
                tracing::info!(measurement_id = %measurement_id, "Google Analytics configured");
            } else {
                tracing::warn!("Google Analytics measurement id set without api secret; provider disabled");
            }
            providers.push(Arc::new(ga));
        }

        Self::new(providers)
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Stamp a missing timestamp and hand the event to each enabled provider.
    ///
    /// Provider failures are logged; tracking itself never fails.
    pub async fn track_event(&self, mut event: AnalyticsEvent) {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        for provider in self.providers.iter().filter(|p| p.is_enabled()) {
            if let Err(e) = provider.track(&event).await {
                tracing::error!(
                    error = %e,
                    provider = provider.name(),
                    event = %event.name,
                    "Failed to track event"
                );
            }
        }
    }

    /// Track a batch on a background task; the caller never waits on providers.
    pub fn dispatch(&self, events: Vec<AnalyticsEvent>) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            for event in events {
                service.track_event(event).await;
            }
        })
    }

    pub async fn track_page_view(
        &self,
        path: &str,
        referrer: &str,
        user_agent: &str,
        session_id: &str,
    ) {
        let properties = HashMap::from([
            ("path".to_string(), json!(path)),
            ("referrer".to_string(), json!(referrer)),
            ("user_agent".to_string(), json!(user_agent)),
        ]);
        self.track_event(AnalyticsEvent {
            name: "page_view".into(),
            category: Some("navigation".into()),
            session_id: Some(session_id.to_string()).filter(|s| !s.is_empty()),
            properties,
            ..AnalyticsEvent::default()
        })
        .await;
    }
}
