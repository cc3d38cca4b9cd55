//! WebhookNotifier - HTTP POST of a JSON alert message

use std::collections::HashMap;
use std::time::Duration;

use contracts::{AlertEvent, ContractError, NotifyError, Notifier};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::AlertMessage;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Notifier that posts each alert to a URL
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, ContractError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContractError::config_validation("url", e.to_string()))?;
        Ok(Self {
            name,
            url: url.into(),
            client,
        })
    }

    /// Params: `url` (required), `timeout_ms` (optional)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let url = params
            .get("url")
            .ok_or_else(|| ContractError::config_validation("url", "missing 'url' parameter"))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ContractError::config_validation(
                "url",
                format!("unsupported url '{url}'"),
            ));
        }
        let timeout_ms = params
            .get("timeout_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self::new(name, url.clone(), Duration::from_millis(timeout_ms))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, status: StatusCode) -> NotifyError {
        let message = format!("webhook returned {status}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            NotifyError::transient(&self.name, message)
        } else {
            NotifyError::permanent(&self.name, message)
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "webhook_notifier_send",
        skip(self, event),
        fields(notifier = %self.name, sequence = %event.sequence())
    )]
    async fn send(&mut self, event: &AlertEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AlertMessage::from_event(event))
            .send()
            .await
            .map_err(|e| NotifyError::transient(&self.name, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(notifier = %self.name, %status, "alert posted");
            Ok(())
        } else {
            Err(self.classify(status))
        }
    }

    async fn close(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_params_requires_url() {
        assert!(WebhookNotifier::from_params("w", &params(&[])).is_err());
        assert!(WebhookNotifier::from_params("w", &params(&[("url", "ftp://x")])).is_err());
        let n = WebhookNotifier::from_params("w", &params(&[("url", "http://127.0.0.1:9/hook")]))
            .unwrap();
        assert_eq!(n.url(), "http://127.0.0.1:9/hook");
    }

    #[test]
    fn test_status_classification() {
        let n = WebhookNotifier::from_params("w", &params(&[("url", "http://localhost/")])).unwrap();
        assert!(n.classify(StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(n.classify(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!n.classify(StatusCode::BAD_REQUEST).is_transient());
        assert!(!n.classify(StatusCode::NOT_FOUND).is_transient());
    }
}
