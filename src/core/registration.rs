use crate::domain::model::PendingProvisionEvent;
use crate::domain::ports::DeviceRegistrar;
use crate::utils::error::{Result, RouterError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    result: RegistrationResult,
}

#[derive(Debug, Deserialize)]
struct RegistrationResult {
    success: i64,
}

/// Reports device bindings to `base_url + username` as a form POST.
#[derive(Debug, Clone)]
pub struct HttpRegistrationNotifier {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRegistrationNotifier {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// `base_url` with the username appended as a single encoded path segment.
    fn user_url(&self, username: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| RouterError::ConfigError {
            message: format!("invalid registration URL '{}': {}", self.base_url, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| RouterError::ConfigError {
                message: format!("registration URL '{}' cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .push(username);
        Ok(url)
    }

    fn failed(event: &PendingProvisionEvent, reason: String) -> RouterError {
        RouterError::RegistrationNotifyFailed {
            username: event.username.clone(),
            reason,
        }
    }
}

#[async_trait]
impl DeviceRegistrar for HttpRegistrationNotifier {
    async fn notify(&self, event: &PendingProvisionEvent) -> Result<()> {
        let url = self
            .user_url(&event.username)
            .map_err(|e| Self::failed(event, e.to_string()))?;
        let form = [
            ("device_type", event.device_type.as_str()),
            ("device_id", event.device_id.as_str()),
            ("device_name", event.device_name.as_str()),
            ("active_sync_host", event.resolved_host.as_str()),
        ];

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| Self::failed(event, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::failed(
                event,
                format!("registration API returned status {}", status.as_u16()),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::failed(event, format!("failed to read response: {}", e)))?;
        let parsed: RegistrationResponse = serde_json::from_slice(&body)
            .map_err(|e| Self::failed(event, format!("failed to decode response: {}", e)))?;

        if parsed.result.success != 1 {
            return Err(Self::failed(
                event,
                format!("registration API reported success={}", parsed.result.success),
            ));
        }

        tracing::debug!(
            username = %event.username,
            device_id = %event.device_id,
            host = %event.resolved_host,
            "device registration reported"
        );
        Ok(())
    }
}
