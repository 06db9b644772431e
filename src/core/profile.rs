use crate::domain::model::{ProfileLookupResult, ProfileOutcome};
use crate::domain::ports::ProfileDirectory;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ProfileRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    #[allow(dead_code)]
    full_name: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    email: Option<String>,
    activesync_enabled: bool,
    #[serde(default)]
    activesync_host: Option<String>,
}

impl From<ProfileResponse> for ProfileLookupResult {
    fn from(response: ProfileResponse) -> Self {
        Self {
            enabled: response.activesync_enabled,
            dedicated_host: response.activesync_host,
        }
    }
}

/// Profile directory backed by the external profile HTTP API.
///
/// One POST per lookup, bounded by `timeout`, never retried and never cached.
#[derive(Debug, Clone)]
pub struct HttpProfileResolver {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpProfileResolver {
    pub fn new(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProfileDirectory for HttpProfileResolver {
    async fn resolve(&self, username: &str) -> ProfileOutcome {
        tracing::debug!(username, endpoint = %self.endpoint, "looking up profile");

        let response = match self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ProfileRequest { email: username })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ProfileOutcome::Unavailable(format!("profile API request failed: {}", e))
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ProfileOutcome::Unavailable(format!(
                "profile API returned status {}",
                status.as_u16()
            ));
        }

        // A timeout while streaming the body is still a transport failure.
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return ProfileOutcome::Unavailable(format!(
                    "failed to read profile API response: {}",
                    e
                ))
            }
        };

        match serde_json::from_slice::<ProfileResponse>(&body) {
            Ok(parsed) => ProfileOutcome::from(ProfileLookupResult::from(parsed)),
            Err(e) => {
                ProfileOutcome::Malformed(format!("failed to decode profile API response: {}", e))
            }
        }
    }
}
