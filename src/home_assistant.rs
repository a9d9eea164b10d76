use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::HassSettings;
use crate::error::{MeasureError, Result};

/// Thin wrapper around the Home Assistant REST API
#[derive(Clone)]
pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HomeAssistantAPI {
    pub fn new(settings: &HassSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint_url: normalize_base_url(&settings.url),
            auth_token: settings.token.clone(),
            client,
        })
    }

    pub async fn read_state(&self, entity_id: &str) -> Result<HAState> {
        let url = format!("{}/api/states/{}", self.endpoint_url, entity_id);
        debug!("Reading Home Assistant state {url}");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(MeasureError::device(
                "Home Assistant",
                format!("entity {entity_id} not found"),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MeasureError::device(
                "Home Assistant",
                "authentication failed, check HASS_TOKEN",
            )),
            _ => Ok(response.error_for_status()?.json().await?),
        }
    }

    /// Calls `domain.service` with the given JSON body
    pub async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<()> {
        let url = format!("{}/api/services/{}/{}", self.endpoint_url, domain, service);
        debug!("Calling Home Assistant service {domain}.{service} with {data}");
        self.client
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(&data)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Accepts the URL with or without the trailing `/api` segment
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/api")
        .unwrap_or(trimmed)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HAState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    pub last_updated: DateTime<Utc>,
}
