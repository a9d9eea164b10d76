use async_trait::async_trait;
use serde_derive::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{LightCommand, LightController, LightInfo, DEFAULT_MAX_MIRED, DEFAULT_MIN_MIRED};
use crate::config::HueSettings;
use crate::error::{MeasureError, Result};
use crate::power_meter::http_base_url;
use crate::variation::Variation;

const DEVICE_TYPE: &str = "light_measure#cli";
const LINK_BUTTON_NOT_PRESSED: u64 = 101;
const MAX_HUE_BRIGHTNESS: u32 = 254;
const USERNAME_FILE: &str = ".persistent/hue_username";

/// Drives a light through the Hue bridge local API (v1)
pub struct HueLightController {
    bridge_url: String,
    light_id: String,
    username: Option<String>,
    username_file: PathBuf,
    client: reqwest::Client,
}

impl HueLightController {
    pub fn new(settings: &HueSettings, light_id: String) -> Result<Self> {
        Self::with_username_file(settings, light_id, PathBuf::from(USERNAME_FILE))
    }

    pub fn with_username_file(
        settings: &HueSettings,
        light_id: String,
        username_file: PathBuf,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            bridge_url: http_base_url(&settings.bridge_ip),
            light_id,
            username: settings.username.clone(),
            username_file,
            client,
        })
    }

    /// Returns the API username, registering with the bridge when none is known yet
    async fn username(&mut self) -> Result<String> {
        if let Some(username) = &self.username {
            return Ok(username.clone());
        }
        if let Some(username) = read_persisted_username(&self.username_file)? {
            self.username = Some(username.clone());
            return Ok(username);
        }

        info!("Registering with Hue bridge at {}", self.bridge_url);
        let response: Vec<HueResponse> = self
            .client
            .post(format!("{}/api", self.bridge_url))
            .json(&json!({ "devicetype": DEVICE_TYPE }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let username = parse_registration(&response)?;

        if let Some(parent) = self.username_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.username_file, &username)?;
        info!(
            "Registered with Hue bridge, username stored in {}",
            self.username_file.display()
        );
        self.username = Some(username.clone());
        Ok(username)
    }

    async fn light_url(&mut self) -> Result<String> {
        let username = self.username().await?;
        Ok(format!(
            "{}/api/{}/lights/{}",
            self.bridge_url, username, self.light_id
        ))
    }
}

fn read_persisted_username(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string()).filter(|u| !u.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_registration(response: &[HueResponse]) -> Result<String> {
    for entry in response {
        if let Some(success) = &entry.success {
            if let Some(username) = success.get("username").and_then(Value::as_str) {
                return Ok(username.to_string());
            }
        }
        if let Some(error) = &entry.error {
            if error.error_type == LINK_BUTTON_NOT_PRESSED {
                return Err(MeasureError::HueLinkButtonNotPressed);
            }
            return Err(MeasureError::device("Hue", error.description.clone()));
        }
    }
    Err(MeasureError::device("Hue", "unexpected registration response"))
}

/// Body for `PUT /lights/{id}/state`
fn state_body(command: &LightCommand) -> Value {
    match *command {
        LightCommand::Off => json!({ "on": false }),
        LightCommand::On(variation) => {
            let bri = variation.bri().min(MAX_HUE_BRIGHTNESS);
            match variation {
                Variation::Brightness { .. } => json!({ "on": true, "bri": bri }),
                Variation::ColorTemp { mired, .. } => json!({ "on": true, "bri": bri, "ct": mired }),
                Variation::Hs { hue, sat, .. } => {
                    json!({ "on": true, "bri": bri, "hue": hue, "sat": sat })
                }
            }
        }
    }
}

#[async_trait]
impl LightController for HueLightController {
    async fn change_light_state(&mut self, command: &LightCommand) -> Result<()> {
        let url = format!("{}/state", self.light_url().await?);
        let body = state_body(command);
        debug!("Hue PUT {url} {body}");
        let response: Vec<HueResponse> = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.iter().find_map(|r| r.error.as_ref()) {
            return Err(MeasureError::device("Hue", error.description.clone()));
        }
        Ok(())
    }

    async fn get_light_info(&mut self) -> Result<LightInfo> {
        let url = self.light_url().await?;
        let light: Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // The bridge answers 200 with an error list for unknown lights
        if let Some(description) = light
            .get(0)
            .and_then(|entry| entry.pointer("/error/description"))
            .and_then(Value::as_str)
        {
            return Err(MeasureError::device("Hue", description));
        }
        let ct = light.pointer("/capabilities/control/ct");
        let bound = |name: &str, default: u32| {
            ct.and_then(|ct| ct.get(name))
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(default)
        };
        Ok(LightInfo {
            min_mired: bound("min", DEFAULT_MIN_MIRED),
            max_mired: bound("max", DEFAULT_MAX_MIRED),
        })
    }
}

#[derive(Debug, Deserialize)]
struct HueResponse {
    #[serde(default)]
    success: Option<Value>,
    #[serde(default)]
    error: Option<HueError>,
}

#[derive(Debug, Deserialize)]
struct HueError {
    #[serde(rename = "type")]
    error_type: u64,
    #[serde(default)]
    description: String,
}
