use async_trait::async_trait;
use serde_derive::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{http_base_url, PowerMeasurement, PowerMeter};
use crate::error::Result;

/// Reads the energy sensor of a Tasmota flashed plug via `Status 8`
pub struct TasmotaPowerMeter {
    base_url: String,
    client: reqwest::Client,
}

impl TasmotaPowerMeter {
    pub fn new(device_ip: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: http_base_url(device_ip),
            client,
        })
    }
}

#[async_trait]
impl PowerMeter for TasmotaPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        let status: TasmotaStatus = self
            .client
            .get(format!("{}/cm?cmnd=Status%208", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let power = status.status_sns.energy.power;
        debug!("Tasmota power {power}W");
        Ok(PowerMeasurement::now(power))
    }

    fn name(&self) -> &'static str {
        "Tasmota"
    }
}

#[derive(Debug, Deserialize)]
struct TasmotaStatus {
    #[serde(rename = "StatusSNS")]
    status_sns: StatusSns,
}

#[derive(Debug, Deserialize)]
struct StatusSns {
    #[serde(rename = "ENERGY")]
    energy: Energy,
}

#[derive(Debug, Deserialize)]
struct Energy {
    #[serde(rename = "Power")]
    power: f64,
}
