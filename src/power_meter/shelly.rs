use async_trait::async_trait;
use serde_derive::Deserialize;
use tracing::{debug, info};

use super::{http_base_url, PowerMeasurement, PowerMeter};
use crate::config::ShellySettings;
use crate::error::{MeasureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellyGeneration {
    Gen1,
    Gen2,
}

/// Reads the power of a Shelly plug or relay over its local HTTP API.
/// Gen1 devices expose `/status`, Gen2+ devices expose the RPC API.
pub struct ShellyPowerMeter {
    base_url: String,
    client: reqwest::Client,
    generation: Option<ShellyGeneration>,
}

impl ShellyPowerMeter {
    pub fn new(settings: &ShellySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            base_url: http_base_url(&settings.ip),
            client,
            generation: None,
        })
    }

    async fn detect_generation(&mut self) -> Result<ShellyGeneration> {
        if let Some(generation) = self.generation {
            return Ok(generation);
        }
        let info: ShellyInfo = self
            .client
            .get(format!("{}/shelly", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let generation = match info.gen {
            Some(gen) if gen >= 2 => ShellyGeneration::Gen2,
            _ => ShellyGeneration::Gen1,
        };
        info!("Detected Shelly device generation {:?}", generation);
        self.generation = Some(generation);
        Ok(generation)
    }
}

#[async_trait]
impl PowerMeter for ShellyPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        let power = match self.detect_generation().await? {
            ShellyGeneration::Gen1 => {
                let status: Gen1Status = self
                    .client
                    .get(format!("{}/status", self.base_url))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                status
                    .meters
                    .first()
                    .map(|meter| meter.power)
                    .ok_or_else(|| MeasureError::device("Shelly", "status contains no meters"))?
            }
            ShellyGeneration::Gen2 => {
                let status: Gen2SwitchStatus = self
                    .client
                    .get(format!("{}/rpc/Switch.GetStatus?id=0", self.base_url))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                status.apower
            }
        };
        debug!("Shelly power {power}W");
        Ok(PowerMeasurement::now(power))
    }

    fn name(&self) -> &'static str {
        "Shelly"
    }
}

#[derive(Debug, Deserialize)]
struct ShellyInfo {
    #[serde(default)]
    gen: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct Gen1Status {
    #[serde(default)]
    meters: Vec<Gen1Meter>,
}

#[derive(Debug, Deserialize)]
struct Gen1Meter {
    power: f64,
}

#[derive(Debug, Deserialize)]
struct Gen2SwitchStatus {
    apower: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meter_for(url: String) -> ShellyPowerMeter {
        ShellyPowerMeter::new(&ShellySettings {
            ip: url,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_gen1_reads_first_meter() {
        let mut server = mockito::Server::new_async().await;
        let probe = server
            .mock("GET", "/shelly")
            .with_body(r#"{"type":"SHPLG-S","mac":"AABBCC","auth":false}"#)
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/status")
            .with_body(r#"{"meters":[{"power":42.5,"is_valid":true,"timestamp":0}]}"#)
            .expect(2)
            .create_async()
            .await;

        let mut meter = meter_for(server.url());
        assert_eq!(meter.get_power().await.unwrap().power, 42.5);
        // The generation probe is cached
        assert_eq!(meter.get_power().await.unwrap().power, 42.5);

        probe.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_gen2_reads_switch_status() {
        let mut server = mockito::Server::new_async().await;
        let _probe = server
            .mock("GET", "/shelly")
            .with_body(r#"{"id":"shellyplusplugs","gen":2}"#)
            .create_async()
            .await;
        let _status = server
            .mock("GET", "/rpc/Switch.GetStatus?id=0")
            .with_body(r#"{"id":0,"output":true,"apower":7.1,"voltage":230.2}"#)
            .create_async()
            .await;

        let mut meter = meter_for(server.url());
        assert_eq!(meter.get_power().await.unwrap().power, 7.1);
    }

    #[tokio::test]
    async fn test_gen1_without_meters_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _probe = server
            .mock("GET", "/shelly")
            .with_body(r#"{"type":"SHSW-1"}"#)
            .create_async()
            .await;
        let _status = server
            .mock("GET", "/status")
            .with_body(r#"{"relays":[]}"#)
            .create_async()
            .await;

        let mut meter = meter_for(server.url());
        assert!(matches!(
            meter.get_power().await,
            Err(MeasureError::Device { .. })
        ));
    }
}
