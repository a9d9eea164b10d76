//! Power meter integrations.
//!
//! Every supported meter implements [`PowerMeter`]. The measurement loop only
//! ever talks to the trait object returned by [`create_power_meter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{MeasureConfig, PowerMeterKind};
use crate::error::{MeasureError, Result};
use crate::wizard::{SetupAnswers, TerminalPrompter};

pub mod hass;
pub mod kasa;
pub mod manual;
pub mod shelly;
pub mod tasmota;
pub mod tuya;

pub use hass::HassPowerMeter;
pub use kasa::KasaPowerMeter;
pub use manual::ManualPowerMeter;
pub use shelly::ShellyPowerMeter;
pub use tasmota::TasmotaPowerMeter;
pub use tuya::TuyaPowerMeter;

/// A single power reading and the moment the device produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerMeasurement {
    pub power: f64,
    pub updated: DateTime<Utc>,
}

impl PowerMeasurement {
    /// Reading taken right now, for meters that do not report a timestamp
    pub fn now(power: f64) -> Self {
        Self {
            power,
            updated: Utc::now(),
        }
    }
}

#[async_trait]
pub trait PowerMeter: Send {
    async fn get_power(&mut self) -> Result<PowerMeasurement>;

    /// Short device name used in log output
    fn name(&self) -> &'static str;
}

/// Builds the meter selected by `POWER_METER`
pub fn create_power_meter(
    config: &MeasureConfig,
    answers: &SetupAnswers,
) -> Result<Box<dyn PowerMeter>> {
    let meter: Box<dyn PowerMeter> = match config.power_meter {
        PowerMeterKind::Hass => {
            let settings = config
                .hass
                .as_ref()
                .ok_or_else(|| MeasureError::config("HASS_URL", "not configured"))?;
            let entity = answers.power_entity.clone().ok_or_else(|| {
                MeasureError::config("SELECTED_POWER_ENTITY", "no power sensor selected")
            })?;
            Box::new(HassPowerMeter::new(settings, entity)?)
        }
        PowerMeterKind::Shelly => {
            let settings = config
                .shelly
                .as_ref()
                .ok_or_else(|| MeasureError::config("SHELLY_IP", "not configured"))?;
            Box::new(ShellyPowerMeter::new(settings)?)
        }
        PowerMeterKind::Tuya => {
            let settings = config
                .tuya
                .as_ref()
                .ok_or_else(|| MeasureError::config("TUYA_DEVICE_ID", "not configured"))?;
            Box::new(TuyaPowerMeter::new(settings)?)
        }
        PowerMeterKind::Kasa => {
            let ip = config
                .kasa_device_ip
                .as_ref()
                .ok_or_else(|| MeasureError::config("KASA_DEVICE_IP", "not configured"))?;
            Box::new(KasaPowerMeter::new(ip))
        }
        PowerMeterKind::Tasmota => {
            let ip = config
                .tasmota_device_ip
                .as_ref()
                .ok_or_else(|| MeasureError::config("TASMOTA_DEVICE_IP", "not configured"))?;
            Box::new(TasmotaPowerMeter::new(ip)?)
        }
        PowerMeterKind::Manual => Box::new(ManualPowerMeter::new(Box::new(TerminalPrompter))),
    };
    Ok(meter)
}

/// Turns a bare host into an http URL, leaving full URLs untouched
pub(crate) fn http_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Appends a default port to hosts that lack one
pub(crate) fn socket_target(host: &str, default_port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:{default_port}")
    }
}
