use async_trait::async_trait;
use tracing::warn;

use super::{PowerMeasurement, PowerMeter};
use crate::error::{MeasureError, Result};
use crate::wizard::Prompter;

const MAX_ATTEMPTS: u32 = 3;

/// Asks the operator to read the wattage off an external meter
pub struct ManualPowerMeter {
    prompter: Box<dyn Prompter>,
}

impl ManualPowerMeter {
    pub fn new(prompter: Box<dyn Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl PowerMeter for ManualPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        let mut attempt = 1;
        loop {
            let raw = self.prompter.input("Power reading in watts", None)?;
            match raw.trim().replace(',', ".").parse::<f64>() {
                Ok(power) if power >= 0.0 => return Ok(PowerMeasurement::now(power)),
                _ if attempt < MAX_ATTEMPTS => {
                    warn!("'{}' is not a valid wattage, try again", raw.trim());
                    attempt += 1;
                }
                _ => {
                    return Err(MeasureError::Prompt(format!(
                        "'{}' is not a valid wattage",
                        raw.trim()
                    )))
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "Manual"
    }
}
