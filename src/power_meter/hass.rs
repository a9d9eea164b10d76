use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{PowerMeasurement, PowerMeter};
use crate::config::HassSettings;
use crate::error::{MeasureError, Result};
use crate::home_assistant::HomeAssistantAPI;

/// Reads power from a Home Assistant sensor entity
pub struct HassPowerMeter {
    api: HomeAssistantAPI,
    entity_id: String,
    call_update_entity: bool,
}

impl HassPowerMeter {
    pub fn new(settings: &HassSettings, entity_id: String) -> Result<Self> {
        Ok(Self {
            api: HomeAssistantAPI::new(settings)?,
            entity_id,
            call_update_entity: settings.call_update_entity_service,
        })
    }
}

#[async_trait]
impl PowerMeter for HassPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        if self.call_update_entity {
            self.api
                .call_service(
                    "homeassistant",
                    "update_entity",
                    json!({ "entity_id": self.entity_id }),
                )
                .await?;
        }

        let state = self.api.read_state(&self.entity_id).await?;
        let power = state.state.parse::<f64>().map_err(|e| {
            MeasureError::device(
                "Home Assistant",
                format!(
                    "failed to parse sensor {} value '{}': {}",
                    self.entity_id, state.state, e
                ),
            )
        })?;
        debug!(
            "HA power {}W for {} (updated {})",
            power, self.entity_id, state.last_updated
        );

        Ok(PowerMeasurement {
            power,
            updated: state.last_updated,
        })
    }

    fn name(&self) -> &'static str {
        "Home Assistant"
    }
}
