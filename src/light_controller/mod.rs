use async_trait::async_trait;

use crate::config::{LightControllerKind, MeasureConfig};
use crate::error::{MeasureError, Result};
use crate::variation::Variation;
use crate::wizard::SetupAnswers;

pub mod hass;
pub mod hue;

pub use hass::HassLightController;
pub use hue::HueLightController;

pub const DEFAULT_MIN_MIRED: u32 = 153;
pub const DEFAULT_MAX_MIRED: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    Off,
    On(Variation),
}

/// Capabilities of the light under test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightInfo {
    pub min_mired: u32,
    pub max_mired: u32,
}

impl Default for LightInfo {
    fn default() -> Self {
        Self {
            min_mired: DEFAULT_MIN_MIRED,
            max_mired: DEFAULT_MAX_MIRED,
        }
    }
}

#[async_trait]
pub trait LightController: Send {
    async fn change_light_state(&mut self, command: &LightCommand) -> Result<()>;

    async fn get_light_info(&mut self) -> Result<LightInfo>;
}

/// Builds the controller selected by `LIGHT_CONTROLLER`
pub fn create_light_controller(
    config: &MeasureConfig,
    answers: &SetupAnswers,
) -> Result<Box<dyn LightController>> {
    let controller: Box<dyn LightController> = match config.light_controller {
        LightControllerKind::Hass => {
            let settings = config
                .hass
                .as_ref()
                .ok_or_else(|| MeasureError::config("HASS_URL", "not configured"))?;
            Box::new(HassLightController::new(settings, answers.light_id.clone())?)
        }
        LightControllerKind::Hue => {
            let settings = config
                .hue
                .as_ref()
                .ok_or_else(|| MeasureError::config("HUE_BRIDGE_IP", "not configured"))?;
            Box::new(HueLightController::new(settings, answers.light_id.clone())?)
        }
    };
    Ok(controller)
}
