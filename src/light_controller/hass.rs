use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{LightCommand, LightController, LightInfo, DEFAULT_MAX_MIRED, DEFAULT_MIN_MIRED};
use crate::config::HassSettings;
use crate::error::Result;
use crate::home_assistant::HomeAssistantAPI;
use crate::variation::{Variation, MAX_HUE};

/// Drives a light entity through Home Assistant light services
pub struct HassLightController {
    api: HomeAssistantAPI,
    entity_id: String,
}

impl HassLightController {
    pub fn new(settings: &HassSettings, entity_id: String) -> Result<Self> {
        Ok(Self {
            api: HomeAssistantAPI::new(settings)?,
            entity_id,
        })
    }
}

/// Service data for `light.turn_on`; hue and saturation go out in degrees and percent
fn turn_on_data(entity_id: &str, variation: &Variation) -> Value {
    match *variation {
        Variation::Brightness { bri } => json!({
            "entity_id": entity_id,
            "brightness": bri,
        }),
        Variation::ColorTemp { bri, mired } => json!({
            "entity_id": entity_id,
            "brightness": bri,
            "color_temp": mired,
        }),
        Variation::Hs { bri, hue, sat } => {
            let hue_degrees = hue as f64 / MAX_HUE as f64 * 360.0;
            let sat_percent = sat as f64 / 255.0 * 100.0;
            json!({
                "entity_id": entity_id,
                "brightness": bri,
                "hs_color": [round2(hue_degrees), round2(sat_percent)],
            })
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
impl LightController for HassLightController {
    async fn change_light_state(&mut self, command: &LightCommand) -> Result<()> {
        debug!("Setting {} to {:?}", self.entity_id, command);
        match command {
            LightCommand::Off => {
                self.api
                    .call_service("light", "turn_off", json!({ "entity_id": self.entity_id }))
                    .await
            }
            LightCommand::On(variation) => {
                self.api
                    .call_service("light", "turn_on", turn_on_data(&self.entity_id, variation))
                    .await
            }
        }
    }

    async fn get_light_info(&mut self) -> Result<LightInfo> {
        let state = self.api.read_state(&self.entity_id).await?;
        let attribute = |name: &str, default: u32| {
            state
                .attributes
                .get(name)
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(default)
        };
        Ok(LightInfo {
            min_mired: attribute("min_mireds", DEFAULT_MIN_MIRED),
            max_mired: attribute("max_mireds", DEFAULT_MAX_MIRED),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn controller(url: String) -> HassLightController {
        HassLightController::new(
            &HassSettings {
                url,
                token: "token".into(),
                call_update_entity_service: false,
            },
            "light.desk".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_hs_conversion() {
        let data = turn_on_data(
            "light.desk",
            &Variation::Hs {
                bri: 10,
                hue: 65535,
                sat: 255,
            },
        );
        assert_eq!(data["hs_color"], json!([360.0, 100.0]));
        assert_eq!(data["brightness"], 10);

        let data = turn_on_data("light.desk", &Variation::Hs { bri: 1, hue: 1, sat: 1 });
        assert_eq!(data["hs_color"], json!([0.01, 0.39]));
    }

    #[test]
    fn test_color_temp_data() {
        let data = turn_on_data("light.desk", &Variation::ColorTemp { bri: 20, mired: 300 });
        assert_eq!(
            data,
            json!({"entity_id": "light.desk", "brightness": 20, "color_temp": 300})
        );
    }

    #[tokio::test]
    async fn test_turn_on_and_off() {
        let mut server = mockito::Server::new_async().await;
        let on = server
            .mock("POST", "/api/services/light/turn_on")
            .match_body(Matcher::Json(
                json!({"entity_id": "light.desk", "brightness": 128}),
            ))
            .with_body("[]")
            .create_async()
            .await;
        let off = server
            .mock("POST", "/api/services/light/turn_off")
            .match_body(Matcher::Json(json!({"entity_id": "light.desk"})))
            .with_body("[]")
            .create_async()
            .await;

        let mut controller = controller(server.url());
        controller
            .change_light_state(&LightCommand::On(Variation::Brightness { bri: 128 }))
            .await
            .unwrap();
        controller
            .change_light_state(&LightCommand::Off)
            .await
            .unwrap();

        on.assert_async().await;
        off.assert_async().await;
    }

    #[tokio::test]
    async fn test_light_info_from_attributes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/states/light.desk")
            .with_body(
                r#"{"entity_id":"light.desk","state":"on",
                    "attributes":{"min_mireds":153,"max_mireds":454},
                    "last_updated":"2024-01-01T00:00:00+00:00"}"#,
            )
            .create_async()
            .await;

        let info = controller(server.url()).get_light_info().await.unwrap();
        assert_eq!(
            info,
            LightInfo {
                min_mired: 153,
                max_mired: 454
            }
        );
    }

    #[tokio::test]
    async fn test_light_info_defaults() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/states/light.desk")
            .with_body(
                r#"{"entity_id":"light.desk","state":"off","attributes":{},
                    "last_updated":"2024-01-01T00:00:00+00:00"}"#,
            )
            .create_async()
            .await;

        let info = controller(server.url()).get_light_info().await.unwrap();
        assert_eq!(info, LightInfo::default());
    }
}
