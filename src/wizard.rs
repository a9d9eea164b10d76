//! Interactive setup.
//!
//! Each question can be answered up front through a `SELECTED_*` variable;
//! only the remaining ones are asked on the terminal.

use dialoguer::{Confirm, Input, Select};
use tracing::info;

use crate::config::{LightControllerKind, MeasureConfig, PowerMeterKind, PresetAnswers};
use crate::error::{MeasureError, Result};
use crate::variation::ColorMode;

pub const UNKNOWN_MODEL_ID: &str = "unknown";

/// Source of answers for questions that were not pre-answered
pub trait Prompter: Send {
    fn select(&mut self, prompt: &str, items: &[&str], default: usize) -> Result<usize>;
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;
}

/// Asks questions on the terminal
pub struct TerminalPrompter;

fn prompt_err(e: impl std::fmt::Display) -> MeasureError {
    MeasureError::Prompt(e.to_string())
}

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[&str], default: usize) -> Result<usize> {
        Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()
            .map_err(prompt_err)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(prompt_err)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(prompt);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        input.interact_text().map_err(prompt_err)
    }
}

/// Everything the measurement needs to know about the light under test
#[derive(Debug, Clone, PartialEq)]
pub struct SetupAnswers {
    pub light_id: String,
    pub power_entity: Option<String>,
    pub color_mode: ColorMode,
    pub generate_model_json: bool,
    pub gzip: bool,
    pub num_lights: u32,
    pub model_id: String,
    pub model_name: Option<String>,
    pub measure_device: String,
}

pub fn resolve_answers(config: &MeasureConfig, prompter: &mut dyn Prompter) -> Result<SetupAnswers> {
    let preset = &config.preset;

    let light_id = match &preset.light {
        Some(light) => light.clone(),
        None => {
            let prompt = match config.light_controller {
                LightControllerKind::Hass => "Light entity to measure (e.g. light.living_room)",
                LightControllerKind::Hue => "Hue light id to measure",
            };
            non_empty(prompter.input(prompt, None)?, "SELECTED_LIGHT")?
        }
    };

    let power_entity = match (config.power_meter, &preset.power_entity) {
        (PowerMeterKind::Hass, Some(entity)) => Some(entity.clone()),
        (PowerMeterKind::Hass, None) => Some(non_empty(
            prompter.input("Power sensor entity (e.g. sensor.plug_power)", None)?,
            "SELECTED_POWER_ENTITY",
        )?),
        _ => None,
    };

    let color_mode = match preset.color_mode {
        Some(mode) => mode,
        None => {
            let items: Vec<&str> = ColorMode::ALL.iter().map(ColorMode::as_str).collect();
            let index = prompter.select("Color mode to measure", &items, 0)?;
            ColorMode::ALL
                .get(index)
                .copied()
                .ok_or_else(|| MeasureError::Prompt(format!("invalid selection {index}")))?
        }
    };

    let generate_model_json = match preset.generate_model_json {
        Some(value) => value,
        None => prompter.confirm("Generate model.json?", true)?,
    };

    let gzip = match preset.gzip {
        Some(value) => value,
        None => prompter.confirm("Gzip the lookup table CSV?", true)?,
    };

    if let (Some(multiple), Some(count)) = (preset.multiple_lights, preset.num_lights) {
        if multiple != (count > 1) {
            return Err(MeasureError::config(
                "SELECTED_NUM_LIGHTS",
                format!("{count} light(s) contradicts SELECTED_MULTIPLE_LIGHTS={multiple}"),
            ));
        }
    }

    let multiple_lights = match (preset.multiple_lights, preset.num_lights) {
        (Some(value), _) => value,
        (None, Some(count)) => count > 1,
        (None, None) => prompter.confirm("Are you measuring multiple lights at once?", false)?,
    };

    let num_lights = if multiple_lights {
        match preset.num_lights {
            Some(count) => count,
            None => parse_light_count(&prompter.input("How many lights?", Some("2"))?)?,
        }
    } else {
        1
    };

    let (model_id, model_name) = if generate_model_json {
        let model_id = match &preset.model_id {
            Some(id) => id.clone(),
            None => non_empty(
                prompter.input("Model id of the light (e.g. LCT010)", None)?,
                "SELECTED_MODEL_ID",
            )?,
        };
        let model_name = match &preset.model_name {
            Some(name) => name.clone(),
            None => non_empty(
                prompter.input("Model name of the light", None)?,
                "SELECTED_MODEL_NAME",
            )?,
        };
        (model_id, Some(model_name))
    } else {
        (
            preset
                .model_id
                .clone()
                .unwrap_or_else(|| UNKNOWN_MODEL_ID.to_string()),
            preset.model_name.clone(),
        )
    };

    let measure_device = match &preset.measure_device {
        Some(device) => device.clone(),
        None if generate_model_json => prompter.input(
            "Which device did you use to measure?",
            Some(config.power_meter.as_str()),
        )?,
        None => config.power_meter.as_str().to_string(),
    };

    let answers = SetupAnswers {
        light_id,
        power_entity,
        color_mode,
        generate_model_json,
        gzip,
        num_lights,
        model_id,
        model_name,
        measure_device,
    };
    info!(
        "Measuring {} in {} mode ({} light(s)), model id {}",
        answers.light_id, answers.color_mode, answers.num_lights, answers.model_id
    );
    Ok(answers)
}

/// Decides whether an interrupted measurement continues where it left off
pub fn resolve_resume(preset: &PresetAnswers, prompter: &mut dyn Prompter) -> Result<bool> {
    match preset.resume {
        Some(resume) => Ok(resume),
        None => prompter.confirm("A previous measurement was found. Resume it?", true),
    }
}

fn parse_light_count(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(MeasureError::Prompt(format!(
            "'{}' is not a valid number of lights",
            raw.trim()
        ))),
        Ok(count) => Ok(count),
    }
}

fn non_empty(value: String, key: &str) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        Err(MeasureError::Prompt(format!("an answer is required ({key})")))
    } else {
        Ok(value)
    }
}
