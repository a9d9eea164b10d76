//! Environment driven configuration.
//!
//! Every key documented in `.env.dist` is read here. Values come from the
//! process environment first and from a `.env` file in the working directory
//! second. Vendor specific keys are only required for the vendor that is
//! actually selected.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::error::{MeasureError, Result};
use crate::variation::ColorMode;

pub const DEFAULT_HASS_URL: &str = "http://homeassistant.local:8123/api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMeterKind {
    Hass,
    Shelly,
    Tuya,
    Kasa,
    Manual,
    Tasmota,
}

impl PowerMeterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMeterKind::Hass => "hass",
            PowerMeterKind::Shelly => "shelly",
            PowerMeterKind::Tuya => "tuya",
            PowerMeterKind::Kasa => "kasa",
            PowerMeterKind::Manual => "manual",
            PowerMeterKind::Tasmota => "tasmota",
        }
    }
}

impl FromStr for PowerMeterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hass" => Ok(PowerMeterKind::Hass),
            "shelly" => Ok(PowerMeterKind::Shelly),
            "tuya" => Ok(PowerMeterKind::Tuya),
            "kasa" => Ok(PowerMeterKind::Kasa),
            "manual" => Ok(PowerMeterKind::Manual),
            "tasmota" => Ok(PowerMeterKind::Tasmota),
            other => Err(format!(
                "unknown power meter '{other}', expected one of hass, shelly, tuya, kasa, manual, tasmota"
            )),
        }
    }
}

impl fmt::Display for PowerMeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightControllerKind {
    Hass,
    Hue,
}

impl FromStr for LightControllerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hass" => Ok(LightControllerKind::Hass),
            "hue" => Ok(LightControllerKind::Hue),
            other => Err(format!(
                "unknown light controller '{other}', expected one of hass, hue"
            )),
        }
    }
}

/// Log verbosity, using the level names of the `.env` template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// tracing has no critical level, so it collapses into error
    pub fn as_tracing_level(&self) -> Level {
        match self {
            LogLevel::Critical | LogLevel::Error => Level::ERROR,
            LogLevel::Warning => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(LogLevel::Critical),
            "ERROR" => Ok(LogLevel::Error),
            "WARNING" => Ok(LogLevel::Warning),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            other => Err(format!(
                "unknown log level '{other}', expected one of CRITICAL, ERROR, WARNING, INFO, DEBUG"
            )),
        }
    }
}

/// Wait times and sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub sleep_initial: Duration,
    pub sleep_standby: Duration,
    pub sleep_time: Duration,
    pub sleep_time_sample: Duration,
    pub sleep_time_hue: Duration,
    pub sleep_time_sat: Duration,
    pub sleep_time_ct: Duration,
    pub sample_count: u32,
    pub max_retries: u32,
}

/// Step sizes of each sweep dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSteps {
    pub bri_bri: u32,
    pub ct_bri: u32,
    pub ct_mired: u32,
    pub hs_bri: u32,
    pub hs_sat: u32,
    pub hs_hue: u32,
}

impl SweepSteps {
    /// Converts a HS precision factor into a step size, 1 meaning the default resolution
    pub fn precision_to_steps(base: f64, precision: f64) -> u32 {
        let precision = precision.clamp(0.5, 4.0);
        ((base / precision).round() as u32).max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HassSettings {
    pub url: String,
    pub token: String,
    pub call_update_entity_service: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShellySettings {
    pub ip: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuyaSettings {
    pub device_id: String,
    pub device_ip: String,
    pub device_key: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HueSettings {
    pub bridge_ip: String,
    pub username: Option<String>,
}

/// Answers for the setup wizard supplied up front
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetAnswers {
    pub light: Option<String>,
    pub power_entity: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub generate_model_json: Option<bool>,
    pub gzip: Option<bool>,
    pub multiple_lights: Option<bool>,
    pub num_lights: Option<u32>,
    pub model_id: Option<String>,
    pub model_name: Option<String>,
    pub measure_device: Option<String>,
    pub resume: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasureConfig {
    pub power_meter: PowerMeterKind,
    pub light_controller: LightControllerKind,
    pub log_level: LogLevel,
    pub timing: Timing,
    pub steps: SweepSteps,
    pub export_dir: PathBuf,
    pub hass: Option<HassSettings>,
    pub shelly: Option<ShellySettings>,
    pub tuya: Option<TuyaSettings>,
    pub hue: Option<HueSettings>,
    pub kasa_device_ip: Option<String>,
    pub tasmota_device_ip: Option<String>,
    pub preset: PresetAnswers,
}

impl MeasureConfig {
    /// Loads the configuration from the process environment, falling back to `.env`.
    ///
    /// Also returns the path of the `.env` file that was loaded, if any. This
    /// runs before logging is set up, so reporting it is left to the caller.
    pub fn from_env() -> Result<(Self, Option<PathBuf>)> {
        let env_file = env_file_outcome(dotenvy::dotenv())?;
        Ok((Self::from_lookup(|key| std::env::var(key).ok())?, env_file))
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let power_meter: PowerMeterKind = env.parse_or("POWER_METER", PowerMeterKind::Hass)?;
        let light_controller: LightControllerKind =
            env.parse_or("LIGHT_CONTROLLER", LightControllerKind::Hass)?;
        let log_level: LogLevel = env.parse_or("LOG_LEVEL", LogLevel::Info)?;

        let timing = Timing {
            sleep_initial: env.seconds_or("SLEEP_INITIAL", 10.0)?,
            sleep_standby: env.seconds_or("SLEEP_STANDBY", 20.0)?,
            sleep_time: env.seconds_or("SLEEP_TIME", 2.0)?,
            sleep_time_sample: env.seconds_or("SLEEP_TIME_SAMPLE", 1.0)?,
            sleep_time_hue: env.seconds_or("SLEEP_TIME_HUE", 5.0)?,
            sleep_time_sat: env.seconds_or("SLEEP_TIME_SAT", 10.0)?,
            sleep_time_ct: env.seconds_or("SLEEP_TIME_CT", 10.0)?,
            sample_count: env.positive_or("SAMPLE_COUNT", 1)?,
            max_retries: env.parse_or("MAX_RETRIES", 5)?,
        };

        let steps = SweepSteps {
            bri_bri: env.positive_or("BRI_BRI_STEPS", 1)?,
            ct_bri: env.positive_or("CT_BRI_STEPS", 5)?,
            ct_mired: env.positive_or("CT_MIRED_STEPS", 10)?,
            hs_bri: SweepSteps::precision_to_steps(32.0, env.parse_or("HS_BRI_PRECISION", 1.0)?),
            hs_sat: SweepSteps::precision_to_steps(32.0, env.parse_or("HS_SAT_PRECISION", 1.0)?),
            hs_hue: SweepSteps::precision_to_steps(
                2731.0,
                env.parse_or("HS_HUE_PRECISION", 1.0)?,
            ),
        };

        let hass = if power_meter == PowerMeterKind::Hass
            || light_controller == LightControllerKind::Hass
        {
            Some(HassSettings {
                url: env.string_or("HASS_URL", DEFAULT_HASS_URL),
                token: env.required("HASS_TOKEN")?,
                call_update_entity_service: env
                    .bool_opt("HASS_CALL_UPDATE_ENTITY_SERVICE")?
                    .unwrap_or(false),
            })
        } else {
            None
        };

        let shelly = if power_meter == PowerMeterKind::Shelly {
            Some(ShellySettings {
                ip: env.required("SHELLY_IP")?,
                timeout: env.seconds_or("SHELLY_TIMEOUT", 5.0)?,
            })
        } else {
            None
        };

        let tuya = if power_meter == PowerMeterKind::Tuya {
            Some(TuyaSettings {
                device_id: env.required("TUYA_DEVICE_ID")?,
                device_ip: env.required("TUYA_DEVICE_IP")?,
                device_key: env.required("TUYA_DEVICE_KEY")?,
                version: env.string_or("TUYA_DEVICE_VERSION", "3.3"),
            })
        } else {
            None
        };

        let hue = if light_controller == LightControllerKind::Hue {
            Some(HueSettings {
                bridge_ip: env.required("HUE_BRIDGE_IP")?,
                username: env.get("HUE_USERNAME"),
            })
        } else {
            None
        };

        let kasa_device_ip = if power_meter == PowerMeterKind::Kasa {
            Some(env.required("KASA_DEVICE_IP")?)
        } else {
            None
        };

        let tasmota_device_ip = if power_meter == PowerMeterKind::Tasmota {
            Some(env.required("TASMOTA_DEVICE_IP")?)
        } else {
            None
        };

        let preset = PresetAnswers {
            light: env.get("SELECTED_LIGHT"),
            power_entity: env.get("SELECTED_POWER_ENTITY"),
            color_mode: env.parse_opt("SELECTED_COLOR_MODE")?,
            generate_model_json: env.bool_opt("SELECTED_GENERATE_MODEL_JSON")?,
            gzip: env.bool_opt("SELECTED_GZIP")?,
            multiple_lights: env.bool_opt("SELECTED_MULTIPLE_LIGHTS")?,
            num_lights: match env.parse_opt::<u32>("SELECTED_NUM_LIGHTS")? {
                Some(0) => {
                    return Err(MeasureError::config(
                        "SELECTED_NUM_LIGHTS",
                        "must be at least 1",
                    ))
                }
                other => other,
            },
            model_id: env.get("SELECTED_MODEL_ID"),
            model_name: env.get("SELECTED_MODEL_NAME"),
            measure_device: env.get("SELECTED_MEASURE_DEVICE"),
            resume: env.bool_opt("RESUME")?,
        };

        Ok(Self {
            power_meter,
            light_controller,
            log_level,
            timing,
            steps,
            export_dir: PathBuf::from(env.string_or("EXPORT_DIR", "export")),
            hass,
            shelly,
            tuya,
            hue,
            kasa_device_ip,
            tasmota_device_ip,
            preset,
        })
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Returns the trimmed value, treating empty strings as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| MeasureError::config(key, "required for the selected device"))
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| MeasureError::config(key, format!("'{raw}': {e}")))
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn positive_or(&self, key: &str, default: u32) -> Result<u32> {
        match self.parse_or(key, default)? {
            0 => Err(MeasureError::config(key, "must be at least 1")),
            value => Ok(value),
        }
    }

    fn seconds_or(&self, key: &str, default: f64) -> Result<Duration> {
        let seconds: f64 = self.parse_or(key, default)?;
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| MeasureError::config(key, format!("'{seconds}' is not a valid duration")))
    }

    fn bool_opt(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|raw| {
                parse_bool(&raw)
                    .ok_or_else(|| MeasureError::config(key, format!("'{raw}' is not a boolean")))
            })
            .transpose()
    }
}

/// A missing `.env` file is fine, an unreadable or malformed one is not
fn env_file_outcome(result: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(MeasureError::config(".env", e.to_string())),
    }
}

/// Parses the boolean spellings accepted in `.env` files
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}
