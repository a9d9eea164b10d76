use thiserror::Error;

/// Errors raised while configuring devices or running a measurement.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// A configuration key is missing or holds a value we cannot use.
    #[error("Invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The device answered, but not with something we understand.
    #[error("{device} error: {message}")]
    Device { device: String, message: String },

    /// The meter kept reporting 0W while the light was on.
    #[error("Power meter reported 0W after {retries} retries")]
    ZeroReading { retries: u32 },

    /// The meter did not report a value newer than the last light change.
    #[error("No fresh power reading after {retries} retries")]
    OutdatedMeasurement { retries: u32 },

    #[error("Hue bridge link button not pressed, press it and try again")]
    HueLinkButtonNotPressed,

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl MeasureError {
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn device(device: &str, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MeasureError>;
