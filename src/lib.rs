//! Light power measurement
//!
//! This library sweeps a smart light through its brightness, color temperature
//! or hue/saturation range and records the power drawn at every setting, as
//! reported by one of several supported power meters.

pub mod config;
pub mod error;
pub mod export;
pub mod home_assistant;
pub mod light_controller;
pub mod measure;
pub mod power_meter;
pub mod sample_average;
pub mod variation;
pub mod wizard;

// Re-export commonly used types for easier access
pub use config::MeasureConfig;
pub use error::{MeasureError, Result};
pub use light_controller::{create_light_controller, LightCommand, LightController, LightInfo};
pub use measure::{MeasureSummary, Measurer};
pub use power_meter::{create_power_meter, PowerMeasurement, PowerMeter};
pub use variation::{ColorMode, Variation};
pub use wizard::{resolve_answers, Prompter, SetupAnswers, TerminalPrompter};
