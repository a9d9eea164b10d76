use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::MeasureConfig;
use crate::error::{MeasureError, Result};
use crate::export::{
    csv_path, output_dir, read_recorded_rows, write_model_json, LookupTableWriter,
    MeasureSettings, ModelJson,
};
use crate::light_controller::{LightCommand, LightController};
use crate::power_meter::PowerMeter;
use crate::sample_average::{round_power, SampleAverage};
use crate::variation::{generate_variations, Variation};
use crate::wizard::{resolve_resume, Prompter, SetupAnswers};

const PROGRESS_INTERVAL: usize = 50;

/// Outcome of a finished measurement run
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureSummary {
    pub standby_power: f64,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub output_path: PathBuf,
    pub model_json: Option<PathBuf>,
}

/// Runs a measurement: sweeps the light through every variation and records its power draw
pub struct Measurer {
    config: MeasureConfig,
    answers: SetupAnswers,
    meter: Box<dyn PowerMeter>,
    controller: Box<dyn LightController>,
    prompter: Box<dyn Prompter>,
    retry_delay: Duration,
}

impl Measurer {
    pub fn new(
        config: MeasureConfig,
        answers: SetupAnswers,
        meter: Box<dyn PowerMeter>,
        controller: Box<dyn LightController>,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self {
            config,
            answers,
            meter,
            controller,
            prompter,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub async fn run(&mut self) -> Result<MeasureSummary> {
        let mode = self.answers.color_mode;
        info!(
            "Starting {} measurement of {} using the {} power meter",
            mode,
            self.answers.light_id,
            self.meter.name()
        );

        let light_info = self.controller.get_light_info().await?;
        debug!(
            "Light supports {}-{} mired",
            light_info.min_mired, light_info.max_mired
        );

        let variations = generate_variations(
            mode,
            &self.config.steps,
            light_info.min_mired,
            light_info.max_mired,
        );
        if variations.is_empty() {
            return Err(MeasureError::device(
                "light",
                format!(
                    "no {} settings to measure, the light reports {}-{} mired",
                    mode, light_info.min_mired, light_info.max_mired
                ),
            ));
        }

        let standby_power = self.measure_standby().await?;
        info!("Standby power: {}W", standby_power);

        let dir = output_dir(&self.config.export_dir, &self.answers.model_id);
        let path = csv_path(&dir, mode);
        let (mut writer, skipped) = self.prepare_table(&path, &variations)?;
        let remaining = &variations[skipped..];

        if let Some(first) = remaining.first() {
            self.controller
                .change_light_state(&LightCommand::On(*first))
                .await?;
            sleep(self.config.timing.sleep_initial).await;
        }

        let total = remaining.len();
        let mut previous: Option<Variation> = None;
        for (index, variation) in remaining.iter().enumerate() {
            let changed_at = Utc::now();
            self.controller
                .change_light_state(&LightCommand::On(*variation))
                .await?;
            sleep(self.settle_time(variation, previous.as_ref())).await;

            let watt = self.take_sample(changed_at, false).await?;
            writer.write_row(variation, watt)?;
            debug!("{:?} => {}W ({}/{})", variation, watt, index + 1, total);
            if (index + 1) % PROGRESS_INTERVAL == 0 {
                info!("Progress: {}/{} variations measured", index + 1, total);
            }
            previous = Some(*variation);
        }

        self.controller
            .change_light_state(&LightCommand::Off)
            .await?;

        let rows_written = writer.rows();
        let output_path = writer.finish(self.answers.gzip)?;
        let model_json = if self.answers.generate_model_json {
            Some(write_model_json(&dir, &self.model_json(standby_power))?)
        } else {
            None
        };

        info!(
            "Measurement finished, {} rows written to {}",
            rows_written,
            output_path.display()
        );
        Ok(MeasureSummary {
            standby_power,
            rows_written,
            rows_skipped: skipped,
            output_path,
            model_json,
        })
    }

    /// Opens the lookup table and returns how many leading variations are already recorded
    fn prepare_table(
        &mut self,
        path: &Path,
        variations: &[Variation],
    ) -> Result<(LookupTableWriter, usize)> {
        let mode = self.answers.color_mode;
        let recorded = read_recorded_rows(path, mode)?;
        if let Some(&(last, _)) = recorded.last() {
            if resolve_resume(&self.config.preset, self.prompter.as_mut())? {
                match variations.iter().position(|v| *v == last) {
                    Some(position) => {
                        info!("Resuming measurement after {:?}", last);
                        return Ok((
                            LookupTableWriter::resume(path, mode, &recorded)?,
                            position + 1,
                        ));
                    }
                    None => warn!(
                        "Last recorded variation {:?} does not match the current settings, starting over",
                        last
                    ),
                }
            }
        }
        Ok((LookupTableWriter::create(path, mode)?, 0))
    }

    async fn measure_standby(&mut self) -> Result<f64> {
        info!("Measuring standby power, turning the light off");
        let changed_at = Utc::now();
        self.controller
            .change_light_state(&LightCommand::Off)
            .await?;
        sleep(self.config.timing.sleep_standby).await;
        self.take_sample(changed_at, true).await
    }

    fn settle_time(&self, variation: &Variation, previous: Option<&Variation>) -> Duration {
        let timing = &self.config.timing;
        let mut settle = timing.sleep_time;
        if let Some(previous) = previous {
            let changes = variation.settle_changes(previous);
            if changes.hue {
                settle += timing.sleep_time_hue;
            }
            if changes.sat {
                settle += timing.sleep_time_sat;
            }
            if changes.ct {
                settle += timing.sleep_time_ct;
            }
        }
        settle
    }

    /// Averages `SAMPLE_COUNT` readings and spreads them over the measured lights
    pub async fn take_sample(&mut self, changed_at: DateTime<Utc>, allow_zero: bool) -> Result<f64> {
        let mut samples = SampleAverage::new();
        for index in 0..self.config.timing.sample_count {
            if index > 0 {
                sleep(self.config.timing.sleep_time_sample).await;
            }
            samples.add(self.read_fresh_power(changed_at, allow_zero).await?);
        }
        Ok(round_power(
            samples.average() / self.answers.num_lights as f64,
        ))
    }

    async fn read_fresh_power(&mut self, changed_at: DateTime<Utc>, allow_zero: bool) -> Result<f64> {
        let max_retries = self.config.timing.max_retries;
        let mut outdated_retries = 0;
        let mut zero_retries = 0;
        loop {
            let measurement = self.meter.get_power().await?;

            if measurement.updated < changed_at {
                if outdated_retries >= max_retries {
                    return Err(MeasureError::OutdatedMeasurement {
                        retries: max_retries,
                    });
                }
                outdated_retries += 1;
                debug!(
                    "Reading from {} predates the light change, retrying ({}/{})",
                    measurement.updated, outdated_retries, max_retries
                );
                sleep(self.retry_delay).await;
                continue;
            }

            if measurement.power == 0.0 && !allow_zero {
                if zero_retries >= max_retries {
                    return Err(MeasureError::ZeroReading {
                        retries: max_retries,
                    });
                }
                zero_retries += 1;
                warn!(
                    "Power meter reported 0W, retrying ({}/{})",
                    zero_retries, max_retries
                );
                sleep(self.retry_delay).await;
                continue;
            }

            return Ok(measurement.power);
        }
    }

    fn model_json(&self, standby_power: f64) -> ModelJson {
        ModelJson {
            name: self
                .answers
                .model_name
                .clone()
                .unwrap_or_else(|| self.answers.model_id.clone()),
            standby_power,
            supported_modes: vec!["lut".to_string()],
            measure_method: "script".to_string(),
            measure_device: self.answers.measure_device.clone(),
            measure_description: format!(
                "Measured with light_measure {}",
                env!("CARGO_PKG_VERSION")
            ),
            measure_settings: MeasureSettings::from_config(
                &self.config,
                self.answers.color_mode,
                self.answers.num_lights,
            ),
        }
    }
}
