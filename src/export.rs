use flate2::write::GzEncoder;
use flate2::Compression;
use serde_derive::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::MeasureConfig;
use crate::error::Result;
use crate::variation::{ColorMode, Variation};

pub const MODEL_JSON: &str = "model.json";

/// Directory holding every file produced for one light model
pub fn output_dir(export_dir: &Path, model_id: &str) -> PathBuf {
    export_dir.join(model_id)
}

pub fn csv_path(dir: &Path, mode: ColorMode) -> PathBuf {
    dir.join(format!("{}.csv", mode.as_str()))
}

/// Returns the complete rows of an existing lookup table, in file order.
///
/// Rows without a parsable watt column, such as a line cut short when a run
/// was interrupted, are left out.
pub fn read_recorded_rows(path: &Path, mode: ColorMode) -> Result<Vec<(Variation, f64)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(File::open(path)?));
    let watt_column = mode.csv_header().len() - 1;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        let watt = fields
            .get(watt_column)
            .and_then(|w| w.trim().parse::<f64>().ok());
        if let (Some(variation), Some(watt)) = (Variation::from_csv_fields(mode, &fields), watt) {
            rows.push((variation, watt));
        }
    }
    Ok(rows)
}

/// CSV lookup table, flushed after every row so an interrupted run can resume
pub struct LookupTableWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl LookupTableWriter {
    /// Starts a new table, replacing any existing file
    pub fn create(path: &Path, mode: ColorMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(mode.csv_header())?;
        writer.flush()?;
        debug!("Created lookup table {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Rewrites a table with the rows kept from an interrupted run, then continues it
    pub fn resume(path: &Path, mode: ColorMode, recorded: &[(Variation, f64)]) -> Result<Self> {
        let mut table = Self::create(path, mode)?;
        for (variation, watt) in recorded {
            table.write_row(variation, *watt)?;
        }
        table.rows = 0;
        debug!(
            "Resuming lookup table {} after {} rows",
            path.display(),
            recorded.len()
        );
        Ok(table)
    }

    pub fn write_row(&mut self, variation: &Variation, watt: f64) -> Result<()> {
        let mut record = variation.csv_fields();
        record.push(watt.to_string());
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written by this writer, excluding rows from a resumed run
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes the table, compressing it when requested, and returns the final path
    pub fn finish(mut self, gzip: bool) -> Result<PathBuf> {
        self.writer.flush()?;
        drop(self.writer);
        if gzip {
            gzip_file(&self.path)
        } else {
            Ok(self.path)
        }
    }
}

/// Compresses `path` into `path.gz` and removes the original
pub fn gzip_file(path: &Path) -> Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&gz_path)?), Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;

    info!("Compressed lookup table to {}", gz_path.display());
    Ok(gz_path)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelJson {
    pub name: String,
    pub standby_power: f64,
    pub supported_modes: Vec<String>,
    pub measure_method: String,
    pub measure_device: String,
    pub measure_description: String,
    pub measure_settings: MeasureSettings,
}

/// Settings the lookup table was measured with
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MeasureSettings {
    pub version: String,
    pub color_mode: ColorMode,
    pub num_lights: u32,
    pub sample_count: u32,
    pub sleep_time: f64,
    pub sleep_time_sample: f64,
    pub sleep_time_hue: f64,
    pub sleep_time_sat: f64,
    pub sleep_time_ct: f64,
    pub bri_bri_steps: u32,
    pub ct_bri_steps: u32,
    pub ct_mired_steps: u32,
    pub hs_bri_steps: u32,
    pub hs_sat_steps: u32,
    pub hs_hue_steps: u32,
}

impl MeasureSettings {
    pub fn from_config(config: &MeasureConfig, color_mode: ColorMode, num_lights: u32) -> Self {
        let timing = &config.timing;
        let steps = &config.steps;
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            color_mode,
            num_lights,
            sample_count: timing.sample_count,
            sleep_time: timing.sleep_time.as_secs_f64(),
            sleep_time_sample: timing.sleep_time_sample.as_secs_f64(),
            sleep_time_hue: timing.sleep_time_hue.as_secs_f64(),
            sleep_time_sat: timing.sleep_time_sat.as_secs_f64(),
            sleep_time_ct: timing.sleep_time_ct.as_secs_f64(),
            bri_bri_steps: steps.bri_bri,
            ct_bri_steps: steps.ct_bri,
            ct_mired_steps: steps.ct_mired,
            hs_bri_steps: steps.hs_bri,
            hs_sat_steps: steps.hs_sat,
            hs_hue_steps: steps.hs_hue,
        }
    }
}

pub fn write_model_json(dir: &Path, model: &ModelJson) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(MODEL_JSON);
    let file = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(file, model)?;
    info!("Wrote {}", path.display());
    Ok(path)
}
