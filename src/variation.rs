use std::fmt;
use std::str::FromStr;

use serde_derive::Serialize;

use crate::config::SweepSteps;

pub const MIN_BRIGHTNESS: u32 = 1;
pub const MAX_BRIGHTNESS: u32 = 255;
pub const MIN_SAT: u32 = 1;
pub const MAX_SAT: u32 = 254;
pub const MIN_HUE: u32 = 1;
pub const MAX_HUE: u32 = 65535;

/// Which light attributes are swept during a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Hs,
    ColorTemp,
    Brightness,
}

impl ColorMode {
    pub const ALL: [ColorMode; 3] = [ColorMode::Hs, ColorMode::ColorTemp, ColorMode::Brightness];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Hs => "hs",
            ColorMode::ColorTemp => "color_temp",
            ColorMode::Brightness => "brightness",
        }
    }

    /// CSV header row for lookup tables of this mode
    pub fn csv_header(&self) -> &'static [&'static str] {
        match self {
            ColorMode::Hs => &["bri", "hue", "sat", "watt"],
            ColorMode::ColorTemp => &["bri", "mired", "watt"],
            ColorMode::Brightness => &["bri", "watt"],
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hs" => Ok(ColorMode::Hs),
            "color_temp" => Ok(ColorMode::ColorTemp),
            "brightness" => Ok(ColorMode::Brightness),
            other => Err(format!(
                "unknown color mode '{other}', expected one of hs, color_temp, brightness"
            )),
        }
    }
}

/// A single light setting at which power is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    Brightness { bri: u32 },
    ColorTemp { bri: u32, mired: u32 },
    Hs { bri: u32, hue: u32, sat: u32 },
}

impl Variation {
    pub fn bri(&self) -> u32 {
        match *self {
            Variation::Brightness { bri }
            | Variation::ColorTemp { bri, .. }
            | Variation::Hs { bri, .. } => bri,
        }
    }

    pub fn color_mode(&self) -> ColorMode {
        match self {
            Variation::Brightness { .. } => ColorMode::Brightness,
            Variation::ColorTemp { .. } => ColorMode::ColorTemp,
            Variation::Hs { .. } => ColorMode::Hs,
        }
    }

    /// Values in CSV column order, without the trailing watt column
    pub fn csv_fields(&self) -> Vec<String> {
        match *self {
            Variation::Brightness { bri } => vec![bri.to_string()],
            Variation::ColorTemp { bri, mired } => vec![bri.to_string(), mired.to_string()],
            Variation::Hs { bri, hue, sat } => {
                vec![bri.to_string(), hue.to_string(), sat.to_string()]
            }
        }
    }

    /// Parses the leading columns of a CSV row written by `csv_fields`
    pub fn from_csv_fields(mode: ColorMode, fields: &[&str]) -> Option<Self> {
        let num = |i: usize| fields.get(i)?.trim().parse::<u32>().ok();
        match mode {
            ColorMode::Brightness => Some(Variation::Brightness { bri: num(0)? }),
            ColorMode::ColorTemp => Some(Variation::ColorTemp {
                bri: num(0)?,
                mired: num(1)?,
            }),
            ColorMode::Hs => Some(Variation::Hs {
                bri: num(0)?,
                hue: num(1)?,
                sat: num(2)?,
            }),
        }
    }

    /// Extra settle time category when moving from `previous` to `self`.
    ///
    /// Large jumps in hue, saturation or color temperature take longer for
    /// lights to settle than a single brightness step.
    pub fn settle_changes(&self, previous: &Variation) -> SettleChanges {
        match (*self, *previous) {
            (
                Variation::Hs { hue, sat, .. },
                Variation::Hs {
                    hue: prev_hue,
                    sat: prev_sat,
                    ..
                },
            ) => SettleChanges {
                hue: hue < prev_hue,
                sat: sat != prev_sat,
                ct: false,
            },
            (Variation::ColorTemp { mired, .. }, Variation::ColorTemp { mired: prev, .. }) => {
                SettleChanges {
                    ct: mired < prev,
                    ..SettleChanges::default()
                }
            }
            _ => SettleChanges::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleChanges {
    pub hue: bool,
    pub sat: bool,
    pub ct: bool,
}

/// Yields `start, start + step, ...` and always finishes on `end`
pub fn inclusive_range(start: u32, end: u32, step: u32) -> Vec<u32> {
    let step = step.max(1);
    let mut values: Vec<u32> = (start..=end).step_by(step as usize).collect();
    if values.last() != Some(&end) && start <= end {
        values.push(end);
    }
    values
}

/// Builds every variation to measure for the given mode, in measurement order
pub fn generate_variations(
    mode: ColorMode,
    steps: &SweepSteps,
    min_mired: u32,
    max_mired: u32,
) -> Vec<Variation> {
    match mode {
        ColorMode::Brightness => inclusive_range(MIN_BRIGHTNESS, MAX_BRIGHTNESS, steps.bri_bri)
            .into_iter()
            .map(|bri| Variation::Brightness { bri })
            .collect(),
        ColorMode::ColorTemp => {
            let mireds = inclusive_range(min_mired, max_mired, steps.ct_mired);
            inclusive_range(MIN_BRIGHTNESS, MAX_BRIGHTNESS, steps.ct_bri)
                .into_iter()
                .flat_map(|bri| {
                    mireds
                        .iter()
                        .map(move |&mired| Variation::ColorTemp { bri, mired })
                })
                .collect()
        }
        ColorMode::Hs => {
            let sats = inclusive_range(MIN_SAT, MAX_SAT, steps.hs_sat);
            let hues = inclusive_range(MIN_HUE, MAX_HUE, steps.hs_hue);
            let mut variations = Vec::new();
            for bri in inclusive_range(MIN_BRIGHTNESS, MAX_BRIGHTNESS, steps.hs_bri) {
                for &sat in &sats {
                    for &hue in &hues {
                        variations.push(Variation::Hs { bri, hue, sat });
                    }
                }
            }
            variations
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> SweepSteps {
        SweepSteps {
            bri_bri: 1,
            ct_bri: 5,
            ct_mired: 10,
            hs_bri: 32,
            hs_sat: 32,
            hs_hue: 2731,
        }
    }

    #[test]
    fn test_inclusive_range_appends_end() {
        assert_eq!(inclusive_range(1, 10, 4), vec![1, 5, 9, 10]);
        assert_eq!(inclusive_range(1, 9, 4), vec![1, 5, 9]);
        assert_eq!(inclusive_range(5, 5, 3), vec![5]);
    }

    #[test]
    fn test_inclusive_range_zero_step_treated_as_one() {
        assert_eq!(inclusive_range(1, 3, 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_brightness_variations_cover_full_range() {
        let variations = generate_variations(ColorMode::Brightness, &steps(), 153, 500);
        assert_eq!(variations.len(), 255);
        assert_eq!(variations[0], Variation::Brightness { bri: 1 });
        assert_eq!(variations[254], Variation::Brightness { bri: 255 });
    }

    #[test]
    fn test_color_temp_variations_nest_mired_inside_brightness() {
        let variations = generate_variations(ColorMode::ColorTemp, &steps(), 150, 170);
        // bri: 1,6,...,251,255 => 52 values; mired: 150,160,170 => 3 values
        assert_eq!(variations.len(), 52 * 3);
        assert_eq!(variations[0], Variation::ColorTemp { bri: 1, mired: 150 });
        assert_eq!(variations[2], Variation::ColorTemp { bri: 1, mired: 170 });
        assert_eq!(variations[3], Variation::ColorTemp { bri: 6, mired: 150 });
    }

    #[test]
    fn test_hs_variations_order() {
        let variations = generate_variations(ColorMode::Hs, &steps(), 0, 0);
        assert_eq!(variations[0], Variation::Hs { bri: 1, hue: 1, sat: 1 });
        assert_eq!(variations[1], Variation::Hs { bri: 1, hue: 2732, sat: 1 });
        assert_eq!(variations.last(), Some(&Variation::Hs { bri: 255, hue: 65535, sat: 254 }));
    }

    #[test]
    fn test_settle_changes_hs() {
        let prev = Variation::Hs { bri: 1, hue: 65535, sat: 1 };
        let next = Variation::Hs { bri: 1, hue: 1, sat: 33 };
        assert_eq!(
            next.settle_changes(&prev),
            SettleChanges {
                hue: true,
                sat: true,
                ct: false
            }
        );

        let step = Variation::Hs { bri: 1, hue: 2732, sat: 33 };
        assert_eq!(step.settle_changes(&next), SettleChanges::default());
    }

    #[test]
    fn test_settle_changes_color_temp() {
        let prev = Variation::ColorTemp { bri: 1, mired: 500 };
        let next = Variation::ColorTemp { bri: 6, mired: 153 };
        assert!(next.settle_changes(&prev).ct);
        assert!(!prev.settle_changes(&next).ct);
    }

    #[test]
    fn test_csv_fields_parse_back() {
        let variation = Variation::Hs { bri: 10, hue: 200, sat: 30 };
        let fields = variation.csv_fields();
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        assert_eq!(Variation::from_csv_fields(ColorMode::Hs, &refs), Some(variation));
        assert_eq!(Variation::from_csv_fields(ColorMode::ColorTemp, &["1"]), None);
    }

    #[test]
    fn test_color_mode_from_str() {
        assert_eq!("HS".parse::<ColorMode>(), Ok(ColorMode::Hs));
        assert_eq!("color_temp".parse::<ColorMode>(), Ok(ColorMode::ColorTemp));
        assert!("rgb".parse::<ColorMode>().is_err());
    }
}
