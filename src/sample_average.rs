/// Averages the power samples taken at a single light setting
#[derive(Debug, Clone, Default)]
pub struct SampleAverage {
    sum: f64,
    count: usize,
}

impl SampleAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample and returns the running average
    pub fn add(&mut self, value: f64) -> f64 {
        self.sum += value;
        self.count += 1;
        self.average()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns 0.0 when no samples have been added yet
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Rounds a wattage to two decimals, the precision stored in lookup tables
pub fn round_power(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
