use crate::error::{PressError, PressResult};
use crate::hal::LoadCell;
use crate::limits::{ConfigViolation, FULL_SCALE_KN};
use serde::Serialize;

/// Counts per full scale of the 24-bit load-cell ADC (2^23).
pub const ADC_COUNTS: f64 = 8_388_608.0;

/// One averaged load-cell reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForceReading {
    pub raw_sample: f64,
    pub corrected_kn: f64,
}

impl ForceReading {
    pub fn from_raw(raw_sample: f64, full_scale_kn: f64) -> Self {
        Self {
            raw_sample,
            corrected_kn: raw_sample / ADC_COUNTS * full_scale_kn,
        }
    }
}

/// Averages raw load-cell samples and converts them to kN.
pub struct ForceSensor {
    cell: Box<dyn LoadCell>,
    samples_per_reading: usize,
    full_scale_kn: f64,
    last: Option<ForceReading>,
}

impl ForceSensor {
    pub fn new(cell: Box<dyn LoadCell>, samples_per_reading: usize) -> PressResult<Self> {
        if samples_per_reading == 0 {
            return Err(ConfigViolation::ZeroSampleCount.into());
        }
        Ok(Self {
            cell,
            samples_per_reading,
            full_scale_kn: FULL_SCALE_KN,
            last: None,
        })
    }

    /// Mean of `n` raw samples. Blocks for the acquisition time.
    pub fn sample(&mut self, n: usize) -> PressResult<f64> {
        if n == 0 {
            return Err(ConfigViolation::ZeroSampleCount.into());
        }
        let raw = self.cell.read_raw(n)?;
        if raw.is_empty() {
            return Err(PressError::sensor_unavailable("load cell returned no samples"));
        }
        let sum: f64 = raw.iter().map(|&v| f64::from(v)).sum();
        Ok(sum / raw.len() as f64)
    }

    /// Sample, convert to kN and remember the result as the last known value.
    pub fn corrected_value(&mut self) -> PressResult<ForceReading> {
        let mean = self.sample(self.samples_per_reading)?;
        let reading = ForceReading::from_raw(mean, self.full_scale_kn);
        if !reading.corrected_kn.is_finite() {
            return Err(PressError::sensor_unavailable(format!(
                "non-finite reading from raw mean {mean}"
            )));
        }
        self.last = Some(reading);
        Ok(reading)
    }

    pub fn last(&self) -> Option<ForceReading> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{ChannelFactory, PinMap};
    use crate::hal_sim::{SimBackend, SimBench};

    struct FixedCell(Vec<i32>);

    impl LoadCell for FixedCell {
        fn read_raw(&mut self, samples: usize) -> PressResult<Vec<i32>> {
            Ok(self.0.iter().copied().cycle().take(samples).collect())
        }
    }

    struct DeadCell;

    impl LoadCell for DeadCell {
        fn read_raw(&mut self, _samples: usize) -> PressResult<Vec<i32>> {
            Err(PressError::sensor_unavailable("hx711 not responding"))
        }
    }

    #[test]
    fn sample_is_arithmetic_mean() {
        let mut sensor = ForceSensor::new(Box::new(FixedCell(vec![10, 20, 30, 40])), 4).unwrap();
        assert_eq!(sensor.sample(4).unwrap(), 25.0);
    }

    #[test]
    fn corrected_value_uses_linear_scale_and_is_remembered() {
        let mut sensor = ForceSensor::new(Box::new(FixedCell(vec![4_194_304])), 15).unwrap();
        assert!(sensor.last().is_none());

        let reading = sensor.corrected_value().unwrap();

        assert_eq!(reading.corrected_kn, 25.0);
        assert_eq!(sensor.last(), Some(reading));
    }

    #[test]
    fn zero_samples_rejected() {
        assert!(matches!(
            ForceSensor::new(Box::new(FixedCell(vec![1])), 0),
            Err(PressError::InvalidConfig(ConfigViolation::ZeroSampleCount))
        ));
    }

    #[test]
    fn failed_read_keeps_previous_value() {
        let mut sensor = ForceSensor::new(Box::new(DeadCell), 3).unwrap();
        assert!(matches!(
            sensor.corrected_value(),
            Err(PressError::SensorUnavailable { .. })
        ));
        assert!(sensor.last().is_none());
    }

    #[test]
    fn simulated_readings_stay_in_synthetic_range() {
        let backend = SimBackend::new(SimBench::new(PinMap::default()).with_noise(5.0));
        let cell = backend.open_load_cell(&PinMap::default()).unwrap();
        let mut sensor = ForceSensor::new(cell, 15).unwrap();

        for force in [0.0, 0.5, 25.0, 49.9, 50.0] {
            backend.bench().set_force(force);
            let kn = sensor.corrected_value().unwrap().corrected_kn;
            assert!(kn.is_finite());
            assert!((0.0..=FULL_SCALE_KN).contains(&kn), "{kn} out of range");
        }
    }
}
