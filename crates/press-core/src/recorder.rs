use crate::error::PressResult;
use crate::tags;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// One recorded force sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub elapsed_seconds: f64,
    pub force_kn: f64,
}

#[derive(Serialize)]
struct Row {
    timestamp: String,
    elapsed_seconds: f64,
    force_kn: f64,
}

impl From<&Sample> for Row {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp.format(tags::TIMESTAMP_FORMAT).to_string(),
            elapsed_seconds: sample.elapsed_seconds,
            force_kn: sample.force_kn,
        }
    }
}

/// Append-only force series with a lazily set elapsed-time reference.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    samples: Vec<Sample>,
    reference: Option<Instant>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the current force if recording is enabled and a reading exists.
    ///
    /// The first sample after creation or a clear defines elapsed zero.
    pub fn record_if_due(&mut self, force_kn: Option<f64>, recording: bool) -> Option<&Sample> {
        if !recording {
            return None;
        }
        let Some(force_kn) = force_kn else {
            log::debug!("recording enabled but no force reading yet");
            return None;
        };

        let now = Instant::now();
        let reference = *self.reference.get_or_insert(now);
        self.samples.push(Sample {
            timestamp: Local::now(),
            elapsed_seconds: now.duration_since(reference).as_secs_f64(),
            force_kn,
        });
        self.samples.last()
    }

    pub fn clear(&mut self) {
        let dropped = self.samples.len();
        self.samples.clear();
        self.reference = None;
        log::info!("recording cleared ({dropped} samples discarded)");
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copy of the series as it stands now.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.clone()
    }
}

/// Write samples as `timestamp,elapsed_seconds,force_kn` rows with a header.
pub fn write_csv(samples: &[Sample], path: &Path) -> PressResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(Row::from(sample))?;
    }
    if samples.is_empty() {
        writer.write_record(tags::EXPORT_COLUMNS)?;
    }
    writer.flush()?;
    log::info!("exported {} samples to {}", samples.len(), path.display());
    Ok(samples.len())
}
