use crate::limits::ControlTarget;
use crate::sensor::ForceReading;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Fields read and written by more than one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SharedSnapshot {
    pub reading: Option<ForceReading>,
    pub active: bool,
    pub target: ControlTarget,
    pub recording: bool,
    #[serde(with = "duration_secs")]
    pub record_interval: Duration,
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self {
            reading: None,
            active: false,
            target: ControlTarget::default(),
            recording: false,
            record_interval: Duration::from_secs(2),
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Cross-task state behind one short-held lock.
///
/// Every update replaces a whole field value; nothing blocking runs while the
/// lock is held.
#[derive(Debug, Default)]
pub struct StateExchange {
    inner: Mutex<SharedSnapshot>,
}

impl StateExchange {
    pub fn new(initial: SharedSnapshot) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the status task after each poll. `None` keeps the previous value.
    pub fn publish_status(&self, reading: Option<ForceReading>, active: Option<bool>) {
        let mut state = self.lock();
        if reading.is_some() {
            state.reading = reading;
        }
        if let Some(active) = active {
            state.active = active;
        }
    }

    pub fn reading(&self) -> Option<ForceReading> {
        self.lock().reading
    }

    pub fn force_kn(&self) -> Option<f64> {
        self.lock().reading.map(|r| r.corrected_kn)
    }

    pub fn set_target(&self, target: ControlTarget) {
        self.lock().target = target;
    }

    pub fn target(&self) -> ControlTarget {
        self.lock().target
    }

    pub fn set_recording(&self, recording: bool) {
        self.lock().recording = recording;
    }

    pub fn set_record_interval(&self, interval: Duration) {
        self.lock().record_interval = interval;
    }

    pub fn recording(&self) -> bool {
        self.lock().recording
    }

    pub fn read_state(&self) -> SharedSnapshot {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn failed_poll_keeps_last_reading() {
        let exchange = StateExchange::default();
        let reading = ForceReading::from_raw(167_772.0, 50.0);
        exchange.publish_status(Some(reading), Some(true));
        exchange.publish_status(None, Some(false));

        let state = exchange.read_state();
        assert_eq!(state.reading, Some(reading));
        assert!(!state.active);
    }

    #[test]
    fn readers_never_see_torn_readings() {
        let exchange = Arc::new(StateExchange::default());
        let writer = {
            let exchange = Arc::clone(&exchange);
            thread::spawn(move || {
                for i in 0..10_000 {
                    let raw = f64::from(i);
                    exchange.publish_status(
                        Some(ForceReading::from_raw(raw, 50.0)),
                        Some(i % 2 == 0),
                    );
                }
            })
        };

        for _ in 0..10_000 {
            if let Some(r) = exchange.reading() {
                assert_eq!(r, ForceReading::from_raw(r.raw_sample, 50.0));
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn snapshot_serializes_interval_as_seconds() {
        let exchange = StateExchange::default();
        exchange.set_record_interval(Duration::from_millis(1500));
        let json = serde_json::to_value(exchange.read_state()).unwrap();
        assert_eq!(json["record_interval"], 1.5);
    }
}
