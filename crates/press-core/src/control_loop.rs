use crate::controller::{Actuation, ForceController};
use crate::error::PressResult;
use crate::hal::{HardwareChannel, PinMap};
use crate::limits::{
    validate_interval, ConfigViolation, ControlTarget, ForceLimits, TargetRequest,
};
use crate::motion::{MotionDriver, DEFAULT_SETTLE};
use crate::recorder::SessionRecorder;
use crate::sensor::ForceSensor;
use crate::sync::StateExchange;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub pins: PinMap,
    pub status_period: Duration,
    pub control_period: Duration,
    pub record_interval: Duration,
    pub samples_per_reading: usize,
    pub settle: Duration,
    pub target: ControlTarget,
    pub limits: ForceLimits,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::default(),
            status_period: Duration::from_millis(100),
            control_period: Duration::from_millis(500),
            record_interval: Duration::from_secs(2),
            samples_per_reading: 15,
            settle: DEFAULT_SETTLE,
            target: ControlTarget::default(),
            limits: ForceLimits::default(),
        }
    }
}

impl ControlConfig {
    /// Reject operator-facing values before any channel is opened.
    pub fn validate(&self) -> Result<(), ConfigViolation> {
        if self.samples_per_reading == 0 {
            return Err(ConfigViolation::ZeroSampleCount);
        }
        TargetRequest::new(self.target.target_kn, self.target.deadband_kn)
            .validate(&self.limits)?;
        validate_interval(self.record_interval.as_secs_f64())?;
        Ok(())
    }
}

/// Status task state: polls the load cell and the active input.
pub struct StatusStation {
    sensor: ForceSensor,
    active: Box<dyn HardwareChannel>,
    exchange: Arc<StateExchange>,
}

impl StatusStation {
    pub fn new(
        sensor: ForceSensor,
        active: Box<dyn HardwareChannel>,
        exchange: Arc<StateExchange>,
    ) -> Self {
        Self {
            sensor,
            active,
            exchange,
        }
    }

    /// Sample first, then publish; the shared lock is never held while sampling.
    pub fn poll(&mut self) -> PressResult<()> {
        let reading = self.sensor.corrected_value();
        let active = self.active.read_digital();
        self.exchange
            .publish_status(reading.as_ref().ok().copied(), active.as_ref().ok().copied());
        reading?;
        active?;
        Ok(())
    }
}

/// Control task state: the regulator and the actuator it drives.
pub struct ControlStation {
    pub controller: ForceController,
    pub motion: MotionDriver,
    last_action: Option<Actuation>,
    exchange: Arc<StateExchange>,
}

impl ControlStation {
    pub fn new(motion: MotionDriver, exchange: Arc<StateExchange>) -> Self {
        Self {
            controller: ForceController::new(),
            motion,
            last_action: None,
            exchange,
        }
    }

    /// One control tick against the last published force; never samples.
    pub fn tick(&mut self) -> PressResult<()> {
        let force = self.exchange.force_kn();
        let target = self.exchange.target();
        if let Some(action) = self.controller.evaluate(force, &target, &mut self.motion)? {
            self.last_action = Some(action);
        }
        Ok(())
    }

    pub fn last_action(&self) -> Option<Actuation> {
        self.last_action
    }
}

/// Record task state: the session series.
pub struct RecordStation {
    pub recorder: SessionRecorder,
    exchange: Arc<StateExchange>,
}

impl RecordStation {
    pub fn new(exchange: Arc<StateExchange>) -> Self {
        Self {
            recorder: SessionRecorder::new(),
            exchange,
        }
    }

    pub fn tick(&mut self) -> PressResult<()> {
        let shared = self.exchange.read_state();
        let force = shared.reading.map(|r| r.corrected_kn);
        self.recorder.record_if_due(force, shared.recording);
        Ok(())
    }
}
