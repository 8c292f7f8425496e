use crate::error::{PressError, PressResult};
use crate::hal::{HardwareChannel, PwmConfig, StopOutcome};
use std::thread;
use std::time::Duration;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Start and immediately stop the pulse train: one bounded nudge.
    Burst,
    /// Leave the pulse train running until the next stop.
    Continuous,
}

/// Sequences the direction, enable and pulse lines of the actuator.
pub struct MotionDriver {
    pulse: Box<dyn HardwareChannel>,
    direction: Box<dyn HardwareChannel>,
    enable: Box<dyn HardwareChannel>,
    pwm: PwmConfig,
    settle: Duration,
    armed: bool,
    enabled: bool,
}

impl MotionDriver {
    pub fn new(
        pulse: Box<dyn HardwareChannel>,
        direction: Box<dyn HardwareChannel>,
        enable: Box<dyn HardwareChannel>,
        settle: Duration,
    ) -> Self {
        Self {
            pulse,
            direction,
            enable,
            pwm: PwmConfig::default(),
            settle,
            armed: false,
            enabled: false,
        }
    }

    pub fn pwm_config(&self) -> PwmConfig {
        self.pwm
    }

    /// Replace the PWM settings. Takes effect at the next pulse start.
    pub fn set_pwm_config(&mut self, config: PwmConfig) {
        log::info!(
            "pwm config {} Hz / {}% -> {} Hz / {}%",
            self.pwm.frequency_hz(),
            self.pwm.duty_cycle_pct(),
            config.frequency_hz(),
            config.duty_cycle_pct()
        );
        self.pwm = config;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Prepare the pulse generator so moves are accepted.
    pub fn arm(&mut self) -> PressResult<()> {
        if let StopOutcome::Stopped = self.pulse.stop_pwm()? {
            log::debug!("pulse generator reset on arm");
        }
        self.armed = true;
        log::info!("actuator ready");
        Ok(())
    }

    /// Stop any running pulse train. The actuator stays armed.
    pub fn stop_pulse(&mut self) -> PressResult<StopOutcome> {
        let outcome = self.pulse.stop_pwm()?;
        if outcome == StopOutcome::NothingToStop {
            log::trace!("stop requested with no pulse running");
        }
        Ok(outcome)
    }

    /// Stop pulses and require a fresh `arm` before the next move.
    pub fn halt(&mut self) -> PressResult<StopOutcome> {
        let outcome = self.stop_pulse()?;
        self.armed = false;
        Ok(outcome)
    }

    pub fn engage_enable(&mut self) -> PressResult<()> {
        self.enable.set_high()?;
        self.enabled = true;
        Ok(())
    }

    pub fn disengage_enable(&mut self) -> PressResult<()> {
        self.enable.set_low()?;
        self.enabled = false;
        Ok(())
    }

    /// Drive the press one step. `down` reduces force.
    ///
    /// The pulse is stopped and the direction line changed with a settle delay
    /// on each side so the driver never sees overlapping transitions.
    pub fn move_direction(&mut self, down: bool, motion: Motion) -> PressResult<()> {
        if !self.armed {
            return Err(PressError::NotReady);
        }

        self.stop_pulse()?;
        self.settle();
        if down {
            self.direction.set_high()?;
        } else {
            self.direction.set_low()?;
        }
        self.settle();
        self.pulse.start_pwm(&self.pwm)?;

        if motion == Motion::Burst {
            self.pulse.stop_pwm()?;
        }
        Ok(())
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}
