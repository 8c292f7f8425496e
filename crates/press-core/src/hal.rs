use crate::error::PressResult;
use crate::limits::ConfigViolation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Digital,
    Pwm,
}

/// A single pin (or remote I/O address) bound to exactly one channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u8,
    pub direction: Direction,
    pub mode: Mode,
}

impl Channel {
    pub fn digital_out(id: u8) -> Self {
        Self {
            id,
            direction: Direction::Out,
            mode: Mode::Digital,
        }
    }

    pub fn pwm_out(id: u8) -> Self {
        Self {
            id,
            direction: Direction::Out,
            mode: Mode::Pwm,
        }
    }

    pub fn digital_in(id: u8) -> Self {
        Self {
            id,
            direction: Direction::In,
            mode: Mode::Digital,
        }
    }
}

/// Pulse generator settings applied at every pulse start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PwmConfig {
    frequency_hz: u32,
    duty_cycle_pct: f64,
}

impl PwmConfig {
    pub fn new(frequency_hz: u32, duty_cycle_pct: f64) -> Result<Self, ConfigViolation> {
        if frequency_hz == 0 {
            return Err(ConfigViolation::ZeroFrequency);
        }
        if !(0.0..=100.0).contains(&duty_cycle_pct) {
            return Err(ConfigViolation::DutyOutOfRange {
                requested: duty_cycle_pct,
            });
        }
        Ok(Self {
            frequency_hz,
            duty_cycle_pct,
        })
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn duty_cycle_pct(&self) -> f64 {
        self.duty_cycle_pct
    }
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 10_000,
            duty_cycle_pct: 50.0,
        }
    }
}

/// Result of a stop request. Stopping an idle generator is a normal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NothingToStop,
}

/// Uniform capability set over real and simulated pins.
pub trait HardwareChannel: Send {
    fn set_high(&mut self) -> PressResult<()>;
    fn set_low(&mut self) -> PressResult<()>;
    fn start_pwm(&mut self, config: &PwmConfig) -> PressResult<()>;
    fn stop_pwm(&mut self) -> PressResult<StopOutcome>;
    fn read_digital(&mut self) -> PressResult<bool>;
}

/// Analog force source (load-cell ADC). Sampling blocks for the conversion time.
pub trait LoadCell: Send {
    fn read_raw(&mut self, samples: usize) -> PressResult<Vec<i32>>;
}

/// Wiring of the press; pin numbers for a local header or remote I/O addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    pub pulse: u8,
    pub enable: u8,
    pub direction: u8,
    pub active: u8,
    pub load_cell_dout: u8,
    pub load_cell_sck: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            pulse: 4,
            enable: 24,
            direction: 18,
            active: 23,
            load_cell_dout: 21,
            load_cell_sck: 20,
        }
    }
}

/// Opens channels for one backend. Resolved once at startup and handed to the press.
pub trait ChannelFactory {
    fn backend_name(&self) -> &'static str;
    fn open_channel(&self, channel: Channel) -> PressResult<Box<dyn HardwareChannel>>;
    fn open_load_cell(&self, pins: &PinMap) -> PressResult<Box<dyn LoadCell>>;
}

/// Every channel the press needs, opened from one factory.
pub struct PressIo {
    pub pulse: Box<dyn HardwareChannel>,
    pub enable: Box<dyn HardwareChannel>,
    pub direction: Box<dyn HardwareChannel>,
    pub active: Box<dyn HardwareChannel>,
    pub load_cell: Box<dyn LoadCell>,
}

impl PressIo {
    pub fn open(factory: &dyn ChannelFactory, pins: &PinMap) -> PressResult<Self> {
        Ok(Self {
            pulse: factory.open_channel(Channel::pwm_out(pins.pulse))?,
            enable: factory.open_channel(Channel::digital_out(pins.enable))?,
            direction: factory.open_channel(Channel::digital_out(pins.direction))?,
            active: factory.open_channel(Channel::digital_in(pins.active))?,
            load_cell: factory.open_load_cell(pins)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pwm_config_rejects_zero_frequency() {
        assert_eq!(PwmConfig::new(0, 50.0), Err(ConfigViolation::ZeroFrequency));
    }

    #[test]
    fn pwm_config_duty_bounds_are_inclusive() {
        assert!(PwmConfig::new(100, 0.0).is_ok());
        assert!(PwmConfig::new(100, 100.0).is_ok());
        assert!(matches!(
            PwmConfig::new(100, 100.5),
            Err(ConfigViolation::DutyOutOfRange { .. })
        ));
        assert!(PwmConfig::new(100, f64::NAN).is_err());
    }
}
