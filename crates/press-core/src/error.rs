use crate::limits::ConfigViolation;
use thiserror::Error;

/// Failures surfaced by the press core.
///
/// Stopping an idle actuator is not represented here: it is reported as
/// [`crate::hal::StopOutcome::NothingToStop`].
#[derive(Debug, Error)]
pub enum PressError {
    /// An actuator command was issued before the pulse generator was armed.
    #[error("actuator not ready: issue a start command before moving the press")]
    NotReady,

    /// The hardware backend is missing or a read failed.
    #[error("sensor unavailable: {reason}")]
    SensorUnavailable { reason: String },

    /// A configuration value was rejected; the previous value is kept.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigViolation),

    /// A hardware call on an open channel failed.
    #[error("hardware fault on channel {channel}: {reason}")]
    Hardware { channel: u8, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl PressError {
    pub fn sensor_unavailable(reason: impl Into<String>) -> Self {
        Self::SensorUnavailable {
            reason: reason.into(),
        }
    }

    pub fn hardware(channel: u8, reason: impl Into<String>) -> Self {
        Self::Hardware {
            channel,
            reason: reason.into(),
        }
    }

    /// Whether the operator can recover by re-issuing a command.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotReady | Self::InvalidConfig(_))
    }
}

pub type PressResult<T> = Result<T, PressError>;
