use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

/// Load-cell full scale in kN.
pub const FULL_SCALE_KN: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
pub struct Unvalidated;

#[derive(Debug, Clone, Copy)]
pub struct Validated;

/// A force target as requested by the operator, before or after validation.
#[derive(Debug, Clone, Copy)]
pub struct TargetRequest<State = Unvalidated> {
    target_kn: f64,
    deadband_kn: f64,
    _state: PhantomData<State>,
}

#[derive(Debug, Clone, Copy)]
pub struct ForceLimits {
    pub full_scale_kn: f64,
}

impl Default for ForceLimits {
    fn default() -> Self {
        Self {
            full_scale_kn: FULL_SCALE_KN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigViolation {
    #[error("target force {requested} kN is not a finite number")]
    NonFiniteTarget { requested: f64 },
    #[error("deadband {requested} kN must be finite and >= 0")]
    InvalidDeadband { requested: f64 },
    #[error("target force {requested} kN exceeds full scale of {limit} kN")]
    ExceedsFullScale { requested: f64, limit: f64 },
    #[error("pwm frequency must be > 0 Hz")]
    ZeroFrequency,
    #[error("pwm duty cycle {requested}% is outside 0-100%")]
    DutyOutOfRange { requested: f64 },
    #[error("sample count must be >= 1")]
    ZeroSampleCount,
    #[error("recording interval {requested}s must be finite and > 0")]
    InvalidInterval { requested: f64 },
}

/// Target force and tolerance window consumed by the control task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlTarget {
    pub target_kn: f64,
    pub deadband_kn: f64,
}

impl Default for ControlTarget {
    fn default() -> Self {
        Self {
            target_kn: 2.0,
            deadband_kn: 0.3,
        }
    }
}

impl TargetRequest<Unvalidated> {
    pub fn new(target_kn: f64, deadband_kn: f64) -> Self {
        Self {
            target_kn,
            deadband_kn,
            _state: PhantomData,
        }
    }

    pub fn validate(
        self,
        limits: &ForceLimits,
    ) -> Result<TargetRequest<Validated>, ConfigViolation> {
        if !self.target_kn.is_finite() {
            return Err(ConfigViolation::NonFiniteTarget {
                requested: self.target_kn,
            });
        }
        if !self.deadband_kn.is_finite() || self.deadband_kn < 0.0 {
            return Err(ConfigViolation::InvalidDeadband {
                requested: self.deadband_kn,
            });
        }
        if self.target_kn.abs() > limits.full_scale_kn {
            return Err(ConfigViolation::ExceedsFullScale {
                requested: self.target_kn,
                limit: limits.full_scale_kn,
            });
        }

        Ok(TargetRequest {
            target_kn: self.target_kn,
            deadband_kn: self.deadband_kn,
            _state: PhantomData,
        })
    }
}

impl TargetRequest<Validated> {
    pub fn into_target(self) -> ControlTarget {
        ControlTarget {
            target_kn: self.target_kn,
            deadband_kn: self.deadband_kn,
        }
    }
}

pub fn validate_interval(seconds: f64) -> Result<f64, ConfigViolation> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(ConfigViolation::InvalidInterval { requested: seconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_target() {
        let res = TargetRequest::new(f64::NAN, 0.3).validate(&ForceLimits::default());
        assert!(matches!(res, Err(ConfigViolation::NonFiniteTarget { .. })));
    }

    #[test]
    fn rejects_negative_deadband() {
        let res = TargetRequest::new(2.0, -0.1).validate(&ForceLimits::default());
        assert!(matches!(res, Err(ConfigViolation::InvalidDeadband { .. })));
    }

    #[test]
    fn rejects_target_beyond_full_scale() {
        let res = TargetRequest::new(50.5, 0.3).validate(&ForceLimits::default());
        assert_eq!(
            res.err(),
            Some(ConfigViolation::ExceedsFullScale {
                requested: 50.5,
                limit: 50.0
            })
        );
    }

    #[test]
    fn accepts_zero_deadband() {
        let target = TargetRequest::new(2.0, 0.0)
            .validate(&ForceLimits::default())
            .unwrap()
            .into_target();
        assert_eq!(target.deadband_kn, 0.0);
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(validate_interval(0.0).is_err());
        assert!(validate_interval(f64::INFINITY).is_err());
        assert_eq!(validate_interval(2.0), Ok(2.0));
    }
}
