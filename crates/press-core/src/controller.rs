use crate::error::PressResult;
use crate::limits::ControlTarget;
use crate::motion::{Motion, MotionDriver};
use serde::Serialize;

/// Correction chosen for one control tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuation {
    /// Force above the band: drive down to reduce it.
    Down,
    /// Force below the band: drive up to increase it.
    Up,
    /// Within the band (boundaries included): no correction.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationState {
    #[default]
    Idle,
    Regulating,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActuationCounts {
    pub up: u64,
    pub down: u64,
    pub hold: u64,
}

/// Three-zone bang-bang law. The deadband edges count as inside the band.
pub fn decide(force_kn: f64, target: &ControlTarget) -> Actuation {
    if force_kn > target.target_kn + target.deadband_kn {
        Actuation::Down
    } else if force_kn < target.target_kn - target.deadband_kn {
        Actuation::Up
    } else {
        Actuation::Hold
    }
}

#[derive(Debug, Default)]
pub struct ForceController {
    state: RegulationState,
    counts: ActuationCounts,
}

impl ForceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RegulationState {
        self.state
    }

    pub fn counts(&self) -> ActuationCounts {
        self.counts
    }

    /// Idle or Paused -> Regulating. Returns false if already regulating.
    pub fn engage(&mut self) -> bool {
        if self.state == RegulationState::Regulating {
            log::info!("regulation already engaged");
            return false;
        }
        log::info!("regulation engaged (was {:?})", self.state);
        self.state = RegulationState::Regulating;
        true
    }

    pub fn resume(&mut self) -> bool {
        self.engage()
    }

    pub fn pause(&mut self) -> bool {
        if self.state != RegulationState::Regulating {
            log::info!("regulation not running, nothing to pause");
            return false;
        }
        self.state = RegulationState::Paused;
        log::info!("regulation paused");
        true
    }

    pub fn stop(&mut self) {
        if self.state != RegulationState::Idle {
            log::info!("regulation stopped");
        }
        self.state = RegulationState::Idle;
    }

    /// Run one control tick against the last known force.
    ///
    /// Returns `None` when not regulating. A missing reading holds. Every
    /// branch leaves the pulse output stopped.
    pub fn evaluate(
        &mut self,
        force_kn: Option<f64>,
        target: &ControlTarget,
        motion: &mut MotionDriver,
    ) -> PressResult<Option<Actuation>> {
        if self.state != RegulationState::Regulating {
            return Ok(None);
        }

        let action = match force_kn {
            Some(force) => decide(force, target),
            None => Actuation::Hold,
        };

        match action {
            Actuation::Down => {
                motion.move_direction(true, Motion::Burst)?;
                self.counts.down += 1;
            }
            Actuation::Up => {
                motion.move_direction(false, Motion::Burst)?;
                self.counts.up += 1;
            }
            Actuation::Hold => {
                motion.stop_pulse()?;
                self.counts.hold += 1;
            }
        }
        log::trace!("force {force_kn:?} kN vs target {target:?}: {action:?}");
        Ok(Some(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PressError;
    use crate::hal::{Channel, ChannelFactory, PinMap};
    use crate::hal_sim::{SimBackend, SimBench, SimEvent};
    use std::time::Duration;

    fn target() -> ControlTarget {
        ControlTarget {
            target_kn: 2.0,
            deadband_kn: 0.3,
        }
    }

    fn rig() -> (MotionDriver, SimBench) {
        let pins = PinMap::default();
        let backend = SimBackend::new(SimBench::new(pins));
        let motion = MotionDriver::new(
            backend.open_channel(Channel::pwm_out(pins.pulse)).unwrap(),
            backend.open_channel(Channel::digital_out(pins.direction)).unwrap(),
            backend.open_channel(Channel::digital_out(pins.enable)).unwrap(),
            Duration::ZERO,
        );
        (motion, backend.bench().clone())
    }

    #[test]
    fn deadband_edges_do_not_actuate() {
        let t = ControlTarget {
            target_kn: 2.0,
            deadband_kn: 0.25,
        };
        assert_eq!(decide(2.25, &t), Actuation::Hold);
        assert_eq!(decide(1.75, &t), Actuation::Hold);
        assert_eq!(decide(2.250001, &t), Actuation::Down);
        assert_eq!(decide(1.749999, &t), Actuation::Up);
    }

    #[test]
    fn zero_deadband_holds_only_on_target() {
        let t = ControlTarget {
            target_kn: 1.0,
            deadband_kn: 0.0,
        };
        assert_eq!(decide(1.0, &t), Actuation::Hold);
        assert_eq!(decide(1.0001, &t), Actuation::Down);
        assert_eq!(decide(0.9999, &t), Actuation::Up);
    }

    #[test]
    fn idle_controller_does_nothing() {
        let (mut motion, bench) = rig();
        motion.arm().unwrap();
        let mut controller = ForceController::new();

        let result = controller.evaluate(Some(5.0), &target(), &mut motion).unwrap();

        assert_eq!(result, None);
        assert!(bench.events().is_empty());
    }

    #[test]
    fn synthetic_sequence_maps_to_actuations() {
        let (mut motion, bench) = rig();
        motion.arm().unwrap();
        let mut controller = ForceController::new();
        controller.engage();

        let actions: Vec<_> = [1.0, 1.5, 1.8, 2.0, 2.2, 2.5]
            .into_iter()
            .map(|f| {
                controller
                    .evaluate(Some(f), &target(), &mut motion)
                    .unwrap()
                    .unwrap()
            })
            .collect();

        assert_eq!(
            actions,
            vec![
                Actuation::Up,
                Actuation::Up,
                Actuation::Hold,
                Actuation::Hold,
                Actuation::Hold,
                Actuation::Down
            ]
        );
        assert_eq!(
            controller.counts(),
            ActuationCounts {
                up: 2,
                down: 1,
                hold: 3
            }
        );
        assert!(bench.pin(4).pwm.is_none());
    }

    #[test]
    fn each_correction_is_a_single_burst() {
        let (mut motion, bench) = rig();
        motion.arm().unwrap();
        let mut controller = ForceController::new();
        controller.engage();

        controller.evaluate(Some(3.0), &target(), &mut motion).unwrap();

        let events = bench.take_events();
        let starts = events
            .iter()
            .filter(|e| matches!(e, SimEvent::PwmStart { .. }))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(events.last(), Some(&SimEvent::PwmStop { pin: 4 }));
    }

    #[test]
    fn missing_reading_holds() {
        let (mut motion, _bench) = rig();
        let mut controller = ForceController::new();
        controller.engage();
        assert_eq!(
            controller.evaluate(None, &target(), &mut motion).unwrap(),
            Some(Actuation::Hold)
        );
    }

    #[test]
    fn unarmed_actuator_surfaces_not_ready() {
        let (mut motion, _bench) = rig();
        let mut controller = ForceController::new();
        controller.engage();
        assert!(matches!(
            controller.evaluate(Some(0.0), &target(), &mut motion),
            Err(PressError::NotReady)
        ));
    }

    #[test]
    fn state_transitions() {
        let mut controller = ForceController::new();
        assert_eq!(controller.state(), RegulationState::Idle);
        assert!(!controller.pause());

        assert!(controller.engage());
        assert!(!controller.engage());
        assert_eq!(controller.state(), RegulationState::Regulating);

        assert!(controller.pause());
        assert_eq!(controller.state(), RegulationState::Paused);
        assert!(controller.resume());
        assert_eq!(controller.state(), RegulationState::Regulating);

        controller.stop();
        assert_eq!(controller.state(), RegulationState::Idle);
    }
}
