use crate::control_loop::{ControlConfig, ControlStation, RecordStation, StatusStation};
use crate::controller::{Actuation, ActuationCounts, RegulationState};
use crate::error::{PressError, PressResult};
use crate::hal::{ChannelFactory, PressIo, PwmConfig, StopOutcome};
use crate::limits::{validate_interval, ConfigViolation, ControlTarget, TargetRequest};
use crate::motion::{Motion, MotionDriver};
use crate::recorder::write_csv;
use crate::scheduler::{PeriodicTask, TaskKind, TaskState, TaskStats};
use crate::sensor::ForceSensor;
use crate::sync::{SharedSnapshot, StateExchange};
use crate::tags::{self, Tag};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskTelemetry {
    pub state: TaskState,
    #[serde(flatten)]
    pub stats: TaskStats,
}

/// Everything an operator surface shows about the press at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub backend: &'static str,
    pub force_kn: Option<f64>,
    pub raw_sample: Option<f64>,
    pub active: bool,
    pub target: ControlTarget,
    pub regulation: RegulationState,
    pub last_action: Option<Actuation>,
    pub actuations: ActuationCounts,
    pub armed: bool,
    pub enabled: bool,
    pub recording: bool,
    pub record_interval_s: f64,
    pub recorded_samples: usize,
    pub status_task: TaskTelemetry,
    pub control_task: TaskTelemetry,
    pub record_task: TaskTelemetry,
}

impl Telemetry {
    /// Numeric value published under `tag`. `None` before the first reading
    /// and for tags this snapshot does not carry.
    pub fn scalar(&self, tag: &Tag) -> Option<f64> {
        let regulation = match self.regulation {
            RegulationState::Idle => 0.0,
            RegulationState::Regulating => 1.0,
            RegulationState::Paused => 2.0,
        };
        [
            (tags::FORCE_KN, self.force_kn),
            (tags::TARGET_KN, Some(self.target.target_kn)),
            (tags::DEADBAND_KN, Some(self.target.deadband_kn)),
            (tags::ACTIVE, Some(if self.active { 1.0 } else { 0.0 })),
            (tags::RECORDED_SAMPLES, Some(self.recorded_samples as f64)),
            (tags::REGULATION_STATE, Some(regulation)),
        ]
        .into_iter()
        .find(|(known, _)| known.key == tag.key)
        .and_then(|(_, value)| value)
    }
}

/// Command and telemetry surface of one press.
///
/// Owns the status, control and record tasks. Commands only touch shared
/// configuration or go through a task's own lock, so they are picked up at the
/// next tick.
pub struct Press {
    backend: &'static str,
    config: ControlConfig,
    exchange: Arc<StateExchange>,
    status: PeriodicTask<StatusStation>,
    control: PeriodicTask<ControlStation>,
    record: PeriodicTask<RecordStation>,
}

impl Press {
    pub fn new(factory: &dyn ChannelFactory, config: ControlConfig) -> PressResult<Self> {
        config.validate()?;
        let target = TargetRequest::new(config.target.target_kn, config.target.deadband_kn)
            .validate(&config.limits)?
            .into_target();
        let interval = interval_from_secs(config.record_interval.as_secs_f64())?;

        let io = PressIo::open(factory, &config.pins)?;
        let sensor = ForceSensor::new(io.load_cell, config.samples_per_reading)?;
        let motion = MotionDriver::new(io.pulse, io.direction, io.enable, config.settle);

        let exchange = Arc::new(StateExchange::new(SharedSnapshot {
            target,
            record_interval: interval,
            ..SharedSnapshot::default()
        }));

        let status = PeriodicTask::new(
            TaskKind::Status.name(),
            StatusStation::new(sensor, io.active, Arc::clone(&exchange)),
            config.status_period,
            StatusStation::poll,
        );
        let control = PeriodicTask::new(
            TaskKind::Control.name(),
            ControlStation::new(motion, Arc::clone(&exchange)),
            config.control_period,
            ControlStation::tick,
        );
        let record = PeriodicTask::new(
            TaskKind::Record.name(),
            RecordStation::new(Arc::clone(&exchange)),
            interval,
            RecordStation::tick,
        );

        log::info!(
            "press ready on {} backend (target {} kN +/- {} kN)",
            factory.backend_name(),
            target.target_kn,
            target.deadband_kn
        );
        Ok(Self {
            backend: factory.backend_name(),
            config,
            exchange,
            status,
            control,
            record,
        })
    }

    /// Start polling the sensor. Regulation and recording start on command.
    pub fn start(&self) -> PressResult<bool> {
        self.status.start()
    }

    pub fn set_pwm_config(&self, frequency_hz: u32, duty_cycle_pct: f64) -> PressResult<()> {
        let config = PwmConfig::new(frequency_hz, duty_cycle_pct)?;
        self.control.with_state(|s| s.motion.set_pwm_config(config));
        Ok(())
    }

    pub fn pwm_config(&self) -> PwmConfig {
        self.control.with_state(|s| s.motion.pwm_config())
    }

    pub fn start_actuator(&self) -> PressResult<()> {
        self.control.with_state(|s| s.motion.arm())
    }

    pub fn stop_actuator(&self) -> PressResult<StopOutcome> {
        self.control.with_state(|s| s.motion.stop_pulse())
    }

    /// Manual move: the pulse train keeps running until `stop_actuator`.
    pub fn move_press(&self, down: bool) -> PressResult<()> {
        self.control
            .with_state(|s| s.motion.move_direction(down, Motion::Continuous))
    }

    pub fn engage_enable(&self) -> PressResult<()> {
        self.control.with_state(|s| s.motion.engage_enable())
    }

    pub fn disengage_enable(&self) -> PressResult<()> {
        self.control.with_state(|s| s.motion.disengage_enable())
    }

    /// Validate and publish a new target; the previous one is kept on error.
    pub fn set_target(&self, target_kn: f64) -> PressResult<ControlTarget> {
        let deadband_kn = self.exchange.target().deadband_kn;
        self.replace_target(target_kn, deadband_kn)
    }

    pub fn set_deadband(&self, deadband_kn: f64) -> PressResult<ControlTarget> {
        let target_kn = self.exchange.target().target_kn;
        self.replace_target(target_kn, deadband_kn)
    }

    fn replace_target(&self, target_kn: f64, deadband_kn: f64) -> PressResult<ControlTarget> {
        let target = TargetRequest::new(target_kn, deadband_kn)
            .validate(&self.config.limits)?
            .into_target();
        self.exchange.set_target(target);
        log::info!(
            "target set to {} kN +/- {} kN",
            target.target_kn,
            target.deadband_kn
        );
        Ok(target)
    }

    /// Engage the regulator and run the control task.
    ///
    /// Fails with `NotReady` until the actuator has been started.
    pub fn start_regulation(&self) -> PressResult<bool> {
        let engaged = self.control.with_state(|s| {
            if !s.motion.is_armed() {
                return Err(PressError::NotReady);
            }
            Ok(s.controller.engage())
        })?;
        let started = self.control.start()?;
        Ok(engaged || started)
    }

    pub fn pause_regulation(&self) -> bool {
        let paused = self.control.pause();
        self.control.with_state(|s| s.controller.pause()) || paused
    }

    /// Enable recording every `interval_s` seconds and run the record task.
    pub fn start_recording(&self, interval_s: f64) -> PressResult<bool> {
        let interval = interval_from_secs(interval_s)?;
        self.exchange.set_record_interval(interval);
        self.record.set_period(interval);
        self.exchange.set_recording(true);
        self.record.start()
    }

    pub fn pause_recording(&self) -> bool {
        self.exchange.set_recording(false);
        self.record.pause()
    }

    pub fn clear_recording(&self) {
        self.record.with_state(|s| s.recorder.clear());
    }

    pub fn recorded_samples(&self) -> usize {
        self.record.with_state(|s| s.recorder.len())
    }

    /// Write the series recorded so far. The file is written outside the
    /// recorder lock, so sampling continues during a slow write.
    pub fn export_recording(&self, path: &Path) -> PressResult<usize> {
        let samples = self.record.with_state(|s| s.recorder.snapshot());
        write_csv(&samples, path)
    }

    /// Stop every task, halt the actuator and release the enable line.
    pub fn stop_all(&self) -> PressResult<()> {
        self.control.stop();
        self.exchange.set_recording(false);
        self.record.stop();
        self.status.stop();

        self.control.with_state(|s| {
            s.controller.stop();
            if s.motion.halt()? == StopOutcome::Stopped {
                log::info!("pulse train stopped");
            }
            s.motion.disengage_enable()
        })?;
        log::info!("press stopped");
        Ok(())
    }

    pub fn start_task(&self, kind: TaskKind) -> PressResult<bool> {
        match kind {
            TaskKind::Status => self.status.start(),
            TaskKind::Control => self.start_regulation(),
            TaskKind::Record => {
                let interval = self.exchange.read_state().record_interval;
                self.start_recording(interval.as_secs_f64())
            }
        }
    }

    pub fn pause_task(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Status => self.status.pause(),
            TaskKind::Control => self.pause_regulation(),
            TaskKind::Record => self.pause_recording(),
        }
    }

    pub fn stop_task(&self, kind: TaskKind) -> PressResult<bool> {
        match kind {
            TaskKind::Status => Ok(self.status.stop()),
            TaskKind::Control => {
                let stopped = self.control.stop();
                self.control.with_state(|s| {
                    s.controller.stop();
                    s.motion.stop_pulse()
                })?;
                Ok(stopped)
            }
            TaskKind::Record => {
                self.exchange.set_recording(false);
                Ok(self.record.stop())
            }
        }
    }

    /// Continue a paused task. A stopped task stays stopped.
    pub fn resume_task(&self, kind: TaskKind) -> PressResult<bool> {
        if self.task_state(kind) == TaskState::Stopped {
            log::info!("{} task is stopped; use start instead", kind.name());
            return Ok(false);
        }
        match kind {
            TaskKind::Status => self.status.resume(),
            TaskKind::Control => self.start_regulation(),
            TaskKind::Record => {
                self.exchange.set_recording(true);
                self.record.resume()
            }
        }
    }

    pub fn task_state(&self, kind: TaskKind) -> TaskState {
        match kind {
            TaskKind::Status => self.status.state(),
            TaskKind::Control => self.control.state(),
            TaskKind::Record => self.record.state(),
        }
    }

    pub fn regulation_state(&self) -> RegulationState {
        self.control.with_state(|s| s.controller.state())
    }

    pub fn telemetry(&self) -> Telemetry {
        let shared = self.exchange.read_state();
        let (regulation, last_action, actuations, armed, enabled) = self.control.with_state(|s| {
            (
                s.controller.state(),
                s.last_action(),
                s.controller.counts(),
                s.motion.is_armed(),
                s.motion.is_enabled(),
            )
        });

        Telemetry {
            backend: self.backend,
            force_kn: shared.reading.map(|r| r.corrected_kn),
            raw_sample: shared.reading.map(|r| r.raw_sample),
            active: shared.active,
            target: shared.target,
            regulation,
            last_action,
            actuations,
            armed,
            enabled,
            recording: shared.recording,
            record_interval_s: shared.record_interval.as_secs_f64(),
            recorded_samples: self.recorded_samples(),
            status_task: TaskTelemetry {
                state: self.status.state(),
                stats: self.status.stats(),
            },
            control_task: TaskTelemetry {
                state: self.control.state(),
                stats: self.control.stats(),
            },
            record_task: TaskTelemetry {
                state: self.record.state(),
                stats: self.record.stats(),
            },
        }
    }
}

fn interval_from_secs(seconds: f64) -> PressResult<Duration> {
    let seconds = validate_interval(seconds)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ConfigViolation::InvalidInterval { requested: seconds }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::PinMap;
    use crate::hal_sim::{SimBackend, SimBench, SimEvent};
    use crate::tags;
    use std::thread;
    use std::time::Instant;
    use tempfile::tempdir;

    fn fast_config() -> ControlConfig {
        ControlConfig {
            status_period: Duration::from_millis(1),
            control_period: Duration::from_millis(5),
            samples_per_reading: 3,
            settle: Duration::ZERO,
            ..ControlConfig::default()
        }
    }

    fn sim_press() -> (Press, SimBench) {
        let bench = SimBench::new(PinMap::default()).with_noise(0.0);
        let backend = SimBackend::new(bench.clone());
        (Press::new(&backend, fast_config()).unwrap(), bench)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn regulation_requires_started_actuator() {
        let (press, _bench) = sim_press();
        assert!(matches!(press.start_regulation(), Err(PressError::NotReady)));
        assert_eq!(press.task_state(TaskKind::Control), TaskState::Stopped);
        assert_eq!(press.regulation_state(), RegulationState::Idle);
    }

    #[test]
    fn closed_loop_settles_inside_band() {
        let (press, bench) = sim_press();
        bench.set_force(1.0);
        press.start().unwrap();
        press.start_actuator().unwrap();
        press.start_regulation().unwrap();

        wait_for(|| {
            let t = press.telemetry();
            t.actuations.hold > 0 && (1.7..=2.3).contains(&bench.force())
        });
        press.stop_all().unwrap();

        let telemetry = press.telemetry();
        assert!(telemetry.actuations.up >= 6, "{:?}", telemetry.actuations);
        assert_eq!(telemetry.regulation, RegulationState::Idle);
        assert!(!telemetry.armed);
        assert_eq!(telemetry.control_task.state, TaskState::Stopped);
        assert!(bench.pin(4).pwm.is_none());
    }

    #[test]
    fn high_force_drives_down() {
        let (press, bench) = sim_press();
        bench.set_force(5.0);
        press.start().unwrap();
        wait_for(|| press.telemetry().force_kn.is_some());
        press.start_actuator().unwrap();
        press.start_regulation().unwrap();

        wait_for(|| press.telemetry().actuations.down > 0);
        press.pause_regulation();

        assert!(bench.force() < 5.0);
        assert_eq!(press.regulation_state(), RegulationState::Paused);
        assert!(bench.events().contains(&SimEvent::High(18)));
        press.stop_all().unwrap();
    }

    #[test]
    fn invalid_target_keeps_previous() {
        let (press, _bench) = sim_press();
        press.set_target(3.0).unwrap();
        assert!(matches!(
            press.set_target(f64::NAN),
            Err(PressError::InvalidConfig(ConfigViolation::NonFiniteTarget { .. }))
        ));
        assert!(press.set_target(75.0).is_err());
        assert!(press.set_deadband(-0.1).is_err());
        assert_eq!(
            press.telemetry().target,
            ControlTarget {
                target_kn: 3.0,
                deadband_kn: 0.3
            }
        );
    }

    #[test]
    fn invalid_pwm_config_keeps_previous() {
        let (press, _bench) = sim_press();
        press.set_pwm_config(2_000, 20.0).unwrap();
        assert!(press.set_pwm_config(0, 20.0).is_err());
        assert!(press.set_pwm_config(2_000, 120.0).is_err());
        assert_eq!(press.pwm_config(), PwmConfig::new(2_000, 20.0).unwrap());
    }

    #[test]
    fn manual_move_runs_until_stopped() {
        let (press, bench) = sim_press();
        assert!(matches!(press.move_press(true), Err(PressError::NotReady)));

        press.start_actuator().unwrap();
        press.engage_enable().unwrap();
        press.move_press(false).unwrap();
        assert!(bench.pin(4).pwm.is_some());
        assert!(bench.pin(24).level);

        assert_eq!(press.stop_actuator().unwrap(), StopOutcome::Stopped);
        assert_eq!(press.stop_actuator().unwrap(), StopOutcome::NothingToStop);
        press.disengage_enable().unwrap();
        assert!(!bench.pin(24).level);
    }

    #[test]
    fn recording_round_trip() {
        let (press, bench) = sim_press();
        bench.set_force(12.5);
        press.start().unwrap();
        wait_for(|| press.telemetry().force_kn.is_some());

        assert!(press.start_recording(0.005).unwrap());
        wait_for(|| press.recorded_samples() >= 3);
        assert!(press.pause_recording());
        let recorded = press.recorded_samples();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(press.recorded_samples(), recorded);

        let dir = tempdir().unwrap();
        let path = dir.path().join("session.csv");
        assert_eq!(press.export_recording(&path).unwrap(), recorded);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, tags::EXPORT_COLUMNS.to_vec());
        let forces: Vec<f64> = reader
            .records()
            .map(|r| r.unwrap()[2].parse().unwrap())
            .collect();
        assert_eq!(forces.len(), recorded);
        assert!(forces.iter().all(|f| (f - 12.5).abs() < 1e-3));

        press.clear_recording();
        assert_eq!(press.recorded_samples(), 0);
        press.stop_all().unwrap();
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let (press, _bench) = sim_press();
        assert!(press.start_recording(0.0).is_err());
        assert!(press.start_recording(f64::INFINITY).is_err());
        assert_eq!(press.task_state(TaskKind::Record), TaskState::Stopped);
        assert!(!press.telemetry().recording);
    }

    #[test]
    fn resume_of_stopped_task_is_ignored() {
        let (press, _bench) = sim_press();
        assert!(!press.resume_task(TaskKind::Status).unwrap());
        assert_eq!(press.task_state(TaskKind::Status), TaskState::Stopped);

        press.start_task(TaskKind::Status).unwrap();
        assert!(press.pause_task(TaskKind::Status));
        assert!(press.resume_task(TaskKind::Status).unwrap());
        assert_eq!(press.task_state(TaskKind::Status), TaskState::Running);
        press.stop_all().unwrap();
        assert!(TaskKind::ALL
            .iter()
            .all(|&kind| press.task_state(kind) == TaskState::Stopped));
    }

    #[test]
    fn stop_all_on_idle_press_is_quiet() {
        let (press, bench) = sim_press();
        press.stop_all().unwrap();
        assert_eq!(bench.events(), vec![SimEvent::Low(24)]);
    }

    #[test]
    fn telemetry_serializes_task_states() {
        let (press, _bench) = sim_press();
        let json = serde_json::to_value(press.telemetry()).unwrap();
        assert_eq!(json["status_task"]["state"], "stopped");
        assert_eq!(json["regulation"], "idle");
        assert_eq!(json["backend"], "simulated");
        assert!(json["force_kn"].is_null());
    }

    #[test]
    fn telemetry_scalars_follow_tags() {
        let (press, _bench) = sim_press();
        press.set_target(4.0).unwrap();
        let telemetry = press.telemetry();

        assert_eq!(telemetry.scalar(&tags::FORCE_KN), None);
        assert_eq!(telemetry.scalar(&tags::TARGET_KN), Some(4.0));
        assert_eq!(telemetry.scalar(&tags::DEADBAND_KN), Some(0.3));
        assert_eq!(telemetry.scalar(&tags::ACTIVE), Some(0.0));
        assert_eq!(telemetry.scalar(&tags::REGULATION_STATE), Some(0.0));
    }

    #[test]
    fn slow_load_cell_does_not_block_commands() {
        let bench = SimBench::new(PinMap::default())
            .with_noise(0.0)
            .with_sample_delay(Duration::from_millis(300));
        let backend = SimBackend::new(bench);
        let press = Press::new(&backend, fast_config()).unwrap();
        press.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let begin = Instant::now();
        press.set_target(5.0).unwrap();
        let telemetry = press.telemetry();
        assert!(begin.elapsed() < Duration::from_millis(150));
        assert_eq!(telemetry.target.target_kn, 5.0);
        assert_eq!(telemetry.status_task.state, TaskState::Running);

        press.stop_all().unwrap();
    }

    #[test]
    fn clear_and_export_race_with_recording() {
        let (press, bench) = sim_press();
        bench.set_force(8.0);
        press.start().unwrap();
        wait_for(|| press.telemetry().force_kn.is_some());
        press.start_recording(0.001).unwrap();

        let dir = tempdir().unwrap();
        let mut exported = 0;
        thread::scope(|scope| {
            let clearer = scope.spawn(|| {
                for _ in 0..50 {
                    press.clear_recording();
                    thread::sleep(Duration::from_millis(3));
                }
            });

            for round in 0..50 {
                let path = dir.path().join(format!("round-{round}.csv"));
                let written = press.export_recording(&path).unwrap();

                let mut reader = csv::Reader::from_path(&path).unwrap();
                let elapsed: Vec<f64> = reader
                    .records()
                    .map(|r| r.unwrap()[1].parse().unwrap())
                    .collect();
                assert_eq!(elapsed.len(), written);
                if let Some(first) = elapsed.first() {
                    assert_eq!(*first, 0.0, "round {round}: {elapsed:?}");
                }
                assert!(elapsed.windows(2).all(|w| w[1] >= w[0]), "{elapsed:?}");
                exported += written;
                thread::sleep(Duration::from_millis(2));
            }

            clearer.join().unwrap();
        });

        assert!(exported > 0);
        press.stop_all().unwrap();
    }
}
