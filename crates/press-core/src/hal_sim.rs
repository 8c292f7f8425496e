use crate::error::{PressError, PressResult};
use crate::hal::{
    Channel, ChannelFactory, Direction, HardwareChannel, LoadCell, Mode, PinMap, PwmConfig,
    StopOutcome,
};
use crate::limits::FULL_SCALE_KN;
use crate::sensor::ADC_COUNTS;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Observable effects of simulated channel calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    High(u8),
    Low(u8),
    PwmStart { pin: u8, config: PwmConfig },
    PwmStop { pin: u8 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PinState {
    pub level: bool,
    pub pwm: Option<PwmConfig>,
}

#[derive(Debug)]
struct BenchState {
    pins: PinMap,
    outputs: HashMap<u8, PinState>,
    inputs: HashMap<u8, bool>,
    events: Vec<SimEvent>,
    force_kn: f64,
    step_kn: f64,
    noise_kn: f64,
    fixture: VecDeque<f64>,
    sample_delay: Duration,
}

impl BenchState {
    /// One pulse burst nudges the modelled force; direction high means "down".
    fn apply_burst(&mut self) {
        let down = self
            .outputs
            .get(&self.pins.direction)
            .map(|p| p.level)
            .unwrap_or(false);
        let delta = if down { -self.step_kn } else { self.step_kn };
        self.force_kn = (self.force_kn + delta).clamp(0.0, FULL_SCALE_KN);
    }
}

/// Simulated press bench: pin states, an event log and a one-dimensional force model.
///
/// Cloning yields another handle to the same bench, so tests can keep one and
/// hand the other to the press.
#[derive(Debug, Clone)]
pub struct SimBench {
    inner: Arc<Mutex<BenchState>>,
}

impl SimBench {
    pub fn new(pins: PinMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BenchState {
                pins,
                outputs: HashMap::new(),
                inputs: HashMap::new(),
                events: Vec::new(),
                force_kn: 0.0,
                step_kn: 0.1,
                noise_kn: 0.02,
                fixture: VecDeque::new(),
                sample_delay: Duration::ZERO,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_sample_delay(self, delay: Duration) -> Self {
        self.lock().sample_delay = delay;
        self
    }

    pub fn with_step(self, step_kn: f64) -> Self {
        self.lock().step_kn = step_kn;
        self
    }

    pub fn with_noise(self, noise_kn: f64) -> Self {
        self.lock().noise_kn = noise_kn.abs();
        self
    }

    pub fn set_force(&self, force_kn: f64) {
        self.lock().force_kn = force_kn.clamp(0.0, FULL_SCALE_KN);
    }

    pub fn force(&self) -> f64 {
        self.lock().force_kn
    }

    /// Queue exact readings (kN) returned by the load cell before the model resumes.
    pub fn inject_readings<I: IntoIterator<Item = f64>>(&self, readings: I) {
        self.lock().fixture.extend(readings);
    }

    pub fn set_input(&self, pin: u8, active: bool) {
        self.lock().inputs.insert(pin, active);
    }

    pub fn pin(&self, pin: u8) -> PinState {
        self.lock().outputs.get(&pin).copied().unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn pins(&self) -> PinMap {
        self.lock().pins
    }
}

/// Simulated pin; mirrors the real channel contract without side effects.
#[derive(Debug)]
pub struct SimulatedChannel {
    channel: Channel,
    bench: SimBench,
}

impl HardwareChannel for SimulatedChannel {
    fn set_high(&mut self) -> PressResult<()> {
        let id = self.channel.id;
        let mut bench = self.bench.lock();
        bench.outputs.entry(id).or_default().level = true;
        bench.events.push(SimEvent::High(id));
        log::debug!("sim pin {id} high");
        Ok(())
    }

    fn set_low(&mut self) -> PressResult<()> {
        let id = self.channel.id;
        let mut bench = self.bench.lock();
        bench.outputs.entry(id).or_default().level = false;
        bench.events.push(SimEvent::Low(id));
        log::debug!("sim pin {id} low");
        Ok(())
    }

    fn start_pwm(&mut self, config: &PwmConfig) -> PressResult<()> {
        let id = self.channel.id;
        let mut bench = self.bench.lock();
        bench.outputs.entry(id).or_default().pwm = Some(*config);
        bench.events.push(SimEvent::PwmStart {
            pin: id,
            config: *config,
        });
        if id == bench.pins.pulse {
            bench.apply_burst();
        }
        log::debug!(
            "sim pin {id} pwm start: {} Hz, {}% duty",
            config.frequency_hz(),
            config.duty_cycle_pct()
        );
        Ok(())
    }

    fn stop_pwm(&mut self) -> PressResult<StopOutcome> {
        let id = self.channel.id;
        let mut bench = self.bench.lock();
        let running = bench
            .outputs
            .get_mut(&id)
            .and_then(|state| state.pwm.take())
            .is_some();
        if running {
            bench.events.push(SimEvent::PwmStop { pin: id });
            Ok(StopOutcome::Stopped)
        } else {
            log::debug!("sim pin {id}: nothing to stop");
            Ok(StopOutcome::NothingToStop)
        }
    }

    fn read_digital(&mut self) -> PressResult<bool> {
        let id = self.channel.id;
        let bench = self.bench.lock();
        let value = match self.channel.direction {
            Direction::In => bench.inputs.get(&id).copied().unwrap_or(false),
            Direction::Out => bench.outputs.get(&id).map(|p| p.level).unwrap_or(false),
        };
        Ok(value)
    }
}

/// Synthetic load cell. Model readings stay within `0..=FULL_SCALE_KN`;
/// injected fixture values are returned verbatim.
#[derive(Debug)]
pub struct SimulatedLoadCell {
    bench: SimBench,
}

fn kn_to_counts(kn: f64) -> i32 {
    (kn / FULL_SCALE_KN * ADC_COUNTS).round() as i32
}

impl LoadCell for SimulatedLoadCell {
    fn read_raw(&mut self, samples: usize) -> PressResult<Vec<i32>> {
        let (delay, fixture, force, noise) = {
            let mut bench = self.bench.lock();
            (
                bench.sample_delay,
                bench.fixture.pop_front(),
                bench.force_kn,
                bench.noise_kn,
            )
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let raw = match fixture {
            Some(kn) => vec![kn_to_counts(kn); samples],
            None => (0..samples)
                .map(|_| {
                    let jitter = if noise > 0.0 {
                        rand::random_range(-noise..=noise)
                    } else {
                        0.0
                    };
                    kn_to_counts((force + jitter).clamp(0.0, FULL_SCALE_KN))
                })
                .collect(),
        };
        Ok(raw)
    }
}

/// Channel factory for the simulated bench.
#[derive(Debug, Clone)]
pub struct SimBackend {
    bench: SimBench,
}

impl SimBackend {
    pub fn new(bench: SimBench) -> Self {
        Self { bench }
    }

    pub fn bench(&self) -> &SimBench {
        &self.bench
    }
}

impl ChannelFactory for SimBackend {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn open_channel(&self, channel: Channel) -> PressResult<Box<dyn HardwareChannel>> {
        if channel.direction == Direction::In && channel.mode != Mode::Digital {
            return Err(PressError::hardware(channel.id, "input channels are digital only"));
        }
        Ok(Box::new(SimulatedChannel {
            channel,
            bench: self.bench.clone(),
        }))
    }

    fn open_load_cell(&self, _pins: &PinMap) -> PressResult<Box<dyn LoadCell>> {
        Ok(Box::new(SimulatedLoadCell {
            bench: self.bench.clone(),
        }))
    }
}
