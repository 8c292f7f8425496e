//! Press channels over a Modbus-TCP remote I/O module.
//!
//! Digital outputs are coils addressed by pin number, the active input is a
//! discrete input, and the pulse generator is a block of holding registers
//! plus a run coil. The load-cell interface publishes its latest conversion
//! as two input registers.

use press_core::hal::{
    Channel, ChannelFactory, Direction, HardwareChannel, LoadCell, Mode, PinMap, PwmConfig,
    StopOutcome,
};
use press_core::{PressError, PressResult};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

/// Register layout of the remote I/O module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    /// First holding register of the per-pin generator blocks (3 registers each).
    pub pwm_register_base: u16,
    pub pwm_run_coil_base: u16,
    /// Two input registers, high word first.
    pub load_cell_register: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            pwm_register_base: 100,
            pwm_run_coil_base: 256,
            load_cell_register: 0,
        }
    }
}

impl RegisterMap {
    pub fn output_coil(&self, pin: u8) -> u16 {
        u16::from(pin)
    }

    pub fn discrete_input(&self, pin: u8) -> u16 {
        u16::from(pin)
    }

    pub fn pwm_registers(&self, pin: u8) -> u16 {
        self.pwm_register_base + u16::from(pin) * 3
    }

    pub fn pwm_run_coil(&self, pin: u8) -> u16 {
        self.pwm_run_coil_base + u16::from(pin)
    }
}

/// Frequency as two words (high first) followed by duty in tenths of a percent.
pub fn encode_pwm(config: &PwmConfig) -> [u16; 3] {
    let frequency = config.frequency_hz();
    let duty_permille = (config.duty_cycle_pct() * 10.0).round() as u16;
    [(frequency >> 16) as u16, (frequency & 0xFFFF) as u16, duty_permille]
}

/// Two's-complement raw count from the high and low register words.
pub fn decode_sample(high: u16, low: u16) -> i32 {
    ((u32::from(high) << 16) | u32::from(low)) as i32
}

#[derive(Debug, Clone)]
pub struct ModbusConfig {
    pub addr: SocketAddr,
    pub unit_id: u8,
    pub registers: RegisterMap,
    /// Wait between consecutive load-cell conversions.
    pub sample_interval: Duration,
}

impl ModbusConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            unit_id: 1,
            registers: RegisterMap::default(),
            sample_interval: Duration::from_millis(12),
        }
    }
}

/// One TCP connection shared by every channel of the press.
///
/// Calls are serialized on the context lock and driven to completion on a
/// private runtime, so channel methods stay blocking like the local pins.
struct ModbusLink {
    // Dropped before the runtime that owns its socket.
    ctx: Mutex<client::Context>,
    runtime: Runtime,
    registers: RegisterMap,
}

impl ModbusLink {
    fn lock(&self) -> MutexGuard<'_, client::Context> {
        self.ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_coil(&self, pin: u8, addr: u16, value: bool) -> PressResult<()> {
        let mut ctx = self.lock();
        self.runtime
            .block_on(ctx.write_single_coil(addr, value))
            .map_err(|e| PressError::hardware(pin, format!("write coil {addr}: {e}")))
    }

    fn write_registers(&self, pin: u8, addr: u16, words: &[u16]) -> PressResult<()> {
        let mut ctx = self.lock();
        self.runtime
            .block_on(ctx.write_multiple_registers(addr, words))
            .map_err(|e| PressError::hardware(pin, format!("write registers {addr}: {e}")))
    }

    fn read_bit(&self, pin: u8, addr: u16, input: bool) -> PressResult<bool> {
        let mut ctx = self.lock();
        let bits = if input {
            self.runtime.block_on(ctx.read_discrete_inputs(addr, 1))
        } else {
            self.runtime.block_on(ctx.read_coils(addr, 1))
        }
        .map_err(|e| PressError::hardware(pin, format!("read {addr}: {e}")))?;
        bits.first()
            .copied()
            .ok_or_else(|| PressError::hardware(pin, format!("empty response for {addr}")))
    }

    fn read_sample(&self, pin: u8) -> PressResult<i32> {
        let addr = self.registers.load_cell_register;
        let mut ctx = self.lock();
        let words = self
            .runtime
            .block_on(ctx.read_input_registers(addr, 2))
            .map_err(|e| PressError::sensor_unavailable(format!("load cell read: {e}")))?;
        match words.as_slice() {
            [high, low] => Ok(decode_sample(*high, *low)),
            other => Err(PressError::hardware(
                pin,
                format!("expected 2 load cell registers, got {}", other.len()),
            )),
        }
    }
}

/// A press pin on the remote module.
pub struct ModbusChannel {
    channel: Channel,
    link: Arc<ModbusLink>,
    generator_running: bool,
}

impl ModbusChannel {
    fn require_output(&self) -> PressResult<()> {
        if self.channel.direction != Direction::Out {
            return Err(PressError::hardware(self.channel.id, "not an output channel"));
        }
        Ok(())
    }

    fn set_level(&mut self, level: bool) -> PressResult<()> {
        self.require_output()?;
        let id = self.channel.id;
        self.link
            .write_coil(id, self.link.registers.output_coil(id), level)
    }
}

impl HardwareChannel for ModbusChannel {
    fn set_high(&mut self) -> PressResult<()> {
        self.set_level(true)
    }

    fn set_low(&mut self) -> PressResult<()> {
        self.set_level(false)
    }

    /// Tears down a running generator before applying the new settings.
    fn start_pwm(&mut self, config: &PwmConfig) -> PressResult<()> {
        if self.channel.mode != Mode::Pwm {
            return Err(PressError::hardware(self.channel.id, "not a pwm channel"));
        }
        let id = self.channel.id;
        let registers = self.link.registers;
        if self.generator_running {
            self.link.write_coil(id, registers.pwm_run_coil(id), false)?;
            self.generator_running = false;
        }
        self.link
            .write_registers(id, registers.pwm_registers(id), &encode_pwm(config))?;
        self.link.write_coil(id, registers.pwm_run_coil(id), true)?;
        self.generator_running = true;
        debug!(
            pin = id,
            frequency_hz = config.frequency_hz(),
            duty_cycle_pct = config.duty_cycle_pct(),
            "pwm started"
        );
        Ok(())
    }

    fn stop_pwm(&mut self) -> PressResult<StopOutcome> {
        if !self.generator_running {
            return Ok(StopOutcome::NothingToStop);
        }
        let id = self.channel.id;
        self.link
            .write_coil(id, self.link.registers.pwm_run_coil(id), false)?;
        self.generator_running = false;
        Ok(StopOutcome::Stopped)
    }

    fn read_digital(&mut self) -> PressResult<bool> {
        let id = self.channel.id;
        match self.channel.direction {
            Direction::In => self
                .link
                .read_bit(id, self.link.registers.discrete_input(id), true),
            Direction::Out => self
                .link
                .read_bit(id, self.link.registers.output_coil(id), false),
        }
    }
}

pub struct ModbusLoadCell {
    link: Arc<ModbusLink>,
    dout: u8,
    sample_interval: Duration,
}

impl LoadCell for ModbusLoadCell {
    fn read_raw(&mut self, samples: usize) -> PressResult<Vec<i32>> {
        let mut raw = Vec::with_capacity(samples);
        for i in 0..samples {
            if i > 0 && !self.sample_interval.is_zero() {
                thread::sleep(self.sample_interval);
            }
            raw.push(self.link.read_sample(self.dout)?);
        }
        Ok(raw)
    }
}

/// Channel factory for a press wired through a Modbus-TCP remote I/O module.
pub struct ModbusBackend {
    link: Arc<ModbusLink>,
    sample_interval: Duration,
}

impl ModbusBackend {
    /// Connect once; every channel opened later shares this connection.
    pub fn connect(config: &ModbusConfig) -> PressResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("press-modbus")
            .enable_all()
            .build()?;
        let ctx = runtime
            .block_on(tcp::connect_slave(config.addr, Slave(config.unit_id)))
            .map_err(|e| {
                PressError::sensor_unavailable(format!("modbus connect to {}: {e}", config.addr))
            })?;
        info!(addr = %config.addr, unit = config.unit_id, "connected to remote I/O");

        Ok(Self {
            link: Arc::new(ModbusLink {
                ctx: Mutex::new(ctx),
                runtime,
                registers: config.registers,
            }),
            sample_interval: config.sample_interval,
        })
    }
}

impl ChannelFactory for ModbusBackend {
    fn backend_name(&self) -> &'static str {
        "modbus"
    }

    fn open_channel(&self, channel: Channel) -> PressResult<Box<dyn HardwareChannel>> {
        if channel.direction == Direction::In && channel.mode != Mode::Digital {
            return Err(PressError::hardware(channel.id, "input channels are digital only"));
        }
        if channel.mode == Mode::Pwm {
            // Leave no generator running from a previous session.
            self.link
                .write_coil(channel.id, self.link.registers.pwm_run_coil(channel.id), false)?;
        }
        Ok(Box::new(ModbusChannel {
            channel,
            link: Arc::clone(&self.link),
            generator_running: false,
        }))
    }

    fn open_load_cell(&self, pins: &PinMap) -> PressResult<Box<dyn LoadCell>> {
        Ok(Box::new(ModbusLoadCell {
            link: Arc::clone(&self.link),
            dout: pins.load_cell_dout,
            sample_interval: self.sample_interval,
        }))
    }
}
