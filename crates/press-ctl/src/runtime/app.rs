use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use press_core::{ChannelFactory, PinMap, Press, PressError, SimBackend, SimBench, TimeBase};
use press_io::hal_modbus::{ModbusBackend, ModbusConfig};
use press_io::metrics::{COMMANDS, COMMAND_FAILURES};
use press_io::protocol::{
    AckMsg, Command, ErrorMsg, IncomingMessage, MoveDirection, TelemetryMsg,
};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("press error: {0}")]
    Press(#[from] PressError),
    #[error("audit log {path}: {source}")]
    Audit { path: PathBuf, source: io::Error },
    #[error("stdout: {0}")]
    Output(#[from] io::Error),
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("press-ctl: {e} (see --help)");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Config(e)) => {
            error!(error = %e, "invalid configuration");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "press-ctl failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let timebase = TimeBase::new();
    let audit = Audit {
        logger: init_audit_logger(config.audit_path.as_ref())?,
        timebase,
    };

    let (backend, fallback_reason) = open_backend(&config);
    if let Some(reason) = &fallback_reason {
        audit.event(
            AuditEventType::BackendFallback,
            serde_json::json!({ "reason": reason }),
        );
    }

    let press = Arc::new(Press::new(backend.as_ref(), config.control_config())?);
    press.start()?;
    audit.event(
        AuditEventType::SystemStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": backend.backend_name(),
            "metrics_enabled": config.metrics_addr.is_some(),
        }),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let updater = config
        .metrics_addr
        .as_ref()
        .map(|_| telemetry::start_metrics_updater(Arc::clone(&press), Arc::clone(&stop)));

    info!(
        backend = backend.backend_name(),
        target_kn = config.target_kn,
        deadband_kn = config.deadband_kn,
        "press-ctl running; reading commands from stdin"
    );

    let mut session = Session {
        press: &press,
        audit: &audit,
        out: io::stdout(),
        sequence: 0,
    };
    let result = session.serve(spawn_stdin_reader(), &config);

    stop.store(true, Ordering::Relaxed);
    if let Err(e) = press.stop_all() {
        warn!(error = %e, "stop_all during shutdown failed");
    }
    if let Some(handle) = updater {
        let _ = handle.join();
    }

    let summary = press.telemetry();
    info!(
        up = summary.actuations.up,
        down = summary.actuations.down,
        hold = summary.actuations.hold,
        recorded_samples = summary.recorded_samples,
        "Run complete"
    );
    audit.event(
        AuditEventType::SystemShutdown,
        serde_json::json!({
            "actuations": summary.actuations,
            "recorded_samples": summary.recorded_samples,
        }),
    );
    result
}

/// Resolve the hardware backend once. A real backend that cannot be reached
/// falls back to the simulated bench with a warning.
fn open_backend(config: &RuntimeConfig) -> (Box<dyn ChannelFactory>, Option<String>) {
    let simulated = |pins: PinMap| -> Box<dyn ChannelFactory> {
        Box::new(SimBackend::new(SimBench::new(pins)))
    };

    let addr = match (&config.modbus_addr, config.simulate) {
        (Some(addr), false) => addr,
        (Some(_), true) => {
            info!("--simulate given; ignoring --modbus");
            return (simulated(config.pins), None);
        }
        (None, _) => return (simulated(config.pins), None),
    };

    let connected = addr
        .parse::<SocketAddr>()
        .map_err(|e| PressError::sensor_unavailable(format!("invalid address {addr}: {e}")))
        .and_then(|socket| {
            let mut modbus = ModbusConfig::new(socket);
            modbus.unit_id = config.modbus_unit;
            info!(addr = %socket, "Connecting to Modbus remote I/O");
            ModbusBackend::connect(&modbus)
        });

    match connected {
        Ok(backend) => (Box::new(backend), None),
        Err(e) => {
            warn!(error = %e, "hardware unavailable, falling back to simulated press");
            (simulated(config.pins), Some(e.to_string()))
        }
    }
}

fn init_audit_logger(audit_path: Option<&PathBuf>) -> Result<Option<AuditLogger>, AppError> {
    let Some(path) = audit_path else {
        return Ok(None);
    };
    let logger = AuditLogger::new(path).map_err(|source| AppError::Audit {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "Audit logging enabled");
    Ok(Some(logger))
}

struct Audit {
    logger: Option<AuditLogger>,
    timebase: TimeBase,
}

impl Audit {
    fn event(&self, event_type: AuditEventType, details: serde_json::Value) {
        if let Some(logger) = &self.logger {
            if let Err(e) = logger.log_event(
                self.timebase.now_us(),
                self.timebase.unix_us(),
                event_type,
                details,
            ) {
                warn!(error = %e, "audit write failed");
            }
        }
    }
}

/// Lines from stdin; the channel disconnects at EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("press-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            debug!("stdin closed");
        })
        .map(|_| ())
        .unwrap_or_else(|e| warn!(error = %e, "could not spawn stdin reader"));
    rx
}

enum Outcome {
    Ack { changed: bool, detail: Option<String> },
    Telemetry,
    Exit,
}

impl Outcome {
    fn changed(changed: bool) -> Self {
        Self::Ack {
            changed,
            detail: None,
        }
    }
}

struct Session<'a, W: Write> {
    press: &'a Press,
    audit: &'a Audit,
    out: W,
    sequence: u64,
}

impl<W: Write> Session<'_, W> {
    fn serve(
        &mut self,
        lines: mpsc::Receiver<String>,
        config: &RuntimeConfig,
    ) -> Result<(), AppError> {
        let deadline = config.deadline(Instant::now())?;
        let telemetry_every =
            (config.telemetry_ms > 0).then(|| Duration::from_millis(config.telemetry_ms));
        let mut next_telemetry = telemetry_every.map(|every| Instant::now() + every);
        let mut stdin_open = true;

        loop {
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                info!("run duration elapsed");
                return Ok(());
            }
            if let (Some(at), Some(every)) = (next_telemetry, telemetry_every) {
                if now >= at {
                    self.emit_telemetry()?;
                    next_telemetry = Some(now + every);
                }
            }

            let wait = [deadline, next_telemetry]
                .into_iter()
                .flatten()
                .map(|t| t.saturating_duration_since(now))
                .min()
                .unwrap_or(Duration::from_millis(500));

            if !stdin_open {
                thread::sleep(wait);
                continue;
            }
            match lines.recv_timeout(wait) {
                Ok(line) => {
                    if self.handle_line(&line)? {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if deadline.is_none() {
                        info!("stdin closed, shutting down");
                        return Ok(());
                    }
                    stdin_open = false;
                }
            }
        }
    }

    /// Returns true when the session should end.
    fn handle_line(&mut self, line: &str) -> Result<bool, AppError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        COMMANDS.inc();

        let msg = match IncomingMessage::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                COMMAND_FAILURES.inc();
                warn!(error = %e, "rejected input line");
                self.audit.event(
                    AuditEventType::MalformedInput,
                    serde_json::json!({ "error": e.to_string() }),
                );
                self.write_line(&ErrorMsg::from_protocol(&e))?;
                return Ok(false);
            }
        };

        let name = msg.command.name();
        debug!(command = name, id = ?msg.id, "command received");
        match execute(self.press, &msg.command) {
            Ok(Outcome::Telemetry) => {
                self.emit_telemetry()?;
                Ok(false)
            }
            Ok(Outcome::Exit) => {
                self.audit.event(
                    AuditEventType::CommandApplied,
                    serde_json::json!({ "command": name }),
                );
                self.write_line(&AckMsg::new(msg.id, name, true))?;
                Ok(true)
            }
            Ok(Outcome::Ack { changed, detail }) => {
                self.audit.event(
                    AuditEventType::CommandApplied,
                    serde_json::json!({ "command": name, "changed": changed, "detail": detail }),
                );
                let mut ack = AckMsg::new(msg.id, name, changed);
                if let Some(detail) = detail {
                    ack = ack.with_detail(detail);
                }
                self.write_line(&ack)?;
                Ok(false)
            }
            Err(e) => {
                COMMAND_FAILURES.inc();
                warn!(command = name, error = %e, "command failed");
                let reply = ErrorMsg::from_press(msg.id, name, &e);
                self.audit.event(
                    AuditEventType::CommandFailed,
                    serde_json::json!({
                        "command": name,
                        "kind": reply.kind,
                        "error": reply.message,
                    }),
                );
                self.write_line(&reply)?;
                Ok(false)
            }
        }
    }

    fn emit_telemetry(&mut self) -> Result<(), AppError> {
        let telemetry = self.press.telemetry();
        self.sequence += 1;
        let msg = TelemetryMsg::new(self.sequence, self.audit.timebase.unix_us(), &telemetry);
        self.write_line(&msg)
    }

    fn write_line<T: Serialize>(&mut self, msg: &T) -> Result<(), AppError> {
        serde_json::to_writer(&mut self.out, msg).map_err(io::Error::from)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

fn execute(press: &Press, command: &Command) -> Result<Outcome, PressError> {
    let outcome = match command {
        Command::SetPwmConfig {
            frequency_hz,
            duty_cycle_pct,
        } => {
            press.set_pwm_config(*frequency_hz, *duty_cycle_pct)?;
            Outcome::changed(true)
        }
        Command::StartActuator => {
            press.start_actuator()?;
            Outcome::changed(true)
        }
        Command::StopActuator => {
            let outcome = press.stop_actuator()?;
            Outcome::Ack {
                changed: outcome == press_core::StopOutcome::Stopped,
                detail: Some(format!("{outcome:?}")),
            }
        }
        Command::Move { direction } => {
            press.move_press(*direction == MoveDirection::Down)?;
            Outcome::changed(true)
        }
        Command::EngageEnable => {
            press.engage_enable()?;
            Outcome::changed(true)
        }
        Command::DisengageEnable => {
            press.disengage_enable()?;
            Outcome::changed(true)
        }
        Command::SetTarget { force_kn } => {
            let target = press.set_target(*force_kn)?;
            Outcome::Ack {
                changed: true,
                detail: Some(format!("{} kN +/- {} kN", target.target_kn, target.deadband_kn)),
            }
        }
        Command::SetDeadband { deadband_kn } => {
            let target = press.set_deadband(*deadband_kn)?;
            Outcome::Ack {
                changed: true,
                detail: Some(format!("{} kN +/- {} kN", target.target_kn, target.deadband_kn)),
            }
        }
        Command::StartRegulation => Outcome::changed(press.start_regulation()?),
        Command::PauseRegulation => Outcome::changed(press.pause_regulation()),
        Command::StartRecording { interval_s } => {
            Outcome::changed(press.start_recording(*interval_s)?)
        }
        Command::PauseRecording => Outcome::changed(press.pause_recording()),
        Command::ClearRecording => {
            press.clear_recording();
            Outcome::changed(true)
        }
        Command::ExportRecording { path } => {
            let written = press.export_recording(path)?;
            Outcome::Ack {
                changed: true,
                detail: Some(format!("{written} samples written to {}", path.display())),
            }
        }
        Command::StartTask { task } => Outcome::changed(press.start_task(*task)?),
        Command::PauseTask { task } => Outcome::changed(press.pause_task(*task)),
        Command::StopTask { task } => Outcome::changed(press.stop_task(*task)?),
        Command::ResumeTask { task } => Outcome::changed(press.resume_task(*task)?),
        Command::StopAll => {
            press.stop_all()?;
            Outcome::Exit
        }
        Command::Telemetry => Outcome::Telemetry,
    };
    Ok(outcome)
}
