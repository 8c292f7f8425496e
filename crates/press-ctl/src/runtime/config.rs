use press_core::{ConfigViolation, ControlConfig, ControlTarget, PinMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unknown option {0}")]
    UnknownOption(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub simulate: bool,
    pub modbus_addr: Option<String>,
    pub modbus_unit: u8,
    pub pins: PinMap,
    pub settle_ms: u64,
    pub samples: usize,
    pub target_kn: f64,
    pub deadband_kn: f64,
    pub record_interval_s: f64,
    pub telemetry_ms: u64,
    pub run_seconds: Option<u64>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let control = ControlConfig::default();
        Self {
            show_help: false,
            simulate: false,
            modbus_addr: None,
            modbus_unit: 1,
            pins: control.pins,
            settle_ms: control.settle.as_millis() as u64,
            samples: control.samples_per_reading,
            target_kn: control.target.target_kn,
            deadband_kn: control.target.deadband_kn,
            record_interval_s: control.record_interval.as_secs_f64(),
            telemetry_ms: 1000,
            run_seconds: None,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

fn value<'a>(
    args: &'a [String],
    i: &mut usize,
    flag: &'static str,
) -> Result<&'a str, ConfigError> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or(ConfigError::MissingValue(flag))
}

fn parsed<T: std::str::FromStr>(
    args: &[String],
    i: &mut usize,
    flag: &'static str,
) -> Result<T, ConfigError> {
    let raw = value(args, i, flag)?;
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--simulate" => cfg.simulate = true,
                "--modbus" => cfg.modbus_addr = Some(value(args, &mut i, "--modbus")?.to_string()),
                "--modbus-unit" => cfg.modbus_unit = parsed(args, &mut i, "--modbus-unit")?,
                "--pulse-pin" => cfg.pins.pulse = parsed(args, &mut i, "--pulse-pin")?,
                "--enable-pin" => cfg.pins.enable = parsed(args, &mut i, "--enable-pin")?,
                "--direction-pin" => cfg.pins.direction = parsed(args, &mut i, "--direction-pin")?,
                "--active-pin" => cfg.pins.active = parsed(args, &mut i, "--active-pin")?,
                "--dout-pin" => cfg.pins.load_cell_dout = parsed(args, &mut i, "--dout-pin")?,
                "--sck-pin" => cfg.pins.load_cell_sck = parsed(args, &mut i, "--sck-pin")?,
                "--settle-ms" => cfg.settle_ms = parsed(args, &mut i, "--settle-ms")?,
                "--samples" => cfg.samples = parsed(args, &mut i, "--samples")?,
                "--target" => cfg.target_kn = parsed(args, &mut i, "--target")?,
                "--deadband" => cfg.deadband_kn = parsed(args, &mut i, "--deadband")?,
                "--record-interval" => {
                    cfg.record_interval_s = parsed(args, &mut i, "--record-interval")?
                }
                "--telemetry-ms" => cfg.telemetry_ms = parsed(args, &mut i, "--telemetry-ms")?,
                "--run-seconds" => cfg.run_seconds = Some(parsed(args, &mut i, "--run-seconds")?),
                "--json-logs" => cfg.json_logs = true,
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, &mut i, "--log-dir")?))
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, &mut i, "--metrics-addr")?.to_string())
                }
                "--audit-log" => {
                    cfg.audit_path = Some(PathBuf::from(value(args, &mut i, "--audit-log")?))
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
            i += 1;
        }
        if !cfg.show_help {
            cfg.validate()?;
        }
        Ok(cfg)
    }

    /// Reject values the press or the session loop would refuse later.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Err(violation) = self.control_config().validate() {
            let (flag, value) = match violation {
                ConfigViolation::ZeroSampleCount => ("--samples", self.samples.to_string()),
                ConfigViolation::InvalidDeadband { .. } => {
                    ("--deadband", self.deadband_kn.to_string())
                }
                ConfigViolation::InvalidInterval { .. } => {
                    ("--record-interval", self.record_interval_s.to_string())
                }
                _ => ("--target", self.target_kn.to_string()),
            };
            return Err(ConfigError::InvalidValue { flag, value });
        }
        self.deadline(Instant::now())?;
        Ok(())
    }

    /// End of a `--run-seconds` session started at `start`.
    pub fn deadline(&self, start: Instant) -> Result<Option<Instant>, ConfigError> {
        let Some(secs) = self.run_seconds else {
            return Ok(None);
        };
        start
            .checked_add(Duration::from_secs(secs))
            .map(Some)
            .ok_or(ConfigError::InvalidValue {
                flag: "--run-seconds",
                value: secs.to_string(),
            })
    }

    /// Core settings derived from the flags.
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            pins: self.pins,
            settle: Duration::from_millis(self.settle_ms),
            samples_per_reading: self.samples,
            target: ControlTarget {
                target_kn: self.target_kn,
                deadband_kn: self.deadband_kn,
            },
            record_interval: Duration::try_from_secs_f64(self.record_interval_s)
                .unwrap_or(Duration::ZERO),
            ..ControlConfig::default()
        }
    }

    pub fn print_help() {
        println!(
            r#"press-ctl - closed-loop force controller for a motorized press

Reads JSON commands from stdin (one per line) and writes telemetry, acks and
errors to stdout as JSON lines. Logs go to stderr.

USAGE:
    press-ctl [OPTIONS]

OPTIONS:
    --simulate              Use the simulated press bench (default without --modbus)
    --modbus <ADDR>         Remote I/O module over Modbus TCP (e.g. 192.168.1.10:502)
    --modbus-unit <ID>      Modbus unit id [default: 1]
    --pulse-pin <N>         Pulse output [default: 4]
    --enable-pin <N>        Enable output [default: 24]
    --direction-pin <N>     Direction output [default: 18]
    --active-pin <N>        Active input [default: 23]
    --dout-pin <N>          Load cell data pin [default: 21]
    --sck-pin <N>           Load cell clock pin [default: 20]
    --settle-ms <MS>        Settle delay around direction changes [default: 200]
    --samples <N>           Raw samples averaged per reading [default: 15]
    --target <KN>           Initial target force [default: 2.0]
    --deadband <KN>         Initial deadband [default: 0.3]
    --record-interval <S>   Recording interval in seconds [default: 2]
    --telemetry-ms <MS>     Periodic telemetry interval, 0 to disable [default: 1000]
    --run-seconds <SECS>    Run for a fixed duration then exit (stdin EOF no longer exits)
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <DIR>         Also write daily rolling log files to DIR
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>      Enable audit logging to specified JSONL file
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,press_core=trace)

EXAMPLES:
    # Simulated bench, regulate to 5 kN
    echo '{{"cmd":"start_actuator"}}
{{"cmd":"set_target","force_kn":5.0}}
{{"cmd":"start_regulation"}}' | press-ctl --simulate --run-seconds 30

    # Real press with metrics and audit trail
    press-ctl --modbus 192.168.1.10:502 --metrics-addr 0.0.0.0:9090 --audit-log /var/log/press/audit.jsonl
"#
        );
    }
}
