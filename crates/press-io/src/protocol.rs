use press_core::{tags, PressError, TaskKind, Telemetry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const TELEMETRY_TAGS: &[tags::Tag] = &[
    tags::FORCE_KN,
    tags::TARGET_KN,
    tags::DEADBAND_KN,
    tags::ACTIVE,
    tags::RECORDED_SAMPLES,
    tags::REGULATION_STATE,
];

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::v1()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    /// Reduces force.
    Down,
    Up,
}

/// Operator commands, one JSON object per line tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    SetPwmConfig {
        frequency_hz: u32,
        duty_cycle_pct: f64,
    },
    StartActuator,
    StopActuator,
    Move {
        direction: MoveDirection,
    },
    EngageEnable,
    DisengageEnable,
    SetTarget {
        force_kn: f64,
    },
    SetDeadband {
        deadband_kn: f64,
    },
    StartRegulation,
    PauseRegulation,
    StartRecording {
        interval_s: f64,
    },
    PauseRecording,
    ClearRecording,
    ExportRecording {
        path: PathBuf,
    },
    StartTask {
        task: TaskKind,
    },
    PauseTask {
        task: TaskKind,
    },
    StopTask {
        task: TaskKind,
    },
    ResumeTask {
        task: TaskKind,
    },
    StopAll,
    Telemetry,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPwmConfig { .. } => "set_pwm_config",
            Self::StartActuator => "start_actuator",
            Self::StopActuator => "stop_actuator",
            Self::Move { .. } => "move",
            Self::EngageEnable => "engage_enable",
            Self::DisengageEnable => "disengage_enable",
            Self::SetTarget { .. } => "set_target",
            Self::SetDeadband { .. } => "set_deadband",
            Self::StartRegulation => "start_regulation",
            Self::PauseRegulation => "pause_regulation",
            Self::StartRecording { .. } => "start_recording",
            Self::PauseRecording => "pause_recording",
            Self::ClearRecording => "clear_recording",
            Self::ExportRecording { .. } => "export_recording",
            Self::StartTask { .. } => "start_task",
            Self::PauseTask { .. } => "pause_task",
            Self::StopTask { .. } => "stop_task",
            Self::ResumeTask { .. } => "resume_task",
            Self::StopAll => "stop_all",
            Self::Telemetry => "telemetry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandMsg {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Echoed back on the reply so a client can match it.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported protocol version {}.{}", .0.major, .0.minor)]
    UnsupportedVersion(ProtocolVersion),
}

pub struct IncomingMessage;

impl IncomingMessage {
    pub fn parse(line: &str) -> Result<CommandMsg, ProtocolError> {
        let msg: CommandMsg = serde_json::from_str(line)?;
        if !msg.protocol_version.is_supported() {
            return Err(ProtocolError::UnsupportedVersion(msg.protocol_version));
        }
        Ok(msg)
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    #[serde(flatten)]
    pub telemetry: &'a Telemetry,
}

impl<'a> TelemetryMsg<'a> {
    pub fn new(sequence: u64, unix_us: u64, telemetry: &'a Telemetry) -> Self {
        Self {
            msg_type: "telemetry",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_us,
            telemetry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AckMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub id: Option<u64>,
    pub command: &'static str,
    /// False when the command was a no-op (already running, nothing to stop).
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AckMsg {
    pub fn new(id: Option<u64>, command: &'static str, changed: bool) -> Self {
        Self {
            msg_type: "ack",
            id,
            command,
            changed,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub id: Option<u64>,
    pub command: Option<&'static str>,
    pub kind: &'static str,
    /// Re-issuing the command (after fixing it) can succeed.
    pub recoverable: bool,
    pub message: String,
}

impl ErrorMsg {
    pub fn from_press(id: Option<u64>, command: &'static str, error: &PressError) -> Self {
        let kind = match error {
            PressError::NotReady => "not_ready",
            PressError::SensorUnavailable { .. } => "sensor_unavailable",
            PressError::InvalidConfig(_) => "invalid_config",
            PressError::Hardware { .. } => "hardware",
            PressError::Io(_) => "io",
            PressError::Csv(_) => "csv",
        };
        Self {
            msg_type: "error",
            id,
            command: Some(command),
            kind,
            recoverable: error.is_recoverable(),
            message: error.to_string(),
        }
    }

    pub fn from_protocol(error: &ProtocolError) -> Self {
        let kind = match error {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnsupportedVersion(_) => "unsupported_version",
        };
        Self {
            msg_type: "error",
            id: None,
            command: None,
            kind,
            recoverable: true,
            message: error.to_string(),
        }
    }
}
