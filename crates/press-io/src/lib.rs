pub mod hal_modbus;
pub mod metrics;
pub mod protocol;

pub use hal_modbus::{ModbusBackend, ModbusConfig, RegisterMap};
pub use metrics::{init_metrics, record_telemetry, serve_metrics};
pub use protocol::{Command, CommandMsg, IncomingMessage, ProtocolError, ProtocolVersion};
