pub mod control_loop;
pub mod controller;
mod controller_proptest;
pub mod error;
pub mod hal;
pub mod hal_sim;
pub mod limits;
pub mod motion;
pub mod press;
pub mod recorder;
pub mod scheduler;
pub mod sensor;
pub mod sync;
pub mod tags;
pub mod timebase;

pub use control_loop::ControlConfig;
pub use controller::{decide, Actuation, ActuationCounts, ForceController, RegulationState};
pub use error::{PressError, PressResult};
pub use hal::{
    Channel, ChannelFactory, HardwareChannel, LoadCell, PinMap, PressIo, PwmConfig, StopOutcome,
};
pub use hal_sim::{SimBackend, SimBench};
pub use limits::{
    ConfigViolation, ControlTarget, ForceLimits, TargetRequest, Unvalidated, Validated,
};
pub use press::{Press, TaskTelemetry, Telemetry};
pub use scheduler::{PeriodicTask, TaskKind, TaskState, TaskStats};
pub use sensor::{ForceReading, ForceSensor};
pub use sync::{SharedSnapshot, StateExchange};
pub use timebase::TimeBase;
