pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod sensor;
pub mod types;

pub use api::*;
pub use config::{HardwareConfig, NetworkConfig, NodeConfig, ServiceConfig, TimingConfig};
pub use controller::{fit_line, Iteration, NodeController, NodeParts};
pub use error::NodeError;
pub use hal::{Delay, Display, HttpRequest, HttpTransport, Network, OutputPin, TemperatureSensor};
pub use types::{
    ConnectionStatus, HttpMethod, HttpResponse, LightPayload, NodePhase, TempAck, TempReport,
    Telemetry,
};
