//! ripdeck: network control service for an optical disc ripping station.

mod drive;
mod rip;
mod scanner;
mod storage;
mod telemetry;

pub mod config;
pub mod ops;
mod runner;
pub mod server;
pub mod session;
pub mod station;
pub mod wire;

pub use config::{StationConfig, ToolConfig};
pub use scanner::{DiscRecord, TrackRecord};
pub use station::{HealthSnapshot, Station, StationStatus, VERSION};
pub use wire::protocol::{Envelope, FsUsage, RipProgress, RipTrack};
