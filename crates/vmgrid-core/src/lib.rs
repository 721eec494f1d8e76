pub mod clock;
pub mod config;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ClusterConfig, ConfigError};

/// Version string recorded in node heartbeats.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
