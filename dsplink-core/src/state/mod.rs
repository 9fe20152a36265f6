pub mod connection;
pub mod device;
pub mod gate;

pub use connection::ConnectionState;
pub use device::{Correlation, DeviceCache, TargetProfile};
pub use gate::{SyncGate, WaitOutcome};
