// ── Domain model ──

pub mod device;
pub mod ghost;
pub mod mac;

pub use device::{Device, DeviceKind, DeviceState, DeviceStatus, Generation, Locator, ModelInfo};
pub use ghost::GhostRecord;
pub use mac::MacAddress;
