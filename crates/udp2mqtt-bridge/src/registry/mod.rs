//! Device registry: the records both routing directions consult and update.

pub mod device;
pub mod table;

pub use device::{Device, DeviceIdentity, GATEWAY_MODEL, Gateway, Sensor, placeholder_name};
pub use table::{DeviceRegistry, DeviceTable};
