// Sensor readings: packet layout, decoding and the query client

pub mod decoder;
mod driver;

pub use decoder::{Reading, ReadingValue, SENSOR_PACKETS, decode};
pub use driver::SensorDriver;
