pub mod config;
pub mod error;
pub mod messages;
pub mod motion;
pub mod oi;
pub mod runtime;
pub mod sensor;
