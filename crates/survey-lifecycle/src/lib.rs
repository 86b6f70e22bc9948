pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notifications;
pub mod telemetry;
