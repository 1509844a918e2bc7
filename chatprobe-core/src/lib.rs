pub mod config;
pub mod endpoint;
pub mod error;
pub mod harness;
pub mod http_client;
pub mod model;
pub mod stream;
#[cfg(test)]
pub mod telemetry;
