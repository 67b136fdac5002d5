//! HTTP inbound adapter: push webhook, event stream and health probes.

pub mod error;
pub mod health;
pub mod schemas;
pub mod session;
pub mod session_config;
pub mod state;
pub mod stream;
#[cfg(test)]
pub mod test_utils;
pub mod webhook;

pub use error::ApiResult;
