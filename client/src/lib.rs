//! Burrow tunnel agent
//!
//! Runs next to the target service and pulls work from a Burrow relay over
//! outbound connections only.

pub mod agent;
pub mod config;

pub use agent::TunnelAgent;
pub use config::{AgentConfig, BurrowConfig};
