//! Burrow Shared Library
//!
//! Wire protocol and error types spoken between the relay and the tunnel agent.

pub mod protocol;
pub mod error;

pub use error::{Error, Result};
