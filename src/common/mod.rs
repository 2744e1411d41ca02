//! Common types shared by the coordinator and the workers

pub mod config;
pub mod error;
pub mod value;

pub use config::{Config, PoolConfig, SessionConfig};
pub use error::{Error, Result};
pub use value::Value;
