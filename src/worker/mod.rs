//! Worker-side implementation used by the local pool
//!
//! - Key-value table per worker
//! - Structured command interpreter
//! - Reference element-wise kernel

pub mod kernel;
pub mod server;
pub mod table;

pub use server::Worker;
