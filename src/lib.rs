//! # distcoord
//!
//! Client-side coordination for values spread across a pool of workers:
//! - Unique, collision-free keys naming remote values
//! - A per-session registry that reclaims every key it allocated
//! - Collective subgroup formation with a verified rank map
//! - Element-wise operations dispatched as one request per call
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Session                   │
//! │   - worker set + rank map               │
//! │   - key registry (tracked / reserved)   │
//! │   - dispatch of table operations        │
//! └───────────┬─────────────────────────────┘
//!             │ WorkerPool (execute / store / retrieve)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Worker 0   │   │ Worker 1   │   │ Worker 2     │
//! │ name table │   │ name table │   │ name table   │
//! │ + kernel   │   │ + kernel   │   │ + kernel     │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Add a scalar to a value pushed to workers 1 and 3
//! distcoord run --workers 4 --targets 3,1 --op add 5 7
//!
//! # List the operation table
//! distcoord ops
//!
//! # Show that leftover keys are found and purged
//! distcoord leaks --workers 2 --leaked 3
//! ```

pub mod common;
pub mod coordinator;
pub mod pool;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Result, Value};
pub use coordinator::{Handle, Key, Operand, Session, SessionId};
pub use pool::{LocalPool, WorkerId, WorkerPool};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
