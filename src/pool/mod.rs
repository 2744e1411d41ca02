//! Worker pool interface
//!
//! The coordinator never talks to workers directly. Everything goes through
//! a [`WorkerPool`], whose calls are barriers: each returns only once every
//! addressed worker has finished. Requests are structured [`Command`]s that
//! the pool interprets, never source text.
//!
//! - [`local::LocalPool`] runs workers as in-process tokio tasks
//! - [`recording::RecordingPool`] wraps any pool and records each call

pub mod local;
pub mod recording;

use crate::common::{Result, Value};
use crate::coordinator::keys::Key;
use crate::coordinator::ops::OperationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use local::LocalPool;
pub use recording::{PoolCall, RecordingPool};

/// Opaque worker identity understood by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker({})", self.0)
    }
}

/// Options forwarded untouched to the worker-side kernel
pub type Options = BTreeMap<String, Value>;

/// One element-wise compute request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub op: OperationId,
    pub args: Vec<Key>,
    pub options: Options,
    /// Name the result is bound to on each worker
    pub into: Key,
}

/// Structured request executed by every addressed worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Compute(ComputeRequest),
    /// Remove bindings; missing names are ignored
    Delete { names: Vec<String> },
    /// Bind the names matching `prefix` (sorted) under `into`
    ListNames { prefix: String, into: Key },
    /// Collective: create a subgroup over `ranks` and bind the handle under
    /// `into`. Must be issued to every pool member.
    CreateGroup { ranks: Vec<usize>, into: Key },
    /// Bind this worker's rank inside `group` under `into`
    GroupRank { group: Key, into: Key },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Compute(_) => "compute",
            Command::Delete { .. } => "delete",
            Command::ListNames { .. } => "list_names",
            Command::CreateGroup { .. } => "create_group",
            Command::GroupRank { .. } => "group_rank",
        }
    }

    pub fn is_collective(&self) -> bool {
        matches!(self, Command::CreateGroup { .. })
    }
}

/// Blocking access to a fleet of workers.
///
/// All methods suspend the caller until every addressed worker has answered.
/// Calls on the same target set are observed in issue order.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Every worker in the pool, ordered by id
    fn workers(&self) -> Vec<WorkerId>;

    /// Size of the transport's full address space, as the transport reports it
    async fn pool_size(&self) -> Result<usize>;

    /// A worker's fixed rank in the transport's full collective
    async fn worker_transport_rank(&self, worker: WorkerId) -> Result<usize>;

    async fn execute(&self, command: &Command, targets: &[WorkerId]) -> Result<()>;

    async fn store(&self, values: &BTreeMap<String, Value>, targets: &[WorkerId]) -> Result<()>;

    /// One value per target, in `targets` order
    async fn retrieve(&self, name: &str, targets: &[WorkerId]) -> Result<Vec<Value>>;
}
