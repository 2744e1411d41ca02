//! Pool wrapper that records every call before forwarding it

use crate::common::{Result, Value};
use crate::pool::{Command, ComputeRequest, WorkerId, WorkerPool};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum PoolCall {
    PoolSize,
    TransportRank {
        worker: WorkerId,
    },
    Execute {
        command: Command,
        targets: Vec<WorkerId>,
    },
    Store {
        names: Vec<String>,
        targets: Vec<WorkerId>,
    },
    Retrieve {
        name: String,
        targets: Vec<WorkerId>,
    },
}

pub struct RecordingPool<P> {
    inner: P,
    calls: Mutex<Vec<PoolCall>>,
}

impl<P: WorkerPool> RecordingPool<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls seen so far, in issue order
    pub fn calls(&self) -> Vec<PoolCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Compute requests seen so far, in issue order
    pub fn compute_requests(&self) -> Vec<ComputeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PoolCall::Execute {
                    command: Command::Compute(request),
                    ..
                } => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PoolCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

#[async_trait]
impl<P: WorkerPool> WorkerPool for RecordingPool<P> {
    fn workers(&self) -> Vec<WorkerId> {
        self.inner.workers()
    }

    async fn pool_size(&self) -> Result<usize> {
        self.record(PoolCall::PoolSize);
        self.inner.pool_size().await
    }

    async fn worker_transport_rank(&self, worker: WorkerId) -> Result<usize> {
        self.record(PoolCall::TransportRank { worker });
        self.inner.worker_transport_rank(worker).await
    }

    async fn execute(&self, command: &Command, targets: &[WorkerId]) -> Result<()> {
        self.record(PoolCall::Execute {
            command: command.clone(),
            targets: targets.to_vec(),
        });
        self.inner.execute(command, targets).await
    }

    async fn store(&self, values: &BTreeMap<String, Value>, targets: &[WorkerId]) -> Result<()> {
        self.record(PoolCall::Store {
            names: values.keys().cloned().collect(),
            targets: targets.to_vec(),
        });
        self.inner.store(values, targets).await
    }

    async fn retrieve(&self, name: &str, targets: &[WorkerId]) -> Result<Vec<Value>> {
        self.record(PoolCall::Retrieve {
            name: name.to_string(),
            targets: targets.to_vec(),
        });
        self.inner.retrieve(name, targets).await
    }
}
