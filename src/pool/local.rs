//! In-process worker pool
//!
//! Each worker runs as its own tokio task with a private table. A pool call
//! sends one request per target and waits for every reply before returning,
//! which gives the barrier semantics the coordinator relies on.

use crate::common::{Error, PoolConfig, Result, Value};
use crate::pool::{Command, WorkerId, WorkerPool};
use crate::worker::server::{Envelope, WorkerRequest};
use crate::worker::Worker;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{mpsc, oneshot};

pub struct LocalPool {
    senders: BTreeMap<WorkerId, mpsc::Sender<Envelope>>,
}

impl LocalPool {
    /// Spawn the workers described by `config`. Must be called from within a
    /// tokio runtime.
    pub fn spawn(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let size = config.workers;
        let ranks: Vec<usize> = match &config.transport_ranks {
            Some(ranks) => ranks.clone(),
            None => (0..size).collect(),
        };

        let mut senders = BTreeMap::new();
        for (i, rank) in ranks.into_iter().enumerate() {
            let id = WorkerId(i as u32);
            let (tx, _handle) = Worker::new(id, rank, size).spawn(config.channel_capacity);
            senders.insert(id, tx);
        }

        tracing::info!("Local pool started with {} workers", size);
        Ok(Self { senders })
    }

    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::spawn(&PoolConfig::with_workers(workers))
    }

    async fn request(&self, worker: WorkerId, request: WorkerRequest) -> Result<Value> {
        let sender = self
            .senders
            .get(&worker)
            .ok_or(Error::UnknownWorker(worker))?;
        let (reply, rx) = oneshot::channel();
        sender
            .send(Envelope { request, reply })
            .await
            .map_err(|_| Error::Transport(format!("{} is unreachable", worker)))?;
        rx.await
            .map_err(|_| Error::Transport(format!("{} dropped the request", worker)))?
    }

    /// Send one request per target and wait for all of them, even after a
    /// failure, so the call stays a barrier over `targets`.
    async fn fan_out<F>(&self, targets: &[WorkerId], make: F) -> Result<Vec<Value>>
    where
        F: Fn() -> WorkerRequest,
    {
        let pending = targets.iter().map(|&worker| self.request(worker, make()));
        join_all(pending).await.into_iter().collect()
    }
}

#[async_trait]
impl WorkerPool for LocalPool {
    fn workers(&self) -> Vec<WorkerId> {
        self.senders.keys().copied().collect()
    }

    async fn pool_size(&self) -> Result<usize> {
        let first = self
            .senders
            .keys()
            .next()
            .copied()
            .ok_or_else(|| Error::Transport("pool has no workers".into()))?;
        let size = self.request(first, WorkerRequest::TransportSize).await?;
        as_count(first, &size)
    }

    async fn worker_transport_rank(&self, worker: WorkerId) -> Result<usize> {
        let rank = self.request(worker, WorkerRequest::TransportRank).await?;
        as_count(worker, &rank)
    }

    async fn execute(&self, command: &Command, targets: &[WorkerId]) -> Result<()> {
        if command.is_collective() {
            let addressed: BTreeSet<WorkerId> = targets.iter().copied().collect();
            if addressed.len() != self.senders.len()
                || !self.senders.keys().all(|w| addressed.contains(w))
            {
                return Err(Error::Transport(format!(
                    "collective {} issued to {} of {} workers",
                    command.name(),
                    addressed.len(),
                    self.senders.len()
                )));
            }
        }
        tracing::debug!("execute {} on {} workers", command.name(), targets.len());
        self.fan_out(targets, || WorkerRequest::Execute(command.clone()))
            .await
            .map(|_| ())
    }

    async fn store(&self, values: &BTreeMap<String, Value>, targets: &[WorkerId]) -> Result<()> {
        tracing::debug!("store {} values on {} workers", values.len(), targets.len());
        self.fan_out(targets, || {
            WorkerRequest::Store(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        })
        .await
        .map(|_| ())
    }

    async fn retrieve(&self, name: &str, targets: &[WorkerId]) -> Result<Vec<Value>> {
        tracing::debug!("retrieve {} from {} workers", name, targets.len());
        self.fan_out(targets, || WorkerRequest::Retrieve(name.to_string()))
            .await
    }
}

fn as_count(worker: WorkerId, value: &Value) -> Result<usize> {
    let count = match value {
        Value::Int(n) => usize::try_from(*n).ok(),
        _ => None,
    };
    count.ok_or_else(|| Error::Worker {
        worker,
        reason: format!("expected a non-negative integer, got {}", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_must_be_an_integer() {
        assert_eq!(as_count(WorkerId(0), &Value::Int(3)).unwrap(), 3);
        assert!(as_count(WorkerId(0), &Value::Bool(true)).is_err());
        assert!(as_count(WorkerId(0), &Value::Int(-1)).is_err());
    }

    #[tokio::test]
    async fn test_store_and_retrieve_in_target_order() {
        let pool = LocalPool::with_workers(3).unwrap();
        let mut values = BTreeMap::new();
        values.insert("x".to_string(), Value::Int(5));
        pool.store(&values, &[WorkerId(2), WorkerId(0)]).await.unwrap();

        let got = pool.retrieve("x", &[WorkerId(0), WorkerId(2)]).await.unwrap();
        assert_eq!(got, vec![Value::Int(5), Value::Int(5)]);

        // worker 1 never got it
        assert!(pool.retrieve("x", &[WorkerId(1)]).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let pool = LocalPool::with_workers(2).unwrap();
        assert!(matches!(
            pool.worker_transport_rank(WorkerId(9)).await,
            Err(Error::UnknownWorker(WorkerId(9)))
        ));
    }

    #[tokio::test]
    async fn test_transport_ranks_and_size() {
        let config = PoolConfig {
            workers: 3,
            transport_ranks: Some(vec![2, 0, 1]),
            channel_capacity: 4,
        };
        let pool = LocalPool::spawn(&config).unwrap();
        assert_eq!(pool.pool_size().await.unwrap(), 3);
        assert_eq!(pool.worker_transport_rank(WorkerId(0)).await.unwrap(), 2);
        assert_eq!(pool.worker_transport_rank(WorkerId(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collective_must_reach_every_worker() {
        let pool = LocalPool::with_workers(4).unwrap();
        let command = Command::CreateGroup {
            ranks: vec![0, 1],
            into: crate::coordinator::keys::Key::generate(),
        };
        let partial = pool.execute(&command, &[WorkerId(0), WorkerId(1)]).await;
        assert!(matches!(partial, Err(Error::Transport(_))));
        assert!(pool.execute(&command, &pool.workers()).await.is_ok());
    }
}
