//! Coordination session
//!
//! A session fixes a worker subset, forms its subgroup once, and owns the
//! registry of every key it allocates. Handles point back at their session by
//! id only: the session is the arena and keys are indices into it, so a
//! handle never keeps a session alive.

use crate::common::{Error, Result, SessionConfig, Value};
use crate::coordinator::dispatch::{self, Operand};
use crate::coordinator::group::{form_group, Group, RankMap};
use crate::coordinator::keys::{Key, KeyRegistry};
use crate::coordinator::ops::{self, Arity};
use crate::pool::{Options, WorkerId, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a session; two sessions never share one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0.simple())
    }
}

/// Client-side reference to a value bound on a session's workers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    key: Key,
    session: SessionId,
}

impl Handle {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

pub struct Session {
    id: SessionId,
    pool: Arc<dyn WorkerPool>,
    workers: Vec<WorkerId>,
    registry: KeyRegistry,
    group: Group,
    ranks: RankMap,
}

impl Session {
    /// Create a session over `targets`, or the whole pool when `None`.
    ///
    /// Targets are canonicalized (sorted by worker id, repeats dropped), so
    /// any ordering of the same workers yields the same worker set and rank map.
    pub async fn new(pool: Arc<dyn WorkerPool>, targets: Option<&[WorkerId]>) -> Result<Self> {
        let workers = canonicalize(&pool.workers(), targets)?;
        let id = SessionId::new();
        tracing::info!("Starting {} over {} workers", id, workers.len());

        let mut registry = KeyRegistry::new(pool.clone(), workers.clone());
        let (group, ranks) = form_group(pool.as_ref(), &mut registry, &workers).await?;
        tracing::info!("{} ready: ranks {:?}", id, ranks.by_rank());

        Ok(Self {
            id,
            pool,
            workers,
            registry,
            group,
            ranks,
        })
    }

    pub async fn from_config(pool: Arc<dyn WorkerPool>, config: &SessionConfig) -> Result<Self> {
        let targets: Option<Vec<WorkerId>> = config
            .targets
            .as_ref()
            .map(|ids| ids.iter().map(|&i| WorkerId(i)).collect());
        Self::new(pool, targets.as_deref()).await
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pool(&self) -> &dyn WorkerPool {
        self.pool.as_ref()
    }

    /// The session's workers, in canonical order
    pub fn worker_set(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn rank_of(&self, worker: WorkerId) -> Option<usize> {
        self.ranks.rank_of(worker)
    }

    pub fn rank_map(&self) -> &RankMap {
        &self.ranks
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut KeyRegistry {
        &mut self.registry
    }

    pub fn owns(&self, handle: &Handle) -> bool {
        handle.session == self.id
    }

    pub(crate) fn check_owns(&self, handle: &Handle) -> Result<()> {
        if !self.owns(handle) {
            return Err(Error::ContextMismatch {
                expected: self.id,
                found: handle.session,
            });
        }
        Ok(())
    }

    /// Wrap a key this session tracks in a handle
    pub fn handle(&self, key: Key) -> Result<Handle> {
        if !self.registry.contains(&key) {
            return Err(Error::UnknownKey(key));
        }
        Ok(self.handle_unchecked(key))
    }

    pub(crate) fn handle_unchecked(&self, key: Key) -> Handle {
        Handle {
            key,
            session: self.id,
        }
    }

    /// Store the same value on every worker of the session
    pub async fn push(&mut self, value: Value) -> Result<Handle> {
        let mut handles = self.push_all(vec![value]).await?;
        handles
            .pop()
            .ok_or_else(|| Error::Other("push returned no handle".into()))
    }

    pub async fn push_all(&mut self, values: Vec<Value>) -> Result<Vec<Handle>> {
        let keys = self.registry.push_values(values).await?;
        Ok(keys.into_iter().map(|k| self.handle_unchecked(k)).collect())
    }

    /// One value per worker of the session, in worker-set order
    pub async fn pull(&self, handle: &Handle) -> Result<Vec<Value>> {
        self.check_owns(handle)?;
        let owners = self
            .registry
            .owners_of(handle.key())
            .ok_or_else(|| Error::UnknownKey(handle.key.clone()))?;
        self.pool.retrieve(handle.key.as_str(), owners).await
    }

    /// Reclaim the value behind `handle`
    pub async fn release(&mut self, handle: Handle) -> Result<()> {
        self.check_owns(&handle)?;
        self.registry.delete_key(&handle.key).await
    }

    /// Apply a table operation by name.
    ///
    /// Unary operations take one handle; binary operations take two operands,
    /// at least one of them a handle.
    pub async fn apply(
        &mut self,
        name: &str,
        operands: Vec<Operand>,
        options: &Options,
    ) -> Result<Handle> {
        let spec = ops::lookup(name)?;
        let arity_error = |actual: usize| Error::Arity {
            op: name.to_string(),
            expected: spec.arity.operands(),
            actual,
        };

        match spec.arity {
            Arity::Unary => match operands.as_slice() {
                [Operand::Handle(handle)] => {
                    let handle = handle.clone();
                    dispatch::unary_apply(self, &handle, spec.remote, options).await
                }
                [Operand::Scalar(value)] => Err(Error::OperandType(format!(
                    "{} needs a distributed handle, got a {}",
                    name,
                    value.kind()
                ))),
                other => Err(arity_error(other.len())),
            },
            Arity::Binary => {
                let [a, b]: [Operand; 2] = operands
                    .try_into()
                    .map_err(|rest: Vec<Operand>| arity_error(rest.len()))?;
                dispatch::binary_apply(self, a, b, spec.remote, options).await
            }
        }
    }

    /// Tear the session down: reclaim every key, purge leftovers, and free the
    /// group handle across the pool. With `strict`, leftovers are fatal.
    /// Returns whether leftovers were found.
    pub async fn close(mut self, strict: bool) -> Result<bool> {
        let cleanup = self.registry.checked_cleanup(strict).await;
        self.registry.release_reserved(self.group.key()).await?;
        tracing::info!("Closed {}", self.id);
        cleanup
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            tracing::warn!(
                "{} dropped with {} tracked keys still bound",
                self.id,
                self.registry.len()
            );
        }
    }
}

/// Sorted, de-duplicated worker set; every target must belong to the pool
fn canonicalize(pool: &[WorkerId], targets: Option<&[WorkerId]>) -> Result<Vec<WorkerId>> {
    let Some(targets) = targets else {
        let all: BTreeSet<WorkerId> = pool.iter().copied().collect();
        return Ok(all.into_iter().collect());
    };
    let mut set = BTreeSet::new();
    for &target in targets {
        if !pool.contains(&target) {
            return Err(Error::UnknownWorker(target));
        }
        set.insert(target);
    }
    Ok(set.into_iter().collect())
}
