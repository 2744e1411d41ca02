//! Subgroup formation
//!
//! A session talks to a subset of the pool through a communication subgroup.
//! Creating one is collective: every pool member takes part, but only the
//! selected workers keep a usable handle. Afterwards each member reports its
//! rank inside the group, and those answers become the session's rank map.

use crate::common::{Error, Result, Value};
use crate::coordinator::keys::{Key, KeyRegistry};
use crate::pool::{Command, WorkerId, WorkerPool};
use std::collections::{BTreeMap, BTreeSet};

/// Live subgroup over a session's workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    key: Key,
    members: Vec<WorkerId>,
    transport_ranks: Vec<usize>,
}

impl Group {
    /// Name of the group handle on every pool worker
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn members(&self) -> &[WorkerId] {
        &self.members
    }

    /// Transport rank of each member, in member order
    pub fn transport_ranks(&self) -> &[usize] {
        &self.transport_ranks
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.members.contains(&worker)
    }
}

/// Bijection from group members to dense ranks `0..k`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMap {
    ranks: BTreeMap<WorkerId, usize>,
}

impl RankMap {
    /// Build from per-worker answers, checking they form a bijection onto
    /// `0..workers.len()`.
    pub fn from_reported(workers: &[WorkerId], reported: &[Value]) -> Result<Self> {
        if workers.len() != reported.len() {
            return Err(Error::InconsistentRank(format!(
                "{} answers for {} workers",
                reported.len(),
                workers.len()
            )));
        }
        let k = workers.len();
        let mut ranks = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for (&worker, value) in workers.iter().zip(reported) {
            let rank = match value {
                Value::Int(r) => usize::try_from(*r).ok(),
                _ => None,
            };
            let rank = rank
                .filter(|&r| r < k)
                .ok_or_else(|| {
                    Error::InconsistentRank(format!(
                        "{} reported rank {} outside 0..{}",
                        worker, value, k
                    ))
                })?;
            if !seen.insert(rank) {
                return Err(Error::InconsistentRank(format!(
                    "rank {} reported twice",
                    rank
                )));
            }
            if ranks.insert(worker, rank).is_some() {
                return Err(Error::InconsistentRank(format!("{} listed twice", worker)));
            }
        }
        Ok(Self { ranks })
    }

    pub fn rank_of(&self, worker: WorkerId) -> Option<usize> {
        self.ranks.get(&worker).copied()
    }

    pub fn worker_at(&self, rank: usize) -> Option<WorkerId> {
        self.ranks
            .iter()
            .find(|(_, r)| **r == rank)
            .map(|(&worker, _)| worker)
    }

    /// Workers ordered by rank
    pub fn by_rank(&self) -> Vec<WorkerId> {
        let mut workers: Vec<(usize, WorkerId)> =
            self.ranks.iter().map(|(&w, &r)| (r, w)).collect();
        workers.sort();
        workers.into_iter().map(|(_, w)| w).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, usize)> + '_ {
        self.ranks.iter().map(|(&w, &r)| (w, r))
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Form a subgroup over `selected` and derive its rank map.
///
/// The group handle is bound under a key reserved in `registry` on every pool
/// worker. Once formed, the caller owns releasing it; if formation fails
/// after the reservation, the handle is released before the error returns.
pub async fn form_group(
    pool: &dyn WorkerPool,
    registry: &mut KeyRegistry,
    selected: &[WorkerId],
) -> Result<(Group, RankMap)> {
    if selected.is_empty() {
        return Err(Error::InvalidGroup("a group needs at least one worker".into()));
    }

    // 1. the pool must span the whole transport address space
    let all = pool.workers();
    let size = pool.pool_size().await?;
    let mut transport = BTreeMap::new();
    for &worker in &all {
        transport.insert(worker, pool.worker_transport_rank(worker).await?);
    }
    let covered: BTreeSet<usize> = transport.values().copied().collect();
    if covered.len() != all.len() || covered != (0..size).collect::<BTreeSet<_>>() {
        return Err(Error::InvalidGroup(format!(
            "transport ranks {:?} of {} workers do not cover 0..{}",
            covered,
            all.len(),
            size
        )));
    }

    let ranks = selected
        .iter()
        .map(|w| transport.get(w).copied().ok_or(Error::UnknownWorker(*w)))
        .collect::<Result<Vec<usize>>>()?;

    // 2. collective creation over the entire pool
    let key = registry.reserve_key(&all);
    let formed = create_and_rank(pool, registry, &key, &ranks, &all, selected).await;

    let rank_map = match formed {
        Ok(rank_map) => rank_map,
        Err(e) => {
            // the handle may already be bound on some or all workers
            if let Err(release) = registry.release_reserved(&key).await {
                tracing::warn!("Could not release group {}: {}", key, release);
            }
            return Err(e);
        }
    };

    let group = Group {
        key,
        members: selected.to_vec(),
        transport_ranks: ranks,
    };
    Ok((group, rank_map))
}

async fn create_and_rank(
    pool: &dyn WorkerPool,
    registry: &mut KeyRegistry,
    key: &Key,
    ranks: &[usize],
    all: &[WorkerId],
    selected: &[WorkerId],
) -> Result<RankMap> {
    pool.execute(
        &Command::CreateGroup {
            ranks: ranks.to_vec(),
            into: key.clone(),
        },
        all,
    )
    .await?;
    tracing::debug!("Created group {} over transport ranks {:?}", key, ranks);

    // 3. members report their group rank
    query_ranks(pool, registry, key, selected).await
}

async fn query_ranks(
    pool: &dyn WorkerPool,
    registry: &mut KeyRegistry,
    group: &Key,
    selected: &[WorkerId],
) -> Result<RankMap> {
    let reply = registry.generate_key_on(selected);
    let reported = collect_ranks(pool, group, &reply, selected).await;
    let deleted = registry.delete_key(&reply).await;
    let reported = reported?;
    deleted?;
    RankMap::from_reported(selected, &reported)
}

async fn collect_ranks(
    pool: &dyn WorkerPool,
    group: &Key,
    reply: &Key,
    selected: &[WorkerId],
) -> Result<Vec<Value>> {
    pool.execute(
        &Command::GroupRank {
            group: group.clone(),
            into: reply.clone(),
        },
        selected,
    )
    .await?;
    pool.retrieve(reply.as_str(), selected).await
}
