//! Key registry
//!
//! Every name the coordinator binds on a worker comes from here. Names carry
//! a reserved prefix plus a random 128-bit id, so registry-owned bindings can
//! be told apart from any other worker state and rediscovered if they leak.
//!
//! The registry books *expectations*: `generate_key` records which workers
//! will hold a name, and the caller follows up with the store or compute that
//! actually creates it. Deletion goes through the registry so the booking and
//! the remote state stay in step.

use crate::common::{Error, Result, Value};
use crate::pool::{Command, WorkerId, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Reserved prefix of every registry-generated name
pub const KEY_PREFIX: &str = "__distkey_";

/// Process-wide unique name for a binding on one or more workers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Fresh name: prefix followed by a v4 uuid in hex
    pub fn generate() -> Self {
        Key(format!("{}{}", KEY_PREFIX, Uuid::new_v4().simple()))
    }

    /// Accept `name` only if it carries the reserved prefix
    pub fn parse(name: &str) -> Option<Self> {
        is_registry_name(name).then(|| Key(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_registry_name(name: &str) -> bool {
    name.starts_with(KEY_PREFIX) && name.len() > KEY_PREFIX.len()
}

/// Coordinator-side bookkeeping of which workers hold which key
pub struct KeyRegistry {
    pool: Arc<dyn WorkerPool>,
    default_owners: Vec<WorkerId>,
    records: BTreeMap<Key, Vec<WorkerId>>,
    /// Internal bindings (e.g. the group handle) that cleanup must not touch
    reserved: BTreeMap<Key, Vec<WorkerId>>,
}

impl KeyRegistry {
    pub fn new(pool: Arc<dyn WorkerPool>, default_owners: Vec<WorkerId>) -> Self {
        Self {
            pool,
            default_owners,
            records: BTreeMap::new(),
            reserved: BTreeMap::new(),
        }
    }

    pub fn default_owners(&self) -> &[WorkerId] {
        &self.default_owners
    }

    // === Allocation ===

    /// Book a fresh key on the default owners
    pub fn generate_key(&mut self) -> Key {
        let owners = self.default_owners.clone();
        self.book(owners)
    }

    /// Book a fresh key on an explicit set of owners
    pub fn generate_key_on(&mut self, owners: &[WorkerId]) -> Key {
        self.book(dedup(owners))
    }

    /// Book a fresh key on the first default owner only
    pub fn generate_key0(&mut self) -> Key {
        let owners = self.default_owners.iter().take(1).copied().collect();
        self.book(owners)
    }

    fn book(&mut self, owners: Vec<WorkerId>) -> Key {
        let key = Key::generate();
        self.records.insert(key.clone(), owners);
        key
    }

    /// Book an internal key. Reserved keys are invisible to cleanup and
    /// purge; release them with [`KeyRegistry::release_reserved`].
    pub fn reserve_key(&mut self, owners: &[WorkerId]) -> Key {
        let key = Key::generate();
        self.reserved.insert(key.clone(), dedup(owners));
        key
    }

    pub fn is_reserved(&self, key: &Key) -> bool {
        self.reserved.contains_key(key)
    }

    pub async fn release_reserved(&mut self, key: &Key) -> Result<()> {
        let owners = self
            .reserved
            .get(key)
            .ok_or_else(|| Error::UnknownKey(key.clone()))?;
        self.delete_remote(&[key.to_string()], owners).await?;
        self.reserved.remove(key);
        Ok(())
    }

    /// Book one key per value on the default owners and store the values there.
    /// Keys come back in input order.
    pub async fn push_values(&mut self, values: Vec<Value>) -> Result<Vec<Key>> {
        let owners = self.default_owners.clone();
        self.push_to(values, &owners).await
    }

    pub async fn push_to(&mut self, values: Vec<Value>, owners: &[WorkerId]) -> Result<Vec<Key>> {
        let keys: Vec<Key> = values.iter().map(|_| self.generate_key_on(owners)).collect();
        let batch: BTreeMap<String, Value> = keys
            .iter()
            .map(Key::to_string)
            .zip(values)
            .collect();
        self.pool.store(&batch, &dedup(owners)).await?;
        Ok(keys)
    }

    // === Reclamation ===

    /// Remove `key` from its recorded owners, then forget it
    pub async fn delete_key(&mut self, key: &Key) -> Result<()> {
        let owners = self
            .records
            .get(key)
            .ok_or_else(|| Error::UnknownKey(key.clone()))?;
        self.delete_remote(&[key.to_string()], owners).await?;
        self.records.remove(key);
        Ok(())
    }

    /// Delete every tracked key
    pub async fn cleanup_all(&mut self) -> Result<()> {
        let keys: Vec<Key> = self.records.keys().cloned().collect();
        tracing::debug!("Cleaning up {} tracked keys", keys.len());
        for key in &keys {
            self.delete_key(key).await?;
        }
        Ok(())
    }

    /// Delete names on workers with no regard for what the registry expects
    async fn delete_remote(&self, names: &[String], owners: &[WorkerId]) -> Result<()> {
        let command = Command::Delete {
            names: names.to_vec(),
        };
        self.pool.execute(&command, owners).await
    }

    // === Leak detection ===

    /// Ask every default owner which prefixed names it holds, independent of
    /// what is tracked here.
    pub async fn discover_remote(&mut self) -> Result<BTreeMap<Key, Vec<WorkerId>>> {
        let listing = self.generate_key();
        let owners = self.default_owners.clone();
        self.pool
            .execute(
                &Command::ListNames {
                    prefix: KEY_PREFIX.to_string(),
                    into: listing.clone(),
                },
                &owners,
            )
            .await?;
        let listings = self.pool.retrieve(listing.as_str(), &owners).await?;
        self.delete_key(&listing).await?;

        let mut found: BTreeMap<Key, Vec<WorkerId>> = BTreeMap::new();
        for (worker, names) in owners.iter().zip(listings) {
            let kind = names.kind();
            let Value::List(names) = names else {
                return Err(Error::Worker {
                    worker: *worker,
                    reason: format!("name listing is a {}, not a list", kind),
                });
            };
            for key in names.iter().filter_map(Value::as_str).filter_map(Key::parse) {
                found.entry(key).or_default().push(*worker);
            }
        }
        Ok(found)
    }

    /// Delete discovered keys that are neither tracked nor reserved.
    /// Returns whether any were found.
    pub async fn purge_untracked(&mut self) -> Result<bool> {
        Ok(self.purge().await? > 0)
    }

    async fn purge(&mut self) -> Result<usize> {
        let leftovers: Vec<(Key, Vec<WorkerId>)> = self
            .discover_remote()
            .await?
            .into_iter()
            .filter(|(key, _)| !self.records.contains_key(key) && !self.reserved.contains_key(key))
            .collect();

        for (key, workers) in &leftovers {
            tracing::warn!("Leftover key: {} on {} workers", key, workers.len());
            self.delete_remote(&[key.to_string()], workers).await?;
        }
        Ok(leftovers.len())
    }

    /// `cleanup_all` then `purge_untracked`. With `strict`, leftovers are a
    /// fatal fault: whatever produced them bypassed the registry.
    pub async fn checked_cleanup(&mut self, strict: bool) -> Result<bool> {
        self.cleanup_all().await?;
        let leaked = self.purge().await?;
        if strict && leaked > 0 {
            return Err(Error::LeakedKeys(leaked));
        }
        Ok(leaked > 0)
    }

    // === Inspection ===

    pub fn contains(&self, key: &Key) -> bool {
        self.records.contains_key(key)
    }

    pub fn owners_of(&self, key: &Key) -> Option<&[WorkerId]> {
        self.records.get(key).map(Vec::as_slice)
    }

    pub fn tracked_keys(&self) -> impl Iterator<Item = &Key> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Drop repeated workers, keeping first-seen order
fn dedup(workers: &[WorkerId]) -> Vec<WorkerId> {
    let mut out: Vec<WorkerId> = Vec::with_capacity(workers.len());
    for w in workers {
        if !out.contains(w) {
            out.push(*w);
        }
    }
    out
}
