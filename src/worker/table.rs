//! Per-worker key-value table
//!
//! Each worker owns one table mapping names to either a plain value or a
//! subgroup handle. The coordinator's registry only books which workers
//! hold which names; the bindings themselves live here.

use crate::common::Value;
use std::collections::HashMap;

/// A worker's membership in a subgroup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    /// Transport ranks of the members, in group-rank order
    pub ranks: Vec<usize>,
    /// This worker's rank inside the group
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    /// `None` is the null handle held by workers outside the group
    Group(Option<GroupHandle>),
}

#[derive(Debug, Default)]
pub struct WorkerTable {
    slots: HashMap<String, Slot>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: String, slot: Slot) {
        self.slots.insert(name, slot);
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Slot> {
        self.slots.remove(name)
    }

    /// Names starting with `prefix`, sorted
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
