//! Worker task
//!
//! A worker is a tokio task draining a request channel. It applies each
//! request to its own table and answers on a oneshot, so a worker sees the
//! requests addressed to it strictly in the order the pool sent them.

use crate::common::{Error, Result, Value};
use crate::pool::{Command, ComputeRequest, WorkerId};
use crate::worker::kernel;
use crate::worker::table::{GroupHandle, Slot, WorkerTable};
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum WorkerRequest {
    Execute(Command),
    Store(Vec<(String, Value)>),
    Retrieve(String),
    TransportRank,
    TransportSize,
}

pub struct Envelope {
    pub request: WorkerRequest,
    pub reply: oneshot::Sender<Result<Value>>,
}

pub struct Worker {
    id: WorkerId,
    transport_rank: usize,
    transport_size: usize,
    table: WorkerTable,
}

impl Worker {
    pub fn new(id: WorkerId, transport_rank: usize, transport_size: usize) -> Self {
        Self {
            id,
            transport_rank,
            transport_size,
            table: WorkerTable::new(),
        }
    }

    /// Run the worker until every sender is dropped
    pub fn spawn(mut self, capacity: usize) -> (mpsc::Sender<Envelope>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(capacity);
        let handle = tokio::spawn(async move {
            tracing::debug!("{} started (transport rank {})", self.id, self.transport_rank);
            while let Some(envelope) = rx.recv().await {
                let result = self.handle(envelope.request);
                // the caller may have given up on the reply
                let _ = envelope.reply.send(result);
            }
            tracing::debug!("{} stopped", self.id);
        });
        (tx, handle)
    }

    pub fn handle(&mut self, request: WorkerRequest) -> Result<Value> {
        match request {
            WorkerRequest::Execute(command) => {
                self.execute(command)?;
                Ok(Value::Null)
            }
            WorkerRequest::Store(values) => {
                for (name, value) in values {
                    self.table.bind(name, Slot::Value(value));
                }
                Ok(Value::Null)
            }
            WorkerRequest::Retrieve(name) => self.value(&name).cloned(),
            WorkerRequest::TransportRank => Ok(Value::Int(self.transport_rank as i64)),
            WorkerRequest::TransportSize => Ok(Value::Int(self.transport_size as i64)),
        }
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Compute(request) => self.compute(request),
            Command::Delete { names } => {
                for name in names {
                    self.table.remove(&name);
                }
                Ok(())
            }
            Command::ListNames { prefix, into } => {
                // listed before binding, so the listing never names itself
                let names = self.table.names_with_prefix(&prefix);
                let listing = Value::List(names.into_iter().map(Value::Str).collect());
                self.table.bind(into.to_string(), Slot::Value(listing));
                Ok(())
            }
            Command::CreateGroup { ranks, into } => {
                let handle = self.create_group(ranks)?;
                self.table.bind(into.to_string(), Slot::Group(handle));
                Ok(())
            }
            Command::GroupRank { group, into } => {
                let rank = match self.table.get(group.as_str()) {
                    Some(Slot::Group(Some(handle))) => Value::Int(handle.rank as i64),
                    // no role in this group: nothing to report
                    Some(Slot::Group(None)) => Value::Null,
                    Some(Slot::Value(_)) => {
                        return Err(self.fail(format!("{} is not a group handle", group)))
                    }
                    None => return Err(self.fail(format!("no binding named {}", group))),
                };
                self.table.bind(into.to_string(), Slot::Value(rank));
                Ok(())
            }
        }
    }

    fn compute(&mut self, request: ComputeRequest) -> Result<()> {
        let args = request
            .args
            .iter()
            .map(|key| self.value(key.as_str()).cloned())
            .collect::<Result<Vec<_>>>()?;
        if !request.options.is_empty() {
            tracing::trace!("{}: {} ignoring options {:?}", self.id, request.op, request.options);
        }
        let result = kernel::apply(request.op, &args)?;
        self.table.bind(request.into.to_string(), Slot::Value(result));
        Ok(())
    }

    /// Collective subgroup creation. Members get a handle whose rank is their
    /// position in `ranks`; everyone else gets the null handle.
    fn create_group(&self, ranks: Vec<usize>) -> Result<Option<GroupHandle>> {
        if ranks.len() > self.transport_size {
            return Err(Error::InvalidGroup(format!(
                "group of {} exceeds transport size {}",
                ranks.len(),
                self.transport_size
            )));
        }
        let mut seen = HashSet::new();
        for &rank in &ranks {
            if rank >= self.transport_size {
                return Err(Error::InvalidGroup(format!(
                    "rank {} outside transport range 0..{}",
                    rank, self.transport_size
                )));
            }
            if !seen.insert(rank) {
                return Err(Error::InvalidGroup(format!("rank {} listed twice", rank)));
            }
        }

        let position = ranks.iter().position(|&r| r == self.transport_rank);
        Ok(position.map(|rank| GroupHandle { ranks, rank }))
    }

    fn value(&self, name: &str) -> Result<&Value> {
        match self.table.get(name) {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Group(_)) => Err(self.fail(format!("{} holds a group handle, not a value", name))),
            None => Err(self.fail(format!("no binding named {}", name))),
        }
    }

    fn fail(&self, reason: String) -> Error {
        Error::Worker {
            worker: self.id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::keys::Key;

    fn create(worker: &mut Worker, ranks: Vec<usize>) -> Result<Key> {
        let key = Key::generate();
        worker.handle(WorkerRequest::Execute(Command::CreateGroup {
            ranks,
            into: key.clone(),
        }))?;
        Ok(key)
    }

    fn group_rank(worker: &mut Worker, group: &Key) -> Value {
        let into = Key::generate();
        worker
            .handle(WorkerRequest::Execute(Command::GroupRank {
                group: group.clone(),
                into: into.clone(),
            }))
            .unwrap();
        worker.handle(WorkerRequest::Retrieve(into.to_string())).unwrap()
    }

    #[test]
    fn test_group_rank_is_position_in_list() {
        let mut worker = Worker::new(WorkerId(2), 2, 4);
        let group = create(&mut worker, vec![3, 2]).unwrap();
        assert_eq!(group_rank(&mut worker, &group), Value::Int(1));
    }

    #[test]
    fn test_non_member_gets_null_handle() {
        let mut worker = Worker::new(WorkerId(0), 0, 4);
        let group = create(&mut worker, vec![3, 2]).unwrap();
        assert_eq!(group_rank(&mut worker, &group), Value::Null);
    }

    #[test]
    fn test_invalid_ranks_rejected() {
        let mut worker = Worker::new(WorkerId(0), 0, 4);
        assert!(matches!(create(&mut worker, vec![10, 11]), Err(Error::InvalidGroup(_))));
        assert!(matches!(create(&mut worker, vec![1, 1]), Err(Error::InvalidGroup(_))));
        assert!(matches!(
            create(&mut worker, (0..8).collect()),
            Err(Error::InvalidGroup(_))
        ));
    }

    #[test]
    fn test_group_handle_is_not_retrievable() {
        let mut worker = Worker::new(WorkerId(0), 0, 1);
        let group = create(&mut worker, vec![0]).unwrap();
        assert!(matches!(
            worker.handle(WorkerRequest::Retrieve(group.to_string())),
            Err(Error::Worker { .. })
        ));
    }

    #[test]
    fn test_listing_excludes_itself() {
        let mut worker = Worker::new(WorkerId(0), 0, 1);
        worker
            .handle(WorkerRequest::Store(vec![("__distkey_x".into(), Value::Int(1))]))
            .unwrap();
        let into = Key::generate();
        worker
            .handle(WorkerRequest::Execute(Command::ListNames {
                prefix: "__distkey_".into(),
                into: into.clone(),
            }))
            .unwrap();
        let listing = worker.handle(WorkerRequest::Retrieve(into.to_string())).unwrap();
        assert_eq!(listing, Value::List(vec![Value::Str("__distkey_x".into())]));
    }
}
