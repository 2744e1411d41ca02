//! Session setup, key reclamation and teardown

use distcoord::common::{Error, SessionConfig, Value};
use distcoord::coordinator::KEY_PREFIX;
use distcoord::pool::{Command, LocalPool, WorkerId, WorkerPool};
use distcoord::{Key, Session};
use std::collections::BTreeMap;
use std::sync::Arc;

fn local(workers: usize) -> Arc<dyn WorkerPool> {
    Arc::new(LocalPool::with_workers(workers).unwrap())
}

/// Every prefixed name bound on each worker, bypassing any registry
async fn bound_names(pool: &dyn WorkerPool) -> Vec<Value> {
    let workers = pool.workers();
    let listing = Key::generate();
    pool.execute(
        &Command::ListNames {
            prefix: KEY_PREFIX.to_string(),
            into: listing.clone(),
        },
        &workers,
    )
    .await
    .unwrap();
    let names = pool.retrieve(listing.as_str(), &workers).await.unwrap();
    pool.execute(
        &Command::Delete {
            names: vec![listing.to_string()],
        },
        &workers,
    )
    .await
    .unwrap();
    names
}

async fn leak(pool: &dyn WorkerPool, targets: &[WorkerId]) -> Key {
    let key = Key::generate();
    let mut batch = BTreeMap::new();
    batch.insert(key.to_string(), Value::Int(0));
    pool.store(&batch, targets).await.unwrap();
    key
}

#[tokio::test]
async fn test_close_leaves_nothing_behind() {
    let pool = local(4);
    let mut session = Session::new(pool.clone(), Some(&[WorkerId(1), WorkerId(3)]))
        .await
        .unwrap();

    let handles = session
        .push_all(vec![Value::Int(2), Value::Float(0.5)])
        .await
        .unwrap();
    let product = session
        .apply("multiply", vec![handles[0].clone().into(), handles[1].clone().into()], &Default::default())
        .await
        .unwrap();
    assert_eq!(session.pull(&product).await.unwrap(), vec![Value::Float(1.0); 2]);
    assert_eq!(session.registry().len(), 3);

    assert!(!session.close(true).await.unwrap());
    assert_eq!(bound_names(pool.as_ref()).await, vec![Value::List(vec![]); 4]);
}

#[tokio::test]
async fn test_release_forgets_the_key() {
    let pool = local(2);
    let mut session = Session::new(pool, None).await.unwrap();
    let x = session.push(Value::Int(9)).await.unwrap();
    assert_eq!(session.pull(&x).await.unwrap(), vec![Value::Int(9); 2]);

    session.release(x.clone()).await.unwrap();
    assert!(matches!(session.pull(&x).await, Err(Error::UnknownKey(_))));
    assert!(matches!(session.release(x).await, Err(Error::UnknownKey(_))));
    assert!(session.registry().is_empty());

    session.close(true).await.unwrap();
}

#[tokio::test]
async fn test_untracked_key_is_not_a_handle() {
    let pool = local(2);
    let session = Session::new(pool, None).await.unwrap();
    assert!(matches!(
        session.handle(Key::generate()),
        Err(Error::UnknownKey(_))
    ));
    session.close(true).await.unwrap();
}

#[tokio::test]
async fn test_leftovers_are_purged() {
    let pool = local(3);
    let session = Session::new(pool.clone(), None).await.unwrap();
    leak(pool.as_ref(), &pool.workers()).await;

    assert!(session.close(false).await.unwrap());
    assert_eq!(bound_names(pool.as_ref()).await, vec![Value::List(vec![]); 3]);
}

#[tokio::test]
async fn test_strict_close_escalates_leftovers() {
    let pool = local(3);
    let session = Session::new(pool.clone(), Some(&[WorkerId(0), WorkerId(2)]))
        .await
        .unwrap();
    leak(pool.as_ref(), &[WorkerId(2)]).await;

    let err = session.close(true).await.unwrap_err();
    assert!(matches!(err, Error::LeakedKeys(1)));
    assert!(err.is_fatal());

    // the leftover was still deleted before the fault surfaced
    assert_eq!(bound_names(pool.as_ref()).await, vec![Value::List(vec![]); 3]);
}

#[tokio::test]
async fn test_targets_outside_pool() {
    let pool = local(2);
    let result = Session::new(pool, Some(&[WorkerId(0), WorkerId(9)])).await;
    assert!(matches!(result, Err(Error::UnknownWorker(WorkerId(9)))));
}

#[tokio::test]
async fn test_session_from_config() {
    let pool = local(4);
    let config = SessionConfig {
        targets: Some(vec![2, 0, 2]),
        strict_cleanup: true,
    };
    let session = Session::from_config(pool, &config).await.unwrap();
    assert_eq!(session.worker_set(), &[WorkerId(0), WorkerId(2)]);
    assert_eq!(session.group().size(), 2);
    assert_eq!(session.rank_of(WorkerId(2)), Some(1));
    assert_eq!(session.rank_of(WorkerId(1)), None);
    session.close(config.strict_cleanup).await.unwrap();
}

#[tokio::test]
async fn test_keys_on_explicit_owners() {
    let pool = local(3);
    let mut session = Session::new(pool.clone(), None).await.unwrap();

    let first = session.registry_mut().generate_key0();
    assert_eq!(session.registry().owners_of(&first), Some(&[WorkerId(0)][..]));

    let keys = session
        .registry_mut()
        .push_to(vec![Value::Int(4)], &[WorkerId(1), WorkerId(1)])
        .await
        .unwrap();
    assert_eq!(session.registry().owners_of(&keys[0]), Some(&[WorkerId(1)][..]));
    let handle = session.handle(keys[0].clone()).unwrap();
    assert_eq!(session.pull(&handle).await.unwrap(), vec![Value::Int(4)]);

    let tracked: Vec<&Key> = session.registry().tracked_keys().collect();
    assert_eq!(tracked.len(), 2);

    assert!(!session.close(true).await.unwrap());
    assert_eq!(bound_names(pool.as_ref()).await, vec![Value::List(vec![]); 3]);
}
