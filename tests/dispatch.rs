//! Element-wise dispatch through a session

use distcoord::common::{Error, Value};
use distcoord::coordinator::{binary_apply, unary_apply, Operand, OperationId};
use distcoord::pool::{Command, LocalPool, Options, PoolCall, RecordingPool, WorkerId, WorkerPool};
use distcoord::Session;
use std::collections::BTreeMap;
use std::sync::Arc;

fn recorded(workers: usize) -> (Arc<RecordingPool<LocalPool>>, Arc<dyn WorkerPool>) {
    let recording = Arc::new(RecordingPool::new(LocalPool::with_workers(workers).unwrap()));
    let pool: Arc<dyn WorkerPool> = recording.clone();
    (recording, pool)
}

#[tokio::test]
async fn test_add_two_stored_values() {
    let (_, pool) = recorded(4);
    let mut session = Session::new(pool.clone(), None).await.unwrap();

    let key_a = session.registry_mut().generate_key();
    let key_b = session.registry_mut().generate_key();
    let mut batch = BTreeMap::new();
    batch.insert(key_a.to_string(), Value::Int(5));
    batch.insert(key_b.to_string(), Value::Int(7));
    pool.store(&batch, &pool.workers()).await.unwrap();

    let a = session.handle(key_a.clone()).unwrap();
    let b = session.handle(key_b.clone()).unwrap();
    let sum = binary_apply(&mut session, a.into(), b.into(), OperationId::Add, &Options::new())
        .await
        .unwrap();
    assert_eq!(session.pull(&sum).await.unwrap(), vec![Value::Int(12); 4]);

    session.registry_mut().delete_key(&key_a).await.unwrap();
    session.registry_mut().delete_key(&key_b).await.unwrap();

    let found = session.registry_mut().discover_remote().await.unwrap();
    let visible: Vec<_> = found
        .keys()
        .filter(|key| !session.registry().is_reserved(key))
        .collect();
    assert_eq!(visible, vec![sum.key()]);
    assert_eq!(found[sum.key()], pool.workers());

    assert!(!session.close(true).await.unwrap());
}

#[tokio::test]
async fn test_foreign_handle_rejected_before_any_call() {
    let (recording, pool) = recorded(2);
    let mut mine = Session::new(pool.clone(), None).await.unwrap();
    let mut theirs = Session::new(pool.clone(), None).await.unwrap();
    let foreign = theirs.push(Value::Int(1)).await.unwrap();

    recording.clear();
    let err = binary_apply(&mut mine, foreign.clone().into(), 7i64.into(), OperationId::Add, &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContextMismatch { .. }));
    assert_eq!(recording.call_count(), 0);

    let err = unary_apply(&mut mine, &foreign, OperationId::Negative, &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContextMismatch { .. }));
    assert!(mine.pull(&foreign).await.is_err());
    assert_eq!(recording.call_count(), 0);

    // two handles from different sessions
    let local = mine.push(Value::Int(2)).await.unwrap();
    recording.clear();
    let err = mine
        .apply("add", vec![local.into(), foreign.into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContextMismatch { .. }));
    assert_eq!(recording.call_count(), 0);

    // both sessions share the workers, so each sees the other's keys as leftovers
    assert!(theirs.close(false).await.unwrap());
    mine.close(false).await.unwrap();
}

#[tokio::test]
async fn test_scalar_operands_need_a_handle() {
    let (recording, pool) = recorded(2);
    let mut session = Session::new(pool, None).await.unwrap();
    recording.clear();

    let err = session
        .apply("multiply", vec![3i64.into(), 4i64.into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OperandType(_)));

    let err = session
        .apply("sqrt", vec![Operand::Scalar(Value::Float(4.0))], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OperandType(_)));
    assert_eq!(recording.call_count(), 0);

    session.close(true).await.unwrap();
}

#[tokio::test]
async fn test_lookup_and_arity_errors() {
    let (recording, pool) = recorded(2);
    let mut session = Session::new(pool, None).await.unwrap();
    let x = session.push(Value::Int(3)).await.unwrap();
    recording.clear();

    let err = session
        .apply("frobnicate", vec![x.clone().into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownOperation(_)));

    let err = session
        .apply("add", vec![x.clone().into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Arity { expected: 2, actual: 1, .. }));

    let err = session
        .apply("sqrt", vec![x.clone().into(), x.into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Arity { expected: 1, actual: 2, .. }));
    assert_eq!(recording.call_count(), 0);

    session.close(true).await.unwrap();
}

#[tokio::test]
async fn test_one_compute_request_per_call() {
    let (recording, pool) = recorded(3);
    let mut session = Session::new(pool, Some(&[WorkerId(2), WorkerId(0)])).await.unwrap();
    let x = session.push(Value::from(vec![1i64, 2, 3])).await.unwrap();
    let tracked = session.registry().len();
    recording.clear();

    let mut options = Options::new();
    options.insert("out".into(), Value::Null);
    let scaled = session
        .apply("multiply", vec![x.clone().into(), 10i64.into()], &options)
        .await
        .unwrap();

    let requests = recording.compute_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].op, OperationId::Multiply);
    assert_eq!(requests[0].args[0], *x.key());
    assert_eq!(requests[0].into, *scaled.key());
    assert_eq!(requests[0].options, options);

    // the pushed scalar was stored once and deleted after the compute
    let calls = recording.calls();
    let stores = calls
        .iter()
        .filter(|c| matches!(c, PoolCall::Store { .. }))
        .count();
    assert_eq!(stores, 1);
    assert!(matches!(
        calls.last(),
        Some(PoolCall::Execute { command: Command::Delete { .. }, .. })
    ));
    assert_eq!(session.registry().len(), tracked + 1);

    let expected = Value::from(vec![10i64, 20, 30]);
    assert_eq!(session.pull(&scaled).await.unwrap(), vec![expected.clone(), expected]);

    // scalar on the left keeps its position
    let rem = session
        .apply("mod", vec![7i64.into(), x.into()], &Options::new())
        .await
        .unwrap();
    let expected = Value::from(vec![0i64, 1, 1]);
    assert_eq!(session.pull(&rem).await.unwrap()[0], expected);

    assert!(!session.close(true).await.unwrap());
}

#[tokio::test]
async fn test_unary_over_worker_shards() {
    let (_, pool) = recorded(2);
    let mut session = Session::new(pool.clone(), None).await.unwrap();

    // each worker holds its own shard under the same key
    let key = session.registry_mut().generate_key();
    for (worker, shard) in [(WorkerId(0), vec![-1i64, 2]), (WorkerId(1), vec![3, -4])] {
        let mut batch = BTreeMap::new();
        batch.insert(key.to_string(), Value::from(shard));
        pool.store(&batch, &[worker]).await.unwrap();
    }
    let x = session.handle(key).unwrap();

    let abs = session
        .apply("absolute", vec![x.into()], &Options::new())
        .await
        .unwrap();
    assert_eq!(
        session.pull(&abs).await.unwrap(),
        vec![Value::from(vec![1i64, 2]), Value::from(vec![3i64, 4])]
    );

    session.close(true).await.unwrap();
}

#[tokio::test]
async fn test_worker_errors_pass_through() {
    let (_, pool) = recorded(2);
    let mut session = Session::new(pool, None).await.unwrap();
    let list = session.push(Value::from(vec![1i64, 2, 3])).await.unwrap();

    let picked = session
        .apply("take", vec![list.clone().into(), (-1i64).into()], &Options::new())
        .await
        .unwrap();
    assert_eq!(session.pull(&picked).await.unwrap(), vec![Value::Int(3); 2]);

    let err = session
        .apply("take", vec![list.into(), 5i64.into()], &Options::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { index: 5, len: 3 }));

    // keys booked by the failed call are still reclaimed at close
    assert!(!session.close(true).await.unwrap());
}
