//! Element-wise dispatch
//!
//! Two shapes cover every table operation: unary over one handle, binary over
//! two operands of which at least one is a handle. Both validate session
//! ownership before touching the pool, allocate exactly one result key, and
//! issue exactly one compute request to the session's workers.

use crate::common::{Error, Result, Value};
use crate::coordinator::keys::Key;
use crate::coordinator::ops::{Arity, OperationId};
use crate::coordinator::session::{Handle, Session};
use crate::pool::{Command, ComputeRequest, Options};

/// Operand of a binary operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Handle(Handle),
    Scalar(Value),
}

impl From<Handle> for Operand {
    fn from(handle: Handle) -> Self {
        Operand::Handle(handle)
    }
}

impl From<&Handle> for Operand {
    fn from(handle: &Handle) -> Self {
        Operand::Handle(handle.clone())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Scalar(value)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Scalar(Value::Int(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Scalar(Value::Float(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Scalar(Value::Bool(v))
    }
}

fn expect_arity(op: OperationId, arity: Arity) -> Result<()> {
    if op.arity() != arity {
        return Err(Error::Arity {
            op: op.to_string(),
            expected: op.arity().operands(),
            actual: arity.operands(),
        });
    }
    Ok(())
}

pub async fn unary_apply(
    session: &mut Session,
    operand: &Handle,
    op: OperationId,
    options: &Options,
) -> Result<Handle> {
    expect_arity(op, Arity::Unary)?;
    session.check_owns(operand)?;

    let result = session.registry_mut().generate_key();
    issue(session, op, vec![operand.key().clone()], options, &result).await?;
    Ok(session.handle_unchecked(result))
}

pub async fn binary_apply(
    session: &mut Session,
    a: Operand,
    b: Operand,
    op: OperationId,
    options: &Options,
) -> Result<Handle> {
    expect_arity(op, Arity::Binary)?;

    // every check happens before the first pool call
    match (&a, &b) {
        (Operand::Handle(x), Operand::Handle(y)) => {
            if x.session() != y.session() {
                return Err(Error::ContextMismatch {
                    expected: x.session(),
                    found: y.session(),
                });
            }
            session.check_owns(x)?;
        }
        (Operand::Handle(x), Operand::Scalar(s)) | (Operand::Scalar(s), Operand::Handle(x)) => {
            session.check_owns(x)?;
            if !s.is_scalar() {
                return Err(Error::OperandType(format!(
                    "expected a scalar next to a handle, got {}",
                    s.kind()
                )));
            }
        }
        (Operand::Scalar(_), Operand::Scalar(_)) => {
            return Err(Error::OperandType(
                "at least one operand must be a distributed handle".into(),
            ));
        }
    }

    let mut pushed = Vec::new();
    let mut args = Vec::with_capacity(2);
    for operand in [a, b] {
        match operand {
            Operand::Handle(handle) => args.push(handle.key().clone()),
            Operand::Scalar(value) => {
                let key = push_scalar(session, value).await?;
                pushed.push(key.clone());
                args.push(key);
            }
        }
    }

    let result = session.registry_mut().generate_key();
    issue(session, op, args, options, &result).await?;

    for key in &pushed {
        session.registry_mut().delete_key(key).await?;
    }
    Ok(session.handle_unchecked(result))
}

async fn push_scalar(session: &mut Session, value: Value) -> Result<Key> {
    let mut keys = session.registry_mut().push_values(vec![value]).await?;
    keys.pop()
        .ok_or_else(|| Error::Other("scalar push returned no key".into()))
}

async fn issue(
    session: &Session,
    op: OperationId,
    args: Vec<Key>,
    options: &Options,
    into: &Key,
) -> Result<()> {
    tracing::debug!("{} {} -> {}", session.id(), op, into);
    let request = ComputeRequest {
        op,
        args,
        options: options.clone(),
        into: into.clone(),
    };
    session
        .pool()
        .execute(&Command::Compute(request), session.worker_set())
        .await
}
