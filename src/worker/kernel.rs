//! Reference element-wise kernel
//!
//! Evaluates table operations over a worker's local values. Lists are
//! treated as the worker's shard and scalars broadcast against them. Integer
//! arithmetic stays integral where it can; everything else goes through f64.

use crate::common::{Error, Result, Value};
use crate::coordinator::ops::{Arity, OperationId};

pub fn apply(op: OperationId, args: &[Value]) -> Result<Value> {
    match (op.arity(), args) {
        (Arity::Unary, [a]) => map_unary(op, a),
        (Arity::Binary, [a, b]) if op == OperationId::Take => take(a, b),
        (Arity::Binary, [a, b]) => broadcast(op, a, b),
        (arity, _) => Err(Error::Arity {
            op: op.to_string(),
            expected: arity.operands(),
            actual: args.len(),
        }),
    }
}

fn map_unary(op: OperationId, v: &Value) -> Result<Value> {
    match v {
        Value::List(items) => items
            .iter()
            .map(|item| map_unary(op, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        _ => unary_scalar(op, v),
    }
}

fn broadcast(op: OperationId, a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Err(Error::ShapeMismatch {
                    left: xs.len(),
                    right: ys.len(),
                });
            }
            xs.iter()
                .zip(ys)
                .map(|(x, y)| broadcast(op, x, y))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        (Value::List(xs), _) => xs
            .iter()
            .map(|x| broadcast(op, x, b))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (_, Value::List(ys)) => ys
            .iter()
            .map(|y| broadcast(op, a, y))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        _ => binary_scalar(op, a, b),
    }
}

fn take(a: &Value, index: &Value) -> Result<Value> {
    let Value::List(items) = a else {
        return Err(unsupported(OperationId::Take, a));
    };
    let Some(i) = index.as_int() else {
        return Err(unsupported(OperationId::Take, index));
    };
    let len = items.len();
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(Error::IndexOutOfRange { index: i, len });
    }
    Ok(items[resolved as usize].clone())
}

fn unsupported(op: OperationId, v: &Value) -> Error {
    Error::OperandType(format!("{} does not support {} operands", op, v.kind()))
}

fn unary_scalar(op: OperationId, v: &Value) -> Result<Value> {
    use OperationId::*;

    match v {
        Value::Bool(b) if op == Invert => return Ok(Value::Bool(!b)),
        Value::Bool(b) => return unary_scalar(op, &Value::Int(*b as i64)),
        Value::Int(i) => {
            let i = *i;
            match op {
                Negative => return Ok(Value::Int(i.wrapping_neg())),
                Absolute => return Ok(Value::Int(i.wrapping_abs())),
                Sign => return Ok(Value::Int(i.signum())),
                Square => return Ok(Value::Int(i.wrapping_mul(i))),
                Invert => return Ok(Value::Int(!i)),
                Rint | Conjugate => return Ok(Value::Int(i)),
                _ => {}
            }
        }
        Value::Float(_) if op == Invert => return Err(unsupported(op, v)),
        Value::Float(_) => {}
        _ => return Err(unsupported(op, v)),
    }

    let Some(x) = v.as_float() else {
        return Err(unsupported(op, v));
    };
    let y = match op {
        Negative => -x,
        Absolute => x.abs(),
        Rint => x.round_ties_even(),
        Sign => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        Conjugate => x,
        Exp => x.exp(),
        Log => x.ln(),
        Expm1 => x.exp_m1(),
        Log1p => x.ln_1p(),
        Log10 => x.log10(),
        Sqrt => x.sqrt(),
        Square => x * x,
        Reciprocal => 1.0 / x,
        Sin => x.sin(),
        Cos => x.cos(),
        Tan => x.tan(),
        Arcsin => x.asin(),
        Arccos => x.acos(),
        Arctan => x.atan(),
        Sinh => x.sinh(),
        Cosh => x.cosh(),
        Tanh => x.tanh(),
        Arcsinh => x.asinh(),
        Arccosh => x.acosh(),
        Arctanh => x.atanh(),
        _ => return Err(unsupported(op, v)),
    };
    Ok(Value::Float(y))
}

fn comparison(op: OperationId, a: &Value, b: &Value) -> Option<Result<Value>> {
    use std::cmp::Ordering;
    use OperationId::*;

    if !matches!(op, Less | LessEqual | Equal | NotEqual | Greater | GreaterEqual) {
        return None;
    }
    let ordering = match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Some(Err(unsupported(op, if a.is_scalar() { b } else { a }))),
        },
    };
    // NaN compares unequal to everything
    let result = match (op, ordering) {
        (NotEqual, None) => true,
        (_, None) => false,
        (Less, Some(o)) => o == Ordering::Less,
        (LessEqual, Some(o)) => o != Ordering::Greater,
        (Equal, Some(o)) => o == Ordering::Equal,
        (NotEqual, Some(o)) => o != Ordering::Equal,
        (Greater, Some(o)) => o == Ordering::Greater,
        (_, Some(o)) => o != Ordering::Less,
    };
    Some(Ok(Value::Bool(result)))
}

fn binary_scalar(op: OperationId, a: &Value, b: &Value) -> Result<Value> {
    use OperationId::*;

    if let Some(result) = comparison(op, a, b) {
        return result;
    }
    if op == Rmod {
        return binary_scalar(Mod, b, a);
    }

    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if let Some(result) = binary_int(op, x, y) {
            return result.map(Value::Int);
        }
    }

    let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
        return Err(unsupported(op, if a.is_scalar() { b } else { a }));
    };
    let z = match op {
        Add => x + y,
        Subtract => x - y,
        Multiply => x * y,
        Divide | TrueDivide => x / y,
        FloorDivide => (x / y).floor(),
        Power => x.powf(y),
        Remainder | Mod => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        Fmod => x % y,
        Arctan2 => x.atan2(y),
        Hypot => x.hypot(y),
        _ => return Err(unsupported(op, a)),
    };
    Ok(Value::Float(z))
}

/// Integer path; `None` means the operation is computed in floating point.
fn binary_int(op: OperationId, x: i64, y: i64) -> Option<Result<i64>> {
    use OperationId::*;

    let zero_division = || -> Result<i64> { Err(Error::OperandType("integer division by zero".into())) };
    let result = match op {
        Add => Ok(x.wrapping_add(y)),
        Subtract => Ok(x.wrapping_sub(y)),
        Multiply => Ok(x.wrapping_mul(y)),
        FloorDivide if y == 0 => zero_division(),
        FloorDivide => {
            let q = x.wrapping_div(y);
            if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) {
                Ok(q - 1)
            } else {
                Ok(q)
            }
        }
        Remainder | Mod | Fmod if y == 0 => zero_division(),
        Remainder | Mod => {
            let r = x.wrapping_rem(y);
            if r != 0 && ((r < 0) != (y < 0)) {
                Ok(r + y)
            } else {
                Ok(r)
            }
        }
        Fmod => Ok(x.wrapping_rem(y)),
        Power if y < 0 => Err(Error::OperandType(
            "integers to negative integer powers are not allowed".into(),
        )),
        Power => Ok(x.wrapping_pow(y.min(u32::MAX as i64) as u32)),
        BitwiseAnd => Ok(x & y),
        BitwiseOr => Ok(x | y),
        BitwiseXor => Ok(x ^ y),
        LeftShift | RightShift if y < 0 => {
            Err(Error::OperandType("negative shift count".into()))
        }
        LeftShift => Ok(u32::try_from(y)
            .ok()
            .and_then(|s| x.checked_shl(s))
            .unwrap_or(0)),
        RightShift => Ok(u32::try_from(y)
            .ok()
            .and_then(|s| x.checked_shr(s))
            .unwrap_or(if x < 0 { -1 } else { 0 })),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationId::*;

    #[test]
    fn test_integer_add_stays_integral() {
        assert_eq!(apply(Add, &[Value::Int(5), Value::Int(7)]).unwrap(), Value::Int(12));
    }

    #[test]
    fn test_broadcast_scalar_over_list() {
        let shard = Value::from(vec![1i64, 2, 3]);
        let out = apply(Multiply, &[shard, Value::Int(2)]).unwrap();
        assert_eq!(out, Value::from(vec![2i64, 4, 6]));
    }

    #[test]
    fn test_list_length_mismatch() {
        let a = Value::from(vec![1i64, 2]);
        let b = Value::from(vec![1i64, 2, 3]);
        assert!(matches!(
            apply(Add, &[a, b]),
            Err(Error::ShapeMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(apply(FloorDivide, &[Value::Int(-7), Value::Int(2)]).unwrap(), Value::Int(-4));
        assert_eq!(apply(Mod, &[Value::Int(-7), Value::Int(3)]).unwrap(), Value::Int(2));
        assert_eq!(apply(Fmod, &[Value::Int(-7), Value::Int(3)]).unwrap(), Value::Int(-1));
        assert_eq!(apply(Rmod, &[Value::Int(3), Value::Int(-7)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_true_divide_is_float() {
        assert_eq!(
            apply(TrueDivide, &[Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(apply(Less, &[Value::Int(1), Value::Float(1.5)]).unwrap(), Value::Bool(true));
        assert_eq!(
            apply(NotEqual, &[Value::Float(f64::NAN), Value::Float(f64::NAN)]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(apply(Negative, &[Value::Int(3)]).unwrap(), Value::Int(-3));
        assert_eq!(apply(Invert, &[Value::Bool(true)]).unwrap(), Value::Bool(false));
        assert_eq!(apply(Sqrt, &[Value::Int(9)]).unwrap(), Value::Float(3.0));
        assert_eq!(apply(Sign, &[Value::Float(0.0)]).unwrap(), Value::Float(0.0));
        assert!(matches!(apply(Invert, &[Value::Float(1.0)]), Err(Error::OperandType(_))));
    }

    #[test]
    fn test_take_out_of_range() {
        let shard = Value::from(vec![10i64, 20, 30]);
        assert_eq!(apply(Take, &[shard.clone(), Value::Int(-1)]).unwrap(), Value::Int(30));
        assert!(matches!(
            apply(Take, &[shard, Value::Int(11)]),
            Err(Error::IndexOutOfRange { index: 11, len: 3 })
        ));
    }

    #[test]
    fn test_wrong_operand_count() {
        assert!(matches!(
            apply(Add, &[Value::Int(1)]),
            Err(Error::Arity { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_strings_rejected() {
        assert!(matches!(
            apply(Add, &[Value::Str("a".into()), Value::Int(1)]),
            Err(Error::OperandType(_))
        ));
    }
}
