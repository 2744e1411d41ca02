//! Element-wise operation table
//!
//! Every operation the array API exposes is one row here: a public name, an
//! arity, and the identifier the worker kernel dispatches on. The dispatcher
//! only ever sees rows, so adding an operation means adding a row.

use crate::common::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Remote operation identifier interpreted by the worker kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    // unary
    Negative,
    Absolute,
    Rint,
    Sign,
    Conjugate,
    Exp,
    Log,
    Expm1,
    Log1p,
    Log10,
    Sqrt,
    Square,
    Reciprocal,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Arcsinh,
    Arccosh,
    Arctanh,
    Invert,
    // binary
    Add,
    Subtract,
    Multiply,
    Divide,
    TrueDivide,
    FloorDivide,
    Power,
    Remainder,
    Fmod,
    Arctan2,
    Hypot,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    Mod,
    Rmod,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Take,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
}

impl Arity {
    pub fn operands(self) -> usize {
        match self {
            Arity::Unary => 1,
            Arity::Binary => 2,
        }
    }
}

#[derive(Debug)]
pub struct OpSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub remote: OperationId,
}

const fn unary(name: &'static str, remote: OperationId) -> OpSpec {
    OpSpec {
        name,
        arity: Arity::Unary,
        remote,
    }
}

const fn binary(name: &'static str, remote: OperationId) -> OpSpec {
    OpSpec {
        name,
        arity: Arity::Binary,
        remote,
    }
}

use OperationId::*;

pub static OPERATIONS: &[OpSpec] = &[
    unary("negative", Negative),
    unary("absolute", Absolute),
    unary("rint", Rint),
    unary("sign", Sign),
    unary("conjugate", Conjugate),
    unary("exp", Exp),
    unary("log", Log),
    unary("expm1", Expm1),
    unary("log1p", Log1p),
    unary("log10", Log10),
    unary("sqrt", Sqrt),
    unary("square", Square),
    unary("reciprocal", Reciprocal),
    unary("sin", Sin),
    unary("cos", Cos),
    unary("tan", Tan),
    unary("arcsin", Arcsin),
    unary("arccos", Arccos),
    unary("arctan", Arctan),
    unary("sinh", Sinh),
    unary("cosh", Cosh),
    unary("tanh", Tanh),
    unary("arcsinh", Arcsinh),
    unary("arccosh", Arccosh),
    unary("arctanh", Arctanh),
    unary("invert", Invert),
    binary("add", Add),
    binary("subtract", Subtract),
    binary("multiply", Multiply),
    binary("divide", Divide),
    binary("true_divide", TrueDivide),
    binary("floor_divide", FloorDivide),
    binary("power", Power),
    binary("remainder", Remainder),
    binary("fmod", Fmod),
    binary("arctan2", Arctan2),
    binary("hypot", Hypot),
    binary("bitwise_and", BitwiseAnd),
    binary("bitwise_or", BitwiseOr),
    binary("bitwise_xor", BitwiseXor),
    binary("left_shift", LeftShift),
    binary("right_shift", RightShift),
    binary("mod", Mod),
    binary("rmod", Rmod),
    binary("less", Less),
    binary("less_equal", LessEqual),
    binary("equal", Equal),
    binary("not_equal", NotEqual),
    binary("greater", Greater),
    binary("greater_equal", GreaterEqual),
    binary("take", Take),
];

static BY_NAME: Lazy<HashMap<&'static str, &'static OpSpec>> =
    Lazy::new(|| OPERATIONS.iter().map(|spec| (spec.name, spec)).collect());

static BY_ID: Lazy<HashMap<OperationId, &'static OpSpec>> =
    Lazy::new(|| OPERATIONS.iter().map(|spec| (spec.remote, spec)).collect());

/// Find an operation by its public name
pub fn lookup(name: &str) -> Result<&'static OpSpec> {
    BY_NAME
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnknownOperation(name.to_string()))
}

impl OperationId {
    pub fn spec(self) -> &'static OpSpec {
        // every variant has a row; see test_table_covers_every_id
        BY_ID[&self]
    }

    pub fn arity(self) -> Arity {
        self.spec().arity
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec().name)
    }
}
