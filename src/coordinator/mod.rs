//! Client-side coordination
//!
//! The coordinator side is responsible for:
//! - Key allocation and reclamation
//! - Subgroup formation and rank mapping
//! - Operation lookup and dispatch
//! - Session lifecycle

pub mod dispatch;
pub mod group;
pub mod keys;
pub mod ops;
pub mod session;

pub use dispatch::{binary_apply, unary_apply, Operand};
pub use group::{form_group, Group, RankMap};
pub use keys::{Key, KeyRegistry, KEY_PREFIX};
pub use ops::{Arity, OpSpec, OperationId};
pub use session::{Handle, Session, SessionId};
