//! Typed three-address intermediate representation.
//!
//! The IR is value-oriented: expressions own their children, statements own
//! their expressions, blocks own their statements, functions own their
//! blocks. Blocks reference each other by integer id only, so a function can
//! be moved or cloned wholesale and the CFG stays serialisable - there are
//! no reference cycles to fix up.
//!
//! [`lifter`] builds functions from decoded P-Code; the
//! [`crate::decompiler`] passes consume them.

pub mod expr;
pub mod function;
pub mod lifter;
pub mod stmt;
pub mod types;

pub use expr::{BinaryOp, Expr, ExprKind, UnaryOp, Value, Variable};
pub use function::{Block, Function};
pub use lifter::lift;
pub use stmt::{BlockId, Stmt};
pub use types::IrType;
