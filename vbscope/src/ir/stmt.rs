//! IR statements.

use super::expr::{Expr, Variable};

/// Identifier of a basic block within its function.
///
/// Blocks refer to each other by id only; there are no block-to-block
/// pointers anywhere in the IR, which keeps functions movable and clonable
/// without fix-ups.
pub type BlockId = u32;

/// One statement. Owned by exactly one basic block, ordered within it.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `target = value`.
    Assign {
        /// Destination variable.
        target: Variable,
        /// Assigned value.
        value: Expr,
    },
    /// `*address = value`.
    Store {
        /// Address expression.
        address: Expr,
        /// Stored value.
        value: Expr,
    },
    /// A call in statement position (result discarded).
    Call {
        /// Callee display name.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// Return, with the function result when there is one.
    Return(Option<Expr>),
    /// Conditional transfer to `target`; control falls through when the
    /// condition is false.
    Branch {
        /// The condition.
        condition: Expr,
        /// Target block id.
        target: BlockId,
    },
    /// Unconditional transfer.
    Goto {
        /// Target block id.
        target: BlockId,
    },
    /// A label marker.
    Label(u32),
    /// No operation.
    Nop,
}

impl Stmt {
    /// True for statements that end a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Stmt::Branch { .. } | Stmt::Goto { .. } | Stmt::Return(_))
    }

    /// True for the control transfers that structuring can absorb.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(self, Stmt::Branch { .. } | Stmt::Goto { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators() {
        assert!(Stmt::Return(None).is_terminator());
        assert!(Stmt::Goto { target: 1 }.is_terminator());
        assert!(!Stmt::Nop.is_terminator());
        assert!(!Stmt::Return(None).is_jump());
        assert!(Stmt::Goto { target: 1 }.is_jump());
    }
}
