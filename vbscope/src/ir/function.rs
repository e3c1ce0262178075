//! Basic blocks and functions.

use std::collections::{BTreeMap, BTreeSet};

use super::{
    expr::Variable,
    stmt::{BlockId, Stmt},
    types::IrType,
};

/// A basic block: a straight-line statement sequence with a single entry and
/// a single exit. Only the last statement may transfer control.
///
/// Predecessors and successors are id sets kept consistent by
/// [`Function::add_edge`]; `A ∈ preds(B)` iff `B ∈ succs(A)`.
#[derive(Debug, Clone)]
pub struct Block {
    /// Unique id within the function.
    pub id: BlockId,
    /// Statements in execution order.
    pub statements: Vec<Stmt>,
    /// Ids of blocks that can transfer here.
    pub predecessors: BTreeSet<BlockId>,
    /// Ids of blocks this block can transfer to.
    pub successors: BTreeSet<BlockId>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId) -> Self {
        Block {
            id,
            statements: Vec::new(),
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
        }
    }

    /// The block's terminator, when its last statement is one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Stmt> {
        self.statements.last().filter(|stmt| stmt.is_terminator())
    }

    /// The condition of a trailing `Branch`, when present anywhere in the
    /// block (it is always last in well-formed blocks).
    #[must_use]
    pub fn branch(&self) -> Option<(&super::expr::Expr, BlockId)> {
        self.statements.iter().find_map(|stmt| match stmt {
            Stmt::Branch { condition, target } => Some((condition, *target)),
            _ => None,
        })
    }
}

/// An IR function: variables, blocks keyed by id, and an entry block.
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name as recovered from the method table.
    pub name: String,
    /// `Void` for Subs, anything else for Functions.
    pub return_type: IrType,
    /// Virtual address of the method body.
    pub address: u32,
    /// Formal parameters.
    pub parameters: Vec<Variable>,
    /// Locals and temporaries, created on demand by the lifter.
    pub locals: Vec<Variable>,
    /// Blocks keyed by id.
    pub blocks: BTreeMap<BlockId, Block>,
    /// Id of the entry block.
    pub entry: BlockId,
    next_block_id: BlockId,
}

impl Function {
    /// Creates a function with an empty entry block (id 0).
    #[must_use]
    pub fn new(name: impl Into<String>, address: u32) -> Self {
        let mut blocks = BTreeMap::new();
        blocks.insert(0, Block::new(0));

        Function {
            name: name.into(),
            return_type: IrType::Variant,
            address,
            parameters: Vec::new(),
            locals: Vec::new(),
            blocks,
            entry: 0,
            next_block_id: 1,
        }
    }

    /// Allocates a fresh empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = self.next_block_id;
        self.next_block_id += 1;
        self.blocks.insert(id, Block::new(id));
        id
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Looks up a block by id, mutably.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    /// Appends a statement to a block.
    pub fn push_stmt(&mut self, block: BlockId, stmt: Stmt) {
        if let Some(block) = self.blocks.get_mut(&block) {
            block.statements.push(stmt);
        }
    }

    /// Records the edge `from -> to` in both directions.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(&from) {
            block.successors.insert(to);
        }
        if let Some(block) = self.blocks.get_mut(&to) {
            block.predecessors.insert(from);
        }
    }

    /// Checks the CFG invariants: edge symmetry and id closure.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    pub fn verify_cfg(&self) -> std::result::Result<(), String> {
        if !self.blocks.contains_key(&self.entry) {
            return Err(format!("entry block {} is not in the block map", self.entry));
        }

        for (id, block) in &self.blocks {
            if block.id != *id {
                return Err(format!("block {} stored under key {id}", block.id));
            }
            for succ in &block.successors {
                let Some(other) = self.blocks.get(succ) else {
                    return Err(format!("block {id} has unknown successor {succ}"));
                };
                if !other.predecessors.contains(id) {
                    return Err(format!("edge {id}->{succ} missing its predecessor link"));
                }
            }
            for pred in &block.predecessors {
                let Some(other) = self.blocks.get(pred) else {
                    return Err(format!("block {id} has unknown predecessor {pred}"));
                };
                if !other.successors.contains(id) {
                    return Err(format!("edge {pred}->{id} missing its successor link"));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;

    #[test]
    fn edges_are_symmetric() {
        let mut function = Function::new("f", 0x1000);
        let b1 = function.add_block();
        let b2 = function.add_block();

        function.add_edge(0, b1);
        function.add_edge(0, b2);
        function.add_edge(b1, b2);

        function.verify_cfg().unwrap();
        assert_eq!(
            function.block(b2).unwrap().predecessors,
            BTreeSet::from([0, b1])
        );
    }

    #[test]
    fn verify_catches_dangling_ids() {
        let mut function = Function::new("f", 0);
        function
            .block_mut(0)
            .unwrap()
            .successors
            .insert(99);
        assert!(function.verify_cfg().is_err());
    }

    #[test]
    fn terminator_detection() {
        let mut function = Function::new("f", 0);
        function.push_stmt(0, Stmt::Nop);
        assert!(function.block(0).unwrap().terminator().is_none());

        function.push_stmt(0, Stmt::Return(Some(Expr::int(1))));
        assert!(function.block(0).unwrap().terminator().is_some());
    }
}
