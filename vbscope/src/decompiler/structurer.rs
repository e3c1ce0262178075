//! Control-flow structuring: CFG regions to `If`/`While`/`Do` trees.
//!
//! The structurer walks blocks in BFS order from the entry and pattern-matches
//! four shapes - self-loop (`Do ... Loop While`), header loop (`While ...
//! Wend`), diamond (`If ... Else ... End If`) and triangle (`If ... End If`).
//! Anything unmatched degrades to labelled blocks with explicit `GoTo`s.
//!
//! CFGs from the VB front ends are assumed reducible; the back-edge test uses
//! id ordering (a successor jumping to a block with a smaller-or-equal id),
//! which holds because block ids are allocated in scan order during lifting.
//! Unmatched regions never fail - they fall through to the goto fallback.
//!
//! A jump statement absorbed by structure (a loop's back edge, a matched
//! header's branch, a goto onto the lexically next node or a region's merge)
//! is recorded in [`StructureResult::suppressed`] so the emitter does not
//! print it; every target of a *surviving* jump lands in
//! [`StructureResult::labeled`] and gets a `Label_<id>:` line.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;

use crate::ir::{Block, BlockId, Expr, Function, Stmt};

/// A recovered structured-control-flow node.
#[derive(Debug, Clone)]
pub enum Structured {
    /// An ordered list of child nodes, optionally followed by basic blocks
    /// whose statements are emitted verbatim.
    Sequence {
        /// Child nodes, in order.
        children: Vec<Structured>,
        /// Blocks emitted verbatim after the children.
        blocks: Vec<BlockId>,
    },
    /// `If <condition> Then <then_body> End If`.
    IfThen {
        /// The branch condition.
        condition: Expr,
        /// Body executed when the condition holds.
        then_body: Box<Structured>,
    },
    /// `If <condition> Then <then_body> Else <else_body> End If`.
    IfThenElse {
        /// The branch condition.
        condition: Expr,
        /// Body executed when the condition holds.
        then_body: Box<Structured>,
        /// Body executed otherwise.
        else_body: Box<Structured>,
    },
    /// `While <condition> <body> Wend`.
    While {
        /// The loop condition.
        condition: Expr,
        /// The loop body.
        body: Box<Structured>,
    },
    /// `Do <body> Loop While <condition>`.
    DoWhile {
        /// The post-test condition.
        condition: Expr,
        /// The loop body.
        body: Box<Structured>,
    },
    /// `Do <body> Loop Until <condition>`.
    DoUntil {
        /// The post-test condition.
        condition: Expr,
        /// The loop body.
        body: Box<Structured>,
    },
    /// Irreducible fallback: blocks printed with labels and explicit gotos.
    GotoLabel {
        /// The contained blocks.
        blocks: Vec<BlockId>,
    },
}

/// The structuring outcome for one function.
#[derive(Debug)]
pub struct StructureResult {
    /// The structured tree, rooted at a sequence.
    pub tree: Structured,
    /// Blocks whose trailing jump statement is absorbed by the structure.
    pub suppressed: FxHashSet<BlockId>,
    /// Blocks that need a `Label_<id>:` line because a surviving jump
    /// targets them.
    pub labeled: FxHashSet<BlockId>,
}

/// Structures a function's CFG.
#[must_use]
pub fn structure(function: &Function) -> StructureResult {
    let order = bfs_order(function);
    let mut ctx = Structurer {
        function,
        processed: FxHashSet::default(),
        suppressed: FxHashSet::default(),
    };

    let tree = ctx.analyze_region(&order);

    let labeled = surviving_jump_targets(function, &ctx.suppressed);
    StructureResult {
        tree,
        suppressed: ctx.suppressed,
        labeled,
    }
}

/// Blocks in BFS order from the entry.
fn bfs_order(function: &Function) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut visited = FxHashSet::default();
    let mut queue = VecDeque::new();

    queue.push_back(function.entry);
    visited.insert(function.entry);

    while let Some(id) = queue.pop_front() {
        order.push(id);
        let Some(block) = function.block(id) else { continue };
        for &succ in &block.successors {
            if visited.insert(succ) {
                queue.push_back(succ);
            }
        }
    }

    order
}

/// Targets of every jump the emitter will actually print.
fn surviving_jump_targets(
    function: &Function,
    suppressed: &FxHashSet<BlockId>,
) -> FxHashSet<BlockId> {
    let mut labeled = FxHashSet::default();

    for block in function.blocks.values() {
        let last = block.statements.len().saturating_sub(1);
        for (index, stmt) in block.statements.iter().enumerate() {
            let target = match stmt {
                Stmt::Branch { target, .. } | Stmt::Goto { target } => *target,
                _ => continue,
            };
            let absorbed = index == last && suppressed.contains(&block.id);
            if !absorbed {
                labeled.insert(target);
            }
        }
    }

    labeled
}

struct Structurer<'a> {
    function: &'a Function,
    processed: FxHashSet<BlockId>,
    suppressed: FxHashSet<BlockId>,
}

impl Structurer<'_> {
    /// Structures one region given as an ordered block list.
    fn analyze_region(&mut self, blocks: &[BlockId]) -> Structured {
        let mut children = Vec::new();

        for (index, &id) in blocks.iter().enumerate() {
            if self.processed.contains(&id) {
                continue;
            }
            let Some(block) = self.function.block(id) else {
                continue;
            };

            if let Some(node) = self.try_do_while(block) {
                children.push(node);
                continue;
            }

            // The header patterns absorb the block's branch but not any
            // statements before it; emit the header verbatim first so every
            // block appears in the tree exactly once.
            if let Some(node) = self.try_while(block) {
                children.push(Structured::Sequence {
                    children: Vec::new(),
                    blocks: vec![id],
                });
                children.push(node);
                continue;
            }
            if let Some(node) = self.try_if_then_else(block) {
                children.push(Structured::Sequence {
                    children: Vec::new(),
                    blocks: vec![id],
                });
                children.push(node);
                continue;
            }
            if let Some(node) = self.try_if_then(block) {
                children.push(Structured::Sequence {
                    children: Vec::new(),
                    blocks: vec![id],
                });
                children.push(node);
                continue;
            }

            // Default: the block stands alone. A goto onto the lexically
            // next node is just fall-through made explicit; absorb it.
            self.processed.insert(id);
            if let Some(Stmt::Goto { target }) = block.statements.last() {
                let next = blocks[index + 1..]
                    .iter()
                    .find(|candidate| !self.processed.contains(candidate));
                if next == Some(target) {
                    self.suppressed.insert(id);
                }
            }

            let has_surviving_jump = block
                .statements
                .last()
                .is_some_and(Stmt::is_jump)
                && !self.suppressed.contains(&id);

            if has_surviving_jump {
                children.push(Structured::GotoLabel { blocks: vec![id] });
            } else {
                children.push(Structured::Sequence {
                    children: Vec::new(),
                    blocks: vec![id],
                });
            }
        }

        Structured::Sequence {
            children,
            blocks: Vec::new(),
        }
    }

    /// `Do ... Loop While`: a block branching back to itself.
    fn try_do_while(&mut self, block: &Block) -> Option<Structured> {
        if block.successors.len() != 2 || !block.successors.contains(&block.id) {
            return None;
        }
        let (condition, target) = block.branch()?;
        if target != block.id {
            return None;
        }

        self.processed.insert(block.id);
        self.suppressed.insert(block.id);

        Some(Structured::DoWhile {
            condition: condition.clone(),
            body: Box::new(Structured::Sequence {
                children: Vec::new(),
                blocks: vec![block.id],
            }),
        })
    }

    /// `While ... Wend`: a two-way header whose branch-taken successor
    /// jumps straight back to it.
    fn try_while(&mut self, block: &Block) -> Option<Structured> {
        if block.successors.len() != 2 {
            return None;
        }
        let (condition, branch_target) = block.branch()?;

        let mut successors = block.successors.iter().copied();
        let first = successors.next()?;
        let second = successors.next()?;
        let (body, exit) = if branch_target == first {
            (first, second)
        } else if branch_target == second {
            (second, first)
        } else {
            return None;
        };

        // The branch target must loop back for this to be a loop header.
        let body_block = self.function.block(body)?;
        let is_back_edge = body_block.successors.contains(&block.id) && block.id <= body;
        if !is_back_edge {
            return None;
        }

        let condition = condition.clone();
        let region = self.collect_region(body, Some(exit), block.id);

        self.processed.insert(block.id);
        self.suppressed.insert(block.id);
        self.absorb_jumps_to(&region, block.id);

        let body_tree = self.analyze_region(&region);
        for &id in &region {
            self.processed.insert(id);
        }

        Some(Structured::While {
            condition,
            body: Box::new(body_tree),
        })
    }

    /// `If ... Else ... End If`: a two-way split whose arms are disjoint
    /// regions, ideally reconverging at a merge block.
    fn try_if_then_else(&mut self, block: &Block) -> Option<Structured> {
        if block.successors.len() != 2 {
            return None;
        }
        let (condition, then_id) = block.branch()?;

        let else_id = block
            .successors
            .iter()
            .copied()
            .find(|&succ| succ != then_id)?;

        // When the then arm's only successor is the other arm, that other
        // arm is really the merge point: a triangle, not a diamond.
        let then_block = self.function.block(then_id)?;
        if then_block.successors.len() == 1 && then_block.successors.contains(&else_id) {
            return None;
        }

        // The merge is any common successor; it may be absent when both
        // arms return.
        let else_block = self.function.block(else_id)?;
        let merge = then_block
            .successors
            .iter()
            .copied()
            .find(|succ| else_block.successors.contains(succ));

        let condition = condition.clone();
        let then_region = self.collect_region(then_id, merge, block.id);
        let else_region = self.collect_region(else_id, merge, block.id);

        self.processed.insert(block.id);
        self.suppressed.insert(block.id);
        if let Some(merge) = merge {
            self.absorb_jumps_to(&then_region, merge);
            self.absorb_jumps_to(&else_region, merge);
        }

        let then_body = self.analyze_region(&then_region);
        for &id in &then_region {
            self.processed.insert(id);
        }
        let else_body = self.analyze_region(&else_region);
        for &id in &else_region {
            self.processed.insert(id);
        }

        Some(Structured::IfThenElse {
            condition,
            then_body: Box::new(then_body),
            else_body: Box::new(else_body),
        })
    }

    /// `If ... End If`: a two-way split whose fall-through is the merge.
    fn try_if_then(&mut self, block: &Block) -> Option<Structured> {
        if block.successors.len() != 2 {
            return None;
        }
        let (condition, then_id) = block.branch()?;

        let merge = block
            .successors
            .iter()
            .copied()
            .find(|&succ| succ != then_id)?;

        let condition = condition.clone();
        let then_region = self.collect_region(then_id, Some(merge), block.id);

        self.processed.insert(block.id);
        self.suppressed.insert(block.id);
        self.absorb_jumps_to(&then_region, merge);

        let then_body = self.analyze_region(&then_region);
        for &id in &then_region {
            self.processed.insert(id);
        }

        Some(Structured::IfThen {
            condition,
            then_body: Box::new(then_body),
        })
    }

    /// BFS region collection from `start`, never crossing `exit` or
    /// `exclude`.
    fn collect_region(
        &self,
        start: BlockId,
        exit: Option<BlockId>,
        exclude: BlockId,
    ) -> Vec<BlockId> {
        if Some(start) == exit || start == exclude {
            return Vec::new();
        }

        let mut region = Vec::new();
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::new();

        queue.push_back(start);
        visited.insert(start);

        while let Some(id) = queue.pop_front() {
            if Some(id) == exit || id == exclude || self.processed.contains(&id) {
                continue;
            }
            region.push(id);

            let Some(block) = self.function.block(id) else { continue };
            for &succ in &block.successors {
                if Some(succ) == exit || succ == exclude {
                    continue;
                }
                if visited.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }

        region
    }

    /// Marks region blocks whose trailing goto targets `target` as absorbed
    /// (back edges and jumps to a merge are implied by the structure).
    fn absorb_jumps_to(&mut self, region: &[BlockId], target: BlockId) {
        for &id in region {
            let Some(block) = self.function.block(id) else { continue };
            if let Some(Stmt::Goto { target: t }) = block.statements.last() {
                if *t == target {
                    self.suppressed.insert(id);
                }
            }
        }
    }
}
