//! The P-Code to IR lifter.
//!
//! P-Code is stack-based; the IR is not. The lifter simulates the evaluation
//! stack with a vector of owned [`Expr`] trees: literal and variable loads
//! push, arithmetic pops two and pushes the combined tree, stores and returns
//! pop into statements. No temporaries are materialised in the common case -
//! each pushed expression is consumed exactly once by the operation that pops
//! it.
//!
//! Lifting is two-pass per procedure:
//!
//! 1. every branch target gets a basic block in an address-to-block map, so
//!    targets always start a block;
//! 2. instructions are walked in order with a current-block cursor, closing
//!    and opening blocks at the boundaries found in pass 1 and wiring CFG
//!    edges as branches are translated.
//!
//! Popping an empty stack aborts the *procedure* with
//! [`crate::Error::StackUnderflow`], never the whole file; the pipeline
//! substitutes a placeholder and moves on.

use rustc_hash::FxHashMap;

use super::{
    expr::{BinaryOp, Expr, UnaryOp, Variable},
    function::Function,
    stmt::{BlockId, Stmt},
    types::IrType,
};
use crate::{
    pcode::{Instruction, InstructionCategory, OperandValue},
    Error, Result,
};

/// Lifts one decoded procedure into an IR function.
///
/// `name` becomes the function name; `address` is the procedure's start VA,
/// which the decoder already folded into every instruction address.
///
/// # Errors
///
/// Returns [`Error::StackUnderflow`] when an instruction pops more values
/// than the simulated stack holds. The caller owns the decision to degrade
/// (the pipeline emits a stub and continues with the next method).
pub fn lift(instructions: &[Instruction], name: &str, address: u32) -> Result<Function> {
    let mut ctx = LiftContext::new(name, address);

    // Pass 1: a block for every branch target, so targets start blocks.
    for instr in instructions {
        if instr.is_branch && instr.branch_offset.is_some_and(|offset| offset != 0) {
            if let Some(target) = instr.branch_target() {
                ctx.block_at(target);
            }
        }
    }

    // Pass 2: translate in order.
    for instr in instructions {
        if let Some(&block) = ctx.address_to_block.get(&instr.address) {
            if block != ctx.current {
                ctx.close_current_into(block);
            }
        }

        ctx.lift_instruction(instr)?;

        if instr.is_return {
            break;
        }
    }

    // An empty body still yields a well-formed single-Return function.
    if instructions.is_empty() {
        ctx.function.push_stmt(ctx.function.entry, Stmt::Return(None));
    }

    Ok(ctx.finish())
}

struct LiftContext {
    function: Function,
    current: BlockId,
    stack: Vec<Expr>,
    address_to_block: FxHashMap<u32, BlockId>,
    locals: FxHashMap<u32, Variable>,
    args: FxHashMap<u32, Variable>,
}

/// Offset keeping argument variable ids clear of local slot ids.
const ARG_ID_BASE: u32 = 0x8000;

impl LiftContext {
    fn new(name: &str, address: u32) -> Self {
        LiftContext {
            function: Function::new(name, address),
            current: 0,
            stack: Vec::new(),
            address_to_block: FxHashMap::default(),
            locals: FxHashMap::default(),
            args: FxHashMap::default(),
        }
    }

    /// The block starting at `address`, created on first use.
    fn block_at(&mut self, address: u32) -> BlockId {
        if let Some(&block) = self.address_to_block.get(&address) {
            return block;
        }
        let block = self.function.add_block();
        self.address_to_block.insert(address, block);
        block
    }

    /// Closes the current block at a pass-1 boundary and moves the cursor.
    ///
    /// The fall-through edge is wired only when the closing block actually
    /// flows off its end: a block ended by `Goto`/`Return` does not, and an
    /// empty block is a dead cursor left behind by an unconditional branch.
    fn close_current_into(&mut self, next: BlockId) {
        let falls_through = self
            .function
            .block(self.current)
            .is_some_and(|block| {
                !block.statements.is_empty()
                    && !matches!(
                        block.statements.last(),
                        Some(Stmt::Goto { .. } | Stmt::Return(_))
                    )
            });

        if falls_through {
            self.function.add_edge(self.current, next);
        }
        self.current = next;
    }

    fn push(&mut self, expr: Expr) {
        self.stack.push(expr);
    }

    fn pop(&mut self, mnemonic: &str) -> Result<Expr> {
        self.stack
            .pop()
            .ok_or_else(|| Error::StackUnderflow(mnemonic.to_string()))
    }

    fn emit(&mut self, stmt: Stmt) {
        self.function.push_stmt(self.current, stmt);
    }

    fn lift_instruction(&mut self, instr: &Instruction) -> Result<()> {
        match instr.category {
            InstructionCategory::Arithmetic | InstructionCategory::String => {
                self.lift_arithmetic(instr)
            }
            InstructionCategory::Comparison => self.lift_comparison(instr),
            InstructionCategory::Logical => self.lift_logical(instr),
            InstructionCategory::Stack | InstructionCategory::Variable => self.lift_stack(instr),
            InstructionCategory::Conversion => self.lift_conversion(instr),
            InstructionCategory::ControlFlow => {
                if instr.is_branch {
                    self.lift_branch(instr)
                } else if instr.is_return {
                    self.lift_return(instr);
                    Ok(())
                } else {
                    // On Error and friends carry no data flow we model.
                    Ok(())
                }
            }
            InstructionCategory::Call => {
                self.lift_call(instr);
                Ok(())
            }
            // Array, Loop, Memory and Unknown encodings have no modelled
            // side effect; their stack traffic is opaque to us.
            _ => Ok(()),
        }
    }

    fn lift_arithmetic(&mut self, instr: &Instruction) -> Result<()> {
        let mnemonic = instr.mnemonic;
        let op = if mnemonic.contains("Add") {
            BinaryOp::Add
        } else if mnemonic.contains("Sub") {
            BinaryOp::Sub
        } else if mnemonic.contains("Mul") {
            BinaryOp::Mul
        } else if mnemonic.contains("Idiv") {
            BinaryOp::IntDiv
        } else if mnemonic.contains("Div") {
            BinaryOp::Div
        } else if mnemonic.contains("Mod") {
            BinaryOp::Mod
        } else if mnemonic.contains("Concat") {
            BinaryOp::Concat
        } else {
            return Ok(()); // string helpers with no expression meaning
        };

        let right = self.pop(mnemonic)?;
        let left = self.pop(mnemonic)?;
        // Variant until type recovery refines it.
        self.push(Expr::binary(op, left, right, IrType::Variant));
        Ok(())
    }

    fn lift_comparison(&mut self, instr: &Instruction) -> Result<()> {
        let mnemonic = instr.mnemonic;
        let op = if mnemonic.contains("Eq") {
            BinaryOp::Eq
        } else if mnemonic.contains("Ne") {
            BinaryOp::Ne
        } else if mnemonic.contains("Lt") {
            BinaryOp::Lt
        } else if mnemonic.contains("Le") {
            BinaryOp::Le
        } else if mnemonic.contains("Gt") {
            BinaryOp::Gt
        } else if mnemonic.contains("Ge") {
            BinaryOp::Ge
        } else {
            return Ok(());
        };

        let right = self.pop(mnemonic)?;
        let left = self.pop(mnemonic)?;
        self.push(Expr::binary(op, left, right, IrType::Boolean));
        Ok(())
    }

    fn lift_logical(&mut self, instr: &Instruction) -> Result<()> {
        let mnemonic = instr.mnemonic;

        if mnemonic.contains("Not") {
            let operand = self.pop(mnemonic)?;
            self.push(Expr::unary(UnaryOp::Not, operand, IrType::Boolean));
            return Ok(());
        }

        let op = if mnemonic.contains("And") {
            BinaryOp::And
        } else if mnemonic.contains("Or") {
            BinaryOp::Or
        } else if mnemonic.contains("Xor") {
            BinaryOp::Xor
        } else {
            return Ok(());
        };

        let right = self.pop(mnemonic)?;
        let left = self.pop(mnemonic)?;
        self.push(Expr::binary(op, left, right, IrType::Boolean));
        Ok(())
    }

    fn lift_stack(&mut self, instr: &Instruction) -> Result<()> {
        let mnemonic = instr.mnemonic;

        if mnemonic.contains("Lit") {
            let Some(operand) = instr.operands.first() else {
                return Ok(());
            };
            let expr = match &operand.value {
                OperandValue::Byte(v) => Expr::int(i64::from(*v)),
                OperandValue::Int16(v) => Expr::int(i64::from(*v)),
                OperandValue::Int32(v) => Expr::int(i64::from(*v)),
                OperandValue::Float(v) => Expr::float(f64::from(*v)),
                OperandValue::String(s) => Expr::string(s.clone()),
            };
            self.push(expr);
            return Ok(());
        }

        if mnemonic.contains("LdLoc") || mnemonic.contains("LoadLocal") {
            if let Some(variable) = self.slot_variable(instr, false) {
                self.push(Expr::var(variable));
            }
            return Ok(());
        }

        if mnemonic.contains("StLoc") || mnemonic.contains("StoreLocal") {
            let value = self.pop(mnemonic)?;
            if let Some(target) = self.slot_variable(instr, false) {
                self.emit(Stmt::Assign { target, value });
            }
            return Ok(());
        }

        if mnemonic.contains("LdArg") {
            if let Some(variable) = self.slot_variable(instr, true) {
                self.push(Expr::var(variable));
            }
            return Ok(());
        }

        if mnemonic.contains("StArg") {
            let value = self.pop(mnemonic)?;
            if let Some(target) = self.slot_variable(instr, true) {
                self.emit(Stmt::Assign { target, value });
            }
            return Ok(());
        }

        // Bos and other statement markers: no data flow.
        Ok(())
    }

    /// The variable for a local or argument slot, registered on first use so
    /// the emitter can declare it.
    fn slot_variable(&mut self, instr: &Instruction, is_arg: bool) -> Option<Variable> {
        let operand = instr.operands.first()?;
        let index = operand.as_index()?;
        let ty = IrType::from(operand.data_type);

        let registry = if is_arg { &mut self.args } else { &mut self.locals };
        let variable = registry.entry(index).or_insert_with(|| {
            if is_arg {
                Variable::new(ARG_ID_BASE + index, format!("arg{index}"), ty)
            } else {
                Variable::new(index, format!("local{index}"), ty)
            }
        });

        Some(variable.clone())
    }

    fn lift_conversion(&mut self, instr: &Instruction) -> Result<()> {
        let Some(target) = conversion_target(instr.mnemonic) else {
            return Ok(());
        };
        let operand = self.pop(instr.mnemonic)?;
        self.push(Expr::cast(operand, target));
        Ok(())
    }

    fn lift_branch(&mut self, instr: &Instruction) -> Result<()> {
        let Some(target_address) = instr.branch_target() else {
            // A branch the decoder could not resolve aborts this procedure;
            // the pipeline downgrades it to a stub for this method only.
            return Err(malformed_error!(
                "{} at 0x{:08X} has no resolvable target",
                instr.mnemonic,
                instr.address
            ));
        };

        let target = self.block_at(target_address);

        if instr.is_conditional_branch {
            let condition = self.pop(instr.mnemonic)?;
            self.emit(Stmt::Branch { condition, target });
            self.function.add_edge(self.current, target);

            // Control continues in a fresh fall-through block.
            let fall_through = self.function.add_block();
            self.function.add_edge(self.current, fall_through);
            self.current = fall_through;
        } else {
            self.emit(Stmt::Goto { target });
            self.function.add_edge(self.current, target);

            // Anything after an unconditional branch is dead until a pass-1
            // boundary re-enters the address map.
            self.current = self.function.add_block();
        }

        Ok(())
    }

    fn lift_call(&mut self, instr: &Instruction) {
        let name = match instr.operands.first().map(|operand| &operand.value) {
            Some(OperandValue::Int32(va)) => {
                #[allow(clippy::cast_sign_loss)]
                let va = *va as u32;
                format!("func_{va:x}")
            }
            Some(OperandValue::Int16(index)) => format!("func_{index:x}"),
            Some(OperandValue::String(s)) => s.clone(),
            _ => "func_unknown".to_string(),
        };

        // The encoding carries no argument count; recovering it would need a
        // calling-convention analysis, so calls start with no arguments.
        let args = Vec::new();

        let produces_value = instr.mnemonic.starts_with("CallFunc")
            || instr.mnemonic.starts_with("CallI4")
            || instr.stack_delta > 0;

        if produces_value {
            self.push(Expr::call(name, args, IrType::Variant));
        } else {
            self.emit(Stmt::Call { name, args });
        }
    }

    fn lift_return(&mut self, instr: &Instruction) {
        // Metadata says whether this return consumes a function result.
        let value = if instr.stack_delta < 0 {
            self.stack.pop()
        } else {
            None
        };
        self.emit(Stmt::Return(value));
    }

    fn finish(mut self) -> Function {
        let mut parameters: Vec<Variable> = self.args.into_values().collect();
        parameters.sort_by_key(|v| v.id);
        self.function.parameters = parameters;

        let mut locals: Vec<Variable> = self.locals.into_values().collect();
        locals.sort_by_key(|v| v.id);
        self.function.locals = locals;

        let returns_value = self.function.blocks.values().any(|block| {
            block
                .statements
                .iter()
                .any(|stmt| matches!(stmt, Stmt::Return(Some(_))))
        });
        self.function.return_type = if returns_value {
            IrType::Variant
        } else {
            IrType::Void
        };

        self.function
    }
}

/// The target type of a conversion opcode, from its mnemonic suffix.
fn conversion_target(mnemonic: &str) -> Option<IrType> {
    if mnemonic.ends_with("I2") {
        Some(IrType::Integer)
    } else if mnemonic.ends_with("I4") {
        Some(IrType::Long)
    } else if mnemonic.ends_with("R4") {
        Some(IrType::Single)
    } else if mnemonic.ends_with("R8") {
        Some(IrType::Double)
    } else if mnemonic.ends_with("Str") {
        Some(IrType::String)
    } else if mnemonic.ends_with("Var") {
        Some(IrType::Variant)
    } else if mnemonic.ends_with("Cy") {
        Some(IrType::Currency)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{ExprKind, Value};
    use crate::pcode;

    fn lift_bytes(body: &[u8], address: u32) -> Result<Function> {
        let instructions = pcode::disassemble_procedure(body, address);
        lift(&instructions, "Test", address)
    }

    #[test]
    fn literal_add_then_return() {
        // LitI4 10; LitI4 20; AddI4; Ret
        let body = [
            0xF5, 0x0A, 0x00, 0x00, 0x00,
            0xF5, 0x14, 0x00, 0x00, 0x00,
            0xA1,
            0x12,
        ];
        let function = lift_bytes(&body, 0x1000).unwrap();

        assert_eq!(function.blocks.len(), 1);
        let entry = function.block(function.entry).unwrap();
        assert_eq!(entry.statements.len(), 1);

        let Stmt::Return(Some(value)) = &entry.statements[0] else {
            panic!("expected a valued return, got {:?}", entry.statements[0]);
        };
        let ExprKind::Binary { op, left, right } = &value.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert_eq!(left.kind, ExprKind::Constant(Value::Int(10)));
        assert_eq!(right.kind, ExprKind::Constant(Value::Int(20)));

        assert_eq!(function.return_type, IrType::Variant);
        function.verify_cfg().unwrap();
    }

    #[test]
    fn empty_body_returns() {
        let function = lift(&[], "Empty", 0).unwrap();
        let entry = function.block(function.entry).unwrap();
        assert_eq!(entry.statements, vec![Stmt::Return(None)]);
        assert_eq!(function.return_type, IrType::Void);
    }

    #[test]
    fn store_registers_local() {
        // LitI2 5; StLocI4 local2; ExitProc
        let body = [0xF3, 0x05, 0x00, 0x0A, 0x02, 0x00, 0x14];
        let function = lift_bytes(&body, 0).unwrap();

        assert_eq!(function.locals.len(), 1);
        assert_eq!(function.locals[0].name, "local2");
        assert_eq!(function.locals[0].ty, IrType::Long);
        assert_eq!(function.return_type, IrType::Void);

        let entry = function.block(function.entry).unwrap();
        assert!(matches!(&entry.statements[0], Stmt::Assign { target, .. } if target.name == "local2"));
    }

    #[test]
    fn conditional_branch_builds_cfg() {
        // LdLocI4 local0; LitI2 0; GtI4; BranchT +1; ExitProc | Bos; ExitProc
        //
        // 0x00: 05 00 00        LdLocI4 local0
        // 0x03: F3 00 00        LitI2 0
        // 0x06: CF              GtI4
        // 0x07: 1D 01 00        BranchT +1 -> 0x0B
        // 0x0A: 14              ExitProc
        // 0x0B: 14              ExitProc        <- branch target
        let body = [
            0x05, 0x00, 0x00,
            0xF3, 0x00, 0x00,
            0xCF,
            0x1D, 0x01, 0x00,
            0x14,
            0x14,
        ];
        let instructions = pcode::disassemble(&body, 0);
        let function = lift(&instructions, "Branchy", 0).unwrap();

        function.verify_cfg().unwrap();

        // Entry branches to the target block and falls through to another.
        let entry = function.block(function.entry).unwrap();
        assert_eq!(entry.successors.len(), 2);
        assert!(entry.branch().is_some());

        // Every successor id resolves.
        for block in function.blocks.values() {
            for succ in &block.successors {
                assert!(function.block(*succ).is_some());
            }
        }
    }

    #[test]
    fn pop_on_empty_stack_is_recoverable() {
        // AddI4 with nothing pushed
        let body = [0xA1, 0x12];
        let err = lift_bytes(&body, 0).unwrap_err();
        assert!(matches!(err, Error::StackUnderflow(m) if m == "AddI4"));
    }

    #[test]
    fn call_forms() {
        // CallNamedSub "Beep"; CallFuncVar 0x401000; StLocVar local0; ExitProc
        let mut body = vec![0x23];
        body.extend(b"B\0e\0e\0p\0\0\0".iter());
        body.extend([0x21, 0x00, 0x10, 0x40, 0x00]); // CallFuncVar 0x401000
        body.extend([0x0D, 0x00, 0x00]); // StLocVar local0
        body.push(0x14); // ExitProc

        let function = lift_bytes(&body, 0).unwrap();
        let entry = function.block(function.entry).unwrap();

        assert!(matches!(&entry.statements[0], Stmt::Call { name, .. } if name == "Beep"));
        let Stmt::Assign { value, .. } = &entry.statements[1] else {
            panic!("expected assignment of call result");
        };
        assert!(matches!(&value.kind, ExprKind::Call { name, .. } if name == "func_401000"));
    }

    #[test]
    fn conversion_lifts_to_cast() {
        // LitI2 3; CI4R8; StLocVar local0; ExitProc
        let body = [0xF3, 0x03, 0x00, 0xE3, 0x0D, 0x00, 0x00, 0x14];
        let function = lift_bytes(&body, 0).unwrap();
        let entry = function.block(function.entry).unwrap();

        let Stmt::Assign { value, .. } = &entry.statements[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Cast { .. }));
        assert_eq!(value.ty, IrType::Double);
    }
}
