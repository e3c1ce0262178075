//! Type recovery: narrowing Variant-typed values.
//!
//! The lifter types almost everything `Variant` because P-Code rarely says
//! more. This single-pass constraint propagator seeds from declared
//! parameter and local types, then walks every assignment: a Variant-typed
//! target takes the inferred type of its value, while an explicitly typed
//! target keeps its declaration. There is no fixpoint iteration - one pass
//! over the blocks in id order is what the source shapes produced by the VB
//! front ends need - and recovery never fails: anything unprovable stays
//! Variant.

use rustc_hash::FxHashMap;

use crate::ir::{BinaryOp, Expr, ExprKind, Function, IrType, Stmt, UnaryOp, Value};

/// The per-function type recovery state.
#[derive(Debug, Default)]
pub struct TypeRecovery {
    variable_types: FxHashMap<u32, IrType>,
}

impl TypeRecovery {
    /// Runs recovery over a function.
    #[must_use]
    pub fn analyze(function: &Function) -> Self {
        let mut recovery = TypeRecovery::default();

        for parameter in &function.parameters {
            recovery
                .variable_types
                .insert(parameter.id, parameter.ty.clone());
        }
        for local in &function.locals {
            recovery.variable_types.insert(local.id, local.ty.clone());
        }

        for block in function.blocks.values() {
            for stmt in &block.statements {
                recovery.visit_statement(stmt);
            }
        }

        recovery
    }

    /// The recorded type of a variable, `Variant` when nothing is known.
    #[must_use]
    pub fn variable_type(&self, id: u32) -> IrType {
        self.variable_types
            .get(&id)
            .cloned()
            .unwrap_or(IrType::Variant)
    }

    /// Writes the recovered types back into the function's declarations so
    /// the emitter's `Dim` lines and parameter list show them.
    pub fn apply(&self, function: &mut Function) {
        for parameter in &mut function.parameters {
            parameter.ty = self.variable_type(parameter.id);
        }
        for local in &mut function.locals {
            local.ty = self.variable_type(local.id);
        }
    }

    fn visit_statement(&mut self, stmt: &Stmt) {
        // Branch, Return and Call expressions are traversed for typing only;
        // inference is pure, so only assignments change recorded state.
        if let Stmt::Assign { target, value } = stmt {
            let current = self.variable_type(target.id);
            if current == IrType::Variant {
                self.variable_types.insert(target.id, self.infer(value));
            }
        }
    }

    /// Infers the type of an expression under the current variable state.
    #[must_use]
    pub fn infer(&self, expr: &Expr) -> IrType {
        match &expr.kind {
            ExprKind::Constant(value) => match value {
                Value::Int(_) => IrType::Long,
                Value::Float(_) => IrType::Double,
                Value::Str(_) => IrType::String,
                Value::Bool(_) => IrType::Boolean,
            },
            ExprKind::Variable(variable) => self.variable_type(variable.id),
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => IrType::Boolean,
                UnaryOp::Negate => {
                    let ty = self.infer(operand);
                    if ty.is_numeric() {
                        ty
                    } else {
                        IrType::Variant
                    }
                }
            },
            ExprKind::Binary { op, left, right } => self.infer_binary(*op, left, right),
            // No signature database is assumed, so calls stay Variant.
            ExprKind::Call { .. } | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                IrType::Variant
            }
            ExprKind::Cast { .. } => expr.ty.clone(),
            ExprKind::Load { .. } => IrType::Variant,
        }
    }

    fn infer_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> IrType {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let left = self.infer(left);
                let right = self.infer(right);
                if left == IrType::String || right == IrType::String {
                    return IrType::String;
                }
                unify(&left, &right)
            }
            BinaryOp::IntDiv | BinaryOp::Mod => IrType::Long,
            BinaryOp::Concat => IrType::String,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Xor => IrType::Boolean,
        }
    }
}

/// Unifies two types: equal types stay, Variant yields to the other side,
/// numerics widen (Double > Single > Currency > Long > Integer > Byte),
/// anything else collapses to Variant.
#[must_use]
pub fn unify(left: &IrType, right: &IrType) -> IrType {
    if left == right {
        return left.clone();
    }
    if *left == IrType::Variant {
        return right.clone();
    }
    if *right == IrType::Variant {
        return left.clone();
    }

    match (left.numeric_rank(), right.numeric_rank()) {
        (Some(l), Some(r)) => {
            if l >= r {
                left.clone()
            } else {
                right.clone()
            }
        }
        _ => IrType::Variant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Variable;

    #[test]
    fn unify_widens() {
        assert_eq!(unify(&IrType::Integer, &IrType::Long), IrType::Long);
        assert_eq!(unify(&IrType::Double, &IrType::Byte), IrType::Double);
        assert_eq!(unify(&IrType::Currency, &IrType::Single), IrType::Single);
        assert_eq!(unify(&IrType::Variant, &IrType::String), IrType::String);
        assert_eq!(unify(&IrType::Long, &IrType::Long), IrType::Long);
        assert_eq!(unify(&IrType::String, &IrType::Long), IrType::Variant);
    }

    #[test]
    fn assignment_narrows_variant_target() {
        let mut function = Function::new("f", 0);
        let message = Variable::new(0, "message", IrType::Variant);
        function.locals.push(message.clone());

        let concat = Expr::binary(
            BinaryOp::Concat,
            Expr::string("Hello, "),
            Expr::var(Variable::new(1, "name", IrType::Variant)),
            IrType::Variant,
        );
        function.push_stmt(0, Stmt::Assign { target: message, value: concat });

        let recovery = TypeRecovery::analyze(&function);
        assert_eq!(recovery.variable_type(0), IrType::String);

        let mut function = function;
        recovery.apply(&mut function);
        assert_eq!(function.locals[0].ty, IrType::String);
    }

    #[test]
    fn declared_types_win() {
        let mut function = Function::new("f", 0);
        let counter = Variable::new(0, "counter", IrType::Integer);
        function.locals.push(counter.clone());

        function.push_stmt(0, Stmt::Assign { target: counter, value: Expr::float(1.5) });

        let recovery = TypeRecovery::analyze(&function);
        assert_eq!(recovery.variable_type(0), IrType::Integer);
    }

    #[test]
    fn expression_rules() {
        let recovery = TypeRecovery::default();

        // Arithmetic on constants widens to the wider literal type.
        let sum = Expr::binary(BinaryOp::Add, Expr::int(1), Expr::float(2.0), IrType::Variant);
        assert_eq!(recovery.infer(&sum), IrType::Double);

        // A string operand forces String even under `+`.
        let plus = Expr::binary(
            BinaryOp::Add,
            Expr::string("a"),
            Expr::int(1),
            IrType::Variant,
        );
        assert_eq!(recovery.infer(&plus), IrType::String);

        let division = Expr::binary(BinaryOp::IntDiv, Expr::int(7), Expr::int(2), IrType::Variant);
        assert_eq!(recovery.infer(&division), IrType::Long);

        let compare = Expr::binary(BinaryOp::Le, Expr::int(1), Expr::int(2), IrType::Boolean);
        assert_eq!(recovery.infer(&compare), IrType::Boolean);

        let negate = Expr::unary(UnaryOp::Negate, Expr::int(1), IrType::Variant);
        assert_eq!(recovery.infer(&negate), IrType::Long);

        let not = Expr::unary(UnaryOp::Not, Expr::int(1), IrType::Boolean);
        assert_eq!(recovery.infer(&not), IrType::Boolean);

        let call = Expr::call("Foo", Vec::new(), IrType::Variant);
        assert_eq!(recovery.infer(&call), IrType::Variant);

        let cast = Expr::cast(Expr::int(1), IrType::Integer);
        assert_eq!(recovery.infer(&cast), IrType::Integer);
    }
}
