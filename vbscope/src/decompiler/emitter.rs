//! VB6 source emission.
//!
//! A preorder walk over the structured tree, printing four-space indented
//! VB6 text. Operator precedence drives parenthesization: a child is
//! wrapped when its precedence is strictly below its parent's, or equal on
//! the right-hand side (all printed operators are treated left-associative).
//! Emission never fails; a malformed node prints a comment line.

use rustc_hash::FxHashSet;

use super::structurer::{StructureResult, Structured};
use crate::ir::{
    BinaryOp, Block, BlockId, Expr, ExprKind, Function, IrType, Stmt, UnaryOp, Value,
};

/// Operator precedence, high to low. Unary operators sit above all of
/// these at 10.
fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::IntDiv => 9,
        BinaryOp::Mod => 8,
        BinaryOp::Add | BinaryOp::Sub => 7,
        BinaryOp::Concat => 6,
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            5
        }
        BinaryOp::And => 4,
        BinaryOp::Or => 3,
        BinaryOp::Xor => 2,
    }
}

/// Emits a whole function.
///
/// With a [`StructureResult`] the body follows the structured tree; without
/// one it falls back to the blocks in id order, labelling every block that
/// more than one predecessor or a surviving jump can reach.
#[must_use]
pub fn emit_function(function: &Function, structured: Option<&StructureResult>) -> String {
    let mut emitter = match structured {
        Some(result) => Emitter::new(function, &result.suppressed, &result.labeled),
        None => Emitter::fallback(function),
    };

    emitter.function_header();

    match structured {
        Some(result) => emitter.node(&result.tree),
        None => {
            for block in function.blocks.values() {
                emitter.block_verbatim(block);
            }
        }
    }

    emitter.function_footer();
    emitter.out
}

/// Renders a single expression (used by tests and diagnostics).
#[must_use]
pub fn emit_expr(expr: &Expr) -> String {
    Emitter::expr(expr)
}

struct Emitter<'a> {
    function: &'a Function,
    suppressed: std::borrow::Cow<'a, FxHashSet<BlockId>>,
    labeled: std::borrow::Cow<'a, FxHashSet<BlockId>>,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(
        function: &'a Function,
        suppressed: &'a FxHashSet<BlockId>,
        labeled: &'a FxHashSet<BlockId>,
    ) -> Self {
        Emitter {
            function,
            suppressed: std::borrow::Cow::Borrowed(suppressed),
            labeled: std::borrow::Cow::Borrowed(labeled),
            out: String::new(),
            indent: 0,
        }
    }

    /// Unstructured fallback: nothing suppressed, every jump target and
    /// merge point labelled.
    fn fallback(function: &'a Function) -> Self {
        let mut labeled = FxHashSet::default();
        for block in function.blocks.values() {
            for stmt in &block.statements {
                match stmt {
                    Stmt::Branch { target, .. } | Stmt::Goto { target } => {
                        labeled.insert(*target);
                    }
                    _ => {}
                }
            }
            if block.predecessors.len() > 1 {
                labeled.insert(block.id);
            }
        }

        Emitter {
            function,
            suppressed: std::borrow::Cow::Owned(FxHashSet::default()),
            labeled: std::borrow::Cow::Owned(labeled),
            out: String::new(),
            indent: 0,
        }
    }

    fn is_sub(&self) -> bool {
        self.function.return_type == IrType::Void
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn function_header(&mut self) {
        let keyword = if self.is_sub() { "Sub" } else { "Function" };

        let parameters = self
            .function
            .parameters
            .iter()
            .map(|p| format!("{} As {}", p.name, p.ty.vb_name()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut header = format!("{keyword} {}({parameters})", self.function.name);
        if !self.is_sub() {
            header.push_str(&format!(" As {}", self.function.return_type.vb_name()));
        }
        self.line(&header);

        self.indent += 1;
        for local in &self.function.locals {
            let declaration = format!("Dim {} As {}", local.name, local.ty.vb_name());
            self.line(&declaration);
        }
    }

    fn function_footer(&mut self) {
        self.indent -= 1;
        let keyword = if self.is_sub() { "Sub" } else { "Function" };
        self.line(&format!("End {keyword}"));
    }

    fn node(&mut self, node: &Structured) {
        match node {
            Structured::Sequence { children, blocks } => {
                for child in children {
                    self.node(child);
                }
                for id in blocks {
                    if let Some(block) = self.function.block(*id) {
                        self.block_verbatim(block);
                    }
                }
            }
            Structured::IfThen { condition, then_body } => {
                let condition = Self::expr(condition);
                self.line(&format!("If {condition} Then"));
                self.indent += 1;
                self.node(then_body);
                self.indent -= 1;
                self.line("End If");
            }
            Structured::IfThenElse {
                condition,
                then_body,
                else_body,
            } => {
                let condition = Self::expr(condition);
                self.line(&format!("If {condition} Then"));
                self.indent += 1;
                self.node(then_body);
                self.indent -= 1;
                self.line("Else");
                self.indent += 1;
                self.node(else_body);
                self.indent -= 1;
                self.line("End If");
            }
            Structured::While { condition, body } => {
                let condition = Self::expr(condition);
                self.line(&format!("While {condition}"));
                self.indent += 1;
                self.node(body);
                self.indent -= 1;
                self.line("Wend");
            }
            Structured::DoWhile { condition, body } => {
                self.line("Do");
                self.indent += 1;
                self.node(body);
                self.indent -= 1;
                let condition = Self::expr(condition);
                self.line(&format!("Loop While {condition}"));
            }
            Structured::DoUntil { condition, body } => {
                self.line("Do");
                self.indent += 1;
                self.node(body);
                self.indent -= 1;
                let condition = Self::expr(condition);
                self.line(&format!("Loop Until {condition}"));
            }
            Structured::GotoLabel { blocks } => {
                for id in blocks {
                    if let Some(block) = self.function.block(*id) {
                        self.line(&format!("Label_{id}:"));
                        for stmt in &block.statements {
                            self.statement(stmt);
                        }
                    }
                }
            }
        }
    }

    /// Emits a block's statements, honouring labels and suppressed
    /// terminators.
    fn block_verbatim(&mut self, block: &Block) {
        if self.labeled.contains(&block.id) {
            self.line(&format!("Label_{}:", block.id));
        }

        let last = block.statements.len().saturating_sub(1);
        for (index, stmt) in block.statements.iter().enumerate() {
            if index == last && stmt.is_jump() && self.suppressed.contains(&block.id) {
                continue;
            }
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { target, value } => {
                let value = Self::expr(value);
                let target = target.name.clone();
                self.line(&format!("{target} = {value}"));
            }
            Stmt::Store { address, value } => {
                // Bracket only raw pointers; structured addresses print as
                // ordinary assignment targets.
                let target = match &address.kind {
                    ExprKind::Variable(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                        Self::expr(address)
                    }
                    _ => format!("[{}]", Self::expr(address)),
                };
                let value = Self::expr(value);
                self.line(&format!("{target} = {value}"));
            }
            Stmt::Call { name, args } => {
                // Subroutine-call form: no parentheses.
                if args.is_empty() {
                    let name = name.clone();
                    self.line(&name);
                } else {
                    let args = args.iter().map(Self::expr).collect::<Vec<_>>().join(", ");
                    self.line(&format!("{name} {args}"));
                }
            }
            Stmt::Return(value) => match value {
                Some(value) => {
                    let value = Self::expr(value);
                    self.line(&format!("Return {value}"));
                }
                None => self.line("Return"),
            },
            Stmt::Branch { condition, target } => {
                let condition = Self::expr(condition);
                self.line(&format!("If {condition} Then GoTo Label_{target}"));
            }
            Stmt::Goto { target } => self.line(&format!("GoTo Label_{target}")),
            Stmt::Label(id) => self.line(&format!("Label_{id}:")),
            Stmt::Nop => self.line("' NOP"),
        }
    }

    fn expr(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Constant(value) => Self::constant(value),
            ExprKind::Variable(variable) => variable.name.clone(),
            ExprKind::Unary { op, operand } => {
                let mut rendered = Self::expr(operand);
                if !operand.is_leaf() {
                    rendered = format!("({rendered})");
                }
                match op {
                    UnaryOp::Negate => format!("-{rendered}"),
                    UnaryOp::Not => format!("Not {rendered}"),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let parent = precedence(*op);
                let mut lhs = Self::expr(left);
                if Self::needs_parens(parent, left, false) {
                    lhs = format!("({lhs})");
                }
                let mut rhs = Self::expr(right);
                if Self::needs_parens(parent, right, true) {
                    rhs = format!("({rhs})");
                }
                format!("{lhs} {} {rhs}", op.symbol())
            }
            ExprKind::Call { name, args } => {
                // Functional form: parentheses always.
                let args = args.iter().map(Self::expr).collect::<Vec<_>>().join(", ");
                format!("{name}({args})")
            }
            ExprKind::Member { object, member } => {
                format!("{}.{member}", Self::expr(object))
            }
            ExprKind::Index { array, indices } => {
                let indices = indices.iter().map(Self::expr).collect::<Vec<_>>().join(", ");
                format!("{}({indices})", Self::expr(array))
            }
            ExprKind::Cast { operand } => {
                let inner = Self::expr(operand);
                match cast_function(&expr.ty) {
                    Some(name) => format!("{name}({inner})"),
                    None => inner,
                }
            }
            ExprKind::Load { address } => format!("[{}]", Self::expr(address)),
        }
    }

    /// A child is parenthesized when its precedence is strictly lower than
    /// the parent's, or equal as the right operand.
    fn needs_parens(parent: u8, child: &Expr, is_right: bool) -> bool {
        match &child.kind {
            ExprKind::Binary { op, .. } => {
                let child_precedence = precedence(*op);
                child_precedence < parent || (child_precedence == parent && is_right)
            }
            // Leaves, calls, members, indexes and casts self-delimit; unary
            // operators bind tighter than every binary operator.
            _ => false,
        }
    }

    fn constant(value: &Value) -> String {
        match value {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v:.6}"),
            Value::Str(s) => format!("\"{}\"", s.replace('"', "\"\"")),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
        }
    }
}

/// The VB6 conversion function for a cast target, `None` when the language
/// has no conversion intrinsic for it.
fn cast_function(ty: &IrType) -> Option<&'static str> {
    match ty {
        IrType::Integer => Some("CInt"),
        IrType::Long => Some("CLng"),
        IrType::Single => Some("CSng"),
        IrType::Double => Some("CDbl"),
        IrType::String => Some("CStr"),
        IrType::Byte => Some("CByte"),
        IrType::Boolean => Some("CBool"),
        IrType::Date => Some("CDate"),
        IrType::Currency => Some("CCur"),
        IrType::Variant => Some("CVar"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Variable;

    fn long_var(id: u32, name: &str) -> Expr {
        Expr::var(Variable::new(id, name, IrType::Long))
    }

    #[test]
    fn constants() {
        assert_eq!(emit_expr(&Expr::int(42)), "42");
        assert_eq!(emit_expr(&Expr::float(1.5)), "1.500000");
        assert_eq!(emit_expr(&Expr::boolean(true)), "True");
        assert_eq!(emit_expr(&Expr::string("say \"hi\"")), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn left_associative_runs_stay_flat() {
        // a + b + c parses as (a + b) + c: no parens needed.
        let sum = Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Add, long_var(0, "a"), long_var(1, "b"), IrType::Long),
            long_var(2, "c"),
            IrType::Long,
        );
        assert_eq!(emit_expr(&sum), "a + b + c");
    }

    #[test]
    fn right_child_of_equal_precedence_parenthesizes() {
        // a - (b - c)
        let diff = Expr::binary(
            BinaryOp::Sub,
            long_var(0, "a"),
            Expr::binary(BinaryOp::Sub, long_var(1, "b"), long_var(2, "c"), IrType::Long),
            IrType::Long,
        );
        assert_eq!(emit_expr(&diff), "a - (b - c)");
    }

    #[test]
    fn lower_precedence_child_parenthesizes() {
        // (a + b) * c
        let product = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, long_var(0, "a"), long_var(1, "b"), IrType::Long),
            long_var(2, "c"),
            IrType::Long,
        );
        assert_eq!(emit_expr(&product), "(a + b) * c");

        // a + b * c needs nothing.
        let sum = Expr::binary(
            BinaryOp::Add,
            long_var(0, "a"),
            Expr::binary(BinaryOp::Mul, long_var(1, "b"), long_var(2, "c"), IrType::Long),
            IrType::Long,
        );
        assert_eq!(emit_expr(&sum), "a + b * c");
    }

    #[test]
    fn concat_chains_stay_flat() {
        // "Hello, " & name & "!" is left-associative: no parens.
        let message = Expr::binary(
            BinaryOp::Concat,
            Expr::binary(
                BinaryOp::Concat,
                Expr::string("Hello, "),
                long_var(0, "name"),
                IrType::String,
            ),
            Expr::string("!"),
            IrType::String,
        );
        assert_eq!(emit_expr(&message), "\"Hello, \" & name & \"!\"");
    }

    #[test]
    fn unary_operand_parenthesizes_unless_leaf() {
        let neg = Expr::unary(UnaryOp::Negate, long_var(0, "x"), IrType::Long);
        assert_eq!(emit_expr(&neg), "-x");

        let not_sum = Expr::unary(
            UnaryOp::Not,
            Expr::binary(BinaryOp::Eq, long_var(0, "a"), long_var(1, "b"), IrType::Boolean),
            IrType::Boolean,
        );
        assert_eq!(emit_expr(&not_sum), "Not (a = b)");
    }

    #[test]
    fn casts_use_conversion_intrinsics() {
        assert_eq!(emit_expr(&Expr::cast(long_var(0, "x"), IrType::Integer)), "CInt(x)");
        assert_eq!(emit_expr(&Expr::cast(long_var(0, "x"), IrType::Double)), "CDbl(x)");
        assert_eq!(emit_expr(&Expr::cast(long_var(0, "x"), IrType::Variant)), "CVar(x)");
        // No intrinsic for objects: passes through.
        assert_eq!(emit_expr(&Expr::cast(long_var(0, "x"), IrType::Object)), "x");
    }

    #[test]
    fn sub_and_function_frames() {
        let mut sub = Function::new("DoNothing", 0);
        sub.return_type = IrType::Void;
        sub.push_stmt(0, Stmt::Return(None));

        let result = super::super::structurer::structure(&sub);
        let text = emit_function(&sub, Some(&result));
        assert_eq!(text, "Sub DoNothing()\n    Return\nEnd Sub\n");

        let mut function = Function::new("Answer", 0);
        function.return_type = IrType::Variant;
        function.push_stmt(0, Stmt::Return(Some(Expr::int(42))));

        let result = super::super::structurer::structure(&function);
        let text = emit_function(&function, Some(&result));
        assert_eq!(
            text,
            "Function Answer() As Variant\n    Return 42\nEnd Function\n"
        );
    }

    #[test]
    fn dims_and_parameters() {
        let mut f = Function::new("Scale", 0);
        f.return_type = IrType::Variant;
        f.parameters.push(Variable::new(0x8000, "factor", IrType::Integer));
        f.locals.push(Variable::new(0, "total", IrType::Long));
        f.push_stmt(0, Stmt::Return(Some(Expr::int(0))));

        let result = super::super::structurer::structure(&f);
        let text = emit_function(&f, Some(&result));
        assert!(text.starts_with("Function Scale(factor As Integer) As Variant\n"));
        assert!(text.contains("    Dim total As Long\n"));
    }

    #[test]
    fn subroutine_call_has_no_parens() {
        let mut f = Function::new("Greet", 0);
        f.return_type = IrType::Void;
        f.push_stmt(
            0,
            Stmt::Call {
                name: "Debug.Print".to_string(),
                args: vec![long_var(0, "message")],
            },
        );
        f.push_stmt(0, Stmt::Return(None));

        let result = super::super::structurer::structure(&f);
        let text = emit_function(&f, Some(&result));
        assert!(text.contains("    Debug.Print message\n"));
    }
}
