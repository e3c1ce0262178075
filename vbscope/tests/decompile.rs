//! End-to-end decompilation scenarios: P-Code bytes or hand-built IR in,
//! VB6 text out.

use vbscope::decompiler::{emit_function, structure};
use vbscope::ir::{self, BinaryOp, Expr, Function, IrType, Stmt, Variable};
use vbscope::metadata::{CodeKind, VbMethod};
use vbscope::{pcode, Decompiler};

fn pcode_method(name: &str, body: Vec<u8>, address: u32) -> VbMethod {
    VbMethod {
        object_index: 0,
        method_index: 0,
        object_name: "Module1".to_string(),
        method_name: name.to_string(),
        kind: CodeKind::PCode,
        code_bytes: body,
        start_address: address,
    }
}

#[test]
fn literal_add_then_return() {
    // 1000: LitI4 10; 1005: LitI4 20; 100A: AddI4; 100B: Ret
    let body = vec![
        0xF5, 0x0A, 0x00, 0x00, 0x00,
        0xF5, 0x14, 0x00, 0x00, 0x00,
        0xA1,
        0x12,
    ];

    // The decoded stream has the documented shape.
    let instructions = pcode::disassemble_procedure(&body, 0x1000);
    assert_eq!(instructions.len(), 4);
    assert_eq!(instructions[0].address, 0x1000);
    assert_eq!(instructions[0].length, 5);
    assert_eq!(instructions[1].address, 0x1005);
    assert_eq!(instructions[2].address, 0x100A);
    assert_eq!(instructions[2].length, 1);
    assert!(instructions[3].is_return);

    let method = pcode_method("Add", body, 0x1000);
    let text = Decompiler::new().decompile_pcode_method(&method).unwrap();
    assert_eq!(
        text,
        "Function Add() As Variant\n    Return 10 + 20\nEnd Function\n"
    );
}

#[test]
fn max_with_if_then_else() {
    let mut f = Function::new("Max", 0);
    f.return_type = IrType::Integer;

    let x = Variable::new(0, "x", IrType::Integer);
    let y = Variable::new(1, "y", IrType::Integer);
    f.parameters = vec![x.clone(), y.clone()];

    let then_b = f.add_block();
    let else_b = f.add_block();

    let condition = Expr::binary(
        BinaryOp::Gt,
        Expr::var(x.clone()),
        Expr::var(y.clone()),
        IrType::Boolean,
    );
    f.push_stmt(0, Stmt::Branch { condition, target: then_b });
    f.add_edge(0, then_b);
    f.add_edge(0, else_b);

    f.push_stmt(then_b, Stmt::Return(Some(Expr::var(x))));
    f.push_stmt(else_b, Stmt::Return(Some(Expr::var(y))));

    let structured = structure(&f);
    let text = emit_function(&f, Some(&structured));

    assert_eq!(
        text,
        "Function Max(x As Integer, y As Integer) As Integer\n\
         \x20   If x > y Then\n\
         \x20       Return x\n\
         \x20   Else\n\
         \x20       Return y\n\
         \x20   End If\n\
         End Function\n"
    );
}

#[test]
fn string_concatenation_subroutine() {
    let mut f = Function::new("Greet", 0);
    f.return_type = IrType::Void;

    let name = Variable::new(0x8000, "name", IrType::String);
    f.parameters = vec![name.clone()];

    let message = Variable::new(0, "message", IrType::Variant);
    f.locals = vec![message.clone()];

    let value = Expr::binary(
        BinaryOp::Concat,
        Expr::binary(
            BinaryOp::Concat,
            Expr::string("Hello, "),
            Expr::var(name),
            IrType::Variant,
        ),
        Expr::string("!"),
        IrType::Variant,
    );
    f.push_stmt(0, Stmt::Assign { target: message.clone(), value });
    f.push_stmt(
        0,
        Stmt::Call {
            name: "Debug.Print".to_string(),
            args: vec![Expr::var(message)],
        },
    );
    f.push_stmt(0, Stmt::Return(None));

    let recovery = vbscope::decompiler::recovery::TypeRecovery::analyze(&f);
    recovery.apply(&mut f);
    assert_eq!(f.locals[0].ty, IrType::String);

    let structured = structure(&f);
    let text = emit_function(&f, Some(&structured));

    assert!(text.contains("    message = \"Hello, \" & name & \"!\"\n"));
    // Subroutine-call form: no parentheses.
    assert!(text.contains("    Debug.Print message\n"));
    assert!(text.contains("Dim message As String"));
    assert!(text.starts_with("Sub Greet(name As String)\n"));
}

#[test]
fn while_countdown() {
    // entry: count = n, goto header
    // header: Branch count > 0 -> body, fall through to exit
    // body: count = count - 1, goto header (back edge)
    // exit: Return count
    let mut f = Function::new("Countdown", 0);
    f.return_type = IrType::Variant;

    let n = Variable::new(0x8000, "n", IrType::Long);
    f.parameters = vec![n.clone()];
    let count = Variable::new(0, "count", IrType::Variant);
    f.locals = vec![count.clone()];

    let header = f.add_block();
    let body = f.add_block();
    let exit = f.add_block();

    f.push_stmt(0, Stmt::Assign { target: count.clone(), value: Expr::var(n) });
    f.push_stmt(0, Stmt::Goto { target: header });
    f.add_edge(0, header);

    let condition = Expr::binary(
        BinaryOp::Gt,
        Expr::var(count.clone()),
        Expr::int(0),
        IrType::Boolean,
    );
    f.push_stmt(header, Stmt::Branch { condition, target: body });
    f.add_edge(header, body);
    f.add_edge(header, exit);

    let decrement = Expr::binary(
        BinaryOp::Sub,
        Expr::var(count.clone()),
        Expr::int(1),
        IrType::Variant,
    );
    f.push_stmt(body, Stmt::Assign { target: count.clone(), value: decrement });
    f.push_stmt(body, Stmt::Goto { target: header });
    f.add_edge(body, header);

    f.push_stmt(exit, Stmt::Return(Some(Expr::var(count))));

    f.verify_cfg().unwrap();

    let recovery = vbscope::decompiler::recovery::TypeRecovery::analyze(&f);
    recovery.apply(&mut f);

    let structured = structure(&f);
    let text = emit_function(&f, Some(&structured));

    assert!(text.contains("    While count > 0\n"));
    assert!(text.contains("        count = count - 1\n"));
    assert!(text.contains("    Wend\n"));
    assert!(text.contains("    Return count\n"));
    // The loop structure absorbed every jump: no labels, no gotos.
    assert!(!text.contains("GoTo"));
    assert!(!text.contains("Label_"));
}

#[test]
fn do_while_self_loop() {
    let mut f = Function::new("Spin", 0);
    f.return_type = IrType::Void;

    let value = Variable::new(0, "value", IrType::Long);
    f.locals = vec![value.clone()];

    let exit = f.add_block();

    let condition = Expr::binary(
        BinaryOp::Lt,
        Expr::var(value),
        Expr::int(0),
        IrType::Boolean,
    );
    f.push_stmt(0, Stmt::Branch { condition, target: 0 });
    f.add_edge(0, 0);
    f.add_edge(0, exit);
    f.push_stmt(exit, Stmt::Return(None));

    let structured = structure(&f);
    let text = emit_function(&f, Some(&structured));

    assert!(text.contains("    Do\n"));
    assert!(text.contains("    Loop While value < 0\n"));
}

#[test]
fn empty_body_yields_single_return() {
    let function = ir::lift(&[], "Nothing", 0).unwrap();
    let entry = function.block(function.entry).unwrap();
    assert_eq!(entry.statements.len(), 1);
    assert!(matches!(entry.statements[0], Stmt::Return(None)));
}

#[test]
fn single_exitproc_byte() {
    let method = pcode_method("Name", vec![0x14], 0);
    let text = Decompiler::new().decompile_pcode_method(&method).unwrap();
    assert_eq!(text, "Sub Name()\n    Return\nEnd Sub\n");
}

#[test]
fn lifted_cfg_is_consistent() {
    // LdLocI4 local0; LitI2 10; LtI4; BranchT +7; LitI2 1; StLocI4 local0;
    // ExitProc | target: ExitProc
    let body = vec![
        0x05, 0x00, 0x00, // 0x00 LdLocI4 local0
        0xF3, 0x0A, 0x00, // 0x03 LitI2 10
        0xC9, // 0x06 LtI4
        0x1D, 0x07, 0x00, // 0x07 BranchT +7 -> 0x11
        0xF3, 0x01, 0x00, // 0x0A LitI2 1
        0x0A, 0x00, 0x00, // 0x0D StLocI4 local0
        0x14, // 0x10 ExitProc
        0x14, // 0x11 ExitProc (branch target)
    ];
    let instructions = pcode::disassemble(&body, 0);
    let function = ir::lift(&instructions, "Branchy", 0).unwrap();

    // Every successor/predecessor id resolves and the sets are symmetric.
    function.verify_cfg().unwrap();

    // The branch produced two outgoing edges from the entry block.
    let entry = function.block(function.entry).unwrap();
    assert_eq!(entry.successors.len(), 2);
}

#[test]
fn x86_decode_sanity() {
    let bytes = [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3];
    let instructions = vbscope::x86::disassemble(&bytes, 0, 0);

    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[0].to_string(), "mov eax, 0x2A");
    assert_eq!(instructions[1].to_string(), "ret");
    let total: u32 = instructions.iter().map(|i| i.length).sum();
    assert_eq!(total, 6);
}

#[test]
fn structurer_covers_every_block_once() {
    // A function mixing a loop and a diamond; count block occurrences in
    // the emitted tree via the text (each Return appears exactly once).
    let mut f = Function::new("Mixed", 0);
    f.return_type = IrType::Void;

    let then_b = f.add_block();
    let merge = f.add_block();

    let flag = Variable::new(0, "flag", IrType::Boolean);
    f.locals = vec![flag.clone()];

    f.push_stmt(0, Stmt::Branch { condition: Expr::var(flag), target: then_b });
    f.add_edge(0, then_b);
    f.add_edge(0, merge);

    f.push_stmt(then_b, Stmt::Call { name: "Beep".to_string(), args: vec![] });
    f.push_stmt(then_b, Stmt::Goto { target: merge });
    f.add_edge(then_b, merge);

    f.push_stmt(merge, Stmt::Return(None));

    let structured = structure(&f);
    let text = emit_function(&f, Some(&structured));

    assert!(text.contains("    If flag Then\n"));
    assert!(text.contains("        Beep\n"));
    assert!(text.contains("    End If\n"));
    assert_eq!(text.matches("Beep").count(), 1);
    assert_eq!(text.matches("Return").count(), 1);
}
