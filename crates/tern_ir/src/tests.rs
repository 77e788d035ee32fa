//! Tests for the Tern IR crate.

use expect_test::expect;

use crate::ir::*;
use crate::print::{print_function, print_module};
use crate::verify::verify_module;

// ================================================================
// Test helpers
// ================================================================

/// A module with one declaration and one small arithmetic function.
fn demo_module() -> (Module, FuncId, FuncId) {
    let mut m = Module::new("demo");
    let print_i32 = m.declare_function("print_i32", vec![Param::new("x", Type::I32)], Type::Void);
    let addmul = m.define_function(
        "addmul",
        vec![Param::new("a", Type::I32), Param::new("b", Type::I32)],
        Type::I32,
    );

    let f = m.func_mut(addmul);
    let entry = f.entry();
    let sum = f.new_inst(
        "sum",
        Op::Binary { op: BinOp::Add, lhs: Value::Param(0), rhs: Value::Param(1), ty: Type::I32 },
    );
    f.push_inst(entry, sum);
    let prod = f.new_inst(
        "",
        Op::Binary {
            op: BinOp::Mul,
            lhs: Value::Inst(sum),
            rhs: Value::int(Type::I32, 2),
            ty: Type::I32,
        },
    );
    f.push_inst(entry, prod);
    let call = f.new_inst(
        "",
        Op::Call { callee: Callee::Direct(print_i32), args: vec![Value::Inst(prod)], ty: Type::Void },
    );
    f.push_inst(entry, call);
    f.set_terminator(entry, Terminator::Ret(Some(Value::Inst(prod))));

    (m, addmul, print_i32)
}

fn assert_verifies(m: &Module) {
    let result = verify_module(m);
    assert!(result.is_ok(), "verify errors: {:?}", result.errors);
}

// ================================================================
// Construction
// ================================================================

#[test]
fn define_and_lookup() {
    let (m, addmul, print_i32) = demo_module();
    assert_eq!(m.get_function("addmul"), Some(addmul));
    assert_eq!(m.get_function("print_i32"), Some(print_i32));
    assert_eq!(m.get_function("missing"), None);

    assert!(m.func(print_i32).is_declaration());
    assert!(!m.func(addmul).is_declaration());
    assert_eq!(m.func(addmul).entry(), 0);
}

#[test]
fn inst_types() {
    let (m, addmul, _) = demo_module();
    let f = m.func(addmul);
    let entry = f.entry();
    let insts = f.block(entry).insts.clone();
    assert_eq!(f.inst_type(insts[0]), Type::I32);
    assert_eq!(f.inst_type(insts[2]), Type::Void);
    assert_eq!(f.value_type(&Value::Param(1)), Type::I32);
    assert_eq!(f.value_type(&Value::undef(Type::byte_ptr())), Type::byte_ptr());
    assert_eq!(f.value_type(&Value::Const(Const::FnAddr(0))), Type::IPtr);
}

#[test]
fn alloca_result_is_pointer() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    let buf = f.new_inst("buf", Op::Alloca { ty: Type::I64 });
    f.push_inst(entry, buf);
    f.set_terminator(entry, Terminator::Ret(None));
    assert_eq!(f.inst_type(buf), Type::ptr_to(Type::I64));
}

// ================================================================
// Mutation primitives
// ================================================================

#[test]
fn insert_before_and_after() {
    let (mut m, addmul, _) = demo_module();
    let f = m.func_mut(addmul);
    let entry = f.entry();
    let first = f.block(entry).insts[0];

    let a = f.new_inst("a", Op::Alloca { ty: Type::I32 });
    f.insert_before(first, a);
    let b = f.new_inst("b", Op::Alloca { ty: Type::I32 });
    f.insert_after(a, b);

    let insts = &f.block(entry).insts;
    assert_eq!(insts[0], a);
    assert_eq!(insts[1], b);
    assert_eq!(insts[2], first);
    assert_eq!(f.next_inst(a), Some(b));
    assert_eq!(f.next_inst(b), Some(first));
}

#[test]
fn erase_detaches() {
    let (mut m, addmul, _) = demo_module();
    let f = m.func_mut(addmul);
    let entry = f.entry();
    let call = *f.block(entry).insts.last().expect("insts");

    assert!(f.is_live(call));
    f.erase_inst(call);
    assert!(!f.is_live(call));
    assert_eq!(f.block(entry).insts.len(), 2);
}

#[test]
fn split_block_moves_tail_and_terminator() {
    let (mut m, addmul, _) = demo_module();
    let f = m.func_mut(addmul);
    let entry = f.entry();
    let insts = f.block(entry).insts.clone();
    let prod = insts[1];

    let tail_bb = f.split_block(prod, "tail");

    // The original keeps only the first instruction and a placeholder
    // terminator; the new block owns the rest plus the old return.
    assert_eq!(f.block(entry).insts, vec![insts[0]]);
    assert_eq!(f.block(entry).term, Terminator::Unreachable);
    assert_eq!(f.block(tail_bb).insts, vec![insts[1], insts[2]]);
    assert!(matches!(f.block(tail_bb).term, Terminator::Ret(Some(_))));
    assert_eq!(f.block_of(prod), tail_bb);

    // Layout order: the new block comes right after the original.
    assert_eq!(f.block_ids(), vec![entry, tail_bb]);

    // Stitch the CFG back together so the function verifies.
    f.set_terminator(entry, Terminator::Br(tail_bb));
    assert_verifies(&m);
}

#[test]
fn replace_all_uses_covers_operands_and_terminators() {
    let (mut m, addmul, _) = demo_module();
    let f = m.func_mut(addmul);
    let entry = f.entry();
    let prod = f.block(entry).insts[1];

    let undef = Value::undef(Type::I32);
    f.replace_all_uses(&Value::Inst(prod), &undef);

    // The call argument and the return operand both switch to undef.
    assert!(f.value_uses(&Value::Inst(prod)).is_empty());
    assert_eq!(f.terminator(entry), &Terminator::Ret(Some(undef.clone())));
    let call = f.block(entry).insts[2];
    match &f.inst(call).op {
        Op::Call { args, .. } => assert_eq!(args[0], undef),
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn value_uses_reports_inst_and_term_uses() {
    let (m, addmul, _) = demo_module();
    let f = m.func(addmul);
    let entry = f.entry();
    let prod = f.block(entry).insts[1];
    let call = f.block(entry).insts[2];

    let uses = f.value_uses(&Value::Inst(prod));
    assert_eq!(uses, vec![UseRef::Inst(call), UseRef::Term(entry)]);

    let sum = f.block(entry).insts[0];
    assert_eq!(f.value_uses(&Value::Inst(sum)), vec![UseRef::Inst(prod)]);
}

// ================================================================
// Function-use enumeration
// ================================================================

#[test]
fn fn_uses_distinguishes_callee_operand_and_addr() {
    let mut m = Module::new("m");
    let callee = m.declare_function("callee", vec![], Type::Void);
    let take_addr =
        m.declare_function("take_addr", vec![Param::new("addr", Type::IPtr)], Type::IPtr);
    let caller = m.define_function("caller", vec![], Type::Void);

    let f = m.func_mut(caller);
    let entry = f.entry();
    let direct = f.new_inst(
        "",
        Op::Call { callee: Callee::Direct(callee), args: vec![], ty: Type::Void },
    );
    f.push_inst(entry, direct);
    let wrapped = f.new_inst(
        "",
        Op::Call {
            callee: Callee::Direct(take_addr),
            args: vec![Value::Const(Const::FnAddr(callee))],
            ty: Type::IPtr,
        },
    );
    f.push_inst(entry, wrapped);
    f.set_terminator(entry, Terminator::Ret(None));

    let uses = m.fn_uses(callee);
    assert_eq!(
        uses,
        vec![
            FnUse::Callee { func: caller, inst: direct },
            FnUse::AddrConst { func: caller, inst: wrapped },
        ]
    );
}

#[test]
fn fn_uses_sees_function_valued_arguments() {
    let mut m = Module::new("m");
    let target = m.declare_function("target", vec![], Type::Void);
    let sink = m.declare_function(
        "sink",
        vec![Param::new("f", Type::ptr_to(Type::Func(vec![], Box::new(Type::Void))))],
        Type::Void,
    );
    let caller = m.define_function("caller", vec![], Type::Void);

    let f = m.func_mut(caller);
    let entry = f.entry();
    let call = f.new_inst(
        "",
        Op::Call { callee: Callee::Direct(sink), args: vec![Value::Func(target)], ty: Type::Void },
    );
    f.push_inst(entry, call);
    f.set_terminator(entry, Terminator::Ret(None));

    assert_eq!(m.fn_uses(target), vec![FnUse::Operand { func: caller, inst: call }]);
}

// ================================================================
// Printer
// ================================================================

#[test]
fn print_demo_function() {
    let (m, addmul, _) = demo_module();
    expect![[r#"
        define @addmul(%a: i32, %b: i32) -> i32 {
        bb0: ; entry
          %sum = add %a, %b
          %1 = mul %sum, i32 2
          call @print_i32(%1)
          ret %1
        }
    "#]]
    .assert_eq(&print_function(&m, addmul));
}

#[test]
fn print_module_includes_declarations() {
    let (m, _, _) = demo_module();
    let printed = print_module(&m);
    assert!(printed.contains("; module demo"));
    assert!(printed.contains("declare @print_i32(%x: i32) -> void"));
    assert!(printed.contains("define @addmul"));
}

#[test]
fn print_internal_linkage_and_attrs() {
    let mut m = Module::new("m");
    let g = m.define_function("helper", vec![Param::new("p", Type::byte_ptr())], Type::Void);
    m.func_mut(g).linkage = Linkage::Internal;
    m.func_mut(g).params[0].attrs.insert(ParamAttr::NoCapture);
    let f = m.func_mut(g);
    let entry = f.entry();
    f.set_terminator(entry, Terminator::Ret(None));

    let printed = print_function(&m, g);
    assert!(printed.contains("define internal @helper(%p: i8* nocapture) -> void"));
}

#[test]
fn print_switch_terminator() {
    let mut m = Module::new("m");
    let g = m.define_function("dispatch", vec![Param::new("x", Type::I8)], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    let a = f.append_block("wake");
    let b = f.append_block("done");
    f.set_terminator(
        entry,
        Terminator::Switch { value: Value::Param(0), default: b, cases: vec![(0, a), (1, b)] },
    );
    f.set_terminator(a, Terminator::Ret(None));
    f.set_terminator(b, Terminator::Ret(None));

    let printed = print_function(&m, g);
    assert!(printed.contains("switch %x, default bb2 [0 -> bb1, 1 -> bb2]"));
}

// ================================================================
// Verifier
// ================================================================

#[test]
fn verify_accepts_demo_module() {
    let (m, _, _) = demo_module();
    assert_verifies(&m);
}

#[test]
fn verify_rejects_bad_branch_target() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    f.set_terminator(entry, Terminator::Br(99));

    let result = verify_module(&m);
    assert!(!result.is_ok());
    assert!(result.errors[0].message.contains("bb99"));
}

#[test]
fn verify_rejects_call_arity_mismatch() {
    let mut m = Module::new("m");
    let callee = m.declare_function("callee", vec![Param::new("x", Type::I32)], Type::Void);
    let g = m.define_function("g", vec![], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    let call =
        f.new_inst("", Op::Call { callee: Callee::Direct(callee), args: vec![], ty: Type::Void });
    f.push_inst(entry, call);
    f.set_terminator(entry, Terminator::Ret(None));

    let result = verify_module(&m);
    assert!(!result.is_ok());
    assert!(result.errors[0].message.contains("passes 0 arguments, expected 1"));
}

#[test]
fn verify_rejects_return_arity_mismatch() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::I32);
    let f = m.func_mut(g);
    let entry = f.entry();
    f.set_terminator(entry, Terminator::Ret(None));

    let result = verify_module(&m);
    assert!(!result.is_ok());
    assert!(result.errors[0].message.contains("void return in a non-void function"));
}

#[test]
fn verify_rejects_duplicate_function_names() {
    let mut m = Module::new("m");
    m.declare_function("twice", vec![], Type::Void);
    m.declare_function("twice", vec![], Type::Void);

    let result = verify_module(&m);
    assert!(!result.is_ok());
    assert!(result.errors[0].message.contains("duplicate function name"));
}

#[test]
fn verify_rejects_operand_referencing_erased_instruction() {
    let (mut m, addmul, _) = demo_module();
    let f = m.func_mut(addmul);
    let entry = f.entry();
    let sum = f.block(entry).insts[0];
    // Erase without replacing uses: the multiply still points at it.
    f.erase_inst(sum);

    let result = verify_module(&m);
    assert!(!result.is_ok());
    assert!(result.errors.iter().any(|e| e.message.contains("erased instruction")));
}
