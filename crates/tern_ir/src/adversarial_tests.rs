//! Adversarial tests for the Tern IR crate.
//!
//! These tests are designed to FIND BUGS in the mutation primitives, not
//! to confirm happy paths: boundary splits, stale uses, arena misuse.

use crate::ir::*;
use crate::print::print_function;
use crate::verify::verify_module;

// ================================================================
// Test helpers
// ================================================================

/// A void function with three no-op allocas in its entry block.
fn three_inst_function() -> (Module, FuncId, Vec<InstId>) {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let id = f.new_inst(name, Op::Alloca { ty: Type::I32 });
        f.push_inst(entry, id);
        ids.push(id);
    }
    f.set_terminator(entry, Terminator::Ret(None));
    (m, g, ids)
}

// ================================================================
// 1. Block splitting at the boundaries
// ================================================================

#[test]
fn split_at_first_instruction_empties_the_block() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    let entry = f.entry();

    let tail = f.split_block(ids[0], "tail");
    assert!(f.block(entry).insts.is_empty());
    assert_eq!(f.block(tail).insts, ids);
    assert_eq!(f.block(tail).term, Terminator::Ret(None));

    f.set_terminator(entry, Terminator::Br(tail));
    let result = verify_module(&m);
    assert!(result.is_ok(), "verify errors: {:?}", result.errors);
}

#[test]
fn split_at_last_instruction_moves_one() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    let entry = f.entry();

    let tail = f.split_block(ids[2], "tail");
    assert_eq!(f.block(entry).insts, vec![ids[0], ids[1]]);
    assert_eq!(f.block(tail).insts, vec![ids[2]]);
    assert_eq!(f.block_of(ids[2]), tail);
    assert_eq!(f.block_of(ids[1]), entry);
}

#[test]
fn split_twice_keeps_layout_order() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    let entry = f.entry();

    let tail1 = f.split_block(ids[1], "tail1");
    let tail2 = f.split_block(ids[2], "tail2");

    // tail2 was split out of tail1, so it must come between tail1 and
    // nothing (i.e. after tail1), with entry first.
    assert_eq!(f.block_ids(), vec![entry, tail1, tail2]);
    assert_eq!(f.block(tail1).insts, vec![ids[1]]);
    assert_eq!(f.block(tail2).insts, vec![ids[2]]);
    // The original terminator travelled to the last fragment.
    assert_eq!(f.block(tail2).term, Terminator::Ret(None));
    assert_eq!(f.block(tail1).term, Terminator::Unreachable);
}

// ================================================================
// 2. Arena misuse panics instead of corrupting
// ================================================================

#[test]
#[should_panic(expected = "already attached")]
fn double_attach_panics() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    let entry = f.entry();
    f.push_inst(entry, ids[0]);
}

#[test]
#[should_panic(expected = "use of erased instruction")]
fn touching_an_erased_instruction_panics() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    f.erase_inst(ids[1]);
    let _ = f.inst(ids[1]);
}

#[test]
fn erase_unattached_instruction_is_fine() {
    let (mut m, g, _) = three_inst_function();
    let f = m.func_mut(g);
    let orphan = f.new_inst("orphan", Op::Alloca { ty: Type::I8 });
    f.erase_inst(orphan);
    assert!(!f.is_live(orphan));
}

// ================================================================
// 3. Stale uses and replacement
// ================================================================

#[test]
fn replace_then_erase_leaves_no_stale_uses() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::I32);
    let f = m.func_mut(g);
    let entry = f.entry();
    let a = f.new_inst(
        "a",
        Op::Binary {
            op: BinOp::Add,
            lhs: Value::int(Type::I32, 1),
            rhs: Value::int(Type::I32, 2),
            ty: Type::I32,
        },
    );
    f.push_inst(entry, a);
    let b = f.new_inst(
        "b",
        Op::Binary {
            op: BinOp::Mul,
            lhs: Value::Inst(a),
            rhs: Value::Inst(a),
            ty: Type::I32,
        },
    );
    f.push_inst(entry, b);
    f.set_terminator(entry, Terminator::Ret(Some(Value::Inst(b))));

    f.replace_all_uses(&Value::Inst(a), &Value::undef(Type::I32));
    f.erase_inst(a);

    let result = verify_module(&m);
    assert!(result.is_ok(), "verify errors: {:?}", result.errors);
}

#[test]
fn replace_all_uses_replaces_every_occurrence_in_one_op() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![Param::new("p", Type::byte_ptr())], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    // Same value as both the stored value and the pointer.
    let st = f.new_inst("", Op::Store { value: Value::Param(0), ptr: Value::Param(0) });
    f.push_inst(entry, st);
    f.set_terminator(entry, Terminator::Ret(None));

    let repl = Value::undef(Type::byte_ptr());
    f.replace_all_uses(&Value::Param(0), &repl);
    match &f.inst(st).op {
        Op::Store { value, ptr } => {
            assert_eq!(value, &repl);
            assert_eq!(ptr, &repl);
        }
        other => panic!("expected store, got {:?}", other),
    }
}

// ================================================================
// 4. Printer robustness
// ================================================================

#[test]
fn printer_survives_arena_gaps() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    f.erase_inst(ids[1]);

    let printed = print_function(&m, g);
    assert!(printed.contains("%a = alloca i32"));
    assert!(!printed.contains("%b = alloca"));
    assert!(printed.contains("%c = alloca i32"));
}

#[test]
fn printer_uses_ids_for_unnamed_results() {
    let mut m = Module::new("m");
    let g = m.define_function("g", vec![], Type::Void);
    let f = m.func_mut(g);
    let entry = f.entry();
    let a = f.new_inst("", Op::Alloca { ty: Type::I8 });
    f.push_inst(entry, a);
    f.set_terminator(entry, Terminator::Ret(None));

    let printed = print_function(&m, g);
    assert!(printed.contains(&format!("%{} = alloca i8", a)));
}

// ================================================================
// 5. Use enumeration determinism
// ================================================================

#[test]
fn value_uses_follow_block_layout_order() {
    let (mut m, g, ids) = three_inst_function();
    let f = m.func_mut(g);
    let entry = f.entry();

    // Make b and c load through a, then split so the uses span blocks.
    f.inst_mut(ids[1]).op = Op::Load { ptr: Value::Inst(ids[0]), ty: Type::I32 };
    f.inst_mut(ids[2]).op = Op::Load { ptr: Value::Inst(ids[0]), ty: Type::I32 };
    let tail = f.split_block(ids[2], "tail");
    f.set_terminator(entry, Terminator::Br(tail));

    let uses = f.value_uses(&Value::Inst(ids[0]));
    assert_eq!(uses, vec![UseRef::Inst(ids[1]), UseRef::Inst(ids[2])]);
}
