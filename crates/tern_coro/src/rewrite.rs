//! Blocking-call rewriting.
//!
//! Three passes that run between classification and frame installation:
//!
//! 1. Every call from one async function to another becomes an await: the
//!    caller hands over a coroutine handle, suspends, and (for non-void
//!    callees) reloads the result from a published buffer. Tail calls and
//!    calls to indefinite blockers get cheaper shapes.
//! 2. Functions whose every yield sits directly in front of a plain return
//!    lose their yields; the suspension would be a no-op that costs a
//!    scheduler round trip.
//! 3. Every surviving return reactivates the parent, storing the return
//!    value through the parent's task-state pointer first.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::debug;

use tern_ir::{Callee, FuncId, InstId, Module, Op, Terminator, Type, Value};

use crate::runtime::{build_call, is_call_to, RuntimeFns};
use crate::undef_return;

/// Rewrite async-to-async call sites (the await protocol).
pub(crate) fn rewrite_async_calls(
    module: &mut Module,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
    non_returning: &HashSet<FuncId>,
) {
    let yield_fn = rt.yield_fn.expect("call rewriting needs a yield function");

    let ret_tys: Vec<Type> = module.funcs().map(|(_, f)| f.ret.clone()).collect();
    let names: Vec<String> = module.funcs().map(|(_, f)| f.name.clone()).collect();

    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }
        let f_ret = ret_tys[fid as usize].clone();
        let f = module.func_mut(fid);

        for call in f.insts_in_order() {
            if !f.is_live(call) {
                continue;
            }
            let callee = match &f.inst(call).op {
                Op::Call { callee: Callee::Direct(c), .. } => *c,
                _ => continue,
            };
            if callee == yield_fn || !asyncs.contains(&callee) {
                continue;
            }
            let callee_ret = ret_tys[callee as usize].clone();
            let bb = f.block_of(call);

            if non_returning.contains(&callee) {
                // The callee waits forever and never touched its handle;
                // nothing after this call can run.
                debug!(
                    "call of indefinite blocker @{} in @{}; dropping the continuation",
                    names[callee as usize], names[fid as usize]
                );
                set_last_arg(f, call, Value::undef(Type::byte_ptr()));
                let noret = build_call(f, rt.noret, Type::Void, vec![], "");
                f.insert_after(call, noret);

                let block_insts = f.block(bb).insts.clone();
                let pos = block_insts
                    .iter()
                    .position(|&i| i == noret)
                    .expect("noret was just inserted");
                let tail: Vec<InstId> = block_insts[pos + 1..].to_vec();
                for &dead in &tail {
                    let ty = f.inst_type(dead);
                    if !ty.is_void() {
                        f.replace_all_uses(&Value::Inst(dead), &Value::undef(ty));
                    }
                }
                for &dead in &tail {
                    f.erase_inst(dead);
                }
                f.set_terminator(bb, undef_return(&f_ret));
                continue;
            }

            let in_tail_position =
                f.next_inst(call).is_none() && matches!(f.terminator(bb), Terminator::Ret(_));
            let returns_call = matches!(
                f.terminator(bb),
                Terminator::Ret(Some(Value::Inst(i))) if *i == call
            );
            if in_tail_position
                && callee_ret == f_ret
                && (callee_ret.is_void() || returns_call)
            {
                // Tail call: the callee can reactivate our parent directly,
                // so hand it our parent handle instead of a fresh one.
                debug!(
                    "async tail call of @{} in @{}",
                    names[callee as usize], names[fid as usize]
                );
                let parent = build_call(f, rt.get_parent_handle, Type::byte_ptr(), vec![], "parent");
                f.insert_before(call, parent);
                set_last_arg(f, call, Value::Inst(parent));
                if !callee_ret.is_void() {
                    f.set_terminator(bb, Terminator::Ret(Some(Value::undef(f_ret.clone()))));
                }
                let y = build_call(f, yield_fn, Type::Void, vec![], "");
                f.insert_after(call, y);
                let noret = build_call(f, rt.noret, Type::Void, vec![], "");
                f.insert_after(y, noret);
                continue;
            }

            // General case: acquire our own handle, publish a return-value
            // buffer, then suspend until the callee reactivates us.
            debug!(
                "awaiting call of @{} in @{}",
                names[callee as usize], names[fid as usize]
            );
            let coro = build_call(f, rt.get_coroutine, Type::byte_ptr(), vec![], "coro");
            f.insert_before(call, coro);
            set_last_arg(f, call, Value::Inst(coro));

            let mut retval_slot = None;
            if !callee_ret.is_void() {
                let entry = f.entry();
                let slot = f.new_inst("retval", Op::Alloca { ty: callee_ret.clone() });
                f.insert_at_start(entry, slot);
                let data = f.new_inst(
                    "",
                    Op::Bitcast { value: Value::Inst(slot), ty: Type::byte_ptr() },
                );
                f.insert_before(call, data);
                let publish = build_call(
                    f,
                    rt.set_task_state_ptr,
                    Type::Void,
                    vec![Value::Inst(coro), Value::Inst(data)],
                    "",
                );
                f.insert_before(call, publish);
                retval_slot = Some(slot);
            }

            let y = build_call(f, yield_fn, Type::Void, vec![], "");
            f.insert_after(call, y);

            if let Some(slot) = retval_slot {
                if !f.value_uses(&Value::Inst(call)).is_empty() {
                    // The callee wrote its result into the buffer while we
                    // were suspended.
                    let loaded = f.new_inst(
                        "retval.load",
                        Op::Load { ptr: Value::Inst(slot), ty: callee_ret.clone() },
                    );
                    f.insert_after(y, loaded);
                    f.replace_all_uses(&Value::Inst(call), &Value::Inst(loaded));
                }
            }
        }
    }
}

fn set_last_arg(f: &mut tern_ir::Function, call: InstId, value: Value) {
    if let Op::Call { args, .. } = &mut f.inst_mut(call).op {
        if let Some(last) = args.last_mut() {
            *last = value;
        }
    }
}

/// Remove yields that sit directly in front of a terminating return.
///
/// A yield can only go if every yield in the function can go; a function
/// with any real suspension point keeps them all.
pub(crate) fn ditch_tail_yields(module: &mut Module, rt: &RuntimeFns, asyncs: &IndexSet<FuncId>) {
    let yield_fn = rt.yield_fn.expect("yield elimination needs a yield function");

    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }
        let f = module.func_mut(fid);

        let mut yields = Vec::new();
        let mut can_ditch = true;
        for inst in f.insts_in_order() {
            if !is_call_to(f, inst, yield_fn) {
                continue;
            }
            yields.push(inst);
            let ditchable = match f.next_inst(inst) {
                Some(next) => is_call_to(f, next, rt.noret),
                None => matches!(f.terminator(f.block_of(inst)), Terminator::Ret(None)),
            };
            if !ditchable {
                can_ditch = false;
                break;
            }
        }
        if yields.is_empty() || !can_ditch {
            continue;
        }

        debug!("ditching {} tail yield(s) in @{}", yields.len(), f.name);
        for y in yields {
            if f.next_inst(y).is_none() {
                // The yield fed straight into a return; keep an
                // unreachability marker for the reactivation pass.
                let noret = build_call(f, rt.noret, Type::Void, vec![], "");
                f.insert_before(y, noret);
            }
            f.erase_inst(y);
        }
    }
}

/// Rewrite returns of async functions to store the return value through
/// the parent's task-state pointer and reactivate the parent.
pub(crate) fn insert_return_reactivations(
    module: &mut Module,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
) {
    let yield_fn = rt.yield_fn.expect("return rewriting needs a yield function");

    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }
        let f_ret = module.func(fid).ret.clone();
        let f = module.func_mut(fid);

        let mut ret_ptr: Option<InstId> = None;
        for bb in f.block_ids() {
            if f.block(bb).insts.iter().any(|&i| is_call_to(f, i, rt.noret)) {
                // Control never reaches this block's return.
                continue;
            }
            let ret_val = match f.terminator(bb) {
                Terminator::Ret(v) => v.clone(),
                _ => continue,
            };

            if !f_ret.is_void() {
                let rp = match ret_ptr {
                    Some(rp) => rp,
                    None => {
                        // Materialize the parent's return slot once, in the
                        // entry block.
                        let entry = f.entry();
                        let parent =
                            build_call(f, rt.get_parent_handle, Type::byte_ptr(), vec![], "parent");
                        let state = build_call(
                            f,
                            rt.get_task_state_ptr,
                            Type::byte_ptr(),
                            vec![Value::Inst(parent)],
                            "",
                        );
                        let rp = f.new_inst(
                            "ret.ptr",
                            Op::Bitcast {
                                value: Value::Inst(state),
                                ty: Type::ptr_to(f_ret.clone()),
                            },
                        );
                        f.insert_at_start(entry, parent);
                        f.insert_after(parent, state);
                        f.insert_after(state, rp);
                        ret_ptr = Some(rp);
                        rp
                    }
                };
                if let Some(value) = ret_val {
                    let store = f.new_inst("", Op::Store { value, ptr: Value::Inst(rp) });
                    f.push_inst(bb, store);
                }
                f.set_terminator(bb, Terminator::Ret(Some(Value::undef(f_ret.clone()))));
            }

            let parent = build_call(f, rt.get_parent_handle, Type::byte_ptr(), vec![], "parent");
            f.push_inst(bb, parent);
            let activate = build_call(
                f,
                rt.activate_task,
                Type::Void,
                vec![Value::Inst(parent)],
                "",
            );
            f.push_inst(bb, activate);
            let noret = build_call(f, rt.noret, Type::Void, vec![], "");
            f.push_inst(bb, noret);
            // The return itself stays; a block must keep its terminator.
        }
    }
}
