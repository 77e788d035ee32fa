//! Coroutine frame installation and the global fix-ups that follow it.
//!
//! Every async function that still contains a yield becomes a coroutine:
//! it allocates a task state, announces itself to the back-end's coroutine
//! intrinsics, and turns each yield into a suspend with a three-way
//! dispatch (resume / cleanup / suspend). Async functions whose yields
//! were all eliminated stay plain functions operating on the parent's
//! handle.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::debug;

use tern_ir::{FnUse, FuncId, InstId, Module, Op, Param, ParamAttr, Terminator, Type, UseRef, Value};

use crate::config::Config;
use crate::runtime::{build_call, ensure, is_call_to, RuntimeFns};
use crate::{undef_return, LowerError};

/// The coroutine intrinsics provided by the back-end.
struct CoroIntrinsics {
    id: FuncId,
    size: FuncId,
    begin: FuncId,
    suspend: FuncId,
    end: FuncId,
    free: FuncId,
}

fn declare_intrinsics(module: &mut Module) -> CoroIntrinsics {
    let byte_ptr = Type::byte_ptr;
    CoroIntrinsics {
        id: ensure(
            module,
            "coro.id",
            vec![
                Param::new("align", Type::I32),
                Param::new("promise", byte_ptr()),
                Param::new("coroaddr", byte_ptr()),
                Param::new("fnaddrs", byte_ptr()),
            ],
            Type::Token,
        ),
        size: ensure(module, "coro.size.i32", vec![], Type::I32),
        begin: ensure(
            module,
            "coro.begin",
            vec![Param::new("id", Type::Token), Param::new("mem", byte_ptr())],
            byte_ptr(),
        ),
        suspend: ensure(
            module,
            "coro.suspend",
            vec![Param::new("save", Type::Token), Param::new("final", Type::I1)],
            Type::I8,
        ),
        end: ensure(
            module,
            "coro.end",
            vec![Param::new("handle", byte_ptr()), Param::new("unwind", Type::I1)],
            Type::I1,
        ),
        free: ensure(
            module,
            "coro.free",
            vec![Param::new("id", Type::Token), Param::new("handle", byte_ptr())],
            byte_ptr(),
        ),
    }
}

/// Install a coroutine frame in every async function that still suspends.
pub(crate) fn install_coroutine_frames(
    module: &mut Module,
    config: &Config,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
) -> Result<(), LowerError> {
    let yield_fn = rt.yield_fn.expect("frame installation needs a yield function");
    let coro = declare_intrinsics(module);
    let track = if config.needs_stack_objects {
        Some(ensure(
            module,
            "trackPointer",
            vec![Param::new("ptr", Type::byte_ptr())],
            Type::Void,
        ))
    } else {
        None
    };

    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }
        let f_ret = module.func(fid).ret.clone();
        let f = module.func_mut(fid);

        let yields: Vec<InstId> = f
            .insts_in_order()
            .into_iter()
            .filter(|&i| is_call_to(f, i, yield_fn))
            .collect();

        if yields.is_empty() {
            // No suspension point survived, so there is no frame of its
            // own; the function operates on its parent's handle.
            debug!("@{} no longer suspends; reusing the parent handle", f.name);
            for inst in f.insts_in_order() {
                if !f.is_live(inst) || !is_call_to(f, inst, rt.get_coroutine) {
                    continue;
                }
                let parent = build_call(f, rt.get_parent_handle, Type::byte_ptr(), vec![], "parent");
                f.insert_before(inst, parent);
                f.replace_all_uses(&Value::Inst(inst), &Value::Inst(parent));
                f.erase_inst(inst);
            }
            continue;
        }

        debug!("installing coroutine frame in @{}", f.name);
        let cleanup = f.append_block("task.cleanup");
        let suspend = f.append_block("task.suspend");

        // Entry prelude: allocate the task state and open the frame.
        let entry = f.entry();
        let state = f.new_inst("task.state", Op::Alloca { ty: Type::Struct("taskState".to_string()) });
        let state_i8 =
            f.new_inst("task.state.i8", Op::Bitcast { value: Value::Inst(state), ty: Type::byte_ptr() });
        let token = build_call(
            f,
            coro.id,
            Type::Token,
            vec![
                Value::int(Type::I32, 0),
                Value::Inst(state_i8),
                Value::null_byte_ptr(),
                Value::null_byte_ptr(),
            ],
            "task.token",
        );
        let raw_size = build_call(f, coro.size, Type::I32, vec![], "task.size");
        let sized = match config.pointer_width.bits().cmp(&32) {
            Ordering::Greater => Some(
                f.new_inst("task.size.iptr", Op::ZExt { value: Value::Inst(raw_size), ty: Type::IPtr }),
            ),
            Ordering::Less => Some(
                f.new_inst("task.size.iptr", Op::Trunc { value: Value::Inst(raw_size), ty: Type::IPtr }),
            ),
            Ordering::Equal => None,
        };
        let size_value = Value::Inst(sized.unwrap_or(raw_size));
        let frame_mem = build_call(f, rt.alloc, Type::byte_ptr(), vec![size_value], "task.data");
        let tracked = track.map(|t| build_call(f, t, Type::Void, vec![Value::Inst(frame_mem)], ""));
        let handle = build_call(
            f,
            coro.begin,
            Type::byte_ptr(),
            vec![Value::Inst(token), Value::Inst(frame_mem)],
            "task.handle",
        );

        let mut prelude = vec![state, state_i8, token, raw_size];
        prelude.extend(sized);
        prelude.push(frame_mem);
        prelude.extend(tracked);
        prelude.push(handle);
        for &inst in prelude.iter().rev() {
            f.insert_at_start(entry, inst);
        }

        // Cleanup: free the frame, then fall through to the final suspend.
        let mem = build_call(
            f,
            coro.free,
            Type::byte_ptr(),
            vec![Value::Inst(token), Value::Inst(handle)],
            "task.data.free",
        );
        f.push_inst(cleanup, mem);
        let freed = build_call(f, rt.free_fn, Type::Void, vec![Value::Inst(mem)], "");
        f.push_inst(cleanup, freed);
        f.set_terminator(cleanup, Terminator::Br(suspend));

        // Suspend: close the coroutine and leave.
        let ended = build_call(
            f,
            coro.end,
            Type::I1,
            vec![Value::Inst(handle), Value::int(Type::I1, 0)],
            "",
        );
        f.push_inst(suspend, ended);
        f.set_terminator(suspend, undef_return(&f_ret));

        // Each yield becomes a suspend with a resume/cleanup dispatch.
        for y in yields {
            let suspended = build_call(
                f,
                coro.suspend,
                Type::I8,
                vec![Value::null(Type::Token), Value::int(Type::I1, 0)],
                "",
            );
            f.insert_before(y, suspended);
            let bb = f.block_of(y);
            let wakeup = f.split_block(y, "task.wakeup");
            f.set_terminator(
                bb,
                Terminator::Switch {
                    value: Value::Inst(suspended),
                    default: suspend,
                    cases: vec![(0, wakeup), (1, cleanup)],
                },
            );
            f.erase_inst(y);
        }

        // The local handle is known now; unreachability markers become
        // jumps into the cleanup path.
        for inst in f.insts_in_order() {
            if !f.is_live(inst) {
                continue;
            }
            if is_call_to(f, inst, rt.get_coroutine) {
                f.replace_all_uses(&Value::Inst(inst), &Value::Inst(handle));
                f.erase_inst(inst);
            } else if is_call_to(f, inst, rt.noret) {
                let bb = f.block_of(inst);
                let block_insts = f.block(bb).insts.clone();
                let pos = block_insts
                    .iter()
                    .position(|&i| i == inst)
                    .expect("attached instruction is in its block");
                let tail: Vec<InstId> = block_insts[pos..].to_vec();
                for &dead in &tail {
                    let ty = f.inst_type(dead);
                    if !ty.is_void() {
                        f.replace_all_uses(&Value::Inst(dead), &Value::undef(ty));
                    }
                }
                for &dead in &tail {
                    f.erase_inst(dead);
                }
                // The dead return that followed the marker goes with it.
                f.set_terminator(bb, Terminator::Br(cleanup));
            }
        }
    }

    // Every handle request must have been resolved by now.
    let mut leftovers = Vec::new();
    for fn_use in module.fn_uses(rt.get_coroutine) {
        if let FnUse::Callee { func, .. } = fn_use {
            leftovers.push(module.func(func).name.clone());
        }
    }
    if !leftovers.is_empty() {
        return Err(LowerError::LeftoverCoroutineHandle { functions: leftovers });
    }
    Ok(())
}

/// Replace every remaining `getParentHandle` call with the enclosing
/// function's trailing `parentHandle` parameter.
pub(crate) fn rewrite_parent_handle_calls(
    module: &mut Module,
    rt: &RuntimeFns,
) -> Result<(), LowerError> {
    for fn_use in module.fn_uses(rt.get_parent_handle) {
        let FnUse::Callee { func, inst } = fn_use else { continue };
        let f = module.func_mut(func);
        let last = f.last_param().map(|(idx, p)| (idx, p.name == "parentHandle"));
        match last {
            Some((idx, true)) => {
                f.replace_all_uses(&Value::Inst(inst), &Value::Param(idx));
                f.erase_inst(inst);
            }
            _ => {
                return Err(LowerError::ExportedAsync { function: f.name.clone() });
            }
        }
    }
    Ok(())
}

/// Async functions whose parent handle is used only to reactivate the
/// parent. They tolerate a null parent, so spawns of them need no fake
/// coroutine.
pub(crate) fn parent_not_required(
    module: &Module,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
) -> Result<HashSet<FuncId>, LowerError> {
    let yield_fn = rt.yield_fn.expect("parent analysis needs a yield function");

    let mut not_required = HashSet::new();
    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }
        let f = module.func(fid);
        let Some((idx, param)) = f.last_param() else {
            return Err(LowerError::ExportedAsync { function: f.name.clone() });
        };
        if param.name != "parentHandle" {
            return Err(LowerError::ExportedAsync { function: f.name.clone() });
        }

        let mut activate_only = true;
        for use_ref in f.value_uses(&Value::Param(idx)) {
            let activates = matches!(
                use_ref,
                UseRef::Inst(inst) if is_call_to(f, inst, rt.activate_task)
            );
            if !activates {
                activate_only = false;
                break;
            }
        }
        if activate_only {
            debug!("@{} does not require a real parent handle", f.name);
            not_required.insert(fid);
        }
    }
    Ok(not_required)
}

/// Drop `nocapture`/`readnone` parameter attributes that earlier
/// optimization passes derived; the rewritten parameters carry observable
/// state now.
pub(crate) fn strip_stale_attrs(module: &mut Module, rt: &RuntimeFns, asyncs: &IndexSet<FuncId>) {
    let mut targets: Vec<FuncId> = vec![rt.set_task_state_ptr];
    targets.extend(asyncs.iter().copied());
    for fid in targets {
        for param in &mut module.func_mut(fid).params {
            param.attrs.remove(&ParamAttr::NoCapture);
            param.attrs.remove(&ParamAttr::ReadNone);
        }
    }
}

/// Delete every remaining `noret` marker; the flow analysis that needed
/// them is done.
pub(crate) fn remove_norets(module: &mut Module, rt: &RuntimeFns) {
    for fn_use in module.fn_uses(rt.noret) {
        if let FnUse::Callee { func, inst } = fn_use {
            module.func_mut(func).erase_inst(inst);
        }
    }
}
