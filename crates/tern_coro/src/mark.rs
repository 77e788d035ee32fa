//! Async-function discovery and classification.
//!
//! The async property starts at `yield` and spreads backwards through the
//! call graph: any function that contains a call to an async function is
//! itself async. Spawning a goroutine is not a blocking operation, so the
//! constant-address wrapper that feeds `makeGoroutine` does not propagate
//! the property.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::debug;

use tern_ir::{Callee, Const, FnUse, FuncId, Module, Op, Param, Type, Value};

use crate::config::Config;
use crate::runtime::{build_call, ensure, is_call_to, RuntimeFns};
use crate::{undef_return, LowerError};

/// Compute the set of async functions, in discovery order, starting from
/// `yield`. Fails when an async function escapes as a plain value: calls
/// through data are not supported.
pub(crate) fn find_async_functions(
    module: &Module,
    rt: &RuntimeFns,
) -> Result<IndexSet<FuncId>, LowerError> {
    let yield_fn = rt.yield_fn.expect("async discovery needs a yield function");

    let mut asyncs: IndexSet<FuncId> = IndexSet::new();
    let mut worklist = vec![yield_fn];
    while let Some(f) = worklist.pop() {
        if asyncs.contains(&f) {
            continue;
        }
        if module.func(f).name == "resume" {
            // The scheduler's reentry point; it resumes coroutines but is
            // not itself one.
            continue;
        }
        asyncs.insert(f);
        debug!("marked @{} as async", module.func(f).name);

        for fn_use in module.fn_uses(f) {
            match fn_use {
                FnUse::AddrConst { func, inst } => {
                    let enclosing = module.func(func);
                    let spawned = rt
                        .make_goroutine
                        .map_or(false, |mg| is_call_to(enclosing, inst, mg));
                    if !spawned {
                        return Err(LowerError::AsyncAddressTaken {
                            function: module.func(f).name.clone(),
                        });
                    }
                    // A go statement. Starting a goroutine does not block,
                    // so the spawning function stays synchronous.
                }
                FnUse::Callee { func, .. } => worklist.push(func),
                FnUse::Operand { func, inst } => {
                    let enclosing = module.func(func);
                    // A leftover constant bitcast is tolerated as long as
                    // nothing reads its result.
                    if matches!(enclosing.inst(inst).op, Op::Bitcast { .. })
                        && enclosing.value_uses(&Value::Inst(inst)).is_empty()
                    {
                        continue;
                    }
                    let parent = if matches!(enclosing.inst(inst).op, Op::Call { .. }) {
                        Some(enclosing.name.clone())
                    } else {
                        None
                    };
                    return Err(LowerError::AsyncFnPointer {
                        function: module.func(f).name.clone(),
                        parent,
                    });
                }
                FnUse::Term { .. } => {
                    return Err(LowerError::AsyncFnPointer {
                        function: module.func(f).name.clone(),
                        parent: None,
                    });
                }
            }
        }
    }
    Ok(asyncs)
}

/// Decide whether the lowered program needs a scheduler, applying the
/// platform short-circuits.
///
/// On a platform with no scheduler at all the module is degraded in place:
/// coroutine handles become undef, yields vanish, and `sleep` busy-waits.
pub(crate) fn scheduler_needed(
    module: &mut Module,
    config: &Config,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
) -> Result<bool, LowerError> {
    if config.platform.always_needs_scheduler() {
        // Blocking the calling context would block the embedder.
        return Ok(true);
    }
    if config.platform.never_schedules() {
        lower_blocking_for_bare(module, rt);
        return Ok(false);
    }

    // main is the root goroutine: if it blocks, its suspensions have to be
    // driven by the scheduler even when nothing else is spawned.
    if let Some(main) = rt.main {
        if asyncs.contains(&main) {
            return Ok(true);
        }
    }

    // Otherwise a scheduler is only needed when an async goroutine is
    // started; a non-blocking goroutine can simply be called.
    if let Some(mg) = rt.make_goroutine {
        for fn_use in module.fn_uses(mg) {
            let FnUse::Callee { func, inst } = fn_use else { continue };
            let enclosing = module.func(func);
            let Op::Call { args, .. } = &enclosing.inst(inst).op else { continue };
            match args.first() {
                Some(Value::Const(Const::FnAddr(g))) => {
                    if asyncs.contains(g) {
                        return Ok(true);
                    }
                }
                _ => {
                    return Err(LowerError::SpawnPattern(
                        "expected constant function address operand of makeGoroutine".to_string(),
                    ))
                }
            }
        }
    }
    Ok(false)
}

/// Degrade blocking operations for a target without any scheduler.
fn lower_blocking_for_bare(module: &mut Module, rt: &RuntimeFns) {
    debug!("target never schedules; degrading blocking operations");

    for fn_use in module.fn_uses(rt.get_coroutine) {
        if let FnUse::Callee { func, inst } = fn_use {
            let f = module.func_mut(func);
            let ty = f.inst_type(inst);
            f.replace_all_uses(&Value::Inst(inst), &Value::undef(ty));
            f.erase_inst(inst);
        }
    }
    if let Some(yield_fn) = rt.yield_fn {
        for fn_use in module.fn_uses(yield_fn) {
            if let FnUse::Callee { func, inst } = fn_use {
                module.func_mut(func).erase_inst(inst);
            }
        }
    }
    if let Some(sleep) = rt.sleep {
        let busy = ensure(
            module,
            "busySleep",
            vec![Param::new("duration", Type::I64)],
            Type::Void,
        );
        for fn_use in module.fn_uses(sleep) {
            if let FnUse::Callee { func, inst } = fn_use {
                let f = module.func_mut(func);
                let duration = match &f.inst(inst).op {
                    Op::Call { args, .. } => args.first().cloned(),
                    _ => None,
                };
                let Some(duration) = duration else { continue };
                let call = build_call(f, busy, Type::Void, vec![duration], "");
                f.insert_before(inst, call);
                f.erase_inst(inst);
            }
        }
    }
}

/// Find async functions that yield without ever registering a wakeup.
///
/// Such a function waits forever; nothing past its first yield can run, so
/// the body is truncated there behind a `noret` marker and a fake return.
pub(crate) fn find_non_returning(
    module: &mut Module,
    rt: &RuntimeFns,
    asyncs: &IndexSet<FuncId>,
) -> HashSet<FuncId> {
    let yield_fn = rt.yield_fn.expect("classification needs a yield function");

    let mut non_returning = HashSet::new();
    for &fid in asyncs {
        if fid == yield_fn {
            continue;
        }

        let func = module.func(fid);
        let mut calls_yield = false;
        let mut gets_coroutine = false;
        let mut calls_async = false;
        for inst in func.insts_in_order() {
            if let Op::Call { callee: Callee::Direct(c), .. } = &func.inst(inst).op {
                if *c == yield_fn {
                    calls_yield = true;
                } else if *c == rt.get_coroutine {
                    gets_coroutine = true;
                } else if asyncs.contains(c) {
                    calls_async = true;
                }
            }
        }
        if !calls_yield || gets_coroutine || calls_async {
            continue;
        }

        debug!("@{} blocks indefinitely; truncating at its yields", func.name);
        let ret = func.ret.clone();
        let f = module.func_mut(fid);
        for bb in f.block_ids() {
            let insts = f.block(bb).insts.clone();
            let Some(pos) = insts.iter().position(|&i| is_call_to(f, i, yield_fn)) else {
                continue;
            };
            let noret = build_call(f, rt.noret, Type::Void, vec![], "");
            f.insert_before(insts[pos], noret);

            // The yield and everything after it in this block cannot run.
            let tail = &insts[pos..];
            for &dead in tail {
                let ty = f.inst_type(dead);
                if !ty.is_void() {
                    f.replace_all_uses(&Value::Inst(dead), &Value::undef(ty));
                }
            }
            for &dead in tail {
                f.erase_inst(dead);
            }
            f.set_terminator(bb, undef_return(&ret));
        }
        non_returning.insert(fid);
    }
    non_returning
}
