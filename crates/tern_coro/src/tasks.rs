//! Entry wiring for the tasks-based (stack-switching) scheduler.
//!
//! With switched stacks the compiler has almost nothing to do: goroutines
//! keep their own stacks and blocking calls block. The only transformation
//! is at the entry point, which either starts `main` as the first
//! goroutine and runs the scheduler, or calls `main` directly when nothing
//! is ever spawned.

use tern_ir::{Const, FnUse, Linkage, Module, Param, Terminator, Type, Value};

use crate::runtime::{build_call, RuntimeFns};
use crate::{LowerError, LowerOutcome};

pub(crate) fn lower(module: &mut Module, rt: &RuntimeFns) -> Result<LowerOutcome, LowerError> {
    let done = LowerOutcome { needs_scheduler: false, async_fns: Vec::new() };

    let Some(call_main) = rt.call_main else {
        return Ok(done);
    };
    let uses = module.fn_uses(call_main);
    let (entry_fn, entry_call) = match uses.as_slice() {
        // Already rewired on an earlier run.
        [] => return Ok(done),
        [FnUse::Callee { func, inst }] => (*func, *inst),
        _ => {
            return Err(LowerError::EntryPoint(
                "expected exactly one call of callMain".to_string(),
            ))
        }
    };
    let Some(main) = rt.main else {
        return Err(LowerError::EntryPoint("program main not found".to_string()));
    };
    let main_ret = module.func(main).ret.clone();

    let needs_scheduler = rt
        .start_goroutine
        .map_or(false, |sg| !module.fn_uses(sg).is_empty());

    if needs_scheduler {
        let start_goroutine = rt.start_goroutine.expect("checked above");

        // The scheduler starts goroutines through a unary entry point, so
        // main gets a wrapper with that shape.
        let wrapper =
            module.define_function("main.wrapper", vec![Param::new("args", Type::IPtr)], Type::Void);
        {
            let w = module.func_mut(wrapper);
            let entry = w.entry();
            let call = build_call(
                w,
                main,
                main_ret,
                vec![Value::undef(Type::byte_ptr()), Value::undef(Type::byte_ptr())],
                "",
            );
            w.push_inst(entry, call);
            w.set_terminator(entry, Terminator::Ret(None));
        }

        let f = module.func_mut(entry_fn);
        let start = build_call(
            f,
            start_goroutine,
            Type::Void,
            vec![Value::Const(Const::FnAddr(wrapper)), Value::int(Type::IPtr, 0)],
            "",
        );
        f.insert_before(entry_call, start);
        let scheduler = build_call(f, rt.scheduler, Type::Void, vec![], "");
        f.insert_before(entry_call, scheduler);
        f.erase_inst(entry_call);
    } else {
        let f = module.func_mut(entry_fn);
        let call = build_call(
            f,
            main,
            main_ret,
            vec![Value::undef(Type::byte_ptr()), Value::undef(Type::byte_ptr())],
            "",
        );
        f.insert_before(entry_call, call);
        f.erase_inst(entry_call);
    }

    // main had external linkage so the front end could reach it; internal
    // linkage from here on enables interprocedural optimization.
    module.func_mut(main).linkage = Linkage::Internal;

    Ok(LowerOutcome { needs_scheduler, async_fns: Vec::new() })
}
