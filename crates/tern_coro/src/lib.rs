//! Tern Coro — lowers goroutine pseudo-operations into coroutines driven
//! by the runtime scheduler.
//!
//! The front end normalizes every blocking operation to a call of the
//! pseudo-function `yield` and every go statement to a `makeGoroutine`
//! spawn shape. This crate rewrites that module, in place, into one of two
//! forms selected by [`Config::scheduler`]:
//!
//! - **Coroutines**: every blocking function becomes a coroutine built on
//!   the back-end's `coro.*` intrinsics. Blocking calls become await
//!   sequences (hand over a handle, suspend, reload the result), returns
//!   reactivate the caller, and spawns become direct calls with a
//!   synthesized parent handle.
//! - **Tasks**: goroutines run on switched stacks and only the program
//!   entry point is rewired.
//!
//! # Architecture
//!
//! - **`config`** — Target configuration (scheduler flavour, platform
//!   class, pointer width).
//! - **`runtime`** — Registry of the runtime contract functions.
//! - **`mark`** — Async propagation, scheduler necessity, indefinite
//!   blockers.
//! - **`rewrite`** — Await protocol at call sites, tail-yield elimination,
//!   return reactivation.
//! - **`frame`** — Coroutine frame installation and global fix-ups.
//! - **`spawn`** — Goroutine-spawn lowering.
//! - **`tasks`** — The tasks-based alternative.

use std::collections::HashSet;

use tracing::debug;

use tern_ir::{FnUse, Linkage, Module, Terminator, Type, Value};

pub mod config;
mod frame;
mod mark;
mod rewrite;
mod runtime;
mod spawn;
mod tasks;


pub use config::{Config, Platform, PointerWidth, Scheduler};

use runtime::{build_call, RuntimeFns};

// ================================================================
// Errors and outcome
// ================================================================

/// A fatal lowering failure. The pass never recovers: a malformed input
/// module is a front-end bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    /// The entry point does not have the expected shape.
    EntryPoint(String),
    /// An async function escapes as a plain function pointer.
    AsyncFnPointer { function: String, parent: Option<String> },
    /// An async function's address constant feeds something other than
    /// `makeGoroutine`.
    AsyncAddressTaken { function: String },
    /// The spawn shape around `makeGoroutine` does not match.
    SpawnPattern(String),
    /// An async function lacks the trailing `parentHandle` parameter, so
    /// its externally visible signature cannot be rewritten.
    ExportedAsync { function: String },
    /// Internal invariant violation: `getCoroutine` calls survived frame
    /// installation.
    LeftoverCoroutineHandle { functions: Vec<String> },
}

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LowerError::EntryPoint(msg) => write!(f, "{}", msg),
            LowerError::AsyncFnPointer { function, parent: Some(parent) } => {
                write!(f, "async function {} used as function pointer in {}", function, parent)
            }
            LowerError::AsyncFnPointer { function, parent: None } => {
                write!(f, "async function {} used as function pointer", function)
            }
            LowerError::AsyncAddressTaken { function } => {
                write!(
                    f,
                    "async function {} incorrectly used in ptrtoint, expected makeGoroutine",
                    function
                )
            }
            LowerError::SpawnPattern(msg) => write!(f, "{}", msg),
            LowerError::ExportedAsync { function } => {
                write!(f, "trying to make exported function async: {}", function)
            }
            LowerError::LeftoverCoroutineHandle { functions } => {
                write!(f, "bad use of getCoroutine: {}", functions.join(","))
            }
        }
    }
}

impl std::error::Error for LowerError {}

/// What the lowering decided about the module.
#[derive(Debug, Clone)]
pub struct LowerOutcome {
    /// Whether the rewired entry point runs the scheduler.
    pub needs_scheduler: bool,
    /// Names of the functions found to be async, in discovery order.
    pub async_fns: Vec<String>,
}

// ================================================================
// Entry point
// ================================================================

/// Lower the goroutine pseudo-operations in `module` according to the
/// target configuration. The module is rewritten in place; on error it may
/// be partially transformed and must be discarded.
pub fn lower_goroutines(module: &mut Module, config: &Config) -> Result<LowerOutcome, LowerError> {
    let rt = RuntimeFns::find(module);
    match config.scheduler {
        Scheduler::Tasks => tasks::lower(module, &rt),
        Scheduler::Coroutines => lower_coroutines(module, config, &rt),
    }
}

fn lower_coroutines(
    module: &mut Module,
    config: &Config,
    rt: &RuntimeFns,
) -> Result<LowerOutcome, LowerError> {
    let (needs_scheduler, async_fns) = transform_blocking_operations(module, config, rt)?;
    rewire_entry(module, rt, needs_scheduler)?;
    Ok(LowerOutcome { needs_scheduler, async_fns })
}

/// The bulk of the coroutine lowering: discover async functions, decide on
/// the scheduler, and run the rewriting pipeline when one is needed.
fn transform_blocking_operations(
    module: &mut Module,
    config: &Config,
    rt: &RuntimeFns,
) -> Result<(bool, Vec<String>), LowerError> {
    if rt.yield_fn.is_none() {
        // No blocking operations anywhere. Spawns still have to become
        // plain calls.
        debug!("module never blocks; skipping the coroutine transformation");
        spawn::lower_make_goroutine_calls(module, rt, &HashSet::new(), false)?;
        return Ok((false, Vec::new()));
    }

    let asyncs = mark::find_async_functions(module, rt)?;
    let async_fns: Vec<String> = asyncs.iter().map(|&f| module.func(f).name.clone()).collect();

    let needs_scheduler = mark::scheduler_needed(module, config, rt, &asyncs)?;
    if !needs_scheduler {
        debug!("no scheduler needed; goroutines become plain calls");
        spawn::lower_make_goroutine_calls(module, rt, &HashSet::new(), false)?;
        return Ok((false, async_fns));
    }

    let non_returning = mark::find_non_returning(module, rt, &asyncs);
    rewrite::rewrite_async_calls(module, rt, &asyncs, &non_returning);
    rewrite::ditch_tail_yields(module, rt, &asyncs);
    rewrite::insert_return_reactivations(module, rt, &asyncs);
    frame::install_coroutine_frames(module, config, rt, &asyncs)?;
    frame::rewrite_parent_handle_calls(module, rt)?;

    let mut parent_not_required = frame::parent_not_required(module, rt, &asyncs)?;
    if let Some(fake) = rt.fake_coroutine {
        // The runtime's own sentinel task never inspects a parent.
        parent_not_required.insert(fake);
    }
    frame::strip_stale_attrs(module, rt, &asyncs);
    frame::remove_norets(module, rt);
    spawn::lower_make_goroutine_calls(module, rt, &parent_not_required, true)?;

    Ok((true, async_fns))
}

/// Replace the single `callMain` call with a real call of the program
/// `main`, optionally followed by the scheduler loop.
fn rewire_entry(
    module: &mut Module,
    rt: &RuntimeFns,
    needs_scheduler: bool,
) -> Result<(), LowerError> {
    let Some(call_main) = rt.call_main else {
        return Ok(());
    };
    let uses = module.fn_uses(call_main);
    let (entry_fn, entry_call) = match uses.as_slice() {
        // Already rewired on an earlier run.
        [] => return Ok(()),
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

    let f = module.func_mut(entry_fn);
    let parent = if needs_scheduler {
        // main runs as the root goroutine under the scheduler.
        let fake = build_call(f, rt.get_fake_coroutine, Type::byte_ptr(), vec![], "fake.parent");
        f.insert_before(entry_call, fake);
        Value::Inst(fake)
    } else {
        Value::undef(Type::byte_ptr())
    };
    let call = build_call(
        f,
        main,
        main_ret,
        vec![Value::undef(Type::byte_ptr()), parent],
        "",
    );
    f.insert_before(entry_call, call);
    if needs_scheduler {
        let scheduler = build_call(f, rt.scheduler, Type::Void, vec![], "");
        f.insert_before(entry_call, scheduler);
    }
    f.erase_inst(entry_call);

    // main had external linkage so the front end could reach it; internal
    // linkage from here on enables interprocedural optimization.
    module.func_mut(main).linkage = Linkage::Internal;

    if !needs_scheduler {
        // The cooperative reentry export is dead weight without a
        // scheduler; let the back-end discard it.
        if let Some(reentry) = rt.go_scheduler {
            module.func_mut(reentry).linkage = Linkage::Internal;
        }
    }
    Ok(())
}

/// A return terminator matching the given return type: plain for void,
/// undef otherwise.
pub(crate) fn undef_return(ty: &Type) -> Terminator {
    if ty.is_void() {
        Terminator::Ret(None)
    } else {
        Terminator::Ret(Some(Value::undef(ty.clone())))
    }
}
