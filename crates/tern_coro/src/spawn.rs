//! Goroutine-spawn lowering.
//!
//! A go statement reaches this pass as a fixed shape: the spawned
//! function's address constant threaded through `makeGoroutine`, cast back
//! to a function pointer, and called. The started goroutine is either
//! non-blocking (it can simply be called) or blocking (it will ask the
//! scheduler to be rescheduled itself), so the whole shape collapses into
//! a direct call with a synthesized parent handle.

use std::collections::HashSet;

use tracing::debug;

use tern_ir::{Callee, Const, FnUse, FuncId, Module, Op, Type, UseRef, Value};

use crate::runtime::{build_call, RuntimeFns};
use crate::LowerError;

/// Rewrite every `makeGoroutine` pattern into a direct call.
///
/// The trailing parent-handle argument becomes null when the spawned
/// function tolerates it (or when no scheduler runs at all), and a fake
/// coroutine otherwise.
pub(crate) fn lower_make_goroutine_calls(
    module: &mut Module,
    rt: &RuntimeFns,
    parent_not_required: &HashSet<FuncId>,
    provide_fake_parent: bool,
) -> Result<(), LowerError> {
    let Some(make_goroutine) = rt.make_goroutine else {
        return Ok(());
    };

    let ret_tys: Vec<Type> = module.funcs().map(|(_, f)| f.ret.clone()).collect();
    let names: Vec<String> = module.funcs().map(|(_, f)| f.name.clone()).collect();

    for fn_use in module.fn_uses(make_goroutine) {
        let FnUse::Callee { func, inst } = fn_use else {
            return Err(LowerError::SpawnPattern(
                "makeGoroutine used as a value instead of being called".to_string(),
            ));
        };
        let f = module.func_mut(func);

        // The operand must be the wrapped address of the spawned function.
        let spawned = match &f.inst(inst).op {
            Op::Call { args, .. } => match args.first() {
                Some(Value::Const(Const::FnAddr(g))) => *g,
                _ => {
                    return Err(LowerError::SpawnPattern(
                        "expected constant function address operand of makeGoroutine".to_string(),
                    ))
                }
            },
            _ => unreachable!("callee use is a call"),
        };

        // Exactly one cast back to a function pointer...
        let wrapper_uses = f.value_uses(&Value::Inst(inst));
        let int_to_ptr = match wrapper_uses.as_slice() {
            [UseRef::Inst(i)] if matches!(&f.inst(*i).op, Op::IntToPtr { .. }) => *i,
            _ => {
                return Err(LowerError::SpawnPattern(
                    "expected exactly one inttoptr use of makeGoroutine".to_string(),
                ))
            }
        };

        // ...and exactly one call through that pointer.
        let pointer_uses = f.value_uses(&Value::Inst(int_to_ptr));
        let indirect_call = match pointer_uses.as_slice() {
            [UseRef::Inst(i)]
                if matches!(
                    &f.inst(*i).op,
                    Op::Call { callee: Callee::Indirect(v), .. } if *v == Value::Inst(int_to_ptr)
                ) =>
            {
                *i
            }
            _ => {
                return Err(LowerError::SpawnPattern(
                    "expected exactly one call through the spawned function pointer".to_string(),
                ))
            }
        };

        let mut args = match &f.inst(indirect_call).op {
            Op::Call { args, .. } => args.clone(),
            _ => unreachable!("checked above"),
        };
        if parent_not_required.contains(&spawned) || !provide_fake_parent {
            debug!("spawning @{} with a null parent handle", names[spawned as usize]);
            if let Some(last) = args.last_mut() {
                *last = Value::null_byte_ptr();
            }
        } else {
            // A root goroutine has no parent, but this one inspects its
            // handle; give it the sentinel that drops activations.
            debug!("spawning @{} with the fake parent handle", names[spawned as usize]);
            let fake = build_call(f, rt.get_fake_coroutine, Type::byte_ptr(), vec![], "fake.parent");
            f.insert_before(indirect_call, fake);
            if let Some(last) = args.last_mut() {
                *last = Value::Inst(fake);
            }
        }

        let direct = f.new_inst(
            "",
            Op::Call {
                callee: Callee::Direct(spawned),
                args,
                ty: ret_tys[spawned as usize].clone(),
            },
        );
        f.insert_before(indirect_call, direct);

        f.erase_inst(indirect_call);
        f.erase_inst(int_to_ptr);
        f.erase_inst(inst);
    }
    Ok(())
}
