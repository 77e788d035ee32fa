//! Registry of the runtime functions the lowering talks to.
//!
//! The input module declares a fixed set of runtime functions by name
//! (`yield`, `getCoroutine`, `makeGoroutine`, ...). They are looked up
//! once, before any rewriting starts, and the resulting registry is handed
//! to every sub-pass. Functions the pass itself emits calls to are
//! declared on demand when the input module lacks them.

use tern_ir::{Callee, FuncId, Function, InstId, Module, Op, Param, Type, Value};

/// Handles to the runtime contract functions.
///
/// Fields typed `Option<FuncId>` are the ones whose absence is meaningful:
/// no `yield` means the program never blocks, no `makeGoroutine` means it
/// never spawns, and so on.
pub(crate) struct RuntimeFns {
    pub get_coroutine: FuncId,
    pub get_parent_handle: FuncId,
    pub activate_task: FuncId,
    pub set_task_state_ptr: FuncId,
    pub get_task_state_ptr: FuncId,
    pub get_fake_coroutine: FuncId,
    pub alloc: FuncId,
    pub free_fn: FuncId,
    pub noret: FuncId,
    pub scheduler: FuncId,

    pub yield_fn: Option<FuncId>,
    pub make_goroutine: Option<FuncId>,
    pub call_main: Option<FuncId>,
    pub start_goroutine: Option<FuncId>,
    pub sleep: Option<FuncId>,
    pub fake_coroutine: Option<FuncId>,
    pub go_scheduler: Option<FuncId>,
    pub main: Option<FuncId>,
}

impl RuntimeFns {
    /// Look up the runtime contract in `module`, declaring the helpers the
    /// pass emits calls to if the front end left them out.
    pub fn find(module: &mut Module) -> RuntimeFns {
        let byte_ptr = Type::byte_ptr;
        RuntimeFns {
            get_coroutine: ensure(module, "getCoroutine", vec![], byte_ptr()),
            get_parent_handle: ensure(module, "getParentHandle", vec![], byte_ptr()),
            activate_task: ensure(
                module,
                "activateTask",
                vec![Param::new("task", byte_ptr())],
                Type::Void,
            ),
            set_task_state_ptr: ensure(
                module,
                "setTaskStatePtr",
                vec![Param::new("task", byte_ptr()), Param::new("state", byte_ptr())],
                Type::Void,
            ),
            get_task_state_ptr: ensure(
                module,
                "getTaskStatePtr",
                vec![Param::new("task", byte_ptr())],
                byte_ptr(),
            ),
            get_fake_coroutine: ensure(module, "getFakeCoroutine", vec![], byte_ptr()),
            alloc: ensure(module, "alloc", vec![Param::new("size", Type::IPtr)], byte_ptr()),
            free_fn: ensure(module, "free", vec![Param::new("ptr", byte_ptr())], Type::Void),
            noret: ensure(module, "noret", vec![], Type::Void),
            scheduler: ensure(module, "scheduler", vec![], Type::Void),

            yield_fn: module.get_function("yield"),
            make_goroutine: module.get_function("makeGoroutine"),
            call_main: module.get_function("callMain"),
            start_goroutine: module.get_function("startGoroutine"),
            sleep: module.get_function("sleep"),
            fake_coroutine: module.get_function("fakeCoroutine"),
            go_scheduler: module.get_function("go_scheduler"),
            main: module.get_function("main"),
        }
    }
}

/// Get a function by name, declaring it with the given signature when it
/// is missing.
pub(crate) fn ensure(module: &mut Module, name: &str, params: Vec<Param>, ret: Type) -> FuncId {
    if let Some(id) = module.get_function(name) {
        return id;
    }
    module.declare_function(name, params, ret)
}

/// Create an unattached call instruction. The caller picks the insertion
/// point; `ret` must match the callee's declared return type.
pub(crate) fn build_call(
    func: &mut Function,
    callee: FuncId,
    ret: Type,
    args: Vec<Value>,
    name: &str,
) -> InstId {
    func.new_inst(name, Op::Call { callee: Callee::Direct(callee), args, ty: ret })
}

/// Whether `inst` is a direct call of `callee`.
pub(crate) fn is_call_to(func: &Function, inst: InstId, callee: FuncId) -> bool {
    matches!(
        func.inst(inst).op,
        Op::Call { callee: Callee::Direct(c), .. } if c == callee
    )
}
