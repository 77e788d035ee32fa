//! IR verifier — checks structural invariants of the IR.
//!
//! Catches bugs in the lowering passes before they become mysterious
//! back-end failures. The checks are structural (arena consistency, block
//! targets, call arity), not a full SSA dominance analysis.

use std::collections::HashSet;

use crate::ir::*;

/// Result of IR verification.
#[derive(Debug)]
pub struct VerifyResult {
    pub errors: Vec<VerifyError>,
}

impl VerifyResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A single verification error.
#[derive(Debug, Clone)]
pub struct VerifyError {
    pub message: String,
    pub function: String,
    pub block: Option<BlockId>,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.block {
            Some(bb) => {
                write!(f, "verify error in @{} bb{}: {}", self.function, bb, self.message)
            }
            None => write!(f, "verify error in @{}: {}", self.function, self.message),
        }
    }
}

/// Verify an entire module.
pub fn verify_module(module: &Module) -> VerifyResult {
    let mut errors = Vec::new();

    let mut fn_names = HashSet::new();
    for (_, func) in module.funcs() {
        if !fn_names.insert(&func.name) {
            errors.push(VerifyError {
                message: format!("duplicate function name '{}'", func.name),
                function: func.name.clone(),
                block: None,
            });
        }
    }

    for (id, _) in module.funcs() {
        verify_function(module, id, &mut errors);
    }

    VerifyResult { errors }
}

fn verify_function(module: &Module, id: FuncId, errors: &mut Vec<VerifyError>) {
    let func = module.func(id);
    if func.is_declaration() {
        return;
    }

    let block_ids: HashSet<BlockId> = func.block_ids().into_iter().collect();
    let fn_count = module.func_ids().len() as FuncId;

    // 1. Each attached instruction appears in exactly one block.
    let mut seen = HashSet::new();
    for bb in func.block_ids() {
        for &inst in &func.block(bb).insts {
            if !func.is_live(inst) {
                errors.push(VerifyError {
                    message: format!("block references erased instruction %{}", inst),
                    function: func.name.clone(),
                    block: Some(bb),
                });
                continue;
            }
            if !seen.insert(inst) {
                errors.push(VerifyError {
                    message: format!("instruction %{} appears in more than one block", inst),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
        }
    }

    // 2. Terminator targets exist; return arity matches the signature.
    for bb in func.block_ids() {
        let term = func.terminator(bb);
        for target in term.successors() {
            if !block_ids.contains(&target) {
                errors.push(VerifyError {
                    message: format!("terminator target bb{} does not exist", target),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
        }
        match term {
            Terminator::Ret(Some(_)) if func.ret.is_void() => {
                errors.push(VerifyError {
                    message: "non-void return in a void function".to_string(),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
            Terminator::Ret(None) if !func.ret.is_void() => {
                errors.push(VerifyError {
                    message: "void return in a non-void function".to_string(),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
            _ => {}
        }
        for value in term_operands(term) {
            verify_value(module, func, &value, bb, errors);
        }
    }

    // 3. Instruction operands are valid; direct calls match their callee.
    for bb in func.block_ids() {
        for &inst in &func.block(bb).insts {
            if !func.is_live(inst) {
                continue;
            }
            for value in inst_operands(func, inst) {
                verify_value(module, func, &value, bb, errors);
            }
            if let Op::Call { callee: Callee::Direct(c), args, ty } = &func.inst(inst).op {
                if *c >= fn_count {
                    errors.push(VerifyError {
                        message: format!("call references unknown function id {}", c),
                        function: func.name.clone(),
                        block: Some(bb),
                    });
                    continue;
                }
                let callee = module.func(*c);
                if args.len() != callee.params.len() {
                    errors.push(VerifyError {
                        message: format!(
                            "call to @{} passes {} arguments, expected {}",
                            callee.name,
                            args.len(),
                            callee.params.len()
                        ),
                        function: func.name.clone(),
                        block: Some(bb),
                    });
                }
                if *ty != callee.ret {
                    errors.push(VerifyError {
                        message: format!(
                            "call to @{} has wrong result type",
                            callee.name
                        ),
                        function: func.name.clone(),
                        block: Some(bb),
                    });
                }
            }
        }
    }
}

fn verify_value(
    module: &Module,
    func: &Function,
    value: &Value,
    bb: BlockId,
    errors: &mut Vec<VerifyError>,
) {
    match value {
        Value::Inst(id) => {
            if !func.is_live(*id) {
                errors.push(VerifyError {
                    message: format!("operand references erased instruction %{}", id),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
        }
        Value::Param(idx) => {
            if *idx as usize >= func.params.len() {
                errors.push(VerifyError {
                    message: format!("operand references unknown parameter {}", idx),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
        }
        Value::Func(f) | Value::Const(Const::FnAddr(f)) => {
            if *f >= module.func_ids().len() as FuncId {
                errors.push(VerifyError {
                    message: format!("operand references unknown function id {}", f),
                    function: func.name.clone(),
                    block: Some(bb),
                });
            }
        }
        Value::Const(_) => {}
    }
}

fn inst_operands(func: &Function, inst: InstId) -> Vec<Value> {
    match &func.inst(inst).op {
        Op::Call { callee, args, .. } => {
            let mut vs = Vec::new();
            if let Callee::Indirect(v) = callee {
                vs.push(v.clone());
            }
            vs.extend(args.iter().cloned());
            vs
        }
        Op::Alloca { .. } => vec![],
        Op::Load { ptr, .. } => vec![ptr.clone()],
        Op::Store { value, ptr } => vec![value.clone(), ptr.clone()],
        Op::Bitcast { value, .. }
        | Op::PtrToInt { value, .. }
        | Op::IntToPtr { value, .. }
        | Op::Trunc { value, .. }
        | Op::ZExt { value, .. } => vec![value.clone()],
        Op::Binary { lhs, rhs, .. } => vec![lhs.clone(), rhs.clone()],
    }
}

fn term_operands(term: &Terminator) -> Vec<Value> {
    match term {
        Terminator::Ret(Some(v)) => vec![v.clone()],
        Terminator::CondBr { cond, .. } => vec![cond.clone()],
        Terminator::Switch { value, .. } => vec![value.clone()],
        _ => vec![],
    }
}
