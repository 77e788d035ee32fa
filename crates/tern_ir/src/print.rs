//! IR printer — human-readable textual representation of the IR.
//!
//! Produces output like:
//! ```text
//! define @main(%ctx: i8*, %parentHandle: i8*) -> void {
//! bb0: ; entry
//!   %0 = call @getCoroutine() : i8*
//!   ret
//! }
//! ```
//!
//! Labels are `bb<id>`; the block's name, when present, follows as a
//! comment. The output is deterministic, which is what the snapshot and
//! idempotence tests rely on.

use crate::ir::*;

/// Print an entire module to a string.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("; module {}\n\n", module.name));
    for (id, func) in module.funcs() {
        out.push_str(&print_function(module, id));
        if !func.is_declaration() {
            out.push('\n');
        }
    }
    out
}

/// Print a single function to a string.
pub fn print_function(module: &Module, id: FuncId) -> String {
    let func = module.func(id);
    let mut out = String::new();

    let params: Vec<String> = func.params.iter().map(fmt_param).collect();
    let header = format!("@{}({}) -> {}", func.name, params.join(", "), fmt_type(&func.ret));

    if func.is_declaration() {
        out.push_str(&format!("declare {}\n", header));
        return out;
    }

    match func.linkage {
        Linkage::External => out.push_str(&format!("define {} {{\n", header)),
        Linkage::Internal => out.push_str(&format!("define internal {} {{\n", header)),
    }

    for bb in func.block_ids() {
        let block = func.block(bb);
        if block.name.is_empty() {
            out.push_str(&format!("bb{}:\n", bb));
        } else {
            out.push_str(&format!("bb{}: ; {}\n", bb, block.name));
        }
        for &inst in &block.insts {
            out.push_str(&format!("  {}\n", fmt_inst(module, func, inst)));
        }
        out.push_str(&format!("  {}\n", fmt_term(module, func, &block.term)));
    }

    out.push_str("}\n");
    out
}

// ================================================================
// Formatting helpers
// ================================================================

fn fmt_param(param: &Param) -> String {
    let mut s = format!("%{}: {}", param.name, fmt_type(&param.ty));
    for attr in &param.attrs {
        match attr {
            ParamAttr::NoCapture => s.push_str(" nocapture"),
            ParamAttr::ReadNone => s.push_str(" readnone"),
        }
    }
    s
}

fn fmt_type(ty: &Type) -> String {
    match ty {
        Type::Void => "void".into(),
        Type::I1 => "i1".into(),
        Type::I8 => "i8".into(),
        Type::I16 => "i16".into(),
        Type::I32 => "i32".into(),
        Type::I64 => "i64".into(),
        Type::IPtr => "iptr".into(),
        Type::Token => "token".into(),
        Type::Ptr(inner) => format!("{}*", fmt_type(inner)),
        Type::Func(params, ret) => {
            let ps: Vec<String> = params.iter().map(fmt_type).collect();
            format!("fn({}) -> {}", ps.join(", "), fmt_type(ret))
        }
        Type::Struct(name) => format!("%{}", name),
    }
}

fn fmt_result(func: &Function, inst: InstId) -> String {
    let name = &func.inst(inst).name;
    if name.is_empty() {
        format!("%{}", inst)
    } else {
        format!("%{}", name)
    }
}

fn fmt_value(module: &Module, func: &Function, value: &Value) -> String {
    match value {
        Value::Inst(id) => fmt_result(func, *id),
        Value::Param(idx) => format!("%{}", func.params[*idx as usize].name),
        Value::Func(f) => format!("@{}", module.func(*f).name),
        Value::Const(c) => fmt_const(module, c),
    }
}

fn fmt_const(module: &Module, c: &Const) -> String {
    match c {
        Const::Int { ty, value } => format!("{} {}", fmt_type(ty), value),
        Const::Null(ty) => format!("{} null", fmt_type(ty)),
        Const::Undef(ty) => format!("{} undef", fmt_type(ty)),
        Const::FnAddr(f) => format!("ptrtoint @{}", module.func(*f).name),
    }
}

fn fmt_inst(module: &Module, func: &Function, inst: InstId) -> String {
    let v = |value: &Value| fmt_value(module, func, value);
    match &func.inst(inst).op {
        Op::Call { callee, args, ty } => {
            let callee_str = match callee {
                Callee::Direct(f) => format!("@{}", module.func(*f).name),
                Callee::Indirect(value) => v(value),
            };
            let args_str: Vec<String> = args.iter().map(|a| v(a)).collect();
            if ty.is_void() {
                format!("call {}({})", callee_str, args_str.join(", "))
            } else {
                format!(
                    "{} = call {}({}) : {}",
                    fmt_result(func, inst),
                    callee_str,
                    args_str.join(", "),
                    fmt_type(ty)
                )
            }
        }
        Op::Alloca { ty } => format!("{} = alloca {}", fmt_result(func, inst), fmt_type(ty)),
        Op::Load { ptr, ty } => {
            format!("{} = load {}, {}", fmt_result(func, inst), fmt_type(ty), v(ptr))
        }
        Op::Store { value, ptr } => format!("store {}, {}", v(value), v(ptr)),
        Op::Bitcast { value, ty } => {
            format!("{} = bitcast {} to {}", fmt_result(func, inst), v(value), fmt_type(ty))
        }
        Op::PtrToInt { value, ty } => {
            format!("{} = ptrtoint {} to {}", fmt_result(func, inst), v(value), fmt_type(ty))
        }
        Op::IntToPtr { value, ty } => {
            format!("{} = inttoptr {} to {}", fmt_result(func, inst), v(value), fmt_type(ty))
        }
        Op::Trunc { value, ty } => {
            format!("{} = trunc {} to {}", fmt_result(func, inst), v(value), fmt_type(ty))
        }
        Op::ZExt { value, ty } => {
            format!("{} = zext {} to {}", fmt_result(func, inst), v(value), fmt_type(ty))
        }
        Op::Binary { op, lhs, rhs, .. } => {
            let name = match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
            };
            format!("{} = {} {}, {}", fmt_result(func, inst), name, v(lhs), v(rhs))
        }
    }
}

fn fmt_term(module: &Module, func: &Function, term: &Terminator) -> String {
    match term {
        Terminator::Ret(None) => "ret".into(),
        Terminator::Ret(Some(value)) => format!("ret {}", fmt_value(module, func, value)),
        Terminator::Br(bb) => format!("br bb{}", bb),
        Terminator::CondBr { cond, then_bb, else_bb } => {
            format!("condbr {}, bb{}, bb{}", fmt_value(module, func, cond), then_bb, else_bb)
        }
        Terminator::Switch { value, default, cases } => {
            let cases_str: Vec<String> =
                cases.iter().map(|(c, bb)| format!("{} -> bb{}", c, bb)).collect();
            format!(
                "switch {}, default bb{} [{}]",
                fmt_value(module, func, value),
                default,
                cases_str.join(", ")
            )
        }
        Terminator::Unreachable => "unreachable".into(),
    }
}
