//! Textual IR formatter, used by tests and debug logging.

use std::fmt::Write;

use crate::ir::model::*;
use crate::ir::types::{TypeCache, TypeId, TypeKind};

pub fn format_module(module: &Module) -> String {
    let mut out = String::new();
    for (idx, func) in module.funcs.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&format_func(func, module));
    }
    out
}

pub fn format_func(func: &Function, module: &Module) -> String {
    let mut out = String::new();
    write!(out, "fn {}(", func.name).unwrap();
    for (idx, param) in func.params.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        write!(
            out,
            "{}: {}",
            value_ref(func, param.value.id),
            format_ty(&module.types, param.value.ty)
        )
        .unwrap();
    }
    writeln!(out, ") -> {} {{", format_ty(&module.types, func.ret)).unwrap();

    for block in &func.blocks {
        writeln!(out, "  bb{}:", block.id.0).unwrap();
        for inst in &block.insts {
            writeln!(out, "    {}", format_inst(func, module, inst)).unwrap();
        }
        writeln!(out, "    {}", format_term(func, &block.term)).unwrap();
    }
    out.push_str("}\n");
    out
}

pub fn format_ty(types: &TypeCache, ty: TypeId) -> String {
    if let Some(name) = types.name(ty) {
        return name.to_string();
    }
    match types.kind(ty) {
        TypeKind::Unit => "()".to_string(),
        TypeKind::Bool => "bool".to_string(),
        TypeKind::Int { signed, bits } => {
            format!("{}{}", if *signed { "i" } else { "u" }, bits)
        }
        TypeKind::Ptr { elem } => format!("ptr<{}>", format_ty(types, *elem)),
        TypeKind::Struct { fields } => {
            let fields: Vec<String> = fields.iter().map(|f| format_ty(types, *f)).collect();
            format!("struct<{}>", fields.join(", "))
        }
        TypeKind::Fn { params, ret } => {
            let params: Vec<String> = params.iter().map(|p| format_ty(types, *p)).collect();
            format!("fn({}) -> {}", params.join(", "), format_ty(types, *ret))
        }
    }
}

fn value_ref(func: &Function, value: ValueId) -> String {
    format!("%{}", func.name_or_id(value))
}

fn format_const(module: &Module, value: &ConstValue) -> String {
    match value {
        ConstValue::Unit => "const ()".to_string(),
        ConstValue::Bool(b) => format!("const {}", b),
        ConstValue::Int {
            value,
            signed,
            bits,
        } => format!("const {}:{}{}", value, if *signed { "i" } else { "u" }, bits),
        ConstValue::FuncAddr(func) => format!("const @{}", module.funcs[func.index()].name),
    }
}

fn format_inst(func: &Function, module: &Module, inst: &Instruction) -> String {
    let body = match &inst.kind {
        InstKind::Const { value } => format_const(module, value),
        InstKind::BinOp { op, lhs, rhs } => format!(
            "{} {}, {}",
            binop_name(*op),
            value_ref(func, *lhs),
            value_ref(func, *rhs)
        ),
        InstKind::UnOp { op, value } => format!("{} {}", unop_name(*op), value_ref(func, *value)),
        InstKind::Cmp { op, lhs, rhs } => format!(
            "cmp.{} {}, {}",
            cmp_name(*op),
            value_ref(func, *lhs),
            value_ref(func, *rhs)
        ),
        InstKind::Cast { kind, value, ty } => format!(
            "cast.{} {} to {}",
            cast_name(*kind),
            value_ref(func, *value),
            format_ty(&module.types, *ty)
        ),
        InstKind::Phi { incomings } => {
            let arms: Vec<String> = incomings
                .iter()
                .map(|(block, value)| format!("[bb{}: {}]", block.0, value_ref(func, *value)))
                .collect();
            format!("phi {}", arms.join(", "))
        }
        InstKind::StackAlloc { ty } => {
            format!("stack_alloc {}", format_ty(&module.types, *ty))
        }
        InstKind::FieldAddr { base, index } => {
            format!("field_addr {}, {}", value_ref(func, *base), index)
        }
        InstKind::Load { ptr } => format!("load {}", value_ref(func, *ptr)),
        InstKind::Store { ptr, value } => {
            format!("store {} -> {}", value_ref(func, *value), value_ref(func, *ptr))
        }
        InstKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|arg| value_ref(func, *arg)).collect();
            let callee = match callee {
                Callee::Direct(id) => format!("@{}", module.funcs[id.index()].name),
                Callee::Value(value) => value_ref(func, *value),
            };
            format!("call {}({})", callee, args.join(", "))
        }
    };

    match &inst.result {
        Some(result) => format!(
            "{}: {} = {}",
            value_ref(func, result.id),
            format_ty(&module.types, result.ty),
            body
        ),
        None => body,
    }
}

fn format_term(func: &Function, term: &Terminator) -> String {
    match term {
        Terminator::Br { target } => format!("br bb{}", target.0),
        Terminator::CondBr {
            cond,
            then_bb,
            else_bb,
        } => format!(
            "condbr {}, bb{}, bb{}",
            value_ref(func, *cond),
            then_bb.0,
            else_bb.0
        ),
        Terminator::Switch {
            value,
            cases,
            default,
        } => {
            let mut arms: Vec<String> = cases
                .iter()
                .map(|case| {
                    let label = match &case.value {
                        ConstValue::Int { value, .. } => value.to_string(),
                        ConstValue::Bool(b) => b.to_string(),
                        ConstValue::Unit => "()".to_string(),
                        ConstValue::FuncAddr(_) => "@".to_string(),
                    };
                    format!("[{}: bb{}]", label, case.target.0)
                })
                .collect();
            arms.push(format!("default bb{}", default.0));
            format!("switch {}, {}", value_ref(func, *value), arms.join(", "))
        }
        Terminator::Return { value } => match value {
            Some(value) => format!("ret {}", value_ref(func, *value)),
            None => "ret".to_string(),
        },
        Terminator::Unreachable => "unreachable".to_string(),
        Terminator::Unterminated => "unterminated".to_string(),
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "div",
        BinOp::Mod => "mod",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::Shr => "shr",
    }
}

fn unop_name(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "neg",
        UnOp::Not => "not",
        UnOp::BitNot => "bitnot",
    }
}

fn cmp_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Lt => "lt",
        CmpOp::Le => "le",
        CmpOp::Gt => "gt",
        CmpOp::Ge => "ge",
    }
}

fn cast_name(kind: CastKind) -> &'static str {
    match kind {
        CastKind::PtrToInt => "ptr_to_int",
        CastKind::IntToPtr => "int_to_ptr",
        CastKind::PtrToPtr => "ptr_to_ptr",
    }
}

#[cfg(test)]
#[path = "../tests/ir/t_format.rs"]
mod tests;
