//! IR verifier.
//!
//! Run after lazification builds a thunk body or rewrites a call site; a
//! failure there is a bug in the transformation, not in the input.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::ir::model::{
    for_each_term_use, for_each_use, Block, BlockId, Callee, ConstValue, Function, InstKind,
    Instruction, Module, Terminator, ValueId,
};
use crate::ir::types::{TypeCache, TypeId, TypeKind};

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct VerifyError {
    message: String,
}

impl VerifyError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for func in &module.funcs {
        verify_func(func, module)?;
    }
    Ok(())
}

pub fn verify_func(func: &Function, module: &Module) -> Result<(), VerifyError> {
    let types = &module.types;

    if func.blocks.is_empty() {
        return Err(err(&func.name, None, "function has no blocks"));
    }

    let mut blocks = HashMap::new();
    for block in &func.blocks {
        if blocks.insert(block.id, block).is_some() {
            return Err(err(
                &func.name,
                None,
                format!("duplicate block {:?}", block.id),
            ));
        }
    }

    let mut value_types: HashMap<ValueId, TypeId> = HashMap::new();
    for param in &func.params {
        if value_types.insert(param.value.id, param.value.ty).is_some() {
            return Err(err(
                &func.name,
                None,
                format!("duplicate value {:?}", param.value.id),
            ));
        }
    }
    for block in &func.blocks {
        for inst in &block.insts {
            if let Some(result) = &inst.result {
                if value_types.insert(result.id, result.ty).is_some() {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        format!("duplicate value {:?}", result.id),
                    ));
                }
            }
        }
    }

    let preds = block_preds(func);

    for block in &func.blocks {
        let mut seen_non_phi = false;
        for inst in &block.insts {
            if inst.kind.is_phi() {
                if seen_non_phi {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        "phi after non-phi instruction",
                    ));
                }
            } else {
                seen_non_phi = true;
            }

            let mut use_error = None;
            for_each_use(&inst.kind, |value| {
                if use_error.is_none() && !value_types.contains_key(&value) {
                    use_error = Some(err(
                        &func.name,
                        Some(block.id),
                        format!("use of undefined value {:?}", value),
                    ));
                }
            });
            if let Some(error) = use_error {
                return Err(error);
            }

            verify_inst(func, module, types, block, inst, &value_types, &preds)?;
        }

        verify_terminator(func, block, &blocks, &value_types, types)?;
    }

    verify_entry(func, &preds)?;

    Ok(())
}

fn block_preds(func: &Function) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut preds: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for block in &func.blocks {
        preds.entry(block.id).or_default();
    }
    for block in &func.blocks {
        for succ in block.term.successors() {
            preds.entry(succ).or_default().insert(block.id);
        }
    }
    preds
}

fn verify_entry(func: &Function, preds: &HashMap<BlockId, HashSet<BlockId>>) -> Result<(), VerifyError> {
    let mut no_preds = Vec::new();
    for block in &func.blocks {
        if preds.get(&block.id).map_or(true, |p| p.is_empty()) {
            no_preds.push(block.id);
        }
    }
    if no_preds.len() != 1 {
        return Err(err(
            &func.name,
            None,
            format!("expected one entry block, found {:?}", no_preds),
        ));
    }
    if no_preds[0] != func.blocks[0].id {
        return Err(err(
            &func.name,
            None,
            format!("entry block {:?} is not first", no_preds[0]),
        ));
    }
    Ok(())
}

fn verify_inst(
    func: &Function,
    module: &Module,
    types: &TypeCache,
    block: &Block,
    inst: &Instruction,
    value_types: &HashMap<ValueId, TypeId>,
    preds: &HashMap<BlockId, HashSet<BlockId>>,
) -> Result<(), VerifyError> {
    let result_ty = |msg: &str| -> Result<TypeId, VerifyError> {
        inst.result
            .as_ref()
            .map(|r| r.ty)
            .ok_or_else(|| err(&func.name, Some(block.id), msg))
    };

    match &inst.kind {
        InstKind::Const { value } => {
            let ty = result_ty("const should define a result")?;
            let ok = match value {
                ConstValue::Unit => matches!(types.kind(ty), TypeKind::Unit),
                ConstValue::Bool(_) => matches!(types.kind(ty), TypeKind::Bool),
                ConstValue::Int { .. } => matches!(types.kind(ty), TypeKind::Int { .. }),
                ConstValue::FuncAddr(id) => {
                    if id.index() >= module.funcs.len() {
                        return Err(err(
                            &func.name,
                            Some(block.id),
                            format!("func_addr references missing function {:?}", id),
                        ));
                    }
                    matches!(types.kind(ty), TypeKind::Ptr { elem }
                        if matches!(types.kind(*elem), TypeKind::Fn { .. }))
                }
            };
            if !ok {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "const result type does not match constant",
                ));
            }
        }
        InstKind::Phi { incomings } => {
            if incomings.is_empty() {
                return Err(err(&func.name, Some(block.id), "phi with no incomings"));
            }
            let mut seen = HashSet::new();
            for (incoming, _) in incomings {
                if !seen.insert(*incoming) {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        format!("phi has duplicate incoming block {:?}", incoming),
                    ));
                }
            }
            let expected = &preds[&block.id];
            if &seen != expected {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    format!(
                        "phi incoming blocks {:?} do not match predecessors {:?}",
                        seen, expected
                    ),
                ));
            }
            let ty = result_ty("phi should define a result")?;
            for (_, value) in incomings {
                if value_types.get(value) != Some(&ty) {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        "phi incoming value type mismatch",
                    ));
                }
            }
        }
        InstKind::StackAlloc { ty } => {
            let result = result_ty("stack_alloc should define a result")?;
            let TypeKind::Ptr { elem } = types.kind(result) else {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "stack_alloc result is not a pointer",
                ));
            };
            if elem != ty {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "stack_alloc result does not point at allocated type",
                ));
            }
        }
        InstKind::FieldAddr { base, index } => {
            let base_ty = value_types[base];
            let TypeKind::Ptr { elem } = types.kind(base_ty) else {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "field_addr base is not a pointer",
                ));
            };
            let TypeKind::Struct { fields } = types.kind(*elem) else {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "field_addr base does not point at a struct",
                ));
            };
            let Some(&field_ty) = fields.get(*index) else {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    format!("field_addr index {} out of bounds", index),
                ));
            };
            let result = result_ty("field_addr should define a result")?;
            if !matches!(types.kind(result), TypeKind::Ptr { elem } if *elem == field_ty) {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "field_addr result does not point at the field type",
                ));
            }
        }
        InstKind::Load { ptr } => {
            let ptr_ty = value_types[ptr];
            let TypeKind::Ptr { elem } = types.kind(ptr_ty) else {
                return Err(err(&func.name, Some(block.id), "load from non-pointer"));
            };
            let result = result_ty("load should define a result")?;
            if result != *elem {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "load result type does not match pointee",
                ));
            }
        }
        InstKind::Store { ptr, value } => {
            let ptr_ty = value_types[ptr];
            let TypeKind::Ptr { elem } = types.kind(ptr_ty) else {
                return Err(err(&func.name, Some(block.id), "store to non-pointer"));
            };
            if value_types[value] != *elem {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "store value type does not match pointee",
                ));
            }
        }
        InstKind::Call { callee, args } => {
            let (param_tys, ret_ty) = match callee {
                Callee::Direct(id) => {
                    let Some(target) = module.funcs.get(id.index()) else {
                        return Err(err(
                            &func.name,
                            Some(block.id),
                            format!("call to missing function {:?}", id),
                        ));
                    };
                    (
                        target.params.iter().map(|p| p.value.ty).collect::<Vec<_>>(),
                        target.ret,
                    )
                }
                Callee::Value(value) => {
                    let ty = value_types[value];
                    let TypeKind::Ptr { elem } = types.kind(ty) else {
                        return Err(err(
                            &func.name,
                            Some(block.id),
                            "indirect call through non-pointer",
                        ));
                    };
                    let TypeKind::Fn { params, ret } = types.kind(*elem) else {
                        return Err(err(
                            &func.name,
                            Some(block.id),
                            "indirect call through non-function pointer",
                        ));
                    };
                    (params.clone(), *ret)
                }
            };
            if args.len() != param_tys.len() {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    format!(
                        "call expects {} args, got {}",
                        param_tys.len(),
                        args.len()
                    ),
                ));
            }
            for (arg, param_ty) in args.iter().zip(&param_tys) {
                if value_types[arg] != *param_ty {
                    return Err(err(&func.name, Some(block.id), "call argument type mismatch"));
                }
            }
            if let Some(result) = &inst.result {
                if result.ty != ret_ty {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        "call result type does not match callee return type",
                    ));
                }
            }
        }
        InstKind::Cast { ty, .. } => {
            let result = result_ty("cast should define a result")?;
            if result != *ty {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "cast result type does not match target type",
                ));
            }
        }
        InstKind::Cmp { .. } => {
            let result = result_ty("cmp should define a result")?;
            if !matches!(types.kind(result), TypeKind::Bool) {
                return Err(err(&func.name, Some(block.id), "cmp result is not bool"));
            }
        }
        InstKind::BinOp { .. } | InstKind::UnOp { .. } => {}
    }

    Ok(())
}

fn verify_terminator(
    func: &Function,
    block: &Block,
    blocks: &HashMap<BlockId, &Block>,
    value_types: &HashMap<ValueId, TypeId>,
    types: &TypeCache,
) -> Result<(), VerifyError> {
    let mut use_error = None;
    for_each_term_use(&block.term, |value| {
        if use_error.is_none() && !value_types.contains_key(&value) {
            use_error = Some(err(
                &func.name,
                Some(block.id),
                format!("use of undefined value {:?}", value),
            ));
        }
    });
    if let Some(error) = use_error {
        return Err(error);
    }

    for succ in block.term.successors() {
        if !blocks.contains_key(&succ) {
            return Err(err(
                &func.name,
                Some(block.id),
                format!("branch to missing block {:?}", succ),
            ));
        }
    }

    match &block.term {
        Terminator::CondBr { cond, .. } => {
            if !matches!(types.kind(value_types[cond]), TypeKind::Bool) {
                return Err(err(
                    &func.name,
                    Some(block.id),
                    "conditional branch expects bool",
                ));
            }
        }
        Terminator::Switch { value, .. } => {
            if !matches!(types.kind(value_types[value]), TypeKind::Int { .. }) {
                return Err(err(&func.name, Some(block.id), "switch expects integer"));
            }
        }
        Terminator::Return { value } => match value {
            Some(value) => {
                if value_types[value] != func.ret {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        "return value type does not match function return type",
                    ));
                }
            }
            None => {
                if !matches!(types.kind(func.ret), TypeKind::Unit) {
                    return Err(err(
                        &func.name,
                        Some(block.id),
                        "bare return from non-unit function",
                    ));
                }
            }
        },
        Terminator::Unterminated => {
            return Err(err(&func.name, Some(block.id), "block has no terminator"));
        }
        Terminator::Br { .. } | Terminator::Unreachable => {}
    }

    Ok(())
}

fn err(func_name: &str, block_id: Option<BlockId>, message: impl Into<String>) -> VerifyError {
    let message = match block_id {
        Some(block_id) => format!("verify: {func_name} {:?}: {}", block_id, message.into()),
        None => format!("verify: {func_name}: {}", message.into()),
    };
    VerifyError::new(message)
}

#[cfg(test)]
#[path = "tests/t_verify.rs"]
mod tests;
