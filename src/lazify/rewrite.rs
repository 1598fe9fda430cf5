//! Callee cloning, forcing rewrites, and call-site rewiring.
//!
//! The cloned callee receives the thunk record pointer in place of the
//! lazified parameter; every use of the parameter forces the thunk by
//! loading the record's function-pointer field and calling it with the
//! record as sole argument. The call site allocates the record and fills
//! every slot before the call is issued.

use crate::ir::model::{
    for_each_term_use, for_each_term_use_mut, for_each_use, for_each_use_mut,
    replace_value_in_inst, replace_value_in_term, BlockId, Callee, ConstValue, FuncId, Function,
    InstKind, Instruction, Module, Terminator, ValueDef, ValueId,
};
use crate::ir::types::TypeId;
use crate::lazify::outline::{arg_base, OutlinedThunk};

/// Clones `callee` with parameter `index` retyped to the thunk record
/// pointer and every use of it replaced by a forcing call.
pub fn clone_callee(
    module: &mut Module,
    callee: FuncId,
    index: usize,
    thunk: &OutlinedThunk,
    memo: bool,
) -> FuncId {
    let fptr_addr_ty = module.types.ptr_to(thunk.fn_ptr_ty);

    // Per-function value namespaces make a wholesale clone sound: internal
    // IDs keep their meaning in the copy.
    let mut clone = module.func(callee).clone();
    clone.name = format!("_wyvern_calleeclone_{}_{}", clone.name, index);
    let param = clone.params[index].value.id;
    clone.params[index].value.ty = thunk.record_ptr_ty;
    clone.set_name(param, "_wyvern_thunkptr");

    insert_forcing_calls(&mut clone, param, thunk, fptr_addr_ty, memo);

    module.add_func(clone)
}

fn insert_forcing_calls(
    func: &mut Function,
    param: ValueId,
    thunk: &OutlinedThunk,
    fptr_addr_ty: TypeId,
    memo: bool,
) {
    for block_idx in 0..func.blocks.len() {
        let old_insts = std::mem::take(&mut func.blocks[block_idx].insts);
        let mut insts = Vec::with_capacity(old_insts.len());

        for mut inst in old_insts {
            let mut count = 0;
            for_each_use(&inst.kind, |value| {
                if value == param {
                    count += 1;
                }
            });
            if count > 0 {
                if memo {
                    // One forcing sequence per use; the memoization test in
                    // the thunk body makes the repeats cheap.
                    let forced: Vec<ValueId> = (0..count)
                        .map(|_| emit_force(func, &mut insts, param, thunk, fptr_addr_ty))
                        .collect();
                    let mut forced = forced.into_iter();
                    for_each_use_mut(&mut inst.kind, |value| {
                        if *value == param {
                            *value = forced.next().unwrap();
                        }
                    });
                } else {
                    // Call-by-name re-evaluates per using instruction; uses
                    // within one instruction share a single call.
                    let forced = emit_force(func, &mut insts, param, thunk, fptr_addr_ty);
                    replace_value_in_inst(&mut inst.kind, param, forced);
                }
            }
            insts.push(inst);
        }

        let mut term = std::mem::replace(&mut func.blocks[block_idx].term, Terminator::Unterminated);
        let mut count = 0;
        for_each_term_use(&term, |value| {
            if value == param {
                count += 1;
            }
        });
        if count > 0 {
            if memo {
                let forced: Vec<ValueId> = (0..count)
                    .map(|_| emit_force(func, &mut insts, param, thunk, fptr_addr_ty))
                    .collect();
                let mut forced = forced.into_iter();
                for_each_term_use_mut(&mut term, |value| {
                    if *value == param {
                        *value = forced.next().unwrap();
                    }
                });
            } else {
                let forced = emit_force(func, &mut insts, param, thunk, fptr_addr_ty);
                replace_value_in_term(&mut term, param, forced);
            }
        }

        func.blocks[block_idx].insts = insts;
        func.blocks[block_idx].term = term;
    }
}

/// Emits `load record.field0; call it(record)` and returns the call result.
fn emit_force(
    func: &mut Function,
    insts: &mut Vec<Instruction>,
    param: ValueId,
    thunk: &OutlinedThunk,
    fptr_addr_ty: TypeId,
) -> ValueId {
    let addr = func.alloc_value();
    func.set_name(addr, "_thunk_fptr_addr");
    insts.push(Instruction {
        result: Some(ValueDef {
            id: addr,
            ty: fptr_addr_ty,
        }),
        kind: InstKind::FieldAddr {
            base: param,
            index: 0,
        },
    });

    let fptr = func.alloc_value();
    func.set_name(fptr, "_thunk_fptr");
    insts.push(Instruction {
        result: Some(ValueDef {
            id: fptr,
            ty: thunk.fn_ptr_ty,
        }),
        kind: InstKind::Load { ptr: addr },
    });

    let forced = func.alloc_value();
    func.set_name(forced, "_thunk_call");
    insts.push(Instruction {
        result: Some(ValueDef {
            id: forced,
            ty: thunk.result_ty,
        }),
        kind: InstKind::Call {
            callee: Callee::Value(fptr),
            args: vec![param],
        },
    });

    forced
}

/// Materializes the thunk record ahead of the call and swaps the call over
/// to the cloned callee.
#[allow(clippy::too_many_arguments)]
pub fn rewrite_call_site(
    module: &mut Module,
    caller: FuncId,
    block: BlockId,
    call_index: usize,
    arg_index: usize,
    dep_args: &[ValueDef],
    thunk: &OutlinedThunk,
    new_callee: FuncId,
    memo: bool,
) {
    let fptr_addr_ty = module.types.ptr_to(thunk.fn_ptr_ty);
    let bool_ty = module.types.bool();
    let flag_addr_ty = module.types.ptr_to(bool_ty);
    let arg_addr_tys: Vec<TypeId> = dep_args
        .iter()
        .map(|arg| module.types.ptr_to(arg.ty))
        .collect();

    let func = module.func_mut(caller);
    let mut insts = Vec::new();

    let record = func.alloc_value();
    func.set_name(record, "_thunk_alloca");
    insts.push(Instruction {
        result: Some(ValueDef {
            id: record,
            ty: thunk.record_ptr_ty,
        }),
        kind: InstKind::StackAlloc {
            ty: thunk.record_ty,
        },
    });

    let fptr_slot = func.alloc_value();
    func.set_name(fptr_slot, "_thunk_fptr_gep");
    insts.push(Instruction {
        result: Some(ValueDef {
            id: fptr_slot,
            ty: fptr_addr_ty,
        }),
        kind: InstKind::FieldAddr {
            base: record,
            index: 0,
        },
    });
    let thunk_addr = func.alloc_value();
    insts.push(Instruction {
        result: Some(ValueDef {
            id: thunk_addr,
            ty: thunk.fn_ptr_ty,
        }),
        kind: InstKind::Const {
            value: ConstValue::FuncAddr(thunk.func),
        },
    });
    insts.push(Instruction {
        result: None,
        kind: InstKind::Store {
            ptr: fptr_slot,
            value: thunk_addr,
        },
    });

    if memo {
        let flag_slot = func.alloc_value();
        func.set_name(flag_slot, "_thunk_flag_gep");
        insts.push(Instruction {
            result: Some(ValueDef {
                id: flag_slot,
                ty: flag_addr_ty,
            }),
            kind: InstKind::FieldAddr {
                base: record,
                index: 2,
            },
        });
        let flag_zero = func.alloc_value();
        insts.push(Instruction {
            result: Some(ValueDef {
                id: flag_zero,
                ty: bool_ty,
            }),
            kind: InstKind::Const {
                value: ConstValue::Bool(false),
            },
        });
        insts.push(Instruction {
            result: None,
            kind: InstKind::Store {
                ptr: flag_slot,
                value: flag_zero,
            },
        });
    }

    let base = arg_base(memo);
    for (offset, (arg, &addr_ty)) in dep_args.iter().zip(&arg_addr_tys).enumerate() {
        let arg_name = func.name_or_id(arg.id);
        let slot = func.alloc_value();
        func.set_name(slot, format!("_thunk_arg_gep_{}", arg_name));
        insts.push(Instruction {
            result: Some(ValueDef {
                id: slot,
                ty: addr_ty,
            }),
            kind: InstKind::FieldAddr {
                base: record,
                index: base + offset,
            },
        });
        insts.push(Instruction {
            result: None,
            kind: InstKind::Store {
                ptr: slot,
                value: arg.id,
            },
        });
    }

    let inserted = insts.len();
    let block = func.block_mut(block);
    block.insts.splice(call_index..call_index, insts);

    let call = &mut block.insts[call_index + inserted];
    let InstKind::Call { callee, args } = &mut call.kind else {
        panic!("call site moved during rewrite");
    };
    *callee = Callee::Direct(new_callee);
    args[arg_index] = record;
}
