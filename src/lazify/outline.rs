//! Outlines a validated slice into a standalone thunk body.
//!
//! The thunk body takes a pointer to the thunk record and returns the
//! sliced value. Control flow is reconstructed from the slice via
//! attractor-based branch rerouting, then PHIs are repaired against the
//! new predecessor sets. In memoized mode a prologue consults the record's
//! flag/value fields and the epilogue fills them in.

use indexmap::{IndexMap, IndexSet};
use log::warn;

use crate::analysis::cfg::Cfg;
use crate::analysis::dom::DomTree;
use crate::ir::model::{
    for_each_term_use_mut, for_each_use_mut, replace_phi_incoming_block, replace_value_in_func,
    BlockId, ConstValue, FuncId, Function, InstKind, Instruction, Module, Terminator, ValueDef,
    ValueId,
};
use crate::ir::types::{TypeId, TypeKind};
use crate::lazify::slice::ProgramSlice;
use crate::verify::{verify_func, VerifyError};

/// Struct-type name shared by all thunk records; part of the ABI.
pub const THUNK_TYPE_NAME: &str = "_wyvern_thunk_type";

/// Record field index of the first captured argument.
pub fn arg_base(memo: bool) -> usize {
    if memo {
        3
    } else {
        1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutlinedThunk {
    pub func: FuncId,
    pub record_ty: TypeId,
    pub record_ptr_ty: TypeId,
    pub fn_ptr_ty: TypeId,
    /// Type of the sliced value, i.e. the thunk's return type.
    pub result_ty: TypeId,
}

/// Builds the thunk body for `slice`, appends it to the module and
/// verifies it. On verification failure the partial function is discarded
/// and the module is left as it was.
pub fn outline(
    module: &mut Module,
    slice: &ProgramSlice,
    memo: bool,
    nonce: u64,
) -> Result<OutlinedThunk, VerifyError> {
    let types_before = module.types.len();

    // The record type is self-referential (it holds a pointer to a function
    // taking a pointer to the record), so create it empty and fill the body
    // once the function types exist.
    let record_ty = module
        .types
        .add_named(TypeKind::Struct { fields: Vec::new() }, THUNK_TYPE_NAME);
    let record_ptr_ty = module.types.ptr_to(record_ty);
    let fn_ty = module.types.add(TypeKind::Fn {
        params: vec![record_ptr_ty],
        ret: slice.initial_ty,
    });
    let fn_ptr_ty = module.types.ptr_to(fn_ty);
    let bool_ty = module.types.bool();

    let mut fields = vec![fn_ptr_ty];
    if memo {
        fields.push(slice.initial_ty);
        fields.push(bool_ty);
    }
    fields.extend(slice.dep_args.iter().map(|arg| arg.ty));
    module.types.set_struct_body(record_ty, fields);

    let arg_ptr_tys: Vec<TypeId> = slice
        .dep_args
        .iter()
        .map(|arg| module.types.ptr_to(arg.ty))
        .collect();
    let val_ptr_ty = module.types.ptr_to(slice.initial_ty);
    let flag_ptr_ty = module.types.ptr_to(bool_ty);

    let func = build_body(
        module,
        slice,
        memo,
        nonce,
        record_ptr_ty,
        &arg_ptr_tys,
        val_ptr_ty,
        flag_ptr_ty,
        bool_ty,
    );

    let thunk = module.add_func(func);
    match verify_func(module.func(thunk), module) {
        Ok(()) => Ok(OutlinedThunk {
            func: thunk,
            record_ty,
            record_ptr_ty,
            fn_ptr_ty,
            result_ty: slice.initial_ty,
        }),
        Err(error) => {
            warn!(
                "discarding thunk for {} after failed verification: {}",
                module.func(slice.caller).name,
                error
            );
            module.funcs.pop();
            module.types.truncate(types_before);
            Err(error)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_body(
    module: &Module,
    slice: &ProgramSlice,
    memo: bool,
    nonce: u64,
    record_ptr_ty: TypeId,
    arg_ptr_tys: &[TypeId],
    val_ptr_ty: TypeId,
    flag_ptr_ty: TypeId,
    bool_ty: TypeId,
) -> Function {
    let caller = module.func(slice.caller);
    let cfg = Cfg::new(caller);
    let dom = DomTree::build(&cfg);

    let value_name = caller.name_or_id(slice.initial);
    let name = if memo {
        format!("_wyvern_slice_memo_{}_{}{}", caller.name, value_name, nonce)
    } else {
        format!("_wyvern_slice_{}_{}{}", caller.name, value_name, nonce)
    };

    let mut tf = Function::new(name, slice.initial_ty);
    // Allocate past the caller's ID ranges: operands and incoming blocks
    // that still refer to the caller stay distinguishable until argument
    // materialization and PHI repair rewrite them.
    tf.next_value = caller.next_value;
    tf.next_block = caller.next_block;
    let block_base = caller.next_block;

    let thunk_param = tf.add_param(record_ptr_ty);
    tf.set_name(thunk_param, "_wyvern_thunkptr");

    // Clone the slice blocks, keeping the caller's block order.
    let mut old_to_new: IndexMap<BlockId, BlockId> = IndexMap::new();
    let mut new_to_old: IndexMap<BlockId, BlockId> = IndexMap::new();
    for block in &caller.blocks {
        if slice.blocks.contains(&block.id) {
            let clone = tf.add_block();
            old_to_new.insert(block.id, clone);
            new_to_old.insert(clone, block.id);
        }
    }

    // Clone slice instructions in program order; gate terminators come
    // along with their block.
    let mut vmap: IndexMap<ValueId, ValueId> = IndexMap::new();
    for block in &caller.blocks {
        let Some(&clone) = old_to_new.get(&block.id) else {
            continue;
        };
        for inst in &block.insts {
            let Some(result) = &inst.result else {
                continue;
            };
            if !slice.insts.contains(&result.id) {
                continue;
            }
            let new_id = tf.alloc_value();
            vmap.insert(result.id, new_id);
            if let Some(name) = caller.names.get(&result.id) {
                tf.set_name(new_id, name.clone());
            }
            tf.block_mut(clone).insts.push(Instruction {
                result: Some(ValueDef {
                    id: new_id,
                    ty: result.ty,
                }),
                kind: inst.kind.clone(),
            });
        }
        if slice.gate_terms.contains(&block.id) {
            tf.block_mut(clone).term = block.term.clone();
        }
    }

    // Rewire operands to their clones. Caller parameters stay dangling
    // until argument materialization; cloned PHIs keep stale incoming
    // blocks until repair.
    for block in &mut tf.blocks {
        for inst in &mut block.insts {
            for_each_use_mut(&mut inst.kind, |value| {
                if let Some(&clone) = vmap.get(value) {
                    *value = clone;
                }
            });
            if let InstKind::Phi { incomings } = &mut inst.kind {
                for (incoming, _) in incomings {
                    if let Some(&clone) = old_to_new.get(incoming) {
                        *incoming = clone;
                    }
                }
            }
        }
        for_each_term_use_mut(&mut block.term, |value| {
            if let Some(&clone) = vmap.get(value) {
                *value = clone;
            }
        });
    }

    // Fallback branches along the dominator tree: a slice ancestor without
    // a terminator branches straight to its nearest slice descendant.
    let mut visited = IndexSet::new();
    visited.insert(cfg.entry());
    add_dom_branches(
        cfg.entry(),
        None,
        &dom,
        slice,
        &old_to_new,
        &mut tf,
        &mut visited,
    );

    // Shared target for branches whose destination fell out of the slice
    // entirely.
    let unreach = tf.add_block();
    tf.block_mut(unreach).term = Terminator::Unreachable;

    reroute_branches(
        caller,
        slice,
        &dom,
        &old_to_new,
        &new_to_old,
        &mut tf,
        unreach,
        block_base,
    );

    // Drop the unreachable block if nothing was routed to it, so it cannot
    // be mistaken for the entry.
    let unreach_used = tf
        .blocks
        .iter()
        .any(|block| block.term.successors().contains(&unreach));
    if !unreach_used {
        tf.blocks.retain(|block| block.id != unreach);
    }

    repair_phis(&mut tf);

    // Return the sliced value from its block.
    let new_initial = vmap[&slice.initial];
    let ret_block = block_defining(&tf, new_initial);
    tf.block_mut(ret_block).term = Terminator::Return {
        value: Some(new_initial),
    };

    move_entry_first(&mut tf);

    insert_thunk_param_loads(&mut tf, caller, slice, memo, arg_ptr_tys);

    if memo {
        add_memoization_code(
            &mut tf,
            ret_block,
            new_initial,
            val_ptr_ty,
            flag_ptr_ty,
            bool_ty,
            slice.initial_ty,
        );
    }

    tf
}

fn add_dom_branches(
    cur: BlockId,
    parent: Option<BlockId>,
    dom: &DomTree,
    slice: &ProgramSlice,
    old_to_new: &IndexMap<BlockId, BlockId>,
    tf: &mut Function,
    visited: &mut IndexSet<BlockId>,
) {
    let parent = if slice.blocks.contains(&cur) {
        Some(cur)
    } else {
        parent
    };

    for &child in dom.children(cur) {
        if visited.insert(child) {
            add_dom_branches(child, parent, dom, slice, old_to_new, tf, visited);
        }
        if slice.blocks.contains(&child) {
            if let Some(parent) = parent {
                let parent_clone = old_to_new[&parent];
                let child_clone = old_to_new[&child];
                if matches!(tf.block(parent_clone).term, Terminator::Unterminated) {
                    tf.block_mut(parent_clone).term = Terminator::Br {
                        target: child_clone,
                    };
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn reroute_branches(
    caller: &Function,
    slice: &ProgramSlice,
    dom: &DomTree,
    old_to_new: &IndexMap<BlockId, BlockId>,
    new_to_old: &IndexMap<BlockId, BlockId>,
    tf: &mut Function,
    unreach: BlockId,
    block_base: u32,
) {
    let clones: Vec<BlockId> = tf
        .blocks
        .iter()
        .map(|block| block.id)
        .filter(|&id| id != unreach)
        .collect();

    for clone in clones {
        let original = new_to_old[&clone];

        if matches!(tf.block(clone).term, Terminator::Unterminated) {
            // The original branch was not part of the slice: route
            // unconditionally to the attractor of any original successor
            // that still has a clone.
            for succ in caller.block(original).term.successors() {
                let target = slice
                    .attractors
                    .get(&succ)
                    .copied()
                    .flatten()
                    .and_then(|attractor| old_to_new.get(&attractor).copied());
                let Some(target) = target else {
                    continue;
                };
                tf.block_mut(clone).term = Terminator::Br { target };
                fix_dominated_phi_incomings(tf, target, clone, original, block_base, dom);
                break;
            }
        } else if slice.gate_terms.contains(&original) {
            // The cloned conditional still targets caller blocks; send each
            // successor to its attractor's clone, or to the shared
            // unreachable block when the attractor fell outside the slice.
            let mut term = tf.block(clone).term.clone();
            let mut retargeted = Vec::new();
            term.for_each_successor_mut(|target| {
                let original_succ = *target;
                let new_target = slice
                    .attractors
                    .get(&original_succ)
                    .copied()
                    .flatten()
                    .and_then(|attractor| old_to_new.get(&attractor).copied());
                match new_target {
                    Some(new_target) => {
                        *target = new_target;
                        retargeted.push((original_succ, new_target));
                    }
                    None => *target = unreach,
                }
            });
            tf.block_mut(clone).term = term;

            for (original_succ, new_target) in retargeted {
                for inst in &mut tf.block_mut(new_target).insts {
                    replace_phi_incoming_block(&mut inst.kind, original_succ, clone);
                }
            }
        }
    }
}

/// After routing `clone` (clone of `original`) to `target`, PHIs in the
/// target that merged a path from a caller block dominated by `original`
/// now receive that path through `clone`.
fn fix_dominated_phi_incomings(
    tf: &mut Function,
    target: BlockId,
    clone: BlockId,
    original: BlockId,
    block_base: u32,
    dom: &DomTree,
) {
    for inst in &mut tf.block_mut(target).insts {
        let InstKind::Phi { incomings } = &mut inst.kind else {
            continue;
        };
        for (incoming, _) in incomings.iter_mut() {
            if incoming.0 >= block_base {
                continue;
            }
            let mut cand = dom.idom(*incoming);
            while let Some(node) = cand {
                if node == original {
                    break;
                }
                cand = dom.idom(node);
            }
            if cand.is_some() {
                *incoming = clone;
            }
        }
    }
}

/// Removes PHI incomings whose block is not a predecessor in the new CFG.
fn repair_phis(tf: &mut Function) {
    let mut preds: IndexMap<BlockId, IndexSet<BlockId>> = tf
        .blocks
        .iter()
        .map(|block| (block.id, IndexSet::new()))
        .collect();
    for block in &tf.blocks {
        for succ in block.term.successors() {
            preds.entry(succ).or_default().insert(block.id);
        }
    }

    for block in &mut tf.blocks {
        let block_preds = &preds[&block.id];
        for inst in &mut block.insts {
            if let InstKind::Phi { incomings } = &mut inst.kind {
                incomings.retain(|(incoming, _)| block_preds.contains(incoming));
            }
        }
    }
}

fn block_defining(tf: &Function, value: ValueId) -> BlockId {
    tf.blocks
        .iter()
        .find(|block| {
            block
                .insts
                .iter()
                .any(|inst| inst.result.map_or(false, |r| r.id == value))
        })
        .map(|block| block.id)
        .unwrap_or_else(|| panic!("value {:?} not defined in thunk body", value))
}

/// Moves the unique block with no predecessors to the front so it becomes
/// the entry. If the reconstruction left no such block, the layout is kept
/// and verification reports the failure.
fn move_entry_first(tf: &mut Function) {
    let mut has_pred: IndexSet<BlockId> = IndexSet::new();
    for block in &tf.blocks {
        for succ in block.term.successors() {
            has_pred.insert(succ);
        }
    }
    let mut entry = None;
    for block in &tf.blocks {
        if !has_pred.contains(&block.id) {
            entry = Some(block.id);
        }
    }
    if let Some(entry) = entry {
        let pos = tf.blocks.iter().position(|block| block.id == entry).unwrap();
        if pos != 0 {
            let block = tf.blocks.remove(pos);
            tf.blocks.insert(0, block);
        }
    }
}

/// Materializes captured caller parameters from their record slots at the
/// entry's first insertion point.
fn insert_thunk_param_loads(
    tf: &mut Function,
    caller: &Function,
    slice: &ProgramSlice,
    memo: bool,
    arg_ptr_tys: &[TypeId],
) {
    let entry = tf.blocks[0].id;
    let param = tf.params[0].value.id;
    let base = arg_base(memo);

    let mut at = tf
        .block(entry)
        .insts
        .iter()
        .take_while(|inst| inst.kind.is_phi())
        .count();

    for (offset, (arg, &addr_ty)) in slice.dep_args.iter().zip(arg_ptr_tys).enumerate() {
        let arg_name = caller.name_or_id(arg.id);
        let addr = tf.alloc_value();
        tf.set_name(addr, format!("_wyvern_arg_addr_{}", arg_name));
        let loaded = tf.alloc_value();
        tf.set_name(loaded, format!("_wyvern_arg_{}", arg_name));

        let block = tf.block_mut(entry);
        block.insts.insert(
            at,
            Instruction {
                result: Some(ValueDef {
                    id: addr,
                    ty: addr_ty,
                }),
                kind: InstKind::FieldAddr {
                    base: param,
                    index: base + offset,
                },
            },
        );
        at += 1;
        block.insts.insert(
            at,
            Instruction {
                result: Some(ValueDef {
                    id: loaded,
                    ty: arg.ty,
                }),
                kind: InstKind::Load { ptr: addr },
            },
        );
        at += 1;

        replace_value_in_func(tf, arg.id, loaded);
    }
}

/// Prepends the memoization prologue and fills the record's value/flag
/// fields before the return.
fn add_memoization_code(
    tf: &mut Function,
    ret_block: BlockId,
    ret_value: ValueId,
    val_ptr_ty: TypeId,
    flag_ptr_ty: TypeId,
    bool_ty: TypeId,
    result_ty: TypeId,
) {
    let param = tf.params[0].value.id;
    let old_entry = tf.blocks[0].id;

    let new_entry = tf.add_block();
    let memo_ret = tf.add_block();

    let val_addr = tf.alloc_value();
    tf.set_name(val_addr, "_wyvern_memo_val_addr");
    let val = tf.alloc_value();
    tf.set_name(val, "_wyvern_memo_val");
    let flag_addr = tf.alloc_value();
    tf.set_name(flag_addr, "_wyvern_memo_flag_addr");
    let flag = tf.alloc_value();
    tf.set_name(flag, "_wyvern_memo_flag");

    {
        let block = tf.block_mut(new_entry);
        block.insts.push(Instruction {
            result: Some(ValueDef {
                id: val_addr,
                ty: val_ptr_ty,
            }),
            kind: InstKind::FieldAddr {
                base: param,
                index: 1,
            },
        });
        block.insts.push(Instruction {
            result: Some(ValueDef {
                id: val,
                ty: result_ty,
            }),
            kind: InstKind::Load { ptr: val_addr },
        });
        block.insts.push(Instruction {
            result: Some(ValueDef {
                id: flag_addr,
                ty: flag_ptr_ty,
            }),
            kind: InstKind::FieldAddr {
                base: param,
                index: 2,
            },
        });
        block.insts.push(Instruction {
            result: Some(ValueDef {
                id: flag,
                ty: bool_ty,
            }),
            kind: InstKind::Load { ptr: flag_addr },
        });
        block.term = Terminator::CondBr {
            cond: flag,
            then_bb: memo_ret,
            else_bb: old_entry,
        };
    }

    tf.block_mut(memo_ret).term = Terminator::Return { value: Some(val) };

    // Store the computed value and set the flag right before returning.
    let flag_set = tf.alloc_value();
    {
        let block = tf.block_mut(ret_block);
        block.insts.push(Instruction {
            result: Some(ValueDef {
                id: flag_set,
                ty: bool_ty,
            }),
            kind: InstKind::Const {
                value: ConstValue::Bool(true),
            },
        });
        block.insts.push(Instruction {
            result: None,
            kind: InstKind::Store {
                ptr: flag_addr,
                value: flag_set,
            },
        });
        block.insts.push(Instruction {
            result: None,
            kind: InstKind::Store {
                ptr: val_addr,
                value: ret_value,
            },
        });
    }

    // Layout: memo entry first, fast-path return second, then the body.
    let pos = tf.blocks.iter().position(|block| block.id == memo_ret).unwrap();
    let block = tf.blocks.remove(pos);
    tf.blocks.insert(0, block);
    let pos = tf.blocks.iter().position(|block| block.id == new_entry).unwrap();
    let block = tf.blocks.remove(pos);
    tf.blocks.insert(0, block);
}
