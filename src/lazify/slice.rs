//! Backward program slices and the outlining validator.

use indexmap::{IndexMap, IndexSet};
use log::debug;
use thiserror::Error;

use crate::analysis::cfg::Cfg;
use crate::analysis::dom::{DomTree, PostDomTree};
use crate::analysis::loops::LoopInfo;
use crate::ir::model::{
    BlockId, Callee, CastKind, DefSite, FuncId, Function, InstKind, Module, Terminator, UseSite,
    ValueDef, ValueId,
};
use crate::ir::types::{TypeId, TypeKind};
use crate::lazify::deps::{data_deps, Gates};

/// Why a slice cannot be outlined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Reject {
    #[error("instruction {0:?} may read or write memory")]
    MemoryAccess(ValueId),
    #[error("instruction {0:?} may not return")]
    MayNotReturn(ValueId),
    #[error("instruction {0:?} calls through a pointer")]
    IndirectCall(ValueId),
    #[error("stack allocation {0:?} has its address taken")]
    EscapingAlloc(ValueId),
    #[error("block {0:?} is at the same or lower loop depth as the call site")]
    LoopDepth(BlockId),
    #[error("slicing criterion is a stack allocation")]
    AllocCriterion,
    #[error("single-incoming phi whose producing branch is outside the slice")]
    DegeneratePhi,
}

/// Minimal backward slice of one caller value, plus the control-flow
/// bookkeeping needed to outline it.
pub struct ProgramSlice {
    pub caller: FuncId,
    pub initial: ValueId,
    pub initial_ty: TypeId,
    pub call_block: BlockId,
    /// Values defined by caller instructions in the slice.
    pub insts: IndexSet<ValueId>,
    /// Caller formal parameters the slice depends on, in parameter order.
    pub dep_args: Vec<ValueDef>,
    /// Caller blocks that contribute instructions or control flow.
    pub blocks: IndexSet<BlockId>,
    /// Blocks whose (conditional) terminator is part of the slice.
    pub gate_terms: IndexSet<BlockId>,
    /// Nearest post-dominating slice block for every caller block.
    pub attractors: IndexMap<BlockId, Option<BlockId>>,
}

impl ProgramSlice {
    /// Builds the slice of `initial` within `func`.
    pub fn build(
        module: &Module,
        caller: FuncId,
        initial: ValueId,
        call_block: BlockId,
        cfg: &Cfg,
        dom: &DomTree,
        pdom: &PostDomTree,
    ) -> Self {
        let func = module.func(caller);
        let def_sites = func.def_sites();
        let gates = Gates::compute(func, cfg, dom, pdom);
        let deps = data_deps(func, initial, &gates, &def_sites);

        let mut dep_args: Vec<ValueDef> = func
            .params
            .iter()
            .map(|param| param.value)
            .filter(|value| deps.args.contains(&value.id))
            .collect();
        dep_args.sort_by_key(|value| value.id.0);

        let initial_ty = func.value_types()[&initial];

        let mut slice = Self {
            caller,
            initial,
            initial_ty,
            call_block,
            insts: deps.insts,
            dep_args,
            blocks: deps.blocks,
            gate_terms: deps.gate_terms,
            attractors: IndexMap::new(),
        };
        slice.compute_attractors(func, pdom);
        slice
    }

    /// Number of caller instructions in the slice.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// For every caller block, the nearest post-dominating block that is in
    /// the slice. Blocks already in the slice attract themselves.
    fn compute_attractors(&mut self, func: &Function, pdom: &PostDomTree) {
        for block in &func.blocks {
            if self.blocks.contains(&block.id) {
                self.attractors.insert(block.id, Some(block.id));
                continue;
            }
            let mut cand = pdom.ipdom(block.id);
            while let Some(node) = cand {
                if self.blocks.contains(&node) {
                    break;
                }
                cand = pdom.ipdom(node);
            }
            self.attractors.insert(block.id, cand);
        }
    }

    /// Decides whether the slice is legal to outline: every instruction
    /// must be pure, terminating and non-throwing, stack allocations must
    /// not escape, and the slice must not cross the call site's loops.
    pub fn can_outline(&self, module: &Module, loops: &LoopInfo) -> Result<(), Reject> {
        let func = module.func(self.caller);
        let value_types = func.value_types();
        let def_sites = func.def_sites();

        for &value in &self.insts {
            let kind = inst_kind(func, &def_sites, value);
            match kind {
                InstKind::Load { .. } | InstKind::Store { .. } => {
                    return Err(Reject::MemoryAccess(value));
                }
                InstKind::Call { callee, .. } => match callee {
                    Callee::Direct(id) => {
                        let target = module.func(*id);
                        if !target.pure {
                            return Err(Reject::MemoryAccess(value));
                        }
                        if !target.will_return {
                            return Err(Reject::MayNotReturn(value));
                        }
                    }
                    Callee::Value(_) => return Err(Reject::IndirectCall(value)),
                },
                InstKind::StackAlloc { .. } => {
                    let mut visited = IndexSet::new();
                    if has_address_taken(func, module, &value_types, value, &mut visited) {
                        return Err(Reject::EscapingAlloc(value));
                    }
                }
                InstKind::Const { .. }
                | InstKind::BinOp { .. }
                | InstKind::UnOp { .. }
                | InstKind::Cmp { .. }
                | InstKind::Cast { .. }
                | InstKind::Phi { .. }
                | InstKind::FieldAddr { .. } => {}
            }
        }

        // Lifting work out of a loop body is only sound when the whole slice
        // lives strictly deeper than the call site.
        let call_depth = loops.depth(self.call_block);
        if call_depth > 0 {
            for &block in &self.blocks {
                if loops.depth(block) <= call_depth {
                    return Err(Reject::LoopDepth(block));
                }
            }
        }

        if matches!(
            inst_kind(func, &def_sites, self.initial),
            InstKind::StackAlloc { .. }
        ) {
            return Err(Reject::AllocCriterion);
        }

        // LCSSA can produce single-incoming PHIs; if the branch that feeds
        // one is not itself in the slice, eliminating the PHI would
        // re-synthesize a loop-carried value out of thin air.
        if let InstKind::Phi { incomings } = inst_kind(func, &def_sites, self.initial) {
            if incomings.len() == 1 && !self.gate_terms.contains(&incomings[0].0) {
                return Err(Reject::DegeneratePhi);
            }
        }

        Ok(())
    }

    /// Dumps the slice through the `log` facade.
    pub fn log_slice(&self, func: &Function) {
        debug!(
            "slicing {} at {} ({} insts, {} blocks)",
            func.name,
            func.name_or_id(self.initial),
            self.insts.len(),
            self.blocks.len()
        );
        for &block in &self.blocks {
            debug!("  bb{}", block.0);
        }
        for &arg in self.dep_args.iter().map(|a| &a.id) {
            debug!("  arg %{}", func.name_or_id(arg));
        }
    }
}

fn inst_kind<'f>(
    func: &'f Function,
    def_sites: &IndexMap<ValueId, DefSite>,
    value: ValueId,
) -> &'f InstKind {
    match def_sites[&value] {
        DefSite::Inst { block, index } => &func.block(block).insts[index].kind,
        DefSite::Param(_) => panic!("slice instruction {:?} is a parameter", value),
    }
}

/// Conservative escape walk over the users of a pointer value. Anything not
/// recognized as innocuous counts as taking the address.
fn has_address_taken(
    func: &Function,
    module: &Module,
    value_types: &IndexMap<ValueId, TypeId>,
    ptr: ValueId,
    visited: &mut IndexSet<ValueId>,
) -> bool {
    if !visited.insert(ptr) {
        return false;
    }

    for site in func.uses_of(ptr) {
        match site {
            UseSite::Inst { block, index } => {
                let inst = &func.block(block).insts[index];
                match &inst.kind {
                    InstKind::Store { value, .. } => {
                        // Storing the pointer itself publishes it.
                        if *value == ptr {
                            return true;
                        }
                    }
                    InstKind::Load { .. } | InstKind::Cmp { .. } => {}
                    InstKind::Cast { kind, .. } => match kind {
                        CastKind::PtrToInt => return true,
                        CastKind::PtrToPtr => {
                            let result = inst.result.as_ref().unwrap().id;
                            if has_address_taken(func, module, value_types, result, visited) {
                                return true;
                            }
                        }
                        CastKind::IntToPtr => return true,
                    },
                    InstKind::FieldAddr { base, index } => {
                        if *base == ptr {
                            if field_out_of_bounds(module, value_types[base], *index) {
                                return true;
                            }
                            let result = inst.result.as_ref().unwrap().id;
                            if has_address_taken(func, module, value_types, result, visited) {
                                return true;
                            }
                        }
                    }
                    InstKind::Phi { .. } => {
                        let result = inst.result.as_ref().unwrap().id;
                        if has_address_taken(func, module, value_types, result, visited) {
                            return true;
                        }
                    }
                    InstKind::Call { callee, .. } => {
                        let pure = matches!(callee, Callee::Direct(id) if module.func(*id).pure);
                        if !pure {
                            return true;
                        }
                    }
                    _ => return true,
                }
            }
            UseSite::Term { block } => match &func.block(block).term {
                // Returning a pointer does not let anything write through it
                // within this function.
                Terminator::Return { .. } => {}
                _ => return true,
            },
        }
    }

    false
}

fn field_out_of_bounds(module: &Module, ptr_ty: TypeId, index: usize) -> bool {
    let TypeKind::Ptr { elem } = module.types.kind(ptr_ty) else {
        return true;
    };
    let TypeKind::Struct { fields } = module.types.kind(*elem) else {
        return true;
    };
    index >= fields.len()
}
