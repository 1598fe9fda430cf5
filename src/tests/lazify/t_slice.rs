use super::{
    alloc_module, branchy_module, escape_module, lcssa_module, load_module, loop_module,
    product_module,
};
use crate::analysis::{Cfg, DomTree, LoopInfo, PostDomTree};
use crate::ir::model::{BlockId, FuncId, Module, ValueId};
use crate::lazify::slice::{ProgramSlice, Reject};

fn slice_of(module: &Module, caller: FuncId, initial: ValueId, call_block: BlockId) -> ProgramSlice {
    let func = module.func(caller);
    let cfg = Cfg::new(func);
    let dom = DomTree::build(&cfg);
    let pdom = PostDomTree::build(&cfg);
    ProgramSlice::build(module, caller, initial, call_block, &cfg, &dom, &pdom)
}

fn loops_of(module: &Module, caller: FuncId) -> LoopInfo {
    let cfg = Cfg::new(module.func(caller));
    let dom = DomTree::build(&cfg);
    LoopInfo::build(&cfg, &dom)
}

#[test]
fn test_slice_size_counts_caller_instructions() {
    let (module, caller, _) = product_module();
    let slice = slice_of(&module, caller, ValueId(4), BlockId(0));
    assert_eq!(slice.len(), 3);
}

#[test]
fn test_dep_args_in_parameter_order() {
    let (module, caller, _) = branchy_module();
    let slice = slice_of(&module, caller, ValueId(7), BlockId(3));

    // Discovery order is c, a, b; the slice reorders to parameter order.
    let args: Vec<ValueId> = slice.dep_args.iter().map(|arg| arg.id).collect();
    assert_eq!(args, vec![ValueId(0), ValueId(1), ValueId(2)]);
}

#[test]
fn test_attractors_walk_the_postdominator_tree() {
    let (module, caller, _) = branchy_module();
    // Slice only the then-arm's add: the slice covers just bb1.
    let slice = slice_of(&module, caller, ValueId(4), BlockId(3));

    assert_eq!(slice.attractors[&BlockId(1)], Some(BlockId(1)));
    assert_eq!(slice.attractors[&BlockId(0)], None);
    assert_eq!(slice.attractors[&BlockId(2)], None);
    assert_eq!(slice.attractors[&BlockId(3)], None);
}

#[test]
fn test_branchy_slice_is_outlineable() {
    let (module, caller, _) = branchy_module();
    let slice = slice_of(&module, caller, ValueId(7), BlockId(3));
    let loops = loops_of(&module, caller);
    assert!(slice.can_outline(&module, &loops).is_ok());
}

#[test]
fn test_load_in_slice_rejected() {
    let (module, caller, _) = load_module();
    let slice = slice_of(&module, caller, ValueId(3), BlockId(0));
    let loops = loops_of(&module, caller);
    assert!(matches!(
        slice.can_outline(&module, &loops),
        Err(Reject::MemoryAccess(ValueId(1)))
    ));
}

#[test]
fn test_slice_crossing_call_site_loop_rejected() {
    let (module, caller, _) = loop_module();
    let slice = slice_of(&module, caller, ValueId(6), BlockId(2));
    let loops = loops_of(&module, caller);
    assert!(matches!(
        slice.can_outline(&module, &loops),
        Err(Reject::LoopDepth(_))
    ));
}

#[test]
fn test_alloc_as_criterion_rejected() {
    let (module, caller, _) = alloc_module();
    let slice = slice_of(&module, caller, ValueId(0), BlockId(0));
    let loops = loops_of(&module, caller);
    assert!(matches!(
        slice.can_outline(&module, &loops),
        Err(Reject::AllocCriterion)
    ));
}

#[test]
fn test_escaping_alloc_rejected() {
    let (module, caller, _) = escape_module();
    let slice = slice_of(&module, caller, ValueId(2), BlockId(0));
    let loops = loops_of(&module, caller);
    assert!(matches!(
        slice.can_outline(&module, &loops),
        Err(Reject::EscapingAlloc(ValueId(1)))
    ));
}

#[test]
fn test_degenerate_phi_rejected() {
    let (module, caller, _) = lcssa_module();
    let slice = slice_of(&module, caller, ValueId(4), BlockId(2));
    let loops = loops_of(&module, caller);
    assert!(matches!(
        slice.can_outline(&module, &loops),
        Err(Reject::DegeneratePhi)
    ));
}
