use crate::analysis::cfg::Cfg;
use crate::analysis::dom::{DomTree, PostDomTree};
use crate::ir::builder::FunctionBuilder;
use crate::ir::model::{BlockId, Function, Module, Terminator};

fn diamond() -> Function {
    let mut module = Module::new();
    let bool_ty = module.types.bool();
    let u64_ty = module.types.int(false, 64);

    let mut func = FunctionBuilder::new("diamond", &[bool_ty], u64_ty);
    let cond = func.param(0);
    let entry = func.add_block();
    let then_bb = func.add_block();
    let else_bb = func.add_block();
    let merge = func.add_block();
    func.set_terminator(entry, Terminator::CondBr {
        cond,
        then_bb,
        else_bb,
    });
    func.set_terminator(then_bb, Terminator::Br { target: merge });
    func.set_terminator(else_bb, Terminator::Br { target: merge });
    let one = func.const_int(merge, 1, false, 64, u64_ty);
    func.set_terminator(merge, Terminator::Return { value: Some(one) });
    func.finish()
}

fn while_loop() -> Function {
    let mut module = Module::new();
    let bool_ty = module.types.bool();
    let u64_ty = module.types.int(false, 64);

    let mut func = FunctionBuilder::new("loop", &[bool_ty], u64_ty);
    let cond = func.param(0);
    let entry = func.add_block();
    let header = func.add_block();
    let body = func.add_block();
    let exit = func.add_block();
    func.set_terminator(entry, Terminator::Br { target: header });
    func.set_terminator(header, Terminator::CondBr {
        cond,
        then_bb: body,
        else_bb: exit,
    });
    func.set_terminator(body, Terminator::Br { target: header });
    let one = func.const_int(exit, 1, false, 64, u64_ty);
    func.set_terminator(exit, Terminator::Return { value: Some(one) });
    func.finish()
}

#[test]
fn test_diamond_dominators() {
    let func = diamond();
    let cfg = Cfg::new(&func);
    let dom = DomTree::build(&cfg);

    assert_eq!(dom.idom(BlockId(0)), None);
    assert_eq!(dom.idom(BlockId(1)), Some(BlockId(0)));
    assert_eq!(dom.idom(BlockId(2)), Some(BlockId(0)));
    assert_eq!(dom.idom(BlockId(3)), Some(BlockId(0)));

    assert!(dom.dominates(BlockId(0), BlockId(3)));
    assert!(dom.dominates(BlockId(1), BlockId(1)));
    assert!(!dom.dominates(BlockId(1), BlockId(3)));
}

#[test]
fn test_diamond_post_dominators() {
    let func = diamond();
    let cfg = Cfg::new(&func);
    let pdom = PostDomTree::build(&cfg);

    assert_eq!(pdom.ipdom(BlockId(0)), Some(BlockId(3)));
    assert_eq!(pdom.ipdom(BlockId(1)), Some(BlockId(3)));
    assert_eq!(pdom.ipdom(BlockId(2)), Some(BlockId(3)));
    assert_eq!(pdom.ipdom(BlockId(3)), None);

    assert!(pdom.post_dominates(BlockId(3), BlockId(0)));
    assert!(pdom.post_dominates(BlockId(0), BlockId(0)));
    assert!(!pdom.post_dominates(BlockId(1), BlockId(0)));
}

#[test]
fn test_loop_dominators() {
    let func = while_loop();
    let cfg = Cfg::new(&func);
    let dom = DomTree::build(&cfg);
    let pdom = PostDomTree::build(&cfg);

    assert_eq!(dom.idom(BlockId(1)), Some(BlockId(0)));
    assert_eq!(dom.idom(BlockId(2)), Some(BlockId(1)));
    assert_eq!(dom.idom(BlockId(3)), Some(BlockId(1)));
    assert!(dom.dominates(BlockId(1), BlockId(2)));

    assert_eq!(pdom.ipdom(BlockId(0)), Some(BlockId(1)));
    assert_eq!(pdom.ipdom(BlockId(2)), Some(BlockId(1)));
    assert_eq!(pdom.ipdom(BlockId(1)), Some(BlockId(3)));
    assert!(pdom.post_dominates(BlockId(1), BlockId(2)));
    assert!(!pdom.post_dominates(BlockId(2), BlockId(1)));
}
