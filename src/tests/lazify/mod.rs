use indexmap::IndexSet;

use crate::ir::builder::FunctionBuilder;
use crate::ir::model::{BinOp, Callee, CmpOp, FuncId, Module, Terminator};
use crate::ir::types::TypeKind;
use crate::lazify::{CallSiteId, LazifyCandidates};

mod t_outline;
mod t_slice;

/// callee(x) = x * 2; pure, one use of `x` in one instruction.
fn add_double_callee(module: &mut Module) -> FuncId {
    let u64_ty = module.types.int(false, 64);
    let mut callee = FunctionBuilder::new("callee", &[u64_ty], u64_ty);
    callee.set_pure(true);
    let x = callee.param(0);
    callee.set_name(x, "x");
    let bb = callee.add_block();
    let two = callee.const_int(bb, 2, false, 64, u64_ty);
    let doubled = callee.binop(bb, BinOp::Mul, x, two, u64_ty);
    callee.set_terminator(bb, Terminator::Return {
        value: Some(doubled),
    });
    module.add_func(callee.finish())
}

/// caller(a, b) computing `a * b + 1` and passing it to `callee`.
fn add_product_caller(module: &mut Module, callee: FuncId) -> FuncId {
    let u64_ty = module.types.int(false, 64);
    let mut caller = FunctionBuilder::new("caller", &[u64_ty, u64_ty], u64_ty);
    let a = caller.param(0);
    let b = caller.param(1);
    caller.set_name(a, "a");
    caller.set_name(b, "b");
    let bb = caller.add_block();
    let prod = caller.binop(bb, BinOp::Mul, a, b, u64_ty);
    let one = caller.const_int(bb, 1, false, 64, u64_ty);
    let x = caller.binop(bb, BinOp::Add, prod, one, u64_ty);
    caller.set_name(x, "x");
    let result = caller.call(bb, Callee::Direct(callee), vec![x], u64_ty);
    caller.set_terminator(bb, Terminator::Return {
        value: Some(result),
    });
    module.add_func(caller.finish())
}

/// Straight-line candidate: the argument is `a * b + 1`.
fn product_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let caller = add_product_caller(&mut module, callee);
    (module, caller, callee)
}

/// Branchy candidate: the argument is `c ? a + 1 : b * 2`, merged by a phi.
fn branchy_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let u64_ty = module.types.int(false, 64);
    let bool_ty = module.types.bool();

    let mut caller = FunctionBuilder::new("caller", &[u64_ty, u64_ty, bool_ty], u64_ty);
    let a = caller.param(0);
    let b = caller.param(1);
    let c = caller.param(2);
    caller.set_name(a, "a");
    caller.set_name(b, "b");
    caller.set_name(c, "c");

    let entry = caller.add_block();
    let then_bb = caller.add_block();
    let else_bb = caller.add_block();
    let merge = caller.add_block();

    caller.set_terminator(entry, Terminator::CondBr {
        cond: c,
        then_bb,
        else_bb,
    });
    let one = caller.const_int(then_bb, 1, false, 64, u64_ty);
    let plus = caller.binop(then_bb, BinOp::Add, a, one, u64_ty);
    caller.set_terminator(then_bb, Terminator::Br { target: merge });
    let two = caller.const_int(else_bb, 2, false, 64, u64_ty);
    let times = caller.binop(else_bb, BinOp::Mul, b, two, u64_ty);
    caller.set_terminator(else_bb, Terminator::Br { target: merge });

    let x = caller.phi(merge, vec![(then_bb, plus), (else_bb, times)], u64_ty);
    caller.set_name(x, "x");
    let result = caller.call(merge, Callee::Direct(callee), vec![x], u64_ty);
    caller.set_terminator(merge, Terminator::Return {
        value: Some(result),
    });

    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// The call site sits in a loop body and the argument depends on the
/// induction variable.
fn loop_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let u64_ty = module.types.int(false, 64);
    let bool_ty = module.types.bool();

    let mut caller = FunctionBuilder::new("caller", &[u64_ty], u64_ty);
    let n = caller.param(0);
    caller.set_name(n, "n");

    let entry = caller.add_block();
    let header = caller.add_block();
    let body = caller.add_block();
    let exit = caller.add_block();

    let zero = caller.const_int(entry, 0, false, 64, u64_ty);
    let one = caller.const_int(entry, 1, false, 64, u64_ty);
    let two = caller.const_int(entry, 2, false, 64, u64_ty);
    caller.set_terminator(entry, Terminator::Br { target: header });

    let i = caller.phi(header, vec![(entry, zero)], u64_ty);
    caller.set_name(i, "i");
    let cond = caller.cmp(header, CmpOp::Lt, i, n, bool_ty);
    caller.set_terminator(header, Terminator::CondBr {
        cond,
        then_bb: body,
        else_bb: exit,
    });

    let x = caller.binop(body, BinOp::Mul, i, two, u64_ty);
    caller.set_name(x, "x");
    let _result = caller.call(body, Callee::Direct(callee), vec![x], u64_ty);
    let next = caller.binop(body, BinOp::Add, i, one, u64_ty);
    caller.set_terminator(body, Terminator::Br { target: header });
    caller.add_phi_incoming(header, i, body, next);

    caller.set_terminator(exit, Terminator::Return { value: Some(n) });

    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// The argument is computed from a memory load.
fn load_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let u64_ty = module.types.int(false, 64);
    let ptr_u64 = module.types.ptr_to(u64_ty);

    let mut caller = FunctionBuilder::new("caller", &[ptr_u64], u64_ty);
    let p = caller.param(0);
    caller.set_name(p, "p");
    let bb = caller.add_block();
    let value = caller.load(bb, p, u64_ty);
    let one = caller.const_int(bb, 1, false, 64, u64_ty);
    let x = caller.binop(bb, BinOp::Add, value, one, u64_ty);
    caller.set_name(x, "x");
    let result = caller.call(bb, Callee::Direct(callee), vec![x], u64_ty);
    caller.set_terminator(bb, Terminator::Return {
        value: Some(result),
    });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// A pure callee taking a pointer, for the allocation fixtures.
fn add_ptr_callee(module: &mut Module, param_ty: crate::ir::types::TypeId) -> FuncId {
    let u64_ty = module.types.int(false, 64);
    let mut callee = FunctionBuilder::new("consume", &[param_ty], u64_ty);
    callee.set_pure(true);
    let bb = callee.add_block();
    let zero = callee.const_int(bb, 0, false, 64, u64_ty);
    callee.set_terminator(bb, Terminator::Return { value: Some(zero) });
    module.add_func(callee.finish())
}

/// The argument is itself a stack allocation.
fn alloc_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let u64_ty = module.types.int(false, 64);
    let record = module.types.add(TypeKind::Struct {
        fields: vec![u64_ty],
    });
    let ptr_record = module.types.ptr_to(record);
    let callee = add_ptr_callee(&mut module, ptr_record);

    let mut caller = FunctionBuilder::new("caller", &[], u64_ty);
    let bb = caller.add_block();
    let slot = caller.stack_alloc(bb, record, ptr_record);
    let result = caller.call(bb, Callee::Direct(callee), vec![slot], u64_ty);
    caller.set_terminator(bb, Terminator::Return {
        value: Some(result),
    });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// The argument points into a stack record whose address is also stored
/// elsewhere.
fn escape_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let u64_ty = module.types.int(false, 64);
    let record = module.types.add(TypeKind::Struct {
        fields: vec![u64_ty],
    });
    let ptr_record = module.types.ptr_to(record);
    let ptr_ptr_record = module.types.ptr_to(ptr_record);
    let ptr_u64 = module.types.ptr_to(u64_ty);
    let callee = add_ptr_callee(&mut module, ptr_u64);

    let mut caller = FunctionBuilder::new("caller", &[ptr_ptr_record], u64_ty);
    let out = caller.param(0);
    caller.set_name(out, "out");
    let bb = caller.add_block();
    let slot = caller.stack_alloc(bb, record, ptr_record);
    caller.store(bb, out, slot);
    let field = caller.field_addr(bb, slot, 0, ptr_u64);
    caller.set_name(field, "field");
    let result = caller.call(bb, Callee::Direct(callee), vec![field], u64_ty);
    caller.set_terminator(bb, Terminator::Return {
        value: Some(result),
    });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// The argument is a single-incoming phi whose producing branch is outside
/// the slice, the shape LCSSA leaves on loop exits.
fn lcssa_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let u64_ty = module.types.int(false, 64);
    let bool_ty = module.types.bool();

    let mut caller = FunctionBuilder::new("caller", &[u64_ty, bool_ty], u64_ty);
    let a = caller.param(0);
    let c = caller.param(1);
    caller.set_name(a, "a");
    caller.set_name(c, "c");

    let entry = caller.add_block();
    let body = caller.add_block();
    let exit = caller.add_block();

    let one = caller.const_int(entry, 1, false, 64, u64_ty);
    caller.set_terminator(entry, Terminator::Br { target: body });
    let value = caller.binop(body, BinOp::Add, a, one, u64_ty);
    caller.set_terminator(body, Terminator::CondBr {
        cond: c,
        then_bb: body,
        else_bb: exit,
    });
    let lx = caller.phi(exit, vec![(body, value)], u64_ty);
    caller.set_name(lx, "lx");
    let result = caller.call(exit, Callee::Direct(callee), vec![lx], u64_ty);
    caller.set_terminator(exit, Terminator::Return {
        value: Some(result),
    });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// A callee that merges the lazified parameter in a phi.
fn phi_use_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let u64_ty = module.types.int(false, 64);
    let bool_ty = module.types.bool();

    let mut callee = FunctionBuilder::new("merge", &[u64_ty, bool_ty], u64_ty);
    callee.set_pure(true);
    let x = callee.param(0);
    let c = callee.param(1);
    let entry = callee.add_block();
    let then_bb = callee.add_block();
    let else_bb = callee.add_block();
    let join = callee.add_block();
    callee.set_terminator(entry, Terminator::CondBr {
        cond: c,
        then_bb,
        else_bb,
    });
    let one = callee.const_int(then_bb, 1, false, 64, u64_ty);
    let plus = callee.binop(then_bb, BinOp::Add, x, one, u64_ty);
    callee.set_terminator(then_bb, Terminator::Br { target: join });
    callee.set_terminator(else_bb, Terminator::Br { target: join });
    let merged = callee.phi(join, vec![(then_bb, plus), (else_bb, x)], u64_ty);
    callee.set_terminator(join, Terminator::Return {
        value: Some(merged),
    });
    let callee = module.add_func(callee.finish());

    let mut caller = FunctionBuilder::new("caller", &[u64_ty, bool_ty], u64_ty);
    let a = caller.param(0);
    let c = caller.param(1);
    caller.set_name(a, "a");
    let bb = caller.add_block();
    let one = caller.const_int(bb, 1, false, 64, u64_ty);
    let x = caller.binop(bb, BinOp::Add, a, one, u64_ty);
    caller.set_name(x, "x");
    let result = caller.call(bb, Callee::Direct(callee), vec![x, c], u64_ty);
    caller.set_terminator(bb, Terminator::Return {
        value: Some(result),
    });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

/// A callee using the lazified parameter in two distinct instructions.
fn two_use_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let u64_ty = module.types.int(false, 64);

    let mut callee = FunctionBuilder::new("callee", &[u64_ty], u64_ty);
    callee.set_pure(true);
    let x = callee.param(0);
    callee.set_name(x, "x");
    let bb = callee.add_block();
    let one = callee.const_int(bb, 1, false, 64, u64_ty);
    let plus = callee.binop(bb, BinOp::Add, x, one, u64_ty);
    let two = callee.const_int(bb, 2, false, 64, u64_ty);
    let times = callee.binop(bb, BinOp::Mul, x, two, u64_ty);
    let sum = callee.binop(bb, BinOp::Add, plus, times, u64_ty);
    callee.set_terminator(bb, Terminator::Return { value: Some(sum) });
    let callee = module.add_func(callee.finish());

    let caller = add_product_caller(&mut module, callee);
    (module, caller, callee)
}

/// Two call sites in the same caller passing the same argument.
fn twice_module() -> (Module, FuncId, FuncId) {
    let mut module = Module::new();
    let callee = add_double_callee(&mut module);
    let u64_ty = module.types.int(false, 64);

    let mut caller = FunctionBuilder::new("caller", &[u64_ty, u64_ty], u64_ty);
    let a = caller.param(0);
    let b = caller.param(1);
    caller.set_name(a, "a");
    caller.set_name(b, "b");
    let bb = caller.add_block();
    let prod = caller.binop(bb, BinOp::Mul, a, b, u64_ty);
    let one = caller.const_int(bb, 1, false, 64, u64_ty);
    let x = caller.binop(bb, BinOp::Add, prod, one, u64_ty);
    caller.set_name(x, "x");
    let first = caller.call(bb, Callee::Direct(callee), vec![x], u64_ty);
    let second = caller.call(bb, Callee::Direct(callee), vec![x], u64_ty);
    let sum = caller.binop(bb, BinOp::Add, first, second, u64_ty);
    caller.set_terminator(bb, Terminator::Return { value: Some(sum) });
    let caller = module.add_func(caller.finish());
    (module, caller, callee)
}

fn candidates(caller: FuncId, callee: FuncId, arg: usize) -> LazifyCandidates {
    let mut safe_args = IndexSet::new();
    safe_args.insert((callee, arg));
    LazifyCandidates {
        call_sites: vec![(
            CallSiteId {
                func: caller,
                call_index: 0,
            },
            arg,
        )],
        safe_args,
    }
}
