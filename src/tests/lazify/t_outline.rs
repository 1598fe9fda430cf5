use indoc::indoc;

use super::{branchy_module, product_module};
use crate::analysis::{Cfg, DomTree, PostDomTree};
use crate::ir::format::format_func;
use crate::ir::model::{BlockId, FuncId, Module, ValueId};
use crate::ir::types::TypeKind;
use crate::lazify::outline::{arg_base, outline, OutlinedThunk};
use crate::lazify::slice::ProgramSlice;
use crate::verify::verify_module;

fn slice_of(module: &Module, caller: FuncId, initial: ValueId, call_block: BlockId) -> ProgramSlice {
    let func = module.func(caller);
    let cfg = Cfg::new(func);
    let dom = DomTree::build(&cfg);
    let pdom = PostDomTree::build(&cfg);
    ProgramSlice::build(module, caller, initial, call_block, &cfg, &dom, &pdom)
}

fn record_fields(module: &Module, thunk: &OutlinedThunk) -> Vec<crate::ir::types::TypeId> {
    match module.types.kind(thunk.record_ty) {
        TypeKind::Struct { fields } => fields.clone(),
        other => panic!("thunk record is not a struct: {:?}", other),
    }
}

#[test]
fn test_outline_straight_line_slice() {
    let (mut module, caller, _) = product_module();
    let slice = slice_of(&module, caller, ValueId(4), BlockId(0));

    let thunk = outline(&mut module, &slice, false, 0).expect("outline failed");

    // Function pointer plus one slot per captured argument.
    assert_eq!(record_fields(&module, &thunk).len(), 3);
    assert!(verify_module(&module).is_ok());

    let text = format_func(module.func(thunk.func), &module);
    let expected = indoc! {"
        fn _wyvern_slice_caller_x0(%_wyvern_thunkptr: ptr<_wyvern_thunk_type>) -> u64 {
          bb1:
            %_wyvern_arg_addr_a: ptr<u64> = field_addr %_wyvern_thunkptr, 1
            %_wyvern_arg_a: u64 = load %_wyvern_arg_addr_a
            %_wyvern_arg_addr_b: ptr<u64> = field_addr %_wyvern_thunkptr, 2
            %_wyvern_arg_b: u64 = load %_wyvern_arg_addr_b
            %v7: u64 = mul %_wyvern_arg_a, %_wyvern_arg_b
            %v8: u64 = const 1:u64
            %x: u64 = add %v7, %v8
            ret %x
        }
    "};
    assert_eq!(text, expected);
}

#[test]
fn test_outline_branchy_slice_keeps_branch_and_phi() {
    let (mut module, caller, _) = branchy_module();
    let slice = slice_of(&module, caller, ValueId(7), BlockId(3));
    assert_eq!(slice.len(), 5);

    let thunk = outline(&mut module, &slice, false, 0).expect("outline failed");
    assert!(verify_module(&module).is_ok());

    let text = format_func(module.func(thunk.func), &module);
    let expected = indoc! {"
        fn _wyvern_slice_caller_x0(%_wyvern_thunkptr: ptr<_wyvern_thunk_type>) -> u64 {
          bb4:
            %_wyvern_arg_addr_a: ptr<u64> = field_addr %_wyvern_thunkptr, 1
            %_wyvern_arg_a: u64 = load %_wyvern_arg_addr_a
            %_wyvern_arg_addr_b: ptr<u64> = field_addr %_wyvern_thunkptr, 2
            %_wyvern_arg_b: u64 = load %_wyvern_arg_addr_b
            %_wyvern_arg_addr_c: ptr<bool> = field_addr %_wyvern_thunkptr, 3
            %_wyvern_arg_c: bool = load %_wyvern_arg_addr_c
            condbr %_wyvern_arg_c, bb5, bb6
          bb5:
            %v10: u64 = const 1:u64
            %v11: u64 = add %_wyvern_arg_a, %v10
            br bb7
          bb6:
            %v12: u64 = const 2:u64
            %v13: u64 = mul %_wyvern_arg_b, %v12
            br bb7
          bb7:
            %x: u64 = phi [bb5: %v11], [bb6: %v13]
            ret %x
        }
    "};
    assert_eq!(text, expected);
}

#[test]
fn test_memoized_outline_adds_prologue_and_epilogue() {
    let (mut module, caller, _) = product_module();
    let slice = slice_of(&module, caller, ValueId(4), BlockId(0));

    let thunk = outline(&mut module, &slice, true, 0).expect("outline failed");

    // Function pointer, cached value, flag, then the captured arguments.
    let fields = record_fields(&module, &thunk);
    assert_eq!(fields.len(), 5);
    assert_eq!(arg_base(true), 3);
    assert!(verify_module(&module).is_ok());

    let text = format_func(module.func(thunk.func), &module);
    let expected = indoc! {"
        fn _wyvern_slice_memo_caller_x0(%_wyvern_thunkptr: ptr<_wyvern_thunk_type>) -> u64 {
          bb3:
            %_wyvern_memo_val_addr: ptr<u64> = field_addr %_wyvern_thunkptr, 1
            %_wyvern_memo_val: u64 = load %_wyvern_memo_val_addr
            %_wyvern_memo_flag_addr: ptr<bool> = field_addr %_wyvern_thunkptr, 2
            %_wyvern_memo_flag: bool = load %_wyvern_memo_flag_addr
            condbr %_wyvern_memo_flag, bb4, bb1
          bb4:
            ret %_wyvern_memo_val
          bb1:
            %_wyvern_arg_addr_a: ptr<u64> = field_addr %_wyvern_thunkptr, 3
            %_wyvern_arg_a: u64 = load %_wyvern_arg_addr_a
            %_wyvern_arg_addr_b: ptr<u64> = field_addr %_wyvern_thunkptr, 4
            %_wyvern_arg_b: u64 = load %_wyvern_arg_addr_b
            %v7: u64 = mul %_wyvern_arg_a, %_wyvern_arg_b
            %v8: u64 = const 1:u64
            %x: u64 = add %v7, %v8
            %v18: bool = const true
            store %v18 -> %_wyvern_memo_flag_addr
            store %x -> %_wyvern_memo_val_addr
            ret %x
        }
    "};
    assert_eq!(text, expected);
}

#[test]
fn test_nonce_reaches_the_symbol_name() {
    let (mut module, caller, _) = product_module();
    let slice = slice_of(&module, caller, ValueId(4), BlockId(0));
    let thunk = outline(&mut module, &slice, false, 41).expect("outline failed");
    assert_eq!(module.func(thunk.func).name, "_wyvern_slice_caller_x41");
}
