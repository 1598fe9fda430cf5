//! Minimal IR function builder.
//!
//! Provides a small API for creating functions for tests and frontends
//! without exposing the raw ID allocation details.

use crate::ir::model::*;
use crate::ir::types::TypeId;

/// Constructs a function while managing ID allocation.
pub struct FunctionBuilder {
    func: Function,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: &[TypeId], ret: TypeId) -> Self {
        let mut func = Function::new(name, ret);
        for &ty in params {
            func.add_param(ty);
        }
        Self { func }
    }

    pub fn param(&self, index: usize) -> ValueId {
        self.func.params[index].value.id
    }

    /// Appends a new basic block and returns its ID.
    pub fn add_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    pub fn set_name(&mut self, value: ValueId, name: impl Into<String>) {
        self.func.set_name(value, name);
    }

    /// Marks the function as free of memory effects and guaranteed to return.
    pub fn set_pure(&mut self, pure: bool) {
        self.func.pure = pure;
    }

    pub fn set_will_return(&mut self, will_return: bool) {
        self.func.will_return = will_return;
    }

    pub fn const_int(&mut self, block: BlockId, value: i128, signed: bool, bits: u8, ty: TypeId) -> ValueId {
        self.emit(
            block,
            InstKind::Const {
                value: ConstValue::Int {
                    value,
                    signed,
                    bits,
                },
            },
            Some(ty),
        )
        .unwrap()
    }

    pub fn const_bool(&mut self, block: BlockId, value: bool, ty: TypeId) -> ValueId {
        self.emit(
            block,
            InstKind::Const {
                value: ConstValue::Bool(value),
            },
            Some(ty),
        )
        .unwrap()
    }

    pub fn const_unit(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        self.emit(
            block,
            InstKind::Const {
                value: ConstValue::Unit,
            },
            Some(ty),
        )
        .unwrap()
    }

    /// Emits a function-address constant of pointer-to-function type.
    pub fn func_addr(&mut self, block: BlockId, func: FuncId, ty: TypeId) -> ValueId {
        self.emit(
            block,
            InstKind::Const {
                value: ConstValue::FuncAddr(func),
            },
            Some(ty),
        )
        .unwrap()
    }

    pub fn binop(&mut self, block: BlockId, op: BinOp, lhs: ValueId, rhs: ValueId, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::BinOp { op, lhs, rhs }, Some(ty)).unwrap()
    }

    pub fn unop(&mut self, block: BlockId, op: UnOp, value: ValueId, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::UnOp { op, value }, Some(ty)).unwrap()
    }

    pub fn cmp(&mut self, block: BlockId, op: CmpOp, lhs: ValueId, rhs: ValueId, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::Cmp { op, lhs, rhs }, Some(ty)).unwrap()
    }

    pub fn cast(&mut self, block: BlockId, kind: CastKind, value: ValueId, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::Cast { kind, value, ty }, Some(ty)).unwrap()
    }

    pub fn phi(&mut self, block: BlockId, incomings: Vec<(BlockId, ValueId)>, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::Phi { incomings }, Some(ty)).unwrap()
    }

    /// Appends an incoming edge to an existing phi, for loop-carried values
    /// whose definition follows the phi.
    pub fn add_phi_incoming(&mut self, block: BlockId, phi: ValueId, incoming: BlockId, value: ValueId) {
        for inst in &mut self.func.block_mut(block).insts {
            if inst.result.map_or(false, |result| result.id == phi) {
                if let InstKind::Phi { incomings } = &mut inst.kind {
                    incomings.push((incoming, value));
                    return;
                }
            }
        }
        panic!("no phi {:?} in block {:?}", phi, block);
    }

    /// Emits a stack allocation; `ptr_ty` must be pointer-to-`ty`.
    pub fn stack_alloc(&mut self, block: BlockId, ty: TypeId, ptr_ty: TypeId) -> ValueId {
        self.emit(block, InstKind::StackAlloc { ty }, Some(ptr_ty)).unwrap()
    }

    pub fn field_addr(&mut self, block: BlockId, base: ValueId, index: usize, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::FieldAddr { base, index }, Some(ty)).unwrap()
    }

    pub fn load(&mut self, block: BlockId, ptr: ValueId, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::Load { ptr }, Some(ty)).unwrap()
    }

    pub fn store(&mut self, block: BlockId, ptr: ValueId, value: ValueId) {
        self.emit(block, InstKind::Store { ptr, value }, None);
    }

    pub fn call(&mut self, block: BlockId, callee: Callee, args: Vec<ValueId>, ty: TypeId) -> ValueId {
        self.emit(block, InstKind::Call { callee, args }, Some(ty)).unwrap()
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.func.block_mut(block).term = term;
    }

    /// Finalizes the builder and returns the constructed function.
    pub fn finish(self) -> Function {
        self.func
    }

    fn emit(&mut self, block: BlockId, kind: InstKind, ty: Option<TypeId>) -> Option<ValueId> {
        let result = ty.map(|ty| ValueDef {
            id: self.func.alloc_value(),
            ty,
        });
        self.func.block_mut(block).insts.push(Instruction { result, kind });
        result.map(|def| def.id)
    }
}
