//! SSA IR data model.
//!
//! Defines the core SSA entities (modules, functions, blocks, values,
//! instructions) plus the operand traversal helpers used by the analyses
//! and the lazification rewrites.

use indexmap::IndexMap;

use crate::ir::types::{TypeCache, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl FuncId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDef {
    pub id: ValueId,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub value: ValueDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeId,
    pub blocks: Vec<Block>,
    /// Sparse value names, used for generated symbols and formatting.
    pub names: IndexMap<ValueId, String>,
    /// No memory reads or writes, cannot throw.
    pub pure: bool,
    pub will_return: bool,
    pub(crate) next_value: u32,
    pub(crate) next_block: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, ret: TypeId) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret,
            blocks: Vec::new(),
            names: IndexMap::new(),
            pure: false,
            will_return: true,
            next_value: 0,
            next_block: 0,
        }
    }

    /// Allocates a fresh SSA value ID.
    pub fn alloc_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Appends a new empty block (unterminated) and returns its ID.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.push(Block {
            id,
            insts: Vec::new(),
            term: Terminator::Unterminated,
        });
        id
    }

    /// Appends a parameter and returns its SSA value.
    pub fn add_param(&mut self, ty: TypeId) -> ValueId {
        let id = self.alloc_value();
        self.params.push(Param {
            value: ValueDef { id, ty },
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.blocks
            .iter()
            .find(|block| block.id == id)
            .unwrap_or_else(|| panic!("missing block {:?} in {}", id, self.name))
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        let name = self.name.clone();
        self.blocks
            .iter_mut()
            .find(|block| block.id == id)
            .unwrap_or_else(|| panic!("missing block {:?} in {}", id, name))
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        self.blocks.iter().any(|block| block.id == id)
    }

    pub fn set_name(&mut self, value: ValueId, name: impl Into<String>) {
        self.names.insert(value, name.into());
    }

    /// Value name if set, otherwise `v<id>`.
    pub fn name_or_id(&self, value: ValueId) -> String {
        match self.names.get(&value) {
            Some(name) => name.clone(),
            None => format!("v{}", value.0),
        }
    }

    /// Maps every value to its defining site.
    pub fn def_sites(&self) -> IndexMap<ValueId, DefSite> {
        let mut sites = IndexMap::new();
        for (idx, param) in self.params.iter().enumerate() {
            sites.insert(param.value.id, DefSite::Param(idx));
        }
        for block in &self.blocks {
            for (index, inst) in block.insts.iter().enumerate() {
                if let Some(result) = &inst.result {
                    sites.insert(result.id, DefSite::Inst {
                        block: block.id,
                        index,
                    });
                }
            }
        }
        sites
    }

    /// Maps every value to its type.
    pub fn value_types(&self) -> IndexMap<ValueId, TypeId> {
        let mut types = IndexMap::new();
        for param in &self.params {
            types.insert(param.value.id, param.value.ty);
        }
        for block in &self.blocks {
            for inst in &block.insts {
                if let Some(result) = &inst.result {
                    types.insert(result.id, result.ty);
                }
            }
        }
        types
    }

    /// All sites where `value` appears as an operand.
    pub fn uses_of(&self, value: ValueId) -> Vec<UseSite> {
        let mut uses = Vec::new();
        for block in &self.blocks {
            for (index, inst) in block.insts.iter().enumerate() {
                let mut used = false;
                for_each_use(&inst.kind, |v| used |= v == value);
                if used {
                    uses.push(UseSite::Inst {
                        block: block.id,
                        index,
                    });
                }
            }
            let mut used = false;
            for_each_term_use(&block.term, |v| used |= v == value);
            if used {
                uses.push(UseSite::Term { block: block.id });
            }
        }
        uses
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    Param(usize),
    Inst { block: BlockId, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseSite {
    Inst { block: BlockId, index: usize },
    Term { block: BlockId },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Module {
    pub funcs: Vec<Function>,
    pub types: TypeCache,
}

impl Module {
    pub fn new() -> Self {
        Self {
            funcs: Vec::new(),
            types: TypeCache::new(),
        }
    }

    pub fn add_func(&mut self, func: Function) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(func);
        id
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.index()]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Unit,
    Bool(bool),
    Int { value: i128, signed: bool, bits: u8 },
    FuncAddr(FuncId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    PtrToInt,
    IntToPtr,
    PtrToPtr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Direct(FuncId),
    Value(ValueId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub result: Option<ValueDef>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Const {
        value: ConstValue,
    },
    BinOp {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    UnOp {
        op: UnOp,
        value: ValueId,
    },
    Cmp {
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cast {
        kind: CastKind,
        value: ValueId,
        ty: TypeId,
    },
    /// Merges values from labeled predecessor blocks.
    Phi {
        incomings: Vec<(BlockId, ValueId)>,
    },
    /// Stack allocation; the result is a pointer to `ty`.
    StackAlloc {
        ty: TypeId,
    },
    /// Struct-field address; the result points at field `index` of `*base`.
    FieldAddr {
        base: ValueId,
        index: usize,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    Call {
        callee: Callee,
        args: Vec<ValueId>,
    },
}

impl InstKind {
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub value: ConstValue,
    pub target: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Switch {
        value: ValueId,
        cases: Vec<SwitchCase>,
        default: BlockId,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
    /// Placeholder while a function is under construction.
    Unterminated,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                then_bb, else_bb, ..
            } => vec![*then_bb, *else_bb],
            Terminator::Switch { cases, default, .. } => {
                let mut succs: Vec<BlockId> = cases.iter().map(|case| case.target).collect();
                succs.push(*default);
                succs
            }
            Terminator::Return { .. } | Terminator::Unreachable | Terminator::Unterminated => {
                Vec::new()
            }
        }
    }

    pub fn for_each_successor_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            Terminator::Br { target } => f(target),
            Terminator::CondBr {
                then_bb, else_bb, ..
            } => {
                f(then_bb);
                f(else_bb);
            }
            Terminator::Switch { cases, default, .. } => {
                for case in cases {
                    f(&mut case.target);
                }
                f(default);
            }
            Terminator::Return { .. } | Terminator::Unreachable | Terminator::Unterminated => {}
        }
    }
}

/// Visits each SSA value used by an instruction.
pub fn for_each_use(kind: &InstKind, mut f: impl FnMut(ValueId)) {
    match kind {
        InstKind::Const { .. } | InstKind::StackAlloc { .. } => {}
        InstKind::BinOp { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
            f(*lhs);
            f(*rhs);
        }
        InstKind::UnOp { value, .. }
        | InstKind::Cast { value, .. }
        | InstKind::FieldAddr { base: value, .. }
        | InstKind::Load { ptr: value } => f(*value),
        InstKind::Phi { incomings } => {
            for (_, value) in incomings {
                f(*value);
            }
        }
        InstKind::Store { ptr, value } => {
            f(*ptr);
            f(*value);
        }
        InstKind::Call { callee, args } => {
            if let Callee::Value(value) = callee {
                f(*value);
            }
            for arg in args {
                f(*arg);
            }
        }
    }
}

/// Visits each SSA value used by an instruction, mutably.
pub fn for_each_use_mut(kind: &mut InstKind, mut f: impl FnMut(&mut ValueId)) {
    match kind {
        InstKind::Const { .. } | InstKind::StackAlloc { .. } => {}
        InstKind::BinOp { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        InstKind::UnOp { value, .. }
        | InstKind::Cast { value, .. }
        | InstKind::FieldAddr { base: value, .. }
        | InstKind::Load { ptr: value } => f(value),
        InstKind::Phi { incomings } => {
            for (_, value) in incomings {
                f(value);
            }
        }
        InstKind::Store { ptr, value } => {
            f(ptr);
            f(value);
        }
        InstKind::Call { callee, args } => {
            if let Callee::Value(value) = callee {
                f(value);
            }
            for arg in args {
                f(arg);
            }
        }
    }
}

/// Visits each SSA value used by a terminator.
pub fn for_each_term_use(term: &Terminator, mut f: impl FnMut(ValueId)) {
    match term {
        Terminator::CondBr { cond, .. } => f(*cond),
        Terminator::Switch { value, .. } => f(*value),
        Terminator::Return { value } => {
            if let Some(value) = value {
                f(*value);
            }
        }
        Terminator::Br { .. } | Terminator::Unreachable | Terminator::Unterminated => {}
    }
}

/// Visits each SSA value used by a terminator, mutably.
pub fn for_each_term_use_mut(term: &mut Terminator, mut f: impl FnMut(&mut ValueId)) {
    match term {
        Terminator::CondBr { cond, .. } => f(cond),
        Terminator::Switch { value, .. } => f(value),
        Terminator::Return { value } => {
            if let Some(value) = value {
                f(value);
            }
        }
        Terminator::Br { .. } | Terminator::Unreachable | Terminator::Unterminated => {}
    }
}

/// Replaces all uses of `from` with `to` in an instruction.
pub fn replace_value_in_inst(kind: &mut InstKind, from: ValueId, to: ValueId) {
    for_each_use_mut(kind, |value| {
        if *value == from {
            *value = to;
        }
    });
}

/// Replaces all uses of `from` with `to` in a terminator.
pub fn replace_value_in_term(term: &mut Terminator, from: ValueId, to: ValueId) {
    for_each_term_use_mut(term, |value| {
        if *value == from {
            *value = to;
        }
    });
}

/// Replaces `from` with `to` throughout a function.
pub fn replace_value_in_func(func: &mut Function, from: ValueId, to: ValueId) {
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            replace_value_in_inst(&mut inst.kind, from, to);
        }
        replace_value_in_term(&mut block.term, from, to);
    }
}

/// Replaces incoming-block labels of a PHI.
pub fn replace_phi_incoming_block(kind: &mut InstKind, from: BlockId, to: BlockId) {
    if let InstKind::Phi { incomings } = kind {
        for (block, _) in incomings {
            if *block == from {
                *block = to;
            }
        }
    }
}
