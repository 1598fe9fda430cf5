//! Type table for the IR.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Unit,
    Bool,
    Int {
        signed: bool,
        bits: u8,
    },
    Ptr {
        elem: TypeId,
    },
    Struct {
        fields: Vec<TypeId>,
    },
    Fn {
        params: Vec<TypeId>,
        ret: TypeId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub name: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypeCache {
    types: Vec<TypeInfo>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Adds an anonymous type, reusing an existing structurally equal one.
    pub fn add(&mut self, kind: TypeKind) -> TypeId {
        for (idx, info) in self.types.iter().enumerate() {
            if info.name.is_none() && info.kind == kind {
                return TypeId(idx as u32);
            }
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeInfo { kind, name: None });
        id
    }

    /// Adds a named type definition. Named types are never deduplicated.
    pub fn add_named(&mut self, kind: TypeKind, name: impl Into<String>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeInfo {
            kind,
            name: Some(name.into()),
        });
        id
    }

    /// Sets the field list of a struct created with an empty body.
    ///
    /// Struct types may be self-referential through pointers, so they are
    /// created first and filled in once the referencing types exist.
    pub fn set_struct_body(&mut self, id: TypeId, fields: Vec<TypeId>) {
        match &mut self.types[id.index()].kind {
            TypeKind::Struct { fields: body } => *body = fields,
            other => panic!("set_struct_body on non-struct type {:?}", other),
        }
    }

    /// Number of interned types; pairs with [`TypeCache::truncate`] to roll
    /// back types created by a failed transformation attempt.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Discards all types added after the cache had `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.types.truncate(len);
    }

    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.index()]
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.get(id).kind
    }

    pub fn name(&self, id: TypeId) -> Option<&str> {
        self.get(id).name.as_deref()
    }

    pub fn unit(&mut self) -> TypeId {
        self.add(TypeKind::Unit)
    }

    pub fn bool(&mut self) -> TypeId {
        self.add(TypeKind::Bool)
    }

    pub fn int(&mut self, signed: bool, bits: u8) -> TypeId {
        self.add(TypeKind::Int { signed, bits })
    }

    pub fn ptr_to(&mut self, elem: TypeId) -> TypeId {
        self.add(TypeKind::Ptr { elem })
    }
}
