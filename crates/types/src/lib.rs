use thiserror::Error;

// Target assumptions (IA-32/Linux-like): int and long are both 4 bytes,
// pointers are one native word.
pub const SIZEOF_CHAR: usize = 1;
pub const SIZEOF_SHORT: usize = 2;
pub const SIZEOF_LONG: usize = 4;
pub const SIZEOF_FLOAT: usize = 4;
pub const SIZEOF_DOUBLE: usize = 8;
pub const SIZEOF_POINTER: usize = 4;

pub const ALIGN_CHAR: usize = 1;
pub const ALIGN_SHORT: usize = 2;
pub const ALIGN_LONG: usize = 4;
pub const ALIGN_FLOAT: usize = 4;
pub const ALIGN_DOUBLE: usize = 4;
pub const ALIGN_POINTER: usize = 4;

/// The native stack word. Every stack slot is a multiple of this.
pub const WORD: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("incomplete type: {0}")]
    IncompleteType(String),
    #[error("redefinition of {0}")]
    Redefinition(String),
    #[error("no member named '{1}' in {0}")]
    UnknownMember(String, String),
}

pub fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Handle into the record arena. Two record types are the same type iff
/// their handles are equal (nominal typing); structure is never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Union,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: QualType,
    pub offset: usize,
}

#[derive(Debug, Clone)]
struct RecordDef {
    kind: RecordKind,
    tag: String,
    // None until the member list is supplied; completion happens once.
    members: Option<Vec<Member>>,
    size: usize,
}

/// Arena of struct/union layouts. Declaring a tag creates an incomplete
/// entry; defining it fills in the member layout exactly once.
#[derive(Debug, Default)]
pub struct RecordTable {
    defs: Vec<RecordDef>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_struct(&mut self, tag: &str) -> RecordId {
        self.declare(RecordKind::Struct, tag)
    }

    pub fn declare_union(&mut self, tag: &str) -> RecordId {
        self.declare(RecordKind::Union, tag)
    }

    fn declare(&mut self, kind: RecordKind, tag: &str) -> RecordId {
        let tag = match kind {
            RecordKind::Struct => format!("struct {tag}"),
            RecordKind::Union => format!("union {tag}"),
        };
        self.defs.push(RecordDef { kind, tag, members: None, size: 0 });
        RecordId(self.defs.len() as u32 - 1)
    }

    pub fn kind(&self, id: RecordId) -> RecordKind {
        self.defs[id.0 as usize].kind
    }

    pub fn tag(&self, id: RecordId) -> &str {
        &self.defs[id.0 as usize].tag
    }

    pub fn is_complete(&self, id: RecordId) -> bool {
        self.defs[id.0 as usize].members.is_some()
    }

    /// Assign struct member offsets: each member's offset is the running
    /// total rounded up to its alignment; the struct size is the final
    /// offset rounded up to the largest member alignment.
    pub fn define_struct(
        &mut self,
        id: RecordId,
        members: &[(String, QualType)],
    ) -> Result<(), TypeError> {
        if self.is_complete(id) {
            return Err(TypeError::Redefinition(self.tag(id).to_string()));
        }
        let mut offset = 0;
        let mut record_alignment = 1;
        let mut laid_out = Vec::with_capacity(members.len());
        for (name, ty) in members {
            let alignment = ty.alignment(self)?;
            record_alignment = record_alignment.max(alignment);
            offset = round_up(offset, alignment);
            laid_out.push(Member { name: name.clone(), ty: ty.clone(), offset });
            offset += ty.size_of(self)?;
        }
        let def = &mut self.defs[id.0 as usize];
        def.size = round_up(offset, record_alignment);
        def.members = Some(laid_out);
        Ok(())
    }

    /// Union members all live at offset 0. The size is the largest member
    /// *alignment*, not the largest member size; initializer layout
    /// downstream depends on these numbers staying put. See DESIGN.md.
    pub fn define_union(
        &mut self,
        id: RecordId,
        members: &[(String, QualType)],
    ) -> Result<(), TypeError> {
        if self.is_complete(id) {
            return Err(TypeError::Redefinition(self.tag(id).to_string()));
        }
        let mut record_alignment = 1;
        let mut laid_out = Vec::with_capacity(members.len());
        for (name, ty) in members {
            record_alignment = record_alignment.max(ty.alignment(self)?);
            // force completeness of every member type
            let _ = ty.size_of(self)?;
            laid_out.push(Member { name: name.clone(), ty: ty.clone(), offset: 0 });
        }
        let def = &mut self.defs[id.0 as usize];
        def.size = round_up(record_alignment, record_alignment);
        def.members = Some(laid_out);
        Ok(())
    }

    pub fn members(&self, id: RecordId) -> Result<&[Member], TypeError> {
        match &self.defs[id.0 as usize].members {
            Some(members) => Ok(members),
            None => Err(TypeError::IncompleteType(self.tag(id).to_string())),
        }
    }

    pub fn member(&self, id: RecordId, name: &str) -> Result<&Member, TypeError> {
        self.members(id)?
            .iter()
            .find(|member| member.name == name)
            .ok_or_else(|| TypeError::UnknownMember(self.tag(id).to_string(), name.to_string()))
    }

    pub fn size_of(&self, id: RecordId) -> Result<usize, TypeError> {
        if !self.is_complete(id) {
            return Err(TypeError::IncompleteType(self.tag(id).to_string()));
        }
        Ok(self.defs[id.0 as usize].size)
    }

    pub fn alignment(&self, id: RecordId) -> Result<usize, TypeError> {
        let mut alignment = 1;
        for member in self.members(id)? {
            alignment = alignment.max(member.ty.alignment(self)?);
        }
        Ok(alignment)
    }
}

/// A function signature. Parameter offsets are frame offsets relative to
/// %ebp, assigned when the signature is created: arguments are packed at
/// word alignment and shifted past the saved frame pointer and return
/// address (plus the hidden destination slot for record-returning
/// functions).
#[derive(Debug, Clone)]
pub struct FuncType {
    pub ret: QualType,
    pub params: Vec<Param>,
    pub has_varargs: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<String>,
    pub ty: QualType,
    pub offset: usize,
}

impl FuncType {
    pub fn create(
        ret: QualType,
        params: Vec<(Option<String>, QualType)>,
        has_varargs: bool,
        records: &RecordTable,
    ) -> Result<Self, TypeError> {
        let param_types: Vec<QualType> = params.iter().map(|(_, ty)| ty.clone()).collect();
        let (_, offsets) = pack_arguments(&param_types, records)?;
        let header = if matches!(ret.kind, TypeKind::Record(_)) {
            3 * SIZEOF_POINTER
        } else {
            2 * SIZEOF_POINTER
        };
        let params = params
            .into_iter()
            .zip(offsets)
            .map(|((name, ty), offset)| Param { name, ty, offset: offset + header })
            .collect();
        Ok(FuncType { ret, params, has_varargs })
    }

    /// No parameters, returns void. Used as the environment's placeholder
    /// before any function is entered.
    pub fn empty() -> Self {
        FuncType { ret: QualType::new(TypeKind::Void), params: Vec::new(), has_varargs: false }
    }

    /// Signatures are equal when the variadic flag, the return type, and
    /// the parameter types match pairwise. Parameter names never matter.
    pub fn same_signature(&self, other: &FuncType) -> bool {
        self.has_varargs == other.has_varargs
            && self.ret.same_type(&other.ret)
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty.same_type(&b.ty))
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Void,
    Char,
    UChar,
    Short,
    UShort,
    Long,
    ULong,
    Float,
    Double,
    Pointer(Box<QualType>),
    Array(Box<QualType>, usize),
    IncompleteArray(Box<QualType>),
    Record(RecordId),
    Function(Box<FuncType>),
}

/// A C type together with its `const`/`volatile` qualifiers. Qualifiers
/// never take part in type equality.
#[derive(Debug, Clone)]
pub struct QualType {
    pub kind: TypeKind,
    pub is_const: bool,
    pub is_volatile: bool,
}

impl QualType {
    pub fn new(kind: TypeKind) -> Self {
        // Function designators are always const.
        let is_const = matches!(kind, TypeKind::Function(_));
        QualType { kind, is_const, is_volatile: false }
    }

    pub fn qualified(kind: TypeKind, is_const: bool, is_volatile: bool) -> Self {
        match kind {
            TypeKind::Function(_) => Self::new(kind),
            _ => QualType { kind, is_const, is_volatile },
        }
    }

    pub fn pointer_to(elem: QualType) -> Self {
        Self::new(TypeKind::Pointer(Box::new(elem)))
    }

    pub fn array_of(elem: QualType, num_elems: usize) -> Self {
        Self::new(TypeKind::Array(Box::new(elem), num_elems))
    }

    pub fn with_qualifiers(&self, is_const: bool, is_volatile: bool) -> Self {
        Self::qualified(self.kind.clone(), is_const, is_volatile)
    }

    pub fn size_of(&self, records: &RecordTable) -> Result<usize, TypeError> {
        match &self.kind {
            TypeKind::Char | TypeKind::UChar => Ok(SIZEOF_CHAR),
            TypeKind::Short | TypeKind::UShort => Ok(SIZEOF_SHORT),
            TypeKind::Long | TypeKind::ULong => Ok(SIZEOF_LONG),
            TypeKind::Float => Ok(SIZEOF_FLOAT),
            TypeKind::Double => Ok(SIZEOF_DOUBLE),
            // void objects cannot exist; a storage word keeps pointer
            // arithmetic on void* working
            TypeKind::Void => Ok(SIZEOF_POINTER),
            TypeKind::Pointer(_) | TypeKind::Function(_) => Ok(SIZEOF_POINTER),
            TypeKind::Array(elem, n) => Ok(elem.size_of(records)? * n),
            TypeKind::IncompleteArray(_) => {
                Err(TypeError::IncompleteType("array of unknown length".to_string()))
            }
            TypeKind::Record(id) => records.size_of(*id),
        }
    }

    pub fn alignment(&self, records: &RecordTable) -> Result<usize, TypeError> {
        match &self.kind {
            TypeKind::Char | TypeKind::UChar => Ok(ALIGN_CHAR),
            TypeKind::Short | TypeKind::UShort => Ok(ALIGN_SHORT),
            TypeKind::Long | TypeKind::ULong => Ok(ALIGN_LONG),
            TypeKind::Float => Ok(ALIGN_FLOAT),
            TypeKind::Double => Ok(ALIGN_DOUBLE),
            TypeKind::Void => Ok(ALIGN_POINTER),
            TypeKind::Pointer(_) | TypeKind::Function(_) => Ok(ALIGN_POINTER),
            TypeKind::Array(elem, _) | TypeKind::IncompleteArray(elem) => elem.alignment(records),
            TypeKind::Record(id) => records.alignment(*id),
        }
    }

    pub fn is_complete(&self, records: &RecordTable) -> bool {
        match &self.kind {
            TypeKind::IncompleteArray(_) => false,
            TypeKind::Record(id) => records.is_complete(*id),
            _ => true,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Char
                | TypeKind::UChar
                | TypeKind::Short
                | TypeKind::UShort
                | TypeKind::Long
                | TypeKind::ULong
        )
    }

    pub fn is_signed_integral(&self) -> bool {
        matches!(self.kind, TypeKind::Char | TypeKind::Short | TypeKind::Long)
    }

    pub fn is_unsigned_integral(&self) -> bool {
        matches!(self.kind, TypeKind::UChar | TypeKind::UShort | TypeKind::ULong)
    }

    pub fn is_arith(&self) -> bool {
        self.is_integral() || matches!(self.kind, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arith() || matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, TypeKind::Record(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, TypeKind::Function(_))
    }

    /// Structural equality, qualifier-blind. Records compare by handle;
    /// incomplete arrays never equal anything (their length is unknown).
    pub fn same_type(&self, other: &QualType) -> bool {
        match (&self.kind, &other.kind) {
            (TypeKind::Void, TypeKind::Void)
            | (TypeKind::Char, TypeKind::Char)
            | (TypeKind::UChar, TypeKind::UChar)
            | (TypeKind::Short, TypeKind::Short)
            | (TypeKind::UShort, TypeKind::UShort)
            | (TypeKind::Long, TypeKind::Long)
            | (TypeKind::ULong, TypeKind::ULong)
            | (TypeKind::Float, TypeKind::Float)
            | (TypeKind::Double, TypeKind::Double) => true,
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => a.same_type(b),
            (TypeKind::Array(a, _), TypeKind::Array(b, _)) => a.same_type(b),
            (TypeKind::Record(a), TypeKind::Record(b)) => a == b,
            (TypeKind::Function(a), TypeKind::Function(b)) => a.same_signature(b),
            _ => false,
        }
    }

    /// Array-to-pointer decay; every other type is returned unchanged.
    pub fn decay(&self) -> QualType {
        match &self.kind {
            TypeKind::Array(elem, _) | TypeKind::IncompleteArray(elem) => {
                QualType::qualified(
                    TypeKind::Pointer(elem.clone()),
                    self.is_const,
                    self.is_volatile,
                )
            }
            _ => self.clone(),
        }
    }
}

/// Compute the layout of an argument pack: each argument is placed at the
/// running offset rounded up to the largest alignment seen so far (never
/// below the word size), and the total is rounded up the same way.
pub fn pack_arguments(
    types: &[QualType],
    records: &RecordTable,
) -> Result<(usize, Vec<usize>), TypeError> {
    let mut alignment = SIZEOF_LONG;
    let mut offsets = Vec::with_capacity(types.len());
    let mut offset = 0;
    for ty in types {
        alignment = alignment.max(ty.alignment(records)?);
        offset = round_up(offset, alignment);
        offsets.push(offset);
        offset += ty.size_of(records)?;
    }
    Ok((round_up(offset, alignment), offsets))
}
