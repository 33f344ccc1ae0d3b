use vpe_object::header::Machine;
use vpe_object::relocation::{
    IMAGE_REL_AMD64_ADDR32,
    IMAGE_REL_AMD64_ADDR32NB,
    IMAGE_REL_AMD64_ADDR64,
    IMAGE_REL_AMD64_REL32,
    IMAGE_REL_AMD64_SECREL,
    IMAGE_REL_AMD64_SECTION,
    IMAGE_REL_I386_DIR32,
    IMAGE_REL_I386_DIR32NB,
    IMAGE_REL_I386_REL32,
    IMAGE_REL_I386_SECREL,
    IMAGE_REL_I386_SECTION,
};

use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// Absolute 32-bit address.
    Data4,
    /// Absolute 64-bit address.
    Data8,
    /// 32-bit displacement from the end of the field.
    PcRel4,
    /// 32-bit address relative to the image base.
    ImgRel32,
    /// 32-bit offset from the start of the target's section.
    SecRel4,
    /// 16-bit index of the target's section.
    SectionIndex,
    /// 32-bit symbol table index of the target. Resolved in place and
    /// never becomes a relocation.
    SymbolIndex,
}

impl FixupKind {
    pub fn size(&self) -> usize {
        match self {
            FixupKind::SectionIndex => 2,
            FixupKind::Data8 => 8,
            _ => 4,
        }
    }
}

/// A reference from section content to a symbol. `offset` is relative to
/// the owning section's data; `addend` is written into the field when the
/// object is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub offset: u64,
    pub symbol: SymbolId,
    pub addend: i64,
    pub kind: FixupKind,
}

/// Relocation type for a fixup kind, or `None` when the machine has no
/// matching relocation.
pub fn relocation_type(machine: Machine, kind: FixupKind) -> Option<u16> {
    match machine {
        Machine::Amd64 => match kind {
            FixupKind::Data4 => Some(IMAGE_REL_AMD64_ADDR32),
            FixupKind::Data8 => Some(IMAGE_REL_AMD64_ADDR64),
            FixupKind::PcRel4 => Some(IMAGE_REL_AMD64_REL32),
            FixupKind::ImgRel32 => Some(IMAGE_REL_AMD64_ADDR32NB),
            FixupKind::SecRel4 => Some(IMAGE_REL_AMD64_SECREL),
            FixupKind::SectionIndex => Some(IMAGE_REL_AMD64_SECTION),
            FixupKind::SymbolIndex => None,
        },
        Machine::I386 => match kind {
            FixupKind::Data4 => Some(IMAGE_REL_I386_DIR32),
            FixupKind::PcRel4 => Some(IMAGE_REL_I386_REL32),
            FixupKind::ImgRel32 => Some(IMAGE_REL_I386_DIR32NB),
            FixupKind::SecRel4 => Some(IMAGE_REL_I386_SECREL),
            FixupKind::SectionIndex => Some(IMAGE_REL_I386_SECTION),
            FixupKind::Data8 | FixupKind::SymbolIndex => None,
        },
        _ => None,
    }
}
