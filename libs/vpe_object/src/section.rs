use bitflags::bitflags;

use crate::err::VpeObjectError;
use crate::raw::section_header::SectionHeader;
use crate::string_table::{
    decode_base64_offset,
    decode_decimal_offset,
    StringTable,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectionCharacteristics: u32 {
        const TYPE_NO_PAD = 0x0000_0008;
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_OTHER = 0x0000_0100;
        const LNK_INFO = 0x0000_0200;
        const LNK_REMOVE = 0x0000_0800;
        const LNK_COMDAT = 0x0000_1000;
        const GPREL = 0x0000_8000;
        const MEM_PURGEABLE = 0x0002_0000;
        const MEM_16BIT = 0x0002_0000;
        const MEM_LOCKED = 0x0004_0000;
        const MEM_PRELOAD = 0x0008_0000;
        const ALIGN_MASK = 0x00f0_0000;
        const LNK_NRELOC_OVFL = 0x0100_0000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

impl SectionCharacteristics {
    /// Alignment in bytes. The 4-bit field holds log2(align)+1; 0 means 16.
    pub fn alignment(&self) -> u32 {
        if self.contains(SectionCharacteristics::TYPE_NO_PAD) {
            return 1;
        }
        let shift = (self.bits() & SectionCharacteristics::ALIGN_MASK.bits()) >> 20;
        if shift > 0 {
            1 << (shift - 1)
        } else {
            16
        }
    }

    /// Replaces the alignment field. `align` is rounded up to a power of two
    /// and capped at 8192.
    pub fn with_alignment(self, align: u32) -> Self {
        let align = align.clamp(1, 8192).next_power_of_two();
        let field = (align.trailing_zeros() + 1) << 20;
        let cleared = self.bits() & !SectionCharacteristics::ALIGN_MASK.bits();
        SectionCharacteristics::from_bits_retain(cleared | field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    /// 1-based, as referenced from symbols.
    pub index: u32,
    /// The inline 8-byte field as stored; see `VpeObject::section_name`.
    pub raw_name: &'a [u8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: SectionCharacteristics,
}

impl<'a> Section<'a> {
    pub(crate) fn new(index: u32, raw_name: &'a [u8], sh: &SectionHeader) -> Self {
        Self {
            index,
            raw_name,
            virtual_size: sh.virtual_size,
            virtual_address: sh.virtual_address,
            size_of_raw_data: sh.size_of_raw_data,
            pointer_to_raw_data: sh.pointer_to_raw_data,
            pointer_to_relocations: sh.pointer_to_relocations,
            pointer_to_linenumbers: sh.pointer_to_linenumbers,
            number_of_relocations: sh.number_of_relocations,
            number_of_linenumbers: sh.number_of_linenumbers,
            characteristics: SectionCharacteristics::from_bits_retain(sh.characteristics),
        }
    }

    pub fn alignment(&self) -> u32 {
        self.characteristics.alignment()
    }

    /// No file content, e.g. .bss.
    pub fn is_virtual(&self) -> bool {
        self.pointer_to_raw_data == 0
    }

    pub fn is_text(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::CNT_CODE)
    }

    pub fn is_data(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::CNT_INITIALIZED_DATA)
    }

    pub fn is_bss(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::CNT_UNINITIALIZED_DATA)
    }

    /// The real relocation count is stored in the first relocation entry.
    pub fn has_extended_relocations(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::LNK_NRELOC_OVFL)
            && self.number_of_relocations == u16::MAX
    }
}

/// Inline name bytes: all 8 when the last byte is set, otherwise up to the NUL.
pub(crate) fn inline_name(raw: &[u8]) -> &[u8] {
    match raw.last() {
        Some(0) => {
            let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
            &raw[..len]
        }
        _ => raw,
    }
}

pub(crate) fn resolve_section_name<'a>(raw: &'a [u8], strtab: &StringTable<'a>) ->
    Result<&'a [u8], VpeObjectError>
{
    let name = inline_name(raw);
    if let Some(digits) = name.strip_prefix(b"//") {
        strtab.get(decode_base64_offset(digits)?)
    } else if let Some(digits) = name.strip_prefix(b"/") {
        strtab.get(decode_decimal_offset(digits)?)
    } else {
        Ok(name)
    }
}
