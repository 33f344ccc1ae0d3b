use log::debug;
use stpack::Unpacker;

use crate::err::VpeObjectError;
use crate::header::Machine;
use crate::raw::buffer::{get_array_at, get_at, Records};
use crate::raw::section_header::RelocationRecord;
use crate::section::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub virtual_address: u32,
    pub symbol_table_index: u32,
    pub typ: u16,
}

/// Relocation entries of one section.
pub struct Relocations<'a> {
    records: Records<'a, RelocationRecord>,
    next: usize,
}

impl<'a> Relocations<'a> {
    pub(crate) fn parse(file: &'a [u8], section: &Section) -> Result<Self, VpeObjectError> {
        let offset = u64::from(section.pointer_to_relocations);
        if section.number_of_relocations == 0 {
            return Ok(Self { records: Records::empty(), next: 0 });
        }

        let (count, first) = if section.has_extended_relocations() {
            // the first entry carries the real count and is not a relocation
            let head = get_at::<RelocationRecord>(file, offset)?;
            debug!("section {} has {} extended relocations", section.index, head.virtual_address);
            (u64::from(head.virtual_address.saturating_sub(1)),
             offset + RelocationRecord::SIZE as u64)
        } else {
            (u64::from(section.number_of_relocations), offset)
        };

        Ok(Self {
            records: get_array_at(file, first, count)?,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() == 0
    }
}

impl<'a> Iterator for Relocations<'a> {
    type Item = Relocation;

    fn next(&mut self) -> Option<Relocation> {
        let r = self.records.get(self.next)?;
        self.next += 1;
        Some(Relocation {
            virtual_address: r.virtual_address,
            symbol_table_index: r.symbol_table_index,
            typ: r.typ,
        })
    }
}

pub fn relocation_type_name(machine: Machine, typ: u16) -> &'static str {
    match machine {
        Machine::Amd64 => match typ {
            0x0000 => "IMAGE_REL_AMD64_ABSOLUTE",
            0x0001 => "IMAGE_REL_AMD64_ADDR64",
            0x0002 => "IMAGE_REL_AMD64_ADDR32",
            0x0003 => "IMAGE_REL_AMD64_ADDR32NB",
            0x0004 => "IMAGE_REL_AMD64_REL32",
            0x0005 => "IMAGE_REL_AMD64_REL32_1",
            0x0006 => "IMAGE_REL_AMD64_REL32_2",
            0x0007 => "IMAGE_REL_AMD64_REL32_3",
            0x0008 => "IMAGE_REL_AMD64_REL32_4",
            0x0009 => "IMAGE_REL_AMD64_REL32_5",
            0x000a => "IMAGE_REL_AMD64_SECTION",
            0x000b => "IMAGE_REL_AMD64_SECREL",
            0x000c => "IMAGE_REL_AMD64_SECREL7",
            0x000d => "IMAGE_REL_AMD64_TOKEN",
            0x000e => "IMAGE_REL_AMD64_SREL32",
            0x000f => "IMAGE_REL_AMD64_PAIR",
            0x0010 => "IMAGE_REL_AMD64_SSPAN32",
            _ => "Unknown",
        },
        Machine::ArmNt => match typ {
            0x0000 => "IMAGE_REL_ARM_ABSOLUTE",
            0x0001 => "IMAGE_REL_ARM_ADDR32",
            0x0002 => "IMAGE_REL_ARM_ADDR32NB",
            0x0003 => "IMAGE_REL_ARM_BRANCH24",
            0x0004 => "IMAGE_REL_ARM_BRANCH11",
            0x0005 => "IMAGE_REL_ARM_TOKEN",
            0x0008 => "IMAGE_REL_ARM_BLX24",
            0x0009 => "IMAGE_REL_ARM_BLX11",
            0x000a => "IMAGE_REL_ARM_REL32",
            0x000e => "IMAGE_REL_ARM_SECTION",
            0x000f => "IMAGE_REL_ARM_SECREL",
            0x0010 => "IMAGE_REL_ARM_MOV32A",
            0x0011 => "IMAGE_REL_ARM_MOV32T",
            0x0012 => "IMAGE_REL_ARM_BRANCH20T",
            0x0014 => "IMAGE_REL_ARM_BRANCH24T",
            0x0015 => "IMAGE_REL_ARM_BLX23T",
            0x0016 => "IMAGE_REL_ARM_PAIR",
            _ => "Unknown",
        },
        Machine::Arm64 => match typ {
            0x0000 => "IMAGE_REL_ARM64_ABSOLUTE",
            0x0001 => "IMAGE_REL_ARM64_ADDR32",
            0x0002 => "IMAGE_REL_ARM64_ADDR32NB",
            0x0003 => "IMAGE_REL_ARM64_BRANCH26",
            0x0004 => "IMAGE_REL_ARM64_PAGEBASE_REL21",
            0x0005 => "IMAGE_REL_ARM64_REL21",
            0x0006 => "IMAGE_REL_ARM64_PAGEOFFSET_12A",
            0x0007 => "IMAGE_REL_ARM64_PAGEOFFSET_12L",
            0x0008 => "IMAGE_REL_ARM64_SECREL",
            0x0009 => "IMAGE_REL_ARM64_SECREL_LOW12A",
            0x000a => "IMAGE_REL_ARM64_SECREL_HIGH12A",
            0x000b => "IMAGE_REL_ARM64_SECREL_LOW12L",
            0x000c => "IMAGE_REL_ARM64_TOKEN",
            0x000d => "IMAGE_REL_ARM64_SECTION",
            0x000e => "IMAGE_REL_ARM64_ADDR64",
            0x000f => "IMAGE_REL_ARM64_BRANCH19",
            0x0010 => "IMAGE_REL_ARM64_BRANCH14",
            0x0011 => "IMAGE_REL_ARM64_REL32",
            _ => "Unknown",
        },
        Machine::I386 => match typ {
            0x0000 => "IMAGE_REL_I386_ABSOLUTE",
            0x0001 => "IMAGE_REL_I386_DIR16",
            0x0002 => "IMAGE_REL_I386_REL16",
            0x0006 => "IMAGE_REL_I386_DIR32",
            0x0007 => "IMAGE_REL_I386_DIR32NB",
            0x0009 => "IMAGE_REL_I386_SEG12",
            0x000a => "IMAGE_REL_I386_SECTION",
            0x000b => "IMAGE_REL_I386_SECREL",
            0x000c => "IMAGE_REL_I386_TOKEN",
            0x000d => "IMAGE_REL_I386_SECREL7",
            0x0014 => "IMAGE_REL_I386_REL32",
            _ => "Unknown",
        },
        _ => "Unknown",
    }
}

pub const IMAGE_REL_AMD64_ADDR64: u16 = 0x0001;
pub const IMAGE_REL_AMD64_ADDR32: u16 = 0x0002;
pub const IMAGE_REL_AMD64_ADDR32NB: u16 = 0x0003;
pub const IMAGE_REL_AMD64_REL32: u16 = 0x0004;
pub const IMAGE_REL_AMD64_SECTION: u16 = 0x000a;
pub const IMAGE_REL_AMD64_SECREL: u16 = 0x000b;
pub const IMAGE_REL_AMD64_TOKEN: u16 = 0x000d;

pub const IMAGE_REL_I386_DIR32: u16 = 0x0006;
pub const IMAGE_REL_I386_DIR32NB: u16 = 0x0007;
pub const IMAGE_REL_I386_SECTION: u16 = 0x000a;
pub const IMAGE_REL_I386_SECREL: u16 = 0x000b;
pub const IMAGE_REL_I386_TOKEN: u16 = 0x000c;
pub const IMAGE_REL_I386_REL32: u16 = 0x0014;

#[cfg(test)]
mod tests {
    use crate::header::Machine;
    use crate::relocation::{relocation_type_name, Relocation, Relocations};
    use crate::section::{Section, SectionCharacteristics};

    fn section(ptr: u32, count: u16, characteristics: u32) -> Section<'static> {
        Section {
            index: 1,
            raw_name: b".text\0\0\0",
            virtual_size: 0,
            virtual_address: 0,
            size_of_raw_data: 0,
            pointer_to_raw_data: 0,
            pointer_to_relocations: ptr,
            pointer_to_linenumbers: 0,
            number_of_relocations: count,
            number_of_linenumbers: 0,
            characteristics: SectionCharacteristics::from_bits_retain(characteristics),
        }
    }

    const RELOCS: &[u8] = &[
        0xff, 0xff,                     // padding before the table
        // [0]
        3, 0, 0, 0,                     // virtual_address (count when extended)
        7, 0, 0, 0,                     // symbol_table_index
        4, 0,                           // type = REL32
        // [1]
        0x10, 0, 0, 0,                  // virtual_address
        8, 0, 0, 0,                     // symbol_table_index
        1, 0,                           // type = ADDR64
        // [2]
        0x20, 0, 0, 0,                  // virtual_address
        9, 0, 0, 0,                     // symbol_table_index
        2, 0,                           // type = ADDR32
    ];

    #[test]
    fn plain_count() {
        let r: Vec<_> = Relocations::parse(RELOCS, &section(2, 2, 0)).unwrap().collect();
        assert_eq!(r, vec![
            Relocation { virtual_address: 3, symbol_table_index: 7, typ: 4 },
            Relocation { virtual_address: 0x10, symbol_table_index: 8, typ: 1 },
        ]);
    }

    #[test]
    fn extended_count_skips_first_entry() {
        let s = section(2, 0xffff, 0x0100_0000);
        assert!(s.has_extended_relocations());
        let r: Vec<_> = Relocations::parse(RELOCS, &s).unwrap().collect();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].symbol_table_index, 8);
        assert_eq!(r[1].symbol_table_index, 9);
    }

    #[test]
    fn overflow_flag_alone_is_not_extended() {
        let r = Relocations::parse(RELOCS, &section(2, 3, 0x0100_0000)).unwrap();
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn table_past_end() {
        assert!(Relocations::parse(RELOCS, &section(2, 4, 0)).is_err());
        assert!(Relocations::parse(RELOCS, &section(0x100, 1, 0)).is_err());
        assert!(Relocations::parse(RELOCS, &section(0x100, 0, 0)).unwrap().is_empty());
    }

    #[test]
    fn type_names() {
        assert_eq!(relocation_type_name(Machine::Amd64, 4), "IMAGE_REL_AMD64_REL32");
        assert_eq!(relocation_type_name(Machine::I386, 0x14), "IMAGE_REL_I386_REL32");
        assert_eq!(relocation_type_name(Machine::ArmNt, 0x16), "IMAGE_REL_ARM_PAIR");
        assert_eq!(relocation_type_name(Machine::Arm64, 0x11), "IMAGE_REL_ARM64_REL32");
        assert_eq!(relocation_type_name(Machine::Amd64, 0x99), "Unknown");
        assert_eq!(relocation_type_name(Machine::Ia64, 0), "Unknown");
    }
}
