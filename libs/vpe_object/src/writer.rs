//! Object file encoder. Produces the plain or big-object layout from an
//! owned model; the reader in this crate accepts everything it writes.

use log::debug;
use stpack::Packer;

use crate::err::{ErrorKind, VpeObjectError};
use crate::header::{FileCharacteristics, Machine};
use crate::raw::header::{BigObjHeader, CoffFileHeader, BIGOBJ_MAGIC, BIGOBJ_MIN_VERSION};
use crate::raw::section_header::{RelocationRecord, SectionHeader};
use crate::raw::symbol::{
    AuxBfAndEf,
    AuxClrToken,
    AuxFunctionDefinition,
    AuxSectionDefinition,
    AuxWeakExternal,
    Symbol16,
    Symbol32,
    AUX_PAYLOAD_SIZE,
    SYMBOL_NAME_SIZE,
};
use crate::section::SectionCharacteristics;
use crate::string_table::encode_base64_offset;
use crate::symbol::{SectionRef, StorageClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationModel {
    pub virtual_address: u32,
    pub symbol_table_index: u32,
    pub typ: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionModel {
    pub name: Vec<u8>,
    pub characteristics: SectionCharacteristics,
    pub data: Vec<u8>,
    /// Size of a section with no file content, such as .bss.
    pub uninitialized_size: u32,
    pub relocations: Vec<RelocationModel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxModel {
    FunctionDefinition {
        tag_index: u32,
        total_size: u32,
        pointer_to_linenumber: u32,
        pointer_to_next_function: u32,
    },
    BfAndEf {
        linenumber: u16,
        pointer_to_next_function: u32,
    },
    WeakExternal {
        tag_index: u32,
        characteristics: u32,
    },
    SectionDefinition {
        length: u32,
        number_of_relocations: u16,
        number_of_linenumbers: u16,
        checksum: u32,
        number: u32,
        selection: u8,
    },
    File(Vec<u8>),
    ClrToken {
        aux_type: u8,
        symbol_table_index: u32,
    },
}

/// Size of one symbol table entry in the chosen layout.
pub fn symbol_entry_size(big_object: bool) -> usize {
    if big_object { 20 } else { AUX_PAYLOAD_SIZE }
}

impl AuxModel {
    /// Number of symbol table slots the record occupies. A file record
    /// takes at least one, even for an empty name.
    pub fn slots(&self, big_object: bool) -> u32 {
        match self {
            AuxModel::File(name) => {
                let entry = symbol_entry_size(big_object);
                ((name.len() + entry - 1) / entry).max(1) as u32
            }
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolModel {
    pub name: Vec<u8>,
    pub value: u32,
    pub section: SectionRef,
    pub typ: u16,
    pub storage_class: StorageClass,
    pub aux: Option<AuxModel>,
}

impl SymbolModel {
    pub fn slots(&self, big_object: bool) -> u32 {
        1 + self.aux.as_ref().map_or(0, |a| a.slots(big_object))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectModel {
    pub machine: Machine,
    pub time_date_stamp: u32,
    pub characteristics: FileCharacteristics,
    pub sections: Vec<SectionModel>,
    pub symbols: Vec<SymbolModel>,
}

impl ObjectModel {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            time_date_stamp: 0,
            characteristics: FileCharacteristics::empty(),
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Symbol table index of `symbols[i]`, counting aux slots before it.
    pub fn symbol_table_index(&self, i: usize, big_object: bool) -> u32 {
        self.symbols[..i].iter().map(|s| s.slots(big_object)).sum()
    }
}

const MAX_NUMBER_OF_SECTIONS16: usize = 0xfeff;
const COFF_HEADER_SIZE: u32 = 20;
const BIGOBJ_HEADER_SIZE: u32 = 56;
const SECTION_HEADER_SIZE: u32 = 40;
const RELOCATION_SIZE: u32 = 10;

struct StringTableBuilder {
    data: Vec<u8>,
}

impl StringTableBuilder {
    fn new() -> Self {
        Self {
            data: vec![0, 0, 0, 0],
        }
    }

    fn add(&mut self, s: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s);
        self.data.push(0);
        offset
    }

    fn finish(mut self) -> Vec<u8> {
        let size = (self.data.len() as u32).to_le_bytes();
        self.data[..4].copy_from_slice(&size);
        self.data
    }
}

fn section_name_field(name: &[u8], strtab: &mut StringTableBuilder) -> [u8; 8] {
    let mut field = [0u8; SYMBOL_NAME_SIZE];
    if name.len() <= SYMBOL_NAME_SIZE {
        field[..name.len()].copy_from_slice(name);
        return field;
    }
    let offset = strtab.add(name);
    if offset <= 9_999_999 {
        let s = format!("/{}", offset);
        field[..s.len()].copy_from_slice(s.as_bytes());
    } else {
        field[..2].copy_from_slice(b"//");
        field[2..].copy_from_slice(&encode_base64_offset(offset));
    }
    field
}

fn symbol_name_field(name: &[u8], strtab: &mut StringTableBuilder) -> [u8; 8] {
    let mut field = [0u8; SYMBOL_NAME_SIZE];
    if name.len() <= SYMBOL_NAME_SIZE {
        field[..name.len()].copy_from_slice(name);
    } else {
        field[4..].copy_from_slice(&strtab.add(name).to_le_bytes());
    }
    field
}

fn encode_aux(aux: &AuxModel, big_object: bool, entry_size: usize, out: &mut Vec<u8>) {
    let start = out.len();
    match aux {
        AuxModel::FunctionDefinition {
            tag_index,
            total_size,
            pointer_to_linenumber,
            pointer_to_next_function,
        } => AuxFunctionDefinition {
            tag_index: *tag_index,
            total_size: *total_size,
            pointer_to_linenumber: *pointer_to_linenumber,
            pointer_to_next_function: *pointer_to_next_function,
            unused: [0; 2],
        }.pack(out),
        AuxModel::BfAndEf { linenumber, pointer_to_next_function } => AuxBfAndEf {
            unused1: [0; 4],
            linenumber: *linenumber,
            unused2: [0; 6],
            pointer_to_next_function: *pointer_to_next_function,
            unused3: [0; 2],
        }.pack(out),
        AuxModel::WeakExternal { tag_index, characteristics } => AuxWeakExternal {
            tag_index: *tag_index,
            characteristics: *characteristics,
            unused: [0; 10],
        }.pack(out),
        AuxModel::SectionDefinition {
            length,
            number_of_relocations,
            number_of_linenumbers,
            checksum,
            number,
            selection,
        } => AuxSectionDefinition {
            length: *length,
            number_of_relocations: *number_of_relocations,
            number_of_linenumbers: *number_of_linenumbers,
            checksum: *checksum,
            number_low: *number as u16,
            selection: *selection,
            unused: 0,
            number_high: if big_object { (*number >> 16) as u16 } else { 0 },
        }.pack(out),
        AuxModel::File(name) => {
            out.extend_from_slice(name);
        }
        AuxModel::ClrToken { aux_type, symbol_table_index } => AuxClrToken {
            aux_type: *aux_type,
            reserved: 0,
            symbol_table_index: *symbol_table_index,
            unused: [0; 12],
        }.pack(out),
    }
    let total = aux.slots(big_object) as usize * entry_size;
    out.resize(start + total, 0);
}

/// Serializes `model`. Sections get consecutive 1-based numbers in order.
pub fn write_object(model: &ObjectModel, big_object: bool) -> Result<Vec<u8>, VpeObjectError> {
    let nsections = model.sections.len();
    if !big_object && nsections > MAX_NUMBER_OF_SECTIONS16 {
        return Err(VpeObjectError::new(
            ErrorKind::Unsupported,
            format!("{} sections need the big object layout", nsections)));
    }
    for s in &model.symbols {
        if s.aux.as_ref().map_or(0, |a| a.slots(big_object)) > u32::from(u8::MAX) {
            return Err(VpeObjectError::new(
                ErrorKind::Unsupported,
                format!("symbol {:?} needs more than 255 aux records",
                        String::from_utf8_lossy(&s.name))));
        }
    }

    let mut strtab = StringTableBuilder::new();
    let header_size = if big_object { BIGOBJ_HEADER_SIZE } else { COFF_HEADER_SIZE };
    let mut pos = header_size + SECTION_HEADER_SIZE * nsections as u32;

    // raw data, 4-byte aligned
    let mut data_ptrs = Vec::with_capacity(nsections);
    for s in &model.sections {
        if s.data.is_empty() {
            data_ptrs.push(0);
            continue;
        }
        pos = (pos + 3) & !3;
        data_ptrs.push(pos);
        pos += s.data.len() as u32;
    }

    let mut reloc_ptrs = Vec::with_capacity(nsections);
    for s in &model.sections {
        if s.relocations.is_empty() {
            reloc_ptrs.push(0);
            continue;
        }
        reloc_ptrs.push(pos);
        let mut count = s.relocations.len() as u32;
        if count >= u32::from(u16::MAX) {
            count += 1;
        }
        pos += RELOCATION_SIZE * count;
    }

    let symtab_ptr = pos;
    let nsymbols: u32 = model.symbols.iter().map(|s| s.slots(big_object)).sum();
    debug!("writing {} sections, {} symbol slots, symbol table at {:#x}",
           nsections, nsymbols, symtab_ptr);

    let mut out = Vec::new();
    if big_object {
        BigObjHeader {
            sig1: 0,
            sig2: 0xffff,
            version: BIGOBJ_MIN_VERSION,
            machine: u16::from(model.machine),
            time_date_stamp: model.time_date_stamp,
            uuid: BIGOBJ_MAGIC,
            unused1: 0,
            unused2: 0,
            unused3: 0,
            unused4: 0,
            number_of_sections: nsections as u32,
            pointer_to_symbol_table: if nsymbols > 0 { symtab_ptr } else { 0 },
            number_of_symbols: nsymbols,
        }.pack(&mut out);
    } else {
        CoffFileHeader {
            machine: u16::from(model.machine),
            number_of_sections: nsections as u16,
            time_date_stamp: model.time_date_stamp,
            pointer_to_symbol_table: if nsymbols > 0 { symtab_ptr } else { 0 },
            number_of_symbols: nsymbols,
            size_of_optional_header: 0,
            characteristics: model.characteristics.bits(),
        }.pack(&mut out);
    }

    for (i, s) in model.sections.iter().enumerate() {
        let extended = s.relocations.len() >= usize::from(u16::MAX);
        let mut characteristics = s.characteristics;
        characteristics.set(SectionCharacteristics::LNK_NRELOC_OVFL, extended);
        let size_of_raw_data = if s.data.is_empty() {
            s.uninitialized_size
        } else {
            s.data.len() as u32
        };
        SectionHeader {
            name: section_name_field(&s.name, &mut strtab),
            virtual_size: 0,
            virtual_address: 0,
            size_of_raw_data,
            pointer_to_raw_data: data_ptrs[i],
            pointer_to_relocations: reloc_ptrs[i],
            pointer_to_linenumbers: 0,
            number_of_relocations: if extended { u16::MAX } else { s.relocations.len() as u16 },
            number_of_linenumbers: 0,
            characteristics: characteristics.bits(),
        }.pack(&mut out);
    }

    for (i, s) in model.sections.iter().enumerate() {
        if data_ptrs[i] != 0 {
            out.resize(data_ptrs[i] as usize, 0);
            out.extend_from_slice(&s.data);
        }
    }

    for s in &model.sections {
        if s.relocations.len() >= usize::from(u16::MAX) {
            RelocationRecord {
                virtual_address: s.relocations.len() as u32 + 1,
                symbol_table_index: 0,
                typ: 0,
            }.pack(&mut out);
        }
        for r in &s.relocations {
            RelocationRecord {
                virtual_address: r.virtual_address,
                symbol_table_index: r.symbol_table_index,
                typ: r.typ,
            }.pack(&mut out);
        }
    }

    let entry_size = symbol_entry_size(big_object);
    for s in &model.symbols {
        let name = symbol_name_field(&s.name, &mut strtab);
        let aux = s.aux.as_ref().map_or(0, |a| a.slots(big_object)) as u8;
        if big_object {
            Symbol32 {
                name,
                value: s.value,
                section_number: s.section.number(),
                typ: s.typ,
                storage_class: u8::from(s.storage_class),
                number_of_aux_symbols: aux,
            }.pack(&mut out);
        } else {
            Symbol16 {
                name,
                value: s.value,
                section_number: s.section.number() as u16,
                typ: s.typ,
                storage_class: u8::from(s.storage_class),
                number_of_aux_symbols: aux,
            }.pack(&mut out);
        }
        if let Some(a) = &s.aux {
            encode_aux(a, big_object, entry_size, &mut out);
        }
    }

    out.extend_from_slice(&strtab.finish());
    Ok(out)
}
