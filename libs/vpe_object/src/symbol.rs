use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::symbol::{
    AuxBfAndEf,
    AuxClrToken,
    AuxFunctionDefinition,
    AuxSectionDefinition,
    AuxWeakExternal,
    AUX_PAYLOAD_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedSection {
    Undefined,
    Absolute,
    Debug,
    Unknown(i32),
}

/// Section number of a symbol: a reserved sentinel or a 1-based section index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRef {
    Reserved(ReservedSection),
    Index(u32),
}

impl SectionRef {
    pub fn from_number(n: i32) -> Self {
        match n {
            0 => SectionRef::Reserved(ReservedSection::Undefined),
            -1 => SectionRef::Reserved(ReservedSection::Absolute),
            -2 => SectionRef::Reserved(ReservedSection::Debug),
            n if n < 0 => SectionRef::Reserved(ReservedSection::Unknown(n)),
            n => SectionRef::Index(n as u32),
        }
    }

    pub fn number(&self) -> i32 {
        match self {
            SectionRef::Reserved(ReservedSection::Undefined) => 0,
            SectionRef::Reserved(ReservedSection::Absolute) => -1,
            SectionRef::Reserved(ReservedSection::Debug) => -2,
            SectionRef::Reserved(ReservedSection::Unknown(n)) => *n,
            SectionRef::Index(i) => *i as i32,
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, SectionRef::Reserved(_))
    }
}

/// Standard-layout section numbers above this are negative sentinels.
const MAX_NUMBER_OF_SECTIONS16: u16 = 0xfeff;

pub(crate) fn section_number16(raw: u16) -> i32 {
    if raw <= MAX_NUMBER_OF_SECTIONS16 {
        i32::from(raw)
    } else {
        i32::from(raw as i16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    EndOfFunction,
    Null,
    Automatic,
    External,
    Static,
    Register,
    ExternalDef,
    Label,
    UndefinedLabel,
    MemberOfStruct,
    Argument,
    StructTag,
    MemberOfUnion,
    UnionTag,
    TypeDefinition,
    UndefinedStatic,
    EnumTag,
    MemberOfEnum,
    RegisterParam,
    BitField,
    Block,
    Function,
    EndOfStruct,
    File,
    Section,
    WeakExternal,
    ClrToken,
    Unknown(u8),
}

impl From<u8> for StorageClass {
    fn from(v: u8) -> Self {
        match v {
            0xff => StorageClass::EndOfFunction,
            0 => StorageClass::Null,
            1 => StorageClass::Automatic,
            2 => StorageClass::External,
            3 => StorageClass::Static,
            4 => StorageClass::Register,
            5 => StorageClass::ExternalDef,
            6 => StorageClass::Label,
            7 => StorageClass::UndefinedLabel,
            8 => StorageClass::MemberOfStruct,
            9 => StorageClass::Argument,
            10 => StorageClass::StructTag,
            11 => StorageClass::MemberOfUnion,
            12 => StorageClass::UnionTag,
            13 => StorageClass::TypeDefinition,
            14 => StorageClass::UndefinedStatic,
            15 => StorageClass::EnumTag,
            16 => StorageClass::MemberOfEnum,
            17 => StorageClass::RegisterParam,
            18 => StorageClass::BitField,
            100 => StorageClass::Block,
            101 => StorageClass::Function,
            102 => StorageClass::EndOfStruct,
            103 => StorageClass::File,
            104 => StorageClass::Section,
            105 => StorageClass::WeakExternal,
            107 => StorageClass::ClrToken,
            c => StorageClass::Unknown(c),
        }
    }
}

impl From<StorageClass> for u8 {
    fn from(c: StorageClass) -> Self {
        match c {
            StorageClass::EndOfFunction => 0xff,
            StorageClass::Null => 0,
            StorageClass::Automatic => 1,
            StorageClass::External => 2,
            StorageClass::Static => 3,
            StorageClass::Register => 4,
            StorageClass::ExternalDef => 5,
            StorageClass::Label => 6,
            StorageClass::UndefinedLabel => 7,
            StorageClass::MemberOfStruct => 8,
            StorageClass::Argument => 9,
            StorageClass::StructTag => 10,
            StorageClass::MemberOfUnion => 11,
            StorageClass::UnionTag => 12,
            StorageClass::TypeDefinition => 13,
            StorageClass::UndefinedStatic => 14,
            StorageClass::EnumTag => 15,
            StorageClass::MemberOfEnum => 16,
            StorageClass::RegisterParam => 17,
            StorageClass::BitField => 18,
            StorageClass::Block => 100,
            StorageClass::Function => 101,
            StorageClass::EndOfStruct => 102,
            StorageClass::File => 103,
            StorageClass::Section => 104,
            StorageClass::WeakExternal => 105,
            StorageClass::ClrToken => 107,
            StorageClass::Unknown(c) => c,
        }
    }
}

pub const BASE_TYPE_NULL: u16 = 0;
pub const COMPLEX_TYPE_NULL: u16 = 0;
pub const COMPLEX_TYPE_POINTER: u16 = 1;
pub const COMPLEX_TYPE_FUNCTION: u16 = 2;
pub const COMPLEX_TYPE_ARRAY: u16 = 3;
pub const COMPLEX_TYPE_SHIFT: u16 = 4;

pub const WEAK_EXTERN_SEARCH_NOLIBRARY: u32 = 1;
pub const WEAK_EXTERN_SEARCH_LIBRARY: u32 = 2;
pub const WEAK_EXTERN_SEARCH_ALIAS: u32 = 3;
pub const WEAK_EXTERN_ANTI_DEPENDENCY: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxRecord<'a> {
    FunctionDefinition {
        tag_index: u32,
        total_size: u32,
        pointer_to_linenumber: u32,
        pointer_to_next_function: u32,
    },
    /// .bf / .ef line info.
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
    /// File name spread over all aux slots, trailing NULs dropped.
    File(&'a [u8]),
    ClrToken {
        aux_type: u8,
        symbol_table_index: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol<'a> {
    /// Position in the symbol table, counting aux slots.
    pub index: u32,
    pub name: &'a [u8],
    pub value: u32,
    pub section: SectionRef,
    pub typ: u16,
    pub storage_class: StorageClass,
    pub number_of_aux_symbols: u8,
    pub(crate) aux_data: &'a [u8],
    pub(crate) big_object: bool,
}

impl<'a> Symbol<'a> {
    pub fn base_type(&self) -> u16 {
        self.typ & 0x0f
    }

    pub fn complex_type(&self) -> u16 {
        (self.typ & 0xf0) >> COMPLEX_TYPE_SHIFT
    }

    pub fn is_external(&self) -> bool {
        self.storage_class == StorageClass::External
    }

    pub fn is_weak_external(&self) -> bool {
        self.storage_class == StorageClass::WeakExternal
    }

    fn is_undefined_section(&self) -> bool {
        self.section == SectionRef::Reserved(ReservedSection::Undefined)
    }

    pub fn is_common(&self) -> bool {
        self.is_external() && self.is_undefined_section() && self.value != 0
    }

    pub fn is_undefined(&self) -> bool {
        self.is_external() && self.is_undefined_section() && self.value == 0
    }

    pub fn is_any_undefined(&self) -> bool {
        self.is_undefined() || self.is_weak_external()
    }

    pub fn is_function_definition(&self) -> bool {
        self.is_external()
            && self.base_type() == BASE_TYPE_NULL
            && self.complex_type() == COMPLEX_TYPE_FUNCTION
            && !self.section.is_reserved()
    }

    pub fn is_function_line_info(&self) -> bool {
        self.storage_class == StorageClass::Function
    }

    pub fn is_file_record(&self) -> bool {
        self.storage_class == StorageClass::File
    }

    pub fn is_section_definition(&self) -> bool {
        // external absolute symbols carry a section definition too
        let appdomain_global = self.is_external()
            && self.section == SectionRef::Reserved(ReservedSection::Absolute);
        appdomain_global || self.storage_class == StorageClass::Static
    }

    pub fn is_clr_token(&self) -> bool {
        self.storage_class == StorageClass::ClrToken
    }

    /// Raw aux slots, `number_of_aux_symbols` entries of the table's entry size.
    pub fn aux_data(&self) -> &'a [u8] {
        self.aux_data
    }

    /// Interprets the aux slots from the symbol's storage class and section.
    pub fn aux_record(&self) -> Result<Option<AuxRecord<'a>>, VpeObjectError> {
        if self.number_of_aux_symbols == 0 {
            return Ok(None);
        }
        let first = self.aux_data;
        if first.len() < AUX_PAYLOAD_SIZE {
            return Err(VpeObjectError::new(
                ErrorKind::OutOfBounds,
                format!("aux data of symbol {} is {} bytes", self.index, first.len())));
        }
        let short = |_| VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("short aux record for symbol {}", self.index));

        let rec = if self.is_function_definition() {
            let (a, _) = AuxFunctionDefinition::unpack(first).map_err(short)?;
            AuxRecord::FunctionDefinition {
                tag_index: a.tag_index,
                total_size: a.total_size,
                pointer_to_linenumber: a.pointer_to_linenumber,
                pointer_to_next_function: a.pointer_to_next_function,
            }
        } else if self.is_function_line_info() {
            let (a, _) = AuxBfAndEf::unpack(first).map_err(short)?;
            AuxRecord::BfAndEf {
                linenumber: a.linenumber,
                pointer_to_next_function: a.pointer_to_next_function,
            }
        } else if self.is_any_undefined() {
            let (a, _) = AuxWeakExternal::unpack(first).map_err(short)?;
            AuxRecord::WeakExternal {
                tag_index: a.tag_index,
                characteristics: a.characteristics,
            }
        } else if self.is_file_record() {
            let len = self.aux_data.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
            AuxRecord::File(&self.aux_data[..len])
        } else if self.is_section_definition() {
            let (a, _) = AuxSectionDefinition::unpack(first).map_err(short)?;
            let mut number = u32::from(a.number_low);
            if self.big_object {
                number |= u32::from(a.number_high) << 16;
            }
            AuxRecord::SectionDefinition {
                length: a.length,
                number_of_relocations: a.number_of_relocations,
                number_of_linenumbers: a.number_of_linenumbers,
                checksum: a.checksum,
                number,
                selection: a.selection,
            }
        } else if self.is_clr_token() {
            let (a, _) = AuxClrToken::unpack(first).map_err(short)?;
            AuxRecord::ClrToken {
                aux_type: a.aux_type,
                symbol_table_index: a.symbol_table_index,
            }
        } else {
            return Err(VpeObjectError::new(
                ErrorKind::Unsupported,
                format!("unknown aux record kind for symbol {} (storage class {:?})",
                        self.index, self.storage_class)));
        };
        Ok(Some(rec))
    }
}

#[cfg(test)]
mod tests {
    use crate::err::ErrorKind;
    use crate::symbol::{
        section_number16,
        AuxRecord,
        ReservedSection,
        SectionRef,
        StorageClass,
        Symbol,
    };

    fn symbol<'a>(class: StorageClass, section: i32, typ: u16, value: u32, aux: &'a [u8]) -> Symbol<'a> {
        Symbol {
            index: 0,
            name: b"sym",
            value,
            section: SectionRef::from_number(section),
            typ,
            storage_class: class,
            number_of_aux_symbols: (aux.len() / 18) as u8,
            aux_data: aux,
            big_object: false,
        }
    }

    #[test]
    fn section_ref() {
        assert_eq!(SectionRef::from_number(0), SectionRef::Reserved(ReservedSection::Undefined));
        assert_eq!(SectionRef::from_number(-1), SectionRef::Reserved(ReservedSection::Absolute));
        assert_eq!(SectionRef::from_number(-2), SectionRef::Reserved(ReservedSection::Debug));
        assert_eq!(SectionRef::from_number(-3), SectionRef::Reserved(ReservedSection::Unknown(-3)));
        assert_eq!(SectionRef::from_number(7), SectionRef::Index(7));
        for n in [-3, -2, -1, 0, 1, 65536] {
            assert_eq!(SectionRef::from_number(n).number(), n);
        }
    }

    #[test]
    fn sixteen_bit_sentinels() {
        assert_eq!(section_number16(1), 1);
        assert_eq!(section_number16(0xfeff), 0xfeff);
        assert_eq!(section_number16(0xffff), -1);
        assert_eq!(section_number16(0xfffe), -2);
    }

    #[test]
    fn storage_class_roundtrip() {
        for v in 0..=255u8 {
            assert_eq!(u8::from(StorageClass::from(v)), v);
        }
    }

    #[test]
    fn predicates() {
        let common = symbol(StorageClass::External, 0, 0, 16, &[]);
        assert!(common.is_common());
        assert!(!common.is_undefined());

        let undef = symbol(StorageClass::External, 0, 0, 0, &[]);
        assert!(undef.is_undefined());
        assert!(undef.is_any_undefined());

        let func = symbol(StorageClass::External, 1, 0x20, 0, &[]);
        assert!(func.is_function_definition());
        let func_abs = symbol(StorageClass::External, -1, 0x20, 0, &[]);
        assert!(!func_abs.is_function_definition());
        assert!(func_abs.is_section_definition());
    }

    #[test]
    fn no_aux() {
        let s = symbol(StorageClass::Static, 1, 0, 0, &[]);
        assert_eq!(s.aux_record(), Ok(None));
    }

    #[test]
    fn function_definition_aux() {
        let aux: &[u8] = &[
            5, 0, 0, 0,                 // tag_index
            0x40, 0, 0, 0,              // total_size
            0, 0, 0, 0,                 // pointer_to_linenumber
            9, 0, 0, 0,                 // pointer_to_next_function
            0, 0,                       // unused
        ];
        let s = symbol(StorageClass::External, 1, 0x20, 0, aux);
        assert_eq!(
            s.aux_record().unwrap(),
            Some(AuxRecord::FunctionDefinition {
                tag_index: 5,
                total_size: 0x40,
                pointer_to_linenumber: 0,
                pointer_to_next_function: 9,
            }));
    }

    #[test]
    fn weak_external_aux() {
        let aux: &[u8] = &[
            3, 0, 0, 0,                 // tag_index
            3, 0, 0, 0,                 // characteristics = SEARCH_ALIAS
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        let s = symbol(StorageClass::WeakExternal, 0, 0, 0, aux);
        assert_eq!(
            s.aux_record().unwrap(),
            Some(AuxRecord::WeakExternal { tag_index: 3, characteristics: 3 }));
    }

    #[test]
    fn file_aux_spans_slots() {
        let mut aux = [0u8; 36];
        aux[..22].copy_from_slice(b"a_long_source_file.cpp");
        let s = symbol(StorageClass::File, -2, 0, 0, &aux);
        assert_eq!(s.number_of_aux_symbols, 2);
        assert_eq!(s.aux_record().unwrap(), Some(AuxRecord::File(b"a_long_source_file.cpp")));
    }

    #[test]
    fn section_definition_number_high_only_for_bigobj() {
        let aux: &[u8] = &[
            0x10, 0, 0, 0,              // length
            1, 0,                       // number_of_relocations
            0, 0,                       // number_of_linenumbers
            0xef, 0xbe, 0xad, 0xde,     // checksum
            2, 0,                       // number_low
            2,                          // selection = ANY
            0,                          // unused
            1, 0,                       // number_high
        ];
        let mut s = symbol(StorageClass::Static, 1, 0, 0, aux);
        match s.aux_record().unwrap() {
            Some(AuxRecord::SectionDefinition { number, checksum, selection, .. }) => {
                assert_eq!(number, 2);
                assert_eq!(checksum, 0xdeadbeef);
                assert_eq!(selection, 2);
            }
            r => panic!("unexpected aux {:?}", r),
        }
        s.big_object = true;
        match s.aux_record().unwrap() {
            Some(AuxRecord::SectionDefinition { number, .. }) => assert_eq!(number, 0x10002),
            r => panic!("unexpected aux {:?}", r),
        }
    }

    #[test]
    fn unknown_aux_is_unsupported() {
        let aux = [0u8; 18];
        let s = symbol(StorageClass::Label, 1, 0, 0, &aux);
        assert_eq!(s.aux_record().unwrap_err().kind(), ErrorKind::Unsupported);
    }
}
