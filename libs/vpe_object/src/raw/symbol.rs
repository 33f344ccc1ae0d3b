use stpack::unpacker;

use crate::bits_struct;

bits_struct! {
    /// Primary symbol record. The big object layout widens the section
    /// number to 32 bits and pads every entry to 20 bytes.
    pub(crate) trait SymbolRecord { }
    {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct Symbol16;
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct Symbol32;
    }
    {
        pub name: {[u8; 8], [u8; 8],} name([u8; 8]);
        pub value: {u32, u32,} value(u32);
        pub section_number: {u16, i32,} raw_section_number(i32);
        pub typ: {u16, u16,} typ(u16);
        pub storage_class: {u8, u8,} storage_class(u8);
        pub number_of_aux_symbols: {u8, u8,} number_of_aux_symbols(u8);
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AuxFunctionDefinition {
        pub tag_index: u32,
        pub total_size: u32,
        pub pointer_to_linenumber: u32,
        pub pointer_to_next_function: u32,
        pub unused: [u8; 2],
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AuxBfAndEf {
        pub unused1: [u8; 4],
        pub linenumber: u16,
        pub unused2: [u8; 6],
        pub pointer_to_next_function: u32,
        pub unused3: [u8; 2],
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AuxWeakExternal {
        pub tag_index: u32,
        pub characteristics: u32,
        pub unused: [u8; 10],
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AuxSectionDefinition {
        pub length: u32,
        pub number_of_relocations: u16,
        pub number_of_linenumbers: u16,
        pub checksum: u32,
        pub number_low: u16,
        pub selection: u8,
        pub unused: u8,
        pub number_high: u16,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AuxClrToken {
        pub aux_type: u8,
        pub reserved: u8,
        pub symbol_table_index: u32,
        pub unused: [u8; 12],
    }
}

pub(crate) const SYMBOL_NAME_SIZE: usize = 8;
/// Aux records are always 18 bytes of payload; big object pads them to 20.
pub(crate) const AUX_PAYLOAD_SIZE: usize = 18;
