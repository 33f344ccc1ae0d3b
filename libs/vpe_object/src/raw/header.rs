use stpack::unpacker;

use crate::bits_struct;
use crate::raw::Absent;

pub(crate) const DOS_MAGIC: u16 = 0x5a4d; // "MZ"
pub(crate) const PE_MAGIC: [u8; 4] = *b"PE\0\0";

pub(crate) const PE32_MAGIC: u16 = 0x10b;
pub(crate) const PE32_PLUS_MAGIC: u16 = 0x20b;

pub(crate) const BIGOBJ_MIN_VERSION: u16 = 2;
pub(crate) const BIGOBJ_MAGIC: [u8; 16] = [
    0xc7, 0xa1, 0xba, 0xd1, 0xee, 0xba, 0xa9, 0x4b,
    0xaf, 0x20, 0xfa, 0xf6, 0x6a, 0xa4, 0xdc, 0xb8,
];

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DosHeader {
        pub magic: u16,
        pub stub: [u8; 58],
        pub new_header_offset: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CoffFileHeader {
        pub machine: u16,
        pub number_of_sections: u16,
        pub time_date_stamp: u32,
        pub pointer_to_symbol_table: u32,
        pub number_of_symbols: u32,
        pub size_of_optional_header: u16,
        pub characteristics: u16,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BigObjHeader {
        pub sig1: u16,
        pub sig2: u16,
        pub version: u16,
        pub machine: u16,
        pub time_date_stamp: u32,
        pub uuid: [u8; 16],
        pub unused1: u32,
        pub unused2: u32,
        pub unused3: u32,
        pub unused4: u32,
        pub number_of_sections: u32,
        pub pointer_to_symbol_table: u32,
        pub number_of_symbols: u32,
    }
}

bits_struct! {
    pub(crate) trait OptionalHeaderRecord { }
    {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct Pe32Header;
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct Pe32PlusHeader;
    }
    {
        pub magic: {u16, u16,} magic(u16);
        pub major_linker_version: {u8, u8,} major_linker_version(u8);
        pub minor_linker_version: {u8, u8,} minor_linker_version(u8);
        pub size_of_code: {u32, u32,} size_of_code(u32);
        pub size_of_initialized_data: {u32, u32,} size_of_initialized_data(u32);
        pub size_of_uninitialized_data: {u32, u32,} size_of_uninitialized_data(u32);
        pub address_of_entry_point: {u32, u32,} address_of_entry_point(u32);
        pub base_of_code: {u32, u32,} base_of_code(u32);
        pub base_of_data: {u32, Absent,} base_of_data(Option<u32>);
        pub image_base: {u32, u64,} image_base(u64);
        pub section_alignment: {u32, u32,} section_alignment(u32);
        pub file_alignment: {u32, u32,} file_alignment(u32);
        pub major_operating_system_version: {u16, u16,} major_operating_system_version(u16);
        pub minor_operating_system_version: {u16, u16,} minor_operating_system_version(u16);
        pub major_image_version: {u16, u16,} major_image_version(u16);
        pub minor_image_version: {u16, u16,} minor_image_version(u16);
        pub major_subsystem_version: {u16, u16,} major_subsystem_version(u16);
        pub minor_subsystem_version: {u16, u16,} minor_subsystem_version(u16);
        pub win32_version_value: {u32, u32,} win32_version_value(u32);
        pub size_of_image: {u32, u32,} size_of_image(u32);
        pub size_of_headers: {u32, u32,} size_of_headers(u32);
        pub checksum: {u32, u32,} checksum(u32);
        pub subsystem: {u16, u16,} subsystem(u16);
        pub dll_characteristics: {u16, u16,} dll_characteristics(u16);
        pub size_of_stack_reserve: {u32, u64,} size_of_stack_reserve(u64);
        pub size_of_stack_commit: {u32, u64,} size_of_stack_commit(u64);
        pub size_of_heap_reserve: {u32, u64,} size_of_heap_reserve(u64);
        pub size_of_heap_commit: {u32, u64,} size_of_heap_commit(u64);
        pub loader_flags: {u32, u32,} loader_flags(u32);
        pub number_of_rva_and_sizes: {u32, u32,} number_of_rva_and_sizes(u32);
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DataDirectory {
        pub virtual_address: u32,
        pub size: u32,
    }
}

#[cfg(test)]
mod tests {
    use stpack::Unpacker;

    use crate::raw::header::{
        BigObjHeader,
        CoffFileHeader,
        DataDirectory,
        DosHeader,
        OptionalHeaderRecord,
        Pe32Header,
        Pe32PlusHeader,
    };

    #[test]
    fn record_sizes() {
        assert_eq!(DosHeader::SIZE, 64);
        assert_eq!(CoffFileHeader::SIZE, 20);
        assert_eq!(BigObjHeader::SIZE, 56);
        assert_eq!(Pe32Header::SIZE, 96);
        assert_eq!(Pe32PlusHeader::SIZE, 112);
        assert_eq!(DataDirectory::SIZE, 8);
    }

    #[test]
    fn pe32_has_base_of_data() {
        let mut data = vec![0u8; 96];
        data[0] = 0x0b;                 // magic = 0x10b
        data[1] = 0x01;
        data[24] = 0x00;                // base_of_data = 0x2000
        data[25] = 0x20;
        data[28] = 0x00;                // image_base = 0x400000
        data[29] = 0x00;
        data[30] = 0x40;
        let (h, _) = Pe32Header::unpack(&data).unwrap();
        assert_eq!(h.magic(), 0x10b);
        assert_eq!(h.base_of_data(), Some(0x2000));
        assert_eq!(h.image_base(), 0x400000);

        let (h64, _) = Pe32PlusHeader::unpack(&[0u8; 112]).unwrap();
        assert_eq!(h64.base_of_data(), None);
    }
}
