use stpack::unpacker;

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SectionHeader {
        pub name: [u8; 8],
        pub virtual_size: u32,
        pub virtual_address: u32,
        pub size_of_raw_data: u32,
        pub pointer_to_raw_data: u32,
        pub pointer_to_relocations: u32,
        pub pointer_to_linenumbers: u32,
        pub number_of_relocations: u16,
        pub number_of_linenumbers: u16,
        pub characteristics: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct RelocationRecord {
        pub virtual_address: u32,
        pub symbol_table_index: u32,
        pub typ: u16,
    }
}

#[cfg(test)]
mod tests {
    use stpack::Unpacker;

    use crate::raw::section_header::{RelocationRecord, SectionHeader};

    #[test]
    fn record_sizes() {
        assert_eq!(SectionHeader::SIZE, 40);
        assert_eq!(RelocationRecord::SIZE, 10);
    }

    #[test]
    fn text_header() {
        let data: &[u8] = &[
            b'.', b't', b'e', b'x',     // name
            b't', 0, 0, 0,
            0x10, 0, 0, 0,              // virtual_size
            0, 0x10, 0, 0,              // virtual_address
            0x10, 0, 0, 0,              // size_of_raw_data
            0x64, 0, 0, 0,              // pointer_to_raw_data
            0, 0, 0, 0,                 // pointer_to_relocations
            0, 0, 0, 0,                 // pointer_to_linenumbers
            0, 0,                       // number_of_relocations
            0, 0,                       // number_of_linenumbers
            0x20, 0, 0, 0x60,           // characteristics
        ];
        let (sh, rest) = SectionHeader::unpack(data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&sh.name[..5], b".text");
        assert_eq!(sh.virtual_address, 0x1000);
        assert_eq!(sh.pointer_to_raw_data, 0x64);
        assert_eq!(sh.characteristics, 0x6000_0020);
    }
}
