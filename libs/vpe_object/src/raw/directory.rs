use stpack::unpacker;

use crate::bits_struct;

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImportDirectoryRecord {
        pub import_lookup_table_rva: u32,
        pub time_date_stamp: u32,
        pub forwarder_chain: u32,
        pub name_rva: u32,
        pub import_address_table_rva: u32,
    }
}

impl ImportDirectoryRecord {
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DelayImportRecord {
        pub attributes: u32,
        pub name: u32,
        pub module_handle: u32,
        pub delay_import_address_table: u32,
        pub delay_import_name_table: u32,
        pub bound_delay_import_table: u32,
        pub unload_delay_import_table: u32,
        pub time_stamp: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportDirectoryRecord {
        pub export_flags: u32,
        pub time_date_stamp: u32,
        pub major_version: u16,
        pub minor_version: u16,
        pub name_rva: u32,
        pub ordinal_base: u32,
        pub address_table_entries: u32,
        pub number_of_name_pointers: u32,
        pub export_address_table_rva: u32,
        pub name_pointer_rva: u32,
        pub ordinal_table_rva: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct BaseRelocBlockHeader {
        pub page_rva: u32,
        pub block_size: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugDirectoryEntry {
        pub characteristics: u32,
        pub time_date_stamp: u32,
        pub major_version: u16,
        pub minor_version: u16,
        pub typ: u32,
        pub size_of_data: u32,
        pub address_of_raw_data: u32,
        pub pointer_to_raw_data: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CodeViewPdb70Header {
        pub signature: [u8; 4],
        pub guid: [u8; 16],
        pub age: u32,
    }
}

pub(crate) const CODEVIEW_PDB70_SIGNATURE: [u8; 4] = *b"RSDS";

bits_struct! {
    pub(crate) trait TlsDirectoryRecord { }
    {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct TlsDirectory32;
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) struct TlsDirectory64;
    }
    {
        pub start_address_of_raw_data: {u32, u64,} start_address_of_raw_data(u64);
        pub end_address_of_raw_data: {u32, u64,} end_address_of_raw_data(u64);
        pub address_of_index: {u32, u64,} address_of_index(u64);
        pub address_of_callbacks: {u32, u64,} address_of_callbacks(u64);
        pub size_of_zero_fill: {u32, u32,} size_of_zero_fill(u32);
        pub characteristics: {u32, u32,} characteristics(u32);
    }
}

// The two load config layouts order heap flags and affinity mask
// differently, so they do not share a getter trait.
unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct LoadConfig32 {
        pub size: u32,
        pub time_date_stamp: u32,
        pub major_version: u16,
        pub minor_version: u16,
        pub global_flags_clear: u32,
        pub global_flags_set: u32,
        pub critical_section_default_timeout: u32,
        pub de_commit_free_block_threshold: u32,
        pub de_commit_total_free_threshold: u32,
        pub lock_prefix_table: u32,
        pub maximum_allocation_size: u32,
        pub virtual_memory_threshold: u32,
        pub process_heap_flags: u32,
        pub process_affinity_mask: u32,
        pub csd_version: u16,
        pub dependent_load_flags: u16,
        pub edit_list: u32,
        pub security_cookie: u32,
        pub se_handler_table: u32,
        pub se_handler_count: u32,
        pub guard_cf_check_function: u32,
        pub guard_cf_dispatch_function: u32,
        pub guard_cf_function_table: u32,
        pub guard_cf_function_count: u32,
        pub guard_flags: u32,
    }
}

unpacker! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct LoadConfig64 {
        pub size: u32,
        pub time_date_stamp: u32,
        pub major_version: u16,
        pub minor_version: u16,
        pub global_flags_clear: u32,
        pub global_flags_set: u32,
        pub critical_section_default_timeout: u32,
        pub de_commit_free_block_threshold: u64,
        pub de_commit_total_free_threshold: u64,
        pub lock_prefix_table: u64,
        pub maximum_allocation_size: u64,
        pub virtual_memory_threshold: u64,
        pub process_affinity_mask: u64,
        pub process_heap_flags: u32,
        pub csd_version: u16,
        pub dependent_load_flags: u16,
        pub edit_list: u64,
        pub security_cookie: u64,
        pub se_handler_table: u64,
        pub se_handler_count: u64,
        pub guard_cf_check_function: u64,
        pub guard_cf_dispatch_function: u64,
        pub guard_cf_function_table: u64,
        pub guard_cf_function_count: u64,
        pub guard_flags: u32,
    }
}

#[cfg(test)]
mod tests {
    use stpack::Unpacker;

    use crate::raw::directory::{
        BaseRelocBlockHeader,
        CodeViewPdb70Header,
        DebugDirectoryEntry,
        DelayImportRecord,
        ExportDirectoryRecord,
        ImportDirectoryRecord,
        LoadConfig32,
        LoadConfig64,
        TlsDirectory32,
        TlsDirectory64,
    };

    #[test]
    fn record_sizes() {
        assert_eq!(ImportDirectoryRecord::SIZE, 20);
        assert_eq!(DelayImportRecord::SIZE, 32);
        assert_eq!(ExportDirectoryRecord::SIZE, 40);
        assert_eq!(BaseRelocBlockHeader::SIZE, 8);
        assert_eq!(DebugDirectoryEntry::SIZE, 28);
        assert_eq!(CodeViewPdb70Header::SIZE, 24);
        assert_eq!(TlsDirectory32::SIZE, 24);
        assert_eq!(TlsDirectory64::SIZE, 40);
        assert_eq!(LoadConfig32::SIZE, 92);
        assert_eq!(LoadConfig64::SIZE, 148);
    }

    #[test]
    fn null_import_descriptor() {
        let (rec, _) = ImportDirectoryRecord::unpack(&[0u8; 20]).unwrap();
        assert!(rec.is_null());
        let mut data = [0u8; 20];
        data[12] = 1;                   // name_rva
        let (rec, _) = ImportDirectoryRecord::unpack(&data).unwrap();
        assert!(!rec.is_null());
    }
}
