use log::debug;
use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::directory::{LoadConfig32, LoadConfig64};
use crate::rva::ImageView;

/// Load configuration directory, widened to 64-bit fields. Fields past the
/// record's own `size` read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadConfig {
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

impl From<LoadConfig32> for LoadConfig {
    fn from(r: LoadConfig32) -> Self {
        Self {
            size: r.size,
            time_date_stamp: r.time_date_stamp,
            major_version: r.major_version,
            minor_version: r.minor_version,
            global_flags_clear: r.global_flags_clear,
            global_flags_set: r.global_flags_set,
            critical_section_default_timeout: r.critical_section_default_timeout,
            de_commit_free_block_threshold: u64::from(r.de_commit_free_block_threshold),
            de_commit_total_free_threshold: u64::from(r.de_commit_total_free_threshold),
            lock_prefix_table: u64::from(r.lock_prefix_table),
            maximum_allocation_size: u64::from(r.maximum_allocation_size),
            virtual_memory_threshold: u64::from(r.virtual_memory_threshold),
            process_affinity_mask: u64::from(r.process_affinity_mask),
            process_heap_flags: r.process_heap_flags,
            csd_version: r.csd_version,
            dependent_load_flags: r.dependent_load_flags,
            edit_list: u64::from(r.edit_list),
            security_cookie: u64::from(r.security_cookie),
            se_handler_table: u64::from(r.se_handler_table),
            se_handler_count: u64::from(r.se_handler_count),
            guard_cf_check_function: u64::from(r.guard_cf_check_function),
            guard_cf_dispatch_function: u64::from(r.guard_cf_dispatch_function),
            guard_cf_function_table: u64::from(r.guard_cf_function_table),
            guard_cf_function_count: u64::from(r.guard_cf_function_count),
            guard_flags: r.guard_flags,
        }
    }
}

impl From<LoadConfig64> for LoadConfig {
    fn from(r: LoadConfig64) -> Self {
        Self {
            size: r.size,
            time_date_stamp: r.time_date_stamp,
            major_version: r.major_version,
            minor_version: r.minor_version,
            global_flags_clear: r.global_flags_clear,
            global_flags_set: r.global_flags_set,
            critical_section_default_timeout: r.critical_section_default_timeout,
            de_commit_free_block_threshold: r.de_commit_free_block_threshold,
            de_commit_total_free_threshold: r.de_commit_total_free_threshold,
            lock_prefix_table: r.lock_prefix_table,
            maximum_allocation_size: r.maximum_allocation_size,
            virtual_memory_threshold: r.virtual_memory_threshold,
            process_affinity_mask: r.process_affinity_mask,
            process_heap_flags: r.process_heap_flags,
            csd_version: r.csd_version,
            dependent_load_flags: r.dependent_load_flags,
            edit_list: r.edit_list,
            security_cookie: r.security_cookie,
            se_handler_table: r.se_handler_table,
            se_handler_count: r.se_handler_count,
            guard_cf_check_function: r.guard_cf_check_function,
            guard_cf_dispatch_function: r.guard_cf_dispatch_function,
            guard_cf_function_table: r.guard_cf_function_table,
            guard_cf_function_count: r.guard_cf_function_count,
            guard_flags: r.guard_flags,
        }
    }
}

fn read_padded<T: Unpacker>(view: &ImageView, rva: u32) -> Result<T, VpeObjectError> {
    let declared = view.int::<u32>(rva)?;
    let available = declared.min(T::SIZE as u32);
    let bytes = view.bytes(rva, available)?;
    debug!("load config at {:#x}: {} bytes declared, {} read", rva, declared, available);

    let mut buf = vec![0u8; T::SIZE];
    buf[..bytes.len()].copy_from_slice(bytes);
    T::unpack(&buf).map(|(v, _)| v).or(Err(VpeObjectError::new(
        ErrorKind::Malformed,
        format!("short load config at {:#x}", rva))))
}

impl LoadConfig {
    pub(crate) fn parse(view: &ImageView, rva: u32, pe32_plus: bool) ->
        Result<Self, VpeObjectError>
    {
        if pe32_plus {
            read_padded::<LoadConfig64>(view, rva).map(LoadConfig::from)
        } else {
            read_padded::<LoadConfig32>(view, rva).map(LoadConfig::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::import::tests::flat_section;
    use crate::load_config::LoadConfig;
    use crate::rva::ImageView;

    #[test]
    fn short_record_is_zero_padded() {
        let data: &[u8] = &[
            0x10, 0, 0, 0,              // size = 16
            0x44, 0x33, 0x22, 0x11,     // time_date_stamp
            1, 0,                       // major_version
            2, 0,                       // minor_version
            0xaa, 0, 0, 0,              // global_flags_clear
            0xff, 0xff, 0xff, 0xff,     // past the declared size
        ];
        let sections = flat_section(data.len() as u32);
        let view = ImageView { file: data, sections: &sections };
        for plus in [false, true] {
            let lc = LoadConfig::parse(&view, 0x1000, plus).unwrap();
            assert_eq!(lc.size, 16);
            assert_eq!(lc.time_date_stamp, 0x11223344);
            assert_eq!(lc.major_version, 1);
            assert_eq!(lc.minor_version, 2);
            assert_eq!(lc.global_flags_clear, 0xaa);
            assert_eq!(lc.global_flags_set, 0);
            assert_eq!(lc.security_cookie, 0);
        }
    }

    #[test]
    fn pe32_plus_field_order() {
        let mut data = vec![0u8; 148];
        data[0] = 148;                  // size
        data[0x40] = 0x0f;              // process_affinity_mask
        data[0x48] = 0x02;              // process_heap_flags
        data[0x50..0x58].copy_from_slice(&0x1_4000_2000u64.to_le_bytes()); // edit_list
        data[0x58..0x60].copy_from_slice(&0x1_4000_3000u64.to_le_bytes()); // security_cookie
        data[0x90] = 0x00;
        data[0x91] = 0x01;              // guard_flags = 0x100
        let sections = flat_section(data.len() as u32);
        let view = ImageView { file: &data, sections: &sections };
        let lc = LoadConfig::parse(&view, 0x1000, true).unwrap();
        assert_eq!(lc.process_affinity_mask, 0x0f);
        assert_eq!(lc.process_heap_flags, 2);
        assert_eq!(lc.edit_list, 0x1_4000_2000);
        assert_eq!(lc.security_cookie, 0x1_4000_3000);
        assert_eq!(lc.guard_flags, 0x100);
    }

    #[test]
    fn larger_declared_size_reads_known_prefix() {
        let mut data = vec![0u8; 0x100];
        data[0] = 0xf0;                 // newer layout, larger than known
        data[0x3c] = 7;                 // security_cookie
        let sections = flat_section(data.len() as u32);
        let view = ImageView { file: &data, sections: &sections };
        let lc = LoadConfig::parse(&view, 0x1000, false).unwrap();
        assert_eq!(lc.size, 0xf0);
        assert_eq!(lc.security_cookie, 7);
    }
}
