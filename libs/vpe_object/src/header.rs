use bitflags::bitflags;

use crate::raw::header::{
    BigObjHeader,
    CoffFileHeader,
    OptionalHeaderRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    /// Machine field 0; applies to any target.
    Unspecified,
    I386,
    Amd64,
    Arm,
    ArmNt,
    Arm64,
    Ia64,
    RiscV64,
    Unknown(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => Machine::Unspecified,
            0x014c => Machine::I386,
            0x8664 => Machine::Amd64,
            0x01c0 => Machine::Arm,
            0x01c4 => Machine::ArmNt,
            0xaa64 => Machine::Arm64,
            0x0200 => Machine::Ia64,
            0x5064 => Machine::RiscV64,
            m => Machine::Unknown(m),
        }
    }
}

impl From<Machine> for u16 {
    fn from(machine: Machine) -> Self {
        match machine {
            Machine::Unspecified => 0x0000,
            Machine::I386 => 0x014c,
            Machine::Amd64 => 0x8664,
            Machine::Arm => 0x01c0,
            Machine::ArmNt => 0x01c4,
            Machine::Arm64 => 0xaa64,
            Machine::Ia64 => 0x0200,
            Machine::RiscV64 => 0x5064,
            Machine::Unknown(m) => m,
        }
    }
}

impl Machine {
    pub fn is_64bit(&self) -> bool {
        matches!(self, Machine::Amd64 | Machine::Arm64)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED = 0x0001;
        const EXECUTABLE_IMAGE = 0x0002;
        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;
        const LARGE_ADDRESS_AWARE = 0x0020;
        const BYTES_REVERSED_LO = 0x0080;
        const MACHINE_32BIT = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;
        const DLL = 0x2000;
        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DllCharacteristics: u16 {
        const HIGH_ENTROPY_VA = 0x0020;
        const DYNAMIC_BASE = 0x0040;
        const FORCE_INTEGRITY = 0x0080;
        const NX_COMPAT = 0x0100;
        const NO_ISOLATION = 0x0200;
        const NO_SEH = 0x0400;
        const NO_BIND = 0x0800;
        const APPCONTAINER = 0x1000;
        const WDM_DRIVER = 0x2000;
        const GUARD_CF = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// Which primary header layout the container uses. Decided once at load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Coff,
    BigObj,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: HeaderKind,
    pub machine: Machine,
    pub number_of_sections: u32,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: FileCharacteristics,
}

impl FileHeader {
    pub(crate) fn from_coff(h: &CoffFileHeader) -> Self {
        Self {
            kind: HeaderKind::Coff,
            machine: Machine::from(h.machine),
            number_of_sections: u32::from(h.number_of_sections),
            time_date_stamp: h.time_date_stamp,
            pointer_to_symbol_table: h.pointer_to_symbol_table,
            number_of_symbols: h.number_of_symbols,
            size_of_optional_header: h.size_of_optional_header,
            characteristics: FileCharacteristics::from_bits_retain(h.characteristics),
        }
    }

    pub(crate) fn from_bigobj(h: &BigObjHeader) -> Self {
        Self {
            kind: HeaderKind::BigObj,
            machine: Machine::from(h.machine),
            number_of_sections: h.number_of_sections,
            time_date_stamp: h.time_date_stamp,
            pointer_to_symbol_table: h.pointer_to_symbol_table,
            number_of_symbols: h.number_of_symbols,
            size_of_optional_header: 0,
            characteristics: FileCharacteristics::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalHeaderKind {
    Pe32,
    Pe32Plus,
}

/// PE32 and PE32+ optional header, widened to the larger field sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    pub kind: OptionalHeaderKind,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: Option<u32>,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: DllCharacteristics,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    pub(crate) fn from_record<R: OptionalHeaderRecord>(kind: OptionalHeaderKind, r: &R) -> Self {
        Self {
            kind,
            major_linker_version: r.major_linker_version(),
            minor_linker_version: r.minor_linker_version(),
            size_of_code: r.size_of_code(),
            size_of_initialized_data: r.size_of_initialized_data(),
            size_of_uninitialized_data: r.size_of_uninitialized_data(),
            address_of_entry_point: r.address_of_entry_point(),
            base_of_code: r.base_of_code(),
            base_of_data: r.base_of_data(),
            image_base: r.image_base(),
            section_alignment: r.section_alignment(),
            file_alignment: r.file_alignment(),
            major_operating_system_version: r.major_operating_system_version(),
            minor_operating_system_version: r.minor_operating_system_version(),
            major_image_version: r.major_image_version(),
            minor_image_version: r.minor_image_version(),
            major_subsystem_version: r.major_subsystem_version(),
            minor_subsystem_version: r.minor_subsystem_version(),
            win32_version_value: r.win32_version_value(),
            size_of_image: r.size_of_image(),
            size_of_headers: r.size_of_headers(),
            checksum: r.checksum(),
            subsystem: r.subsystem(),
            dll_characteristics: DllCharacteristics::from_bits_retain(r.dll_characteristics()),
            size_of_stack_reserve: r.size_of_stack_reserve(),
            size_of_stack_commit: r.size_of_stack_commit(),
            size_of_heap_reserve: r.size_of_heap_reserve(),
            size_of_heap_commit: r.size_of_heap_commit(),
            loader_flags: r.loader_flags(),
            number_of_rva_and_sizes: r.number_of_rva_and_sizes(),
        }
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.kind == OptionalHeaderKind::Pe32Plus
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirectoryKind {
    Export,
    Import,
    Resource,
    Exception,
    Certificate,
    BaseRelocation,
    Debug,
    Architecture,
    GlobalPtr,
    Tls,
    LoadConfig,
    BoundImport,
    Iat,
    DelayImport,
    ClrRuntime,
    Reserved,
}

impl DataDirectoryKind {
    pub const ALL: [DataDirectoryKind; 16] = [
        DataDirectoryKind::Export,
        DataDirectoryKind::Import,
        DataDirectoryKind::Resource,
        DataDirectoryKind::Exception,
        DataDirectoryKind::Certificate,
        DataDirectoryKind::BaseRelocation,
        DataDirectoryKind::Debug,
        DataDirectoryKind::Architecture,
        DataDirectoryKind::GlobalPtr,
        DataDirectoryKind::Tls,
        DataDirectoryKind::LoadConfig,
        DataDirectoryKind::BoundImport,
        DataDirectoryKind::Iat,
        DataDirectoryKind::DelayImport,
        DataDirectoryKind::ClrRuntime,
        DataDirectoryKind::Reserved,
    ];

    pub fn index(&self) -> u32 {
        match self {
            DataDirectoryKind::Export => 0,
            DataDirectoryKind::Import => 1,
            DataDirectoryKind::Resource => 2,
            DataDirectoryKind::Exception => 3,
            DataDirectoryKind::Certificate => 4,
            DataDirectoryKind::BaseRelocation => 5,
            DataDirectoryKind::Debug => 6,
            DataDirectoryKind::Architecture => 7,
            DataDirectoryKind::GlobalPtr => 8,
            DataDirectoryKind::Tls => 9,
            DataDirectoryKind::LoadConfig => 10,
            DataDirectoryKind::BoundImport => 11,
            DataDirectoryKind::Iat => 12,
            DataDirectoryKind::DelayImport => 13,
            DataDirectoryKind::ClrRuntime => 14,
            DataDirectoryKind::Reserved => 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::header::{
        DataDirectoryKind,
        FileCharacteristics,
        FileHeader,
        HeaderKind,
        Machine,
    };
    use crate::raw::header::CoffFileHeader;

    #[test]
    fn machine_roundtrip() {
        for m in [0u16, 0x14c, 0x8664, 0x1c0, 0x1c4, 0xaa64, 0x200, 0x5064, 0x1234] {
            assert_eq!(u16::from(Machine::from(m)), m);
        }
        assert_eq!(Machine::from(0x1234), Machine::Unknown(0x1234));
        assert!(Machine::Amd64.is_64bit());
        assert!(!Machine::I386.is_64bit());
    }

    #[test]
    fn file_header_keeps_unknown_characteristics() {
        let raw = CoffFileHeader {
            machine: 0x8664,
            number_of_sections: 3,
            time_date_stamp: 0,
            pointer_to_symbol_table: 0x200,
            number_of_symbols: 9,
            size_of_optional_header: 0,
            characteristics: 0x0022 | 0x0040,
        };
        let h = FileHeader::from_coff(&raw);
        assert_eq!(h.kind, HeaderKind::Coff);
        assert_eq!(h.machine, Machine::Amd64);
        assert_eq!(h.number_of_sections, 3);
        assert!(h.characteristics.contains(FileCharacteristics::EXECUTABLE_IMAGE));
        assert_eq!(h.characteristics.bits(), 0x0062);
    }

    #[test]
    fn directory_indices_are_dense() {
        for (i, kind) in DataDirectoryKind::ALL.iter().enumerate() {
            assert_eq!(kind.index() as usize, i);
        }
    }
}
