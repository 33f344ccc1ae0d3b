extern crate stpack;
use log::{debug, warn};
use stpack::Unpacker;

mod err;
mod raw;
mod rva;
mod symtab;

pub mod base_reloc;
pub mod debug;
pub mod delay_import;
pub mod export;
pub mod header;
pub mod import;
pub mod load_config;
pub mod relocation;
pub mod section;
pub mod string_table;
pub mod symbol;
pub mod tls;
pub mod writer;

pub use err::{ErrorKind, VpeObjectError};
pub use raw::header::DataDirectory;
pub use raw::directory::{
    DebugDirectoryEntry,
    DelayImportRecord,
    ExportDirectoryRecord,
    ImportDirectoryRecord,
};
pub use symtab::Symbols;

use base_reloc::BaseRelocs;
use debug::{DebugDirectory, PdbInfo, IMAGE_DEBUG_TYPE_CODEVIEW};
use delay_import::DelayImportDirectory;
use export::ExportDirectory;
use header::{
    DataDirectoryKind,
    FileHeader,
    HeaderKind,
    Machine,
    OptionalHeader,
    OptionalHeaderKind,
};
use import::ImportDirectory;
use load_config::LoadConfig;
use raw::buffer::{bytes_at, get_array_at, get_at};
use raw::header::{
    BigObjHeader,
    CoffFileHeader,
    DosHeader,
    Pe32Header,
    Pe32PlusHeader,
    BIGOBJ_MAGIC,
    BIGOBJ_MIN_VERSION,
    DOS_MAGIC,
    PE32_MAGIC,
    PE32_PLUS_MAGIC,
    PE_MAGIC,
};
use raw::section_header::SectionHeader;
use relocation::{Relocation, Relocations};
use rva::ImageView;
use section::{resolve_section_name, Section};
use string_table::StringTable;
use symbol::{SectionRef, Symbol};
use symtab::SymbolTable;
use tls::TlsDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Drop an unreadable symbol table (and its string table) with a
    /// warning instead of failing the whole load.
    pub recover_symbol_table: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recover_symbol_table: true,
        }
    }
}

fn malformed(message: String) -> VpeObjectError {
    VpeObjectError::new(ErrorKind::Malformed, message)
}

/// Read-only view of an object file or image. Everything borrows from the
/// caller's buffer; data directories are decoded on request.
#[derive(Debug)]
pub struct VpeObject<'a> {
    data: &'a [u8],
    has_dos_header: bool,
    file_header: FileHeader,
    optional_header: Option<OptionalHeader>,
    data_directories: Vec<DataDirectory>,
    sections: Vec<Section<'a>>,
    symtab: SymbolTable<'a>,
}

impl<'a> VpeObject<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, VpeObjectError> {
        Self::from_bytes_with(data, ParseOptions::default())
    }

    pub fn from_bytes_with(data: &'a [u8], options: ParseOptions) -> Result<Self, VpeObjectError> {
        let mut cur: u64 = 0;
        let mut has_pe_header = false;

        if data.len() as u64 >= DosHeader::SIZE as u64 + PE_MAGIC.len() as u64 {
            let dos = get_at::<DosHeader>(data, 0)?;
            if dos.magic == DOS_MAGIC {
                cur = u64::from(dos.new_header_offset);
                let magic = bytes_at(data, cur, PE_MAGIC.len() as u64)?;
                if magic != PE_MAGIC {
                    return Err(malformed(format!(
                        "missing PE signature at {:#x}", cur)));
                }
                cur += PE_MAGIC.len() as u64;
                has_pe_header = true;
            }
        }

        let coff = get_at::<CoffFileHeader>(data, cur)?;
        let mut file_header = None;
        if !has_pe_header
            && Machine::from(coff.machine) == Machine::Unspecified
            && coff.number_of_sections == u16::MAX
        {
            if let Ok(big) = get_at::<BigObjHeader>(data, cur) {
                if big.version >= BIGOBJ_MIN_VERSION && big.uuid == BIGOBJ_MAGIC {
                    debug!("big object header, {} sections", big.number_of_sections);
                    file_header = Some(FileHeader::from_bigobj(&big));
                    cur += BigObjHeader::SIZE as u64;
                }
            }
        }
        let file_header = match file_header {
            Some(h) => h,
            None => {
                if coff.number_of_sections == u16::MAX {
                    return Err(VpeObjectError::new(
                        ErrorKind::Unsupported,
                        "short import library member".to_string()));
                }
                cur += CoffFileHeader::SIZE as u64;
                FileHeader::from_coff(&coff)
            }
        };

        let mut optional_header = None;
        let mut data_directories = Vec::new();
        if has_pe_header {
            let magic = bytes_at(data, cur, 2)?;
            let magic = u16::from_le_bytes([magic[0], magic[1]]);
            let (oh, dir_offset) = match magic {
                PE32_MAGIC => {
                    let h = get_at::<Pe32Header>(data, cur)?;
                    (OptionalHeader::from_record(OptionalHeaderKind::Pe32, &h),
                     cur + Pe32Header::SIZE as u64)
                }
                PE32_PLUS_MAGIC => {
                    let h = get_at::<Pe32PlusHeader>(data, cur)?;
                    (OptionalHeader::from_record(OptionalHeaderKind::Pe32Plus, &h),
                     cur + Pe32PlusHeader::SIZE as u64)
                }
                _ => {
                    return Err(malformed(format!(
                        "unknown optional header magic {:#x}", magic)));
                }
            };
            let dirs = get_array_at::<DataDirectory>(
                data, dir_offset, u64::from(oh.number_of_rva_and_sizes))?;
            data_directories = dirs.iter().collect();
            debug!("{:?} optional header with {} data directories",
                   oh.kind, data_directories.len());
            optional_header = Some(oh);
        }
        if file_header.kind == HeaderKind::Coff {
            cur += u64::from(file_header.size_of_optional_header);
        }

        let headers = get_array_at::<SectionHeader>(
            data, cur, u64::from(file_header.number_of_sections))?;

        let big_object = file_header.kind == HeaderKind::BigObj;
        let symtab = if file_header.pointer_to_symbol_table != 0 {
            match SymbolTable::parse(data, file_header.pointer_to_symbol_table,
                                     file_header.number_of_symbols, big_object) {
                Ok(t) => t,
                Err(e) if options.recover_symbol_table => {
                    warn!("ignoring unreadable symbol table: {}", e);
                    SymbolTable::empty()
                }
                Err(e) => return Err(e),
            }
        } else if file_header.number_of_symbols != 0 {
            return Err(malformed(format!(
                "{} symbols but no symbol table", file_header.number_of_symbols)));
        } else {
            SymbolTable::empty()
        };

        let mut sections = Vec::with_capacity(headers.len());
        for i in 0..headers.len() {
            let (sh, raw) = headers.get(i).zip(headers.raw(i))
                .ok_or(malformed(format!("section header {}", i)))?;
            let raw_name = &raw[..8];
            sections.push(Section::new(i as u32 + 1, raw_name, &sh));
        }

        Ok(Self {
            data,
            has_dos_header: has_pe_header,
            file_header,
            optional_header,
            data_directories,
            sections,
            symtab,
        })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.file_header
    }

    pub fn header_kind(&self) -> HeaderKind {
        self.file_header.kind
    }

    pub fn machine(&self) -> Machine {
        self.file_header.machine
    }

    pub fn optional_header(&self) -> Option<&OptionalHeader> {
        self.optional_header.as_ref()
    }

    pub fn has_dos_header(&self) -> bool {
        self.has_dos_header
    }

    pub fn is_relocatable_object(&self) -> bool {
        self.optional_header.is_none()
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.optional_header.as_ref().map_or(false, OptionalHeader::is_pe32_plus)
    }

    pub fn image_base(&self) -> u64 {
        self.optional_header.as_ref().map_or(0, |h| h.image_base)
    }

    pub fn start_address(&self) -> Option<u32> {
        self.optional_header.as_ref().map(|h| h.address_of_entry_point)
    }

    pub fn bytes_in_address(&self) -> u8 {
        if self.machine().is_64bit() { 8 } else { 4 }
    }

    pub fn file_format_name(&self) -> &'static str {
        match self.machine() {
            Machine::I386 => "VPE-i386",
            Machine::Amd64 => "VPE-x86-64",
            Machine::ArmNt => "VPE-ARM",
            Machine::Arm64 => "VPE-ARM64",
            _ => "VPE-<unknown arch>",
        }
    }

    pub fn sections(&self) -> &[Section<'a>] {
        &self.sections
    }

    /// `index` is 1-based, as in symbol section numbers.
    pub fn section(&self, index: u32) -> Result<&Section<'a>, VpeObjectError> {
        index.checked_sub(1)
            .and_then(|i| self.sections.get(i as usize))
            .ok_or(VpeObjectError::new(
                ErrorKind::OutOfBounds,
                format!("section {} of {}", index, self.sections.len())))
    }

    pub fn section_name(&self, section: &Section<'a>) -> Result<&'a [u8], VpeObjectError> {
        resolve_section_name(section.raw_name, &self.symtab.string_table())
    }

    /// Images keep the real size in `virtual_size` and pad the raw data to
    /// the file alignment; objects only have the raw size.
    pub fn section_size(&self, section: &Section) -> u32 {
        if self.has_dos_header {
            section.virtual_size.min(section.size_of_raw_data)
        } else {
            section.size_of_raw_data
        }
    }

    pub fn section_contents(&self, section: &Section) -> Result<&'a [u8], VpeObjectError> {
        if section.is_virtual() {
            return Ok(&[]);
        }
        bytes_at(self.data, u64::from(section.pointer_to_raw_data),
                 u64::from(self.section_size(section)))
    }

    pub fn section_relocations(&self, section: &Section) -> Result<Relocations<'a>, VpeObjectError> {
        Relocations::parse(self.data, section)
    }

    pub fn string_table(&self) -> StringTable<'a> {
        self.symtab.string_table()
    }

    pub fn number_of_symbols(&self) -> u32 {
        self.symtab.count()
    }

    pub fn symbols(&self) -> Symbols<'a> {
        self.symtab.iter()
    }

    pub fn symbol(&self, index: u32) -> Result<Symbol<'a>, VpeObjectError> {
        self.symtab.symbol(index)
    }

    /// `None` when the relocation names an index past the table.
    pub fn relocation_symbol(&self, reloc: &Relocation) ->
        Result<Option<Symbol<'a>>, VpeObjectError>
    {
        if reloc.symbol_table_index >= self.symtab.count() {
            return Ok(None);
        }
        self.symtab.symbol(reloc.symbol_table_index).map(Some)
    }

    /// `None` for undefined, absolute and debug symbols.
    pub fn symbol_section(&self, sym: &Symbol) -> Result<Option<&Section<'a>>, VpeObjectError> {
        match sym.section {
            SectionRef::Index(i) => self.section(i).map(Some),
            SectionRef::Reserved(_) => Ok(None),
        }
    }

    /// Section-relative symbols add the section RVA and the image base,
    /// wrapping modulo 2^64.
    pub fn symbol_address(&self, sym: &Symbol) -> Result<u64, VpeObjectError> {
        let value = u64::from(sym.value);
        if sym.is_any_undefined() || sym.is_common() {
            return Ok(value);
        }
        match self.symbol_section(sym)? {
            Some(s) => Ok(value
                .wrapping_add(u64::from(s.virtual_address))
                .wrapping_add(self.image_base())),
            None => Ok(value),
        }
    }

    /// Linkers align symbols to the next power of two, capped at 32.
    pub fn symbol_alignment(&self, sym: &Symbol) -> u32 {
        match sym.value {
            0 => 0,
            v if v > 32 => 32,
            v => v.next_power_of_two(),
        }
    }

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    /// `None` when the header has no such slot or the slot is empty.
    pub fn data_directory(&self, kind: DataDirectoryKind) -> Option<DataDirectory> {
        self.data_directories.get(kind.index() as usize)
            .filter(|d| d.virtual_address != 0)
            .copied()
    }

    pub fn rva_to_offset(&self, rva: u32) -> Result<u64, VpeObjectError> {
        rva::rva_to_offset(&self.sections, rva)
    }

    pub fn va_to_offset(&self, va: u64) -> Result<u64, VpeObjectError> {
        rva::va_to_offset(&self.sections, self.image_base(), va)
    }

    pub fn rva_and_size_to_bytes(&self, rva: u32, size: u32) -> Result<&'a [u8], VpeObjectError> {
        rva::rva_and_size_to_bytes(self.data, &self.sections, rva, size)
    }

    fn view(&'a self) -> ImageView<'a> {
        ImageView {
            file: self.data,
            sections: &self.sections,
        }
    }

    pub fn import_directory(&'a self) -> Result<Option<ImportDirectory<'a>>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::Import) {
            Some(d) => ImportDirectory::new(
                self.view(), d.virtual_address, d.size, self.bytes_in_address()).map(Some),
            None => Ok(None),
        }
    }

    pub fn delay_import_directory(&'a self) ->
        Result<Option<DelayImportDirectory<'a>>, VpeObjectError>
    {
        match self.data_directory(DataDirectoryKind::DelayImport) {
            Some(d) => DelayImportDirectory::new(
                self.view(), d.virtual_address, d.size,
                self.bytes_in_address(), self.is_pe32_plus()).map(Some),
            None => Ok(None),
        }
    }

    pub fn export_directory(&'a self) -> Result<Option<ExportDirectory<'a>>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::Export) {
            Some(d) => ExportDirectory::new(self.view(), d.virtual_address, d.size).map(Some),
            None => Ok(None),
        }
    }

    pub fn base_relocs(&self) -> Result<Option<BaseRelocs<'a>>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::BaseRelocation) {
            Some(d) => Ok(Some(BaseRelocs::new(
                self.rva_and_size_to_bytes(d.virtual_address, d.size)?))),
            None => Ok(None),
        }
    }

    pub fn debug_directory(&'a self) -> Result<Option<DebugDirectory<'a>>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::Debug) {
            Some(d) => DebugDirectory::new(self.view(), d.virtual_address, d.size).map(Some),
            None => Ok(None),
        }
    }

    /// The first CodeView entry of the debug directory, decoded.
    pub fn debug_pdb_info(&'a self) -> Result<Option<PdbInfo<'a>>, VpeObjectError> {
        let view = self.view();
        let mut dir = match self.debug_directory()? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        match dir.find(|e| e.typ == IMAGE_DEBUG_TYPE_CODEVIEW) {
            Some(entry) => debug::pdb_info(&view, &entry).map(Some),
            None => Ok(None),
        }
    }

    pub fn tls_directory(&'a self) -> Result<Option<TlsDirectory>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::Tls) {
            Some(d) => TlsDirectory::parse(
                &self.view(), d.virtual_address, d.size, self.is_pe32_plus()).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_config(&'a self) -> Result<Option<LoadConfig>, VpeObjectError> {
        match self.data_directory(DataDirectoryKind::LoadConfig) {
            Some(d) => LoadConfig::parse(&self.view(), d.virtual_address, self.is_pe32_plus())
                .map(Some),
            None => Ok(None),
        }
    }
}
