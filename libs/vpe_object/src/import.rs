use log::trace;
use stpack::Unpacker;

use crate::err::VpeObjectError;
use crate::raw::buffer::{cstr_at, get_at, int_at};
use crate::raw::directory::ImportDirectoryRecord;
use crate::rva::ImageView;

/// One slot of an import lookup or address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportedSymbol<'a> {
    Ordinal(u16),
    Name {
        hint: u16,
        name: &'a [u8],
    },
}

/// Reads a hint/name table entry: 2-byte hint followed by a NUL-terminated name.
pub(crate) fn hint_name<'a>(view: &ImageView<'a>, rva: u32) ->
    Result<(u16, &'a [u8]), VpeObjectError>
{
    let offset = view.offset(rva)?;
    let hint = int_at::<u16>(view.file, offset)?;
    let name = cstr_at(view.file, offset + 2)?;
    Ok((hint, name))
}

/// Zero-terminated array of 32- or 64-bit lookup entries.
pub struct ImportedSymbols<'a> {
    view: ImageView<'a>,
    offset: u64,
    width: u8,
    done: bool,
}

impl<'a> ImportedSymbols<'a> {
    pub(crate) fn new(view: ImageView<'a>, rva: u32, width: u8) ->
        Result<Self, VpeObjectError>
    {
        Ok(Self {
            view,
            offset: view.offset(rva)?,
            width,
            done: false,
        })
    }

    fn read(&mut self) -> Result<Option<ImportedSymbol<'a>>, VpeObjectError> {
        let (entry, ordinal_flag) = if self.width == 8 {
            (int_at::<u64>(self.view.file, self.offset)?, 1u64 << 63)
        } else {
            (u64::from(int_at::<u32>(self.view.file, self.offset)?), 1u64 << 31)
        };
        if entry == 0 {
            return Ok(None);
        }
        self.offset += u64::from(self.width);

        if entry & ordinal_flag != 0 {
            return Ok(Some(ImportedSymbol::Ordinal(entry as u16)));
        }
        let (hint, name) = hint_name(&self.view, (entry & 0x7fff_ffff) as u32)?;
        Ok(Some(ImportedSymbol::Name { hint, name }))
    }
}

impl<'a> Iterator for ImportedSymbols<'a> {
    type Item = Result<ImportedSymbol<'a>, VpeObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(Some(sym)) => Some(Ok(sym)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportEntry<'a> {
    view: ImageView<'a>,
    width: u8,
    pub record: ImportDirectoryRecord,
}

impl<'a> ImportEntry<'a> {
    pub fn name(&self) -> Result<&'a [u8], VpeObjectError> {
        self.view.cstr(self.record.name_rva)
    }

    /// Entries of the import address table. In an unbound image these mirror
    /// the lookup table.
    pub fn imported_symbols(&self) -> Result<ImportedSymbols<'a>, VpeObjectError> {
        ImportedSymbols::new(self.view, self.record.import_address_table_rva, self.width)
    }

    pub fn lookup_table_symbols(&self) -> Result<ImportedSymbols<'a>, VpeObjectError> {
        ImportedSymbols::new(self.view, self.record.import_lookup_table_rva, self.width)
    }
}

/// Import descriptors up to the all-zero terminator or the end of the
/// directory's declared size, whichever comes first.
pub struct ImportDirectory<'a> {
    view: ImageView<'a>,
    offset: u64,
    end: u64,
    width: u8,
    done: bool,
}

impl<'a> ImportDirectory<'a> {
    /// `width` is the address size in bytes, 4 or 8.
    pub(crate) fn new(view: ImageView<'a>, rva: u32, size: u32, width: u8) ->
        Result<Self, VpeObjectError>
    {
        let offset = view.offset(rva)?;
        Ok(Self {
            view,
            offset,
            end: offset + u64::from(size),
            width,
            done: false,
        })
    }
}

impl<'a> Iterator for ImportDirectory<'a> {
    type Item = Result<ImportEntry<'a>, VpeObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.end - self.offset < ImportDirectoryRecord::SIZE as u64 {
            trace!("import directory ends at {:#x} without a terminator", self.offset);
            self.done = true;
            return None;
        }
        let record = match get_at::<ImportDirectoryRecord>(self.view.file, self.offset) {
            Ok(r) => r,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if record.is_null() {
            self.done = true;
            return None;
        }
        trace!("import descriptor at {:#x}", self.offset);
        self.offset += ImportDirectoryRecord::SIZE as u64;
        Some(Ok(ImportEntry {
            view: self.view,
            width: self.width,
            record,
        }))
    }
}
