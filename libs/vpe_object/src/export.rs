use crate::err::VpeObjectError;
use crate::raw::buffer::int_at;
use crate::raw::directory::ExportDirectoryRecord;
use crate::rva::ImageView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry<'a> {
    pub ordinal: u32,
    pub rva: u32,
    /// Empty when exported by ordinal only.
    pub name: &'a [u8],
    /// Set when `rva` points back into the export directory.
    pub forwarder: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExportDirectory<'a> {
    view: ImageView<'a>,
    dir_rva: u32,
    dir_size: u32,
    pub record: ExportDirectoryRecord,
}

impl<'a> ExportDirectory<'a> {
    pub(crate) fn new(view: ImageView<'a>, dir_rva: u32, dir_size: u32) ->
        Result<Self, VpeObjectError>
    {
        Ok(Self {
            view,
            dir_rva,
            dir_size,
            record: view.get::<ExportDirectoryRecord>(dir_rva)?,
        })
    }

    pub fn dll_name(&self) -> Result<&'a [u8], VpeObjectError> {
        self.view.cstr(self.record.name_rva)
    }

    pub fn ordinal_base(&self) -> u32 {
        self.record.ordinal_base
    }

    pub fn len(&self) -> u32 {
        self.record.address_table_entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn export_rva(&self, index: u32) -> Result<u32, VpeObjectError> {
        let table = self.view.offset(self.record.export_address_table_rva)?;
        int_at::<u32>(self.view.file, table + 4 * u64::from(index))
    }

    /// Scans the ordinal table for `index`; the matching slot of the name
    /// pointer table names the export.
    fn symbol_name(&self, index: u32) -> Result<&'a [u8], VpeObjectError> {
        let count = self.record.number_of_name_pointers;
        if count == 0 {
            return Ok(b"");
        }
        let ordinals = self.view.offset(self.record.ordinal_table_rva)?;
        for slot in 0..u64::from(count) {
            let ordinal = int_at::<u16>(self.view.file, ordinals + 2 * slot)?;
            if u32::from(ordinal) != index {
                continue;
            }
            let names = self.view.offset(self.record.name_pointer_rva)?;
            let name_rva = int_at::<u32>(self.view.file, names + 4 * slot)?;
            return self.view.cstr(name_rva);
        }
        Ok(b"")
    }

    fn is_forwarder(&self, rva: u32) -> bool {
        let rva = u64::from(rva);
        let start = u64::from(self.dir_rva);
        start <= rva && rva < start + u64::from(self.dir_size)
    }

    pub fn entry(&self, index: u32) -> Result<ExportEntry<'a>, VpeObjectError> {
        let rva = self.export_rva(index)?;
        let forwarder = if self.is_forwarder(rva) {
            Some(self.view.cstr(rva)?)
        } else {
            None
        };
        Ok(ExportEntry {
            ordinal: self.record.ordinal_base.wrapping_add(index),
            rva,
            name: self.symbol_name(index)?,
            forwarder,
        })
    }

    pub fn entries(&self) -> ExportEntries<'a> {
        ExportEntries {
            dir: *self,
            next: 0,
        }
    }
}

/// Every slot of the export address table, in ordinal order.
pub struct ExportEntries<'a> {
    dir: ExportDirectory<'a>,
    next: u32,
}

impl<'a> Iterator for ExportEntries<'a> {
    type Item = Result<ExportEntry<'a>, VpeObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.dir.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.dir.entry(index))
    }
}
