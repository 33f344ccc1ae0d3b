use stpack::Unpacker;

use crate::err::VpeObjectError;
use crate::import::ImportedSymbols;
use crate::raw::buffer::{get_array_at, Records};
use crate::raw::directory::DelayImportRecord;
use crate::rva::ImageView;

#[derive(Debug, Clone, Copy)]
pub struct DelayImportEntry<'a> {
    view: ImageView<'a>,
    width: u8,
    pe32_plus: bool,
    pub index: u32,
    pub record: DelayImportRecord,
}

impl<'a> DelayImportEntry<'a> {
    pub fn name(&self) -> Result<&'a [u8], VpeObjectError> {
        self.view.cstr(self.record.name)
    }

    pub fn imported_symbols(&self) -> Result<ImportedSymbols<'a>, VpeObjectError> {
        ImportedSymbols::new(self.view, self.record.delay_import_name_table, self.width)
    }

    /// The `i`-th slot of the delay-load address table.
    pub fn import_address(&self, i: u32) -> Result<u64, VpeObjectError> {
        let slot: u32 = if self.pe32_plus { 8 } else { 4 };
        let rva = self.record.delay_import_address_table.wrapping_add(i.wrapping_mul(slot));
        if self.pe32_plus {
            self.view.int::<u64>(rva)
        } else {
            self.view.int::<u32>(rva).map(u64::from)
        }
    }
}

/// Delay-load descriptors. The count comes from the directory size; the
/// trailing all-zero descriptor is not yielded.
pub struct DelayImportDirectory<'a> {
    view: ImageView<'a>,
    width: u8,
    pe32_plus: bool,
    records: Records<'a, DelayImportRecord>,
    next: usize,
}

impl<'a> DelayImportDirectory<'a> {
    pub(crate) fn new(view: ImageView<'a>, rva: u32, size: u32, width: u8, pe32_plus: bool) ->
        Result<Self, VpeObjectError>
    {
        let count = (size / DelayImportRecord::SIZE as u32).saturating_sub(1);
        let offset = view.offset(rva)?;
        Ok(Self {
            view,
            width,
            pe32_plus,
            records: get_array_at(view.file, offset, u64::from(count))?,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() == 0
    }
}

impl<'a> Iterator for DelayImportDirectory<'a> {
    type Item = DelayImportEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.get(self.next)?;
        let index = self.next as u32;
        self.next += 1;
        Some(DelayImportEntry {
            view: self.view,
            width: self.width,
            pe32_plus: self.pe32_plus,
            index,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::delay_import::DelayImportDirectory;
    use crate::err::ErrorKind;
    use crate::import::tests::flat_section;
    use crate::import::ImportedSymbol;
    use crate::rva::ImageView;

    const DIDAT: &[u8] = &[
        // 0x00: descriptor
        1, 0, 0, 0,                     // attributes
        0x50, 0x10, 0, 0,               // name
        0, 0, 0, 0,                     // module_handle
        0x40, 0x10, 0, 0,               // delay_import_address_table
        0x48, 0x10, 0, 0,               // delay_import_name_table
        0, 0, 0, 0,                     // bound_delay_import_table
        0, 0, 0, 0,                     // unload_delay_import_table
        0, 0, 0, 0,                     // time_stamp
        // 0x20: terminator
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        // 0x40: address table
        0x78, 0x56, 0x34, 0x12,
        0xef, 0xbe, 0xad, 0xde,
        // 0x48: name table
        0x58, 0x10, 0, 0,
        0, 0, 0, 0,
        // 0x50: dll name
        b'u', b'3', b'2', b'.', b'd', b'l', b'l', 0,
        // 0x58: hint/name
        3, 0, b'M', b'B', 0,
    ];

    #[test]
    fn one_descriptor() {
        let sections = flat_section(DIDAT.len() as u32);
        let view = ImageView { file: DIDAT, sections: &sections };
        let mut dir = DelayImportDirectory::new(view, 0x1000, 0x40, 4, false).unwrap();
        assert_eq!(dir.len(), 1);

        let entry = dir.next().unwrap();
        assert!(dir.next().is_none());
        assert_eq!(entry.index, 0);
        assert_eq!(entry.record.attributes, 1);
        assert_eq!(entry.name().unwrap(), b"u32.dll");
        let syms: Vec<_> = entry.imported_symbols().unwrap()
            .collect::<Result<_, _>>().unwrap();
        assert_eq!(syms, vec![ImportedSymbol::Name { hint: 3, name: b"MB" }]);

        assert_eq!(entry.import_address(0).unwrap(), 0x12345678);
        assert_eq!(entry.import_address(1).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn pe32_plus_address_slots() {
        let sections = flat_section(DIDAT.len() as u32);
        let view = ImageView { file: DIDAT, sections: &sections };
        let entry = DelayImportDirectory::new(view, 0x1000, 0x40, 8, true).unwrap()
            .next().unwrap();
        assert_eq!(entry.import_address(0).unwrap(), 0xdeadbeef_12345678);
        assert_eq!(entry.import_address(0x1000).unwrap_err().kind(), ErrorKind::Unmapped);
    }

    #[test]
    fn small_sizes_yield_nothing() {
        let sections = flat_section(DIDAT.len() as u32);
        let view = ImageView { file: DIDAT, sections: &sections };
        for size in [0, 0x1f, 0x20, 0x3f] {
            let dir = DelayImportDirectory::new(view, 0x1000, size, 4, false).unwrap();
            assert!(dir.is_empty());
        }
    }
}
