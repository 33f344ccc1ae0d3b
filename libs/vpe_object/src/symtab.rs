use log::trace;
use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::buffer::bytes_at;
use crate::raw::symbol::{Symbol16, Symbol32, SymbolRecord, SYMBOL_NAME_SIZE};
use crate::string_table::StringTable;
use crate::symbol::{section_number16, SectionRef, StorageClass, Symbol};

/// Fixed-size symbol entries plus the string table behind them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SymbolTable<'a> {
    data: &'a [u8],
    count: u32,
    big_object: bool,
    strtab: StringTable<'a>,
}

impl<'a> SymbolTable<'a> {
    pub(crate) fn empty() -> Self {
        Self {
            data: &[],
            count: 0,
            big_object: false,
            strtab: StringTable::empty(),
        }
    }

    pub(crate) fn entry_size(big_object: bool) -> u64 {
        if big_object {
            Symbol32::SIZE as u64
        } else {
            Symbol16::SIZE as u64
        }
    }

    /// Maps `count` entries at `offset` and the string table right after them.
    pub(crate) fn parse(file: &'a [u8], offset: u32, count: u32, big_object: bool) ->
        Result<Self, VpeObjectError>
    {
        let size = u64::from(count) * Self::entry_size(big_object);
        let data = bytes_at(file, u64::from(offset), size)?;
        let strtab = StringTable::parse(file, u64::from(offset) + size)?;
        Ok(Self {
            data,
            count,
            big_object,
            strtab,
        })
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn string_table(&self) -> StringTable<'a> {
        self.strtab
    }

    fn record(&self, index: u32) -> Result<(&'a [u8], u32, i32, u16, u8, u8), VpeObjectError> {
        if index >= self.count {
            return Err(VpeObjectError::new(
                ErrorKind::OutOfBounds,
                format!("symbol index {} out of range ({} entries)", index, self.count)));
        }
        let esize = Self::entry_size(self.big_object);
        let entry = bytes_at(self.data, u64::from(index) * esize, esize)?;
        let bad = |_| VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("short symbol entry {}", index));
        if self.big_object {
            let (r, _) = Symbol32::unpack(entry).map_err(bad)?;
            Ok((&entry[..SYMBOL_NAME_SIZE], r.value(), r.raw_section_number(),
                r.typ(), r.storage_class(), r.number_of_aux_symbols()))
        } else {
            let (r, _) = Symbol16::unpack(entry).map_err(bad)?;
            Ok((&entry[..SYMBOL_NAME_SIZE], r.value(), section_number16(r.section_number),
                r.typ(), r.storage_class(), r.number_of_aux_symbols()))
        }
    }

    /// Short names are inline; a zero first word means the second word is a
    /// string table offset.
    fn symbol_name(&self, raw: &'a [u8]) -> Result<&'a [u8], VpeObjectError> {
        if raw[..4] == [0, 0, 0, 0] {
            let offset = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
            return self.strtab.get(offset);
        }
        let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
        Ok(&raw[..len])
    }

    pub(crate) fn symbol(&self, index: u32) -> Result<Symbol<'a>, VpeObjectError> {
        let (raw_name, value, section_number, typ, storage_class, aux) = self.record(index)?;

        let first_aux = u64::from(index) + 1;
        if first_aux + u64::from(aux) > u64::from(self.count) {
            return Err(VpeObjectError::new(
                ErrorKind::OutOfBounds,
                format!("symbol {} has {} aux records past the end of the table ({} entries)",
                        index, aux, self.count)));
        }
        let esize = Self::entry_size(self.big_object);
        let aux_data = bytes_at(self.data, first_aux * esize, u64::from(aux) * esize)?;

        Ok(Symbol {
            index,
            name: self.symbol_name(raw_name)?,
            value,
            section: SectionRef::from_number(section_number),
            typ,
            storage_class: StorageClass::from(storage_class),
            number_of_aux_symbols: aux,
            aux_data,
            big_object: self.big_object,
        })
    }

    pub(crate) fn iter(&self) -> Symbols<'a> {
        Symbols {
            table: *self,
            next: 0,
        }
    }
}

/// Walks primary symbol entries, skipping their aux slots.
pub struct Symbols<'a> {
    table: SymbolTable<'a>,
    next: u32,
}

impl<'a> Iterator for Symbols<'a> {
    type Item = Result<Symbol<'a>, VpeObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.table.count {
            return None;
        }
        let index = self.next;
        // Step past the entry even when its name fails to resolve, so one bad
        // name does not end the walk. A bad record or aux count does.
        match self.table.record(index) {
            Ok((_, _, _, _, _, aux)) => {
                self.next = index.saturating_add(1).saturating_add(u32::from(aux));
            }
            Err(e) => {
                self.next = self.table.count;
                return Some(Err(e));
            }
        }
        let r = self.table.symbol(index);
        match &r {
            Ok(sym) => trace!("symbol {} {:?}", index, String::from_utf8_lossy(sym.name)),
            Err(e) if e.kind() == ErrorKind::OutOfBounds => self.next = self.table.count,
            Err(_) => {}
        }
        Some(r)
    }
}
