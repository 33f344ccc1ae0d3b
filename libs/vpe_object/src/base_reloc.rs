use log::trace;
use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::buffer::{get_at, int_at};
use crate::raw::directory::BaseRelocBlockHeader;

pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
pub const IMAGE_REL_BASED_HIGH: u8 = 1;
pub const IMAGE_REL_BASED_LOW: u8 = 2;
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
pub const IMAGE_REL_BASED_HIGHADJ: u8 = 4;
pub const IMAGE_REL_BASED_ARM_MOV32: u8 = 5;
pub const IMAGE_REL_BASED_THUMB_MOV32: u8 = 7;
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

pub fn base_reloc_type_name(typ: u8) -> &'static str {
    match typ {
        IMAGE_REL_BASED_ABSOLUTE => "ABSOLUTE",
        IMAGE_REL_BASED_HIGH => "HIGH",
        IMAGE_REL_BASED_LOW => "LOW",
        IMAGE_REL_BASED_HIGHLOW => "HIGHLOW",
        IMAGE_REL_BASED_HIGHADJ => "HIGHADJ",
        IMAGE_REL_BASED_ARM_MOV32 => "ARM_MOV32",
        IMAGE_REL_BASED_THUMB_MOV32 => "THUMB_MOV32",
        IMAGE_REL_BASED_DIR64 => "DIR64",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRelocEntry {
    pub page_rva: u32,
    /// High 4 bits of the entry.
    pub typ: u8,
    /// Low 12 bits, relative to `page_rva`.
    pub offset: u16,
}

impl BaseRelocEntry {
    pub fn rva(&self) -> u32 {
        self.page_rva.wrapping_add(u32::from(self.offset))
    }
}

const HEADER_SIZE: u64 = BaseRelocBlockHeader::SIZE as u64;

/// Entries of all blocks in the directory, one after another.
pub struct BaseRelocs<'a> {
    data: &'a [u8],
    block: u64,
    index: u64,
    done: bool,
}

impl<'a> BaseRelocs<'a> {
    /// `data` is the directory's bytes.
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            block: 0,
            index: 0,
            done: false,
        }
    }

    fn read(&mut self) -> Result<Option<BaseRelocEntry>, VpeObjectError> {
        loop {
            if self.block >= self.data.len() as u64 {
                return Ok(None);
            }
            let header = get_at::<BaseRelocBlockHeader>(self.data, self.block)?;
            if header.page_rva == 0 && header.block_size == 0 {
                // zero padding after the last block
                return Ok(None);
            }
            let size = u64::from(header.block_size);
            if size < HEADER_SIZE || size % 2 != 0 || self.block + size > self.data.len() as u64 {
                return Err(VpeObjectError::new(
                    ErrorKind::Malformed,
                    format!("base relocation block at {:#x} has size {:#x}",
                            self.block, size)));
            }

            let pos = HEADER_SIZE + 2 * self.index;
            if pos >= size {
                self.block += size;
                self.index = 0;
                continue;
            }
            if self.index == 0 {
                trace!("base relocation block for page {:#x}, {} entries",
                       header.page_rva, (size - HEADER_SIZE) / 2);
            }
            let raw = int_at::<u16>(self.data, self.block + pos)?;
            self.index += 1;
            return Ok(Some(BaseRelocEntry {
                page_rva: header.page_rva,
                typ: (raw >> 12) as u8,
                offset: raw & 0x0fff,
            }));
        }
    }
}

impl<'a> Iterator for BaseRelocs<'a> {
    type Item = Result<BaseRelocEntry, VpeObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(Some(e)) => Some(Ok(e)),
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
