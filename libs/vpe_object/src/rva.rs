use stpack::{LeBytes, Unpacker};

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::buffer::{bytes_at, cstr_at, get_at, int_at};
use crate::section::Section;

/// The file plus its section table; what directory parsers need to follow RVAs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImageView<'a> {
    pub file: &'a [u8],
    pub sections: &'a [Section<'a>],
}

impl<'a> ImageView<'a> {
    pub(crate) fn offset(&self, rva: u32) -> Result<u64, VpeObjectError> {
        rva_to_offset(self.sections, rva)
    }

    pub(crate) fn cstr(&self, rva: u32) -> Result<&'a [u8], VpeObjectError> {
        cstr_at(self.file, self.offset(rva)?)
    }

    pub(crate) fn int<T: LeBytes>(&self, rva: u32) -> Result<T, VpeObjectError> {
        int_at(self.file, self.offset(rva)?)
    }

    pub(crate) fn get<T: Unpacker>(&self, rva: u32) -> Result<T, VpeObjectError> {
        get_at(self.file, self.offset(rva)?)
    }

    pub(crate) fn bytes(&self, rva: u32, size: u32) -> Result<&'a [u8], VpeObjectError> {
        rva_and_size_to_bytes(self.file, self.sections, rva, size)
    }
}

fn covering<'s, 'a>(sections: &'s [Section<'a>], rva: u32) -> Option<&'s Section<'a>> {
    let rva = u64::from(rva);
    sections.iter().find(|s| {
        let start = u64::from(s.virtual_address);
        start <= rva && rva < start + u64::from(s.virtual_size)
    })
}

fn unmapped(rva: u32) -> VpeObjectError {
    VpeObjectError::new(
        ErrorKind::Unmapped,
        format!("rva {:#x} is not covered by any section", rva))
}

/// File offset of `rva`. The first section in table order whose
/// `[virtual_address, virtual_address + virtual_size)` holds it wins.
pub(crate) fn rva_to_offset(sections: &[Section], rva: u32) -> Result<u64, VpeObjectError> {
    let s = covering(sections, rva).ok_or_else(|| unmapped(rva))?;
    Ok(u64::from(s.pointer_to_raw_data) + u64::from(rva - s.virtual_address))
}

pub(crate) fn va_to_offset(sections: &[Section], image_base: u64, va: u64) ->
    Result<u64, VpeObjectError>
{
    let rva = va.checked_sub(image_base)
        .and_then(|r| u32::try_from(r).ok())
        .ok_or(VpeObjectError::new(
            ErrorKind::Unmapped,
            format!("va {:#x} is outside the image based at {:#x}", va, image_base)))?;
    rva_to_offset(sections, rva)
}

/// `size` bytes at `rva`. The whole range must sit inside one section's
/// virtual extent and inside the file.
pub(crate) fn rva_and_size_to_bytes<'a>(
    file: &'a [u8],
    sections: &[Section],
    rva: u32,
    size: u32,
) -> Result<&'a [u8], VpeObjectError> {
    let s = covering(sections, rva).ok_or_else(|| unmapped(rva))?;
    let into = rva - s.virtual_address;
    if size > s.virtual_size - into {
        return Err(VpeObjectError::new(
            ErrorKind::Unmapped,
            format!("rva range {:#x}+{:#x} runs past the end of section {}",
                    rva, size, s.index)));
    }
    bytes_at(file, u64::from(s.pointer_to_raw_data) + u64::from(into), u64::from(size))
}
