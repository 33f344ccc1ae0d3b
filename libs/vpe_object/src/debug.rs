use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::buffer::{get_array_at, Records};
use crate::raw::directory::{CodeViewPdb70Header, DebugDirectoryEntry, CODEVIEW_PDB70_SIGNATURE};
use crate::rva::ImageView;

pub const IMAGE_DEBUG_TYPE_UNKNOWN: u32 = 0;
pub const IMAGE_DEBUG_TYPE_COFF: u32 = 1;
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_FPO: u32 = 3;
pub const IMAGE_DEBUG_TYPE_MISC: u32 = 4;
pub const IMAGE_DEBUG_TYPE_EXCEPTION: u32 = 5;
pub const IMAGE_DEBUG_TYPE_FIXUP: u32 = 6;
pub const IMAGE_DEBUG_TYPE_BORLAND: u32 = 9;
pub const IMAGE_DEBUG_TYPE_REPRO: u32 = 16;
pub const IMAGE_DEBUG_TYPE_EX_DLLCHARACTERISTICS: u32 = 20;

pub fn debug_type_name(typ: u32) -> &'static str {
    match typ {
        IMAGE_DEBUG_TYPE_UNKNOWN => "unknown",
        IMAGE_DEBUG_TYPE_COFF => "COFF",
        IMAGE_DEBUG_TYPE_CODEVIEW => "CodeView",
        IMAGE_DEBUG_TYPE_FPO => "FPO",
        IMAGE_DEBUG_TYPE_MISC => "misc",
        IMAGE_DEBUG_TYPE_EXCEPTION => "exception",
        IMAGE_DEBUG_TYPE_FIXUP => "fixup",
        IMAGE_DEBUG_TYPE_BORLAND => "Borland",
        IMAGE_DEBUG_TYPE_REPRO => "repro",
        IMAGE_DEBUG_TYPE_EX_DLLCHARACTERISTICS => "extended DLL characteristics",
        _ => "other",
    }
}

/// Fixed 28-byte entries; the directory size must be a multiple of that.
pub struct DebugDirectory<'a> {
    records: Records<'a, DebugDirectoryEntry>,
    next: usize,
}

impl<'a> DebugDirectory<'a> {
    pub(crate) fn new(view: ImageView<'a>, rva: u32, size: u32) -> Result<Self, VpeObjectError> {
        let esize = DebugDirectoryEntry::SIZE as u32;
        if size % esize != 0 {
            return Err(VpeObjectError::new(
                ErrorKind::Malformed,
                format!("debug directory size {:#x} is not a multiple of {}", size, esize)));
        }
        let offset = view.offset(rva)?;
        Ok(Self {
            records: get_array_at(view.file, offset, u64::from(size / esize))?,
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

impl<'a> Iterator for DebugDirectory<'a> {
    type Item = DebugDirectoryEntry;

    fn next(&mut self) -> Option<DebugDirectoryEntry> {
        let e = self.records.get(self.next)?;
        self.next += 1;
        Some(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbInfo<'a> {
    pub signature: [u8; 4],
    pub guid: [u8; 16],
    pub age: u32,
    /// Up to the first NUL; padding after it is dropped.
    pub path: &'a [u8],
}

impl<'a> PdbInfo<'a> {
    pub fn is_pdb70(&self) -> bool {
        self.signature == CODEVIEW_PDB70_SIGNATURE
    }
}

/// Decodes the CodeView record an entry points at.
pub(crate) fn pdb_info<'a>(view: &ImageView<'a>, entry: &DebugDirectoryEntry) ->
    Result<PdbInfo<'a>, VpeObjectError>
{
    let bytes = view.bytes(entry.address_of_raw_data, entry.size_of_data)?;
    if bytes.len() < CodeViewPdb70Header::SIZE + 1 {
        return Err(VpeObjectError::new(
            ErrorKind::Malformed,
            format!("CodeView record of {} bytes is too short", bytes.len())));
    }
    let (header, rest) = CodeViewPdb70Header::unpack(bytes).or(Err(VpeObjectError::new(
        ErrorKind::Malformed,
        "short CodeView header".to_string())))?;
    let len = rest.iter().position(|&c| c == 0).unwrap_or(rest.len());
    Ok(PdbInfo {
        signature: header.signature,
        guid: header.guid,
        age: header.age,
        path: &rest[..len],
    })
}
