use log::debug;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::buffer::{bytes_at, int_at};

const SIZE_FIELD: u32 = 4;

/// Long-name table following the symbol table. Starts with its own
/// little-endian byte size, which includes the size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringTable<'a> {
    data: &'a [u8],
}

impl<'a> StringTable<'a> {
    pub fn empty() -> Self {
        Self {
            data: &[0, 0, 0, 0],
        }
    }

    pub fn parse(file: &'a [u8], offset: u64) -> Result<Self, VpeObjectError> {
        let declared = int_at::<u32>(file, offset)?;
        bytes_at(file, offset, u64::from(declared))?;

        // Some producers write 0 instead of 4 for an empty table.
        let size = declared.max(SIZE_FIELD);
        let data = bytes_at(file, offset, u64::from(size))?;
        if size > SIZE_FIELD && data[(size - 1) as usize] != 0 {
            return Err(VpeObjectError::new(
                ErrorKind::Malformed,
                format!("string table at {:#x} is not NUL terminated (size {:#x})",
                        offset, size)));
        }

        debug!("string table at {:#x}, {} bytes (declared {})", offset, size, declared);
        Ok(Self {
            data,
        })
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.size() <= SIZE_FIELD
    }

    pub fn get(&self, offset: u32) -> Result<&'a [u8], VpeObjectError> {
        if offset < SIZE_FIELD {
            return Err(VpeObjectError::new(
                ErrorKind::InvalidOffset,
                format!("string table offset {} points into the size field", offset)));
        }
        if offset >= self.size() {
            return Err(VpeObjectError::new(
                ErrorKind::UnexpectedEnd,
                format!("string table offset {:#x} beyond table size {:#x}",
                        offset, self.size())));
        }
        let right = &self.data[offset as usize..];
        let len = right.iter().position(|&c| c == 0).unwrap_or(right.len());
        Ok(&right[..len])
    }
}

fn base64_value(c: u8) -> Option<u64> {
    match c {
        b'A'..=b'Z' => Some(u64::from(c - b'A')),
        b'a'..=b'z' => Some(u64::from(c - b'a') + 26),
        b'0'..=b'9' => Some(u64::from(c - b'0') + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Decodes the digits after `//` in a section name.
pub fn decode_base64_offset(digits: &[u8]) -> Result<u32, VpeObjectError> {
    if digits.len() > 6 {
        return Err(VpeObjectError::new(
            ErrorKind::Malformed,
            format!("base-64 section name offset has {} digits", digits.len())));
    }

    let mut value: u64 = 0;
    for &c in digits {
        let v = base64_value(c).ok_or(VpeObjectError::new(
            ErrorKind::Malformed,
            format!("invalid base-64 digit {:?} in section name", c as char)))?;
        value = value * 64 + v;
    }

    u32::try_from(value).or(Err(VpeObjectError::new(
        ErrorKind::Malformed,
        format!("base-64 section name offset {:#x} exceeds 32 bits", value))))
}

pub fn encode_base64_offset(mut offset: u32) -> [u8; 6] {
    let mut out = [b'A'; 6];
    for slot in out.iter_mut().rev() {
        *slot = BASE64_ALPHABET[(offset % 64) as usize];
        offset /= 64;
    }
    out
}

/// Decodes the digits after a single `/` in a section name.
pub fn decode_decimal_offset(digits: &[u8]) -> Result<u32, VpeObjectError> {
    let invalid = || VpeObjectError::new(
        ErrorKind::Malformed,
        format!("invalid decimal section name offset {:?}",
                String::from_utf8_lossy(digits)));

    if digits.is_empty() {
        return Err(invalid());
    }
    let mut value: u32 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return Err(invalid());
        }
        value = value.checked_mul(10)
            .and_then(|v| v.checked_add(u32::from(c - b'0')))
            .ok_or_else(invalid)?;
    }
    Ok(value)
}
