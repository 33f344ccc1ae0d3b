use core::marker::PhantomData;

use stpack::{LeBytes, Unpacker};

use crate::err::{ErrorKind, VpeObjectError};

/// Every typed read from the file goes through here.
pub(crate) fn check_offset(data: &[u8], offset: u64, size: u64) -> Result<(), VpeObjectError> {
    match offset.checked_add(size) {
        Some(end) if end <= data.len() as u64 => Ok(()),
        _ => Err(VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("range {:#x}+{:#x} exceeds buffer of {:#x} bytes",
                    offset, size, data.len()))),
    }
}

pub(crate) fn bytes_at(data: &[u8], offset: u64, size: u64) -> Result<&[u8], VpeObjectError> {
    check_offset(data, offset, size)?;
    // both fit in data.len() after the check
    let start = offset as usize;
    Ok(&data[start..(start + size as usize)])
}

pub(crate) fn get_at<T: Unpacker>(data: &[u8], offset: u64) -> Result<T, VpeObjectError> {
    let bytes = bytes_at(data, offset, T::SIZE as u64)?;
    T::unpack(bytes)
        .map(|(v, _)| v)
        .or(Err(VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("short record at {:#x}", offset))))
}

pub(crate) fn int_at<T: LeBytes>(data: &[u8], offset: u64) -> Result<T, VpeObjectError> {
    let bytes = bytes_at(data, offset, T::WIDTH as u64)?;
    Ok(T::read_le(bytes))
}

pub(crate) fn get_array_at<T: Unpacker>(data: &[u8], offset: u64, count: u64) ->
    Result<Records<'_, T>, VpeObjectError>
{
    let size = count.checked_mul(T::SIZE as u64)
        .ok_or(VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("record array of {} entries overflows", count)))?;
    let bytes = bytes_at(data, offset, size)?;
    Ok(Records {
        data: bytes,
        len: count as usize,
        _t: PhantomData,
    })
}

/// NUL-terminated string starting at `offset`. The terminator must be in the buffer.
pub(crate) fn cstr_at(data: &[u8], offset: u64) -> Result<&[u8], VpeObjectError> {
    check_offset(data, offset, 0)?;
    let right = &data[offset as usize..];
    match right.iter().position(|&c| c == 0) {
        Some(len) => Ok(&right[..len]),
        None => Err(VpeObjectError::new(
            ErrorKind::OutOfBounds,
            format!("unterminated string at {:#x}", offset))),
    }
}

/// A bounds-checked run of fixed-size records. Entries are decoded on access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Records<'a, T> {
    data: &'a [u8],
    len: usize,
    _t: PhantomData<T>,
}

impl<'a, T: Unpacker + 'a> Records<'a, T> {
    pub(crate) fn empty() -> Self {
        Self {
            data: &[],
            len: 0,
            _t: PhantomData,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        T::unpack(&self.data[(index * T::SIZE)..]).ok().map(|(v, _)| v)
    }

    /// Undecoded bytes of one record, borrowed from the file.
    pub(crate) fn raw(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.len {
            return None;
        }
        let start = index * T::SIZE;
        Some(&self.data[start..(start + T::SIZE)])
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let data = self.data;
        (0..self.len).filter_map(move |i| {
            T::unpack(&data[(i * T::SIZE)..]).ok().map(|(v, _)| v)
        })
    }
}
