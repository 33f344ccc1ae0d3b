use stpack::Unpacker;

use crate::err::{ErrorKind, VpeObjectError};
use crate::raw::directory::{TlsDirectory32, TlsDirectory64, TlsDirectoryRecord};
use crate::rva::ImageView;

/// TLS directory, widened to 64-bit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsDirectory {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

impl TlsDirectory {
    fn from_record<R: TlsDirectoryRecord>(r: &R) -> Self {
        Self {
            start_address_of_raw_data: r.start_address_of_raw_data(),
            end_address_of_raw_data: r.end_address_of_raw_data(),
            address_of_index: r.address_of_index(),
            address_of_callbacks: r.address_of_callbacks(),
            size_of_zero_fill: r.size_of_zero_fill(),
            characteristics: r.characteristics(),
        }
    }

    /// The directory size has to match the layout exactly.
    pub(crate) fn parse(view: &ImageView, rva: u32, size: u32, pe32_plus: bool) ->
        Result<Self, VpeObjectError>
    {
        let expected = if pe32_plus { TlsDirectory64::SIZE } else { TlsDirectory32::SIZE };
        if size as usize != expected {
            return Err(VpeObjectError::new(
                ErrorKind::Malformed,
                format!("TLS directory size ({}) is not the expected size ({})",
                        size, expected)));
        }
        if pe32_plus {
            Ok(Self::from_record(&view.get::<TlsDirectory64>(rva)?))
        } else {
            Ok(Self::from_record(&view.get::<TlsDirectory32>(rva)?))
        }
    }
}
