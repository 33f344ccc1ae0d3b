use stpack::{LeBytes, Vec};

pub(crate) mod bits_struct;
pub(crate) mod buffer;
pub(crate) mod directory;
pub(crate) mod header;
pub(crate) mod section_header;
pub(crate) mod symbol;

/// Zero-width field for the layout variant that lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Absent;

impl LeBytes for Absent {
    const WIDTH: usize = 0;

    fn read_le(_data: &[u8]) -> Self {
        Absent
    }

    fn write_le(&self, _out: &mut Vec<u8>) {}
}

impl From<Absent> for Option<u32> {
    fn from(_: Absent) -> Self {
        None
    }
}
