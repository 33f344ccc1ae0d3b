#![no_std]

extern crate alloc;

#[doc(hidden)]
pub use alloc::vec::Vec;

/// A fixed-width little-endian field.
pub trait LeBytes: Sized {
    const WIDTH: usize;

    /// `data` must hold at least `WIDTH` bytes.
    fn read_le(data: &[u8]) -> Self;
    fn write_le(&self, out: &mut Vec<u8>);
}

pub trait Unpacker: Sized {
    const SIZE: usize;

    fn unpack(data: &[u8]) -> Result<(Self, &[u8]), ()>;
}

pub trait Packer {
    fn pack(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack(&mut out);
        out
    }
}

macro_rules! le_int {
    ($($t:ty),*) => {
        $(
            impl LeBytes for $t {
                const WIDTH: usize = core::mem::size_of::<$t>();

                fn read_le(data: &[u8]) -> Self {
                    let mut buf = [0u8; core::mem::size_of::<$t>()];
                    buf.copy_from_slice(&data[..Self::WIDTH]);
                    <$t>::from_le_bytes(buf)
                }

                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

le_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<const N: usize> LeBytes for [u8; N] {
    const WIDTH: usize = N;

    fn read_le(data: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&data[..N]);
        buf
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

/// Declares a packed little-endian record and implements `Unpacker` and
/// `Packer` for it. Fields are laid out in declaration order, no padding.
#[macro_export]
macro_rules! unpacker {
    {$(#[$attr:meta])* $svis:vis struct $stname:ident {
        $($fvis:vis $fname:ident : $ftyp:ty),* $(,)?
    }} => {
        $(#[$attr])*
        $svis struct $stname {
            $($fvis $fname: $ftyp,)*
        }

        impl $crate::Unpacker for $stname {
            const SIZE: usize = 0 $(+ <$ftyp as $crate::LeBytes>::WIDTH)*;

            fn unpack(data: &[u8]) -> Result<(Self, &[u8]), ()> {
                if data.len() < <Self as $crate::Unpacker>::SIZE {
                    return Err(());
                }
                let (head, right) = data.split_at(<Self as $crate::Unpacker>::SIZE);
                let mut _off = 0usize;
                $(
                    let $fname = <$ftyp as $crate::LeBytes>::read_le(&head[_off..]);
                    _off += <$ftyp as $crate::LeBytes>::WIDTH;
                )*
                Ok((Self { $($fname,)* }, right))
            }
        }

        impl $crate::Packer for $stname {
            fn pack(&self, out: &mut $crate::Vec<u8>) {
                $(
                    $crate::LeBytes::write_le(&self.$fname, out);
                )*
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Packer, Unpacker};
    use alloc::vec;
    use alloc::vec::Vec;

    unpacker! {
        #[derive(PartialEq, Eq, Debug)]
        struct Foo {
            foo: u8,
            bar: u16,
            baz: u32,
        }
    }

    unpacker! {
        #[derive(PartialEq, Eq, Debug)]
        pub struct Bar {
            pub tag: [u8; 4],
            pub signed: i16,
            pub wide: u64,
        }
    }

    #[test]
    fn foo_size() {
        assert_eq!(Foo::SIZE, 7);
        assert_eq!(Bar::SIZE, 14);
    }

    #[test]
    fn foo_le() {
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(
            Foo::unpack(&data),
            Ok((
                Foo {
                    foo: 0x00,
                    bar: 0x0201,
                    baz: 0x06050403,
                },
                &[7u8, 8u8, 9u8] as &[u8]
            ))
        );
    }

    #[test]
    fn short_input() {
        assert_eq!(Foo::unpack(&[0; 6]), Err(()));
        assert_eq!(Foo::unpack(&[]), Err(()));
    }

    #[test]
    fn array_and_signed() {
        let data: &[u8] = &[
            b'R', b'S', b'D', b'S',     // tag
            0xfe, 0xff,                 // signed = -2
            1, 0, 0, 0, 0, 0, 0, 0x80,  // wide
        ];
        let (bar, rest) = Bar::unpack(data).unwrap();
        assert_eq!(rest, &[] as &[u8]);
        assert_eq!(bar.tag, *b"RSDS");
        assert_eq!(bar.signed, -2);
        assert_eq!(bar.wide, 0x8000_0000_0000_0001);
    }

    #[test]
    fn pack_matches_layout() {
        let foo = Foo { foo: 0xaa, bar: 0x1234, baz: 0xdeadbeef };
        assert_eq!(
            foo.to_bytes(),
            vec![0xaa, 0x34, 0x12, 0xef, 0xbe, 0xad, 0xde]
        );
        let (back, _) = Foo::unpack(&foo.to_bytes()).unwrap();
        assert_eq!(back, foo);
    }
}
