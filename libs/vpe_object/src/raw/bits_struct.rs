/// Declares a trait of widened getters and two packed record layouts that
/// implement it, one per field-width variant.
#[macro_export]
macro_rules! bits_struct {

    /**** one struct + trait impl ****/

    {@struct $tname:ident,
     $(#[$attr:meta])* $svis:vis struct $sname:ident {
         $($fvis:vis $fname:ident : $ftyp:ty => $fgetter:ident($fgret:ty);)*
     }} => {
        stpack::unpacker! {
            $(#[$attr])*
            $svis struct $sname {
                $($fvis $fname : $ftyp),*
            }
        }

        impl $tname for $sname {
            $(
                fn $fgetter(&self) -> $fgret {
                    <$fgret>::from(self.$fname)
                }
            )*
        }
    };

    /**** entrypoint ****/

    {$(#[$tattr:meta])* $tvis:vis trait $tname:ident { $($tbody:tt)* }
     {
         $(#[$attr1:meta])* $svis1:vis struct $sname1:ident;
         $(#[$attr2:meta])* $svis2:vis struct $sname2:ident;
     }
     {
         $($fvis:vis $fname:ident : {$ftyp1:ty, $ftyp2:ty $(,)?} $fgetter:ident($fgret:ty);)*
     }} => {
        $(#[$tattr])*
        $tvis trait $tname {
            $(fn $fgetter(&self) -> $fgret;)*
            $($tbody)*
        }

        $crate::bits_struct!{
            @struct $tname,
            $(#[$attr1])* $svis1 struct $sname1 {
                $($fvis $fname : $ftyp1 => $fgetter($fgret);)*
            }
        }

        $crate::bits_struct!{
            @struct $tname,
            $(#[$attr2])* $svis2 struct $sname2 {
                $($fvis $fname : $ftyp2 => $fgetter($fgret);)*
            }
        }
    };
}

/*

Example:
    bits_struct! {
        pub trait Entry { }
        {
            pub struct Entry32;
            pub struct Entry64;
        }
        {
            pub addr: {u32, u64,} addr(u64);
        }
    }

Expands to:
    pub trait Entry {
        fn addr(&self) -> u64;
    }
    pub struct Entry32 {
        pub addr: u32,
    }
    impl Entry for Entry32 {
        fn addr(&self) -> u64 {
            u64::from(self.addr)
        }
    }
    pub struct Entry64 {
        pub addr: u64,
    }
    impl Entry for Entry64 {
        fn addr(&self) -> u64 {
            u64::from(self.addr)
        }
    }
    (plus stpack Unpacker/Packer impls for both structs)

 */
