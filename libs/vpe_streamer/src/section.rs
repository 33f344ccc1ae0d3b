use vpe_object::section::SectionCharacteristics;

use crate::fixup::Fixup;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub(crate) usize);

impl SectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    ReadOnly,
    Data,
}

pub fn section_kind(characteristics: SectionCharacteristics) -> SectionKind {
    if characteristics.contains(SectionCharacteristics::MEM_EXECUTE) {
        SectionKind::Text
    } else if characteristics.contains(SectionCharacteristics::MEM_READ)
        && !characteristics.contains(SectionCharacteristics::MEM_WRITE)
    {
        SectionKind::ReadOnly
    } else {
        SectionKind::Data
    }
}

pub fn is_implicitly_discardable(name: &str) -> bool {
    name.starts_with(".debug")
}

/// COMDAT selection kinds, with their on-disk codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComdatSelection {
    NoDuplicates,
    Any,
    SameSize,
    ExactMatch,
    Associative,
    Largest,
    Newest,
}

impl ComdatSelection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "one_only" => Some(ComdatSelection::NoDuplicates),
            "discard" => Some(ComdatSelection::Any),
            "same_size" => Some(ComdatSelection::SameSize),
            "same_contents" => Some(ComdatSelection::ExactMatch),
            "associative" => Some(ComdatSelection::Associative),
            "largest" => Some(ComdatSelection::Largest),
            "newest" => Some(ComdatSelection::Newest),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ComdatSelection::NoDuplicates => 1,
            ComdatSelection::Any => 2,
            ComdatSelection::SameSize => 3,
            ComdatSelection::ExactMatch => 4,
            ComdatSelection::Associative => 5,
            ComdatSelection::Largest => 6,
            ComdatSelection::Newest => 7,
        }
    }
}

// intermediate flag-string state
const ALLOC: u32 = 1 << 0;
const CODE: u32 = 1 << 1;
const LOAD: u32 = 1 << 2;
const INIT_DATA: u32 = 1 << 3;
const SHARED: u32 = 1 << 4;
const NO_LOAD: u32 = 1 << 5;
const NO_READ: u32 = 1 << 6;
const NO_WRITE: u32 = 1 << 7;
const DISCARDABLE: u32 = 1 << 8;

/// Translates a `.section` flag string such as `"dr"` into characteristics.
///
/// `b` bss, `d` data, `n` not loaded, `D` discardable, `r` read-only,
/// `s` shared, `w` writable, `x` executable, `y` not readable. `a` is
/// accepted and ignored. An empty string means initialized data.
pub fn parse_section_flags(name: &str, flags: &str) -> Result<SectionCharacteristics, String> {
    let mut f: u32 = 0;
    let mut read_only_removed = false;

    for c in flags.chars() {
        match c {
            'a' => {}
            'b' => {
                f |= ALLOC;
                if f & INIT_DATA != 0 {
                    return Err("conflicting section flags 'b' and 'd'.".to_string());
                }
                f &= !LOAD;
            }
            'd' => {
                f |= INIT_DATA;
                if f & ALLOC != 0 {
                    return Err("conflicting section flags 'b' and 'd'.".to_string());
                }
                f &= !NO_WRITE;
                if f & NO_LOAD == 0 {
                    f |= LOAD;
                }
            }
            'n' => {
                f |= NO_LOAD;
                f &= !LOAD;
            }
            'D' => f |= DISCARDABLE,
            'r' => {
                read_only_removed = false;
                f |= NO_WRITE;
                if f & CODE == 0 {
                    f |= INIT_DATA;
                }
                if f & NO_LOAD == 0 {
                    f |= LOAD;
                }
            }
            's' => {
                f |= SHARED | INIT_DATA;
                f &= !NO_WRITE;
                if f & NO_LOAD == 0 {
                    f |= LOAD;
                }
            }
            'w' => {
                f &= !NO_WRITE;
                read_only_removed = true;
            }
            'x' => {
                f |= CODE;
                if f & NO_LOAD == 0 {
                    f |= LOAD;
                }
                if !read_only_removed {
                    f |= NO_WRITE;
                }
            }
            'y' => f |= NO_READ | NO_WRITE,
            _ => return Err("unknown flag".to_string()),
        }
    }

    if f == 0 {
        f = INIT_DATA;
    }

    let mut out = SectionCharacteristics::empty();
    if f & CODE != 0 {
        out |= SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE;
    }
    if f & INIT_DATA != 0 {
        out |= SectionCharacteristics::CNT_INITIALIZED_DATA;
    }
    if f & ALLOC != 0 && f & LOAD == 0 {
        out |= SectionCharacteristics::CNT_UNINITIALIZED_DATA;
    }
    if f & NO_LOAD != 0 {
        out |= SectionCharacteristics::LNK_REMOVE;
    }
    if f & DISCARDABLE != 0 || is_implicitly_discardable(name) {
        out |= SectionCharacteristics::MEM_DISCARDABLE;
    }
    if f & NO_READ == 0 {
        out |= SectionCharacteristics::MEM_READ;
    }
    if f & NO_WRITE == 0 {
        out |= SectionCharacteristics::MEM_WRITE;
    }
    if f & SHARED != 0 {
        out |= SectionCharacteristics::MEM_SHARED;
    }
    Ok(out)
}

/// A section being assembled. `data` is the only fragment; fixup offsets
/// index into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSection {
    pub name: String,
    pub characteristics: SectionCharacteristics,
    pub alignment: u32,
    pub comdat_symbol: Option<SymbolId>,
    pub selection: Option<ComdatSelection>,
    pub data: Vec<u8>,
    pub fixups: Vec<Fixup>,
}

impl StreamSection {
    pub(crate) fn new(name: &str, characteristics: SectionCharacteristics,
                      comdat_symbol: Option<SymbolId>) -> Self {
        Self {
            name: name.to_string(),
            characteristics,
            alignment: 1,
            comdat_symbol,
            selection: None,
            data: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::CNT_UNINITIALIZED_DATA)
    }

    pub fn is_comdat(&self) -> bool {
        self.characteristics.contains(SectionCharacteristics::LNK_COMDAT)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn ensure_min_alignment(&mut self, align: u32) {
        if self.alignment < align {
            self.alignment = align;
        }
    }

    pub fn set_selection(&mut self, selection: ComdatSelection) {
        self.selection = Some(selection);
        self.characteristics |= SectionCharacteristics::LNK_COMDAT;
    }
}

#[cfg(test)]
mod tests {
    use vpe_object::section::SectionCharacteristics as C;

    use crate::section::{parse_section_flags, section_kind, ComdatSelection, SectionKind};

    #[test]
    fn flag_strings() {
        assert_eq!(parse_section_flags(".rdata", "dr").unwrap(),
                   C::CNT_INITIALIZED_DATA | C::MEM_READ);
        assert_eq!(parse_section_flags(".mydata", "").unwrap(),
                   C::CNT_INITIALIZED_DATA | C::MEM_READ | C::MEM_WRITE);
        assert_eq!(parse_section_flags(".text", "xr").unwrap(),
                   C::CNT_CODE | C::MEM_EXECUTE | C::MEM_READ);
        assert_eq!(parse_section_flags(".text", "rx").unwrap(),
                   C::CNT_CODE | C::MEM_EXECUTE | C::CNT_INITIALIZED_DATA | C::MEM_READ);
        assert_eq!(parse_section_flags(".code", "x").unwrap(),
                   C::CNT_CODE | C::MEM_EXECUTE | C::MEM_READ);
        assert_eq!(parse_section_flags(".wcode", "wx").unwrap(),
                   C::CNT_CODE | C::MEM_EXECUTE | C::MEM_READ | C::MEM_WRITE);
        assert_eq!(parse_section_flags(".tbss", "bw").unwrap(),
                   C::CNT_UNINITIALIZED_DATA | C::MEM_READ | C::MEM_WRITE);
        assert_eq!(parse_section_flags(".shared", "s").unwrap(),
                   C::CNT_INITIALIZED_DATA | C::MEM_READ | C::MEM_WRITE | C::MEM_SHARED);
        assert_eq!(parse_section_flags(".info", "yn").unwrap(),
                   C::LNK_REMOVE);
        assert_eq!(parse_section_flags(".debug$S", "dr").unwrap(),
                   C::CNT_INITIALIZED_DATA | C::MEM_DISCARDABLE | C::MEM_READ);
        assert_eq!(parse_section_flags(".x", "aD").unwrap(),
                   C::MEM_DISCARDABLE | C::MEM_READ | C::MEM_WRITE);
    }

    #[test]
    fn flag_errors() {
        assert_eq!(parse_section_flags(".x", "bd").unwrap_err(),
                   "conflicting section flags 'b' and 'd'.");
        assert_eq!(parse_section_flags(".x", "db").unwrap_err(),
                   "conflicting section flags 'b' and 'd'.");
        assert_eq!(parse_section_flags(".x", "dq").unwrap_err(), "unknown flag");
    }

    #[test]
    fn kinds() {
        assert_eq!(section_kind(C::CNT_CODE | C::MEM_EXECUTE | C::MEM_READ), SectionKind::Text);
        assert_eq!(section_kind(C::CNT_INITIALIZED_DATA | C::MEM_READ), SectionKind::ReadOnly);
        assert_eq!(section_kind(C::MEM_READ | C::MEM_WRITE), SectionKind::Data);
        assert_eq!(section_kind(C::empty()), SectionKind::Data);
    }

    #[test]
    fn selection_names() {
        assert_eq!(ComdatSelection::from_name("discard"), Some(ComdatSelection::Any));
        assert_eq!(ComdatSelection::from_name("same_contents").map(|s| s.code()), Some(4));
        assert_eq!(ComdatSelection::from_name("newest").map(|s| s.code()), Some(7));
        assert_eq!(ComdatSelection::from_name("any"), None);
    }
}
