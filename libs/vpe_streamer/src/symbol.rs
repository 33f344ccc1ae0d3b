use crate::section::SectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) usize);

impl SymbolId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolAttribute {
    Global,
    Weak,
    WeakReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Common {
    pub size: u64,
    pub alignment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSymbol {
    pub name: String,
    /// Section and offset of the label, once emitted.
    pub definition: Option<(SectionId, u64)>,
    pub external: bool,
    pub weak_external: bool,
    /// Target of a weak reference alias.
    pub weak_target: Option<SymbolId>,
    pub common: Option<Common>,
    /// Explicit storage class from a symbol definition block.
    pub storage_class: Option<u8>,
    pub typ: u16,
    /// Set once anything refers to or defines the symbol; unregistered
    /// symbols are left out of the symbol table.
    pub registered: bool,
}

impl StreamSymbol {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            definition: None,
            external: false,
            weak_external: false,
            weak_target: None,
            common: None,
            storage_class: None,
            typ: 0,
            registered: false,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.definition.is_some()
    }

    pub fn is_common(&self) -> bool {
        self.common.is_some()
    }
}
