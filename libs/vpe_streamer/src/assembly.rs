use log::debug;
use vpe_object::header::Machine;
use vpe_object::symbol::{ReservedSection, SectionRef, StorageClass, WEAK_EXTERN_SEARCH_ALIAS};
use vpe_object::writer::{AuxModel, ObjectModel, RelocationModel, SectionModel, SymbolModel};
use vpe_object::{ErrorKind, VpeObjectError};

use crate::diagnostic::Diagnostic;
use crate::fixup::{relocation_type, Fixup, FixupKind};
use crate::section::{ComdatSelection, SectionId, StreamSection};
use crate::symbol::{StreamSymbol, SymbolId};

/// Everything a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub machine: Machine,
    pub sections: Vec<StreamSection>,
    pub symbols: Vec<StreamSymbol>,
    pub diagnostics: Vec<Diagnostic>,
}

fn unsupported(message: String) -> VpeObjectError {
    VpeObjectError::new(ErrorKind::Unsupported, message)
}

fn to_u32(v: u64, what: &str, name: &str) -> Result<u32, VpeObjectError> {
    u32::try_from(v).or(Err(unsupported(format!("{} of '{}' does not fit in 32 bits", what, name))))
}

impl Assembly {
    pub fn section(&self, id: SectionId) -> &StreamSection {
        &self.sections[id.0]
    }

    pub fn symbol(&self, id: SymbolId) -> &StreamSymbol {
        &self.symbols[id.0]
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections.iter().position(|s| s.name == name).map(SectionId)
    }

    pub fn find_symbol(&self, name: &str) -> Option<SymbolId> {
        self.symbols.iter().position(|s| s.name == name).map(SymbolId)
    }

    pub fn fixups(&self) -> impl Iterator<Item = (SectionId, &Fixup)> {
        self.sections.iter().enumerate()
            .flat_map(|(i, s)| s.fixups.iter().map(move |f| (SectionId(i), f)))
    }

    /// Symbol table index of each user symbol, or `None` for symbols that
    /// never made it into the table. Section symbols come first, two slots
    /// each, then user symbols in creation order.
    fn symbol_indices(&self) -> Vec<Option<u32>> {
        let mut next = 2 * self.sections.len() as u32;
        let mut out = Vec::with_capacity(self.symbols.len());
        for s in &self.symbols {
            if !s.registered {
                out.push(None);
                continue;
            }
            out.push(Some(next));
            next += 1;
            if s.weak_external {
                next += 1;
                if s.weak_target.is_none() {
                    // .weak.<name>.default
                    next += 1;
                }
            }
        }
        out
    }

    fn section_symbol(&self, i: usize, relocations: usize) -> Result<SymbolModel, VpeObjectError> {
        let s = &self.sections[i];
        let number = match (s.selection, s.comdat_symbol) {
            (Some(ComdatSelection::Associative), Some(sym)) => {
                match self.symbols[sym.0].definition {
                    Some((sec, _)) => sec.0 as u32 + 1,
                    None => 0,
                }
            }
            _ => 0,
        };
        Ok(SymbolModel {
            name: s.name.as_bytes().to_vec(),
            value: 0,
            section: SectionRef::Index(i as u32 + 1),
            typ: 0,
            storage_class: StorageClass::Static,
            aux: Some(AuxModel::SectionDefinition {
                length: to_u32(s.size() as u64, "size", &s.name)?,
                number_of_relocations: relocations.min(0xffff) as u16,
                number_of_linenumbers: 0,
                checksum: 0,
                number,
                selection: s.selection.map_or(0, |sel| sel.code()),
            }),
        })
    }

    fn user_symbols(&self, indices: &[Option<u32>]) -> Result<Vec<SymbolModel>, VpeObjectError> {
        let mut out = Vec::new();
        for (i, s) in self.symbols.iter().enumerate() {
            let own = match indices[i] {
                Some(own) => own,
                None => continue,
            };
            let defined_at = match s.definition {
                Some((sec, offset)) => Some((
                    SectionRef::Index(sec.0 as u32 + 1),
                    to_u32(offset, "offset", &s.name)?,
                )),
                None => None,
            };
            let default_class = if s.external { StorageClass::External } else { StorageClass::Static };
            let storage_class = s.storage_class.map_or(default_class, StorageClass::from);

            if s.weak_external {
                let tag_index = match s.weak_target {
                    Some(t) => indices[t.0].ok_or(unsupported(format!(
                        "weak reference target of '{}' is not in the symbol table", s.name)))?,
                    None => own + 2,
                };
                out.push(SymbolModel {
                    name: s.name.as_bytes().to_vec(),
                    value: 0,
                    section: SectionRef::Reserved(ReservedSection::Undefined),
                    typ: s.typ,
                    storage_class: StorageClass::WeakExternal,
                    aux: Some(AuxModel::WeakExternal {
                        tag_index,
                        characteristics: WEAK_EXTERN_SEARCH_ALIAS,
                    }),
                });
                if s.weak_target.is_none() {
                    let (section, value) = defined_at
                        .unwrap_or((SectionRef::Reserved(ReservedSection::Absolute), 0));
                    out.push(SymbolModel {
                        name: format!(".weak.{}.default", s.name).into_bytes(),
                        value,
                        section,
                        typ: s.typ,
                        storage_class: StorageClass::External,
                        aux: None,
                    });
                }
                continue;
            }

            let (section, value, storage_class) = if let Some(c) = s.common {
                (SectionRef::Reserved(ReservedSection::Undefined),
                 to_u32(c.size, "common size", &s.name)?,
                 StorageClass::External)
            } else if let Some((section, value)) = defined_at {
                (section, value, storage_class)
            } else {
                (SectionRef::Reserved(ReservedSection::Undefined), 0,
                 s.storage_class.map_or(StorageClass::External, StorageClass::from))
            };
            out.push(SymbolModel {
                name: s.name.as_bytes().to_vec(),
                value,
                section,
                typ: s.typ,
                storage_class,
                aux: None,
            });
        }
        Ok(out)
    }

    fn lower_section(&self, i: usize, indices: &[Option<u32>]) ->
        Result<SectionModel, VpeObjectError>
    {
        let s = &self.sections[i];
        let mut data = s.data.clone();
        let mut relocations = Vec::new();
        for f in &s.fixups {
            let target = &self.symbols[f.symbol.0];
            let index = indices[f.symbol.0].ok_or(unsupported(format!(
                "fixup in '{}' refers to unregistered symbol '{}'", s.name, target.name)))?;
            let start = f.offset as usize;
            let field = data.get_mut(start..start + f.kind.size()).ok_or(VpeObjectError::new(
                ErrorKind::OutOfBounds,
                format!("fixup at {:#x} runs past the end of '{}'", f.offset, s.name)))?;

            if f.kind == FixupKind::SymbolIndex {
                field.copy_from_slice(&index.to_le_bytes());
                continue;
            }
            let width = field.len();
            field.copy_from_slice(&f.addend.to_le_bytes()[..width]);
            relocations.push(RelocationModel {
                virtual_address: to_u32(f.offset, "fixup offset", &s.name)?,
                symbol_table_index: index,
                typ: relocation_type(self.machine, f.kind).ok_or(unsupported(format!(
                    "no {:?} relocation for {:?}", f.kind, self.machine)))?,
            });
        }

        let (data, uninitialized_size) = if s.is_virtual() {
            if !relocations.is_empty() {
                return Err(unsupported(format!("relocations in virtual section '{}'", s.name)));
            }
            (Vec::new(), to_u32(data.len() as u64, "size", &s.name)?)
        } else {
            (data, 0)
        };
        Ok(SectionModel {
            name: s.name.as_bytes().to_vec(),
            characteristics: s.characteristics.with_alignment(s.alignment),
            data,
            uninitialized_size,
            relocations,
        })
    }

    /// Lowers the assembly to an encoder model. Addends are stored in the
    /// section content.
    pub fn to_model(&self) -> Result<ObjectModel, VpeObjectError> {
        let indices = self.symbol_indices();
        let mut model = ObjectModel::new(self.machine);
        for i in 0..self.sections.len() {
            let section = self.lower_section(i, &indices)?;
            model.symbols.push(self.section_symbol(i, section.relocations.len())?);
            model.sections.push(section);
        }
        model.symbols.extend(self.user_symbols(&indices)?);
        debug!("lowered {} sections and {} symbol records",
               model.sections.len(), model.symbols.len());
        Ok(model)
    }
}
