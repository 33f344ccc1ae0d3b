//! Write-side bookkeeping for an assembler targeting VPE objects: sections,
//! symbols, fixups and the symbol-definition state machine. A front end
//! drives it directive by directive and lowers the result with
//! [`Assembly::to_model`].

use std::collections::HashMap;

use log::{debug, warn};
use vpe_object::header::Machine;
use vpe_object::section::SectionCharacteristics;

mod assembly;
mod diagnostic;
mod fixup;
mod section;
mod symbol;

pub use assembly::Assembly;
pub use diagnostic::{Diagnostic, SourceLocation};
pub use fixup::{relocation_type, Fixup, FixupKind};
pub use section::{
    is_implicitly_discardable,
    parse_section_flags,
    section_kind,
    ComdatSelection,
    SectionId,
    SectionKind,
    StreamSection,
};
pub use symbol::{Common, StreamSymbol, SymbolAttribute, SymbolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionState {
    Idle,
    Defining(SymbolId),
}

pub struct VpeStreamer {
    machine: Machine,
    sections: Vec<StreamSection>,
    section_map: HashMap<(String, Option<SymbolId>), SectionId>,
    symbols: Vec<StreamSymbol>,
    symbol_map: HashMap<String, SymbolId>,
    current: SectionId,
    section_stack: Vec<SectionId>,
    state: DefinitionState,
    location: SourceLocation,
    diagnostics: Vec<Diagnostic>,
    text: SectionId,
    data: SectionId,
    bss: SectionId,
    drectve: Option<SectionId>,
}

fn text_characteristics() -> SectionCharacteristics {
    SectionCharacteristics::CNT_CODE
        | SectionCharacteristics::MEM_EXECUTE
        | SectionCharacteristics::MEM_READ
}

fn data_characteristics() -> SectionCharacteristics {
    SectionCharacteristics::CNT_INITIALIZED_DATA
        | SectionCharacteristics::MEM_READ
        | SectionCharacteristics::MEM_WRITE
}

fn bss_characteristics() -> SectionCharacteristics {
    SectionCharacteristics::CNT_UNINITIALIZED_DATA
        | SectionCharacteristics::MEM_READ
        | SectionCharacteristics::MEM_WRITE
}

fn log2_ceil(v: u32) -> u32 {
    u64::from(v).next_power_of_two().trailing_zeros()
}

impl VpeStreamer {
    /// Starts a session with `.text`, `.data` and `.bss`, each 4-byte
    /// aligned, and `.text` selected.
    pub fn new(machine: Machine) -> Self {
        let mut s = Self {
            machine,
            sections: Vec::new(),
            section_map: HashMap::new(),
            symbols: Vec::new(),
            symbol_map: HashMap::new(),
            current: SectionId(0),
            section_stack: Vec::new(),
            state: DefinitionState::Idle,
            location: SourceLocation::default(),
            diagnostics: Vec::new(),
            text: SectionId(0),
            data: SectionId(0),
            bss: SectionId(0),
            drectve: None,
        };
        s.text = s.get_or_create_section(".text", text_characteristics(), None, None);
        s.data = s.get_or_create_section(".data", data_characteristics(), None, None);
        s.bss = s.get_or_create_section(".bss", bss_characteristics(), None, None);
        for id in [s.text, s.data, s.bss] {
            s.switch_section(id);
            s.emit_code_alignment(4);
        }
        s.switch_section(s.text);
        s
    }

    pub fn machine(&self) -> Machine {
        self.machine
    }

    pub fn set_location(&mut self, line: u32, column: u32) {
        self.location = SourceLocation { line, column };
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn error(&mut self, message: String) {
        warn!("{}: {}", self.location, message);
        self.diagnostics.push(Diagnostic {
            location: self.location,
            message,
        });
    }

    // sections

    pub fn text_section(&self) -> SectionId {
        self.text
    }

    pub fn data_section(&self) -> SectionId {
        self.data
    }

    pub fn bss_section(&self) -> SectionId {
        self.bss
    }

    pub fn section(&self, id: SectionId) -> &StreamSection {
        &self.sections[id.0]
    }

    pub fn current_section(&self) -> SectionId {
        self.current
    }

    /// Sections are unique by name and COMDAT symbol. An existing section
    /// keeps its characteristics.
    pub fn get_or_create_section(
        &mut self,
        name: &str,
        characteristics: SectionCharacteristics,
        comdat_symbol: Option<SymbolId>,
        selection: Option<ComdatSelection>,
    ) -> SectionId {
        let key = (name.to_string(), comdat_symbol);
        if let Some(id) = self.section_map.get(&key) {
            return *id;
        }
        let id = SectionId(self.sections.len());
        let mut section = StreamSection::new(name, characteristics, comdat_symbol);
        if let Some(sel) = selection {
            section.set_selection(sel);
        }
        debug!("new section {} ({:?})", name, section.characteristics);
        self.sections.push(section);
        self.section_map.insert(key, id);
        id
    }

    pub fn switch_section(&mut self, id: SectionId) {
        self.current = id;
    }

    pub fn push_section(&mut self) {
        self.section_stack.push(self.current);
    }

    /// Returns false when there is nothing to pop.
    pub fn pop_section(&mut self) -> bool {
        match self.section_stack.pop() {
            Some(id) => {
                self.current = id;
                true
            }
            None => false,
        }
    }

    /// `.section name, "flags"[, selection, symbol]`. Returns the selected
    /// section, or `None` after reporting a bad flag string.
    pub fn section_directive(
        &mut self,
        name: &str,
        flags: &str,
        comdat: Option<(ComdatSelection, SymbolId)>,
    ) -> Option<SectionId> {
        let mut characteristics = match parse_section_flags(name, flags) {
            Ok(c) => c,
            Err(e) => {
                self.error(e);
                return None;
            }
        };
        if section_kind(characteristics) == SectionKind::Text
            && matches!(self.machine, Machine::Arm | Machine::ArmNt)
        {
            characteristics |= SectionCharacteristics::MEM_16BIT;
        }
        let (selection, symbol) = match comdat {
            Some((sel, sym)) => {
                self.register(sym);
                (Some(sel), Some(sym))
            }
            None => (None, None),
        };
        let id = self.get_or_create_section(name, characteristics, symbol, selection);
        self.switch_section(id);
        Some(id)
    }

    pub fn set_selection(&mut self, id: SectionId, selection: ComdatSelection) {
        self.sections[id.0].set_selection(selection);
    }

    /// `.linkonce [selection]` on the current section.
    pub fn link_once(&mut self, selection: Option<ComdatSelection>) {
        let selection = selection.unwrap_or(ComdatSelection::Any);
        if selection == ComdatSelection::Associative {
            self.error("cannot make section associative with .linkonce".to_string());
            return;
        }
        let current = self.current;
        if self.sections[current.0].is_comdat() {
            let name = self.sections[current.0].name.clone();
            self.error(format!("section '{}' is already linkonce", name));
            return;
        }
        self.set_selection(current, selection);
    }

    fn drectve_section(&mut self) -> SectionId {
        if let Some(id) = self.drectve {
            return id;
        }
        let id = self.get_or_create_section(
            ".drectve",
            SectionCharacteristics::LNK_INFO | SectionCharacteristics::LNK_REMOVE,
            None, None);
        self.drectve = Some(id);
        id
    }

    // symbols

    pub fn symbol(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.symbol_map.get(name) {
            return *id;
        }
        let id = SymbolId(self.symbols.len());
        self.symbols.push(StreamSymbol::new(name));
        self.symbol_map.insert(name.to_string(), id);
        id
    }

    pub fn get_symbol(&self, id: SymbolId) -> &StreamSymbol {
        &self.symbols[id.0]
    }

    fn register(&mut self, id: SymbolId) {
        self.symbols[id.0].registered = true;
    }

    /// The symbol whose definition block is open, if any.
    pub fn current_definition(&self) -> Option<SymbolId> {
        match self.state {
            DefinitionState::Idle => None,
            DefinitionState::Defining(s) => Some(s),
        }
    }

    pub fn begin_symbol_definition(&mut self, sym: SymbolId) {
        if self.state != DefinitionState::Idle {
            self.error("starting a new symbol definition without completing the \
                        previous one".to_string());
        }
        self.state = DefinitionState::Defining(sym);
    }

    pub fn set_storage_class(&mut self, storage_class: i64) {
        let sym = match self.state {
            DefinitionState::Defining(s) => s,
            DefinitionState::Idle => {
                self.error("storage class specified outside of symbol definition".to_string());
                return;
            }
        };
        if storage_class & !0xff != 0 {
            self.error(format!("storage class value '{}' out of range", storage_class));
            return;
        }
        self.register(sym);
        self.symbols[sym.0].storage_class = Some(storage_class as u8);
    }

    pub fn set_type(&mut self, typ: i64) {
        let sym = match self.state {
            DefinitionState::Defining(s) => s,
            DefinitionState::Idle => {
                self.error("symbol type specified outside of a symbol definition".to_string());
                return;
            }
        };
        if typ & !0xffff != 0 {
            self.error(format!("type value '{}' out of range", typ));
            return;
        }
        self.register(sym);
        self.symbols[sym.0].typ = typ as u16;
    }

    pub fn end_symbol_definition(&mut self) {
        if self.state == DefinitionState::Idle {
            self.error("ending symbol definition without starting one".to_string());
        }
        self.state = DefinitionState::Idle;
    }

    pub fn emit_symbol_attribute(&mut self, sym: SymbolId, attribute: SymbolAttribute) {
        self.register(sym);
        let s = &mut self.symbols[sym.0];
        match attribute {
            SymbolAttribute::Weak | SymbolAttribute::WeakReference => {
                s.weak_external = true;
                s.external = true;
            }
            SymbolAttribute::Global => s.external = true,
        }
    }

    /// `alias` becomes a weak external that resolves to `target`.
    pub fn emit_weak_reference(&mut self, alias: SymbolId, target: SymbolId) {
        self.emit_symbol_attribute(alias, SymbolAttribute::Weak);
        self.register(target);
        self.symbols[alias.0].weak_target = Some(target);
    }

    pub fn emit_label(&mut self, sym: SymbolId) {
        if self.symbols[sym.0].is_defined() {
            let name = self.symbols[sym.0].name.clone();
            self.error(format!("symbol '{}' is already defined", name));
            return;
        }
        self.register(sym);
        let offset = self.sections[self.current.0].size() as u64;
        self.symbols[sym.0].definition = Some((self.current, offset));
    }

    pub fn emit_common_symbol(&mut self, sym: SymbolId, size: u64, alignment: u32) {
        self.register(sym);
        let name = {
            let s = &mut self.symbols[sym.0];
            s.external = true;
            s.common = Some(Common { size, alignment });
            s.name.clone()
        };
        if alignment > 1 {
            let directive = format!(" -aligncomm:\"{}\",{}", name, log2_ceil(alignment));
            let drectve = self.drectve_section();
            self.push_section();
            self.switch_section(drectve);
            self.emit_bytes(directive.as_bytes());
            self.pop_section();
        }
    }

    /// Reserves `size` zero bytes in `.bss` under a local label.
    pub fn emit_local_common_symbol(&mut self, sym: SymbolId, size: u64, alignment: u32) {
        let bss = self.bss;
        self.push_section();
        self.switch_section(bss);
        self.emit_value_to_alignment(alignment, 0);
        self.emit_label(sym);
        self.symbols[sym.0].external = false;
        self.emit_zeros(size);
        self.pop_section();
    }

    // data

    fn current_mut(&mut self) -> &mut StreamSection {
        &mut self.sections[self.current.0]
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        let section = self.current_mut();
        if section.is_virtual() && bytes.iter().any(|&b| b != 0) {
            let name = section.name.clone();
            self.error(format!("non-zero initializer found in section '{}'", name));
            return;
        }
        self.current_mut().data.extend_from_slice(bytes);
    }

    /// The section may not grow past `u32::MAX` bytes, the largest size a
    /// section header can record.
    pub fn emit_zeros(&mut self, count: u64) {
        let len = (self.current_mut().data.len() as u64).checked_add(count)
            .filter(|&l| l <= u64::from(u32::MAX))
            .and_then(|l| usize::try_from(l).ok());
        match len {
            Some(len) => self.current_mut().data.resize(len, 0),
            None => {
                let name = self.current_mut().name.clone();
                self.error(format!("zero fill of {} bytes in section '{}' is out of range",
                                   count, name));
            }
        }
    }

    pub fn emit_int(&mut self, value: u64, size: u8) {
        if !matches!(size, 1 | 2 | 4 | 8) {
            self.error(format!("invalid integer size {}", size));
            return;
        }
        let bytes = value.to_le_bytes();
        self.emit_bytes(&bytes[..size as usize]);
    }

    /// Pads the current section to `alignment` with `fill` and raises the
    /// section alignment.
    pub fn emit_value_to_alignment(&mut self, alignment: u32, fill: u8) {
        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            self.error(format!("alignment must be a power of 2, got {}", alignment));
            return;
        }
        let section = self.current_mut();
        section.ensure_min_alignment(alignment);
        let rem = section.data.len() % alignment as usize;
        if rem != 0 {
            let pad = alignment as usize - rem;
            let len = section.data.len() + pad;
            section.data.resize(len, fill);
        }
    }

    /// Like [`emit_value_to_alignment`](Self::emit_value_to_alignment),
    /// padding code sections with the target's one-byte no-op.
    pub fn emit_code_alignment(&mut self, alignment: u32) {
        let code = section_kind(self.sections[self.current.0].characteristics) == SectionKind::Text;
        let fill = match self.machine {
            Machine::I386 | Machine::Amd64 if code => 0x90,
            _ => 0,
        };
        self.emit_value_to_alignment(alignment, fill);
    }

    /// Appends encoded instruction bytes. Fixup offsets in `fixups` are
    /// relative to `bytes`.
    pub fn emit_instruction_data(&mut self, bytes: &[u8], fixups: &[Fixup]) {
        for f in fixups {
            self.register(f.symbol);
        }
        let section = self.current_mut();
        let base = section.data.len() as u64;
        section.fixups.extend(fixups.iter().map(|f| Fixup {
            offset: f.offset + base,
            ..*f
        }));
        section.data.extend_from_slice(bytes);
    }

    /// Records a fixup at the current position and reserves its field.
    pub fn emit_fixup(&mut self, sym: SymbolId, kind: FixupKind, addend: i64) {
        self.register(sym);
        let section = self.current_mut();
        let offset = section.data.len() as u64;
        section.fixups.push(Fixup {
            offset,
            symbol: sym,
            addend,
            kind,
        });
        let len = section.data.len() + kind.size();
        section.data.resize(len, 0);
    }

    /// `.secrel32 sym+offset`
    pub fn emit_secrel32(&mut self, sym: SymbolId, offset: i64) {
        if offset < 0 || offset > i64::from(u32::MAX) {
            self.error(format!(
                "invalid '.secrel32' directive offset, can't be less than zero or \
                 greater than {}", u32::MAX));
            return;
        }
        self.emit_fixup(sym, FixupKind::SecRel4, offset);
    }

    /// `.rva sym+offset`
    pub fn emit_imgrel32(&mut self, sym: SymbolId, offset: i64) {
        if offset < i64::from(i32::MIN) || offset > i64::from(i32::MAX) {
            self.error(format!(
                "invalid '.rva' directive offset, can't be less than {} or greater than {}",
                i32::MIN, i32::MAX));
            return;
        }
        self.emit_fixup(sym, FixupKind::ImgRel32, offset);
    }

    /// `.secidx sym`
    pub fn emit_section_index(&mut self, sym: SymbolId) {
        self.emit_fixup(sym, FixupKind::SectionIndex, 0);
    }

    /// `.symidx sym`
    pub fn emit_symbol_index(&mut self, sym: SymbolId) {
        self.current_mut().ensure_min_alignment(4);
        self.emit_fixup(sym, FixupKind::SymbolIndex, 0);
    }

    pub fn finish(self) -> Assembly {
        debug!("finished with {} sections, {} symbols, {} diagnostics",
               self.sections.len(), self.symbols.len(), self.diagnostics.len());
        Assembly {
            machine: self.machine,
            sections: self.sections,
            symbols: self.symbols,
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate rand;
    use rand::{Rng, SeedableRng};

    extern crate mersenne_twister;
    use mersenne_twister::MersenneTwister;

    use vpe_object::header::Machine;
    use vpe_object::relocation::{
        IMAGE_REL_AMD64_ADDR32NB,
        IMAGE_REL_AMD64_REL32,
        IMAGE_REL_AMD64_SECREL,
        IMAGE_REL_AMD64_SECTION,
    };
    use vpe_object::section::SectionCharacteristics;
    use vpe_object::symbol::{AuxRecord, SectionRef, StorageClass};
    use vpe_object::writer::write_object;
    use vpe_object::VpeObject;

    use crate::{ComdatSelection, Fixup, FixupKind, SymbolAttribute, VpeStreamer};

    fn messages(s: &VpeStreamer) -> Vec<&str> {
        s.diagnostics().iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn initial_sections() {
        let s = VpeStreamer::new(Machine::Amd64);
        assert_eq!(s.current_section(), s.text_section());
        for (id, name) in [(s.text_section(), ".text"),
                           (s.data_section(), ".data"),
                           (s.bss_section(), ".bss")] {
            assert_eq!(s.section(id).name, name);
            assert_eq!(s.section(id).alignment, 4);
            assert_eq!(s.section(id).size(), 0);
        }
        assert!(s.section(s.bss_section()).is_virtual());
    }

    #[test]
    fn double_begin_reports_once() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let a = s.symbol("a");
        let b = s.symbol("b");
        s.set_location(3, 1);
        s.begin_symbol_definition(a);
        s.set_location(4, 1);
        s.begin_symbol_definition(b);
        assert_eq!(messages(&s), vec![
            "starting a new symbol definition without completing the previous one",
        ]);
        assert_eq!(s.diagnostics()[0].location.line, 4);
        assert_eq!(s.current_definition(), Some(b));

        s.set_storage_class(2);
        s.set_type(0x20);
        s.end_symbol_definition();
        assert_eq!(s.current_definition(), None);
        assert_eq!(s.get_symbol(b).storage_class, Some(2));
        assert_eq!(s.get_symbol(b).typ, 0x20);
        assert_eq!(s.get_symbol(a).storage_class, None);
        assert_eq!(s.diagnostics().len(), 1);
    }

    #[test]
    fn attributes_outside_definition() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        s.set_storage_class(2);
        s.set_type(0x20);
        s.end_symbol_definition();
        assert_eq!(messages(&s), vec![
            "storage class specified outside of symbol definition",
            "symbol type specified outside of a symbol definition",
            "ending symbol definition without starting one",
        ]);
        assert_eq!(s.current_definition(), None);
    }

    #[test]
    fn attribute_ranges() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let f = s.symbol("f");
        s.begin_symbol_definition(f);
        s.set_storage_class(256);
        s.set_storage_class(-1);
        s.set_type(0x10000);
        s.end_symbol_definition();
        assert_eq!(messages(&s), vec![
            "storage class value '256' out of range",
            "storage class value '-1' out of range",
            "type value '65536' out of range",
        ]);
        assert_eq!(s.get_symbol(f).storage_class, None);
        assert_eq!(s.get_symbol(f).typ, 0);
    }

    #[test]
    fn link_once_rules() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let id = s.section_directive(".text$foo", "xr", None).unwrap();
        s.link_once(Some(ComdatSelection::Associative));
        assert!(!s.section(id).is_comdat());
        s.link_once(None);
        assert!(s.section(id).is_comdat());
        assert_eq!(s.section(id).selection, Some(ComdatSelection::Any));
        s.link_once(Some(ComdatSelection::Largest));
        assert_eq!(s.section(id).selection, Some(ComdatSelection::Any));
        assert_eq!(messages(&s), vec![
            "cannot make section associative with .linkonce",
            "section '.text$foo' is already linkonce",
        ]);
    }

    #[test]
    fn section_registry() {
        let mut s = VpeStreamer::new(Machine::ArmNt);
        let key = s.symbol("key");
        let a = s.section_directive(".rdata$a", "dr", None).unwrap();
        let b = s.section_directive(".rdata$a", "dr", Some((ComdatSelection::Any, key))).unwrap();
        assert_ne!(a, b);
        assert_eq!(s.section_directive(".rdata$a", "dw", None), Some(a));
        assert!(s.section(b).is_comdat());
        assert_eq!(s.current_section(), a);

        let code = s.section_directive(".thumb", "xr", None).unwrap();
        assert!(s.section(code).characteristics.contains(SectionCharacteristics::MEM_16BIT));

        assert_eq!(s.section_directive(".bad", "bd", None), None);
        assert_eq!(messages(&s), vec!["conflicting section flags 'b' and 'd'."]);
        assert_eq!(s.current_section(), code);

        s.push_section();
        s.switch_section(a);
        assert!(s.pop_section());
        assert_eq!(s.current_section(), code);
        assert!(!s.pop_section());
    }

    #[test]
    fn labels_and_alignment() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let start = s.symbol("start");
        let tail = s.symbol("tail");
        s.emit_label(start);
        s.emit_bytes(&[0xc3]);
        s.emit_code_alignment(16);
        s.emit_label(tail);
        s.emit_label(start);
        assert_eq!(messages(&s), vec!["symbol 'start' is already defined"]);

        let text = s.text_section();
        assert_eq!(s.section(text).size(), 16);
        assert_eq!(s.section(text).data[1], 0x90);
        assert_eq!(s.section(text).alignment, 16);
        assert_eq!(s.get_symbol(start).definition, Some((text, 0)));
        assert_eq!(s.get_symbol(tail).definition, Some((text, 16)));

        s.emit_int(0x1122_3344, 2);
        s.emit_int(1, 3);
        assert_eq!(&s.section(text).data[16..], &[0x44, 0x33]);
        assert_eq!(s.diagnostics().len(), 2);
    }

    #[test]
    fn bss_rejects_initializers() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let bss = s.bss_section();
        s.switch_section(bss);
        s.emit_bytes(&[0, 0]);
        s.emit_bytes(&[1]);
        s.emit_zeros(6);
        assert_eq!(s.section(bss).size(), 8);
        assert_eq!(messages(&s), vec!["non-zero initializer found in section '.bss'"]);
    }

    #[test]
    fn fixup_directives() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let data = s.data_section();
        s.switch_section(data);
        let x = s.symbol("x");
        s.emit_bytes(&[1]);
        s.emit_secrel32(x, 8);
        s.emit_secrel32(x, -1);
        s.emit_secrel32(x, 1 << 32);
        s.emit_imgrel32(x, -4);
        s.emit_imgrel32(x, 1 << 31);
        s.emit_section_index(x);
        assert_eq!(s.diagnostics().len(), 3);
        let kinds: Vec<_> = s.section(data).fixups.iter().map(|f| (f.offset, f.kind)).collect();
        assert_eq!(kinds, vec![
            (1, FixupKind::SecRel4),
            (5, FixupKind::ImgRel32),
            (9, FixupKind::SectionIndex),
        ]);
        assert_eq!(s.section(data).size(), 11);

        let rdata = s.section_directive(".rdata", "dr", None).unwrap();
        assert_eq!(s.section(rdata).alignment, 1);
        s.emit_symbol_index(x);
        assert_eq!(s.section(rdata).alignment, 4);
        assert_eq!(s.section(rdata).size(), 4);
    }

    #[test]
    fn instruction_fixups_are_rebased() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let callee = s.symbol("callee");
        s.emit_bytes(&[0x55, 0x90]);
        s.emit_instruction_data(&[0xe8, 0, 0, 0, 0], &[Fixup {
            offset: 1,
            symbol: callee,
            addend: -4,
            kind: FixupKind::PcRel4,
        }]);
        let text = s.section(s.text_section());
        assert_eq!(text.size(), 7);
        assert_eq!(text.fixups[0].offset, 3);
        assert!(s.get_symbol(callee).registered);
    }

    #[test]
    fn common_symbols() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let buf = s.symbol("buf");
        let small = s.symbol("small");
        s.emit_common_symbol(buf, 64, 16);
        s.emit_common_symbol(small, 4, 1);
        assert!(s.get_symbol(buf).external);
        assert_eq!(s.current_section(), s.text_section());

        let asm = s.finish();
        let drectve = asm.find_section(".drectve").unwrap();
        assert_eq!(asm.section(drectve).data, b" -aligncomm:\"buf\",4");
        assert_eq!(asm.section(drectve).characteristics,
                   SectionCharacteristics::LNK_INFO | SectionCharacteristics::LNK_REMOVE);
    }

    #[test]
    fn local_common_symbols() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let a = s.symbol("a");
        let b = s.symbol("b");
        s.emit_local_common_symbol(a, 3, 1);
        s.emit_local_common_symbol(b, 8, 8);
        let bss = s.bss_section();
        assert_eq!(s.section(bss).size(), 16);
        assert_eq!(s.section(bss).alignment, 8);
        assert_eq!(s.get_symbol(a).definition, Some((bss, 0)));
        assert_eq!(s.get_symbol(b).definition, Some((bss, 8)));
        assert!(!s.get_symbol(b).external);
        assert_eq!(s.current_section(), s.text_section());
    }

    #[test]
    fn common_alignment_above_2_pow_31() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let c = s.symbol("c");
        s.emit_common_symbol(c, 4, 0x8000_0001);
        assert!(s.diagnostics().is_empty());
        s.emit_bytes(&[0x90]);

        let asm = s.finish();
        let drectve = asm.find_section(".drectve").unwrap();
        assert_eq!(asm.section(drectve).data, b" -aligncomm:\"c\",32");
        assert_eq!(asm.section(asm.find_section(".text").unwrap()).data, &[0x90]);
    }

    #[test]
    fn alignment_must_be_a_power_of_two() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        s.emit_bytes(&[1]);
        let text = s.text_section();
        let before = s.section(text).alignment;
        s.emit_value_to_alignment(3, 0);
        assert_eq!(messages(&s), vec!["alignment must be a power of 2, got 3"]);
        assert_eq!(s.section(text).size(), 1);
        assert_eq!(s.section(text).alignment, before);

        s.emit_value_to_alignment(0, 0);
        s.emit_value_to_alignment(8, 0);
        assert_eq!(s.section(text).size(), 8);
        assert_eq!(s.diagnostics().len(), 1);
    }

    #[test]
    fn oversized_zero_fill() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let big = s.symbol("big");
        s.emit_local_common_symbol(big, u64::MAX, 1);
        assert_eq!(messages(&s),
                   vec!["zero fill of 18446744073709551615 bytes in section '.bss' is out of range"]);
        assert_eq!(s.current_section(), s.text_section());

        s.emit_bytes(&[0xc3]);
        s.emit_zeros(1 << 33);
        assert_eq!(s.diagnostics().len(), 2);
        s.emit_zeros(3);
        assert_eq!(s.section(s.text_section()).data, &[0xc3, 0, 0, 0]);
        assert_eq!(s.section(s.bss_section()).size(), 0);
    }

    #[test]
    fn assembled_object_reads_back() {
        let mut s = VpeStreamer::new(Machine::Amd64);
        let main = s.symbol("main");
        let puts = s.symbol("puts");
        let msg = s.symbol("msg");
        let handler = s.symbol("handler");
        let alias = s.symbol("alias");
        s.emit_symbol_attribute(main, SymbolAttribute::Global);
        s.begin_symbol_definition(main);
        s.set_storage_class(2);
        s.set_type(0x20);
        s.end_symbol_definition();

        s.emit_label(main);
        s.emit_instruction_data(&[0xe8, 0, 0, 0, 0], &[Fixup {
            offset: 1,
            symbol: puts,
            addend: -4,
            kind: FixupKind::PcRel4,
        }]);
        s.emit_bytes(&[0xc3]);

        s.emit_symbol_attribute(handler, SymbolAttribute::Weak);
        s.emit_label(handler);
        s.emit_bytes(&[0xc3]);
        s.emit_weak_reference(alias, main);

        let data = s.data_section();
        s.switch_section(data);
        s.emit_label(msg);
        s.emit_bytes(b"hi\0\0");
        s.emit_imgrel32(main, 1);
        s.emit_secrel32(msg, 2);
        s.emit_section_index(msg);
        s.emit_symbol_index(puts);

        let asm = s.finish();
        assert!(asm.diagnostics.is_empty());
        assert_eq!(asm.fixups().count(), 5);
        let model = asm.to_model().unwrap();
        let bytes = write_object(&model, false).unwrap();
        let obj = VpeObject::from_bytes(&bytes).unwrap();

        let names: Vec<_> = obj.sections().iter()
            .map(|sec| obj.section_name(sec).unwrap().to_vec())
            .collect();
        assert_eq!(names, vec![b".text".to_vec(), b".data".to_vec(), b".bss".to_vec()]);

        let text = obj.section(1).unwrap();
        assert_eq!(text.characteristics.alignment(), 4);
        assert_eq!(obj.section_contents(text).unwrap(), &[0xe8, 0xfc, 0xff, 0xff, 0xff, 0xc3, 0xc3]);

        let symbols: Vec<_> = obj.symbols().collect::<Result<_, _>>().unwrap();
        let find = |name: &str| symbols.iter().find(|s| s.name == name.as_bytes()).unwrap().clone();

        let text_relocs: Vec<_> = obj.section_relocations(text).unwrap().collect();
        assert_eq!(text_relocs.len(), 1);
        assert_eq!(text_relocs[0].virtual_address, 1);
        assert_eq!(text_relocs[0].typ, IMAGE_REL_AMD64_REL32);
        let target = obj.relocation_symbol(&text_relocs[0]).unwrap().unwrap();
        assert_eq!(target.name, b"puts");
        assert!(target.is_undefined());

        let data = obj.section(2).unwrap();
        let contents = obj.section_contents(data).unwrap();
        assert_eq!(&contents[..4], b"hi\0\0");
        assert_eq!(&contents[4..8], &[1, 0, 0, 0]);
        assert_eq!(&contents[8..12], &[2, 0, 0, 0]);
        assert_eq!(&contents[12..14], &[0, 0]);
        let puts_index = find("puts").index;
        assert_eq!(&contents[14..18], &puts_index.to_le_bytes());
        let types: Vec<_> = obj.section_relocations(data).unwrap().map(|r| r.typ).collect();
        assert_eq!(types, vec![
            IMAGE_REL_AMD64_ADDR32NB,
            IMAGE_REL_AMD64_SECREL,
            IMAGE_REL_AMD64_SECTION,
        ]);

        let main_sym = find("main");
        assert_eq!(main_sym.section, SectionRef::Index(1));
        assert_eq!(main_sym.storage_class, StorageClass::External);
        assert!(main_sym.is_function_definition());
        let msg_sym = find("msg");
        assert_eq!(msg_sym.storage_class, StorageClass::Static);
        assert_eq!(msg_sym.section, SectionRef::Index(2));

        let text_sym = find(".text");
        match text_sym.aux_record().unwrap() {
            Some(AuxRecord::SectionDefinition { length, number_of_relocations, .. }) => {
                assert_eq!(length, 7);
                assert_eq!(number_of_relocations, 1);
            }
            other => panic!("unexpected aux record {:?}", other),
        }

        let weak = find("handler");
        assert!(weak.is_weak_external());
        let default = find(".weak.handler.default");
        assert_eq!(default.value, 6);
        match weak.aux_record().unwrap() {
            Some(AuxRecord::WeakExternal { tag_index, .. }) => assert_eq!(tag_index, default.index),
            other => panic!("unexpected aux record {:?}", other),
        }
        match find("alias").aux_record().unwrap() {
            Some(AuxRecord::WeakExternal { tag_index, .. }) => assert_eq!(tag_index, main_sym.index),
            other => panic!("unexpected aux record {:?}", other),
        }
    }

    #[test]
    fn associative_comdat_points_at_its_leader() {
        let mut s = VpeStreamer::new(Machine::I386);
        let key = s.symbol("_key");
        let leader = s.section_directive(".text$key", "xr", Some((ComdatSelection::Any, key))).unwrap();
        s.emit_label(key);
        s.emit_bytes(&[0xc3]);
        s.section_directive(".xdata$key", "dr", Some((ComdatSelection::Associative, key)));
        s.emit_bytes(&[1, 2, 3, 4]);

        let model = s.finish().to_model().unwrap();
        let bytes = write_object(&model, false).unwrap();
        let obj = VpeObject::from_bytes(&bytes).unwrap();
        let defs: Vec<_> = obj.symbols()
            .map(|s| s.unwrap())
            .filter(|s| s.is_section_definition())
            .map(|s| s.aux_record().unwrap())
            .collect();
        match &defs[4] {
            Some(AuxRecord::SectionDefinition { number, selection, .. }) => {
                assert_eq!(*number, leader.index() as u32 + 1);
                assert_eq!(*selection, ComdatSelection::Associative.code());
            }
            other => panic!("unexpected aux record {:?}", other),
        }
    }

    #[test]
    fn unsupported_relocation_is_an_error() {
        let mut s = VpeStreamer::new(Machine::I386);
        let x = s.symbol("x");
        s.emit_fixup(x, FixupKind::Data8, 0);
        assert!(s.finish().to_model().is_err());
    }

    #[test]
    fn random_data_survives_lowering() {
        let seed: u64 = 0x5eed_cafe;
        let mut rng: MersenneTwister = SeedableRng::from_seed(seed);

        for _ in 0..16 {
            let mut s = VpeStreamer::new(Machine::Amd64);
            let data = s.data_section();
            s.switch_section(data);
            let mut expected = Vec::new();
            for _ in 0..rng.gen_range(1, 32) {
                if rng.gen() {
                    let n = rng.gen_range(1, 40);
                    let chunk: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
                    s.emit_bytes(&chunk);
                    expected.extend_from_slice(&chunk);
                } else {
                    let n = rng.gen_range(0, 40);
                    s.emit_zeros(n as u64);
                    expected.resize(expected.len() + n, 0);
                }
            }
            let model = s.finish().to_model().unwrap();
            let bytes = write_object(&model, rng.gen()).unwrap();
            let obj = VpeObject::from_bytes(&bytes).unwrap();
            let sec = obj.section(2).unwrap();
            assert_eq!(obj.section_contents(sec).unwrap(), &expected[..]);
        }
    }
}
