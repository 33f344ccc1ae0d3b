use log::info;
use rustc_demangle::demangle;
use vpe_object::base_reloc::base_reloc_type_name;
use vpe_object::debug::debug_type_name;
use vpe_object::header::{DataDirectoryKind, Machine};
use vpe_object::import::ImportedSymbol;
use vpe_object::relocation::relocation_type_name;
use vpe_object::symbol::{ReservedSection, SectionRef};
use vpe_object::{VpeObject, VpeObjectError};

use crate::table::Table;

fn text(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn hex<T: std::fmt::LowerHex>(v: T) -> String {
    format!("{:#x}", v)
}

fn machine_name(m: Machine) -> String {
    match m {
        Machine::Unknown(v) => format!("unknown ({:#06x})", v),
        m => format!("{:?}", m),
    }
}

fn section_ref(s: SectionRef) -> String {
    match s {
        SectionRef::Index(i) => i.to_string(),
        SectionRef::Reserved(ReservedSection::Undefined) => "UNDEF".to_string(),
        SectionRef::Reserved(ReservedSection::Absolute) => "ABS".to_string(),
        SectionRef::Reserved(ReservedSection::Debug) => "DEBUG".to_string(),
        SectionRef::Reserved(ReservedSection::Unknown(n)) => format!("?{}", n),
    }
}

fn imported(sym: ImportedSymbol) -> (String, String) {
    match sym {
        ImportedSymbol::Ordinal(o) => ("".to_string(), format!("ordinal {}", o)),
        ImportedSymbol::Name { hint, name } => (hint.to_string(), text(name)),
    }
}

fn absent(obj: &VpeObject, what: &str) {
    info!("{} has no {} directory", obj.file_format_name(), what);
}

pub fn headers(obj: &VpeObject) -> Table {
    let mut t = Table::new(&["Field", "Value"]);
    let fh = obj.file_header();
    t.field("format", obj.file_format_name().to_string());
    t.field("header", format!("{:?}", obj.header_kind()));
    t.field("machine", machine_name(obj.machine()));
    t.field("sections", fh.number_of_sections.to_string());
    t.field("time/date stamp", hex(fh.time_date_stamp));
    t.field("symbol table", hex(fh.pointer_to_symbol_table));
    t.field("symbols", fh.number_of_symbols.to_string());
    t.field("characteristics", format!("{:?}", fh.characteristics));
    t.field("relocatable", obj.is_relocatable_object().to_string());

    if let Some(oh) = obj.optional_header() {
        t.field("optional header", format!("{:?}", oh.kind));
        t.field("linker version", format!("{}.{}", oh.major_linker_version, oh.minor_linker_version));
        t.field("entry point", obj.start_address().map_or_else(String::new, hex));
        t.field("image base", hex(obj.image_base()));
        t.field("section alignment", hex(oh.section_alignment));
        t.field("file alignment", hex(oh.file_alignment));
        t.field("size of image", hex(oh.size_of_image));
        t.field("size of headers", hex(oh.size_of_headers));
        t.field("subsystem", oh.subsystem.to_string());
        t.field("DLL characteristics", format!("{:?}", oh.dll_characteristics));
        t.field("stack reserve/commit",
                format!("{:#x}/{:#x}", oh.size_of_stack_reserve, oh.size_of_stack_commit));
        t.field("heap reserve/commit",
                format!("{:#x}/{:#x}", oh.size_of_heap_reserve, oh.size_of_heap_commit));
        for kind in DataDirectoryKind::ALL {
            if let Some(d) = obj.data_directory(kind) {
                t.field(&format!("{:?} directory", kind),
                        format!("{:#x} ({:#x} bytes)", d.virtual_address, d.size));
            }
        }
    }
    t
}

pub fn sections(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["#", "Name", "VirtAddr", "VirtSize", "RawPtr", "RawSize",
                             "Relocs", "Align", "Characteristics"]);
    for s in obj.sections() {
        t.push(vec![
            s.index.to_string(),
            text(obj.section_name(s)?),
            hex(s.virtual_address),
            hex(s.virtual_size),
            hex(s.pointer_to_raw_data),
            hex(obj.section_size(s)),
            obj.section_relocations(s)?.len().to_string(),
            s.alignment().to_string(),
            format!("{:?}", s.characteristics),
        ]);
    }
    Ok(t)
}

pub fn symbols(obj: &VpeObject, demangled: bool) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Index", "Value", "Section", "Type", "Class", "Aux", "Name"]);
    for sym in obj.symbols() {
        let sym = sym?;
        let name = match std::str::from_utf8(sym.name) {
            Ok(n) if demangled => format!("{:#}", demangle(n)),
            _ => text(sym.name),
        };
        t.push(vec![
            sym.index.to_string(),
            hex(sym.value),
            section_ref(sym.section),
            format!("{:#06x}", sym.typ),
            format!("{:?}", sym.storage_class),
            sym.number_of_aux_symbols.to_string(),
            name,
        ]);
    }
    Ok(t)
}

pub fn relocations(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Section", "Offset", "Type", "Symbol"]);
    for s in obj.sections() {
        let name = text(obj.section_name(s)?);
        for r in obj.section_relocations(s)? {
            let target = match obj.relocation_symbol(&r)? {
                Some(sym) => text(sym.name),
                None => format!("<index {}>", r.symbol_table_index),
            };
            t.push(vec![
                name.clone(),
                hex(r.virtual_address),
                relocation_type_name(obj.machine(), r.typ).to_string(),
                target,
            ]);
        }
    }
    Ok(t)
}

pub fn imports(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["DLL", "Hint", "Symbol"]);
    let dir = match obj.import_directory()? {
        Some(d) => d,
        None => {
            absent(obj, "import");
            return Ok(t);
        }
    };
    for entry in dir {
        let entry = entry?;
        let dll = text(entry.name()?);
        for sym in entry.lookup_table_symbols()? {
            let (hint, name) = imported(sym?);
            t.push(vec![dll.clone(), hint, name]);
        }
    }
    Ok(t)
}

pub fn delay_imports(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["DLL", "Hint", "Symbol", "Address"]);
    let dir = match obj.delay_import_directory()? {
        Some(d) => d,
        None => {
            absent(obj, "delay import");
            return Ok(t);
        }
    };
    for entry in dir {
        let dll = text(entry.name()?);
        for (i, sym) in entry.imported_symbols()?.enumerate() {
            let (hint, name) = imported(sym?);
            let address = entry.import_address(i as u32)?;
            t.push(vec![dll.clone(), hint, name, hex(address)]);
        }
    }
    Ok(t)
}

pub fn exports(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Ordinal", "RVA", "Name", "Forwarder"]);
    let dir = match obj.export_directory()? {
        Some(d) => d,
        None => {
            absent(obj, "export");
            return Ok(t);
        }
    };
    info!("exports of {}", text(dir.dll_name()?));
    for e in dir.entries() {
        let e = e?;
        t.push(vec![
            e.ordinal.to_string(),
            hex(e.rva),
            text(e.name),
            e.forwarder.map(text).unwrap_or_default(),
        ]);
    }
    Ok(t)
}

pub fn base_relocs(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Page", "RVA", "Type"]);
    let relocs = match obj.base_relocs()? {
        Some(r) => r,
        None => {
            absent(obj, "base relocation");
            return Ok(t);
        }
    };
    for r in relocs {
        let r = r?;
        t.push(vec![hex(r.page_rva), hex(r.rva()), base_reloc_type_name(r.typ).to_string()]);
    }
    Ok(t)
}

pub fn debug(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Type", "Size", "RVA", "Pointer", "Details"]);
    let dir = match obj.debug_directory()? {
        Some(d) => d,
        None => {
            absent(obj, "debug");
            return Ok(t);
        }
    };
    let pdb = obj.debug_pdb_info()?;
    let mut pdb_shown = false;
    for e in dir {
        let details = match &pdb {
            Some(p) if !pdb_shown && e.typ == vpe_object::debug::IMAGE_DEBUG_TYPE_CODEVIEW => {
                pdb_shown = true;
                let guid: String = p.guid.iter().map(|b| format!("{:02x}", b)).collect();
                format!("{} age {} {}", guid, p.age, text(p.path))
            }
            _ => String::new(),
        };
        t.push(vec![
            debug_type_name(e.typ).to_string(),
            hex(e.size_of_data),
            hex(e.address_of_raw_data),
            hex(e.pointer_to_raw_data),
            details,
        ]);
    }
    Ok(t)
}

pub fn tls(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Field", "Value"]);
    let d = match obj.tls_directory()? {
        Some(d) => d,
        None => {
            absent(obj, "TLS");
            return Ok(t);
        }
    };
    t.field("raw data start", hex(d.start_address_of_raw_data));
    t.field("raw data end", hex(d.end_address_of_raw_data));
    t.field("index address", hex(d.address_of_index));
    t.field("callbacks", hex(d.address_of_callbacks));
    t.field("zero fill", hex(d.size_of_zero_fill));
    t.field("characteristics", hex(d.characteristics));
    Ok(t)
}

pub fn load_config(obj: &VpeObject) -> Result<Table, VpeObjectError> {
    let mut t = Table::new(&["Field", "Value"]);
    let c = match obj.load_config()? {
        Some(c) => c,
        None => {
            absent(obj, "load config");
            return Ok(t);
        }
    };
    t.field("size", hex(c.size));
    t.field("time/date stamp", hex(c.time_date_stamp));
    t.field("version", format!("{}.{}", c.major_version, c.minor_version));
    t.field("global flags clear", hex(c.global_flags_clear));
    t.field("global flags set", hex(c.global_flags_set));
    t.field("lock prefix table", hex(c.lock_prefix_table));
    t.field("process heap flags", hex(c.process_heap_flags));
    t.field("dependent load flags", hex(c.dependent_load_flags));
    t.field("security cookie", hex(c.security_cookie));
    t.field("SEH table", hex(c.se_handler_table));
    t.field("SEH count", c.se_handler_count.to_string());
    t.field("CFG check function", hex(c.guard_cf_check_function));
    t.field("CFG dispatch function", hex(c.guard_cf_dispatch_function));
    t.field("CFG function table", hex(c.guard_cf_function_table));
    t.field("CFG function count", c.guard_cf_function_count.to_string());
    t.field("guard flags", hex(c.guard_flags));
    Ok(t)
}

#[cfg(test)]
mod tests {
    use vpe_object::header::Machine;
    use vpe_object::relocation::IMAGE_REL_AMD64_REL32;
    use vpe_object::section::SectionCharacteristics as C;
    use vpe_object::symbol::{ReservedSection, SectionRef, StorageClass};
    use vpe_object::writer::{ObjectModel, RelocationModel, SectionModel, SymbolModel, write_object};
    use vpe_object::VpeObject;

    use crate::dump;

    fn object() -> Vec<u8> {
        let mut m = ObjectModel::new(Machine::Amd64);
        m.sections.push(SectionModel {
            name: b".text".to_vec(),
            characteristics: (C::CNT_CODE | C::MEM_EXECUTE | C::MEM_READ).with_alignment(16),
            data: vec![0xe8, 0, 0, 0, 0, 0xc3],
            relocations: vec![RelocationModel {
                virtual_address: 1,
                symbol_table_index: 1,
                typ: IMAGE_REL_AMD64_REL32,
            }],
            ..Default::default()
        });
        m.symbols.push(SymbolModel {
            name: b"main".to_vec(),
            value: 0,
            section: SectionRef::Index(1),
            typ: 0x20,
            storage_class: StorageClass::External,
            aux: None,
        });
        m.symbols.push(SymbolModel {
            name: b"_ZN4core9panicking5panic17h0123456789abcdefE".to_vec(),
            value: 0,
            section: SectionRef::Reserved(ReservedSection::Undefined),
            typ: 0,
            storage_class: StorageClass::External,
            aux: None,
        });
        write_object(&m, false).unwrap()
    }

    #[test]
    fn object_reports() {
        let bytes = object();
        let obj = VpeObject::from_bytes(&bytes).unwrap();

        let h = dump::headers(&obj);
        assert!(h.rows.contains(&vec!["format".to_string(), "VPE-x86-64".to_string()]));
        assert!(h.rows.contains(&vec!["relocatable".to_string(), "true".to_string()]));

        let s = dump::sections(&obj).unwrap();
        assert_eq!(s.rows.len(), 1);
        assert_eq!(s.rows[0][1], ".text");
        assert_eq!(s.rows[0][5], "0x6");
        assert_eq!(s.rows[0][6], "1");
        assert_eq!(s.rows[0][7], "16");

        let r = dump::relocations(&obj).unwrap();
        assert_eq!(r.rows, vec![vec![
            ".text".to_string(),
            "0x1".to_string(),
            "IMAGE_REL_AMD64_REL32".to_string(),
            "_ZN4core9panicking5panic17h0123456789abcdefE".to_string(),
        ]]);
    }

    #[test]
    fn symbol_names_demangle_on_request() {
        let bytes = object();
        let obj = VpeObject::from_bytes(&bytes).unwrap();
        let plain = dump::symbols(&obj, false).unwrap();
        let pretty = dump::symbols(&obj, true).unwrap();
        assert_eq!(plain.rows[1][6], "_ZN4core9panicking5panic17h0123456789abcdefE");
        assert_eq!(pretty.rows[1][6], "core::panicking::panic");
        assert_eq!(pretty.rows[0][6], "main");
        assert_eq!(pretty.rows[1][2], "UNDEF");
    }

    #[test]
    fn objects_have_no_directories() {
        let bytes = object();
        let obj = VpeObject::from_bytes(&bytes).unwrap();
        assert!(dump::imports(&obj).unwrap().rows.is_empty());
        assert!(dump::exports(&obj).unwrap().rows.is_empty());
        assert!(dump::tls(&obj).unwrap().rows.is_empty());
        assert!(dump::load_config(&obj).unwrap().rows.is_empty());
        assert!(dump::base_relocs(&obj).unwrap().rows.is_empty());
    }
}
