//! Staged image parser.
//!
//! Symbol and relocation records hold only indices into string and symbol
//! tables, so sections are decoded in a fixed order: string tables first,
//! then symbol tables, then relocation and note sections.

use object::elf::{self, FileHeader32, FileHeader64};
use object::read::elf::{FileHeader, ProgramHeader as _, Rela as _, SectionHeader as _, Sym as _};
use object::read::SectionIndex;
use object::Endianness;

use super::{
    Class, ImageHeader, NoteStream, Relocation, RelocationTable, Section, SectionBody, Segment,
    StringTable, Symbol, SymbolTable,
};
use crate::error::{Error, Result};

// Offsets into `e_ident`.
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const EI_NIDENT: usize = 16;

pub(super) struct Parsed {
    pub header: ImageHeader,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
    pub shstrtab: Option<SectionIndex>,
}

pub(super) fn parse(data: &[u8]) -> Result<Parsed> {
    match check_ident(data)? {
        Class::Elf32 => parse_class::<FileHeader32<Endianness>>(data, Class::Elf32),
        Class::Elf64 => parse_class::<FileHeader64<Endianness>>(data, Class::Elf64),
    }
}

/// Checks magic, format version, byte order and class.
fn check_ident(data: &[u8]) -> Result<Class> {
    let ident = data
        .get(..EI_NIDENT)
        .ok_or_else(|| Error::format(format!("image too small for an ELF header ({} bytes)", data.len())))?;
    let magic = &ident[..elf::ELFMAG.len()];
    if magic != elf::ELFMAG {
        return Err(Error::format(format!("bad magic {magic:02x?}")));
    }
    let version = ident[EI_VERSION];
    if version != elf::EV_CURRENT {
        return Err(Error::format(format!("unsupported format version {version}")));
    }
    let encoding = ident[EI_DATA];
    if encoding != elf::ELFDATA2LSB {
        return Err(Error::format(format!(
            "unsupported byte order {encoding}; only little-endian images are supported"
        )));
    }
    match ident[EI_CLASS] {
        elf::ELFCLASS32 => Ok(Class::Elf32),
        elf::ELFCLASS64 => Ok(Class::Elf64),
        other => Err(Error::format(format!("unsupported class {other}"))),
    }
}

fn parse_class<Elf: FileHeader<Endian = Endianness>>(data: &[u8], class: Class) -> Result<Parsed> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    let version = header.e_version(endian);
    if version != u32::from(elf::EV_CURRENT) {
        return Err(Error::format(format!("unsupported object version {version}")));
    }
    let ident = header.e_ident();
    let image_header = ImageHeader {
        class,
        e_type: header.e_type(endian),
        machine: header.e_machine(endian),
        os_abi: ident.os_abi,
        abi_version: ident.abi_version,
        flags: header.e_flags(endian),
        entry: header.e_entry(endian).into(),
    };

    let segments: Vec<Segment> = header
        .program_headers(endian, data)?
        .iter()
        .map(|ph| {
            Segment::parsed(
                ph.p_type(endian),
                ph.p_flags(endian),
                ph.p_vaddr(endian).into(),
                ph.p_offset(endian).into(),
                ph.p_filesz(endian).into(),
                ph.p_memsz(endian).into(),
                ph.p_align(endian).into(),
            )
        })
        .collect();
    tracing::trace!("parsed {} program headers", segments.len());

    let headers = header.section_headers(endian, data)?;
    let mut sections = Vec::with_capacity(headers.len().max(1));
    for (index, sh) in headers.iter().enumerate() {
        let bytes = sh
            .data(endian, data)
            .map_err(|_| Error::format(format!("contents of section {index} are out of bounds")))?;
        let size: u64 = sh.sh_size(endian).into();
        let align: u64 = sh.sh_addralign(endian).into();
        sections.push(Section {
            name: String::new(),
            name_offset: sh.sh_name(endian),
            sh_type: sh.sh_type(endian),
            flags: sh.sh_flags(endian).into(),
            addr: sh.sh_addr(endian).into(),
            offset: sh.sh_offset(endian).into(),
            size,
            link: sh.sh_link(endian),
            info: sh.sh_info(endian),
            align: align.max(1),
            entsize: sh.sh_entsize(endian).into(),
            segment: None,
            data: bytes.to_vec(),
            body: SectionBody::Data,
        });
    }
    if sections.is_empty() {
        sections.push(Section::null());
    }

    // Stage 1: string tables and section names.
    for (index, section) in sections.iter_mut().enumerate() {
        if section.sh_type == elf::SHT_STRTAB {
            let bytes = std::mem::take(&mut section.data);
            let table = StringTable::from_bytes(bytes)
                .map_err(|e| e.in_context(format_args!("section {index}")))?;
            section.body = SectionBody::Strings(table);
        }
    }
    let shstrtab = resolve_section_names(&mut sections, header.shstrndx(endian, data)?, headers.len())?;
    tracing::trace!("resolved section names");

    // Stage 2: symbol tables.
    for (index, sh) in headers.iter().enumerate() {
        if sh.sh_type(endian) != elf::SHT_SYMTAB {
            continue;
        }
        let link = sh.sh_link(endian) as usize;
        let strings = sections.get(link).and_then(Section::string_table).ok_or_else(|| {
            Error::format(format!(
                "symbol table {index} links to section {link}, which is not a string table"
            ))
        })?;
        let raw = sh.data_as_array::<Elf::Sym, _>(endian, data)?;
        let mut symbols = Vec::with_capacity(raw.len());
        for (i, sym) in raw.iter().enumerate() {
            let name = sym.st_name(endian);
            if strings.get(name).is_none() {
                return Err(Error::format(format!(
                    "symbol {i} of table {index} has invalid name offset {name:#x}"
                )));
            }
            let shndx = sym.st_shndx(endian);
            if shndx != elf::SHN_UNDEF && shndx < elf::SHN_LORESERVE && shndx as usize >= sections.len() {
                return Err(Error::format(format!(
                    "symbol {i} of table {index} refers to section {shndx}, out of range"
                )));
            }
            symbols.push(Symbol::from_info(
                name,
                sym.st_info(),
                sym.st_other(),
                shndx,
                sym.st_value(endian).into(),
                sym.st_size(endian).into(),
            ));
        }
        tracing::trace!("symbol table {index}: {} symbols", symbols.len());
        sections[index].body = SectionBody::Symbols(SymbolTable::from_symbols(symbols));
    }

    // Stage 3: relocation and note sections.
    for (index, sh) in headers.iter().enumerate() {
        match sh.sh_type(endian) {
            elf::SHT_RELA => {
                let link = sh.sh_link(endian) as usize;
                let target = sh.sh_info(endian) as usize;
                let symbols = sections
                    .get(link)
                    .and_then(Section::symbol_table)
                    .map(SymbolTable::len)
                    .ok_or_else(|| {
                        Error::format(format!(
                            "relocation section {index} links to section {link}, which is not a symbol table"
                        ))
                    })?;
                if target == 0 || target >= sections.len() {
                    return Err(Error::format(format!(
                        "relocation section {index} targets invalid section {target}"
                    )));
                }
                let relocations = sh
                    .data_as_array::<Elf::Rela, _>(endian, data)?
                    .iter()
                    .map(|rela| {
                        let symbol = rela.r_sym(endian, false);
                        if symbol as usize >= symbols {
                            return Err(Error::format(format!(
                                "relocation in section {index} refers to symbol {symbol}, out of range ({symbols})"
                            )));
                        }
                        Ok(Relocation {
                            offset: rela.r_offset(endian).into(),
                            r_type: rela.r_type(endian, false),
                            symbol,
                            addend: rela.r_addend(endian).into(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                sections[index].body = SectionBody::Relocations(RelocationTable::from_relocations(relocations));
            }
            elf::SHT_NOTE => {
                let bytes = std::mem::take(&mut sections[index].data);
                let notes = NoteStream::parse(bytes).map_err(|e| e.in_context(format_args!("section {index}")))?;
                sections[index].body = SectionBody::Notes(notes);
            }
            _ => {}
        }
    }

    for section in sections.iter_mut().skip(1) {
        if section.flags & u64::from(elf::SHF_ALLOC) != 0 {
            section.segment = owning_segment(&segments, section.addr, section.size);
        }
    }

    Ok(Parsed {
        header: image_header,
        segments,
        sections,
        shstrtab,
    })
}

/// Finds the segment holding a section by address containment. An empty
/// section has no byte to contain, so it may also sit at the start of an
/// empty segment or at the very end of a segment.
fn owning_segment(segments: &[Segment], addr: u64, size: u64) -> Option<usize> {
    let contained = segments.iter().position(|seg| seg.contains(addr));
    if contained.is_some() || size != 0 {
        return contained;
    }
    segments
        .iter()
        .position(|seg| seg.vaddr() == addr)
        .or_else(|| segments.iter().position(|seg| seg.vaddr().checked_add(seg.mem_size()) == Some(addr)))
}

fn resolve_section_names(sections: &mut [Section], shstrndx: u32, count: usize) -> Result<Option<SectionIndex>> {
    if count == 0 {
        return Ok(None);
    }
    let index = shstrndx as usize;
    let table = sections
        .get(index)
        .filter(|_| index != 0)
        .and_then(Section::string_table)
        .ok_or_else(|| Error::format(format!("section name table index {shstrndx} is not a string table")))?;
    let names = sections
        .iter()
        .enumerate()
        .map(|(i, s)| {
            table
                .get(s.name_offset)
                .map(str::to_string)
                .ok_or_else(|| Error::format(format!("section {i} has invalid name offset {:#x}", s.name_offset)))
        })
        .collect::<Result<Vec<_>>>()?;
    for (section, name) in sections.iter_mut().zip(names) {
        section.name = name;
    }
    Ok(Some(SectionIndex(index)))
}
