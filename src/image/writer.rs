//! ELF image writer.
//!
//! Lays out a building image (section addresses inside their segments,
//! then file offsets) and encodes it with the `object` crate's ELF
//! structures.

use object::elf;
use object::endian::{I32, I64, U16, U32, U64};
use object::pod::bytes_of;
use object::Endianness;

use super::{Class, Image, RelocationTable, Section, SectionBody, Segment, SymbolTable};
use crate::error::{Error, Result};
use crate::utils::align_up;

fn u16(v: u16) -> U16<Endianness> {
    U16::new(Endianness::Little, v)
}
fn u32(v: u32) -> U32<Endianness> {
    U32::new(Endianness::Little, v)
}
fn u64(v: u64) -> U64<Endianness> {
    U64::new(Endianness::Little, v)
}

/// Narrows a value for a 32-bit image.
fn w32(v: u64) -> Result<U32<Endianness>> {
    u32::try_from(v).map(u32).map_err(|_| Error::Overflow(v))
}

fn count16(n: usize) -> Result<U16<Endianness>> {
    u16::try_from(n)
        .ok()
        .filter(|&n| n < elf::SHN_LORESERVE)
        .map(u16)
        .ok_or(Error::Overflow(n as u64))
}

struct Sizes {
    ehsize: u64,
    phentsize: u64,
    shentsize: u64,
}

impl Sizes {
    fn of(class: Class) -> Self {
        match class {
            Class::Elf32 => Sizes {
                ehsize: 52,
                phentsize: 32,
                shentsize: 40,
            },
            Class::Elf64 => Sizes {
                ehsize: 64,
                phentsize: 56,
                shentsize: 64,
            },
        }
    }
}

/// Encodes the image and records the chosen layout back into it.
pub(super) fn write(image: &mut Image<'_>) -> Result<Vec<u8>> {
    let class = image.header.class;
    let sizes = Sizes::of(class);
    order_symbols(&mut image.sections);
    encode_tables(class, &mut image.sections)?;
    assign_addresses(&mut image.segments, &mut image.sections);
    let shoff = assign_offsets(class, &sizes, &mut image.segments, &mut image.sections);
    let total = shoff + sizes.shentsize * image.sections.len() as u64;

    let mut buffer = vec![0u8; total as usize];
    let phoff = if image.segments.is_empty() { 0 } else { sizes.ehsize };
    let shstrndx = image.shstrtab.map_or(0, |i| i.0);
    let header = image.header;
    let ident = elf::Ident {
        magic: elf::ELFMAG,
        class: match class {
            Class::Elf32 => elf::ELFCLASS32,
            Class::Elf64 => elf::ELFCLASS64,
        },
        data: elf::ELFDATA2LSB,
        version: elf::EV_CURRENT,
        os_abi: header.os_abi,
        abi_version: header.abi_version,
        padding: [0; 7],
    };
    let phnum = count16(image.segments.len())?;
    let shnum = count16(image.sections.len())?;
    let shstrndx = count16(shstrndx)?;

    match class {
        Class::Elf32 => {
            let file_header = elf::FileHeader32::<Endianness> {
                e_ident: ident,
                e_type: u16(header.e_type),
                e_machine: u16(header.machine),
                e_version: u32(elf::EV_CURRENT as u32),
                e_entry: w32(header.entry)?,
                e_phoff: w32(phoff)?,
                e_shoff: w32(shoff)?,
                e_flags: u32(header.flags),
                e_ehsize: u16(sizes.ehsize as u16),
                e_phentsize: u16(sizes.phentsize as u16),
                e_phnum: phnum,
                e_shentsize: u16(sizes.shentsize as u16),
                e_shnum: shnum,
                e_shstrndx: shstrndx,
            };
            put(&mut buffer, 0, bytes_of(&file_header));
        }
        Class::Elf64 => {
            let file_header = elf::FileHeader64::<Endianness> {
                e_ident: ident,
                e_type: u16(header.e_type),
                e_machine: u16(header.machine),
                e_version: u32(elf::EV_CURRENT as u32),
                e_entry: u64(header.entry),
                e_phoff: u64(phoff),
                e_shoff: u64(shoff),
                e_flags: u32(header.flags),
                e_ehsize: u16(sizes.ehsize as u16),
                e_phentsize: u16(sizes.phentsize as u16),
                e_phnum: phnum,
                e_shentsize: u16(sizes.shentsize as u16),
                e_shnum: shnum,
                e_shstrndx: shstrndx,
            };
            put(&mut buffer, 0, bytes_of(&file_header));
        }
    }

    for (i, segment) in image.segments.iter().enumerate() {
        let at = phoff + sizes.phentsize * i as u64;
        write_program_header(class, &mut buffer, at, segment)?;
    }

    for section in image.sections.iter().skip(1) {
        if !section.is_nobits() {
            put(&mut buffer, section.offset, section.data());
        }
    }

    // The null section header stays zeroed.
    for (i, section) in image.sections.iter().enumerate().skip(1) {
        let at = shoff + sizes.shentsize * i as u64;
        write_section_header(class, &mut buffer, at, section)?;
    }

    Ok(buffer)
}

fn put(buffer: &mut [u8], offset: u64, bytes: &[u8]) {
    let offset = offset as usize;
    buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn write_program_header(class: Class, buffer: &mut [u8], at: u64, segment: &Segment) -> Result<()> {
    match class {
        Class::Elf32 => {
            let ph = elf::ProgramHeader32::<Endianness> {
                p_type: u32(segment.kind),
                p_offset: w32(segment.offset)?,
                p_vaddr: w32(segment.vaddr)?,
                p_paddr: w32(segment.vaddr)?,
                p_filesz: w32(segment.file_size)?,
                p_memsz: w32(segment.mem_size)?,
                p_flags: u32(segment.flags),
                p_align: w32(segment.align)?,
            };
            put(buffer, at, bytes_of(&ph));
        }
        Class::Elf64 => {
            let ph = elf::ProgramHeader64::<Endianness> {
                p_type: u32(segment.kind),
                p_flags: u32(segment.flags),
                p_offset: u64(segment.offset),
                p_vaddr: u64(segment.vaddr),
                p_paddr: u64(segment.vaddr),
                p_filesz: u64(segment.file_size),
                p_memsz: u64(segment.mem_size),
                p_align: u64(segment.align),
            };
            put(buffer, at, bytes_of(&ph));
        }
    }
    Ok(())
}

fn write_section_header(class: Class, buffer: &mut [u8], at: u64, section: &Section) -> Result<()> {
    match class {
        Class::Elf32 => {
            let sh = elf::SectionHeader32::<Endianness> {
                sh_name: u32(section.name_offset),
                sh_type: u32(section.sh_type),
                sh_flags: w32(section.flags)?,
                sh_addr: w32(section.addr)?,
                sh_offset: w32(section.offset)?,
                sh_size: w32(section.size())?,
                sh_link: u32(section.link),
                sh_info: u32(section.info),
                sh_addralign: w32(section.align)?,
                sh_entsize: w32(section.entsize)?,
            };
            put(buffer, at, bytes_of(&sh));
        }
        Class::Elf64 => {
            let sh = elf::SectionHeader64::<Endianness> {
                sh_name: u32(section.name_offset),
                sh_type: u32(section.sh_type),
                sh_flags: u64(section.flags),
                sh_addr: u64(section.addr),
                sh_offset: u64(section.offset),
                sh_size: u64(section.size()),
                sh_link: u32(section.link),
                sh_info: u32(section.info),
                sh_addralign: u64(section.align),
                sh_entsize: u64(section.entsize),
            };
            put(buffer, at, bytes_of(&sh));
        }
    }
    Ok(())
}

/// Puts local symbols first in every symbol table, as `sh_info` requires,
/// and follows the move in the relocation sections bound to it.
fn order_symbols(sections: &mut [Section]) {
    for table in 0..sections.len() {
        let Some(symbols) = sections[table].symbols_mut() else { continue };
        let new_index = symbols.order_locals_first();
        if new_index.iter().enumerate().all(|(old, &new)| old == new) {
            continue;
        }
        tracing::trace!("section {table}: moved local symbols first");
        for section in sections.iter_mut().filter(|s| s.link as usize == table) {
            if let Some(relocations) = section.relocations_mut() {
                relocations.remap_symbols(&new_index);
            }
        }
    }
}

/// Pushes symbol and relocation records into their section buffers.
fn encode_tables(class: Class, sections: &mut [Section]) -> Result<()> {
    for section in sections.iter_mut() {
        let data = match &section.body {
            SectionBody::Symbols(table) => {
                section.info = table.first_global() as u32;
                encode_symbols(class, table)?
            }
            SectionBody::Relocations(table) => encode_relocations(class, table)?,
            _ => continue,
        };
        section.size = data.len() as u64;
        section.data = data;
    }
    Ok(())
}

fn encode_symbols(class: Class, table: &SymbolTable) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(table.len() * class.sym_size() as usize);
    for sym in table.iter() {
        match class {
            Class::Elf32 => {
                let raw = elf::Sym32::<Endianness> {
                    st_name: u32(sym.name),
                    st_value: w32(sym.value)?,
                    st_size: w32(sym.size)?,
                    st_info: sym.info(),
                    st_other: sym.other,
                    st_shndx: u16(sym.shndx),
                };
                out.extend_from_slice(bytes_of(&raw));
            }
            Class::Elf64 => {
                let raw = elf::Sym64::<Endianness> {
                    st_name: u32(sym.name),
                    st_info: sym.info(),
                    st_other: sym.other,
                    st_shndx: u16(sym.shndx),
                    st_value: u64(sym.value),
                    st_size: u64(sym.size),
                };
                out.extend_from_slice(bytes_of(&raw));
            }
        }
    }
    Ok(out)
}

fn encode_relocations(class: Class, table: &RelocationTable) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(table.len() * class.rela_size() as usize);
    for rel in table.iter() {
        match class {
            Class::Elf32 => {
                if rel.r_type > 0xff || rel.symbol > 0x00ff_ffff {
                    return Err(Error::Overflow(u64::from(rel.symbol.max(rel.r_type))));
                }
                let addend = i32::try_from(rel.addend).map_err(|_| Error::Overflow(rel.addend as u64))?;
                let raw = elf::Rela32::<Endianness> {
                    r_offset: w32(rel.offset)?,
                    r_info: u32((rel.symbol << 8) | rel.r_type),
                    r_addend: I32::new(Endianness::Little, addend),
                };
                out.extend_from_slice(bytes_of(&raw));
            }
            Class::Elf64 => {
                let raw = elf::Rela64::<Endianness> {
                    r_offset: u64(rel.offset),
                    r_info: u64((u64::from(rel.symbol) << 32) | u64::from(rel.r_type)),
                    r_addend: I64::new(Endianness::Little, rel.addend),
                };
                out.extend_from_slice(bytes_of(&raw));
            }
        }
    }
    Ok(out)
}

/// Places member sections inside their segments in insertion order and
/// derives each segment's extent and alignment from its members.
fn assign_addresses(segments: &mut [Segment], sections: &mut [Section]) {
    let mut cursor = 0u64;
    for (index, segment) in segments.iter_mut().enumerate() {
        let align = sections
            .iter()
            .filter(|s| s.segment == Some(index))
            .map(|s| s.align)
            .fold(segment.align, u64::max);
        let vaddr = if segment.auto_place {
            align_up(cursor, align)
        } else {
            segment.vaddr
        };
        let mut addr = vaddr;
        let mut file_end = vaddr;
        let mut empty_at_end = false;
        for section in sections.iter_mut().filter(|s| s.segment == Some(index)) {
            addr = align_up(addr, section.align);
            section.addr = addr;
            addr += section.size();
            empty_at_end = section.size() == 0;
            if !section.is_nobits() {
                file_end = addr;
            }
        }
        segment.vaddr = vaddr;
        segment.align = align;
        segment.mem_size = addr - vaddr;
        segment.file_size = file_end - vaddr;
        segment.auto_place = false;
        // A trailing empty section sits at `addr`; the next segment starts past it.
        cursor = cursor.max(if empty_at_end { addr + 1 } else { addr });
        tracing::trace!(
            "segment {index}: vaddr {vaddr:#x} memsz {:#x} filesz {:#x}",
            segment.mem_size,
            segment.file_size
        );
    }
}

/// Assigns file offsets congruent to addresses and returns the section
/// header table offset.
fn assign_offsets(class: Class, sizes: &Sizes, segments: &mut [Segment], sections: &mut [Section]) -> u64 {
    let mut cursor = sizes.ehsize + sizes.phentsize * segments.len() as u64;
    for (index, segment) in segments.iter_mut().enumerate() {
        let align = segment.align.max(1);
        let offset = align_up(cursor, align) + segment.vaddr % align;
        segment.offset = offset;
        for section in sections.iter_mut().filter(|s| s.segment == Some(index)) {
            section.offset = offset + (section.addr - segment.vaddr);
        }
        cursor = cursor.max(offset + segment.file_size);
    }
    for section in sections.iter_mut().skip(1).filter(|s| s.segment.is_none()) {
        if section.is_nobits() {
            section.offset = cursor;
            continue;
        }
        section.offset = align_up(cursor, section.align);
        cursor = section.offset + section.size();
    }
    align_up(cursor, class.word_size())
}
