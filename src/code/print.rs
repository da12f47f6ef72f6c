//! Human-readable dumps.

use std::fmt::{self, Write};

use object::elf;

use super::info::SymbolAttribute;
use super::symbol::CodeSymbol;
use super::CodeObject;
use crate::amdgpu::{machine_model_name, profile_name, rounding_mode_name, HsaSegment, EF_AMDGPU_XNACK};
use crate::arch::{AmdGpu, Architecture};
use crate::image::{Class, Section};
use crate::kernel_code::{KernelCode, KERNEL_CODE_SIZE};

/// Renders kernel machine code.
pub trait Disassembler {
    fn disassemble(&self, code: &[u8], out: &mut dyn Write) -> fmt::Result;
}

/// Prints code as rows of hex bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexDump;

impl Disassembler for HexDump {
    fn disassemble(&self, code: &[u8], out: &mut dyn Write) -> fmt::Result {
        for (row, chunk) in code.chunks(16).enumerate() {
            write!(out, "    {:08x}:", row * 16)?;
            for byte in chunk {
                write!(out, " {byte:02x}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl CodeObject<'_, '_> {
    /// Prints the whole object: header, notes, segments, sections and symbols.
    pub fn print(&self, out: &mut dyn Write, disassembler: &dyn Disassembler) -> fmt::Result {
        let header = self.image().header();
        let class = match header.class {
            Class::Elf32 => "ELF32",
            Class::Elf64 => "ELF64",
        };
        writeln!(
            out,
            "AMD HSA Code Object ({class}, xnack {}, {:?})",
            if header.flags & EF_AMDGPU_XNACK != 0 { "on" } else { "off" },
            self.state()
        )?;
        self.print_notes(out)?;
        self.print_segments(out)?;
        self.print_sections(out)?;
        self.print_symbols(out, disassembler)
    }

    pub fn print_notes(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "Notes:")?;
        note_line(out, "Version", self.note_version())?;
        match self.note_hsail() {
            Ok(Some(h)) => writeln!(
                out,
                "  HSAIL: {}.{}, profile {}, machine model {}, rounding {}",
                h.major,
                h.minor,
                profile_name(h.profile),
                machine_model_name(h.machine_model),
                rounding_mode_name(h.default_float_round)
            )?,
            other => note_line(out, "HSAIL", other.map(|h| h.map(|_| "")))?,
        }
        note_line(out, "ISA", self.note_isa())?;
        match self.note_producer() {
            Ok(Some(p)) => writeln!(out, "  Producer: {} {}.{}", p.name, p.major, p.minor)?,
            other => note_line(out, "Producer", other.map(|p| p.map(|_| "")))?,
        }
        note_line(out, "Producer options", self.note_producer_options())
    }

    pub fn print_segments(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "Segments:")?;
        for (i, seg) in self.image().segments().iter().enumerate() {
            let kind = HsaSegment::from_p_type(seg.kind()).map_or("other", HsaSegment::name);
            writeln!(
                out,
                "  [{i}] {kind:<15} {} vaddr {:#010x} offset {:#08x} filesz {:#x} memsz {:#x} align {}",
                segment_flags(seg.flags()),
                seg.vaddr(),
                seg.file_offset(),
                seg.file_size(),
                seg.mem_size(),
                seg.align()
            )?;
        }
        Ok(())
    }

    pub fn print_sections(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "Sections:")?;
        let image = self.image();
        for (i, section) in image.sections().iter().enumerate().skip(1) {
            writeln!(
                out,
                "  [{i}] {:<24} type {:#x} flags {:#x} addr {:#010x} size {:#x} align {} link {} info {}",
                section.name(),
                section.sh_type(),
                section.flags(),
                section.address(),
                section.size(),
                section.align(),
                section.link(),
                section.info()
            )?;
            self.print_relocations(out, section)?;
        }
        Ok(())
    }

    fn print_relocations(&self, out: &mut dyn Write, section: &Section) -> fmt::Result {
        let Some(relocations) = section.relocation_table() else {
            return Ok(());
        };
        let image = self.image();
        let symtab = object::read::SectionIndex(section.link() as usize);
        let symbols = image.section(symtab).and_then(Section::symbol_table);
        for rel in relocations.iter() {
            let name = symbols
                .and_then(|t| t.get(rel.symbol as usize))
                .and_then(|sym| image.symbol_name(symtab, sym).ok())
                .unwrap_or("?");
            writeln!(
                out,
                "      {:#010x} {:<22} {name} {:+}",
                rel.offset,
                AmdGpu.relocation_name(rel.r_type),
                rel.addend
            )?;
        }
        Ok(())
    }

    pub fn print_symbols(&self, out: &mut dyn Write, disassembler: &dyn Disassembler) -> fmt::Result {
        writeln!(out, "Symbols:")?;
        for symbol in self.symbols() {
            self.print_symbol(out, symbol, disassembler)?;
        }
        Ok(())
    }

    /// Prints every attribute that applies to `symbol`; kernels also get
    /// their code disassembled.
    pub fn print_symbol(&self, out: &mut dyn Write, symbol: &CodeSymbol, disassembler: &dyn Disassembler) -> fmt::Result {
        writeln!(out, "  {} ({:?})", symbol.qualified_name(), symbol.kind())?;
        for attribute in SymbolAttribute::ALL {
            if let Ok(value) = self.symbol_info(symbol, attribute) {
                writeln!(out, "    {}: {value}", attribute.name())?;
            }
        }
        if symbol.kernel().is_some() {
            match self.kernel_code(symbol) {
                Some(code) => disassembler.disassemble(code, out)?,
                None => writeln!(out, "    <code unavailable>")?,
            }
        }
        Ok(())
    }

    /// Machine code of a kernel, from its entry point to the end of the symbol.
    fn kernel_code(&self, symbol: &CodeSymbol) -> Option<&[u8]> {
        let section = self.image().section(symbol.section()?)?;
        let descriptor = KernelCode::parse(section.data_at(symbol.value(), KERNEL_CODE_SIZE as u64).ok()?).ok()?;
        let entry = u64::try_from(descriptor.kernel_code_entry_byte_offset)
            .ok()
            .filter(|&e| e <= symbol.size())
            .unwrap_or(KERNEL_CODE_SIZE as u64);
        let len = symbol.size().checked_sub(entry)?;
        section.data_at(symbol.value() + entry, len).ok()
    }
}

fn note_line<T: fmt::Display>(out: &mut dyn Write, label: &str, note: crate::error::Result<Option<T>>) -> fmt::Result {
    match note {
        Ok(Some(value)) => writeln!(out, "  {label}: {value}"),
        Ok(None) => writeln!(out, "  {label}: <absent>"),
        Err(e) => writeln!(out, "  {label}: <malformed: {e}>"),
    }
}

fn segment_flags(flags: u32) -> String {
    [(elf::PF_R, 'R'), (elf::PF_W, 'W'), (elf::PF_X, 'X')]
        .iter()
        .map(|&(bit, c)| if flags & bit != 0 { c } else { '-' })
        .collect()
}

impl fmt::Display for CodeObject<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f, &HexDump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_rows() {
        let mut out = String::new();
        HexDump.disassemble(&(0u8..20).collect::<Vec<_>>(), &mut out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("    00000000: 00 01 02"));
        assert_eq!(lines[1], "    00000010: 10 11 12 13");
    }

    #[test]
    fn flag_letters() {
        assert_eq!(segment_flags(elf::PF_R | elf::PF_X), "R-X");
        assert_eq!(segment_flags(0), "---");
    }
}
