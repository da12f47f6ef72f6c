//! Sections.
//!
//! A `Section` is one entry of the section header table together with its
//! contents. Table-like sections (string, symbol, relocation and note
//! sections) carry a typed body; everything else is a plain byte buffer.

use std::fmt;

use object::elf;
use object::read::SectionIndex;

use super::note::NoteStream;
use super::reloc::RelocationTable;
use super::strtab::StringTable;
use super::symbol::SymbolTable;
use crate::error::{Error, Result};
use crate::utils::align_up;

/// Parameters for [`Image::add_section`](super::Image::add_section).
#[derive(Debug, Clone, Default)]
pub struct SectionParams {
    pub name: String,
    /// `SHT_*` type code.
    pub sh_type: u32,
    /// `SHF_*` flags, including accelerator bits.
    pub flags: u64,
    pub link: u32,
    pub info: u32,
    pub align: u64,
    pub entsize: u64,
    /// Segment the section is placed in when the image is finalized.
    pub segment: Option<usize>,
}

/// Typed contents of a section.
#[derive(Debug, Clone)]
pub enum SectionBody {
    Data,
    Strings(StringTable),
    Symbols(SymbolTable),
    Relocations(RelocationTable),
    Notes(NoteStream),
}

/// One section of an image.
#[derive(Debug, Clone)]
pub struct Section {
    pub(crate) name: String,
    pub(crate) name_offset: u32,
    pub(crate) sh_type: u32,
    pub(crate) flags: u64,
    pub(crate) addr: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) align: u64,
    pub(crate) entsize: u64,
    /// Containing segment, derived by address containment on load.
    pub(crate) segment: Option<usize>,
    pub(crate) data: Vec<u8>,
    pub(crate) body: SectionBody,
}

impl Section {
    /// The reserved section at index 0.
    pub(crate) fn null() -> Self {
        Self::new(SectionParams::default(), 0, SectionBody::Data)
    }

    pub(crate) fn new(params: SectionParams, name_offset: u32, body: SectionBody) -> Self {
        Self {
            name: params.name,
            name_offset,
            sh_type: params.sh_type,
            flags: params.flags,
            addr: 0,
            offset: 0,
            size: 0,
            link: params.link,
            info: params.info,
            align: params.align.max(1),
            entsize: params.entsize,
            segment: params.segment,
            data: Vec::new(),
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_offset(&self) -> u32 {
        self.name_offset
    }

    pub fn sh_type(&self) -> u32 {
        self.sh_type
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn has_flags(&self, mask: u64) -> bool {
        self.flags & mask != 0
    }

    pub fn address(&self) -> u64 {
        self.addr
    }

    pub fn file_offset(&self) -> u64 {
        self.offset
    }

    pub fn link(&self) -> u32 {
        self.link
    }

    pub fn info(&self) -> u32 {
        self.info
    }

    pub fn align(&self) -> u64 {
        self.align
    }

    pub fn entsize(&self) -> u64 {
        self.entsize
    }

    pub fn segment(&self) -> Option<usize> {
        self.segment
    }

    pub fn is_nobits(&self) -> bool {
        self.sh_type == elf::SHT_NOBITS
    }

    pub fn body(&self) -> &SectionBody {
        &self.body
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        match &self.body {
            SectionBody::Strings(t) => t.len() as u64,
            SectionBody::Notes(n) => n.len() as u64,
            SectionBody::Symbols(t) if self.entsize != 0 => t.len() as u64 * self.entsize,
            SectionBody::Relocations(t) if self.entsize != 0 => t.len() as u64 * self.entsize,
            _ => self.size,
        }
    }

    /// File contents. Empty for no-bits sections.
    pub fn data(&self) -> &[u8] {
        match &self.body {
            SectionBody::Strings(t) => t.as_bytes(),
            SectionBody::Notes(n) => n.as_bytes(),
            _ => &self.data,
        }
    }

    /// Returns `len` bytes at `offset`.
    ///
    /// The whole range must lie inside the section; a partial overlap is an
    /// error rather than a short read.
    pub fn data_at(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let size = self.size();
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= size)
            .ok_or(Error::OutOfRange { offset, len, size })?;
        let data = self.data();
        if end > data.len() as u64 {
            return Err(Error::OutOfRange { offset, len, size: data.len() as u64 });
        }
        Ok(&data[offset as usize..end as usize])
    }

    pub fn string_table(&self) -> Option<&StringTable> {
        match &self.body {
            SectionBody::Strings(t) => Some(t),
            _ => None,
        }
    }

    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        match &self.body {
            SectionBody::Symbols(t) => Some(t),
            _ => None,
        }
    }

    pub fn relocation_table(&self) -> Option<&RelocationTable> {
        match &self.body {
            SectionBody::Relocations(t) => Some(t),
            _ => None,
        }
    }

    pub fn note_stream(&self) -> Option<&NoteStream> {
        match &self.body {
            SectionBody::Notes(n) => Some(n),
            _ => None,
        }
    }

    /// Appends `bytes` at the next `align`-aligned offset and returns that offset.
    pub fn add_data(&mut self, bytes: &[u8], align: u64) -> Result<u64> {
        self.check_data_body()?;
        check_align(align, format_args!("data in section {}", self.name))?;
        if self.is_nobits() {
            return Err(Error::format(format!(
                "cannot add file data to no-bits section {}",
                self.name
            )));
        }
        self.align = self.align.max(align);
        let offset = align_up(self.data.len() as u64, align);
        self.data.resize(offset as usize, 0);
        self.data.extend_from_slice(bytes);
        self.size = self.data.len() as u64;
        Ok(offset)
    }

    /// Reserves `size` zero bytes at the next `align`-aligned offset.
    ///
    /// No-bits sections only grow their declared size.
    pub fn add_zeroes(&mut self, size: u64, align: u64) -> Result<u64> {
        self.check_data_body()?;
        check_align(align, format_args!("data in section {}", self.name))?;
        self.align = self.align.max(align);
        let offset = align_up(self.size, align);
        self.size = offset + size;
        if !self.is_nobits() {
            self.data.resize(self.size as usize, 0);
        }
        Ok(offset)
    }

    fn check_data_body(&self) -> Result<()> {
        match self.body {
            SectionBody::Data => Ok(()),
            _ => Err(Error::format(format!("section {} is a table section", self.name))),
        }
    }

    pub(crate) fn strings_mut(&mut self) -> Option<&mut StringTable> {
        match &mut self.body {
            SectionBody::Strings(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn symbols_mut(&mut self) -> Option<&mut SymbolTable> {
        match &mut self.body {
            SectionBody::Symbols(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn relocations_mut(&mut self) -> Option<&mut RelocationTable> {
        match &mut self.body {
            SectionBody::Relocations(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn notes_mut(&mut self) -> Option<&mut NoteStream> {
        match &mut self.body {
            SectionBody::Notes(n) => Some(n),
            _ => None,
        }
    }
}

/// Index of the null section, used as a "no section" marker.
pub const NULL_SECTION: SectionIndex = SectionIndex(0);

/// Alignments are 0, 1 or a power of two.
pub(crate) fn check_align(align: u64, what: impl fmt::Display) -> Result<()> {
    if align <= 1 || align.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("{what}: alignment {align} is not a power of two")))
    }
}
