//! Generic object image.
//!
//! An [`Image`] is one ELF object held in memory. It has two lifecycles:
//!
//! - *build*: [`Image::new`] creates an empty image, sections, segments,
//!   symbols and notes are appended, and [`Image::finalize`] lays everything
//!   out and produces the file bytes.
//! - *parse*: [`Image::load`] and friends validate the header and walk the
//!   tables in dependency order (string tables, then symbol tables, then
//!   everything else) to populate the typed wrappers.
//!
//! Loaded and finalized images are read-only.

use memmap2::Mmap;
use object::elf;
use object::read::{SectionIndex, SymbolIndex};
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use crate::error::{Error, Result};

pub mod note;
mod reader;
pub mod reloc;
pub mod section;
pub mod segment;
pub mod strtab;
pub mod symbol;
mod writer;

pub use note::{Note, NoteStream};
pub use reloc::{Relocation, RelocationTable};
pub use section::{Section, SectionBody, SectionParams, NULL_SECTION};
pub use segment::{Segment, SegmentParams};
pub use strtab::StringTable;
pub use symbol::{Symbol, SymbolTable};

/// Word size of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Elf32,
    Elf64,
}

impl Class {
    pub(crate) fn word_size(self) -> u64 {
        match self {
            Class::Elf32 => 4,
            Class::Elf64 => 8,
        }
    }

    pub(crate) fn sym_size(self) -> u64 {
        match self {
            Class::Elf32 => 16,
            Class::Elf64 => 24,
        }
    }

    pub(crate) fn rela_size(self) -> u64 {
        match self {
            Class::Elf32 => 12,
            Class::Elf64 => 24,
        }
    }
}

/// File header fields chosen by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub class: Class,
    /// `ET_*` object type.
    pub e_type: u16,
    /// `EM_*` machine.
    pub machine: u16,
    pub os_abi: u8,
    pub abi_version: u8,
    pub flags: u32,
    pub entry: u64,
}

/// Backing storage of the raw image bytes.
#[derive(Debug)]
enum Buffer<'data> {
    Empty,
    Owned(Vec<u8>),
    Mapped(Mmap),
    Borrowed(&'data [u8]),
}

impl Deref for Buffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Buffer::Empty => &[],
            Buffer::Owned(v) => v,
            Buffer::Mapped(m) => m,
            Buffer::Borrowed(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Building,
    Finalized,
    Loaded,
}

/// An ELF object image.
#[derive(Debug)]
pub struct Image<'data> {
    header: ImageHeader,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    shstrtab: Option<SectionIndex>,
    strtab: Option<SectionIndex>,
    symtab: Option<SectionIndex>,
    note: Option<SectionIndex>,
    buffer: Buffer<'data>,
    mode: Mode,
}

impl<'data> Image<'data> {
    /// Creates an empty image for building. The section name string table
    /// is created immediately at index 1.
    pub fn new(header: ImageHeader) -> Self {
        let mut shstrtab = StringTable::new();
        let name_offset = shstrtab.add(".shstrtab").unwrap_or(0);
        let shstrtab = Section::new(
            SectionParams {
                name: ".shstrtab".to_string(),
                sh_type: elf::SHT_STRTAB,
                align: 1,
                ..Default::default()
            },
            name_offset,
            SectionBody::Strings(shstrtab),
        );
        Self {
            header,
            segments: Vec::new(),
            sections: vec![Section::null(), shstrtab],
            shstrtab: Some(SectionIndex(1)),
            strtab: None,
            symtab: None,
            note: None,
            buffer: Buffer::Empty,
            mode: Mode::Building,
        }
    }

    /// Parses an image viewing `data` without copying it.
    pub fn load(data: &'data [u8]) -> Result<Self> {
        Self::parse(Buffer::Borrowed(data))
    }

    /// Parses an image from an owned copy of the bytes.
    pub fn load_owned(data: Vec<u8>) -> Result<Self> {
        Self::parse(Buffer::Owned(data))
    }

    /// Memory-maps and parses the file at `path`.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and the image never hands out
        // references that outlive it.
        let mmap = unsafe { Mmap::map(&file)? };
        tracing::debug!("mapped {} ({} bytes)", path.display(), mmap.len());
        Self::parse(Buffer::Mapped(mmap))
    }

    fn parse(buffer: Buffer<'data>) -> Result<Self> {
        let parsed = reader::parse(&buffer)?;
        let mut image = Self {
            header: parsed.header,
            segments: parsed.segments,
            sections: parsed.sections,
            shstrtab: parsed.shstrtab,
            strtab: None,
            symtab: None,
            note: None,
            buffer,
            mode: Mode::Loaded,
        };
        image.symtab = image.first_section(|_, s| s.symbol_table().is_some());
        image.strtab = match image.symtab {
            Some(symtab) => Some(SectionIndex(image.sections[symtab.0].link as usize)),
            None => {
                let shstrtab = image.shstrtab;
                image.first_section(|i, s| s.string_table().is_some() && Some(i) != shstrtab)
            }
        };
        image.note = image.first_section(|_, s| s.note_stream().is_some());
        tracing::debug!(
            "loaded image: {} segments, {} sections",
            image.segments.len(),
            image.sections.len()
        );
        Ok(image)
    }

    fn first_section(&self, pred: impl Fn(SectionIndex, &Section) -> bool) -> Option<SectionIndex> {
        self.sections
            .iter()
            .enumerate()
            .position(|(i, s)| pred(SectionIndex(i), s))
            .map(SectionIndex)
    }

    /// Writes the finalized or loaded bytes to `path`.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.mode == Mode::Building {
            return Err(Error::format("image must be finalized before saving"));
        }
        std::fs::write(path, self.raw_bytes())?;
        Ok(())
    }

    /// Lays out the image and encodes it. Afterwards the image is read-only.
    pub fn finalize(&mut self) -> Result<&[u8]> {
        self.check_building()?;
        let bytes = writer::write(self)?;
        tracing::debug!("finalized image: {} bytes", bytes.len());
        self.buffer = Buffer::Owned(bytes);
        self.mode = Mode::Finalized;
        Ok(&self.buffer)
    }

    /// Raw bytes of a loaded or finalized image. Empty while building.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_building(&self) -> bool {
        self.mode == Mode::Building
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn class(&self) -> Class {
        self.header.class
    }

    pub fn machine(&self) -> u16 {
        self.header.machine
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// All sections, including the null section at index 0.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: SectionIndex) -> Option<&Section> {
        self.sections.get(index.0)
    }

    pub fn section_by_name(&self, name: &str) -> Option<(SectionIndex, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| s.name == name)
            .map(|(i, s)| (SectionIndex(i), s))
    }

    /// Sections contained in the segment at `segment`.
    pub fn segment_sections(&self, segment: usize) -> impl Iterator<Item = SectionIndex> + '_ {
        self.sections
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.segment == Some(segment))
            .map(|(i, _)| SectionIndex(i))
    }

    /// Mutable access to a section while building.
    pub fn section_mut(&mut self, index: SectionIndex) -> Result<&mut Section> {
        self.check_building()?;
        let count = self.sections.len();
        self.sections
            .get_mut(index.0)
            .ok_or_else(|| Error::format(format!("section index {} out of range ({count})", index.0)))
    }

    pub fn shstrtab(&self) -> Option<SectionIndex> {
        self.shstrtab
    }

    /// The default string table used for symbol names.
    pub fn strtab(&self) -> Option<SectionIndex> {
        self.strtab
    }

    /// The default symbol table.
    pub fn symtab(&self) -> Option<SectionIndex> {
        self.symtab
    }

    /// The default note stream.
    pub fn note(&self) -> Option<SectionIndex> {
        self.note
    }

    /// Symbols of the default symbol table, empty if there is none.
    pub fn symbols(&self) -> &[Symbol] {
        self.symtab
            .and_then(|i| self.sections[i.0].symbol_table())
            .map(SymbolTable::as_slice)
            .unwrap_or(&[])
    }

    /// Resolves a symbol name through the string table linked from `table`.
    pub fn symbol_name(&self, table: SectionIndex, symbol: &Symbol) -> Result<&str> {
        let symtab = self
            .section(table)
            .ok_or_else(|| Error::format(format!("symbol table index {} out of range", table.0)))?;
        self.section(SectionIndex(symtab.link as usize))
            .and_then(Section::string_table)
            .and_then(|t| t.get(symbol.name))
            .ok_or_else(|| Error::format(format!("symbol name offset {:#x} is invalid", symbol.name)))
    }

    /// Alignment of a symbol: the value of a common symbol, otherwise the
    /// alignment of its section.
    pub fn symbol_alignment(&self, symbol: &Symbol) -> u64 {
        if symbol.is_common() {
            return symbol.value.max(1);
        }
        symbol
            .section_index()
            .and_then(|i| self.section(i))
            .map_or(1, Section::align)
    }

    /// Relocation sections whose target is `target`.
    pub fn relocation_sections_for(&self, target: SectionIndex) -> impl Iterator<Item = SectionIndex> + '_ {
        self.sections
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.relocation_table().is_some() && s.info as usize == target.0)
            .map(|(i, _)| SectionIndex(i))
    }

    /// Appends a segment.
    pub fn add_segment(&mut self, params: SegmentParams) -> Result<usize> {
        self.check_building()?;
        section::check_align(params.align, format_args!("segment {}", self.segments.len()))?;
        self.segments.push(Segment::new(params));
        Ok(self.segments.len() - 1)
    }

    /// Appends a data section. Its name is interned into the section name table.
    pub fn add_section(&mut self, params: SectionParams) -> Result<SectionIndex> {
        self.push_section(params, SectionBody::Data)
    }

    /// Appends a string table. The first one becomes the default table.
    pub fn add_string_table(&mut self, name: &str) -> Result<SectionIndex> {
        let index = self.push_section(
            SectionParams {
                name: name.to_string(),
                sh_type: elf::SHT_STRTAB,
                align: 1,
                ..Default::default()
            },
            SectionBody::Strings(StringTable::new()),
        )?;
        self.strtab.get_or_insert(index);
        Ok(index)
    }

    /// Appends a symbol table bound to the string table at `strtab`.
    pub fn add_symbol_table(&mut self, name: &str, strtab: SectionIndex) -> Result<SectionIndex> {
        if self.section(strtab).and_then(Section::string_table).is_none() {
            return Err(Error::format(format!("section {} is not a string table", strtab.0)));
        }
        let class = self.header.class;
        let index = self.push_section(
            SectionParams {
                name: name.to_string(),
                sh_type: elf::SHT_SYMTAB,
                link: strtab.0 as u32,
                align: class.word_size(),
                entsize: class.sym_size(),
                ..Default::default()
            },
            SectionBody::Symbols(SymbolTable::new()),
        )?;
        self.symtab.get_or_insert(index);
        Ok(index)
    }

    /// Appends a note stream section. The first one becomes the default stream.
    pub fn add_note_stream(&mut self, name: &str) -> Result<SectionIndex> {
        let index = self.push_section(
            SectionParams {
                name: name.to_string(),
                sh_type: elf::SHT_NOTE,
                align: 4,
                ..Default::default()
            },
            SectionBody::Notes(NoteStream::new()),
        )?;
        self.note.get_or_insert(index);
        Ok(index)
    }

    /// Appends a relocation section for `target` bound to `symtab`.
    pub fn add_relocation_section(
        &mut self,
        name: &str,
        symtab: SectionIndex,
        target: SectionIndex,
    ) -> Result<SectionIndex> {
        if self.section(symtab).and_then(Section::symbol_table).is_none() {
            return Err(Error::format(format!("section {} is not a symbol table", symtab.0)));
        }
        if target == NULL_SECTION || self.section(target).is_none() {
            return Err(Error::format(format!("relocation target {} out of range", target.0)));
        }
        let class = self.header.class;
        self.push_section(
            SectionParams {
                name: name.to_string(),
                sh_type: elf::SHT_RELA,
                flags: u64::from(elf::SHF_INFO_LINK),
                link: symtab.0 as u32,
                info: target.0 as u32,
                align: class.word_size(),
                entsize: class.rela_size(),
                segment: None,
            },
            SectionBody::Relocations(RelocationTable::new()),
        )
    }

    fn push_section(&mut self, params: SectionParams, body: SectionBody) -> Result<SectionIndex> {
        self.check_building()?;
        section::check_align(params.align, format_args!("section {}", params.name))?;
        if let Some(segment) = params.segment {
            if segment >= self.segments.len() {
                return Err(Error::format(format!("segment index {segment} out of range")));
            }
        }
        let shstrtab = self.shstrtab.ok_or_else(|| Error::format("image has no section name table"))?;
        let name_offset = self.sections[shstrtab.0]
            .strings_mut()
            .ok_or_else(|| Error::format("section name table is not a string table"))?
            .add(&params.name)?;
        tracing::trace!("adding section {} (type {:#x})", params.name, params.sh_type);
        self.sections.push(Section::new(params, name_offset, body));
        Ok(SectionIndex(self.sections.len() - 1))
    }

    /// Adds a symbol to the default symbol table, interning `name` into the
    /// string table it is bound to.
    ///
    /// The returned index holds until [`finalize`](Self::finalize), which
    /// moves local symbols ahead of the others and renumbers relocations
    /// to match.
    pub fn add_symbol(&mut self, name: &str, mut symbol: Symbol) -> Result<SymbolIndex> {
        self.check_building()?;
        let symtab = self.symtab.ok_or_else(|| Error::format("image has no symbol table"))?;
        if let Some(section) = symbol.section_index() {
            if section.0 >= self.sections.len() {
                return Err(Error::format(format!("symbol section {} out of range", section.0)));
            }
        }
        let link = self.sections[symtab.0].link as usize;
        symbol.name = self
            .sections
            .get_mut(link)
            .and_then(Section::strings_mut)
            .ok_or_else(|| Error::format("symbol table is not bound to a string table"))?
            .add(name)?;
        let table = self.sections[symtab.0]
            .symbols_mut()
            .ok_or_else(|| Error::format("default symbol table has no symbols"))?;
        Ok(SymbolIndex(table.push(symbol)))
    }

    /// Adds a relocation to the relocation section at `section`.
    pub fn add_relocation(&mut self, section: SectionIndex, relocation: Relocation) -> Result<()> {
        self.check_building()?;
        let link = self
            .section(section)
            .filter(|s| s.relocation_table().is_some())
            .map(|s| s.link as usize)
            .ok_or_else(|| Error::format(format!("section {} is not a relocation section", section.0)))?;
        let symbols = self.sections.get(link).and_then(Section::symbol_table).map_or(0, SymbolTable::len);
        if relocation.symbol as usize >= symbols {
            return Err(Error::format(format!(
                "relocation symbol index {} out of range ({symbols})",
                relocation.symbol
            )));
        }
        if let Some(table) = self.sections[section.0].relocations_mut() {
            table.push(relocation);
        }
        Ok(())
    }

    /// Appends a note to the default note stream, creating `.note` if needed.
    pub fn add_note(&mut self, owner: &str, n_type: u32, desc: &[u8]) -> Result<()> {
        self.check_building()?;
        let index = match self.note {
            Some(index) => index,
            None => self.add_note_stream(".note")?,
        };
        self.sections[index.0]
            .notes_mut()
            .ok_or_else(|| Error::format("default note section is not a note stream"))?
            .add(owner, n_type, desc)
    }

    /// Finds the first note matching `owner` and `n_type` in any note section.
    pub fn find_note(&self, owner: &str, n_type: u32) -> Option<&[u8]> {
        self.sections
            .iter()
            .filter_map(Section::note_stream)
            .find_map(|notes| notes.find(owner, n_type))
    }

    fn check_building(&self) -> Result<()> {
        match self.mode {
            Mode::Building => Ok(()),
            _ => Err(Error::Finalized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(class: Class) -> ImageHeader {
        ImageHeader {
            class,
            e_type: elf::ET_REL,
            machine: elf::EM_X86_64,
            os_abi: elf::ELFOSABI_SYSV,
            abi_version: 0,
            flags: 0,
            entry: 0,
        }
    }

    fn sample(class: Class) -> Image<'static> {
        let mut image = Image::new(header(class));
        let strtab = image.add_string_table(".strtab").unwrap();
        image.add_symbol_table(".symtab", strtab).unwrap();
        let seg = image
            .add_segment(SegmentParams {
                kind: elf::PT_LOAD,
                vaddr: None,
                flags: elf::PF_R | elf::PF_W,
                align: 16,
            })
            .unwrap();
        let data = image
            .add_section(SectionParams {
                name: ".data".into(),
                sh_type: elf::SHT_PROGBITS,
                flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                align: 8,
                segment: Some(seg),
                ..Default::default()
            })
            .unwrap();
        let bss = image
            .add_section(SectionParams {
                name: ".bss".into(),
                sh_type: elf::SHT_NOBITS,
                flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                align: 32,
                segment: Some(seg),
                ..Default::default()
            })
            .unwrap();
        image.section_mut(data).unwrap().add_data(&[0xaa; 12], 4).unwrap();
        image.section_mut(bss).unwrap().add_zeroes(40, 8).unwrap();
        let sym = image
            .add_symbol("value", Symbol::new(0, 4, 8, elf::STT_OBJECT, elf::STB_GLOBAL, data.0 as u16))
            .unwrap();
        let rela = image.add_relocation_section(".rela.data", image.symtab().unwrap(), data).unwrap();
        image
            .add_relocation(
                rela,
                Relocation {
                    offset: 0,
                    r_type: 1,
                    symbol: sym.0 as u32,
                    addend: -4,
                },
            )
            .unwrap();
        image.add_note("AMD", 1, &[2, 0, 0, 0, 1, 0, 0, 0]).unwrap();
        image
    }

    #[test]
    fn finalize_computes_segment_extent() {
        let mut image = sample(Class::Elf64);
        image.finalize().unwrap();
        let seg = &image.segments()[0];
        // .data at 0..12, .bss aligned to 32: 32..72
        assert_eq!(seg.file_size(), 12);
        assert_eq!(seg.mem_size(), 72);
        assert_eq!(seg.align(), 32);
        let (_, bss) = image.section_by_name(".bss").unwrap();
        assert_eq!(bss.address(), seg.vaddr() + 32);
    }

    #[test]
    fn round_trip_both_classes() {
        for class in [Class::Elf32, Class::Elf64] {
            let mut image = sample(class);
            let bytes = image.finalize().unwrap().to_vec();
            let loaded = Image::load(&bytes).unwrap();

            assert_eq!(loaded.class(), class);
            assert_eq!(loaded.segments(), image.segments());
            assert_eq!(loaded.sections().len(), image.sections().len());
            for (a, b) in image.sections().iter().zip(loaded.sections()) {
                assert_eq!(a.name(), b.name());
                assert_eq!(a.sh_type(), b.sh_type());
                assert_eq!(a.flags(), b.flags());
                assert_eq!(a.size(), b.size());
                assert_eq!(a.address(), b.address());
                assert_eq!(a.segment(), b.segment());
                assert_eq!(a.data(), b.data());
            }
            assert_eq!(loaded.symbols(), image.symbols());
            let symtab = loaded.symtab().unwrap();
            assert_eq!(loaded.symbol_name(symtab, &loaded.symbols()[1]).unwrap(), "value");
            assert_eq!(loaded.find_note("AMD", 1), Some(&[2, 0, 0, 0, 1, 0, 0, 0][..]));
            let (rela, _) = loaded.section_by_name(".rela.data").unwrap();
            let relocs = loaded.section(rela).unwrap().relocation_table().unwrap();
            assert_eq!(relocs.as_slice()[0].addend, -4);
            assert_eq!(relocs.as_slice()[0].symbol, 1);
            assert_eq!(loaded.raw_bytes(), &bytes[..]);
        }
    }

    #[test]
    fn finalize_puts_locals_first() {
        let mut image = sample(Class::Elf64);
        let (data, _) = image.section_by_name(".data").unwrap();
        image
            .add_symbol("inner", Symbol::new(0, 0, 4, elf::STT_OBJECT, elf::STB_LOCAL, data.0 as u16))
            .unwrap();
        let bytes = image.finalize().unwrap().to_vec();
        let loaded = Image::load(&bytes).unwrap();

        let symtab = loaded.symtab().unwrap();
        let names: Vec<_> = loaded
            .symbols()
            .iter()
            .skip(1)
            .map(|s| loaded.symbol_name(symtab, s).unwrap())
            .collect();
        assert_eq!(names, ["inner", "value"]);
        assert_eq!(loaded.section(symtab).unwrap().info(), 2);

        // the relocation against "value" follows it to index 2
        let (rela, _) = loaded.section_by_name(".rela.data").unwrap();
        let relocs = loaded.section(rela).unwrap().relocation_table().unwrap();
        assert_eq!(relocs.as_slice()[0].symbol, 2);
    }

    #[test]
    fn finalized_image_is_read_only() {
        let mut image = sample(Class::Elf64);
        image.finalize().unwrap();
        assert!(matches!(image.add_string_table(".x"), Err(Error::Finalized)));
        assert!(matches!(image.finalize(), Err(Error::Finalized)));
        assert!(image.add_note("AMD", 1, &[]).is_err());
    }

    #[test]
    fn misaligned_layout_is_rejected() {
        let mut image = Image::new(header(Class::Elf64));
        let segment = image.add_segment(SegmentParams {
            kind: elf::PT_LOAD,
            align: 24,
            ..Default::default()
        });
        assert!(matches!(segment, Err(Error::InvalidArgument(_))));
        let section = image.add_section(SectionParams {
            name: ".data".into(),
            sh_type: elf::SHT_PROGBITS,
            align: 3,
            ..Default::default()
        });
        assert!(matches!(section, Err(Error::InvalidArgument(_))));
        assert!(image.segments().is_empty());
        assert!(image.section_by_name(".data").is_none());
    }

    #[test]
    fn relocation_symbol_must_exist() {
        let mut image = sample(Class::Elf64);
        let (rela, _) = image.section_by_name(".rela.data").unwrap();
        let bad = Relocation {
            offset: 0,
            r_type: 1,
            symbol: 99,
            addend: 0,
        };
        assert!(image.add_relocation(rela, bad).is_err());
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let mut image = sample(Class::Elf64);
        let mut bytes = image.finalize().unwrap().to_vec();
        bytes[1] = b'X';
        let err = Image::load(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
