//! HSA code objects.
//!
//! A [`CodeObject`] interprets an [`Image`] under the AMD HSA conventions.
//! On load it checks the machine and OS ABI, partitions segments and
//! sections into accelerator data and relocation sets, and classifies the
//! symbols of the default symbol table into kernels and variables. After
//! that it answers attribute queries, symbol lookups and note queries.
//!
//! The same type also builds code objects: [`CodeObject::build`] starts an
//! empty image and [`CodeObject::finalize`] lays it out, after which the
//! object is queryable exactly as if it had been loaded.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use object::elf;
use object::read::{SectionIndex, SymbolIndex};

use crate::amdgpu::{
    is_data_section, HsaSegment, ELFOSABI_AMDGPU_HSA, STT_AMDGPU_HSA_INDIRECT_FUNCTION, STT_AMDGPU_HSA_KERNEL,
    STT_AMDGPU_HSA_METADATA,
};
use crate::arch::{AmdGpu, Architecture};
use crate::error::{Error, QueryError, Result};
use crate::image::{Image, Section, Symbol};

mod builder;
pub mod info;
pub mod notes;
pub mod print;
pub mod symbol;

pub use builder::VariableParams;
pub use info::{CodeAttribute, InfoValue, SymbolAttribute};
pub use notes::{CodeObjectVersion, HsailNote, IsaNote, ProducerNote};
pub use print::{Disassembler, HexDump};
pub use symbol::{
    qualify, split_name, Allocation, CodeSymbol, Linkage, SegmentClass, SymbolDetails, SymbolKind, VariableInfo,
};

/// Lifecycle of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Being assembled through the builder.
    Building,
    /// Validated and indexed; queries are answered.
    Queryable,
    /// Finalization or re-indexing failed; only diagnostics are meaningful.
    Invalid,
}

/// Capability check for ISA names, supplied by the runtime.
pub trait IsaLookup {
    fn is_known(&self, isa: &str) -> bool;
}

impl<F: Fn(&str) -> bool> IsaLookup for F {
    fn is_known(&self, isa: &str) -> bool {
        self(isa)
    }
}

/// The image a code object works on: either owned or borrowed from the caller.
#[derive(Debug)]
enum ImageRef<'a, 'data> {
    Owned(Image<'data>),
    Borrowed(&'a mut Image<'data>),
}

impl<'data> Deref for ImageRef<'_, 'data> {
    type Target = Image<'data>;

    fn deref(&self) -> &Image<'data> {
        match self {
            ImageRef::Owned(image) => image,
            ImageRef::Borrowed(image) => image,
        }
    }
}

impl<'data> DerefMut for ImageRef<'_, 'data> {
    fn deref_mut(&mut self) -> &mut Image<'data> {
        match self {
            ImageRef::Owned(image) => image,
            ImageRef::Borrowed(image) => image,
        }
    }
}

/// An accelerator code object.
#[derive(Debug)]
pub struct CodeObject<'a, 'data> {
    image: ImageRef<'a, 'data>,
    state: State,
    data_segments: Vec<usize>,
    data_sections: Vec<SectionIndex>,
    relocation_sections: Vec<SectionIndex>,
    symbols: Vec<CodeSymbol>,
    /// Builder bookkeeping: segment and default section per segment kind.
    hsa_segments: Vec<(HsaSegment, usize)>,
    hsa_sections: Vec<(HsaSegment, SectionIndex)>,
    diagnostics: Vec<String>,
}

impl<'a, 'data> CodeObject<'a, 'data> {
    fn with_image(image: ImageRef<'a, 'data>) -> Self {
        Self {
            image,
            state: State::Building,
            data_segments: Vec::new(),
            data_sections: Vec::new(),
            relocation_sections: Vec::new(),
            symbols: Vec::new(),
            hsa_segments: Vec::new(),
            hsa_sections: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn open(image: ImageRef<'a, 'data>) -> Result<Self> {
        let mut code = Self::with_image(image);
        if !code.image.is_building() {
            code.pull()?;
        }
        Ok(code)
    }

    /// Takes ownership of `image`. A loaded or finalized image is validated
    /// and indexed; an image still being built stays in the building state.
    pub fn new(image: Image<'data>) -> Result<Self> {
        Self::open(ImageRef::Owned(image))
    }

    /// Like [`new`](Self::new), but works on a caller-owned image.
    pub fn from_image(image: &'a mut Image<'data>) -> Result<Self> {
        Self::open(ImageRef::Borrowed(image))
    }

    /// Parses and validates `data` without copying it.
    pub fn load(data: &'data [u8]) -> Result<Self> {
        Self::new(Image::load(data)?)
    }

    pub fn load_owned(data: Vec<u8>) -> Result<Self> {
        Self::new(Image::load_owned(data)?)
    }

    /// Memory-maps and loads the file at `path`.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Image::load_file(path)?)
    }

    /// Validates the image and rebuilds the semantic indices.
    fn pull(&mut self) -> Result<()> {
        let image: &Image<'data> = &self.image;
        let machine = image.machine();
        if machine != AmdGpu.machine() {
            return Err(Error::format(format!("machine {machine} is not AMDGPU")));
        }
        let os_abi = image.header().os_abi;
        if os_abi != ELFOSABI_AMDGPU_HSA {
            return Err(Error::format(format!("OS ABI {os_abi} is not AMDGPU HSA")));
        }

        let data_segments: Vec<usize> = image
            .segments()
            .iter()
            .enumerate()
            .filter(|(_, seg)| HsaSegment::from_p_type(seg.kind()).is_some())
            .map(|(i, _)| i)
            .collect();
        let data_sections = sections_where(image, |s| is_data_section(s.sh_type(), s.flags()));
        let relocation_sections = sections_where(image, |s| s.sh_type() == elf::SHT_RELA);

        let mut symbols = Vec::new();
        let mut diagnostics = Vec::new();
        if let Some(symtab) = image.symtab() {
            for (i, sym) in image.symbols().iter().enumerate().skip(1) {
                let index = SymbolIndex(i);
                match sym.kind {
                    STT_AMDGPU_HSA_KERNEL => symbols.push(CodeSymbol::from_kernel(image, symtab, index, sym)?),
                    elf::STT_OBJECT | elf::STT_COMMON => {
                        symbols.push(CodeSymbol::from_variable(image, symtab, index, sym)?)
                    }
                    elf::STT_NOTYPE
                    | elf::STT_SECTION
                    | elf::STT_FILE
                    | elf::STT_FUNC
                    | STT_AMDGPU_HSA_INDIRECT_FUNCTION
                    | STT_AMDGPU_HSA_METADATA => {
                        tracing::trace!("symbol {i}: type {} is not classified", sym.kind);
                    }
                    other => {
                        let msg = format!("symbol {i}: unknown type {other}, skipped");
                        tracing::warn!("{msg}");
                        diagnostics.push(msg);
                    }
                }
            }
        }
        tracing::debug!(
            "indexed code object: {} data segments, {} data sections, {} relocation sections, {} symbols",
            data_segments.len(),
            data_sections.len(),
            relocation_sections.len(),
            symbols.len()
        );

        self.data_segments = data_segments;
        self.data_sections = data_sections;
        self.relocation_sections = relocation_sections;
        self.symbols = symbols;
        self.diagnostics.extend(diagnostics);
        self.state = State::Queryable;
        Ok(())
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn image(&self) -> &Image<'data> {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut Image<'data> {
        &mut self.image
    }

    /// Raw bytes of the underlying image.
    pub fn raw_bytes(&self) -> &[u8] {
        self.image.raw_bytes()
    }

    /// Anomalies tolerated while indexing.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub(crate) fn check_queryable(&self) -> Result<(), QueryError> {
        match self.state {
            State::Queryable => Ok(()),
            _ => Err(QueryError::InvalidCodeObject),
        }
    }

    /// Indices of segments whose kind is one of the accelerator load kinds.
    pub fn data_segments(&self) -> &[usize] {
        &self.data_segments
    }

    /// Program or no-bits sections carrying accelerator flags.
    pub fn data_sections(&self) -> &[SectionIndex] {
        &self.data_sections
    }

    pub fn relocation_sections(&self) -> &[SectionIndex] {
        &self.relocation_sections
    }

    /// Kernels and variables in symbol table order.
    pub fn symbols(&self) -> &[CodeSymbol] {
        &self.symbols
    }

    /// Finds a symbol by module and name. An empty module means program
    /// linkage.
    pub fn symbol(&self, module: &str, name: &str) -> Result<&CodeSymbol, QueryError> {
        self.check_queryable()?;
        let qualified = qualify(module, name);
        self.symbols
            .iter()
            .find(|s| s.qualified_name() == qualified)
            .ok_or(QueryError::InvalidSymbolName)
    }

    /// Finds a symbol by its qualified name.
    pub fn symbol_by_qualified_name(&self, qualified: &str) -> Result<&CodeSymbol, QueryError> {
        let (module, name) = split_name(qualified);
        self.symbol(module, name)
    }

    /// Calls `visit` for every symbol in order, stopping at the first error.
    pub fn iterate_symbols<F>(&self, mut visit: F) -> Result<(), QueryError>
    where
        F: FnMut(&Self, &CodeSymbol) -> Result<(), QueryError>,
    {
        self.check_queryable()?;
        for symbol in &self.symbols {
            visit(self, symbol)?;
        }
        Ok(())
    }

    /// Returns the ISA string if `lookup` recognises it.
    pub fn check_isa(&self, lookup: &dyn IsaLookup) -> Result<String, QueryError> {
        self.check_queryable()?;
        let isa = self.note_isa()?.ok_or(QueryError::InvalidCodeObject)?.to_string();
        if lookup.is_known(&isa) {
            Ok(isa)
        } else {
            tracing::debug!("ISA {isa} is not supported");
            Err(QueryError::InvalidCodeObject)
        }
    }

    /// Applies every relocation targeting `section` to `data`, a copy of
    /// that section's contents. `resolve` supplies the value of each
    /// referenced symbol. Returns the number of relocations applied.
    pub fn apply_relocations<F>(&self, section: SectionIndex, data: &mut [u8], mut resolve: F) -> Result<usize>
    where
        F: FnMut(&Symbol, &str) -> Option<u64>,
    {
        let image = self.image();
        let mut applied = 0;
        for rel_index in image.relocation_sections_for(section) {
            let Some(rel_section) = image.section(rel_index) else { continue };
            let symtab = SectionIndex(rel_section.link() as usize);
            let symbols = image
                .section(symtab)
                .and_then(Section::symbol_table)
                .ok_or_else(|| Error::format(format!("relocation section {} has no symbol table", rel_index.0)))?;
            let Some(relocations) = rel_section.relocation_table() else { continue };
            for rel in relocations.iter() {
                let sym = symbols
                    .get(rel.symbol as usize)
                    .ok_or_else(|| Error::format(format!("relocation symbol {} out of range", rel.symbol)))?;
                let name = image.symbol_name(symtab, sym)?;
                let s = resolve(sym, name).ok_or_else(|| Error::Relocation(format!("unresolved symbol {name:?}")))?;
                tracing::trace!(
                    "{} at {:#x}: S={s:#x} A={}",
                    AmdGpu.relocation_name(rel.r_type),
                    rel.offset,
                    rel.addend
                );
                AmdGpu.apply_relocation(rel.r_type, rel.offset, s, rel.addend, data)?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

fn sections_where(image: &Image<'_>, pred: impl Fn(&Section) -> bool) -> Vec<SectionIndex> {
    image
        .sections()
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, s)| pred(s))
        .map(|(i, _)| SectionIndex(i))
        .collect()
}
