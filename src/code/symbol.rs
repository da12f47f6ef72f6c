//! Accelerator symbols.
//!
//! A code object symbol is either a kernel or a variable. Both share a
//! qualified name, linkage and definition state; the per-kind details are
//! carried in [`SymbolDetails`].

use object::elf;
use object::read::{SectionIndex, SymbolIndex};

use crate::amdgpu::{MODULE_SEPARATOR, SHF_AMDGPU_HSA_AGENT, SHF_AMDGPU_HSA_READONLY};
use crate::error::{Error, Result};
use crate::image::{Image, Symbol};
use crate::kernel_code::{KernelCode, KernelInfo, KERNEL_CODE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SymbolKind {
    Variable = 0,
    Kernel = 1,
}

/// Visibility of a symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Linkage {
    /// Visible inside its module only; the name is module-qualified.
    Module = 0,
    /// Visible to the whole program.
    Program = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Allocation {
    Agent = 0,
    Program = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SegmentClass {
    Global = 0,
    Readonly = 1,
}

/// Variable-only attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    pub allocation: Allocation,
    pub segment: SegmentClass,
    pub alignment: u32,
    pub size: u64,
    pub is_const: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolDetails {
    Kernel(KernelInfo),
    Variable(VariableInfo),
}

/// A classified symbol of a code object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSymbol {
    index: SymbolIndex,
    name: String,
    section: Option<SectionIndex>,
    value: u64,
    size: u64,
    binding: u8,
    is_definition: bool,
    details: SymbolDetails,
}

impl CodeSymbol {
    /// Classifies a kernel symbol, decoding its descriptor from the
    /// containing section.
    pub(crate) fn from_kernel(image: &Image<'_>, symtab: SectionIndex, index: SymbolIndex, sym: &Symbol) -> Result<Self> {
        let name = checked_name(image, symtab, index, sym)?;
        let section = sym
            .section_index()
            .and_then(|i| image.section(i))
            .ok_or_else(|| Error::format(format!("kernel {name}: no containing section")))?;
        let bytes = section
            .data_at(sym.value, KERNEL_CODE_SIZE as u64)
            .map_err(|e| Error::format(format!("kernel {name}: descriptor is unreadable: {e}")))?;
        let info = KernelCode::parse(bytes)
            .and_then(|code| code.summary())
            .map_err(|e| e.in_context(format_args!("kernel {name}")))?;
        Ok(Self::new(index, name, sym, true, SymbolDetails::Kernel(info)))
    }

    /// Classifies a variable symbol. Allocation, segment and const-ness come
    /// from the accelerator flags of the containing section.
    pub(crate) fn from_variable(image: &Image<'_>, symtab: SectionIndex, index: SymbolIndex, sym: &Symbol) -> Result<Self> {
        let name = checked_name(image, symtab, index, sym)?;
        let flags = sym
            .section_index()
            .and_then(|i| image.section(i))
            .map_or(0, |s| s.flags());
        let alignment = u32::try_from(image.symbol_alignment(sym))
            .map_err(|_| Error::format(format!("variable {name}: alignment does not fit in 32 bits")))?;
        let readonly = flags & SHF_AMDGPU_HSA_READONLY != 0;
        let info = VariableInfo {
            allocation: if flags & SHF_AMDGPU_HSA_AGENT != 0 {
                Allocation::Agent
            } else {
                Allocation::Program
            },
            segment: if readonly { SegmentClass::Readonly } else { SegmentClass::Global },
            alignment,
            size: sym.size,
            is_const: readonly,
        };
        let is_definition = !sym.is_common() && sym.shndx != elf::SHN_UNDEF;
        Ok(Self::new(index, name, sym, is_definition, SymbolDetails::Variable(info)))
    }

    fn new(index: SymbolIndex, name: String, sym: &Symbol, is_definition: bool, details: SymbolDetails) -> Self {
        Self {
            index,
            name,
            section: sym.section_index(),
            value: sym.value,
            size: sym.size,
            binding: sym.binding,
            is_definition,
            details,
        }
    }

    pub fn index(&self) -> SymbolIndex {
        self.index
    }

    pub fn kind(&self) -> SymbolKind {
        match self.details {
            SymbolDetails::Kernel(_) => SymbolKind::Kernel,
            SymbolDetails::Variable(_) => SymbolKind::Variable,
        }
    }

    /// Fully qualified name, `module::name` for module linkage.
    pub fn qualified_name(&self) -> &str {
        &self.name
    }

    /// Name without its module prefix.
    pub fn name(&self) -> &str {
        split_name(&self.name).1
    }

    /// Module prefix, empty for program linkage.
    pub fn module_name(&self) -> &str {
        split_name(&self.name).0
    }

    pub fn linkage(&self) -> Linkage {
        if self.binding == elf::STB_GLOBAL {
            Linkage::Program
        } else {
            Linkage::Module
        }
    }

    pub fn is_definition(&self) -> bool {
        self.is_definition
    }

    pub fn section(&self) -> Option<SectionIndex> {
        self.section
    }

    /// Offset within the containing section.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn details(&self) -> &SymbolDetails {
        &self.details
    }

    pub fn kernel(&self) -> Option<&KernelInfo> {
        match &self.details {
            SymbolDetails::Kernel(info) => Some(info),
            SymbolDetails::Variable(_) => None,
        }
    }

    pub fn variable(&self) -> Option<&VariableInfo> {
        match &self.details {
            SymbolDetails::Variable(info) => Some(info),
            SymbolDetails::Kernel(_) => None,
        }
    }
}

/// Splits a qualified name at the last separator into `(module, name)`.
pub fn split_name(qualified: &str) -> (&str, &str) {
    match qualified.rfind(MODULE_SEPARATOR) {
        Some(i) => (&qualified[..i], &qualified[i + MODULE_SEPARATOR.len()..]),
        None => ("", qualified),
    }
}

/// Joins a module and a name into a qualified name.
pub fn qualify(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{module}{MODULE_SEPARATOR}{name}")
    }
}

/// Binding implied by a qualified name.
pub(crate) fn binding_for(qualified: &str) -> u8 {
    if qualified.contains(MODULE_SEPARATOR) {
        elf::STB_LOCAL
    } else {
        elf::STB_GLOBAL
    }
}

/// Resolves a symbol name and checks that its binding agrees with its
/// qualification.
fn checked_name(image: &Image<'_>, symtab: SectionIndex, index: SymbolIndex, sym: &Symbol) -> Result<String> {
    let name = image
        .symbol_name(symtab, sym)
        .map_err(|e| e.in_context(format_args!("symbol {}", index.0)))?;
    let qualified = name.contains(MODULE_SEPARATOR);
    if sym.is_global() == qualified {
        let reason = if qualified {
            "is global but module-qualified"
        } else {
            "is not global but has no module prefix"
        };
        return Err(Error::format(format!("symbol {name} {reason}")));
    }
    Ok(name.to_string())
}
