//! Code object construction.
//!
//! Symbol indices handed out here address the table being built; finalize
//! moves module-linkage (local) symbols first and renumbers them.

use object::elf;
use object::read::{SectionIndex, SymbolIndex};

use super::symbol::{binding_for, Allocation, SegmentClass};
use super::{CodeObject, ImageRef, State};
use crate::amdgpu::{
    HsaSegment, EF_AMDGPU_XNACK, ELFABIVERSION_AMDGPU_HSA, ELFOSABI_AMDGPU_HSA, EM_AMDGPU, STT_AMDGPU_HSA_KERNEL,
};
use crate::error::{Error, Result};
use crate::image::{Class, Image, ImageHeader, Relocation, SectionParams, SegmentParams, Symbol};
use crate::kernel_code::{KernelCode, KERNEL_CODE_ALIGN};

/// Parameters for [`CodeObject::add_variable`].
#[derive(Debug, Clone)]
pub struct VariableParams {
    pub allocation: Allocation,
    pub segment: SegmentClass,
    pub size: u64,
    pub align: u64,
    /// Initial contents; shorter than `size` is zero-extended.
    pub init: Option<Vec<u8>>,
    /// A declaration reserves no storage.
    pub definition: bool,
}

impl Default for VariableParams {
    fn default() -> Self {
        Self {
            allocation: Allocation::Agent,
            segment: SegmentClass::Global,
            size: 0,
            align: 1,
            init: None,
            definition: true,
        }
    }
}

impl CodeObject<'static, 'static> {
    /// Starts an empty code object with a string table, symbol table and
    /// note section already in place.
    pub fn build(class: Class, xnack: bool) -> Result<Self> {
        let mut image = Image::new(ImageHeader {
            class,
            e_type: elf::ET_EXEC,
            machine: EM_AMDGPU,
            os_abi: ELFOSABI_AMDGPU_HSA,
            abi_version: ELFABIVERSION_AMDGPU_HSA,
            flags: if xnack { EF_AMDGPU_XNACK } else { 0 },
            entry: 0,
        });
        let strtab = image.add_string_table(".strtab")?;
        image.add_symbol_table(".symtab", strtab)?;
        image.add_note_stream(".note")?;
        Ok(Self::with_image(ImageRef::Owned(image)))
    }
}

impl CodeObject<'_, '_> {
    fn check_building(&self) -> Result<()> {
        match self.state {
            State::Building => Ok(()),
            _ => Err(Error::Finalized),
        }
    }

    /// Returns the segment of `kind`, creating it on first use.
    pub fn add_hsa_segment(&mut self, kind: HsaSegment) -> Result<usize> {
        self.check_building()?;
        if let Some(&(_, index)) = self.hsa_segments.iter().find(|(k, _)| *k == kind) {
            return Ok(index);
        }
        let index = self.image_mut().add_segment(SegmentParams {
            kind: kind.p_type(),
            vaddr: None,
            flags: kind.segment_flags(),
            align: kind.align(),
        })?;
        tracing::debug!("created {} segment {index}", kind.name());
        self.hsa_segments.push((kind, index));
        Ok(index)
    }

    /// Returns the default data section of `kind`, creating it and its
    /// segment on first use.
    pub fn hsa_section(&mut self, kind: HsaSegment) -> Result<SectionIndex> {
        if let Some(&(_, index)) = self.hsa_sections.iter().find(|(k, _)| *k == kind) {
            return Ok(index);
        }
        let segment = self.add_hsa_segment(kind)?;
        let index = self.image_mut().add_section(SectionParams {
            name: kind.section_name().to_string(),
            sh_type: elf::SHT_PROGBITS,
            flags: kind.section_flags(),
            align: kind.align(),
            segment: Some(segment),
            ..Default::default()
        })?;
        self.hsa_sections.push((kind, index));
        Ok(index)
    }

    /// Emits a kernel: its descriptor followed by `code` in `.hsatext`.
    /// Binding follows from the name: qualified names get module linkage.
    pub fn add_kernel(&mut self, name: &str, descriptor: &KernelCode, code: &[u8]) -> Result<SymbolIndex> {
        self.check_building()?;
        let text = self.hsa_section(HsaSegment::CodeAgent)?;
        let section = self.image_mut().section_mut(text)?;
        let offset = section.add_data(&descriptor.to_bytes(), KERNEL_CODE_ALIGN)?;
        section.add_data(code, 1)?;
        let size = section.size() - offset;
        let symbol = Symbol::new(0, offset, size, STT_AMDGPU_HSA_KERNEL, binding_for(name), shndx(text)?);
        tracing::debug!("added kernel {name} at {offset:#x} ({size} bytes)");
        self.image_mut().add_symbol(name, symbol)
    }

    /// Emits a variable into the default section for its allocation and
    /// segment.
    pub fn add_variable(&mut self, name: &str, params: VariableParams) -> Result<SymbolIndex> {
        self.check_building()?;
        let kind = match (params.allocation, params.segment) {
            (Allocation::Program, SegmentClass::Global) => HsaSegment::GlobalProgram,
            (Allocation::Agent, SegmentClass::Global) => HsaSegment::GlobalAgent,
            (Allocation::Agent, SegmentClass::Readonly) => HsaSegment::ReadonlyAgent,
            (Allocation::Program, SegmentClass::Readonly) => {
                return Err(Error::InvalidArgument(format!(
                    "variable {name}: readonly variables must be agent-allocated"
                )))
            }
        };
        if !params.align.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "variable {name}: alignment {} is not a power of two",
                params.align
            )));
        }
        let index = self.hsa_section(kind)?;
        let binding = binding_for(name);
        let symbol = if params.definition {
            let section = self.image_mut().section_mut(index)?;
            let offset = match &params.init {
                Some(init) => {
                    let len = init.len() as u64;
                    if len > params.size {
                        return Err(Error::InvalidArgument(format!(
                            "variable {name}: initializer of {len} bytes exceeds size {}",
                            params.size
                        )));
                    }
                    let offset = section.add_data(init, params.align)?;
                    section.add_zeroes(params.size - len, 1)?;
                    offset
                }
                None => section.add_zeroes(params.size, params.align)?,
            };
            Symbol::new(0, offset, params.size, elf::STT_OBJECT, binding, shndx(index)?)
        } else {
            // Common symbols carry their alignment in the value.
            Symbol::new(0, params.align, params.size, elf::STT_COMMON, binding, shndx(index)?)
        };
        tracing::debug!("added variable {name} in {}", kind.name());
        self.image_mut().add_symbol(name, symbol)
    }

    /// Records a relocation against `target`, creating `.rela<target>` on
    /// first use.
    pub fn add_relocation(
        &mut self,
        target: SectionIndex,
        r_type: u32,
        symbol: SymbolIndex,
        offset: u64,
        addend: i64,
    ) -> Result<()> {
        self.check_building()?;
        let image = self.image_mut();
        let existing = image.relocation_sections_for(target).next();
        let section = match existing {
            Some(section) => section,
            None => {
                let name = image
                    .section(target)
                    .map(|s| format!(".rela{}", s.name()))
                    .ok_or_else(|| Error::format(format!("relocation target {} out of range", target.0)))?;
                let symtab = image.symtab().ok_or_else(|| Error::format("image has no symbol table"))?;
                image.add_relocation_section(&name, symtab, target)?
            }
        };
        let symbol = u32::try_from(symbol.0).map_err(|_| Error::Overflow(symbol.0 as u64))?;
        image.add_relocation(
            section,
            Relocation {
                offset,
                r_type,
                symbol,
                addend,
            },
        )
    }

    /// Lays out the image and indexes it. On failure the code object is
    /// left invalid.
    pub fn finalize(&mut self) -> Result<&[u8]> {
        self.check_building()?;
        let finalized = self.image_mut().finalize().map(<[u8]>::len);
        let result = finalized.and_then(|_| self.pull());
        if let Err(e) = result {
            self.state = State::Invalid;
            self.diagnostics.push(format!("finalize failed: {e}"));
            return Err(e);
        }
        Ok(self.raw_bytes())
    }
}

fn shndx(index: SectionIndex) -> Result<u16> {
    u16::try_from(index.0)
        .ok()
        .filter(|&i| i < elf::SHN_LORESERVE)
        .ok_or_else(|| Error::format(format!("section index {} needs an extended index", index.0)))
}
