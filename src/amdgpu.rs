//! AMD HSA code object conventions.
//!
//! Extensions to ELF used by HSA code objects: four load segment kinds,
//! four section visibility flags, a kernel symbol type, the `AMD` note
//! types and the AMDGPU relocation types.

use object::elf;

pub const EM_AMDGPU: u16 = elf::EM_AMDGPU;
pub const ELFOSABI_AMDGPU_HSA: u8 = 64;
pub const ELFABIVERSION_AMDGPU_HSA: u8 = 1;

/// `e_flags` bit set when the code was compiled with XNACK replay enabled.
pub const EF_AMDGPU_XNACK: u32 = 0x1;

pub const PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM: u32 = elf::PT_LOOS;
pub const PT_AMDGPU_HSA_LOAD_GLOBAL_AGENT: u32 = elf::PT_LOOS + 1;
pub const PT_AMDGPU_HSA_LOAD_READONLY_AGENT: u32 = elf::PT_LOOS + 2;
pub const PT_AMDGPU_HSA_LOAD_CODE_AGENT: u32 = elf::PT_LOOS + 3;

pub const SHF_AMDGPU_HSA_GLOBAL: u64 = 0x0010_0000;
pub const SHF_AMDGPU_HSA_READONLY: u64 = 0x0020_0000;
pub const SHF_AMDGPU_HSA_CODE: u64 = 0x0040_0000;
pub const SHF_AMDGPU_HSA_AGENT: u64 = 0x0080_0000;

/// Any accelerator visibility bit.
pub const SHF_AMDGPU_HSA_MASK: u64 =
    SHF_AMDGPU_HSA_GLOBAL | SHF_AMDGPU_HSA_READONLY | SHF_AMDGPU_HSA_CODE | SHF_AMDGPU_HSA_AGENT;

pub const STT_AMDGPU_HSA_KERNEL: u8 = elf::STT_LOOS;
pub const STT_AMDGPU_HSA_INDIRECT_FUNCTION: u8 = elf::STT_LOOS + 1;
pub const STT_AMDGPU_HSA_METADATA: u8 = elf::STT_LOOS + 2;

/// Owner string of every HSA note.
pub const NOTE_OWNER: &str = "AMD";

pub const NT_AMDGPU_HSA_CODE_OBJECT_VERSION: u32 = 1;
pub const NT_AMDGPU_HSA_HSAIL: u32 = 2;
pub const NT_AMDGPU_HSA_ISA: u32 = 3;
pub const NT_AMDGPU_HSA_PRODUCER: u32 = 4;
pub const NT_AMDGPU_HSA_PRODUCER_OPTIONS: u32 = 5;

pub const R_AMDGPU_NONE: u32 = 0;
pub const R_AMDGPU_32_LOW: u32 = 1;
pub const R_AMDGPU_32_HIGH: u32 = 2;
pub const R_AMDGPU_64: u32 = 3;
pub const R_AMDGPU_INIT_SAMPLER: u32 = 4;
pub const R_AMDGPU_INIT_IMAGE: u32 = 5;

/// Separator between module and symbol name in a module-linkage symbol.
pub const MODULE_SEPARATOR: &str = "::";

/// The four accelerator load segment kinds. Each has one default data
/// section used by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HsaSegment {
    GlobalProgram,
    GlobalAgent,
    ReadonlyAgent,
    CodeAgent,
}

impl HsaSegment {
    pub const ALL: [HsaSegment; 4] = [
        HsaSegment::GlobalProgram,
        HsaSegment::GlobalAgent,
        HsaSegment::ReadonlyAgent,
        HsaSegment::CodeAgent,
    ];

    pub fn from_p_type(p_type: u32) -> Option<Self> {
        match p_type {
            PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM => Some(HsaSegment::GlobalProgram),
            PT_AMDGPU_HSA_LOAD_GLOBAL_AGENT => Some(HsaSegment::GlobalAgent),
            PT_AMDGPU_HSA_LOAD_READONLY_AGENT => Some(HsaSegment::ReadonlyAgent),
            PT_AMDGPU_HSA_LOAD_CODE_AGENT => Some(HsaSegment::CodeAgent),
            _ => None,
        }
    }

    pub fn p_type(self) -> u32 {
        match self {
            HsaSegment::GlobalProgram => PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM,
            HsaSegment::GlobalAgent => PT_AMDGPU_HSA_LOAD_GLOBAL_AGENT,
            HsaSegment::ReadonlyAgent => PT_AMDGPU_HSA_LOAD_READONLY_AGENT,
            HsaSegment::CodeAgent => PT_AMDGPU_HSA_LOAD_CODE_AGENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HsaSegment::GlobalProgram => "global/program",
            HsaSegment::GlobalAgent => "global/agent",
            HsaSegment::ReadonlyAgent => "readonly/agent",
            HsaSegment::CodeAgent => "code/agent",
        }
    }

    pub(crate) fn segment_flags(self) -> u32 {
        match self {
            HsaSegment::GlobalProgram | HsaSegment::GlobalAgent => elf::PF_R | elf::PF_W,
            HsaSegment::ReadonlyAgent => elf::PF_R,
            HsaSegment::CodeAgent => elf::PF_R | elf::PF_X,
        }
    }

    pub(crate) fn align(self) -> u64 {
        match self {
            HsaSegment::CodeAgent => 256,
            _ => 8,
        }
    }

    pub(crate) fn section_name(self) -> &'static str {
        match self {
            HsaSegment::GlobalProgram => ".hsadata_global_program",
            HsaSegment::GlobalAgent => ".hsadata_global_agent",
            HsaSegment::ReadonlyAgent => ".hsadata_readonly_agent",
            HsaSegment::CodeAgent => ".hsatext",
        }
    }

    pub(crate) fn section_flags(self) -> u64 {
        let alloc = u64::from(elf::SHF_ALLOC);
        let write = u64::from(elf::SHF_WRITE);
        match self {
            HsaSegment::GlobalProgram => alloc | write | SHF_AMDGPU_HSA_GLOBAL,
            HsaSegment::GlobalAgent => alloc | write | SHF_AMDGPU_HSA_GLOBAL | SHF_AMDGPU_HSA_AGENT,
            HsaSegment::ReadonlyAgent => alloc | SHF_AMDGPU_HSA_READONLY | SHF_AMDGPU_HSA_AGENT,
            HsaSegment::CodeAgent => {
                alloc | write | u64::from(elf::SHF_EXECINSTR) | SHF_AMDGPU_HSA_CODE | SHF_AMDGPU_HSA_AGENT
            }
        }
    }
}

/// Whether a section with `sh_type` and `flags` holds accelerator data.
pub fn is_data_section(sh_type: u32, flags: u64) -> bool {
    (sh_type == elf::SHT_PROGBITS || sh_type == elf::SHT_NOBITS) && flags & SHF_AMDGPU_HSA_MASK != 0
}

pub fn profile_name(profile: u8) -> &'static str {
    match profile {
        0 => "base",
        1 => "full",
        _ => "unknown",
    }
}

pub fn machine_model_name(model: u8) -> &'static str {
    match model {
        0 => "small",
        1 => "large",
        _ => "unknown",
    }
}

pub fn rounding_mode_name(mode: u8) -> &'static str {
    match mode {
        0 => "default",
        1 => "zero",
        2 => "near",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_kinds_round_trip() {
        for kind in HsaSegment::ALL {
            assert_eq!(HsaSegment::from_p_type(kind.p_type()), Some(kind));
        }
        assert_eq!(HsaSegment::from_p_type(elf::PT_LOAD), None);
        assert_eq!(HsaSegment::from_p_type(elf::PT_LOOS + 4), None);
    }

    #[test]
    fn data_section_needs_type_and_flag() {
        assert!(is_data_section(elf::SHT_PROGBITS, SHF_AMDGPU_HSA_GLOBAL));
        assert!(is_data_section(elf::SHT_NOBITS, SHF_AMDGPU_HSA_AGENT));
        assert!(!is_data_section(elf::SHT_PROGBITS, u64::from(elf::SHF_ALLOC)));
        assert!(!is_data_section(elf::SHT_NOTE, SHF_AMDGPU_HSA_CODE));
        for kind in HsaSegment::ALL {
            assert!(is_data_section(elf::SHT_PROGBITS, kind.section_flags()));
        }
    }
}
