//! Attribute queries.
//!
//! Attributes are addressed by the numeric codes of the HSA runtime API.
//! [`InfoValue`] is the typed answer; [`InfoValue::write_to`] produces the
//! fixed-width byte form the runtime copies into caller buffers.

use super::notes::HsailNote;
use super::symbol::{CodeSymbol, SymbolDetails};
use super::CodeObject;
use crate::amdgpu::HsaSegment;
use crate::error::QueryError;

/// Width of the string form of code object attributes.
pub const INFO_STRING_SIZE: usize = 64;

/// `hsa_code_object_type_t` value of a program code object.
pub const CODE_OBJECT_TYPE_PROGRAM: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeAttribute {
    Version,
    Type,
    Isa,
    MachineModel,
    Profile,
    DefaultFloatRoundingMode,
}

impl TryFrom<u32> for CodeAttribute {
    type Error = QueryError;

    fn try_from(code: u32) -> Result<Self, QueryError> {
        Ok(match code {
            0 => CodeAttribute::Version,
            1 => CodeAttribute::Type,
            2 => CodeAttribute::Isa,
            3 => CodeAttribute::MachineModel,
            4 => CodeAttribute::Profile,
            5 => CodeAttribute::DefaultFloatRoundingMode,
            _ => return Err(QueryError::InvalidArgument),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolAttribute {
    Type,
    NameLength,
    Name,
    ModuleNameLength,
    ModuleName,
    Linkage,
    VariableAllocation,
    VariableSegment,
    VariableAlignment,
    VariableSize,
    VariableIsConst,
    KernelKernargSegmentSize,
    KernelKernargSegmentAlignment,
    KernelGroupSegmentSize,
    KernelPrivateSegmentSize,
    KernelDynamicCallstack,
    IsDefinition,
}

impl SymbolAttribute {
    pub const ALL: [SymbolAttribute; 17] = [
        SymbolAttribute::Type,
        SymbolAttribute::NameLength,
        SymbolAttribute::Name,
        SymbolAttribute::ModuleNameLength,
        SymbolAttribute::ModuleName,
        SymbolAttribute::Linkage,
        SymbolAttribute::VariableAllocation,
        SymbolAttribute::VariableSegment,
        SymbolAttribute::VariableAlignment,
        SymbolAttribute::VariableSize,
        SymbolAttribute::VariableIsConst,
        SymbolAttribute::KernelKernargSegmentSize,
        SymbolAttribute::KernelKernargSegmentAlignment,
        SymbolAttribute::KernelGroupSegmentSize,
        SymbolAttribute::KernelPrivateSegmentSize,
        SymbolAttribute::KernelDynamicCallstack,
        SymbolAttribute::IsDefinition,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SymbolAttribute::Type => "type",
            SymbolAttribute::NameLength => "name length",
            SymbolAttribute::Name => "name",
            SymbolAttribute::ModuleNameLength => "module name length",
            SymbolAttribute::ModuleName => "module name",
            SymbolAttribute::Linkage => "linkage",
            SymbolAttribute::VariableAllocation => "variable allocation",
            SymbolAttribute::VariableSegment => "variable segment",
            SymbolAttribute::VariableAlignment => "variable alignment",
            SymbolAttribute::VariableSize => "variable size",
            SymbolAttribute::VariableIsConst => "variable is const",
            SymbolAttribute::KernelKernargSegmentSize => "kernarg segment size",
            SymbolAttribute::KernelKernargSegmentAlignment => "kernarg segment alignment",
            SymbolAttribute::KernelGroupSegmentSize => "group segment size",
            SymbolAttribute::KernelPrivateSegmentSize => "private segment size",
            SymbolAttribute::KernelDynamicCallstack => "dynamic callstack",
            SymbolAttribute::IsDefinition => "is definition",
        }
    }
}

impl TryFrom<u32> for SymbolAttribute {
    type Error = QueryError;

    fn try_from(code: u32) -> Result<Self, QueryError> {
        Ok(match code {
            0 => SymbolAttribute::Type,
            1 => SymbolAttribute::NameLength,
            2 => SymbolAttribute::Name,
            3 => SymbolAttribute::ModuleNameLength,
            4 => SymbolAttribute::ModuleName,
            5 => SymbolAttribute::Linkage,
            6 => SymbolAttribute::VariableAllocation,
            7 => SymbolAttribute::VariableSegment,
            8 => SymbolAttribute::VariableAlignment,
            9 => SymbolAttribute::VariableSize,
            10 => SymbolAttribute::VariableIsConst,
            11 => SymbolAttribute::KernelKernargSegmentSize,
            12 => SymbolAttribute::KernelKernargSegmentAlignment,
            13 => SymbolAttribute::KernelGroupSegmentSize,
            14 => SymbolAttribute::KernelPrivateSegmentSize,
            15 => SymbolAttribute::KernelDynamicCallstack,
            17 => SymbolAttribute::IsDefinition,
            _ => return Err(QueryError::InvalidArgument),
        })
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    U32(u32),
    U64(u64),
    Bool(bool),
    /// A name, encoded as exactly its bytes.
    Str(String),
    /// A string encoded into a NUL-padded [`INFO_STRING_SIZE`] field.
    Fixed(String),
}

impl InfoValue {
    /// Number of bytes [`write_to`](Self::write_to) produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            InfoValue::U32(_) => 4,
            InfoValue::U64(_) => 8,
            InfoValue::Bool(_) => 1,
            InfoValue::Str(s) => s.len(),
            InfoValue::Fixed(_) => INFO_STRING_SIZE,
        }
    }

    /// Writes the fixed-width encoding into the front of `out` and returns
    /// the number of bytes written.
    pub fn write_to(&self, out: &mut [u8]) -> Result<usize, QueryError> {
        let len = self.encoded_len();
        let dest = out.get_mut(..len).ok_or(QueryError::InvalidArgument)?;
        match self {
            InfoValue::U32(v) => dest.copy_from_slice(&v.to_le_bytes()),
            InfoValue::U64(v) => dest.copy_from_slice(&v.to_le_bytes()),
            InfoValue::Bool(v) => dest[0] = u8::from(*v),
            InfoValue::Str(s) => dest.copy_from_slice(s.as_bytes()),
            InfoValue::Fixed(s) => {
                // keep room for the terminator
                let n = s.len().min(INFO_STRING_SIZE - 1);
                dest.fill(0);
                dest[..n].copy_from_slice(&s.as_bytes()[..n]);
            }
        }
        Ok(len)
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            InfoValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            InfoValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InfoValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::Str(s) | InfoValue::Fixed(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for InfoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfoValue::U32(v) => write!(f, "{v}"),
            InfoValue::U64(v) => write!(f, "{v}"),
            InfoValue::Bool(v) => write!(f, "{v}"),
            InfoValue::Str(s) | InfoValue::Fixed(s) => f.write_str(s),
        }
    }
}

impl CodeObject<'_, '_> {
    /// Answers a code object attribute from the version and HSAIL notes.
    pub fn info(&self, attribute: CodeAttribute) -> Result<InfoValue, QueryError> {
        self.check_queryable()?;
        let hsail = || -> Result<HsailNote, QueryError> { self.note_hsail()?.ok_or(QueryError::InvalidCodeObject) };
        Ok(match attribute {
            CodeAttribute::Version => {
                let version = self.note_version()?.ok_or(QueryError::InvalidCodeObject)?;
                InfoValue::Fixed(version.to_string())
            }
            CodeAttribute::Type => InfoValue::U32(CODE_OBJECT_TYPE_PROGRAM),
            CodeAttribute::Isa => {
                let isa = self.note_isa()?.ok_or(QueryError::InvalidCodeObject)?;
                InfoValue::Fixed(isa.to_string())
            }
            CodeAttribute::MachineModel => InfoValue::U32(u32::from(hsail()?.machine_model)),
            CodeAttribute::Profile => InfoValue::U32(u32::from(hsail()?.profile)),
            CodeAttribute::DefaultFloatRoundingMode => InfoValue::U32(u32::from(hsail()?.default_float_round)),
        })
    }

    /// Raw-code form of [`info`](Self::info).
    pub fn info_raw(&self, attribute: u32, out: &mut [u8]) -> Result<usize, QueryError> {
        let attribute = CodeAttribute::try_from(attribute)?;
        self.info(attribute)?.write_to(out)
    }

    /// Answers a symbol attribute. Kind-specific attributes asked of the
    /// other kind are `InvalidArgument`.
    pub fn symbol_info(&self, symbol: &CodeSymbol, attribute: SymbolAttribute) -> Result<InfoValue, QueryError> {
        self.check_queryable()?;
        symbol_info(symbol, attribute)
    }

    /// Raw-code form of [`symbol_info`](Self::symbol_info).
    pub fn symbol_info_raw(&self, symbol: &CodeSymbol, attribute: u32, out: &mut [u8]) -> Result<usize, QueryError> {
        let attribute = SymbolAttribute::try_from(attribute)?;
        self.symbol_info(symbol, attribute)?.write_to(out)
    }

    /// Segment kind holding `symbol`, if its section lies in an accelerator segment.
    pub fn symbol_segment(&self, symbol: &CodeSymbol) -> Option<HsaSegment> {
        let section = self.image().section(symbol.section()?)?;
        let segment = self.image().segment(section.segment()?)?;
        HsaSegment::from_p_type(segment.kind())
    }
}

fn symbol_info(symbol: &CodeSymbol, attribute: SymbolAttribute) -> Result<InfoValue, QueryError> {
    let len = |s: &str| u32::try_from(s.len()).map_err(|_| QueryError::Error);
    let value = match (attribute, symbol.details()) {
        (SymbolAttribute::Type, _) => InfoValue::U32(symbol.kind() as u32),
        (SymbolAttribute::NameLength, _) => InfoValue::U32(len(symbol.name())?),
        (SymbolAttribute::Name, _) => InfoValue::Str(symbol.name().to_string()),
        (SymbolAttribute::ModuleNameLength, _) => InfoValue::U32(len(symbol.module_name())?),
        (SymbolAttribute::ModuleName, _) => InfoValue::Str(symbol.module_name().to_string()),
        (SymbolAttribute::Linkage, _) => InfoValue::U32(symbol.linkage() as u32),
        (SymbolAttribute::IsDefinition, _) => InfoValue::Bool(symbol.is_definition()),

        (SymbolAttribute::VariableAllocation, SymbolDetails::Variable(v)) => InfoValue::U32(v.allocation as u32),
        (SymbolAttribute::VariableSegment, SymbolDetails::Variable(v)) => InfoValue::U32(v.segment as u32),
        (SymbolAttribute::VariableAlignment, SymbolDetails::Variable(v)) => InfoValue::U32(v.alignment),
        (SymbolAttribute::VariableSize, SymbolDetails::Variable(v)) => InfoValue::U64(v.size),
        (SymbolAttribute::VariableIsConst, SymbolDetails::Variable(v)) => InfoValue::Bool(v.is_const),

        (SymbolAttribute::KernelKernargSegmentSize, SymbolDetails::Kernel(k)) => {
            InfoValue::U64(k.kernarg_segment_size)
        }
        (SymbolAttribute::KernelKernargSegmentAlignment, SymbolDetails::Kernel(k)) => {
            InfoValue::U32(k.kernarg_segment_alignment)
        }
        (SymbolAttribute::KernelGroupSegmentSize, SymbolDetails::Kernel(k)) => InfoValue::U32(k.group_segment_size),
        (SymbolAttribute::KernelPrivateSegmentSize, SymbolDetails::Kernel(k)) => {
            InfoValue::U32(k.private_segment_size)
        }
        (SymbolAttribute::KernelDynamicCallstack, SymbolDetails::Kernel(k)) => InfoValue::Bool(k.is_dynamic_callstack),

        _ => return Err(QueryError::InvalidArgument),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_widths() {
        let mut out = [0xffu8; 80];
        assert_eq!(InfoValue::U32(7).write_to(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[7, 0, 0, 0]);
        assert_eq!(InfoValue::U64(1 << 40).write_to(&mut out).unwrap(), 8);
        assert_eq!(InfoValue::Bool(true).write_to(&mut out).unwrap(), 1);
        assert_eq!(out[0], 1);

        assert_eq!(InfoValue::Str("kern".into()).write_to(&mut out).unwrap(), 4);
        assert_eq!(&out[..5], b"kern\0");

        assert_eq!(InfoValue::Fixed("1.0".into()).write_to(&mut out).unwrap(), 64);
        assert_eq!(&out[..4], b"1.0\0");
        assert!(out[3..64].iter().all(|&b| b == 0));
        assert_eq!(out[64], 0xff);
    }

    #[test]
    fn short_buffer_is_invalid_argument() {
        let mut out = [0u8; 3];
        assert_eq!(InfoValue::U32(1).write_to(&mut out), Err(QueryError::InvalidArgument));
        assert_eq!(InfoValue::Fixed(String::new()).write_to(&mut out), Err(QueryError::InvalidArgument));
    }

    #[test]
    fn attribute_codes() {
        assert_eq!(SymbolAttribute::try_from(17), Ok(SymbolAttribute::IsDefinition));
        assert_eq!(SymbolAttribute::try_from(16), Err(QueryError::InvalidArgument));
        assert_eq!(CodeAttribute::try_from(2), Ok(CodeAttribute::Isa));
        assert_eq!(CodeAttribute::try_from(6), Err(QueryError::InvalidArgument));
    }
}
