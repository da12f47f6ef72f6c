//! Architecture abstraction.
//!
//! The `Architecture` trait holds the target-specific parts of code object
//! handling: the machine a code object must declare and the arithmetic of
//! its relocation types. The semantic layer stays generic over it.

use crate::error::Result;

pub mod amdgpu;

pub use amdgpu::AmdGpu;

/// A target architecture.
pub trait Architecture {
    /// `EM_*` value an image must carry.
    fn machine(&self) -> u16;

    /// Short name of a relocation type, for dumps.
    fn relocation_name(&self, r_type: u32) -> &'static str;

    /// Applies a relocation to a section buffer.
    ///
    /// # Arguments
    /// * `r_type` - The relocation type.
    /// * `offset` - Offset within `data` of the location being relocated.
    /// * `s` - The resolved value of the symbol (S).
    /// * `a` - The addend (A).
    /// * `data` - The contents of the target section.
    fn apply_relocation(&self, r_type: u32, offset: u64, s: u64, a: i64, data: &mut [u8]) -> Result<()>;
}
