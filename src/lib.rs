//! AMD HSA code object library.
//!
//! Reads, builds and queries the ELF-based containers that carry GPU
//! kernels for HSA runtimes. It is organized into several modules:
//! - `image`: Generic ELF image: parse, build and finalize.
//! - `code`: The accelerator view of an image: kernels, variables, notes
//!   and attribute queries.
//! - `kernel_code`: The kernel descriptor record.
//! - `amdgpu`: Container constants (segment kinds, flags, note types).
//! - `arch`: Architecture-specific relocation logic.
//! - `registry`: Handle-based ownership of code objects.
//! - `config`: CLI configuration of the `hsaco` dump tool.

pub mod amdgpu;
pub mod arch;
pub mod code;
pub mod config;
pub mod error;
pub mod image;
pub mod kernel_code;
pub mod registry;
pub mod utils;

pub use code::{CodeObject, CodeSymbol, State};
pub use error::{Error, QueryError, Result};
pub use image::{Class, Image, ImageHeader};
pub use kernel_code::{KernelCode, KernelInfo};
pub use registry::{Handle, Registry};
