//! Kernel descriptor.
//!
//! Every kernel symbol points at a 256-byte `amd_kernel_code_t` record that
//! precedes the kernel's machine code. The loader reads segment sizes and
//! alignment requirements from it.

use object::pod::{self, Pod};

use crate::error::{Error, Result};
use crate::utils::{I32Le, I64Le, U16Le, U32Le, U64Le, LE};

/// Size of the encoded descriptor.
pub const KERNEL_CODE_SIZE: usize = 256;

/// Alignment of a descriptor within the code section.
pub const KERNEL_CODE_ALIGN: u64 = 256;

/// `kernel_code_properties` bit marking a dynamically sized call stack.
pub const KERNEL_CODE_PROPERTY_IS_DYNAMIC_CALLSTACK: u32 = 1 << 20;

/// `amd_machine_kind` of an AMDGPU device.
pub const MACHINE_KIND_AMDGPU: u16 = 1;

/// A decoded kernel descriptor.
///
/// Alignment fields hold log2 exponents, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCode {
    pub version_major: u32,
    pub version_minor: u32,
    pub machine_kind: u16,
    pub machine_version_major: u16,
    pub machine_version_minor: u16,
    pub machine_version_stepping: u16,
    /// Offset of the first instruction from the start of the descriptor.
    pub kernel_code_entry_byte_offset: i64,
    pub kernel_code_prefetch_byte_offset: i64,
    pub kernel_code_prefetch_byte_size: u64,
    pub max_scratch_backing_memory_byte_size: u64,
    pub compute_pgm_rsrc1: u32,
    pub compute_pgm_rsrc2: u32,
    pub kernel_code_properties: u32,
    pub workitem_private_segment_byte_size: u32,
    pub workgroup_group_segment_byte_size: u32,
    pub gds_segment_byte_size: u32,
    pub kernarg_segment_byte_size: u64,
    pub workgroup_fbarrier_count: u32,
    pub wavefront_sgpr_count: u16,
    pub workitem_vgpr_count: u16,
    pub reserved_vgpr_first: u16,
    pub reserved_vgpr_count: u16,
    pub reserved_sgpr_first: u16,
    pub reserved_sgpr_count: u16,
    pub debug_wavefront_private_segment_offset_sgpr: u16,
    pub debug_private_segment_buffer_sgpr: u16,
    pub kernarg_segment_alignment: u8,
    pub group_segment_alignment: u8,
    pub private_segment_alignment: u8,
    pub wavefront_size: u8,
    pub call_convention: i32,
    pub runtime_loader_kernel_symbol: u64,
    pub control_directives: [u8; 128],
}

impl Default for KernelCode {
    fn default() -> Self {
        Self {
            version_major: 1,
            version_minor: 0,
            machine_kind: MACHINE_KIND_AMDGPU,
            machine_version_major: 0,
            machine_version_minor: 0,
            machine_version_stepping: 0,
            kernel_code_entry_byte_offset: KERNEL_CODE_SIZE as i64,
            kernel_code_prefetch_byte_offset: 0,
            kernel_code_prefetch_byte_size: 0,
            max_scratch_backing_memory_byte_size: 0,
            compute_pgm_rsrc1: 0,
            compute_pgm_rsrc2: 0,
            kernel_code_properties: 0,
            workitem_private_segment_byte_size: 0,
            workgroup_group_segment_byte_size: 0,
            gds_segment_byte_size: 0,
            kernarg_segment_byte_size: 0,
            workgroup_fbarrier_count: 0,
            wavefront_sgpr_count: 0,
            workitem_vgpr_count: 0,
            reserved_vgpr_first: 0,
            reserved_vgpr_count: 0,
            reserved_sgpr_first: 0,
            reserved_sgpr_count: 0,
            debug_wavefront_private_segment_offset_sgpr: 0,
            debug_private_segment_buffer_sgpr: 0,
            kernarg_segment_alignment: 4,
            group_segment_alignment: 4,
            private_segment_alignment: 4,
            // log2 of 64 lanes
            wavefront_size: 6,
            call_convention: -1,
            runtime_loader_kernel_symbol: 0,
            control_directives: [0; 128],
        }
    }
}

/// On-disk layout of `amd_kernel_code_t`.
#[derive(Clone, Copy)]
#[repr(C)]
struct RawKernelCode {
    version_major: U32Le,
    version_minor: U32Le,
    machine_kind: U16Le,
    machine_version_major: U16Le,
    machine_version_minor: U16Le,
    machine_version_stepping: U16Le,
    kernel_code_entry_byte_offset: I64Le,
    kernel_code_prefetch_byte_offset: I64Le,
    kernel_code_prefetch_byte_size: U64Le,
    max_scratch_backing_memory_byte_size: U64Le,
    compute_pgm_rsrc1: U32Le,
    compute_pgm_rsrc2: U32Le,
    kernel_code_properties: U32Le,
    workitem_private_segment_byte_size: U32Le,
    workgroup_group_segment_byte_size: U32Le,
    gds_segment_byte_size: U32Le,
    kernarg_segment_byte_size: U64Le,
    workgroup_fbarrier_count: U32Le,
    wavefront_sgpr_count: U16Le,
    workitem_vgpr_count: U16Le,
    reserved_vgpr_first: U16Le,
    reserved_vgpr_count: U16Le,
    reserved_sgpr_first: U16Le,
    reserved_sgpr_count: U16Le,
    debug_wavefront_private_segment_offset_sgpr: U16Le,
    debug_private_segment_buffer_sgpr: U16Le,
    kernarg_segment_alignment: u8,
    group_segment_alignment: u8,
    private_segment_alignment: u8,
    wavefront_size: u8,
    call_convention: I32Le,
    reserved: [u8; 12],
    runtime_loader_kernel_symbol: U64Le,
    control_directives: [u8; 128],
}

// SAFETY: `repr(C)` over byte-array fields only, so there is no padding and
// every bit pattern is valid.
unsafe impl Pod for RawKernelCode {}

const _: () = assert!(std::mem::size_of::<RawKernelCode>() == KERNEL_CODE_SIZE);

impl KernelCode {
    /// Decodes a descriptor from the first 256 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) = pod::from_bytes::<RawKernelCode>(data).map_err(|()| {
            Error::format(format!(
                "kernel descriptor needs {KERNEL_CODE_SIZE} bytes, found {}",
                data.len()
            ))
        })?;
        Ok(Self {
            version_major: raw.version_major.get(LE),
            version_minor: raw.version_minor.get(LE),
            machine_kind: raw.machine_kind.get(LE),
            machine_version_major: raw.machine_version_major.get(LE),
            machine_version_minor: raw.machine_version_minor.get(LE),
            machine_version_stepping: raw.machine_version_stepping.get(LE),
            kernel_code_entry_byte_offset: raw.kernel_code_entry_byte_offset.get(LE),
            kernel_code_prefetch_byte_offset: raw.kernel_code_prefetch_byte_offset.get(LE),
            kernel_code_prefetch_byte_size: raw.kernel_code_prefetch_byte_size.get(LE),
            max_scratch_backing_memory_byte_size: raw.max_scratch_backing_memory_byte_size.get(LE),
            compute_pgm_rsrc1: raw.compute_pgm_rsrc1.get(LE),
            compute_pgm_rsrc2: raw.compute_pgm_rsrc2.get(LE),
            kernel_code_properties: raw.kernel_code_properties.get(LE),
            workitem_private_segment_byte_size: raw.workitem_private_segment_byte_size.get(LE),
            workgroup_group_segment_byte_size: raw.workgroup_group_segment_byte_size.get(LE),
            gds_segment_byte_size: raw.gds_segment_byte_size.get(LE),
            kernarg_segment_byte_size: raw.kernarg_segment_byte_size.get(LE),
            workgroup_fbarrier_count: raw.workgroup_fbarrier_count.get(LE),
            wavefront_sgpr_count: raw.wavefront_sgpr_count.get(LE),
            workitem_vgpr_count: raw.workitem_vgpr_count.get(LE),
            reserved_vgpr_first: raw.reserved_vgpr_first.get(LE),
            reserved_vgpr_count: raw.reserved_vgpr_count.get(LE),
            reserved_sgpr_first: raw.reserved_sgpr_first.get(LE),
            reserved_sgpr_count: raw.reserved_sgpr_count.get(LE),
            debug_wavefront_private_segment_offset_sgpr: raw.debug_wavefront_private_segment_offset_sgpr.get(LE),
            debug_private_segment_buffer_sgpr: raw.debug_private_segment_buffer_sgpr.get(LE),
            kernarg_segment_alignment: raw.kernarg_segment_alignment,
            group_segment_alignment: raw.group_segment_alignment,
            private_segment_alignment: raw.private_segment_alignment,
            wavefront_size: raw.wavefront_size,
            call_convention: raw.call_convention.get(LE),
            runtime_loader_kernel_symbol: raw.runtime_loader_kernel_symbol.get(LE),
            control_directives: raw.control_directives,
        })
    }

    /// Encodes the descriptor. Reserved bytes are zero.
    pub fn to_bytes(&self) -> [u8; KERNEL_CODE_SIZE] {
        let raw = RawKernelCode {
            version_major: U32Le::new(LE, self.version_major),
            version_minor: U32Le::new(LE, self.version_minor),
            machine_kind: U16Le::new(LE, self.machine_kind),
            machine_version_major: U16Le::new(LE, self.machine_version_major),
            machine_version_minor: U16Le::new(LE, self.machine_version_minor),
            machine_version_stepping: U16Le::new(LE, self.machine_version_stepping),
            kernel_code_entry_byte_offset: I64Le::new(LE, self.kernel_code_entry_byte_offset),
            kernel_code_prefetch_byte_offset: I64Le::new(LE, self.kernel_code_prefetch_byte_offset),
            kernel_code_prefetch_byte_size: U64Le::new(LE, self.kernel_code_prefetch_byte_size),
            max_scratch_backing_memory_byte_size: U64Le::new(LE, self.max_scratch_backing_memory_byte_size),
            compute_pgm_rsrc1: U32Le::new(LE, self.compute_pgm_rsrc1),
            compute_pgm_rsrc2: U32Le::new(LE, self.compute_pgm_rsrc2),
            kernel_code_properties: U32Le::new(LE, self.kernel_code_properties),
            workitem_private_segment_byte_size: U32Le::new(LE, self.workitem_private_segment_byte_size),
            workgroup_group_segment_byte_size: U32Le::new(LE, self.workgroup_group_segment_byte_size),
            gds_segment_byte_size: U32Le::new(LE, self.gds_segment_byte_size),
            kernarg_segment_byte_size: U64Le::new(LE, self.kernarg_segment_byte_size),
            workgroup_fbarrier_count: U32Le::new(LE, self.workgroup_fbarrier_count),
            wavefront_sgpr_count: U16Le::new(LE, self.wavefront_sgpr_count),
            workitem_vgpr_count: U16Le::new(LE, self.workitem_vgpr_count),
            reserved_vgpr_first: U16Le::new(LE, self.reserved_vgpr_first),
            reserved_vgpr_count: U16Le::new(LE, self.reserved_vgpr_count),
            reserved_sgpr_first: U16Le::new(LE, self.reserved_sgpr_first),
            reserved_sgpr_count: U16Le::new(LE, self.reserved_sgpr_count),
            debug_wavefront_private_segment_offset_sgpr: U16Le::new(
                LE,
                self.debug_wavefront_private_segment_offset_sgpr,
            ),
            debug_private_segment_buffer_sgpr: U16Le::new(LE, self.debug_private_segment_buffer_sgpr),
            kernarg_segment_alignment: self.kernarg_segment_alignment,
            group_segment_alignment: self.group_segment_alignment,
            private_segment_alignment: self.private_segment_alignment,
            wavefront_size: self.wavefront_size,
            call_convention: I32Le::new(LE, self.call_convention),
            reserved: [0; 12],
            runtime_loader_kernel_symbol: U64Le::new(LE, self.runtime_loader_kernel_symbol),
            control_directives: self.control_directives,
        };
        let mut b = [0u8; KERNEL_CODE_SIZE];
        b.copy_from_slice(pod::bytes_of(&raw));
        b
    }

    pub fn is_dynamic_callstack(&self) -> bool {
        self.kernel_code_properties & KERNEL_CODE_PROPERTY_IS_DYNAMIC_CALLSTACK != 0
    }

    /// Kernarg segment alignment in bytes, or `None` if the exponent is
    /// too large for a 32-bit value.
    pub fn kernarg_alignment(&self) -> Option<u32> {
        1u32.checked_shl(u32::from(self.kernarg_segment_alignment))
    }

    /// Loader-facing summary of the descriptor.
    pub fn summary(&self) -> Result<KernelInfo> {
        let kernarg_segment_alignment = self.kernarg_alignment().ok_or_else(|| {
            Error::format(format!(
                "kernarg segment alignment exponent {} is too large",
                self.kernarg_segment_alignment
            ))
        })?;
        Ok(KernelInfo {
            kernarg_segment_size: self.kernarg_segment_byte_size,
            kernarg_segment_alignment,
            group_segment_size: self.workgroup_group_segment_byte_size,
            private_segment_size: self.workitem_private_segment_byte_size,
            is_dynamic_callstack: self.is_dynamic_callstack(),
        })
    }
}

/// Segment requirements of a kernel, as reported to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelInfo {
    pub kernarg_segment_size: u64,
    /// In bytes.
    pub kernarg_segment_alignment: u32,
    pub group_segment_size: u32,
    pub private_segment_size: u32,
    pub is_dynamic_callstack: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fields_at_fixed_offsets() {
        let mut raw = [0u8; KERNEL_CODE_SIZE];
        raw[56..60].copy_from_slice(&KERNEL_CODE_PROPERTY_IS_DYNAMIC_CALLSTACK.to_le_bytes());
        raw[60..64].copy_from_slice(&32u32.to_le_bytes());
        raw[64..68].copy_from_slice(&256u32.to_le_bytes());
        raw[72..80].copy_from_slice(&64u64.to_le_bytes());
        raw[100] = 4;
        let code = KernelCode::parse(&raw).unwrap();
        let info = code.summary().unwrap();
        assert_eq!(
            info,
            KernelInfo {
                kernarg_segment_size: 64,
                kernarg_segment_alignment: 16,
                group_segment_size: 256,
                private_segment_size: 32,
                is_dynamic_callstack: true,
            }
        );
        assert_eq!(code.to_bytes(), raw);
    }

    #[test]
    fn encode_then_parse_preserves_defaults() {
        let code = KernelCode {
            kernarg_segment_byte_size: 24,
            wavefront_sgpr_count: 18,
            ..Default::default()
        };
        assert_eq!(KernelCode::parse(&code.to_bytes()).unwrap(), code);
    }

    #[test]
    fn short_or_oversized_inputs_are_rejected() {
        assert!(matches!(KernelCode::parse(&[0; 100]), Err(Error::Format(_))));
        assert!(matches!(KernelCode::parse(&[0; KERNEL_CODE_SIZE - 1]), Err(Error::Format(_))));

        // trailing machine code and odd offsets are fine
        let mut buf = vec![0u8; KERNEL_CODE_SIZE + 9];
        buf[1 + 72..1 + 80].copy_from_slice(&48u64.to_le_bytes());
        let parsed = KernelCode::parse(&buf[1..]).unwrap();
        assert_eq!(parsed.kernarg_segment_byte_size, 48);

        let code = KernelCode {
            kernarg_segment_alignment: 40,
            ..Default::default()
        };
        assert!(code.summary().is_err());
    }
}
