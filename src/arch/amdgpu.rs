//! AMDGPU architecture backend.

use super::Architecture;
use crate::amdgpu::{
    EM_AMDGPU, R_AMDGPU_32_HIGH, R_AMDGPU_32_LOW, R_AMDGPU_64, R_AMDGPU_INIT_IMAGE, R_AMDGPU_INIT_SAMPLER,
    R_AMDGPU_NONE,
};
use crate::error::{Error, Result};

/// The AMDGPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmdGpu;

impl Architecture for AmdGpu {
    fn machine(&self) -> u16 {
        EM_AMDGPU
    }

    fn relocation_name(&self, r_type: u32) -> &'static str {
        match r_type {
            R_AMDGPU_NONE => "R_AMDGPU_NONE",
            R_AMDGPU_32_LOW => "R_AMDGPU_32_LOW",
            R_AMDGPU_32_HIGH => "R_AMDGPU_32_HIGH",
            R_AMDGPU_64 => "R_AMDGPU_64",
            R_AMDGPU_INIT_SAMPLER => "R_AMDGPU_INIT_SAMPLER",
            R_AMDGPU_INIT_IMAGE => "R_AMDGPU_INIT_IMAGE",
            _ => "unknown",
        }
    }

    fn apply_relocation(&self, r_type: u32, offset: u64, s: u64, a: i64, data: &mut [u8]) -> Result<()> {
        // All AMDGPU relocations compute S + A; they differ in which part is stored.
        let value = s.wrapping_add(a as u64);
        match r_type {
            R_AMDGPU_NONE => Ok(()),
            R_AMDGPU_32_LOW => write(data, offset, &(value as u32).to_le_bytes()),
            R_AMDGPU_32_HIGH => write(data, offset, &((value >> 32) as u32).to_le_bytes()),
            R_AMDGPU_64 => write(data, offset, &value.to_le_bytes()),
            // Sampler and image handles are created by the runtime loader.
            R_AMDGPU_INIT_SAMPLER | R_AMDGPU_INIT_IMAGE => Err(Error::Relocation(format!(
                "{} needs a runtime handle",
                self.relocation_name(r_type)
            ))),
            other => Err(Error::Relocation(format!("unsupported relocation type {other}"))),
        }
    }
}

fn write(data: &mut [u8], offset: u64, bytes: &[u8]) -> Result<()> {
    let start = usize::try_from(offset).ok();
    let dest = start
        .and_then(|s| s.checked_add(bytes.len()).map(|end| (s, end)))
        .and_then(|(s, end)| data.get_mut(s..end))
        .ok_or_else(|| Error::Relocation(format!("relocation offset {offset:#x} out of bounds")))?;
    dest.copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_full_width() {
        let mut data = [0u8; 16];
        let s = 0x1122_3344_5566_7788;
        AmdGpu.apply_relocation(R_AMDGPU_32_LOW, 0, s, 0, &mut data).unwrap();
        AmdGpu.apply_relocation(R_AMDGPU_32_HIGH, 4, s, 0, &mut data).unwrap();
        assert_eq!(u64::from_le_bytes(data[..8].try_into().unwrap()), s);

        AmdGpu.apply_relocation(R_AMDGPU_64, 8, 0x1000, -16, &mut data).unwrap();
        assert_eq!(u64::from_le_bytes(data[8..].try_into().unwrap()), 0xff0);
    }

    #[test]
    fn rejects_out_of_bounds_and_unknown() {
        let mut data = [0u8; 6];
        assert!(AmdGpu.apply_relocation(R_AMDGPU_64, 0, 1, 0, &mut data).is_err());
        assert!(AmdGpu.apply_relocation(R_AMDGPU_32_LOW, u64::MAX, 1, 0, &mut data).is_err());
        assert!(AmdGpu.apply_relocation(99, 0, 1, 0, &mut data).is_err());
        assert!(AmdGpu.apply_relocation(R_AMDGPU_INIT_SAMPLER, 0, 1, 0, &mut data).is_err());
        AmdGpu.apply_relocation(R_AMDGPU_NONE, 100, 1, 0, &mut data).unwrap();
        assert_eq!(AmdGpu.relocation_name(R_AMDGPU_INIT_IMAGE), "R_AMDGPU_INIT_IMAGE");
    }
}
