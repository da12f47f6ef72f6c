//! Utility functions.

use object::endian::{I32Bytes, I64Bytes, LittleEndian, U16Bytes, U32Bytes, U64Bytes};

/// Aligns an address or size up to the next multiple of `align`.
/// `align` of 0 or 1 means no alignment; otherwise it must be a power of two.
pub fn align_up(addr: u64, align: u64) -> u64 {
    if align <= 1 {
        return addr;
    }
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

/// Reads a NUL-terminated string starting at `offset`.
///
/// Returns `None` if `offset` is out of range, the terminator is missing,
/// or the bytes are not UTF-8.
pub fn read_cstr(data: &[u8], offset: usize) -> Option<&str> {
    let tail = data.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&tail[..len]).ok()
}

/// Little-endian fields of on-disk records.
pub type U16Le = U16Bytes<LittleEndian>;
pub type U32Le = U32Bytes<LittleEndian>;
pub type U64Le = U64Bytes<LittleEndian>;
pub type I32Le = I32Bytes<LittleEndian>;
pub type I64Le = I64Bytes<LittleEndian>;

pub const LE: LittleEndian = LittleEndian;
