//! Segments (program headers).

/// Parameters for [`Image::add_segment`](super::Image::add_segment).
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentParams {
    /// `PT_*` type code.
    pub kind: u32,
    /// Load address. `None` places the segment after the previous one.
    pub vaddr: Option<u64>,
    /// `PF_*` flags.
    pub flags: u32,
    pub align: u64,
}

/// A loadable region. Member sections are found by address containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub(crate) kind: u32,
    pub(crate) flags: u32,
    pub(crate) vaddr: u64,
    pub(crate) offset: u64,
    pub(crate) file_size: u64,
    pub(crate) mem_size: u64,
    pub(crate) align: u64,
    /// Address is chosen at finalize.
    pub(crate) auto_place: bool,
}

impl Segment {
    pub(crate) fn new(params: SegmentParams) -> Self {
        Self {
            kind: params.kind,
            flags: params.flags,
            vaddr: params.vaddr.unwrap_or(0),
            offset: 0,
            file_size: 0,
            mem_size: 0,
            align: params.align.max(1),
            auto_place: params.vaddr.is_none(),
        }
    }

    pub(crate) fn parsed(
        kind: u32,
        flags: u32,
        vaddr: u64,
        offset: u64,
        file_size: u64,
        mem_size: u64,
        align: u64,
    ) -> Self {
        Self {
            kind,
            flags,
            vaddr,
            offset,
            file_size,
            mem_size,
            align,
            auto_place: false,
        }
    }

    /// `PT_*` type code.
    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    pub fn file_offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn mem_size(&self) -> u64 {
        self.mem_size
    }

    pub fn align(&self) -> u64 {
        self.align
    }

    /// Whether `addr` lies in `[vaddr, vaddr + mem_size)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr - self.vaddr < self.mem_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_is_half_open() {
        let seg = Segment::parsed(1, 0, 0x1000, 0, 0x10, 0x20, 16);
        assert!(!seg.contains(0xfff));
        assert!(seg.contains(0x1000));
        assert!(seg.contains(0x101f));
        assert!(!seg.contains(0x1020));
        let empty = Segment::parsed(1, 0, 0x1000, 0, 0, 0, 16);
        assert!(!empty.contains(0x1000));
    }
}
