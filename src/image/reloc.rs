//! Relocation tables.

/// One `Elf_Rela` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset within the target section.
    pub offset: u64,
    /// Machine-specific relocation type.
    pub r_type: u32,
    /// Index into the bound symbol table.
    pub symbol: u32,
    pub addend: i64,
}

/// The records of a relocation section. The target section is the
/// section's `sh_info`, the symbol table its `sh_link`.
#[derive(Debug, Clone, Default)]
pub struct RelocationTable {
    relocations: Vec<Relocation>,
}

impl RelocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_relocations(relocations: Vec<Relocation>) -> Self {
        Self { relocations }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations.iter()
    }

    pub fn as_slice(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn len(&self) -> usize {
        self.relocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }

    pub(crate) fn push(&mut self, relocation: Relocation) {
        self.relocations.push(relocation);
    }

    /// Rewrites symbol indices after the bound symbol table was reordered.
    /// `new_index[old]` is the new position of symbol `old`.
    pub(crate) fn remap_symbols(&mut self, new_index: &[usize]) {
        for rel in &mut self.relocations {
            if let Some(&index) = new_index.get(rel.symbol as usize) {
                rel.symbol = index as u32;
            }
        }
    }
}
