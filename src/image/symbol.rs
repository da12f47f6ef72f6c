//! Symbol table management.
//!
//! Symbols store only an offset into the linked string table and a raw
//! section index; names and sections are resolved through the owning
//! [`Image`](super::Image).

use object::elf;
use object::read::SectionIndex;

use super::strtab::StringTable;

/// One symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Symbol {
    /// Offset of the name in the linked string table.
    pub name: u32,
    /// Offset within the containing section (alignment for common symbols).
    pub value: u64,
    pub size: u64,
    /// `STT_*` type code.
    pub kind: u8,
    /// `STB_*` binding.
    pub binding: u8,
    pub other: u8,
    /// Raw `st_shndx`.
    pub shndx: u16,
}

impl Symbol {
    pub fn new(name: u32, value: u64, size: u64, kind: u8, binding: u8, shndx: u16) -> Self {
        Self {
            name,
            value,
            size,
            kind,
            binding,
            other: 0,
            shndx,
        }
    }

    /// Packed `st_info`.
    pub fn info(&self) -> u8 {
        (self.binding << 4) | (self.kind & 0xf)
    }

    pub(crate) fn from_info(name: u32, info: u8, other: u8, shndx: u16, value: u64, size: u64) -> Self {
        Self {
            name,
            value,
            size,
            kind: info & 0xf,
            binding: info >> 4,
            other,
            shndx,
        }
    }

    /// The containing section, if the symbol is defined in one.
    pub fn section_index(&self) -> Option<SectionIndex> {
        if self.shndx == elf::SHN_UNDEF || self.shndx >= elf::SHN_LORESERVE {
            None
        } else {
            Some(SectionIndex(self.shndx as usize))
        }
    }

    pub fn is_global(&self) -> bool {
        self.binding == elf::STB_GLOBAL
    }

    pub fn is_local(&self) -> bool {
        self.binding == elf::STB_LOCAL
    }

    pub fn is_common(&self) -> bool {
        self.kind == elf::STT_COMMON
    }
}

/// The ordered records of a symbol table section. Index 0 is the null symbol.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: vec![Symbol::default()],
        }
    }

    pub(crate) fn from_symbols(symbols: Vec<Symbol>) -> Self {
        Self { symbols }
    }

    pub fn get(&self, index: usize) -> Option<&Symbol> {
        self.symbols.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn as_slice(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Index of the first symbol named `name`, resolving names through `strings`.
    pub fn find(&self, strings: &StringTable, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .skip(1)
            .position(|s| strings.get(s.name) == Some(name))
            .map(|i| i + 1)
    }

    /// Moves local symbols ahead of all others, keeping relative order, and
    /// returns the new index of every old index. The null symbol stays first.
    pub(crate) fn order_locals_first(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.symbols.len()).collect();
        order.sort_by_key(|&i| i != 0 && !self.symbols[i].is_local());
        let mut new_index = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        self.symbols = order.iter().map(|&i| self.symbols[i]).collect();
        new_index
    }

    /// One past the index of the last local symbol (`sh_info` of the table).
    pub fn first_global(&self) -> usize {
        self.symbols
            .iter()
            .rposition(Symbol::is_local)
            .map_or(0, |i| i + 1)
    }

    pub(crate) fn push(&mut self, symbol: Symbol) -> usize {
        self.symbols.push(symbol);
        self.symbols.len() - 1
    }
}
