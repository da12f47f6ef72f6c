//! String tables.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::read_cstr;

/// A table of NUL-terminated strings. Offset 0 is always the empty string.
#[derive(Debug, Clone)]
pub struct StringTable {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Wraps the contents of a loaded string table section.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.first().is_some_and(|&b| b != 0) {
            return Err(Error::format("string table does not start with an empty string"));
        }
        Ok(Self {
            data,
            offsets: HashMap::new(),
        })
    }

    /// Interns `s` and returns its offset. Repeated strings share one entry.
    pub fn add(&mut self, s: &str) -> Result<u32> {
        if s.is_empty() {
            if self.data.is_empty() {
                self.data.push(0);
            }
            return Ok(0);
        }
        if s.as_bytes().contains(&0) {
            return Err(Error::format(format!("string {s:?} contains a NUL byte")));
        }
        if let Some(&offset) = self.offsets.get(s) {
            return Ok(offset);
        }
        let offset = u32::try_from(self.data.len()).map_err(|_| Error::Overflow(self.data.len() as u64))?;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_string(), offset);
        Ok(offset)
    }

    /// Returns the string at `offset`, or `None` if it is out of range.
    pub fn get(&self, offset: u32) -> Option<&str> {
        if offset == 0 && self.data.is_empty() {
            return Some("");
        }
        read_cstr(&self.data, offset as usize)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_zero_is_empty() {
        let mut t = StringTable::new();
        assert_eq!(t.get(0), Some(""));
        assert_eq!(t.add("").unwrap(), 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn interning_deduplicates() {
        let mut t = StringTable::new();
        let a = t.add(".text").unwrap();
        let b = t.add(".data").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 7);
        assert_eq!(t.add(".text").unwrap(), a);
        assert_eq!(t.get(b), Some(".data"));
        assert_eq!(t.as_bytes(), b"\0.text\0.data\0");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(StringTable::from_bytes(b"x\0".to_vec()).is_err());
        let mut t = StringTable::new();
        assert!(t.add("a\0b").is_err());
        assert_eq!(t.get(100), None);
    }
}
