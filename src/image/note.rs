//! Note stream codec.
//!
//! Each record is `namesz: u32, descsz: u32, type: u32`, followed by the
//! NUL-terminated owner name and the descriptor, each padded to 4 bytes.
//! Lookups scan records in stream order; a stream holds a handful of notes.

use object::elf;
use object::pod;

use crate::error::{Error, Result};
use crate::utils::{align_up, U32Le, LE};

type NoteHeader = elf::NoteHeader32<object::LittleEndian>;

const NOTE_HEADER_SIZE: usize = std::mem::size_of::<NoteHeader>();
const NOTE_ALIGN: u64 = 4;

/// A borrowed view of one note record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note<'a> {
    pub owner: &'a str,
    pub n_type: u32,
    pub desc: &'a [u8],
}

/// A sequence of note records.
#[derive(Debug, Clone, Default)]
pub struct NoteStream {
    data: Vec<u8>,
}

impl NoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every record of a loaded note section.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut offset = 0;
        while offset < data.len() {
            let (_, next) = read_note(&data, offset)?;
            offset = next;
        }
        Ok(Self { data })
    }

    /// Appends one record.
    pub fn add(&mut self, owner: &str, n_type: u32, desc: &[u8]) -> Result<()> {
        if owner.as_bytes().contains(&0) {
            return Err(Error::format(format!("note owner {owner:?} contains a NUL byte")));
        }
        let namesz = owner.len() + 1;
        let descsz = u32::try_from(desc.len()).map_err(|_| Error::Overflow(desc.len() as u64))?;
        let header = NoteHeader {
            n_namesz: U32Le::new(LE, namesz as u32),
            n_descsz: U32Le::new(LE, descsz),
            n_type: U32Le::new(LE, n_type),
        };
        self.data.extend_from_slice(pod::bytes_of(&header));
        self.data.extend_from_slice(owner.as_bytes());
        self.data.push(0);
        self.pad();
        self.data.extend_from_slice(desc);
        self.pad();
        Ok(())
    }

    /// Returns the descriptor of the first record matching `owner` and `n_type`.
    pub fn find(&self, owner: &str, n_type: u32) -> Option<&[u8]> {
        self.iter()
            .find(|note| note.owner == owner && note.n_type == n_type)
            .map(|note| note.desc)
    }

    pub fn iter(&self) -> NoteIter<'_> {
        NoteIter {
            data: &self.data,
            offset: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn pad(&mut self) {
        let len = align_up(self.data.len() as u64, NOTE_ALIGN) as usize;
        self.data.resize(len, 0);
    }
}

/// Iterator over the records of a [`NoteStream`].
pub struct NoteIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for NoteIter<'a> {
    type Item = Note<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        // Streams are validated on construction; a bad record ends iteration.
        let (note, next) = read_note(self.data, self.offset).ok()?;
        self.offset = next;
        Some(note)
    }
}

fn read_note(data: &[u8], offset: usize) -> Result<(Note<'_>, usize)> {
    let truncated = || Error::format(format!("truncated note record at offset {offset:#x}"));
    let tail = data.get(offset..).ok_or_else(truncated)?;
    let (header, _) = pod::from_bytes::<NoteHeader>(tail).map_err(|()| truncated())?;
    let namesz = header.n_namesz.get(LE) as usize;
    let descsz = header.n_descsz.get(LE) as usize;
    let n_type = header.n_type.get(LE);

    let name_start = offset + NOTE_HEADER_SIZE;
    let desc_start = name_start
        .checked_add(align_up(namesz as u64, NOTE_ALIGN) as usize)
        .ok_or_else(truncated)?;
    let desc_end = desc_start.checked_add(descsz).ok_or_else(truncated)?;
    if desc_end > data.len() {
        return Err(truncated());
    }

    let name = &data[name_start..name_start + namesz];
    let owner = match name.split_last() {
        Some((&0, owner)) => owner,
        None => &[][..],
        Some(_) => {
            return Err(Error::format(format!(
                "note owner at offset {offset:#x} is not NUL-terminated"
            )))
        }
    };
    let owner = std::str::from_utf8(owner)
        .map_err(|_| Error::format(format!("note owner at offset {offset:#x} is not UTF-8")))?;

    let next = (align_up(desc_end as u64, NOTE_ALIGN) as usize).min(data.len());
    Ok((
        Note {
            owner,
            n_type,
            desc: &data[desc_start..desc_end],
        },
        next,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_is_padded() {
        let mut notes = NoteStream::new();
        notes.add("AMD", 1, &[1, 0, 0, 0, 2]).unwrap();
        let bytes = notes.as_bytes();
        // header + "AMD\0" + 5 desc bytes padded to 8
        assert_eq!(bytes.len(), 12 + 4 + 8);
        assert_eq!(&bytes[..12], &[4, 0, 0, 0, 5, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], b"AMD\0");
    }

    #[test]
    fn find_returns_first_match() {
        let mut notes = NoteStream::new();
        notes.add("AMD", 3, b"first").unwrap();
        notes.add("GNU", 3, b"other").unwrap();
        notes.add("AMD", 3, b"second").unwrap();
        assert_eq!(notes.find("AMD", 3), Some(&b"first"[..]));
        assert_eq!(notes.find("GNU", 3), Some(&b"other"[..]));
        assert_eq!(notes.find("AMD", 4), None);
        assert_eq!(notes.iter().count(), 3);
    }

    #[test]
    fn parse_validates_records() {
        let mut notes = NoteStream::new();
        notes.add("AMD", 5, &[7; 6]).unwrap();
        let good = notes.as_bytes().to_vec();
        assert!(NoteStream::parse(good.clone()).is_ok());

        let mut short = good.clone();
        short.truncate(good.len() - 4);
        assert!(NoteStream::parse(short).is_err());

        let mut oversized = good.clone();
        oversized[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert!(NoteStream::parse(oversized).is_err());

        // a second record cut off inside its header
        let mut torn = good;
        torn.extend_from_slice(&[4, 0, 0, 0, 0, 0]);
        assert!(matches!(NoteStream::parse(torn), Err(Error::Format(_))));
    }
}
