//! Typed `AMD` notes.
//!
//! Five note kinds describe a code object: its format version, the HSAIL
//! source properties, the target ISA, the producer and the producer's
//! options. Each getter returns `Ok(None)` when the note is absent and a
//! format error when it is present but malformed.

use std::fmt;

use object::pod::{self, Pod};

use super::CodeObject;
use crate::amdgpu::{
    NOTE_OWNER, NT_AMDGPU_HSA_CODE_OBJECT_VERSION, NT_AMDGPU_HSA_HSAIL, NT_AMDGPU_HSA_ISA, NT_AMDGPU_HSA_PRODUCER,
    NT_AMDGPU_HSA_PRODUCER_OPTIONS,
};
use crate::error::{Error, Result};
use crate::utils::{U16Le, U32Le, LE};

#[derive(Clone, Copy)]
#[repr(C)]
struct RawVersion {
    major: U32Le,
    minor: U32Le,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct RawHsail {
    major: U32Le,
    minor: U32Le,
    profile: u8,
    machine_model: u8,
    default_float_round: u8,
    reserved: u8,
}

/// Fixed part of the ISA note; vendor and architecture strings follow.
#[derive(Clone, Copy)]
#[repr(C)]
struct RawIsa {
    vendor_size: U16Le,
    architecture_size: U16Le,
    major: U32Le,
    minor: U32Le,
    stepping: U32Le,
}

/// Fixed part of the producer note; the name follows.
#[derive(Clone, Copy)]
#[repr(C)]
struct RawProducer {
    name_size: U16Le,
    reserved: U16Le,
    major: U32Le,
    minor: U32Le,
}

// SAFETY: `repr(C)` structs of byte-array fields, without padding.
unsafe impl Pod for RawVersion {}
unsafe impl Pod for RawHsail {}
unsafe impl Pod for RawIsa {}
unsafe impl Pod for RawProducer {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeObjectVersion {
    pub major: u32,
    pub minor: u32,
}

impl CodeObjectVersion {
    fn encode(&self) -> Vec<u8> {
        let raw = RawVersion {
            major: U32Le::new(LE, self.major),
            minor: U32Le::new(LE, self.minor),
        };
        pod::bytes_of(&raw).to_vec()
    }

    fn decode(desc: &[u8]) -> Result<Self> {
        let (raw, _) = fixed_part::<RawVersion>(desc, "version")?;
        Ok(Self {
            major: raw.major.get(LE),
            minor: raw.minor.get(LE),
        })
    }
}

impl fmt::Display for CodeObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Properties of the HSAIL source the code was finalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsailNote {
    pub major: u32,
    pub minor: u32,
    pub profile: u8,
    pub machine_model: u8,
    pub default_float_round: u8,
}

impl HsailNote {
    fn encode(&self) -> Vec<u8> {
        let raw = RawHsail {
            major: U32Le::new(LE, self.major),
            minor: U32Le::new(LE, self.minor),
            profile: self.profile,
            machine_model: self.machine_model,
            default_float_round: self.default_float_round,
            reserved: 0,
        };
        pod::bytes_of(&raw).to_vec()
    }

    fn decode(desc: &[u8]) -> Result<Self> {
        let (raw, _) = fixed_part::<RawHsail>(desc, "HSAIL")?;
        Ok(Self {
            major: raw.major.get(LE),
            minor: raw.minor.get(LE),
            profile: raw.profile,
            machine_model: raw.machine_model,
            default_float_round: raw.default_float_round,
        })
    }
}

/// Target instruction set. Displays as `vendor:arch:major:minor:stepping`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsaNote {
    pub vendor: String,
    pub architecture: String,
    pub major: u32,
    pub minor: u32,
    pub stepping: u32,
}

impl IsaNote {
    fn encode(&self) -> Result<Vec<u8>> {
        let vendor_size = string_size(&self.vendor)?;
        let arch_size = string_size(&self.architecture)?;
        let raw = RawIsa {
            vendor_size: U16Le::new(LE, vendor_size),
            architecture_size: U16Le::new(LE, arch_size),
            major: U32Le::new(LE, self.major),
            minor: U32Le::new(LE, self.minor),
            stepping: U32Le::new(LE, self.stepping),
        };
        let mut desc = pod::bytes_of(&raw).to_vec();
        push_cstr(&mut desc, &self.vendor);
        push_cstr(&mut desc, &self.architecture);
        Ok(desc)
    }

    fn decode(desc: &[u8]) -> Result<Self> {
        let (raw, strings) = fixed_part::<RawIsa>(desc, "ISA")?;
        let vendor_size = usize::from(raw.vendor_size.get(LE));
        let arch_size = usize::from(raw.architecture_size.get(LE));
        Ok(Self {
            vendor: sized_str(strings, 0, vendor_size, "ISA vendor")?,
            architecture: sized_str(strings, vendor_size, arch_size, "ISA architecture")?,
            major: raw.major.get(LE),
            minor: raw.minor.get(LE),
            stepping: raw.stepping.get(LE),
        })
    }
}

impl fmt::Display for IsaNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.vendor, self.architecture, self.major, self.minor, self.stepping
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerNote {
    pub major: u32,
    pub minor: u32,
    pub name: String,
}

impl ProducerNote {
    fn encode(&self) -> Result<Vec<u8>> {
        let name_size = string_size(&self.name)?;
        let raw = RawProducer {
            name_size: U16Le::new(LE, name_size),
            reserved: U16Le::new(LE, 0),
            major: U32Le::new(LE, self.major),
            minor: U32Le::new(LE, self.minor),
        };
        let mut desc = pod::bytes_of(&raw).to_vec();
        push_cstr(&mut desc, &self.name);
        Ok(desc)
    }

    fn decode(desc: &[u8]) -> Result<Self> {
        let (raw, name) = fixed_part::<RawProducer>(desc, "producer")?;
        Ok(Self {
            major: raw.major.get(LE),
            minor: raw.minor.get(LE),
            name: sized_str(name, 0, usize::from(raw.name_size.get(LE)), "producer name")?,
        })
    }
}

fn encode_options(options: &str) -> Result<Vec<u8>> {
    let size = string_size(options)?;
    let mut desc = pod::bytes_of(&U16Le::new(LE, size)).to_vec();
    push_cstr(&mut desc, options);
    Ok(desc)
}

fn decode_options(desc: &[u8]) -> Result<String> {
    let (size, options) = fixed_part::<U16Le>(desc, "producer options")?;
    sized_str(options, 0, usize::from(size.get(LE)), "producer options")
}

/// Splits a descriptor into its fixed header and the trailing bytes.
fn fixed_part<'a, T: Pod>(desc: &'a [u8], what: &str) -> Result<(&'a T, &'a [u8])> {
    pod::from_bytes::<T>(desc).map_err(|()| {
        Error::format(format!(
            "{what} note is {} bytes, expected at least {}",
            desc.len(),
            std::mem::size_of::<T>()
        ))
    })
}

/// Encoded size of a string including its NUL.
fn string_size(s: &str) -> Result<u16> {
    if s.as_bytes().contains(&0) {
        return Err(Error::InvalidArgument(format!("note string {s:?} contains a NUL byte")));
    }
    u16::try_from(s.len() + 1).map_err(|_| Error::InvalidArgument(format!("note string of {} bytes is too long", s.len())))
}

fn push_cstr(desc: &mut Vec<u8>, s: &str) {
    desc.extend_from_slice(s.as_bytes());
    desc.push(0);
}

/// Reads a string of `size` bytes (NUL included) at `offset`.
fn sized_str(desc: &[u8], offset: usize, size: usize, what: &str) -> Result<String> {
    let bytes = desc.get(offset..offset + size).ok_or_else(|| {
        Error::format(format!(
            "{what}: {size} bytes at offset {offset} exceed note of {} bytes",
            desc.len()
        ))
    })?;
    let text = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    std::str::from_utf8(text)
        .map(str::to_string)
        .map_err(|_| Error::format(format!("{what} is not valid UTF-8")))
}

impl CodeObject<'_, '_> {
    fn add_amd_note(&mut self, n_type: u32, desc: &[u8]) -> Result<()> {
        self.image_mut().add_note(NOTE_OWNER, n_type, desc)
    }

    fn amd_note(&self, n_type: u32) -> Option<&[u8]> {
        self.image().find_note(NOTE_OWNER, n_type)
    }

    pub fn add_note_version(&mut self, major: u32, minor: u32) -> Result<()> {
        let desc = CodeObjectVersion { major, minor }.encode();
        self.add_amd_note(NT_AMDGPU_HSA_CODE_OBJECT_VERSION, &desc)
    }

    pub fn note_version(&self) -> Result<Option<CodeObjectVersion>> {
        self.amd_note(NT_AMDGPU_HSA_CODE_OBJECT_VERSION)
            .map(CodeObjectVersion::decode)
            .transpose()
    }

    pub fn add_note_hsail(&mut self, note: &HsailNote) -> Result<()> {
        self.add_amd_note(NT_AMDGPU_HSA_HSAIL, &note.encode())
    }

    pub fn note_hsail(&self) -> Result<Option<HsailNote>> {
        self.amd_note(NT_AMDGPU_HSA_HSAIL).map(HsailNote::decode).transpose()
    }

    pub fn add_note_isa(&mut self, note: &IsaNote) -> Result<()> {
        let desc = note.encode()?;
        self.add_amd_note(NT_AMDGPU_HSA_ISA, &desc)
    }

    pub fn note_isa(&self) -> Result<Option<IsaNote>> {
        self.amd_note(NT_AMDGPU_HSA_ISA).map(IsaNote::decode).transpose()
    }

    pub fn add_note_producer(&mut self, note: &ProducerNote) -> Result<()> {
        let desc = note.encode()?;
        self.add_amd_note(NT_AMDGPU_HSA_PRODUCER, &desc)
    }

    pub fn note_producer(&self) -> Result<Option<ProducerNote>> {
        self.amd_note(NT_AMDGPU_HSA_PRODUCER).map(ProducerNote::decode).transpose()
    }

    pub fn add_note_producer_options(&mut self, options: &str) -> Result<()> {
        let desc = encode_options(options)?;
        self.add_amd_note(NT_AMDGPU_HSA_PRODUCER_OPTIONS, &desc)
    }

    pub fn note_producer_options(&self) -> Result<Option<String>> {
        self.amd_note(NT_AMDGPU_HSA_PRODUCER_OPTIONS)
            .map(decode_options)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_layout() {
        let isa = IsaNote {
            vendor: "AMD".into(),
            architecture: "AMDGPU".into(),
            major: 8,
            minor: 0,
            stepping: 3,
        };
        let desc = isa.encode().unwrap();
        assert_eq!(&desc[..4], &[4, 0, 7, 0]);
        assert_eq!(&desc[16..], b"AMD\0AMDGPU\0");
        let back = IsaNote::decode(&desc).unwrap();
        assert_eq!(back.to_string(), "AMD:AMDGPU:8:0:3");
    }

    #[test]
    fn truncated_descriptors_are_format_errors() {
        assert!(matches!(CodeObjectVersion::decode(&[1, 0, 0]), Err(Error::Format(_))));
        assert!(matches!(HsailNote::decode(&[0; 11]), Err(Error::Format(_))));
        assert!(matches!(IsaNote::decode(&[0; 15]), Err(Error::Format(_))));
        assert!(matches!(ProducerNote::decode(&[]), Err(Error::Format(_))));
        assert!(matches!(decode_options(&[3]), Err(Error::Format(_))));

        // vendor size claims more bytes than the note holds
        let mut desc = vec![0u8; 16];
        desc[0] = 40;
        assert!(matches!(IsaNote::decode(&desc), Err(Error::Format(_))));

        let producer = ProducerNote {
            major: 1,
            minor: 2,
            name: "finalizer".into(),
        };
        let desc = producer.encode().unwrap();
        assert!(ProducerNote::decode(&desc[..desc.len() - 2]).is_err());
        assert_eq!(ProducerNote::decode(&desc).unwrap(), producer);
    }

    #[test]
    fn options_and_nul_rejection() {
        let desc = encode_options("-O3 -g").unwrap();
        assert_eq!(desc.len(), 2 + 7);
        assert_eq!(decode_options(&desc).unwrap(), "-O3 -g");
        assert!(matches!(encode_options("a\0b"), Err(Error::InvalidArgument(_))));
    }
}
