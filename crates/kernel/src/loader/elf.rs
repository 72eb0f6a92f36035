//! Definitions of the ELF32 structures used by i386 executables.
//!
//! Every multi-byte field is little endian.

use bitflags::bitflags;

use super::LoadError;

/// The size of the `e_ident` field, in bytes.
const EI_NIDENT: usize = 16;

/// The expected start of the `e_ident` field: the four magic bytes, followed by `ELFCLASS32`,
/// `ELFDATA2LSB` and `EV_CURRENT`.
const ELF_IDENT: [u8; 7] = [0x7F, b'E', b'L', b'F', 1, 1, 1];

/// A value of the `e_type` field indicating that the file is an executable (opposed to a
/// shared object, for example).
const ET_EXEC: u16 = 2;
/// A value of the `e_machine` field indicating that the file targets the Intel 80386.
const EM_386: u16 = 3;
/// The only defined version of the ELF format.
const EV_CURRENT: u32 = 1;

/// The size of the file header, in bytes.
pub const EHDR_SIZE: usize = 52;
/// The size of a program header, in bytes.
pub const PHDR_SIZE: usize = 32;

#[inline(always)]
fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline(always)]
fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// The header of a 32-bit ELF file.
///
/// Only the fields the loader uses are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    /// The virtual address of the entry point.
    pub entry: u32,
    /// The offset of the program header table within the file.
    pub phoff: u32,
    /// The number of entries in the program header table.
    pub phnum: u16,
}

impl ElfHeader {
    /// Parses and validates the header of an executable.
    ///
    /// This checks that:
    ///
    /// 1. The file is a 32-bit, little endian ELF file of the current version.
    /// 2. It is an executable for the i386 architecture.
    /// 3. Its program headers have the expected size, and there aren't too many of them.
    pub fn parse(bytes: &[u8; EHDR_SIZE]) -> Result<Self, LoadError> {
        if bytes[..ELF_IDENT.len()] != ELF_IDENT {
            return Err(LoadError::InvalidHeader);
        }

        let e_type = u16_at(bytes, EI_NIDENT);
        let e_machine = u16_at(bytes, EI_NIDENT + 2);
        let e_version = u32_at(bytes, EI_NIDENT + 4);

        if e_type != ET_EXEC || e_machine != EM_386 || e_version != EV_CURRENT {
            return Err(LoadError::Unsupported);
        }

        let e_phentsize = u16_at(bytes, 42);
        let e_phnum = u16_at(bytes, 44);

        if e_phentsize as usize != PHDR_SIZE
            || e_phnum as usize > crate::config::loader::MAX_PROGRAM_HEADERS
        {
            return Err(LoadError::InvalidHeader);
        }

        Ok(Self {
            entry: u32_at(bytes, 24),
            phoff: u32_at(bytes, 28),
            phnum: e_phnum,
        })
    }
}

/// The kind of a segment, as found in the `p_type` field of a program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// An unused entry.
    Null,
    /// A segment to be loaded in memory.
    Load,
    /// Dynamic linking information.
    Dynamic,
    /// The path of a program interpreter.
    Interp,
    /// Auxiliary information.
    Note,
    /// Reserved.
    Shlib,
    /// The program header table itself.
    Phdr,
    /// A hint about the permissions of the stack (`PT_GNU_STACK`).
    Stack,
    /// Anything else.
    Other(u32),
}

impl SegmentKind {
    /// Decodes the `p_type` field of a program header.
    pub const fn from_u32(p_type: u32) -> Self {
        match p_type {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interp,
            4 => Self::Note,
            5 => Self::Shlib,
            6 => Self::Phdr,
            0x6474_E551 => Self::Stack,
            other => Self::Other(other),
        }
    }
}

bitflags! {
    /// The permissions of a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// The segment contains code.
        const EXECUTE = 1 << 0;
        /// The segment may be written to.
        const WRITE = 1 << 1;
        /// The segment may be read from.
        const READ = 1 << 2;
    }
}

/// An entry of the program header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// The type of the segment.
    pub kind: SegmentKind,
    /// The offset of the segment's first byte in the file.
    pub offset: u32,
    /// The user address the segment is loaded at.
    pub vaddr: u32,
    /// The number of bytes read from the file.
    pub filesz: u32,
    /// The size of the segment in memory. Bytes past `filesz` are zeroed.
    pub memsz: u32,
    /// The permissions of the segment.
    pub flags: SegmentFlags,
}

impl ProgramHeader {
    /// Decodes a program header.
    pub fn parse(bytes: &[u8; PHDR_SIZE]) -> Self {
        Self {
            kind: SegmentKind::from_u32(u32_at(bytes, 0)),
            offset: u32_at(bytes, 4),
            vaddr: u32_at(bytes, 8),
            filesz: u32_at(bytes, 16),
            memsz: u32_at(bytes, 20),
            flags: SegmentFlags::from_bits_truncate(u32_at(bytes, 24)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ElfBuilder;

    fn header_of(image: &[u8]) -> [u8; EHDR_SIZE] {
        let mut bytes = [0; EHDR_SIZE];
        bytes.copy_from_slice(&image[..EHDR_SIZE]);
        bytes
    }

    #[test]
    fn parses_a_valid_header() {
        let image = ElfBuilder::new(0x0804_8000)
            .segment(0x0804_8000, b"code", 4, SegmentFlags::READ | SegmentFlags::EXECUTE)
            .build();
        let header = ElfHeader::parse(&header_of(&image)).unwrap();
        assert_eq!(header.entry, 0x0804_8000);
        assert_eq!(header.phnum, 1);
        assert_eq!(header.phoff as usize, EHDR_SIZE);
    }

    #[test]
    fn rejects_bad_identification() {
        let image = ElfBuilder::new(0x0804_8000).build();

        let mut magic = header_of(&image);
        magic[1] = b'X';
        assert_eq!(ElfHeader::parse(&magic), Err(LoadError::InvalidHeader));

        let mut class64 = header_of(&image);
        class64[4] = 2;
        assert_eq!(ElfHeader::parse(&class64), Err(LoadError::InvalidHeader));
    }

    #[test]
    fn rejects_other_machines_and_types() {
        let image = ElfBuilder::new(0x0804_8000).build();

        let mut shared = header_of(&image);
        shared[16] = 3; // ET_DYN
        assert_eq!(ElfHeader::parse(&shared), Err(LoadError::Unsupported));

        let mut x86_64 = header_of(&image);
        x86_64[18] = 0x3E;
        assert_eq!(ElfHeader::parse(&x86_64), Err(LoadError::Unsupported));
    }

    #[test]
    fn rejects_absurd_program_header_tables() {
        let image = ElfBuilder::new(0x0804_8000).build();

        let mut too_many = header_of(&image);
        too_many[44..46].copy_from_slice(&1025u16.to_le_bytes());
        assert_eq!(ElfHeader::parse(&too_many), Err(LoadError::InvalidHeader));

        let mut wrong_size = header_of(&image);
        wrong_size[42..44].copy_from_slice(&56u16.to_le_bytes());
        assert_eq!(ElfHeader::parse(&wrong_size), Err(LoadError::InvalidHeader));
    }

    #[test]
    fn decodes_segment_kinds() {
        assert_eq!(SegmentKind::from_u32(1), SegmentKind::Load);
        assert_eq!(SegmentKind::from_u32(0x6474_E551), SegmentKind::Stack);
        assert_eq!(SegmentKind::from_u32(0x7000_0000), SegmentKind::Other(0x7000_0000));
    }
}
