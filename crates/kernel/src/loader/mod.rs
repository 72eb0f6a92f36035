//! The executable loader.
//!
//! [`load`] reads an ELF32 executable through the file system and builds a fresh address space
//! containing its segments and an empty stack page.

use core::fmt;

use ember_sys_common::{PAGE_SIZE, USER_TOP};

use crate::platform::{AddressSpaces, FileSystem, Page};

mod elf;

pub use self::elf::*;

/// The bits of an address that select a byte within its page.
const PGMASK: u32 = PAGE_SIZE - 1;

/// The lowest address of the initial stack page.
pub const STACK_PAGE: u32 = USER_TOP - PAGE_SIZE;

/// An error which might occur when loading an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The file is not a valid ELF file.
    InvalidHeader,
    /// The file is a valid ELF file, but not an i386 executable.
    Unsupported,
    /// The file ended before a structure it declares.
    Truncated,
    /// The executable requires dynamic linking.
    DynamicLinking,
    /// A loadable segment has an invalid layout.
    InvalidSegment,
    /// Two segments, or a segment and the stack, claim the same page.
    Overlap,
    /// The entry point is outside of user space.
    InvalidEntryPoint,
    /// The system ran out of memory.
    OutOfMemory,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidHeader => "invalid ELF header",
            Self::Unsupported => "not an i386 executable",
            Self::Truncated => "file is truncated",
            Self::DynamicLinking => "dynamically linked executables are not supported",
            Self::InvalidSegment => "invalid segment",
            Self::Overlap => "overlapping segments",
            Self::InvalidEntryPoint => "invalid entry point",
            Self::OutOfMemory => "out of memory",
        })
    }
}

/// A loaded executable.
#[derive(Debug)]
pub struct Image<S> {
    /// The address of the first instruction.
    pub entry: u32,
    /// The address space, ready to run.
    ///
    /// The stack page spans `STACK_PAGE..USER_TOP` and is filled with zeros.
    pub space: S,
}

/// Loads the executable `file` in a new address space.
///
/// On error, everything allocated along the way is released. The file itself is left open; its
/// position is unspecified.
pub fn load<M, F>(memory: &M, fs: &mut F, file: &mut F::File) -> Result<Image<M::Space>, LoadError>
where
    M: AddressSpaces,
    F: FileSystem,
{
    let mut space = memory.create().ok_or(LoadError::OutOfMemory)?;

    match populate(memory, fs, file, &mut space) {
        Ok(entry) => Ok(Image { entry, space }),
        Err(err) => {
            memory.destroy(space);
            Err(err)
        }
    }
}

/// Maps the segments of `file` and the stack page in `space`, returning the entry point.
fn populate<M, F>(
    memory: &M,
    fs: &mut F,
    file: &mut F::File,
    space: &mut M::Space,
) -> Result<u32, LoadError>
where
    M: AddressSpaces,
    F: FileSystem,
{
    let mut bytes = [0u8; EHDR_SIZE];
    fs.seek(file, 0);
    if fs.read(file, &mut bytes) != EHDR_SIZE {
        return Err(LoadError::InvalidHeader);
    }
    let header = ElfHeader::parse(&bytes)?;

    if header.entry == 0 || header.entry >= USER_TOP {
        return Err(LoadError::InvalidEntryPoint);
    }

    let length = fs.length(file);
    let mut offset = header.phoff;

    for _ in 0..header.phnum {
        if offset > length {
            return Err(LoadError::Truncated);
        }

        let mut bytes = [0u8; PHDR_SIZE];
        fs.seek(file, offset);
        if fs.read(file, &mut bytes) != PHDR_SIZE {
            return Err(LoadError::Truncated);
        }
        offset = offset
            .checked_add(PHDR_SIZE as u32)
            .ok_or(LoadError::Truncated)?;

        let phdr = ProgramHeader::parse(&bytes);
        match phdr.kind {
            SegmentKind::Null
            | SegmentKind::Note
            | SegmentKind::Phdr
            | SegmentKind::Stack
            | SegmentKind::Other(_) => (),
            SegmentKind::Dynamic | SegmentKind::Interp | SegmentKind::Shlib => {
                return Err(LoadError::DynamicLinking);
            }
            SegmentKind::Load => {
                validate_segment(&phdr, length)?;
                load_segment(memory, fs, file, space, &phdr)?;
            }
        }
    }

    let stack = memory.alloc_frame(true).ok_or(LoadError::OutOfMemory)?;
    install_page(memory, space, STACK_PAGE, stack, true)?;

    Ok(header.entry)
}

/// Checks that a loadable segment describes a valid region of both the file and user memory.
fn validate_segment(phdr: &ProgramHeader, file_length: u32) -> Result<(), LoadError> {
    // The file and memory layouts must line up page by page.
    if phdr.offset & PGMASK != phdr.vaddr & PGMASK {
        return Err(LoadError::InvalidSegment);
    }

    if phdr.offset > file_length {
        return Err(LoadError::InvalidSegment);
    }

    if phdr.memsz < phdr.filesz || phdr.memsz == 0 {
        return Err(LoadError::InvalidSegment);
    }

    let end = phdr
        .vaddr
        .checked_add(phdr.memsz)
        .ok_or(LoadError::InvalidSegment)?;
    if phdr.vaddr >= USER_TOP || end >= USER_TOP {
        return Err(LoadError::InvalidSegment);
    }

    // Page 0 stays unmapped so that null pointers always fault.
    if phdr.vaddr < PAGE_SIZE {
        return Err(LoadError::InvalidSegment);
    }

    Ok(())
}

/// Maps the pages of a validated segment.
///
/// Pages which overlap the file-backed part of the segment are read from the file, the rest of
/// the segment is filled with zeros.
fn load_segment<M, F>(
    memory: &M,
    fs: &mut F,
    file: &mut F::File,
    space: &mut M::Space,
    phdr: &ProgramHeader,
) -> Result<(), LoadError>
where
    M: AddressSpaces,
    F: FileSystem,
{
    let page_offset = phdr.vaddr & PGMASK;
    let mut upage = phdr.vaddr & !PGMASK;
    let writable = phdr.flags.contains(SegmentFlags::WRITE);

    let total = round_up(page_offset + phdr.memsz);
    let mut read_bytes = if phdr.filesz > 0 {
        page_offset + phdr.filesz
    } else {
        0
    };
    let mut zero_bytes = total - read_bytes;

    fs.seek(file, phdr.offset & !PGMASK);

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PAGE_SIZE);
        let page_zero = PAGE_SIZE - page_read;

        let mut frame = memory
            .alloc_frame(page_read == 0)
            .ok_or(LoadError::OutOfMemory)?;

        if page_read > 0 {
            let page: &mut Page = &mut frame;
            let (data, rest) = page.split_at_mut(page_read as usize);
            let got = fs.read(file, data);
            rest.fill(0);

            if got != page_read as usize {
                memory.free_frame(frame);
                return Err(LoadError::Truncated);
            }
        }

        install_page(memory, space, upage, frame, writable)?;

        read_bytes -= page_read;
        zero_bytes -= page_zero;
        upage += PAGE_SIZE;
    }

    Ok(())
}

/// Maps `frame` at `upage`, which must not be mapped yet.
///
/// The frame is freed if it cannot be mapped.
fn install_page<M: AddressSpaces>(
    memory: &M,
    space: &mut M::Space,
    upage: u32,
    frame: M::Frame,
    writable: bool,
) -> Result<(), LoadError> {
    if memory.translate(space, upage).is_some() {
        memory.free_frame(frame);
        return Err(LoadError::Overlap);
    }

    memory
        .map_page(space, upage, frame, writable)
        .map_err(|frame| {
            memory.free_frame(frame);
            LoadError::OutOfMemory
        })
}

/// Rounds `n` up to a multiple of the page size.
#[inline(always)]
const fn round_up(n: u32) -> u32 {
    (n + PGMASK) & !PGMASK
}
