//! Access to the memory of the calling process.
//!
//! Every address a process hands to the kernel is checked before it is dereferenced: it must be
//! below [`USER_TOP`] and mapped in the address space of the process. Multi-byte accesses check
//! every page they touch.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use ember_sys_common::{PAGE_SIZE, USER_TOP};

use crate::platform::AddressSpaces;

/// The bits of an address that select a byte within its page.
const PGMASK: u32 = PAGE_SIZE - 1;

/// An invalid request made by a user process. The process is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFault {
    /// The address is not in user space.
    KernelAddress(u32),
    /// The address is not mapped.
    Unmapped(u32),
    /// The kernel was asked to write to a read-only page.
    ReadOnly(u32),
    /// The system call number is not defined.
    UnknownSystemCall(u32),
}

impl fmt::Display for UserFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelAddress(addr) => write!(f, "access to kernel address {addr:#x}"),
            Self::Unmapped(addr) => write!(f, "access to unmapped address {addr:#x}"),
            Self::ReadOnly(addr) => write!(f, "write to read-only address {addr:#x}"),
            Self::UnknownSystemCall(n) => write!(f, "unknown system call {n}"),
        }
    }
}

/// An error which might occur when reading a string from user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrError {
    /// The string is not fully accessible.
    Fault(UserFault),
    /// No terminator was found within the allowed length.
    TooLong,
    /// The string is not valid UTF-8.
    InvalidUtf8,
}

impl From<UserFault> for StrError {
    #[inline(always)]
    fn from(fault: UserFault) -> Self {
        Self::Fault(fault)
    }
}

/// The memory of a user process.
pub struct UserMemory<'a, M: AddressSpaces> {
    memory: &'a M,
    space: &'a mut M::Space,
}

impl<'a, M: AddressSpaces> UserMemory<'a, M> {
    /// Creates a view of `space`.
    pub fn new(memory: &'a M, space: &'a mut M::Space) -> Self {
        Self { memory, space }
    }

    /// Returns the last byte of `addr..addr + len`, which must be non-empty.
    fn last_byte(addr: u32, len: u32) -> Result<u32, UserFault> {
        match addr.checked_add(len - 1) {
            Some(last) if last < USER_TOP => Ok(last),
            _ => Err(UserFault::KernelAddress(addr)),
        }
    }

    /// Checks that `addr..addr + len` is readable.
    pub fn check_range(&self, addr: u32, len: u32) -> Result<(), UserFault> {
        if addr >= USER_TOP {
            return Err(UserFault::KernelAddress(addr));
        }
        if len == 0 {
            return Ok(());
        }

        let last = Self::last_byte(addr, len)?;
        let mut page = addr & !PGMASK;
        loop {
            if self.memory.translate(self.space, page).is_none() {
                return Err(UserFault::Unmapped(page.max(addr)));
            }
            if page >= last & !PGMASK {
                return Ok(());
            }
            page += PAGE_SIZE;
        }
    }

    /// Checks that `addr..addr + len` is writable.
    pub fn check_range_mut(&mut self, addr: u32, len: u32) -> Result<(), UserFault> {
        self.check_range(addr, len)?;
        if len == 0 {
            return Ok(());
        }

        let last = Self::last_byte(addr, len)?;
        let mut page = addr & !PGMASK;
        loop {
            if self.memory.translate_mut(self.space, page).is_none() {
                return Err(UserFault::ReadOnly(page.max(addr)));
            }
            if page >= last & !PGMASK {
                return Ok(());
            }
            page += PAGE_SIZE;
        }
    }

    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    pub fn copy_in(&self, addr: u32, buf: &mut [u8]) -> Result<(), UserFault> {
        let len = u32::try_from(buf.len()).map_err(|_| UserFault::KernelAddress(addr))?;
        self.check_range(addr, len)?;

        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u32;
            let offset = (at & PGMASK) as usize;
            let n = (PAGE_SIZE as usize - offset).min(buf.len() - done);
            let page = self
                .memory
                .translate(self.space, at)
                .ok_or(UserFault::Unmapped(at))?;
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
        }

        Ok(())
    }

    /// Copies `data` to `addr`.
    pub fn copy_out(&mut self, addr: u32, data: &[u8]) -> Result<(), UserFault> {
        let len = u32::try_from(data.len()).map_err(|_| UserFault::KernelAddress(addr))?;
        self.check_range_mut(addr, len)?;

        let mut done = 0;
        while done < data.len() {
            let at = addr + done as u32;
            let offset = (at & PGMASK) as usize;
            let n = (PAGE_SIZE as usize - offset).min(data.len() - done);
            let page = self
                .memory
                .translate_mut(self.space, at)
                .ok_or(UserFault::ReadOnly(at))?;
            page[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }

        Ok(())
    }

    /// Reads a little endian word at `addr`.
    pub fn read_u32(&self, addr: u32) -> Result<u32, UserFault> {
        let mut bytes = [0; 4];
        self.copy_in(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads the NUL-terminated string at `addr`, which may be at most `max` bytes long,
    /// terminator excluded.
    ///
    /// Bytes are checked one page at a time, and nothing past the terminator is accessed.
    pub fn read_str(&self, addr: u32, max: usize) -> Result<String, StrError> {
        let mut bytes = Vec::new();
        let mut at = addr;

        loop {
            if at >= USER_TOP {
                return Err(UserFault::KernelAddress(at).into());
            }
            let page = self
                .memory
                .translate(self.space, at)
                .ok_or(UserFault::Unmapped(at))?;

            let offset = (at & PGMASK) as usize;
            for &byte in &page[offset..] {
                if byte == 0 {
                    return String::from_utf8(bytes).map_err(|_| StrError::InvalidUtf8);
                }
                if bytes.len() == max {
                    return Err(StrError::TooLong);
                }
                bytes.push(byte);
            }

            at = (at & !PGMASK) + PAGE_SIZE;
        }
    }
}
