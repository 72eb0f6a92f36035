//! Construction of the initial user stack.
//!
//! A new process starts with its command line laid out on its stack, following the i386
//! calling convention for `main(argc, argv)`:
//!
//! ```text
//! High addresses
//!   +---------------+  <- stack top
//!   | arg strings   |  <- last argument first, each NUL-terminated
//!   | padding       |  <- down to a 4-byte boundary
//!   | NULL          |  <- argv terminator
//!   | argv[argc-1]  |
//!   | ...           |
//!   | argv[0]       |
//!   | argv          |  <- address of argv[0]
//!   | argc          |
//!   | 0             |  <- fake return address, the stack pointer points here
//!   +---------------+
//! Low addresses
//! ```
//!
//! Everything must fit in the single stack page mapped by the loader.

use core::fmt;

use ember_sys_common::PAGE_SIZE;

use crate::config::process::MAX_ARGS;
use crate::platform::Page;

/// An error which might occur while building a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The arguments do not fit in the stack page.
    Overflow,
    /// There are more than [`MAX_ARGS`] arguments.
    TooManyArguments,
    /// The stack page is not mapped in the address space.
    Unmapped,
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overflow => "arguments do not fit on the stack",
            Self::TooManyArguments => "too many arguments",
            Self::Unmapped => "stack page not mapped",
        })
    }
}

/// Writes values to a stack page, growing downward.
///
/// Every write is checked against the bounds of the page.
pub struct StackWriter<'a> {
    page: &'a mut Page,
    /// The user address of the first byte of `page`.
    base: u32,
    /// The current stack pointer, as a user address.
    sp: u32,
}

impl<'a> StackWriter<'a> {
    /// Creates a new [`StackWriter`] for the stack page `page`, whose last byte sits right below
    /// `stack_top`.
    pub fn new(page: &'a mut Page, stack_top: u32) -> Self {
        Self {
            page,
            base: stack_top - PAGE_SIZE,
            sp: stack_top,
        }
    }

    /// Returns the current stack pointer.
    #[inline(always)]
    pub fn sp(&self) -> u32 {
        self.sp
    }

    /// Returns the number of bytes that can still be pushed.
    #[inline(always)]
    pub fn remaining(&self) -> u32 {
        self.sp - self.base
    }

    /// Pushes `bytes`, returning their address.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<u32, StackError> {
        let len = u32::try_from(bytes.len()).map_err(|_| StackError::Overflow)?;
        if len > self.remaining() {
            return Err(StackError::Overflow);
        }

        self.sp -= len;
        let at = (self.sp - self.base) as usize;
        self.page[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(self.sp)
    }

    /// Pushes a word, returning its address.
    #[inline]
    pub fn push_word(&mut self, word: u32) -> Result<u32, StackError> {
        self.push_bytes(&word.to_le_bytes())
    }

    /// Pads the stack with zeros until the stack pointer is a multiple of `align`.
    ///
    /// `align` must be a power of two.
    pub fn align(&mut self, align: u32) -> Result<(), StackError> {
        let padding = self.sp & (align - 1);
        if padding > self.remaining() {
            return Err(StackError::Overflow);
        }

        let end = (self.sp - self.base) as usize;
        self.sp -= padding;
        let start = (self.sp - self.base) as usize;
        self.page[start..end].fill(0);
        Ok(())
    }
}

/// Lays out `command_line` on the stack page `page`, which ends at `stack_top`.
///
/// The command line is split on whitespace. Returns the initial stack pointer of the program.
pub fn build_stack(page: &mut Page, stack_top: u32, command_line: &str) -> Result<u32, StackError> {
    let mut stack = StackWriter::new(page, stack_top);

    // Addresses of the arguments, last one first.
    let mut argv = em_array::Vec::<u32, MAX_ARGS>::new();

    for arg in command_line.split_ascii_whitespace().rev() {
        stack.push_bytes(&[0])?;
        let addr = stack.push_bytes(arg.as_bytes())?;
        argv.push(addr).map_err(|_| StackError::TooManyArguments)?;
    }

    stack.align(4)?;

    stack.push_word(0)?;
    for &addr in argv.iter() {
        stack.push_word(addr)?;
    }
    let argv_addr = stack.sp();

    stack.push_word(argv_addr)?;
    stack.push_word(argv.len() as u32)?;
    stack.push_word(0)?;

    Ok(stack.sp())
}
