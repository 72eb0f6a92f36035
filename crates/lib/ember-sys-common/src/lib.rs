//! This libraries defines the types and constants shared between the kernel and userland.
//!
//! User programs are 32-bit: every pointer, system call argument and return value is one
//! 4-byte word.

#![no_std]

use core::num::NonZeroU32;

mod syscall;

pub use self::syscall::*;

/// The size of a page, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// The first address that belongs to the kernel.
///
/// Every user-accessible address is strictly below this boundary. The initial user stack page
/// ends right there.
pub const USER_TOP: u32 = 0xC000_0000;

/// The system call interrupt vector.
pub const SYSCALL_VECTOR: u8 = 0x30;

/// A unique identifier for a process in the system.
///
/// This is the identifier of the thread that runs the process.
pub type Pid = NonZeroU32;

/// A small integer naming an open file within one process.
pub type Handle = u32;

/// The handle reading from the console keyboard. Never stored in a process' file table.
pub const STDIN: Handle = 0;
/// The handle writing to the console. Never stored in a process' file table.
pub const STDOUT: Handle = 1;

/// The status reported for a process terminated by the kernel.
///
/// A program may also exit with this value on its own; the kernel tracks the two cases
/// separately, but waiters observe the same number.
pub const KILLED_STATUS: i32 = -1;

/// The word returned to user code by a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use = "this `SysResult` may be an error, which should be handled"]
#[repr(transparent)]
pub struct SysResult(pub u32);

impl SysResult {
    /// The sentinel returned by `exec`, `wait`, `open`, `filesize`, `read` and `tell` on failure.
    pub const ERROR: Self = Self::from_i32(-1);

    /// The result of a successful system call that has nothing to report.
    pub const NONE: Self = Self(0);

    /// Encodes a signed value.
    #[inline(always)]
    pub const fn from_i32(value: i32) -> Self {
        Self(value as u32)
    }

    /// Encodes a boolean as `1` or `0`.
    #[inline(always)]
    pub const fn from_bool(value: bool) -> Self {
        Self(value as u32)
    }

    /// Returns the value as a signed integer, the way user programs see it.
    #[inline(always)]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Returns whether this is the [`SysResult::ERROR`] sentinel.
    #[inline(always)]
    pub const fn is_error(self) -> bool {
        self.0 == Self::ERROR.0
    }
}

impl From<Pid> for SysResult {
    #[inline(always)]
    fn from(pid: Pid) -> Self {
        Self(pid.get())
    }
}
