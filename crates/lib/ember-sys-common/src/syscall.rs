//! System call numbers.

/// A system call supported by the kernel.
///
/// The disciminant of this enum corresponds to the system call number, which user programs push
/// on their stack before raising the system call interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum SystemCall {
    /// Powers the machine off.
    Halt,
    /// Terminates the calling process with a status.
    Exit,
    /// Starts a new process from a command line.
    Exec,
    /// Waits for a child process to exit.
    Wait,
    /// Creates a file of a given initial size.
    Create,
    /// Deletes a file.
    Remove,
    /// Opens a file and returns a handle for it.
    Open,
    /// Returns the size of an open file.
    Filesize,
    /// Reads from a handle into a buffer.
    Read,
    /// Writes a buffer to a handle.
    Write,
    /// Moves the position of an open file.
    Seek,
    /// Returns the position of an open file.
    Tell,
    /// Closes a handle.
    Close,
}

impl SystemCall {
    /// The number of defined system calls.
    pub const COUNT: u32 = 13;

    /// Creates a new [`SystemCall`] from a system call number.
    ///
    /// # Safety
    ///
    /// This function is unsafe because it does not check that the system call number is valid.
    #[inline(always)]
    pub const unsafe fn from_u32_unchecked(n: u32) -> Self {
        unsafe { core::mem::transmute(n) }
    }

    /// Creates a new [`SystemCall`] from a system call number.
    #[inline(always)]
    pub const fn from_u32(n: u32) -> Option<Self> {
        if n < Self::COUNT {
            Some(unsafe { Self::from_u32_unchecked(n) })
        } else {
            None
        }
    }

    /// Returns the system call number corresponding to this [`SystemCall`].
    #[inline(always)]
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    /// Returns the number of word-sized arguments this system call reads from the user stack.
    pub const fn arity(self) -> usize {
        match self {
            Self::Halt => 0,
            Self::Exit
            | Self::Exec
            | Self::Wait
            | Self::Remove
            | Self::Open
            | Self::Filesize
            | Self::Tell
            | Self::Close => 1,
            Self::Create | Self::Seek => 2,
            Self::Read | Self::Write => 3,
        }
    }

    /// Returns the name of this system call, as a static string.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Halt => "halt",
            Self::Exit => "exit",
            Self::Exec => "exec",
            Self::Wait => "wait",
            Self::Create => "create",
            Self::Remove => "remove",
            Self::Open => "open",
            Self::Filesize => "filesize",
            Self::Read => "read",
            Self::Write => "write",
            Self::Seek => "seek",
            Self::Tell => "tell",
            Self::Close => "close",
        }
    }
}
