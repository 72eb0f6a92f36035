//! Compile-time configuration of the subsystem.

/// Limits applied when parsing executables.
pub mod loader {
    /// The maximum number of program headers an executable may declare.
    ///
    /// Anything above this is assumed to be a malformed file.
    pub const MAX_PROGRAM_HEADERS: usize = 1024;
}

/// Limits applied to processes.
pub mod process {
    use ember_sys_common::PAGE_SIZE;

    /// The maximum length of a command line, in bytes.
    ///
    /// Longer command lines are truncated when they are copied into the kernel.
    pub const MAX_COMMAND_LINE: usize = PAGE_SIZE as usize;

    /// The maximum number of arguments passed to a program.
    pub const MAX_ARGS: usize = 128;

    /// The greatest handle a process can be given.
    ///
    /// Handles are never reused, so a process that opened this many files cannot open more.
    pub const MAX_HANDLES: u32 = i32::MAX as u32;
}

/// Limits applied to system call arguments.
pub mod syscall {
    use ember_sys_common::PAGE_SIZE;

    /// The maximum length of a file name read from user memory, terminator excluded.
    pub const MAX_PATH: usize = 512;

    /// The size of the kernel buffer used to move data between user memory and files.
    pub const IO_CHUNK: usize = PAGE_SIZE as usize;
}
