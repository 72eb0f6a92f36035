//! The services the subsystem consumes from the rest of the kernel.
//!
//! The embedding kernel implements these traits on top of its scheduler, its page tables, its
//! file system and its console driver, then bundles them in a [`Platform`].

use alloc::boxed::Box;
use core::ops::DerefMut;

use ember_sys_common::{Pid, PAGE_SIZE};

/// The content of a single page of memory.
pub type Page = [u8; PAGE_SIZE as usize];

/// The register state a thread enters user mode with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    /// The instruction pointer (the entry point of the program).
    pub eip: u32,
    /// The user stack pointer.
    pub esp: u32,
}

/// The function a new thread runs in kernel mode.
///
/// When it returns a [`UserContext`], the thread drops to user mode with that state. When it
/// returns `None`, the thread exits.
pub type ThreadEntry = Box<dyn FnOnce() -> Option<UserContext> + Send + 'static>;

/// The thread scheduler.
pub trait Threads: Send + Sync {
    /// Returns the identifier of the running thread.
    fn current(&self) -> Pid;

    /// Creates a new thread named `name`, which will run `entry`.
    ///
    /// Returns `None` if the thread could not be created. In that case, `entry` is dropped
    /// without being called.
    fn create_thread(&self, name: &str, entry: ThreadEntry) -> Option<Pid>;

    /// Blocks the current thread until it is woken up by [`Threads::unblock`].
    ///
    /// Wake-ups are not lost: if `unblock` was called for the current thread since it last
    /// blocked, this function returns immediately.
    fn block_current(&self);

    /// Wakes `thread` up.
    fn unblock(&self, thread: Pid);

    /// Terminates the current thread.
    fn exit_current(&self) -> !;

    /// Records the page directory the current thread runs with. `None` means the kernel-only
    /// address space.
    ///
    /// The scheduler keeps this value with the thread, and it must be readable from the context
    /// switch path without taking any lock.
    fn set_page_directory(&self, page_directory: Option<u32>);

    /// Returns the value last given to [`Threads::set_page_directory`] by the current thread.
    fn page_directory(&self) -> Option<u32>;
}

/// Page tables and the physical page allocator.
pub trait AddressSpaces: Send + Sync {
    /// An address space, owning every frame mapped into it.
    type Space: Send;
    /// An allocated physical page.
    type Frame: DerefMut<Target = Page> + Send;

    /// Creates an empty address space, in which only the kernel is mapped.
    fn create(&self) -> Option<Self::Space>;

    /// Returns the physical address of the page directory of `space`.
    fn page_directory(&self, space: &Self::Space) -> u32;

    /// Loads `page_directory` in the CPU, as returned by [`AddressSpaces::page_directory`].
    ///
    /// `None` activates the kernel-only address space.
    fn activate(&self, page_directory: Option<u32>);

    /// Destroys `space`, freeing every frame mapped into it.
    ///
    /// `space` must not be active.
    fn destroy(&self, space: Self::Space);

    /// Allocates a physical page, optionally filled with zeros.
    fn alloc_frame(&self, zeroed: bool) -> Option<Self::Frame>;

    /// Frees a physical page that was never mapped.
    fn free_frame(&self, frame: Self::Frame);

    /// Maps `frame` at the page-aligned user address `upage`.
    ///
    /// On failure, the frame is given back to the caller.
    fn map_page(
        &self,
        space: &mut Self::Space,
        upage: u32,
        frame: Self::Frame,
        writable: bool,
    ) -> Result<(), Self::Frame>;

    /// Returns the page that contains `addr`, if it is mapped.
    fn translate<'a>(&self, space: &'a Self::Space, addr: u32) -> Option<&'a Page>;

    /// Returns the page that contains `addr`, if it is mapped and writable.
    fn translate_mut<'a>(&self, space: &'a mut Self::Space, addr: u32) -> Option<&'a mut Page>;
}

/// The file system.
///
/// Implementations need not be reentrant: the subsystem serializes every call through a single
/// lock.
pub trait FileSystem: Send {
    /// An open file.
    type File: Send;

    /// Opens the file named `name`.
    fn open(&mut self, name: &str) -> Option<Self::File>;
    /// Creates a file named `name`, `size` bytes long.
    fn create(&mut self, name: &str, size: u32) -> bool;
    /// Deletes the file named `name`.
    fn remove(&mut self, name: &str) -> bool;
    /// Reads from the current position of `file`, returning the number of bytes read.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> usize;
    /// Writes at the current position of `file`, returning the number of bytes written.
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> usize;
    /// Moves the position of `file`.
    fn seek(&mut self, file: &mut Self::File, position: u32);
    /// Returns the position of `file`.
    fn tell(&mut self, file: &Self::File) -> u32;
    /// Returns the size of `file`, in bytes.
    fn length(&mut self, file: &Self::File) -> u32;
    /// Closes `file`.
    fn close(&mut self, file: Self::File);
}

/// The console device.
pub trait Console: Send + Sync {
    /// Reads a byte from the keyboard, waiting for one if needed.
    fn read_byte(&self) -> u8;
    /// Writes `bytes` to the screen.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Everything the subsystem needs from the kernel.
pub trait Platform: Send + Sync + 'static {
    /// The scheduler.
    type Threads: Threads;
    /// The memory manager.
    type Memory: AddressSpaces;
    /// The file system.
    type Fs: FileSystem;
    /// The console.
    type Console: Console;

    /// Returns the scheduler.
    fn threads(&self) -> &Self::Threads;
    /// Returns the memory manager.
    fn memory(&self) -> &Self::Memory;
    /// Returns the console.
    fn console(&self) -> &Self::Console;

    /// Powers the machine off.
    fn power_off(&self) -> !;
}

/// The address space type of a [`Platform`].
pub type SpaceOf<P> = <<P as Platform>::Memory as AddressSpaces>::Space;

/// The frame type of a [`Platform`].
pub type FrameOf<P> = <<P as Platform>::Memory as AddressSpaces>::Frame;

/// The open file type of a [`Platform`].
pub type FileOf<P> = <<P as Platform>::Fs as FileSystem>::File;
