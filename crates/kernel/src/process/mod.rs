//! User processes.
//!
//! Each user process runs on its own kernel thread, and is identified by the identifier of that
//! thread. The [`Userprog`] object keeps a record of every live process and of the children each
//! thread has spawned.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use em_spin::Mutex;
use ember_sys_common::Pid;

use crate::platform::{AddressSpaces, FileOf, Platform, SpaceOf, Threads};
use crate::sync::{SleepLock, SleepLockGuard};

mod files;
mod lifecycle;
mod spawn;


pub use self::files::*;
pub use self::lifecycle::*;
pub use self::spawn::*;

/// A running user process.
pub(crate) struct Process<P: Platform> {
    /// The process that spawned this one. `None` when it was spawned by a kernel thread.
    pub parent: Option<Pid>,
    /// The name of the program.
    pub name: String,
    /// The address space of the process, owned by it.
    pub space: SpaceOf<P>,
    /// The open files of the process.
    pub files: FileTable<FileOf<P>>,
    /// Where the exit status of the process is reported.
    pub exit: Arc<ExitCell>,
}

/// The bookkeeping shared by every thread.
pub(crate) struct ProcessTable<P: Platform> {
    /// The live processes, indexed by the thread running them.
    pub processes: BTreeMap<Pid, Process<P>>,
    /// The children spawned by each thread that have not been waited for yet.
    ///
    /// Kernel threads may spawn processes too, so this is not part of [`Process`].
    pub children: BTreeMap<Pid, Vec<ChildLink>>,
}

impl<P: Platform> ProcessTable<P> {
    /// Returns the process run by `thread`.
    ///
    /// # Panics
    ///
    /// This function panics if `thread` does not run a user process. Only user processes make
    /// system calls, so this is a bug in the kernel.
    pub fn current(&mut self, thread: Pid) -> &mut Process<P> {
        match self.processes.get_mut(&thread) {
            Some(process) => process,
            None => panic!("thread {thread} is not running a user process"),
        }
    }
}

/// The user-process subsystem.
///
/// This object is created once when the kernel starts, and lives for as long as the kernel does.
/// Operations that start threads need a `&'static Userprog`.
pub struct Userprog<P: Platform> {
    platform: P,
    /// The file system. It is not reentrant, so every access goes through this lock.
    ///
    /// File system calls may block, so this is a sleeping lock. When both are needed, it is
    /// taken before `table`.
    pub(crate) fs: SleepLock<P::Fs>,
    /// Only held for short sections that never block nor call into the file system, since the
    /// holder may be preempted.
    pub(crate) table: Mutex<ProcessTable<P>>,
}

impl<P: Platform> Userprog<P> {
    /// Creates the subsystem on top of `platform` and the file system `fs`.
    pub fn new(platform: P, fs: P::Fs) -> Self {
        Self {
            platform,
            fs: SleepLock::new(fs),
            table: Mutex::new(ProcessTable {
                processes: BTreeMap::new(),
                children: BTreeMap::new(),
            }),
        }
    }

    /// Returns the platform the subsystem runs on.
    #[inline(always)]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns whether `pid` is a live user process.
    pub fn is_running(&self, pid: Pid) -> bool {
        self.table.lock().processes.contains_key(&pid)
    }

    /// Returns the parent of the live user process `pid`.
    ///
    /// Processes spawned by kernel threads have no parent.
    pub fn parent(&self, pid: Pid) -> Option<Pid> {
        self.table.lock().processes.get(&pid)?.parent
    }

    /// Activates the address space of the current thread.
    ///
    /// The scheduler calls this function every time it switches to a thread. Kernel threads get
    /// the kernel-only address space. No lock is taken: the page directory is read from the
    /// thread itself.
    pub fn activate(&self) {
        let page_directory = self.platform.threads().page_directory();
        self.platform.memory().activate(page_directory);
    }

    /// Locks the file system, blocking until it is available.
    pub(crate) fn fs(&self) -> SleepLockGuard<'_, P::Fs, P::Threads> {
        self.fs.lock(self.platform.threads())
    }
}
