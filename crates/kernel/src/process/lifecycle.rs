use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use em_spin::Mutex;
use ember_sys_common::{Pid, KILLED_STATUS};

use super::{Process, Userprog};
use crate::platform::{AddressSpaces, FileSystem, Platform, Threads};

/// The state of a child process, as seen by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// The child is still running.
    Running,
    /// The child called `exit` with a status.
    Exited(i32),
    /// The child was terminated by the kernel.
    Killed,
}

impl ChildState {
    /// Returns the status a waiter observes, or `None` if the child is still running.
    pub const fn status(self) -> Option<i32> {
        match self {
            Self::Running => None,
            Self::Exited(status) => Some(status),
            Self::Killed => Some(KILLED_STATUS),
        }
    }
}

struct ExitInner {
    state: ChildState,
    /// The threads to wake up when the state changes.
    waiters: Vec<Pid>,
}

/// The place where a process reports its termination.
///
/// The cell is created before the process, and shared between the process and the [`ChildLink`]
/// of its parent. Whichever of the two goes away last frees it.
pub struct ExitCell {
    inner: Mutex<ExitInner>,
}

impl ExitCell {
    /// Creates a new [`ExitCell`] for a running process.
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(ExitInner {
                state: ChildState::Running,
                waiters: Vec::new(),
            }),
        }
    }

    /// Returns the current state of the process.
    pub fn state(&self) -> ChildState {
        self.inner.lock().state
    }

    /// Returns the current state of the process, registering `waiter` to be woken up when the
    /// process terminates if it is still running.
    fn watch(&self, waiter: Pid) -> ChildState {
        let mut inner = self.inner.lock();
        if inner.state == ChildState::Running && !inner.waiters.contains(&waiter) {
            inner.waiters.push(waiter);
        }
        inner.state
    }

    /// Records the termination of the process, returning the threads to wake up.
    ///
    /// # Panics
    ///
    /// The state of a process can only be set once.
    fn publish(&self, state: ChildState) -> Vec<Pid> {
        let mut inner = self.inner.lock();
        assert_eq!(inner.state, ChildState::Running, "process terminated twice");
        inner.state = state;
        core::mem::take(&mut inner.waiters)
    }
}

/// A child spawned by a thread, which the thread has not waited for yet.
pub(crate) struct ChildLink {
    pub pid: Pid,
    pub exit: Arc<ExitCell>,
}

/// An error which might occur when waiting for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The process is not a child of the caller, or it has already been waited for.
    NotAChild,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAChild => f.write_str("not a child of the caller"),
        }
    }
}

impl<P: Platform> Userprog<P> {
    /// Waits for the child `pid` of the current thread to terminate, and returns its exit
    /// status.
    ///
    /// A child can only be waited for once. Children killed by the kernel report
    /// [`KILLED_STATUS`].
    pub fn wait(&self, pid: Pid) -> Result<i32, WaitError> {
        let threads = self.platform.threads();
        let current = threads.current();

        let exit = self
            .table
            .lock()
            .children
            .get(&current)
            .and_then(|links| links.iter().find(|link| link.pid == pid))
            .map(|link| link.exit.clone())
            .ok_or(WaitError::NotAChild)?;

        let status = loop {
            if let Some(status) = exit.watch(current).status() {
                break status;
            }
            threads.block_current();
        };

        let mut table = self.table.lock();
        if let Some(links) = table.children.get_mut(&current) {
            links.retain(|link| link.pid != pid);
            if links.is_empty() {
                table.children.remove(&current);
            }
        }

        Ok(status)
    }

    /// Terminates the current process with `status`.
    ///
    /// This releases the resources of the process and reports `status` to its parent. The caller
    /// is expected to exit the current thread right after.
    ///
    /// # Panics
    ///
    /// This function panics if the current thread does not run a user process, which happens if
    /// the process was already terminated.
    pub fn exit(&self, status: i32) {
        self.terminate(ChildState::Exited(status));
    }

    /// Terminates the current process because of a fatal error.
    ///
    /// Waiters observe [`KILLED_STATUS`].
    pub fn kill(&self) {
        self.terminate(ChildState::Killed);
    }

    fn terminate(&self, state: ChildState) {
        let threads = self.platform.threads();
        let memory = self.platform.memory();
        let current = threads.current();

        let (process, children) = {
            let mut table = self.table.lock();
            let Some(process) = table.processes.remove(&current) else {
                panic!("thread {current} terminated a process it does not run");
            };
            (process, table.children.remove(&current))
        };

        let Process {
            parent,
            name,
            space,
            mut files,
            exit,
        } = process;

        {
            let mut fs = self.fs();
            for file in files.drain() {
                fs.close(file);
            }
        }

        // The space must not be active anymore when it is destroyed.
        threads.set_page_directory(None);
        memory.activate(None);
        memory.destroy(space);

        // The children keep running. Their exit cells are freed when they terminate.
        drop(children);

        let status = state.status().unwrap_or(KILLED_STATUS);
        em_log::info!("{}: exit({})", name, status);
        if let Some(parent) = parent {
            em_log::trace!("{}: reporting to process {}", name, parent);
        }

        for waiter in exit.publish(state) {
            threads.unblock(waiter);
        }
    }
}
