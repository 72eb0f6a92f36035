use alloc::collections::BTreeMap;

use ember_sys_common::Handle;

use crate::config::process::MAX_HANDLES;

/// The first handle given to an open file. Handles 0 and 1 belong to the console.
const FIRST_HANDLE: Handle = 2;

/// The open files of a process.
///
/// Handles are assigned in increasing order and never reused, so a closed handle never resolves
/// again.
#[derive(Debug)]
pub struct FileTable<F> {
    files: BTreeMap<Handle, F>,
    next: Handle,
}

impl<F> FileTable<F> {
    /// Creates an empty [`FileTable`].
    pub const fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            next: FIRST_HANDLE,
        }
    }

    /// Returns the number of open files.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns whether no file is open.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registers `file`, returning its handle.
    ///
    /// If the process has exhausted its handles, the file is given back.
    pub fn open(&mut self, file: F) -> Result<Handle, F> {
        if self.next > MAX_HANDLES {
            return Err(file);
        }

        let handle = self.next;
        self.next += 1;
        self.files.insert(handle, file);
        Ok(handle)
    }

    /// Returns the file named by `handle`.
    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&F> {
        self.files.get(&handle)
    }

    /// Returns the file named by `handle`.
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut F> {
        self.files.get_mut(&handle)
    }

    /// Removes `handle` from the table, returning the file it named.
    ///
    /// Unknown handles are ignored.
    #[inline]
    pub fn close(&mut self, handle: Handle) -> Option<F> {
        self.files.remove(&handle)
    }

    /// Takes the file named by `handle` out of the table, leaving the handle reserved.
    ///
    /// The file must be put back with [`FileTable::restore`].
    #[inline]
    pub fn take(&mut self, handle: Handle) -> Option<F> {
        self.files.remove(&handle)
    }

    /// Puts back a file previously taken out with [`FileTable::take`].
    #[inline]
    pub fn restore(&mut self, handle: Handle, file: F) {
        debug_assert!(handle >= FIRST_HANDLE && handle < self.next);
        self.files.insert(handle, file);
    }

    /// Removes every file from the table.
    pub fn drain(&mut self) -> impl Iterator<Item = F> {
        core::mem::take(&mut self.files).into_values()
    }
}

impl<F> Default for FileTable<F> {
    fn default() -> Self {
        Self::new()
    }
}
