use alloc::string::String;
use alloc::vec;

use ember_sys_common::{Handle, SysResult, STDIN, STDOUT};

use super::{Abort, Handled, StrError};
use crate::config::syscall::{IO_CHUNK, MAX_PATH};
use crate::platform::{Console, FileOf, FileSystem, Platform, Threads};
use crate::process::Userprog;

impl<P: Platform> Userprog<P> {
    /// Reads a file name from the memory of the current process.
    ///
    /// Returns `None` if the name is too long or not valid UTF-8. Such a name cannot name a file.
    fn read_name(&self, name: u32) -> Result<Option<String>, Abort> {
        match self.with_user(|user| user.read_str(name, MAX_PATH)) {
            Ok(name) => Ok(Some(name)),
            Err(StrError::Fault(fault)) => Err(Abort::Fault(fault)),
            Err(StrError::TooLong | StrError::InvalidUtf8) => Ok(None),
        }
    }

    /// Calls `f` with the file system and the file named by `handle`, or returns `None` if the
    /// handle names no file of the current process.
    ///
    /// The file is taken out of the process table while `f` runs, so the table is not locked
    /// during the call. Other threads never touch the files of the current process.
    fn with_file<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut P::Fs, &mut FileOf<P>) -> R,
    ) -> Option<R> {
        let current = self.platform().threads().current();
        let mut fs = self.fs();
        let mut file = self.table.lock().current(current).files.take(handle)?;
        let ret = f(&mut *fs, &mut file);
        self.table
            .lock()
            .current(current)
            .files
            .restore(handle, file);
        Some(ret)
    }

    pub(super) fn sys_create(&self, name: u32, size: u32) -> Handled {
        let Some(name) = self.read_name(name)? else {
            return Ok(SysResult::from_bool(false));
        };
        let created = self.fs().create(&name, size);
        Ok(SysResult::from_bool(created))
    }

    pub(super) fn sys_remove(&self, name: u32) -> Handled {
        let Some(name) = self.read_name(name)? else {
            return Ok(SysResult::from_bool(false));
        };
        let removed = self.fs().remove(&name);
        Ok(SysResult::from_bool(removed))
    }

    pub(super) fn sys_open(&self, name: u32) -> Handled {
        let Some(name) = self.read_name(name)? else {
            return Ok(SysResult::ERROR);
        };

        let current = self.platform().threads().current();
        let mut fs = self.fs();
        let Some(file) = fs.open(&name) else {
            return Ok(SysResult::ERROR);
        };

        let registered = self.table.lock().current(current).files.open(file);
        match registered {
            Ok(handle) => Ok(SysResult(handle)),
            Err(file) => {
                fs.close(file);
                Ok(SysResult::ERROR)
            }
        }
    }

    pub(super) fn sys_filesize(&self, handle: Handle) -> Handled {
        let length = self.with_file(handle, |fs, file| fs.length(file));
        Ok(length.map_or(SysResult::ERROR, SysResult))
    }

    pub(super) fn sys_read(&self, handle: Handle, buffer: u32, size: u32) -> Handled {
        if handle == STDIN {
            return self.read_console(buffer, size);
        }

        self.with_user(|user| user.check_range_mut(buffer, size))?;

        let read = self.with_file(handle, |fs, file| -> Handled {
            let mut chunk = vec![0u8; IO_CHUNK.min(size as usize)];
            let mut done = 0;
            while done < size {
                let n = chunk.len().min((size - done) as usize);
                let got = fs.read(file, &mut chunk[..n]);
                self.with_user(|user| user.copy_out(buffer + done, &chunk[..got]))?;
                done += got as u32;
                if got < n {
                    break;
                }
            }

            Ok(SysResult(done))
        });

        read.unwrap_or(Ok(SysResult::ERROR))
    }

    /// Fills `buffer` with bytes typed on the keyboard.
    fn read_console(&self, buffer: u32, size: u32) -> Handled {
        self.with_user(|user| user.check_range_mut(buffer, size))?;

        let console = self.platform().console();
        let mut chunk = vec![0u8; IO_CHUNK.min(size as usize)];
        let mut done = 0;
        while done < size {
            let n = chunk.len().min((size - done) as usize);
            for byte in &mut chunk[..n] {
                *byte = console.read_byte();
            }
            self.with_user(|user| user.copy_out(buffer + done, &chunk[..n]))?;
            done += n as u32;
        }

        Ok(SysResult(done))
    }

    pub(super) fn sys_write(&self, handle: Handle, buffer: u32, size: u32) -> Handled {
        if handle == STDOUT {
            return self.write_console(buffer, size);
        }

        self.with_user(|user| user.check_range(buffer, size))?;

        let written = self.with_file(handle, |fs, file| -> Handled {
            let mut chunk = vec![0u8; IO_CHUNK.min(size as usize)];
            let mut done = 0;
            while done < size {
                let n = chunk.len().min((size - done) as usize);
                self.with_user(|user| user.copy_in(buffer + done, &mut chunk[..n]))?;
                let wrote = fs.write(file, &chunk[..n]);
                done += wrote as u32;
                if wrote < n {
                    break;
                }
            }

            Ok(SysResult(done))
        });

        written.unwrap_or(Ok(SysResult::NONE))
    }

    /// Prints `buffer` on the console.
    fn write_console(&self, buffer: u32, size: u32) -> Handled {
        self.with_user(|user| user.check_range(buffer, size))?;

        let console = self.platform().console();
        let mut chunk = vec![0u8; IO_CHUNK.min(size as usize)];
        let mut done = 0;
        while done < size {
            let n = chunk.len().min((size - done) as usize);
            self.with_user(|user| user.copy_in(buffer + done, &mut chunk[..n]))?;
            console.write_bytes(&chunk[..n]);
            done += n as u32;
        }

        Ok(SysResult(done))
    }

    pub(super) fn sys_seek(&self, handle: Handle, position: u32) -> Handled {
        self.with_file(handle, |fs, file| fs.seek(file, position));
        Ok(SysResult::NONE)
    }

    pub(super) fn sys_tell(&self, handle: Handle) -> Handled {
        let position = self.with_file(handle, |fs, file| fs.tell(file));
        Ok(position.map_or(SysResult::ERROR, SysResult))
    }

    pub(super) fn sys_close(&self, handle: Handle) -> Handled {
        let current = self.platform().threads().current();
        let file = self.table.lock().current(current).files.close(handle);
        if let Some(file) = file {
            self.fs().close(file);
        }
        Ok(SysResult::NONE)
    }
}
