use ember_sys_common::{Pid, SysResult};

use super::{Abort, Handled, StrError};
use crate::config::process::MAX_COMMAND_LINE;
use crate::platform::Platform;
use crate::process::Userprog;

impl<P: Platform> Userprog<P> {
    pub(super) fn sys_halt(&self) -> Handled {
        Err(Abort::Halt)
    }

    pub(super) fn sys_exit(&self, status: i32) -> Handled {
        self.exit(status);
        Err(Abort::Exit)
    }

    pub(super) fn sys_exec(&'static self, command_line: u32) -> Handled {
        let read = self.with_user(|user| user.read_str(command_line, MAX_COMMAND_LINE - 1));
        let command_line = match read {
            Ok(command_line) => command_line,
            Err(StrError::Fault(fault)) => return Err(Abort::Fault(fault)),
            Err(StrError::TooLong | StrError::InvalidUtf8) => return Ok(SysResult::ERROR),
        };

        match self.spawn(&command_line) {
            Ok(pid) => Ok(SysResult::from(pid)),
            Err(_) => Ok(SysResult::ERROR),
        }
    }

    pub(super) fn sys_wait(&self, pid: u32) -> Handled {
        let Some(pid) = Pid::new(pid) else {
            return Ok(SysResult::ERROR);
        };

        match self.wait(pid) {
            Ok(status) => Ok(SysResult::from_i32(status)),
            Err(_) => Ok(SysResult::ERROR),
        }
    }
}
