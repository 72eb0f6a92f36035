//! The system call interface.
//!
//! A user process makes a system call by pushing its arguments then the system call number on
//! its stack, and raising interrupt [`SYSCALL_VECTOR`](ember_sys_common::SYSCALL_VECTOR). The
//! trap handler passes the saved registers to [`Userprog::syscall_entry`], and the return value
//! of the system call is written back to `eax`.

use core::fmt;

use ember_sys_common::{SysResult, SystemCall};

use crate::platform::{Platform, Threads};
use crate::process::Userprog;

mod fs;
mod process;
mod user;

pub use self::user::*;

/// The registers of a process that raised a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallFrame {
    /// The user stack pointer at the time of the trap.
    pub esp: u32,
    /// Where the return value of the system call is stored.
    pub eax: u32,
}

/// What the trap handler must do once a system call has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Return to the process.
    Resume,
    /// The process is gone, exit its thread.
    Exit,
    /// Power the machine off.
    Halt,
}

/// The ways a system call can avoid returning to the process.
pub(crate) enum Abort {
    /// The process exited.
    Exit,
    /// The machine must be powered off.
    Halt,
    /// The process made an invalid request, and must be killed.
    Fault(UserFault),
}

impl From<UserFault> for Abort {
    #[inline(always)]
    fn from(fault: UserFault) -> Self {
        Self::Fault(fault)
    }
}

/// The result of a system call handler.
pub(crate) type Handled = Result<SysResult, Abort>;

/// A decoded system call.
struct Invocation {
    call: SystemCall,
    args: [u32; 3],
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.call.name())?;
        for (i, arg) in self.args[..self.call.arity()].iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg:#x}")?;
        }
        f.write_str(")")
    }
}

impl<P: Platform> Userprog<P> {
    /// The system call handler.
    ///
    /// This function only returns when the process should resume.
    pub fn syscall_entry(&'static self, frame: &mut SyscallFrame) {
        match self.dispatch(frame) {
            Flow::Resume => (),
            Flow::Exit => self.platform().threads().exit_current(),
            Flow::Halt => self.platform().power_off(),
        }
    }

    /// Handles the system call described by `frame`, made by the current process.
    ///
    /// When the process resumes, its return value is stored in `frame.eax`. A process making an
    /// invalid request is killed.
    pub fn dispatch(&'static self, frame: &mut SyscallFrame) -> Flow {
        let result = match self.decode(frame.esp) {
            Ok(invocation) => {
                em_log::trace!("system call: {}", invocation);
                self.invoke(&invocation)
            }
            Err(fault) => Err(Abort::Fault(fault)),
        };

        match result {
            Ok(ret) => {
                frame.eax = ret.0;
                Flow::Resume
            }
            Err(Abort::Exit) => Flow::Exit,
            Err(Abort::Halt) => Flow::Halt,
            Err(Abort::Fault(fault)) => {
                em_log::warn!(
                    "thread {}: killed: {}",
                    self.platform().threads().current(),
                    fault,
                );
                self.kill();
                Flow::Exit
            }
        }
    }

    /// Reads the system call number and its arguments from the stack at `esp`.
    fn decode(&self, esp: u32) -> Result<Invocation, UserFault> {
        self.with_user(|user| -> Result<Invocation, UserFault> {
            let number = user.read_u32(esp)?;
            let call =
                SystemCall::from_u32(number).ok_or(UserFault::UnknownSystemCall(number))?;

            let mut args = [0; 3];
            let mut slot = esp;
            for arg in &mut args[..call.arity()] {
                slot = slot.checked_add(4).ok_or(UserFault::KernelAddress(slot))?;
                *arg = user.read_u32(slot)?;
            }

            Ok(Invocation { call, args })
        })
    }

    fn invoke(&'static self, invocation: &Invocation) -> Handled {
        let [a0, a1, a2] = invocation.args;

        match invocation.call {
            SystemCall::Halt => self.sys_halt(),
            SystemCall::Exit => self.sys_exit(a0 as i32),
            SystemCall::Exec => self.sys_exec(a0),
            SystemCall::Wait => self.sys_wait(a0),
            SystemCall::Create => self.sys_create(a0, a1),
            SystemCall::Remove => self.sys_remove(a0),
            SystemCall::Open => self.sys_open(a0),
            SystemCall::Filesize => self.sys_filesize(a0),
            SystemCall::Read => self.sys_read(a0, a1, a2),
            SystemCall::Write => self.sys_write(a0, a1, a2),
            SystemCall::Seek => self.sys_seek(a0, a1),
            SystemCall::Tell => self.sys_tell(a0),
            SystemCall::Close => self.sys_close(a0),
        }
    }

    /// Calls `f` with the memory of the current process.
    ///
    /// The process table stays locked while `f` runs, so `f` must not block.
    pub(crate) fn with_user<R>(
        &self,
        f: impl FnOnce(&mut UserMemory<'_, P::Memory>) -> R,
    ) -> R {
        let current = self.platform().threads().current();
        let mut table = self.table.lock();
        let process = table.current(current);
        let mut user = UserMemory::new(self.platform().memory(), &mut process.space);
        f(&mut user)
    }
}
