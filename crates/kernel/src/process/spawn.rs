use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use em_spin::Mutex;
use ember_sys_common::{Pid, USER_TOP};

use super::{ChildLink, ExitCell, FileTable, Process, Userprog};
use crate::config::process::MAX_COMMAND_LINE;
use crate::loader::{self, LoadError, STACK_PAGE};
use crate::platform::{AddressSpaces, FileSystem, Platform, Threads, UserContext};
use crate::stack::{build_stack, StackError};

/// An error which might occur when spawning a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The command line does not name a program.
    EmptyCommandLine,
    /// The thread of the process could not be created.
    NoThread,
    /// The program does not exist.
    NotFound,
    /// The program could not be loaded.
    Load(LoadError),
    /// The arguments of the program could not be placed on its stack.
    Stack(StackError),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommandLine => f.write_str("empty command line"),
            Self::NoThread => f.write_str("failed to create a thread"),
            Self::NotFound => f.write_str("program not found"),
            Self::Load(err) => write!(f, "failed to load the program: {err}"),
            Self::Stack(err) => write!(f, "failed to set up the stack: {err}"),
        }
    }
}

impl From<LoadError> for SpawnError {
    #[inline(always)]
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<StackError> for SpawnError {
    #[inline(always)]
    fn from(err: StackError) -> Self {
        Self::Stack(err)
    }
}

/// The state shared between a spawning thread and the process it starts.
struct Launch {
    /// The thread that called [`Userprog::spawn`].
    spawner: Pid,
    /// `None` until the new thread is done loading the program.
    outcome: Mutex<Option<Result<(), SpawnError>>>,
    /// The exit cell of the new process.
    exit: Arc<ExitCell>,
}

impl<P: Platform> Userprog<P> {
    /// Starts a new process running `command_line`.
    ///
    /// The first word of the command line names the program, and the whole command line is
    /// passed to it as arguments. Command lines longer than a page are truncated.
    ///
    /// This function returns once the program is loaded. The new process becomes a child of the
    /// current thread, which may wait for it.
    pub fn spawn(&'static self, command_line: &str) -> Result<Pid, SpawnError> {
        let threads = self.platform.threads();

        let command_line = truncate(command_line, MAX_COMMAND_LINE - 1);
        let name = command_line
            .split_ascii_whitespace()
            .next()
            .ok_or(SpawnError::EmptyCommandLine)?;

        let spawner = threads.current();
        let launch = Arc::new(Launch {
            spawner,
            outcome: Mutex::new(None),
            exit: Arc::new(ExitCell::new()),
        });

        let entry = {
            let launch = launch.clone();
            let command_line = String::from(command_line);
            Box::new(move || self.start_process(&command_line, &launch))
        };

        let pid = threads
            .create_thread(name, entry)
            .ok_or(SpawnError::NoThread)?;

        loop {
            match *launch.outcome.lock() {
                None => (),
                Some(Ok(())) => break,
                Some(Err(err)) => return Err(err),
            }
            threads.block_current();
        }

        self.table
            .lock()
            .children
            .entry(spawner)
            .or_default()
            .push(ChildLink {
                pid,
                exit: launch.exit.clone(),
            });

        Ok(pid)
    }

    /// The first thing a new process does.
    ///
    /// Loads the program, reports the outcome to the spawner and returns the state the thread
    /// should enter user mode with.
    fn start_process(&self, command_line: &str, launch: &Launch) -> Option<UserContext> {
        let result = self.load_process(command_line, launch);

        *launch.outcome.lock() = Some(result.map(|_| ()));
        self.platform.threads().unblock(launch.spawner);

        result.ok()
    }

    fn load_process(&self, command_line: &str, launch: &Launch) -> Result<UserContext, SpawnError> {
        let memory = self.platform.memory();
        let name = command_line
            .split_ascii_whitespace()
            .next()
            .ok_or(SpawnError::EmptyCommandLine)?;

        let image = {
            let mut fs = self.fs();
            let Some(mut file) = fs.open(name) else {
                em_log::warn!("load: {}: open failed", name);
                return Err(SpawnError::NotFound);
            };
            let image = loader::load(memory, &mut *fs, &mut file);
            fs.close(file);
            image
        };

        let mut image = image.map_err(|err| {
            em_log::warn!("load: {}: error loading executable ({})", name, err);
            SpawnError::Load(err)
        })?;

        let esp = memory
            .translate_mut(&mut image.space, STACK_PAGE)
            .ok_or(StackError::Unmapped)
            .and_then(|page| build_stack(page, USER_TOP, command_line));
        let esp = match esp {
            Ok(esp) => esp,
            Err(err) => {
                em_log::warn!("load: {}: {}", name, err);
                memory.destroy(image.space);
                return Err(SpawnError::Stack(err));
            }
        };

        let threads = self.platform.threads();
        let current = threads.current();
        threads.set_page_directory(Some(memory.page_directory(&image.space)));
        {
            let mut table = self.table.lock();
            let parent = Some(launch.spawner).filter(|p| table.processes.contains_key(p));
            table.processes.insert(
                current,
                Process {
                    parent,
                    name: String::from(name),
                    space: image.space,
                    files: FileTable::new(),
                    exit: launch.exit.clone(),
                },
            );
        }
        self.activate();

        Ok(UserContext {
            eip: image.entry,
            esp,
        })
    }
}

/// Truncates `s` to at most `max` bytes, on a character boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
