//! An in-memory [`Platform`] for tests.
//!
//! Threads are real `std` threads, so spawn/wait handshakes run concurrently like they would on
//! the kernel. The page tables, the file system and the console keep counters that tests use to
//! check that nothing leaks.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use ember_sys_common::{Pid, SystemCall, PAGE_SIZE};

use crate::loader::{SegmentFlags, STACK_PAGE};
use crate::platform::*;
use crate::syscall::{Flow, SyscallFrame};
use crate::Userprog;

/// The page offset bits of an address.
const PGMASK: u32 = PAGE_SIZE - 1;

// ---------------------------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockSpace {
    id: usize,
    pages: BTreeMap<u32, (Box<Page>, bool)>,
}

/// Page tables backed by boxed pages.
#[derive(Debug)]
pub struct MockMemory {
    live_frames: AtomicUsize,
    frame_limit: AtomicUsize,
    live_spaces: AtomicUsize,
    next_space: AtomicUsize,
    active: Mutex<Option<u32>>,
    destroyed_while_active: AtomicUsize,
    read_only: Mutex<HashSet<u32>>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self {
            live_frames: AtomicUsize::new(0),
            frame_limit: AtomicUsize::new(usize::MAX),
            live_spaces: AtomicUsize::new(0),
            next_space: AtomicUsize::new(1),
            active: Mutex::new(None),
            destroyed_while_active: AtomicUsize::new(0),
            read_only: Mutex::new(HashSet::new()),
        }
    }

    /// The number of frames allocated and not freed yet.
    pub fn live_frames(&self) -> usize {
        self.live_frames.load(SeqCst)
    }

    /// The number of address spaces created and not destroyed yet.
    pub fn live_spaces(&self) -> usize {
        self.live_spaces.load(SeqCst)
    }

    /// Makes allocations fail once `limit` frames are live.
    pub fn limit_frames(&self, limit: usize) {
        self.frame_limit.store(limit, SeqCst);
    }

    /// The number of address spaces destroyed while they were active.
    pub fn destroyed_while_active(&self) -> usize {
        self.destroyed_while_active.load(SeqCst)
    }

    /// The page directory installed by the last switch.
    pub fn active(&self) -> Option<u32> {
        *self.active.lock().unwrap()
    }

    /// Maps `upage` read-only from now on, whatever the caller asks for.
    pub fn protect(&self, upage: u32) {
        self.read_only.lock().unwrap().insert(upage);
    }
}

impl AddressSpaces for MockMemory {
    type Space = MockSpace;
    type Frame = Box<Page>;

    fn create(&self) -> Option<MockSpace> {
        self.live_spaces.fetch_add(1, SeqCst);
        Some(MockSpace {
            id: self.next_space.fetch_add(1, SeqCst),
            pages: BTreeMap::new(),
        })
    }

    fn page_directory(&self, space: &MockSpace) -> u32 {
        space.id as u32
    }

    fn activate(&self, page_directory: Option<u32>) {
        *self.active.lock().unwrap() = page_directory;
    }

    fn destroy(&self, space: MockSpace) {
        if self.active() == Some(space.id as u32) {
            self.destroyed_while_active.fetch_add(1, SeqCst);
        }
        self.live_frames.fetch_sub(space.pages.len(), SeqCst);
        self.live_spaces.fetch_sub(1, SeqCst);
    }

    fn alloc_frame(&self, zeroed: bool) -> Option<Box<Page>> {
        if self.live_frames.load(SeqCst) >= self.frame_limit.load(SeqCst) {
            return None;
        }
        self.live_frames.fetch_add(1, SeqCst);
        Some(Box::new([if zeroed { 0 } else { 0xCC }; PAGE_SIZE as usize]))
    }

    fn free_frame(&self, _frame: Box<Page>) {
        self.live_frames.fetch_sub(1, SeqCst);
    }

    fn map_page(
        &self,
        space: &mut MockSpace,
        upage: u32,
        frame: Box<Page>,
        writable: bool,
    ) -> Result<(), Box<Page>> {
        assert_eq!(upage & PGMASK, 0, "unaligned mapping");
        if space.pages.contains_key(&upage) {
            return Err(frame);
        }
        let writable = writable && !self.read_only.lock().unwrap().contains(&upage);
        space.pages.insert(upage, (frame, writable));
        Ok(())
    }

    fn translate<'a>(&self, space: &'a MockSpace, addr: u32) -> Option<&'a Page> {
        space.pages.get(&(addr & !PGMASK)).map(|(page, _)| &**page)
    }

    fn translate_mut<'a>(&self, space: &'a mut MockSpace, addr: u32) -> Option<&'a mut Page> {
        match space.pages.get_mut(&(addr & !PGMASK)) {
            Some((page, true)) => Some(&mut **page),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------------------------
// File system
// ---------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockFile {
    id: usize,
    name: String,
    position: u32,
}

/// Code run at the start of every read.
type ReadHook = Box<dyn FnMut() + Send>;

/// A flat file system. Files never grow.
#[derive(Default)]
pub struct MockFs {
    files: BTreeMap<String, Vec<u8>>,
    next_id: usize,
    opened: usize,
    closed: Vec<usize>,
    on_read: Option<ReadHook>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.into(), data);
    }

    /// The number of files opened and not closed yet.
    pub fn open_files(&self) -> usize {
        self.opened - self.closed.len()
    }

    /// The number of files closed so far.
    pub fn closed_files(&self) -> usize {
        self.closed.len()
    }

    /// Runs `hook` at the start of every read, while the reading thread is inside the file system.
    pub fn on_read(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_read = Some(Box::new(hook));
    }
}

impl FileSystem for MockFs {
    type File = MockFile;

    fn open(&mut self, name: &str) -> Option<MockFile> {
        if !self.files.contains_key(name) {
            return None;
        }
        self.opened += 1;
        self.next_id += 1;
        Some(MockFile {
            id: self.next_id,
            name: name.into(),
            position: 0,
        })
    }

    fn create(&mut self, name: &str, size: u32) -> bool {
        if name.is_empty() || self.files.contains_key(name) {
            return false;
        }
        self.files.insert(name.into(), vec![0; size as usize]);
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    fn read(&mut self, file: &mut MockFile, buf: &mut [u8]) -> usize {
        if let Some(hook) = &mut self.on_read {
            hook();
        }
        let Some(data) = self.files.get(&file.name) else {
            return 0;
        };
        let start = (file.position as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        file.position += n as u32;
        n
    }

    fn write(&mut self, file: &mut MockFile, buf: &[u8]) -> usize {
        let Some(data) = self.files.get_mut(&file.name) else {
            return 0;
        };
        let start = (file.position as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        file.position += n as u32;
        n
    }

    fn seek(&mut self, file: &mut MockFile, position: u32) {
        file.position = position;
    }

    fn tell(&mut self, file: &MockFile) -> u32 {
        file.position
    }

    fn length(&mut self, file: &MockFile) -> u32 {
        self.files.get(&file.name).map_or(0, |data| data.len() as u32)
    }

    fn close(&mut self, file: MockFile) {
        assert!(!self.closed.contains(&file.id), "file closed twice");
        self.closed.push(file.id);
    }
}

// ---------------------------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl MockConsole {
    pub fn type_in(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes);
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }
}

impl Console for MockConsole {
    fn read_byte(&self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(b'\n')
    }

    fn write_bytes(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }
}

// ---------------------------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------------------------

thread_local! {
    static CURRENT: Cell<Option<Pid>> = const { Cell::new(None) };
    static PAGE_DIRECTORY: Cell<Option<u32>> = const { Cell::new(None) };
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

fn next_tid() -> Pid {
    Pid::new(NEXT_TID.fetch_add(1, SeqCst)).unwrap()
}

/// The payload a thread unwinds with when it exits.
struct ThreadExit;

/// The user-mode part of a program.
type UserMain = Arc<dyn Fn(UserContext) + Send + Sync>;

/// A scheduler running every thread on a `std` thread.
///
/// Each thread has a wake-up token; `block_current` consumes it, waiting for it if needed.
#[derive(Default)]
pub struct MockThreads {
    tokens: Mutex<HashSet<Pid>>,
    wake: Condvar,
    programs: Mutex<HashMap<String, UserMain>>,
    fail_next_create: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MockThreads {
    /// Registers the code a thread named `name` runs once it enters user mode.
    pub fn install(&self, name: &str, main: impl Fn(UserContext) + Send + Sync + 'static) {
        self.programs
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(main));
    }

    /// Makes the next call to `create_thread` fail.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, SeqCst);
    }

    /// Waits for every thread created so far, propagating their panics.
    pub fn join_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl Threads for MockThreads {
    fn current(&self) -> Pid {
        CURRENT.with(|current| match current.get() {
            Some(pid) => pid,
            None => {
                let pid = next_tid();
                current.set(Some(pid));
                pid
            }
        })
    }

    fn create_thread(&self, name: &str, entry: ThreadEntry) -> Option<Pid> {
        if self.fail_next_create.swap(false, SeqCst) {
            return None;
        }

        let pid = next_tid();
        let main = self.programs.lock().unwrap().get(name).cloned();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                CURRENT.with(|current| current.set(Some(pid)));
                let run = panic::catch_unwind(AssertUnwindSafe(move || {
                    if let Some(context) = entry() {
                        if let Some(main) = main {
                            main(context);
                        }
                    }
                }));
                if let Err(payload) = run {
                    if !payload.is::<ThreadExit>() {
                        panic::resume_unwind(payload);
                    }
                }
            })
            .ok()?;

        self.handles.lock().unwrap().push(handle);
        Some(pid)
    }

    fn set_page_directory(&self, page_directory: Option<u32>) {
        PAGE_DIRECTORY.with(|cell| cell.set(page_directory));
    }

    fn page_directory(&self) -> Option<u32> {
        PAGE_DIRECTORY.with(Cell::get)
    }

    fn block_current(&self) {
        let current = self.current();
        let mut tokens = self.tokens.lock().unwrap();
        while !tokens.remove(&current) {
            tokens = self.wake.wait(tokens).unwrap();
        }
    }

    fn unblock(&self, thread: Pid) {
        self.tokens.lock().unwrap().insert(thread);
        self.wake.notify_all();
    }

    fn exit_current(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

// ---------------------------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPlatform {
    pub threads: MockThreads,
    pub memory: MockMemory,
    pub console: MockConsole,
    pub halted: AtomicBool,
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    type Threads = MockThreads;
    type Memory = MockMemory;
    type Fs = MockFs;
    type Console = MockConsole;

    fn threads(&self) -> &MockThreads {
        &self.threads
    }

    fn memory(&self) -> &MockMemory {
        &self.memory
    }

    fn console(&self) -> &MockConsole {
        &self.console
    }

    fn power_off(&self) -> ! {
        self.halted.store(true, SeqCst);
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

/// The subsystem under test.
pub type Kernel = &'static Userprog<MockPlatform>;

/// Creates a subsystem with an empty file system. It is leaked, like the real one lives forever.
pub fn boot() -> Kernel {
    Box::leak(Box::new(Userprog::new(MockPlatform::default(), MockFs::new())))
}

/// Adds a program to the file system of `kernel`, running `main` once loaded.
///
/// `main` runs in the new process. Returning from it exits with status 0, and panicking kills
/// the process before the panic is propagated by [`MockThreads::join_all`].
pub fn install(kernel: Kernel, name: &str, main: impl Fn(User) + Send + Sync + 'static) {
    kernel.fs().insert(name, program());
    kernel.platform().threads.install(name, move |context| {
        let run = panic::catch_unwind(AssertUnwindSafe(|| main(User::new(kernel, context))));
        let current = kernel.platform().threads.current();
        if kernel.is_running(current) {
            match run {
                Ok(()) => kernel.exit(0),
                Err(_) => kernel.kill(),
            }
        }
        if let Err(payload) = run {
            panic::resume_unwind(payload);
        }
    });
}

// ---------------------------------------------------------------------------------------------
// User processes
// ---------------------------------------------------------------------------------------------

/// The view a test has of the user process it runs in.
///
/// Scratch data (strings, buffers) is placed at the bottom of the stack page, and system call
/// frames are built well below the initial stack pointer.
pub struct User {
    kernel: Kernel,
    pub context: UserContext,
    scratch: Cell<u32>,
}

impl User {
    fn new(kernel: Kernel, context: UserContext) -> Self {
        Self {
            kernel,
            context,
            scratch: Cell::new(STACK_PAGE),
        }
    }

    pub fn pid(&self) -> Pid {
        self.kernel.platform().threads.current()
    }

    /// Writes `bytes` at `addr`, bypassing the checks system calls go through.
    pub fn poke(&self, addr: u32, bytes: &[u8]) {
        self.kernel
            .with_user(|user| user.copy_out(addr, bytes))
            .unwrap();
    }

    /// Reads `len` bytes at `addr`.
    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.kernel
            .with_user(|user| user.copy_in(addr, &mut buf))
            .unwrap();
        buf
    }

    pub fn peek_u32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.peek(addr, 4).try_into().unwrap())
    }

    /// Reserves `len` bytes of scratch memory.
    pub fn alloc(&self, len: u32) -> u32 {
        let addr = self.scratch.get();
        self.scratch.set((addr + len + 3) & !3);
        assert!(self.scratch.get() < self.context.esp - 256, "out of scratch memory");
        addr
    }

    /// Places `s` in user memory, NUL-terminated.
    pub fn str(&self, s: &str) -> u32 {
        let addr = self.alloc(s.len() as u32 + 1);
        self.poke(addr, s.as_bytes());
        self.poke(addr + s.len() as u32, &[0]);
        addr
    }

    /// Makes a system call from a frame at `esp`, returning the flow and the value of `eax`.
    pub fn trap(&self, esp: u32) -> (Flow, i32) {
        let mut frame = SyscallFrame { esp, eax: 0 };
        let flow = self.kernel.dispatch(&mut frame);
        (flow, frame.eax as i32)
    }

    /// Makes a system call, returning its result if the process resumes.
    pub fn call(&self, call: SystemCall, args: &[u32]) -> Result<i32, Flow> {
        let esp = self.context.esp - 64;
        self.poke(esp, &call.to_u32().to_le_bytes());
        for (i, arg) in args.iter().enumerate() {
            self.poke(esp + 4 * (i as u32 + 1), &arg.to_le_bytes());
        }

        match self.trap(esp) {
            (Flow::Resume, ret) => Ok(ret),
            (flow, _) => Err(flow),
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Executables
// ---------------------------------------------------------------------------------------------

struct Segment {
    p_type: u32,
    offset: Option<u32>,
    vaddr: u32,
    data: Vec<u8>,
    filesz: u32,
    memsz: u32,
    flags: SegmentFlags,
}

/// Assembles ELF32 executables.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Adds a loadable segment. Its data is placed in the file with the same page offset as
    /// `vaddr`.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32, flags: SegmentFlags) -> Self {
        self.segments.push(Segment {
            p_type: 1,
            offset: None,
            vaddr,
            data: data.to_vec(),
            filesz: data.len() as u32,
            memsz,
            flags,
        });
        self
    }

    /// Adds a raw program header, with no data.
    pub fn program_header(
        mut self,
        p_type: u32,
        offset: u32,
        vaddr: u32,
        filesz: u32,
        memsz: u32,
        flags: SegmentFlags,
    ) -> Self {
        self.segments.push(Segment {
            p_type,
            offset: Some(offset),
            vaddr,
            data: Vec::new(),
            filesz,
            memsz,
            flags,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        const EHDR: usize = 52;
        const PHDR: usize = 32;

        let mut file = vec![0u8; EHDR + PHDR * self.segments.len()];

        file[..7].copy_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
        file[16..18].copy_from_slice(&2u16.to_le_bytes());
        file[18..20].copy_from_slice(&3u16.to_le_bytes());
        file[20..24].copy_from_slice(&1u32.to_le_bytes());
        file[24..28].copy_from_slice(&self.entry.to_le_bytes());
        file[28..32].copy_from_slice(&(EHDR as u32).to_le_bytes());
        file[40..42].copy_from_slice(&(EHDR as u16).to_le_bytes());
        file[42..44].copy_from_slice(&(PHDR as u16).to_le_bytes());
        file[44..46].copy_from_slice(&(self.segments.len() as u16).to_le_bytes());
        file[46..48].copy_from_slice(&40u16.to_le_bytes());

        for (i, segment) in self.segments.iter().enumerate() {
            let offset = match segment.offset {
                Some(offset) => offset,
                None => {
                    let page = (file.len() as u32 + PGMASK) & !PGMASK;
                    let offset = page + (segment.vaddr & PGMASK);
                    file.resize(offset as usize, 0);
                    file.extend_from_slice(&segment.data);
                    offset
                }
            };

            let at = EHDR + PHDR * i;
            let fields = [
                segment.p_type,
                offset,
                segment.vaddr,
                segment.vaddr,
                segment.filesz,
                segment.memsz,
                segment.flags.bits(),
                PAGE_SIZE,
            ];
            for (j, field) in fields.iter().enumerate() {
                file[at + 4 * j..at + 4 * j + 4].copy_from_slice(&field.to_le_bytes());
            }
        }

        file
    }
}

/// The address user programs built by [`program`] are loaded at.
pub const CODE: u32 = 0x0804_8000;

/// A minimal executable.
pub fn program() -> Vec<u8> {
    ElfBuilder::new(CODE)
        .segment(
            CODE,
            &[0x90; 16],
            16,
            SegmentFlags::READ | SegmentFlags::EXECUTE,
        )
        .build()
}
