//! # The Ember user-process subsystem
//!
//! This crate turns executables stored on disk into running, isolated user processes, keeps
//! track of the parent/child relationship between those processes, and serves the system calls
//! they make.
//!
//! The crate does not know how to schedule threads, manage page tables, store files or drive the
//! console. Those services are provided by the embedding kernel through the traits of the
//! [`platform`] module. Everything else is created once at boot time, in the [`Userprog`]
//! object.
//!
//! User programs are 32-bit x86 ELF executables. Their address space ends at
//! [`USER_TOP`](ember_sys_common::USER_TOP), where the kernel begins.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod loader;
pub mod platform;
pub mod process;
pub mod stack;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use self::process::{SpawnError, Userprog, WaitError};
pub use self::syscall::{Flow, SyscallFrame};
