//! Spin-based synchronization primitives.
//!
//! The kernel runs on a single CPU with preemption, so these locks never sleep. Critical sections
//! must be short and must never block the current thread while a lock is held.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

mod mutex;

pub use self::mutex::*;
