//! Array-based data structures.
//!
//! Nothing in here allocates: the storage of every collection lives inline.

#![no_std]

mod vec;

pub use self::vec::*;
