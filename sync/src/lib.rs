#![no_std]

//! Mutual exclusion for structures that must be guarded even on a
//! uniprocessor, because a timer interrupt can run a wakeup path
//! concurrently with whatever the current task is doing: the VFS registry,
//! refcounts on file handles, per-pipe state, and so on.

pub mod mutex;

pub use mutex::{SpinLock, SpinNoIrqLock};
