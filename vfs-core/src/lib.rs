//! Trait and type vocabulary shared by every VFS backend: operation tables,
//! the open-file handle, permission checks, and the path resolver. The
//! switch and the concrete backends live in the `vfs` crate; this crate has
//! no mounted state of its own.

#![no_std]

extern crate alloc;

mod config;
mod file;
mod flags;
mod path;
mod perm;

pub use config::*;
pub use file::{alloc_ino, FsOps, SysOps, VfsFile};
pub use flags::*;
pub use path::{is_absolute, resolve_path, split_path, LinkReader, NoLinks, ResolveFlags};
pub use perm::{is_permitted, vfs_open_permitted, Credentials, IpcPerm};
