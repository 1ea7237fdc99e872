//! VFS switch, task fd table, and the concrete backends: a flat initrd, a
//! dynamic procfs, and anonymous pipes.

#![no_std]

extern crate alloc;

mod fd_table;
mod initrd;
mod pipe;
mod procfs;
mod switch;

pub use fd_table::{Fd, FdEntry, FdFlags, FdTable};
pub use initrd::{InitrdFs, InitrdFsType};
pub use pipe::pipe_create;
pub use procfs::{ProcFs, ProcFsType};
pub use switch::{FileSystemType, SuperBlock, Vfs};

pub use vfs_core::*;

/// Applies `lseek` to an open handle, refusing it up front on backends that
/// declared themselves unseekable (pipes; regular files and directories
/// remain seekable).
pub fn lseek(file: &VfsFile, pos: SeekFrom) -> systype::SysResult<usize> {
    if !file.fs_ops.seekable() {
        return Err(systype::SysError::EINVAL);
    }
    file.seek(pos)
}
