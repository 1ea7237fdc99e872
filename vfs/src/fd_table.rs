//! Per-task file-descriptor table.

use alloc::{sync::Arc, vec::Vec};

use systype::{SysError, SysResult};
use vfs_core::{MAX_OPEN_FD, MAX_OPEN_FD_LIMIT};
use vfs_core::VfsFile;

pub type Fd = usize;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdFlags: u8 {
        const CLOEXEC = 1;
    }
}

#[derive(Clone)]
pub struct FdEntry {
    file: Arc<VfsFile>,
    flags: FdFlags,
}

impl FdEntry {
    pub fn new(file: Arc<VfsFile>, flags: FdFlags) -> Self {
        Self { file, flags }
    }

    pub fn file(&self) -> Arc<VfsFile> {
        self.file.clone()
    }

    pub fn flags(&self) -> FdFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FdFlags) {
        self.flags = flags;
    }
}

/// Starts at [`MAX_OPEN_FD`] slots and doubles (plus one) on exhaustion, up
/// to [`MAX_OPEN_FD_LIMIT`]; never shrinks while the task is alive.
#[derive(Clone)]
pub struct FdTable {
    table: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            table: alloc::vec![None; MAX_OPEN_FD],
        }
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.table.iter().position(Option::is_none)
    }

    fn grow(&mut self) -> SysResult<()> {
        if self.table.len() >= MAX_OPEN_FD_LIMIT {
            return Err(SysError::EMFILE);
        }
        let new_len = (self.table.len() * 2 + 1).min(MAX_OPEN_FD_LIMIT);
        log::debug!("[FdTable::grow] {} -> {} slots", self.table.len(), new_len);
        self.table.resize(new_len, None);
        Ok(())
    }

    /// Installs `file` at the lowest free slot, growing the table if none is
    /// free. Fails `ENFILE` only when the table is already at
    /// [`MAX_OPEN_FD_LIMIT`] and full.
    pub fn alloc(&mut self, file: Arc<VfsFile>, flags: FdFlags) -> SysResult<Fd> {
        let slot = match self.first_free_slot() {
            Some(slot) => slot,
            None => {
                self.grow().map_err(|_| SysError::ENFILE)?;
                self.first_free_slot().expect("grow just freed a slot")
            }
        };
        self.table[slot] = Some(FdEntry::new(file, flags));
        Ok(slot)
    }

    pub fn get(&self, fd: Fd) -> SysResult<&FdEntry> {
        self.table.get(fd).and_then(Option::as_ref).ok_or(SysError::EBADF)
    }

    pub fn get_file(&self, fd: Fd) -> SysResult<Arc<VfsFile>> {
        Ok(self.get(fd)?.file())
    }

    /// Frees the slot. Does not touch the handle's refcount; callers go
    /// through the VFS switch's `close`, which decrements it first.
    pub fn remove(&mut self, fd: Fd) -> SysResult<FdEntry> {
        match self.table.get_mut(fd) {
            Some(slot @ Some(_)) => Ok(slot.take().unwrap()),
            _ => Err(SysError::EBADF),
        }
    }

    /// Allocates a new slot for the same handle and bumps its refcount.
    pub fn dup(&mut self, old_fd: Fd) -> SysResult<Fd> {
        let entry = self.get(old_fd)?.clone();
        entry.file.inc_ref();
        self.alloc(entry.file, entry.flags)
    }

    /// `dup2`-style fixed-slot duplication: places the duplicate at `new_fd`
    /// exactly, closing whatever lived there first. A no-op returning
    /// `new_fd` when `old_fd == new_fd`, per POSIX dup2.
    pub fn dup2(&mut self, old_fd: Fd, new_fd: Fd) -> SysResult<Fd> {
        if old_fd == new_fd {
            self.get(old_fd)?;
            return Ok(new_fd);
        }
        let entry = self.get(old_fd)?.clone();
        entry.file.inc_ref();
        if new_fd >= self.table.len() {
            self.table.resize(new_fd + 1, None);
        }
        let displaced = self.table[new_fd].take();
        self.table[new_fd] = Some(FdEntry::new(entry.file, entry.flags));
        if let Some(displaced) = displaced {
            if displaced.file.dec_ref()? == 0 {
                log::debug!("[FdTable::dup2] closing handle displaced from fd {new_fd}");
                let _ = displaced.file.fs_ops.clone().close(&displaced.file);
            }
        }
        Ok(new_fd)
    }

    pub fn do_close_on_exec(&mut self) {
        for slot in self.table.iter_mut() {
            if matches!(slot, Some(entry) if entry.flags.contains(FdFlags::CLOEXEC)) {
                *slot = None;
            }
        }
    }

    /// Slot-for-slot copy with each live handle's refcount incremented.
    pub fn fork_copy(&self) -> Self {
        for slot in self.table.iter().flatten() {
            slot.file.inc_ref();
        }
        Self {
            table: self.table.clone(),
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
