//! A thin collaborator layer: a [`Task`] standing in for the scheduler's
//! view of "the current task", and the syscall-shaped entry points a shell
//! or libc would call against it and a [`Vfs`].

#![no_std]

extern crate alloc;

pub mod boot;

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use sync::SpinLock;
use systype::{SysError, SysResult, SyscallResult};
use vfs::{
    Credentials, DirEntry, Fd, FdFlags, FdTable, FileMode, OpenFlags, SeekFrom, Stat, Vfs,
};

/// Per-task state a syscall needs beyond the open `Vfs` itself: identity,
/// working directory, and the fd table.
pub struct Task {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    cwd: SpinLock<String>,
    pub fd_table: SpinLock<FdTable>,
}

impl Task {
    pub fn new(pid: i32, uid: u32, gid: u32) -> Self {
        Self {
            pid,
            uid,
            gid,
            cwd: SpinLock::new("/".to_string()),
            fd_table: SpinLock::new(FdTable::new()),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            pid: self.pid,
            uid: self.uid,
            gid: self.gid,
        }
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, path: String) {
        *self.cwd.lock() = path;
    }

    /// Slot-for-slot fd table copy with a fresh pid, the way `fork` hands a
    /// child task its parent's open files.
    pub fn fork(&self, child_pid: i32) -> Self {
        Self {
            pid: child_pid,
            uid: self.uid,
            gid: self.gid,
            cwd: SpinLock::new(self.cwd()),
            fd_table: SpinLock::new(self.fd_table.lock().fork_copy()),
        }
    }
}

pub fn sys_open(vfs: &Vfs, task: &Task, path: &str, flags: OpenFlags, mode: FileMode) -> SyscallResult {
    let file = vfs.open(path, &task.cwd(), flags, mode, &task.credentials())?;
    task.fd_table.lock().alloc(file, FdFlags::empty())
}

pub fn sys_close(vfs: &Vfs, task: &Task, fd: Fd) -> SyscallResult {
    let entry = task.fd_table.lock().remove(fd)?;
    vfs.close(&entry.file())?;
    Ok(0)
}

pub fn sys_read(task: &Task, fd: Fd, buf: &mut [u8]) -> SyscallResult {
    let file = task.fd_table.lock().get_file(fd)?;
    if !file.flags().readable() {
        return Err(SysError::EBADF);
    }
    let pos = file.f_pos();
    let n = file.fs_ops.read(&file, buf, pos)?;
    file.set_f_pos(pos + n);
    Ok(n)
}

/// `O_APPEND` forces every write to the file's current length regardless of
/// `f_pos`.
pub fn sys_write(task: &Task, fd: Fd, buf: &[u8]) -> SyscallResult {
    let file = task.fd_table.lock().get_file(fd)?;
    if !file.flags().writable() {
        return Err(SysError::EBADF);
    }
    let pos = if file.flags().contains(OpenFlags::O_APPEND) {
        file.length()
    } else {
        file.f_pos()
    };
    let n = file.fs_ops.write(&file, buf, pos)?;
    file.set_f_pos(pos + n);
    Ok(n)
}

pub fn sys_lseek(task: &Task, fd: Fd, pos: SeekFrom) -> SyscallResult {
    let file = task.fd_table.lock().get_file(fd)?;
    let new_pos = vfs::lseek(&file, pos)?;
    file.set_f_pos(new_pos);
    Ok(new_pos)
}

pub fn sys_fstat(task: &Task, fd: Fd) -> SysResult<Stat> {
    let file = task.fd_table.lock().get_file(fd)?;
    file.fs_ops.stat(&file)
}

pub fn sys_getdents(task: &Task, fd: Fd, skip: usize, max_entries: usize) -> SysResult<Vec<DirEntry>> {
    let file = task.fd_table.lock().get_file(fd)?;
    file.fs_ops.getdents(&file, skip, max_entries)
}

pub fn sys_mkdir(vfs: &Vfs, task: &Task, path: &str, mode: FileMode) -> SysResult<()> {
    vfs.mkdir(path, &task.cwd(), mode)
}

pub fn sys_rmdir(vfs: &Vfs, task: &Task, path: &str) -> SysResult<()> {
    vfs.rmdir(path, &task.cwd())
}

pub fn sys_stat(vfs: &Vfs, task: &Task, path: &str) -> SysResult<Stat> {
    vfs.stat(path, &task.cwd())
}

pub fn sys_creat(vfs: &Vfs, task: &Task, path: &str, mode: FileMode) -> SyscallResult {
    let file = vfs.creat(path, &task.cwd(), mode)?;
    task.fd_table.lock().alloc(file, FdFlags::empty())
}

pub fn sys_symlink(vfs: &Vfs, task: &Task, target: &str, linkpath: &str) -> SysResult<()> {
    vfs.symlink(target, linkpath, &task.cwd())
}

pub fn sys_readlink(vfs: &Vfs, task: &Task, path: &str, buf: &mut [u8]) -> SyscallResult {
    vfs.readlink(path, &task.cwd(), buf)
}

pub fn sys_unlink(vfs: &Vfs, task: &Task, path: &str) -> SysResult<()> {
    vfs.unlink(path, &task.cwd())
}

pub fn sys_dup(task: &Task, fd: Fd) -> SyscallResult {
    task.fd_table.lock().dup(fd)
}

pub fn sys_dup2(task: &Task, old_fd: Fd, new_fd: Fd) -> SyscallResult {
    task.fd_table.lock().dup2(old_fd, new_fd)
}

/// `pipe()` — both ends land in `task`'s own fd table, `(read_fd, write_fd)`.
pub fn sys_pipe(task: &Task) -> SysResult<(Fd, Fd)> {
    let (read_end, write_end) = vfs::pipe_create(task.uid, task.gid);
    let mut table = task.fd_table.lock();
    let read_fd = table.alloc(read_end, FdFlags::empty())?;
    let write_fd = table.alloc(write_end, FdFlags::empty())?;
    Ok((read_fd, write_fd))
}

pub fn sys_chdir(vfs: &Vfs, task: &Task, path: &str) -> SysResult<()> {
    let stat = vfs.stat(path, &task.cwd())?;
    let mode = FileMode::from_bits_truncate(stat.mode);
    if mode.itype() != vfs::InodeType::Dir {
        return Err(SysError::ENOTDIR);
    }
    let abs = vfs_core_resolve(vfs, task, path)?;
    task.set_cwd(abs);
    Ok(())
}

fn vfs_core_resolve(vfs: &Vfs, task: &Task, path: &str) -> SysResult<String> {
    use vfs::ResolveFlags;
    vfs::resolve_path(path, &task.cwd(), ResolveFlags::FOLLOW_LINKS, vfs)
}

pub fn sys_mount(vfs: &Vfs, type_name: &str, mount_path: &str, device_args: &str) -> SysResult<()> {
    vfs.mount(type_name, mount_path, device_args)
}

pub fn sys_unmount(vfs: &Vfs, mount_path: &str) -> SysResult<()> {
    vfs.unmount(mount_path)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::boot::boot;

    #[test]
    fn open_write_read_back_through_syscalls() {
        let vfs = boot();
        let task = Task::new(1, 0, 0);
        let fd = sys_creat(&vfs, &task, "/hello", FileMode::PERM_MASK).unwrap();
        assert_eq!(sys_write(&task, fd, b"hi").unwrap(), 2);
        sys_lseek(&task, fd, SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 8];
        let n = sys_read(&task, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
        sys_close(&vfs, &task, fd).unwrap();
    }

    #[test]
    fn pipe_roundtrips_between_two_fds() {
        let vfs = boot();
        let task = Task::new(1, 0, 0);
        let (r, w) = sys_pipe(&task).unwrap();
        sys_write(&task, w, b"abcdef").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(sys_read(&task, r, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        sys_close(&vfs, &task, w).unwrap();
        let mut buf = [0u8; 10];
        let n = sys_read(&task, r, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"def");
        assert_eq!(sys_read(&task, r, &mut buf).unwrap(), 0);
    }

    #[test]
    fn procfs_directory_lists_created_entry_through_syscalls() {
        let vfs = boot();
        let task = Task::new(1, 0, 0);
        sys_mkdir(&vfs, &task, "/proc/a", FileMode::PERM_MASK).unwrap();
        let fd = sys_creat(&vfs, &task, "/proc/a/b", FileMode::PERM_MASK).unwrap();
        sys_close(&vfs, &task, fd).unwrap();

        let dir_fd = sys_open(
            &vfs,
            &task,
            "/proc/a",
            OpenFlags::O_DIRECTORY | OpenFlags::O_RDONLY,
            FileMode::empty(),
        )
        .unwrap();
        let entries = sys_getdents(&task, dir_fd, 0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
    }

    #[test]
    fn open_missing_is_enoent() {
        let vfs = boot();
        let task = Task::new(1, 0, 0);
        let err = sys_open(&vfs, &task, "/nope", OpenFlags::O_RDONLY, FileMode::empty()).unwrap_err();
        assert_eq!(err, SysError::ENOENT);
    }

    #[test]
    fn open_for_write_by_non_owner_is_eacces() {
        let vfs = boot();
        let owner = Task::new(1, 1000, 1000);
        let fd = sys_creat(&vfs, &owner, "/readonly_file", FileMode::S_IRUSR | FileMode::S_IROTH).unwrap();
        sys_close(&vfs, &owner, fd).unwrap();

        let stranger = Task::new(2, 2000, 2000);
        let err = sys_open(&vfs, &stranger, "/readonly_file", OpenFlags::O_WRONLY, FileMode::empty())
            .unwrap_err();
        assert_eq!(err, SysError::EACCES);
    }
}
