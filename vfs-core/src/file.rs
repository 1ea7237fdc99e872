use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::SpinNoIrqLock;
use systype::{SysError, SysResult};

use crate::flags::{DirEntry, FileMode, OpenFlags, SeekFrom, Stat};

type Mutex<T> = SpinNoIrqLock<T>;

static INODE_NUMBER: AtomicUsize = AtomicUsize::new(1);

/// Allocates the next inode number. Shared by every backend so numbers stay
/// unique across mounted filesystems within one VFS instance.
pub fn alloc_ino() -> usize {
    INODE_NUMBER.fetch_add(1, Ordering::Relaxed)
}

/// Path-level operations a filesystem backend installs on the root handle
/// of each mounted superblock. Paths are full VFS-absolute paths, matching
/// how procfs's own children are named (`/proc/<name>`); the switch does
/// not strip the mount-path prefix before dispatch.
///
/// `creat` takes the root handle's own `fs_ops` alongside the path: a
/// freshly created file's handle needs an `Arc<dyn FsOps>` to dispatch
/// through, and the caller (the VFS switch) already holds one on
/// `sb.root`, so it hands it down explicitly instead of the backend
/// fabricating a second `Arc` to itself.
pub trait SysOps: Send + Sync {
    fn mkdir(&self, _path: &str, _mode: FileMode) -> SysResult<()> {
        Err(SysError::ENOSYS)
    }
    fn rmdir(&self, _path: &str) -> SysResult<()> {
        Err(SysError::ENOSYS)
    }
    fn stat(&self, _path: &str) -> SysResult<Stat> {
        Err(SysError::ENOSYS)
    }
    fn creat(&self, _path: &str, _mode: FileMode, _fs_ops: Arc<dyn FsOps>) -> SysResult<Arc<VfsFile>> {
        Err(SysError::ENOSYS)
    }
    fn symlink(&self, _target: &str, _linkpath: &str) -> SysResult<()> {
        Err(SysError::ENOSYS)
    }
}

/// Handle-level operations. `open` and `readlink`/`unlink` still take a
/// path (there is no open handle yet, or none is required);
/// `close`/`read`/`write`/`lseek`/`stat`/`ioctl`/`getdents` act on an
/// already-open [`VfsFile`]. `open` takes its own `Arc<dyn FsOps>` for the
/// same reason `creat` does above.
pub trait FsOps: Send + Sync {
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: FileMode,
        fs_ops: Arc<dyn FsOps>,
    ) -> SysResult<Arc<VfsFile>>;

    fn close(&self, _file: &VfsFile) -> SysResult<()> {
        Ok(())
    }

    fn read(&self, _file: &VfsFile, _buf: &mut [u8], _offset: usize) -> SysResult<usize> {
        Err(SysError::ENOSYS)
    }

    fn write(&self, _file: &VfsFile, _buf: &[u8], _offset: usize) -> SysResult<usize> {
        Err(SysError::ENOSYS)
    }

    fn stat(&self, _file: &VfsFile) -> SysResult<Stat> {
        Err(SysError::ENOSYS)
    }

    fn ioctl(&self, _file: &VfsFile, _cmd: usize, _arg: usize) -> SysResult<usize> {
        Err(SysError::ENOSYS)
    }

    /// Lists directory children starting after the first `skip` eligible
    /// entries, emitting at most `max_entries`. Callers get structured
    /// entries directly rather than a raw dirent-buffer-plus-byte-count
    /// framing, since there is no syscall trap boundary here to preserve
    /// that ABI detail for.
    fn getdents(&self, _file: &VfsFile, _skip: usize, _max_entries: usize) -> SysResult<Vec<DirEntry>> {
        Err(SysError::ENOSYS)
    }

    fn readlink(&self, _path: &str, _buf: &mut [u8]) -> SysResult<usize> {
        Err(SysError::ENOSYS)
    }

    fn unlink(&self, _path: &str) -> SysResult<()> {
        Err(SysError::ENOSYS)
    }

    /// Whether `lseek` is meaningful on handles this backend opens.
    /// Overridden `false` by the pipe backend, where `lseek` always fails
    /// `EINVAL`.
    fn seekable(&self) -> bool {
        true
    }
}

struct VfsFileInner {
    length: usize,
    flags: OpenFlags,
    f_pos: usize,
}

/// The reference-counted, open-file handle. Drops the intrusive device
/// pointer and sibling-list link a block-device-backed handle would carry —
/// there is no block device here — and models per-backend bookkeeping as an
/// ordinary owned collection instead.
pub struct VfsFile {
    pub name: String,
    pub ino: usize,
    pub uid: u32,
    pub gid: u32,
    pub mode: FileMode,
    pub sys_ops: Option<Arc<dyn SysOps>>,
    pub fs_ops: Arc<dyn FsOps>,
    inner: Mutex<VfsFileInner>,
    /// Guards the refcount specifically, distinct from `inner` — a dedicated
    /// spinlock rather than piggybacking on the same lock as position/flags.
    refcount: Mutex<isize>,
}

impl VfsFile {
    pub fn new(
        name: impl Into<String>,
        uid: u32,
        gid: u32,
        mode: FileMode,
        length: usize,
        flags: OpenFlags,
        sys_ops: Option<Arc<dyn SysOps>>,
        fs_ops: Arc<dyn FsOps>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ino: alloc_ino(),
            uid,
            gid,
            mode,
            sys_ops,
            fs_ops,
            inner: Mutex::new(VfsFileInner {
                length,
                flags,
                f_pos: 0,
            }),
            refcount: Mutex::new(1),
        })
    }

    pub fn length(&self) -> usize {
        self.inner.lock().length
    }

    pub fn set_length(&self, length: usize) {
        self.inner.lock().length = length;
    }

    pub fn flags(&self) -> OpenFlags {
        self.inner.lock().flags.clone()
    }

    pub fn set_flags(&self, flags: OpenFlags) {
        self.inner.lock().flags = flags;
    }

    pub fn f_pos(&self) -> usize {
        self.inner.lock().f_pos
    }

    pub fn set_f_pos(&self, pos: usize) {
        self.inner.lock().f_pos = pos;
    }

    /// Applies a `SEEK_SET`/`SEEK_CUR`/`SEEK_END` move and stores the
    /// result. A resulting negative offset is rejected with `EINVAL`.
    pub fn seek(&self, pos: SeekFrom) -> SysResult<usize> {
        let mut inner = self.inner.lock();
        let base: i64 = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => inner.f_pos as i64 + off,
            SeekFrom::End(off) => inner.length as i64 + off,
        };
        if base < 0 {
            return Err(SysError::EINVAL);
        }
        inner.f_pos = base as usize;
        Ok(inner.f_pos)
    }

    pub fn refcount(&self) -> isize {
        *self.refcount.lock()
    }

    /// Bumps the refcount; used by `dup` and by `fork`'s slot-for-slot copy
    /// of the fd table.
    pub fn inc_ref(&self) {
        *self.refcount.lock() += 1;
    }

    /// Drops the refcount by one and returns the resulting value. Callers
    /// (the VFS switch's `close`) invoke the backend's `close` only when
    /// this reaches zero. A handle whose count is already `<= 0` being
    /// closed again is a fatal internal-invariant violation; debug builds
    /// catch it immediately, release builds log it and report `EINVAL` to
    /// the caller instead of corrupting further.
    pub fn dec_ref(&self) -> SysResult<isize> {
        let mut count = self.refcount.lock();
        debug_assert!(*count > 0, "VfsFile refcount underflow on {}", self.name);
        if *count <= 0 {
            log::warn!("[VfsFile::dec_ref] refcount underflow on {}", self.name);
            return Err(SysError::EINVAL);
        }
        *count -= 1;
        Ok(*count)
    }

    pub fn path_display(&self) -> String {
        self.name.to_string()
    }
}
