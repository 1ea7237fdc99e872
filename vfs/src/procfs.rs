//! Dynamic in-memory filesystem. Every entry may install its own
//! `sys_ops`/`fs_ops`; dispatch consults the entry's table first and falls
//! back to procfs's own generic in-memory storage (the same scheme
//! `InitrdFs` uses) only when the entry installed none.

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use sync::SpinLock;
use systype::{SysError, SysResult};
use vfs_core::{
    DirEntry, FileMode, FsOps, InodeType, OpenFlags, Stat, SysOps, TimeSpec, VfsFile, MAX_NAME_LEN,
};

type Mutex<T> = SpinLock<T>;

const RECORD_SPAN: usize = 4096;

struct ProcEntry {
    ino: usize,
    name: String,
    itype: InodeType,
    mode: FileMode,
    uid: u32,
    gid: u32,
    atime: TimeSpec,
    mtime: TimeSpec,
    ctime: TimeSpec,
    offset: usize,
    length: usize,
    /// Installed by external modules, e.g. a `/proc/<pid>` entry installing
    /// custom read/write. `None` means "use procfs's own generic storage".
    custom_sys_ops: Option<Arc<dyn SysOps>>,
    custom_fs_ops: Option<Arc<dyn FsOps>>,
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

fn child_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(p) => alloc::format!("{p}/{name}"),
        None => alloc::format!("/proc/{name}"),
    }
}

/// `{ magic, inode, flags, mask, name, uid, gid, atime/mtime/ctime,
/// proc_dir_entry, files }`, modelled as a flat `Vec<ProcEntry>` the way
/// `InitrdFs` models its record table — the open handle's own list of live
/// references lives in `VfsFile::refcount` instead of an intrusive
/// per-file `files` list.
pub struct ProcFs {
    entries: Mutex<Vec<ProcEntry>>,
    data: Mutex<Vec<u8>>,
}

impl ProcFs {
    pub fn new() -> Arc<Self> {
        let root = ProcEntry {
            ino: vfs_core::alloc_ino(),
            name: "/proc".to_string(),
            itype: InodeType::Dir,
            mode: FileMode::S_IFDIR | FileMode::PERM_MASK,
            uid: 0,
            gid: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
            offset: 0,
            length: 0,
            custom_sys_ops: None,
            custom_fs_ops: None,
        };
        Arc::new(Self {
            entries: Mutex::new(vec![root]),
            data: Mutex::new(Vec::new()),
        })
    }

    fn find(entries: &[ProcEntry], path: &str) -> Option<usize> {
        entries.iter().position(|e| e.name == path)
    }

    fn find_by_ino(entries: &[ProcEntry], ino: usize) -> Option<usize> {
        entries.iter().position(|e| e.ino == ino)
    }

    fn stat_entry(e: &ProcEntry) -> Stat {
        Stat {
            ino: e.ino as u64,
            mode: e.mode.bits(),
            nlink: 1,
            uid: e.uid,
            gid: e.gid,
            size: e.length as u64,
            atime: e.atime,
            mtime: e.mtime,
            ctime: e.ctime,
        }
    }

    fn create_entry(
        &self,
        path: &str,
        itype: InodeType,
        mode: FileMode,
        sys_ops: Option<Arc<dyn SysOps>>,
        fs_ops: Option<Arc<dyn FsOps>>,
    ) -> SysResult<()> {
        if path.len() > MAX_NAME_LEN {
            return Err(SysError::ENAMETOOLONG);
        }
        let mut entries = self.entries.lock();
        if Self::find(&entries, path).is_some() {
            return Err(SysError::EEXIST);
        }
        let parent = parent_of(path);
        match Self::find(&entries, &parent) {
            None => return Err(SysError::ENOENT),
            Some(p) if entries[p].itype != InodeType::Dir => return Err(SysError::ENOTDIR),
            Some(_) => {}
        }
        entries.push(ProcEntry {
            ino: vfs_core::alloc_ino(),
            name: path.to_string(),
            itype,
            mode,
            uid: 0,
            gid: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
            offset: 0,
            length: 0,
            custom_sys_ops: sys_ops,
            custom_fs_ops: fs_ops,
        });
        Ok(())
    }

    fn destroy_entry(&self, path: &str) -> SysResult<()> {
        let mut entries = self.entries.lock();
        let idx = Self::find(&entries, path).ok_or(SysError::ENOENT)?;
        let has_child = entries.iter().any(|e| e.name != path && parent_of(&e.name) == path);
        if has_child {
            return Err(SysError::ENOTEMPTY);
        }
        entries.remove(idx);
        Ok(())
    }

    /// `proc_mkdir(name, parent)`.
    pub fn proc_mkdir(&self, name: &str, parent: Option<&str>) -> SysResult<String> {
        let path = child_path(parent, name);
        self.create_entry(&path, InodeType::Dir, FileMode::S_IFDIR | FileMode::PERM_MASK, None, None)?;
        Ok(path)
    }

    pub fn proc_rmdir(&self, name: &str, parent: Option<&str>) -> SysResult<()> {
        let path = child_path(parent, name);
        let entries = self.entries.lock();
        let idx = Self::find(&entries, &path).ok_or(SysError::ENOENT)?;
        if entries[idx].itype != InodeType::Dir {
            return Err(SysError::ENOTDIR);
        }
        drop(entries);
        self.destroy_entry(&path)
    }

    /// `proc_create_entry(name, parent)`. Use
    /// [`Self::proc_create_entry_with_ops`] to additionally install custom
    /// `sys_ops`/`fs_ops` for an external module's entry.
    pub fn proc_create_entry(&self, name: &str, parent: Option<&str>) -> SysResult<String> {
        self.proc_create_entry_with_ops(name, parent, None, None)
    }

    pub fn proc_create_entry_with_ops(
        &self,
        name: &str,
        parent: Option<&str>,
        sys_ops: Option<Arc<dyn SysOps>>,
        fs_ops: Option<Arc<dyn FsOps>>,
    ) -> SysResult<String> {
        let path = child_path(parent, name);
        self.create_entry(&path, InodeType::File, FileMode::S_IFREG | FileMode::PERM_MASK, sys_ops, fs_ops)?;
        Ok(path)
    }

    pub fn proc_destroy_entry(&self, name: &str, parent: Option<&str>) -> SysResult<()> {
        let path = child_path(parent, name);
        self.destroy_entry(&path)
    }

    pub fn proc_dir_entry_get(&self, name: &str, parent: Option<&str>) -> SysResult<Stat> {
        let path = child_path(parent, name);
        self.stat(&path)
    }
}

impl SysOps for ProcFs {
    fn mkdir(&self, path: &str, mode: FileMode) -> SysResult<()> {
        self.create_entry(path, InodeType::Dir, mode | FileMode::S_IFDIR, None, None)
    }

    fn rmdir(&self, path: &str) -> SysResult<()> {
        let entries = self.entries.lock();
        let idx = Self::find(&entries, path).ok_or(SysError::ENOENT)?;
        if entries[idx].itype != InodeType::Dir {
            return Err(SysError::ENOTDIR);
        }
        drop(entries);
        self.destroy_entry(path)
    }

    /// Consults the entry's own `custom_sys_ops` first; falls back to the
    /// generic stat derived from the stored record.
    fn stat(&self, path: &str) -> SysResult<Stat> {
        let entries = self.entries.lock();
        let idx = Self::find(&entries, path).ok_or(SysError::ENOENT)?;
        let entry = &entries[idx];
        if let Some(ops) = &entry.custom_sys_ops {
            return ops.stat(path);
        }
        Ok(Self::stat_entry(entry))
    }

    fn creat(&self, path: &str, mode: FileMode, fs_ops: Arc<dyn FsOps>) -> SysResult<Arc<VfsFile>> {
        self.open(
            path,
            OpenFlags::O_CREAT | OpenFlags::O_WRONLY | OpenFlags::O_TRUNC,
            mode,
            fs_ops,
        )
    }

    fn symlink(&self, target: &str, linkpath: &str) -> SysResult<()> {
        self.create_entry(linkpath, InodeType::SymLink, FileMode::S_IFLNK | FileMode::PERM_MASK, None, None)?;
        let mut entries = self.entries.lock();
        let idx = Self::find(&entries, linkpath).unwrap();
        let target_bytes = target.as_bytes();
        let mut data = self.data.lock();
        let offset = data.len();
        data.extend_from_slice(target_bytes);
        entries[idx].offset = offset;
        entries[idx].length = target_bytes.len();
        Ok(())
    }
}

impl FsOps for ProcFs {
    /// An entry with custom `fs_ops` installed is opened through those ops
    /// directly — the returned handle's `fs_ops` field *is* the custom
    /// implementation, so subsequent read/write/close bypass `ProcFs`
    /// entirely for the whole handle-level table, not per call.
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: FileMode,
        fs_ops: Arc<dyn FsOps>,
    ) -> SysResult<Arc<VfsFile>> {
        if path.len() > MAX_NAME_LEN {
            return Err(SysError::ENAMETOOLONG);
        }
        let mut entries = self.entries.lock();
        let mut idx = Self::find(&entries, path);

        if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) && idx.is_some() {
            return Err(SysError::EEXIST);
        }

        if idx.is_none() {
            if !flags.contains(OpenFlags::O_CREAT) {
                return Err(SysError::ENOENT);
            }
            let parent = parent_of(path);
            match Self::find(&entries, &parent) {
                None => return Err(SysError::ENOENT),
                Some(p) if entries[p].itype != InodeType::Dir => return Err(SysError::ENOTDIR),
                Some(_) => {}
            }
            entries.push(ProcEntry {
                ino: vfs_core::alloc_ino(),
                name: path.to_string(),
                itype: InodeType::File,
                mode: mode | FileMode::S_IFREG,
                uid: 0,
                gid: 0,
                atime: TimeSpec::default(),
                mtime: TimeSpec::default(),
                ctime: TimeSpec::default(),
                offset: 0,
                length: 0,
                custom_sys_ops: None,
                custom_fs_ops: None,
            });
            idx = Some(entries.len() - 1);
        }

        let idx = idx.unwrap();

        if let Some(custom) = entries[idx].custom_fs_ops.clone() {
            return custom.open(path, flags, mode, custom.clone());
        }

        if flags.contains(OpenFlags::O_DIRECTORY) && entries[idx].itype != InodeType::Dir {
            return Err(SysError::ENOTDIR);
        }
        if entries[idx].itype == InodeType::Dir && flags.writable() {
            return Err(SysError::EISDIR);
        }
        if flags.contains(OpenFlags::O_TRUNC) && entries[idx].itype == InodeType::File {
            entries[idx].length = 0;
        }

        let entry = &entries[idx];
        Ok(VfsFile::new(
            entry.name.clone(),
            entry.uid,
            entry.gid,
            entry.mode,
            entry.length,
            flags,
            None,
            fs_ops,
        ))
    }

    fn read(&self, file: &VfsFile, buf: &mut [u8], offset: usize) -> SysResult<usize> {
        let entries = self.entries.lock();
        let idx = Self::find_by_ino(&entries, file.ino).ok_or(SysError::ENOENT)?;
        let entry = &entries[idx];
        if offset >= entry.length {
            return Ok(0);
        }
        let n = buf.len().min(entry.length - offset);
        let data = self.data.lock();
        buf[..n].copy_from_slice(&data[entry.offset + offset..entry.offset + offset + n]);
        Ok(n)
    }

    fn write(&self, file: &VfsFile, buf: &[u8], offset: usize) -> SysResult<usize> {
        let mut entries = self.entries.lock();
        let idx = Self::find_by_ino(&entries, file.ino).ok_or(SysError::ENOENT)?;
        let new_len = offset.checked_add(buf.len()).ok_or(SysError::EOVERFLOW)?;
        if new_len > RECORD_SPAN {
            return Err(SysError::ENOSPC);
        }
        let mut data = self.data.lock();
        let entry = &mut entries[idx];
        if entry.offset == 0 && entry.length == 0 {
            entry.offset = data.len();
        }
        let needed = entry.offset + new_len;
        if data.len() < needed {
            data.resize(needed, 0);
        }
        data[entry.offset + offset..entry.offset + new_len].copy_from_slice(buf);
        if new_len > entry.length {
            entry.length = new_len;
        }
        file.set_length(entry.length);
        Ok(buf.len())
    }

    fn stat(&self, file: &VfsFile) -> SysResult<Stat> {
        let entries = self.entries.lock();
        let idx = Self::find_by_ino(&entries, file.ino).ok_or(SysError::ENOENT)?;
        let entry = &entries[idx];
        if let Some(ops) = &entry.custom_sys_ops {
            return ops.stat(&entry.name);
        }
        Ok(Self::stat_entry(entry))
    }

    fn getdents(&self, file: &VfsFile, skip: usize, max_entries: usize) -> SysResult<Vec<DirEntry>> {
        let entries = self.entries.lock();
        let mut out = Vec::new();
        let children = entries
            .iter()
            .filter(|e| e.name != file.name && parent_of(&e.name) == file.name);
        for e in children.skip(skip).take(max_entries) {
            out.push(DirEntry {
                ino: e.ino as u64,
                off: out.len() as u64,
                reclen: e.name.len() as u16,
                itype: e.itype,
                name: e.name.rsplit('/').next().unwrap_or(&e.name).to_string(),
            });
        }
        Ok(out)
    }

    fn readlink(&self, path: &str, buf: &mut [u8]) -> SysResult<usize> {
        let entries = self.entries.lock();
        let idx = Self::find(&entries, path).ok_or(SysError::ENOENT)?;
        let entry = &entries[idx];
        if entry.itype != InodeType::SymLink {
            return Err(SysError::EINVAL);
        }
        let n = buf.len().min(entry.length);
        let data = self.data.lock();
        buf[..n].copy_from_slice(&data[entry.offset..entry.offset + n]);
        Ok(n)
    }

    /// An earlier variant returned `EEXIST` when the entry *was* found,
    /// making unlink impossible. Corrected here: fail `ENOENT` when absent,
    /// succeed when present.
    fn unlink(&self, path: &str) -> SysResult<()> {
        let mut entries = self.entries.lock();
        let idx = Self::find(&entries, path).ok_or(SysError::ENOENT)?;
        if entries[idx].itype == InodeType::Dir {
            return Err(SysError::EISDIR);
        }
        entries.remove(idx);
        Ok(())
    }
}

pub struct ProcFsType;

impl crate::switch::FileSystemType for ProcFsType {
    fn name(&self) -> &str {
        "procfs"
    }

    fn mount(&self, _mount_path: &str, _device_args: &str) -> SysResult<Arc<VfsFile>> {
        let fs = ProcFs::new();
        let fs_ops: Arc<dyn FsOps> = fs.clone();
        let sys_ops: Arc<dyn SysOps> = fs.clone();
        Ok(VfsFile::new(
            "/proc",
            0,
            0,
            FileMode::S_IFDIR | FileMode::PERM_MASK,
            0,
            OpenFlags::O_RDONLY,
            Some(sys_ops),
            fs_ops,
        ))
    }
}
