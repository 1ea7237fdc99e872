//! Flat in-memory filesystem backed by a boot-time module image. Up to
//! `INITRD_MAX_FILES` records, each naming its full path inside the
//! filesystem; directories are zero-length entries of type `Dir`.

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use sync::SpinLock;
use systype::{SysError, SysResult};
use vfs_core::{
    DirEntry, FileMode, FsOps, InodeType, OpenFlags, Stat, SysOps, TimeSpec, VfsFile,
    INITRD_MAX_FILES, MAX_NAME_LEN,
};

type Mutex<T> = SpinLock<T>;

/// Bytes reserved for a regular file's content at creation time. A write
/// that would grow a file past its own reserved span runs into the next
/// record's reserved span and is refused with `ENOSPC` rather than
/// relocated.
const RECORD_SPAN: usize = 4096;

struct InitrdRecord {
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
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// Fixed-size record table plus its backing byte store. A slot is free iff
/// it is `None`, using `Option<InitrdRecord>` rather than a magic sentinel
/// so the invariant is checked by the type system.
pub struct InitrdFs {
    records: Mutex<Vec<Option<InitrdRecord>>>,
    data: Mutex<Vec<u8>>,
}

impl InitrdFs {
    pub fn new() -> Arc<Self> {
        let mut records = vec![None; INITRD_MAX_FILES];
        records[0] = Some(InitrdRecord {
            ino: vfs_core::alloc_ino(),
            name: "/".to_string(),
            itype: InodeType::Dir,
            mode: FileMode::S_IFDIR | FileMode::PERM_MASK,
            uid: 0,
            gid: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
            offset: 0,
            length: 0,
        });
        Arc::new(Self {
            records: Mutex::new(records),
            data: Mutex::new(Vec::new()),
        })
    }

    fn find_index(records: &[Option<InitrdRecord>], name: &str) -> Option<usize> {
        records
            .iter()
            .position(|r| r.as_ref().is_some_and(|r| r.name == name))
    }

    fn find_index_by_ino(records: &[Option<InitrdRecord>], ino: usize) -> Option<usize> {
        records.iter().position(|r| r.as_ref().is_some_and(|r| r.ino == ino))
    }

    fn stat_record(r: &InitrdRecord) -> Stat {
        Stat {
            ino: r.ino as u64,
            mode: r.mode.bits(),
            nlink: 1,
            uid: r.uid,
            gid: r.gid,
            size: r.length as u64,
            atime: r.atime,
            mtime: r.mtime,
            ctime: r.ctime,
        }
    }
}

impl SysOps for InitrdFs {
    fn mkdir(&self, path: &str, mode: FileMode) -> SysResult<()> {
        if path.len() > MAX_NAME_LEN {
            return Err(SysError::ENAMETOOLONG);
        }
        let mut records = self.records.lock();
        if Self::find_index(&records, path).is_some() {
            return Err(SysError::EEXIST);
        }
        let parent = parent_of(path);
        match Self::find_index(&records, &parent) {
            None => return Err(SysError::ENOENT),
            Some(idx) if records[idx].as_ref().unwrap().itype != InodeType::Dir => {
                return Err(SysError::ENOTDIR)
            }
            Some(_) => {}
        }
        let slot = records.iter().position(Option::is_none).ok_or(SysError::ENOSPC)?;
        records[slot] = Some(InitrdRecord {
            ino: vfs_core::alloc_ino(),
            name: path.to_string(),
            itype: InodeType::Dir,
            mode: mode | FileMode::S_IFDIR,
            uid: 0,
            gid: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
            offset: 0,
            length: 0,
        });
        Ok(())
    }

    fn rmdir(&self, path: &str) -> SysResult<()> {
        let mut records = self.records.lock();
        let idx = Self::find_index(&records, path).ok_or(SysError::ENOENT)?;
        if records[idx].as_ref().unwrap().itype != InodeType::Dir {
            return Err(SysError::ENOTDIR);
        }
        let has_child = records
            .iter()
            .any(|r| r.as_ref().is_some_and(|r| r.name != path && parent_of(&r.name) == path));
        if has_child {
            return Err(SysError::ENOTEMPTY);
        }
        records[idx] = None;
        Ok(())
    }

    fn stat(&self, path: &str) -> SysResult<Stat> {
        let records = self.records.lock();
        let idx = Self::find_index(&records, path).ok_or(SysError::ENOENT)?;
        Ok(Self::stat_record(records[idx].as_ref().unwrap()))
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
        if linkpath.len() > MAX_NAME_LEN {
            return Err(SysError::ENAMETOOLONG);
        }
        let mut records = self.records.lock();
        if Self::find_index(&records, linkpath).is_some() {
            return Err(SysError::EEXIST);
        }
        let parent = parent_of(linkpath);
        match Self::find_index(&records, &parent) {
            None => return Err(SysError::ENOENT),
            Some(p) if records[p].as_ref().unwrap().itype != InodeType::Dir => {
                return Err(SysError::ENOTDIR)
            }
            Some(_) => {}
        }
        let slot = records.iter().position(Option::is_none).ok_or(SysError::ENOSPC)?;
        let target_bytes = target.as_bytes();
        if target_bytes.len() > RECORD_SPAN {
            return Err(SysError::ENAMETOOLONG);
        }
        let offset = {
            let mut data = self.data.lock();
            let offset = data.len();
            data.resize(offset + RECORD_SPAN, 0);
            data[offset..offset + target_bytes.len()].copy_from_slice(target_bytes);
            offset
        };
        records[slot] = Some(InitrdRecord {
            ino: vfs_core::alloc_ino(),
            name: linkpath.to_string(),
            itype: InodeType::SymLink,
            mode: FileMode::S_IFLNK | FileMode::PERM_MASK,
            uid: 0,
            gid: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
            offset,
            length: target_bytes.len(),
        });
        Ok(())
    }
}

impl FsOps for InitrdFs {
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
        let mut records = self.records.lock();
        let mut idx = Self::find_index(&records, path);

        if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) && idx.is_some()
        {
            return Err(SysError::EEXIST);
        }

        if idx.is_none() {
            if !flags.contains(OpenFlags::O_CREAT) {
                return Err(SysError::ENOENT);
            }
            let parent = parent_of(path);
            match Self::find_index(&records, &parent) {
                None => return Err(SysError::ENOENT),
                Some(p) if records[p].as_ref().unwrap().itype != InodeType::Dir => {
                    return Err(SysError::ENOTDIR)
                }
                Some(_) => {}
            }
            let slot = records.iter().position(Option::is_none).ok_or(SysError::ENOSPC)?;
            let offset = {
                let mut data = self.data.lock();
                let offset = data.len();
                data.resize(offset + RECORD_SPAN, 0);
                offset
            };
            records[slot] = Some(InitrdRecord {
                ino: vfs_core::alloc_ino(),
                name: path.to_string(),
                itype: InodeType::File,
                mode: mode | FileMode::S_IFREG,
                uid: 0,
                gid: 0,
                atime: TimeSpec::default(),
                mtime: TimeSpec::default(),
                ctime: TimeSpec::default(),
                offset,
                length: 0,
            });
            idx = Some(slot);
        }

        let idx = idx.unwrap();
        let record = records[idx].as_mut().unwrap();

        if flags.contains(OpenFlags::O_DIRECTORY) && record.itype != InodeType::Dir {
            return Err(SysError::ENOTDIR);
        }
        if record.itype == InodeType::Dir && flags.writable() {
            return Err(SysError::EISDIR);
        }
        if flags.contains(OpenFlags::O_TRUNC) && record.itype == InodeType::File {
            record.length = 0;
        }

        Ok(VfsFile::new(
            record.name.clone(),
            record.uid,
            record.gid,
            record.mode,
            record.length,
            flags,
            None,
            fs_ops,
        ))
    }

    fn read(&self, file: &VfsFile, buf: &mut [u8], offset: usize) -> SysResult<usize> {
        let records = self.records.lock();
        let idx = Self::find_index_by_ino(&records, file.ino).ok_or(SysError::ENOENT)?;
        let record = records[idx].as_ref().unwrap();
        if offset >= record.length {
            return Ok(0);
        }
        let n = buf.len().min(record.length - offset);
        let data = self.data.lock();
        buf[..n].copy_from_slice(&data[record.offset + offset..record.offset + offset + n]);
        Ok(n)
    }

    fn write(&self, file: &VfsFile, buf: &[u8], offset: usize) -> SysResult<usize> {
        let mut records = self.records.lock();
        let idx = Self::find_index_by_ino(&records, file.ino).ok_or(SysError::ENOENT)?;
        let record = records[idx].as_mut().unwrap();
        let new_len = offset.checked_add(buf.len()).ok_or(SysError::EOVERFLOW)?;
        if new_len > RECORD_SPAN {
            return Err(SysError::ENOSPC);
        }
        let mut data = self.data.lock();
        data[record.offset + offset..record.offset + new_len].copy_from_slice(buf);
        if new_len > record.length {
            record.length = new_len;
        }
        file.set_length(record.length);
        Ok(buf.len())
    }

    fn stat(&self, file: &VfsFile) -> SysResult<Stat> {
        let records = self.records.lock();
        let idx = Self::find_index_by_ino(&records, file.ino).ok_or(SysError::ENOENT)?;
        Ok(Self::stat_record(records[idx].as_ref().unwrap()))
    }

    fn getdents(&self, file: &VfsFile, skip: usize, max_entries: usize) -> SysResult<Vec<DirEntry>> {
        let records = self.records.lock();
        let mut out = Vec::new();
        let children = records.iter().filter_map(|r| r.as_ref()).filter(|r| {
            r.name != file.name && parent_of(&r.name) == file.name
        });
        for r in children.skip(skip).take(max_entries) {
            out.push(DirEntry {
                ino: r.ino as u64,
                off: out.len() as u64,
                reclen: r.name.len() as u16,
                itype: r.itype,
                name: r
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(&r.name)
                    .to_string(),
            });
        }
        Ok(out)
    }

    fn readlink(&self, path: &str, buf: &mut [u8]) -> SysResult<usize> {
        let records = self.records.lock();
        let idx = Self::find_index(&records, path).ok_or(SysError::ENOENT)?;
        let record = records[idx].as_ref().unwrap();
        if record.itype != InodeType::SymLink {
            return Err(SysError::EINVAL);
        }
        let n = buf.len().min(record.length);
        let data = self.data.lock();
        buf[..n].copy_from_slice(&data[record.offset..record.offset + n]);
        Ok(n)
    }

    fn unlink(&self, path: &str) -> SysResult<()> {
        let mut records = self.records.lock();
        let idx = Self::find_index(&records, path).ok_or(SysError::ENOENT)?;
        if records[idx].as_ref().unwrap().itype == InodeType::Dir {
            return Err(SysError::EISDIR);
        }
        records[idx] = None;
        Ok(())
    }
}

/// Registers with the switch under the name `"initrd"`; `mount` ignores
/// `device_args` beyond requiring it resolve (there is no real boot image
/// to load bytes from in this workspace — content is populated by `write`
/// after mount, the same way a shell populates a tmpfs).
pub struct InitrdFsType;

impl crate::switch::FileSystemType for InitrdFsType {
    fn name(&self) -> &str {
        "initrd"
    }

    fn mount(&self, _mount_path: &str, _device_args: &str) -> SysResult<Arc<VfsFile>> {
        let fs = InitrdFs::new();
        let fs_ops: Arc<dyn FsOps> = fs.clone();
        let sys_ops: Arc<dyn SysOps> = fs.clone();
        Ok(VfsFile::new(
            "/",
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

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn opened(fs: &Arc<InitrdFs>, path: &str, flags: OpenFlags, mode: FileMode) -> SysResult<Arc<VfsFile>> {
        fs.open(path, flags, mode, fs.clone())
    }

    #[test]
    fn mkdir_then_open_create_then_read_back() {
        let fs = InitrdFs::new();
        fs.mkdir("/dir", FileMode::PERM_MASK).unwrap();
        let f = opened(
            &fs,
            "/dir/hello",
            OpenFlags::O_CREAT | OpenFlags::O_WRONLY,
            FileMode::PERM_MASK,
        )
        .unwrap();
        let n = fs.write(&f, b"hi", 0).unwrap();
        assert_eq!(n, 2);

        let f2 = opened(&fs, "/dir/hello", OpenFlags::O_RDONLY, FileMode::empty()).unwrap();
        let mut buf = [0u8; 4];
        let n = fs.read(&f2, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(fs.read(&f2, &mut buf, n).unwrap(), 0);
    }

    #[test]
    fn mkdir_missing_parent_is_enoent() {
        let fs = InitrdFs::new();
        assert_eq!(
            fs.mkdir("/a/b", FileMode::PERM_MASK).unwrap_err(),
            SysError::ENOENT
        );
    }

    #[test]
    fn mkdir_duplicate_is_eexist() {
        let fs = InitrdFs::new();
        fs.mkdir("/a", FileMode::PERM_MASK).unwrap();
        assert_eq!(fs.mkdir("/a", FileMode::PERM_MASK).unwrap_err(), SysError::EEXIST);
    }

    #[test]
    fn rmdir_nonempty_is_enotempty() {
        let fs = InitrdFs::new();
        fs.mkdir("/a", FileMode::PERM_MASK).unwrap();
        fs.mkdir("/a/b", FileMode::PERM_MASK).unwrap();
        assert_eq!(fs.rmdir("/a").unwrap_err(), SysError::ENOTEMPTY);
        fs.rmdir("/a/b").unwrap();
        fs.rmdir("/a").unwrap();
    }

    #[test]
    fn open_excl_on_existing_file_fails() {
        let fs = InitrdFs::new();
        opened(&fs, "/x", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK).unwrap();
        let err = opened(
            &fs,
            "/x",
            OpenFlags::O_CREAT | OpenFlags::O_EXCL | OpenFlags::O_WRONLY,
            FileMode::PERM_MASK,
        )
        .unwrap_err();
        assert_eq!(err, SysError::EEXIST);
    }

    #[test]
    fn opening_directory_for_write_is_eisdir() {
        let fs = InitrdFs::new();
        fs.mkdir("/d", FileMode::PERM_MASK).unwrap();
        let err = opened(&fs, "/d", OpenFlags::O_WRONLY, FileMode::empty()).unwrap_err();
        assert_eq!(err, SysError::EISDIR);
    }

    #[test]
    fn write_past_reserved_span_is_enospc() {
        let fs = InitrdFs::new();
        let f = opened(&fs, "/big", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK).unwrap();
        let err = fs.write(&f, &[0u8; RECORD_SPAN + 1], 0).unwrap_err();
        assert_eq!(err, SysError::ENOSPC);
    }

    #[test]
    fn getdents_lists_direct_children_only() {
        let fs = InitrdFs::new();
        fs.mkdir("/a", FileMode::PERM_MASK).unwrap();
        opened(&fs, "/a/b", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK).unwrap();
        fs.mkdir("/a/c", FileMode::PERM_MASK).unwrap();
        let dir = opened(&fs, "/a", OpenFlags::O_DIRECTORY | OpenFlags::O_RDONLY, FileMode::empty()).unwrap();
        let entries = fs.getdents(&dir, 0, 10).unwrap();
        let mut names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, alloc::vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn symlink_then_readlink_round_trips() {
        let fs = InitrdFs::new();
        fs.symlink("/target", "/link").unwrap();
        let mut buf = [0u8; 64];
        let n = fs.readlink("/link", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"/target");
    }

    #[test]
    fn readlink_on_non_symlink_is_einval() {
        let fs = InitrdFs::new();
        opened(&fs, "/f", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.readlink("/f", &mut buf).unwrap_err(), SysError::EINVAL);
    }
}
