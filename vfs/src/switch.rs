//! The VFS switch: filesystem type registry, the mounted superblock list,
//! and dispatch of every path- or handle-addressed operation to the backend
//! bound to it.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
};

use sync::SpinLock;
use systype::{SysError, SysResult};
use vfs_core::{
    resolve_path, vfs_open_permitted, Credentials, FileMode, LinkReader, NoLinks, OpenFlags,
    ResolveFlags, Stat, VfsFile,
};

type Mutex<T> = SpinLock<T>;

/// A named filesystem descriptor: `mount` turns a mount path and a
/// device-argument string into the root handle of a fresh instance.
pub trait FileSystemType: Send + Sync {
    fn name(&self) -> &str;
    fn mount(&self, mount_path: &str, device_args: &str) -> SysResult<Arc<VfsFile>>;
}

/// `{ name, mount path, type, root file }`. The mount-list link is the
/// `Vfs`'s owning `BTreeMap`, not an intrusive field.
pub struct SuperBlock {
    pub fs_type_name: String,
    pub mount_path: String,
    pub root: Arc<VfsFile>,
}

/// Process-wide VFS state: the filesystem-type registry and the mounted
/// superblock list, each behind its own spinlock, taken only across
/// structural mutation. Dispatch itself only reads the superblock list
/// under the lock long enough to clone the `Arc` it needs.
pub struct Vfs {
    types: Mutex<BTreeMap<String, Arc<dyn FileSystemType>>>,
    superblocks: Mutex<BTreeMap<String, Arc<SuperBlock>>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            types: Mutex::new(BTreeMap::new()),
            superblocks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register_filesystem(&self, ty: Arc<dyn FileSystemType>) -> SysResult<()> {
        let mut types = self.types.lock();
        if types.contains_key(ty.name()) {
            return Err(SysError::EEXIST);
        }
        log::debug!("[Vfs::register_filesystem] registered {}", ty.name());
        types.insert(ty.name().to_string(), ty);
        Ok(())
    }

    /// Removes from the registry; superblocks already mounted from this
    /// type are unaffected.
    pub fn unregister_filesystem(&self, name: &str) {
        self.types.lock().remove(name);
    }

    pub fn mount(&self, type_name: &str, mount_path: &str, device_args: &str) -> SysResult<()> {
        if !vfs_core::is_absolute(mount_path) {
            return Err(SysError::EINVAL);
        }
        let ty = self
            .types
            .lock()
            .get(type_name)
            .cloned()
            .ok_or(SysError::ENXIO)?;
        let resolved_device = resolve_path(device_args, "/", ResolveFlags::empty(), &NoLinks)?;
        let root = ty.mount(mount_path, &resolved_device)?;
        log::debug!("[Vfs::mount] {type_name} mounted at {mount_path}");
        self.superblocks.lock().insert(
            mount_path.to_string(),
            Arc::new(SuperBlock {
                fs_type_name: type_name.to_string(),
                mount_path: mount_path.to_string(),
                root,
            }),
        );
        Ok(())
    }

    /// Inverse of `mount`. Refuses to remove `/` while anything else remains
    /// mounted under it.
    pub fn unmount(&self, mount_path: &str) -> SysResult<()> {
        let mut superblocks = self.superblocks.lock();
        if !superblocks.contains_key(mount_path) {
            return Err(SysError::EINVAL);
        }
        if mount_path == "/" {
            let others_remain = superblocks.keys().any(|p| p != "/");
            if others_remain {
                log::warn!("[Vfs::unmount] refusing to unmount / while other mounts remain");
                return Err(SysError::EINVAL);
            }
        }
        superblocks.remove(mount_path);
        Ok(())
    }

    /// Returns the superblock whose mount path is the longest prefix of
    /// `abs_path`.
    pub fn get_superblock(&self, abs_path: &str) -> SysResult<Arc<SuperBlock>> {
        self.superblocks
            .lock()
            .iter()
            .filter(|(mount_path, _)| {
                mount_path.as_str() == "/" || abs_path.starts_with(mount_path.as_str())
            })
            .max_by_key(|(mount_path, _)| mount_path.len())
            .map(|(_, sb)| sb.clone())
            .ok_or(SysError::ENOENT)
    }

    fn resolve(&self, path: &str, cwd: &str, flags: ResolveFlags) -> SysResult<String> {
        resolve_path(path, cwd, flags, self.link_reader())
    }

    fn link_reader(&self) -> &dyn LinkReader {
        self
    }

    pub fn open(
        &self,
        path: &str,
        cwd: &str,
        flags: OpenFlags,
        mode: FileMode,
        requester: &Credentials,
    ) -> SysResult<Arc<VfsFile>> {
        let mut resolve_flags = ResolveFlags::FOLLOW_LINKS;
        if flags.contains(OpenFlags::O_CREAT) {
            resolve_flags |= ResolveFlags::CREAT_LAST_COMPONENT;
        }
        let abs = self.resolve(path, cwd, resolve_flags)?;
        let sb = self.get_superblock(&abs)?;

        match sb.root.sys_ops.as_ref().map(|ops| ops.stat(&abs)) {
            Some(Ok(stat)) => {
                let existing_mode = FileMode::from_bits_truncate(stat.mode);
                let permitted = vfs_open_permitted(
                    stat.uid,
                    stat.gid,
                    existing_mode,
                    requester,
                    flags.access_mode(),
                );
                if !permitted {
                    log::warn!("[Vfs::open] permission denied for {abs} (uid {})", requester.uid);
                    return Err(SysError::EACCES);
                }
            }
            Some(Err(SysError::ENOENT)) if flags.contains(OpenFlags::O_CREAT) => {}
            Some(Err(e)) => return Err(e),
            None => {}
        }

        sb.root.fs_ops.open(&abs, flags, mode, sb.root.fs_ops.clone())
    }

    pub fn mkdir(&self, path: &str, cwd: &str, mode: FileMode) -> SysResult<()> {
        let abs = self.resolve(
            path,
            cwd,
            ResolveFlags::FOLLOW_LINKS | ResolveFlags::CREAT_LAST_COMPONENT,
        )?;
        let sb = self.get_superblock(&abs)?;
        sb.root
            .sys_ops
            .as_ref()
            .ok_or(SysError::ENOSYS)?
            .mkdir(&abs, mode)
    }

    pub fn rmdir(&self, path: &str, cwd: &str) -> SysResult<()> {
        let abs = self.resolve(path, cwd, ResolveFlags::FOLLOW_LINKS)?;
        let sb = self.get_superblock(&abs)?;
        sb.root.sys_ops.as_ref().ok_or(SysError::ENOSYS)?.rmdir(&abs)
    }

    pub fn stat(&self, path: &str, cwd: &str) -> SysResult<Stat> {
        let abs = self.resolve(path, cwd, ResolveFlags::FOLLOW_LINKS)?;
        let sb = self.get_superblock(&abs)?;
        sb.root.sys_ops.as_ref().ok_or(SysError::ENOSYS)?.stat(&abs)
    }

    pub fn creat(&self, path: &str, cwd: &str, mode: FileMode) -> SysResult<Arc<VfsFile>> {
        let abs = self.resolve(
            path,
            cwd,
            ResolveFlags::FOLLOW_LINKS | ResolveFlags::CREAT_LAST_COMPONENT,
        )?;
        let sb = self.get_superblock(&abs)?;
        sb.root
            .sys_ops
            .as_ref()
            .ok_or(SysError::ENOSYS)?
            .creat(&abs, mode, sb.root.fs_ops.clone())
    }

    pub fn symlink(&self, target: &str, linkpath: &str, cwd: &str) -> SysResult<()> {
        let abs = self.resolve(
            linkpath,
            cwd,
            ResolveFlags::FOLLOW_LINKS | ResolveFlags::CREAT_LAST_COMPONENT,
        )?;
        let sb = self.get_superblock(&abs)?;
        sb.root
            .sys_ops
            .as_ref()
            .ok_or(SysError::ENOSYS)?
            .symlink(target, &abs)
    }

    pub fn readlink(&self, path: &str, cwd: &str, buf: &mut [u8]) -> SysResult<usize> {
        let abs = self.resolve(path, cwd, ResolveFlags::empty())?;
        let sb = self.get_superblock(&abs)?;
        sb.root.fs_ops.readlink(&abs, buf)
    }

    pub fn unlink(&self, path: &str, cwd: &str) -> SysResult<()> {
        let abs = self.resolve(path, cwd, ResolveFlags::FOLLOW_LINKS)?;
        let sb = self.get_superblock(&abs)?;
        sb.root.fs_ops.unlink(&abs)
    }

    /// Decrements the handle's refcount; invokes the backend `close` only
    /// once it reaches zero.
    pub fn close(&self, file: &VfsFile) -> SysResult<()> {
        if file.dec_ref()? == 0 {
            file.fs_ops.close(file)?;
        }
        Ok(())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// The resolver calls back into the switch for `readlink` while following
/// symlinks; `open`/`stat`/etc. above never run this path (FollowLinks at
/// the switch layer only ever targets already-mounted backends, so a
/// recursive `resolve` call here never re-enters an unmounted state).
impl LinkReader for Vfs {
    fn readlink(&self, abs_path: &str) -> SysResult<Option<String>> {
        let sb = self.get_superblock(abs_path)?;
        let mut buf = [0u8; vfs_core::PATH_MAX];
        match sb.root.fs_ops.readlink(abs_path, &mut buf) {
            Ok(len) => {
                let target = core::str::from_utf8(&buf[..len])
                    .map_err(|_| SysError::EINVAL)?
                    .to_string();
                Ok(Some(target))
            }
            Err(SysError::EINVAL) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use vfs_core::{FsOps, SysOps};

    use super::*;

    struct StubFs;
    impl SysOps for StubFs {}
    impl FsOps for StubFs {
        fn open(
            &self,
            path: &str,
            flags: OpenFlags,
            mode: FileMode,
            fs_ops: Arc<dyn FsOps>,
        ) -> SysResult<Arc<VfsFile>> {
            Ok(VfsFile::new(path, 0, 0, mode, 0, flags, None, fs_ops))
        }
    }

    struct StubType(String);
    impl FileSystemType for StubType {
        fn name(&self) -> &str {
            &self.0
        }
        fn mount(&self, _mount_path: &str, _device_args: &str) -> SysResult<Arc<VfsFile>> {
            Ok(VfsFile::new(
                "/",
                0,
                0,
                FileMode::S_IFDIR,
                0,
                OpenFlags::O_RDONLY,
                Some(Arc::new(StubFs)),
                Arc::new(StubFs),
            ))
        }
    }

    #[test]
    fn register_duplicate_fails() {
        let vfs = Vfs::new();
        vfs.register_filesystem(Arc::new(StubType("stub".to_string()))).unwrap();
        let err = vfs
            .register_filesystem(Arc::new(StubType("stub".to_string())))
            .unwrap_err();
        assert_eq!(err, SysError::EEXIST);
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let vfs = Vfs::new();
        vfs.register_filesystem(Arc::new(StubType("root".to_string()))).unwrap();
        vfs.register_filesystem(Arc::new(StubType("deep".to_string()))).unwrap();
        vfs.mount("root", "/", "none").unwrap();
        vfs.mount("deep", "/a/b", "none").unwrap();

        let sb = vfs.get_superblock("/a/b/c").unwrap();
        assert_eq!(sb.mount_path, "/a/b");
        let sb_root = vfs.get_superblock("/a/x").unwrap();
        assert_eq!(sb_root.mount_path, "/");
    }

    #[test]
    fn unmount_root_refuses_with_children_mounted() {
        let vfs = Vfs::new();
        vfs.register_filesystem(Arc::new(StubType("root".to_string()))).unwrap();
        vfs.register_filesystem(Arc::new(StubType("child".to_string()))).unwrap();
        vfs.mount("root", "/", "none").unwrap();
        vfs.mount("child", "/mnt", "none").unwrap();
        assert_eq!(vfs.unmount("/").unwrap_err(), SysError::EINVAL);
        vfs.unmount("/mnt").unwrap();
        vfs.unmount("/").unwrap();
    }

    #[test]
    fn close_invokes_backend_only_at_zero_refcount() {
        let vfs = Vfs::new();
        let file = VfsFile::new(
            "/x",
            0,
            0,
            FileMode::S_IFREG,
            0,
            OpenFlags::O_RDONLY,
            None,
            Arc::new(StubFs),
        );
        file.inc_ref();
        vfs.close(&file).unwrap();
        assert_eq!(file.refcount(), 1);
        vfs.close(&file).unwrap();
        assert_eq!(file.refcount(), 0);
    }
}
