//! Boot sequence: registers the two backends and mounts them the way an
//! early-userspace `init` would, once at boot.

use alloc::sync::Arc;

use vfs::{FileMode, InitrdFsType, ProcFsType, Vfs};

/// Registers `initrd`/`procfs`, mounts `initrd` at `/`, creates `/proc` and
/// mounts `procfs` there.
pub fn boot() -> Vfs {
    let vfs = Vfs::new();
    vfs.register_filesystem(Arc::new(InitrdFsType))
        .expect("initrd type registers exactly once at boot");
    vfs.register_filesystem(Arc::new(ProcFsType))
        .expect("procfs type registers exactly once at boot");
    vfs.mount("initrd", "/", "none")
        .expect("root mounts onto an empty superblock list");
    vfs.mkdir("/proc", "/", FileMode::PERM_MASK)
        .expect("root is writable right after mount");
    vfs.mount("procfs", "/proc", "none")
        .expect("/proc exists as a mountpoint directory");
    vfs
}
