//! Cross-backend scenarios exercised through the `Vfs` switch directly,
//! without the `kernel` crate's task/syscall wrapping.

use std::{thread, time::Duration};

use vfs::{
    pipe_create, Credentials, FileMode, InitrdFsType, OpenFlags, ProcFsType, Vfs,
};

fn root() -> Credentials {
    Credentials { pid: 1, uid: 0, gid: 0 }
}

fn boot_vfs() -> Vfs {
    let vfs = Vfs::new();
    vfs.register_filesystem(std::sync::Arc::new(InitrdFsType)).unwrap();
    vfs.register_filesystem(std::sync::Arc::new(ProcFsType)).unwrap();
    vfs.mount("initrd", "/", "none").unwrap();
    vfs.mkdir("/proc", "/", FileMode::PERM_MASK).unwrap();
    vfs.mount("procfs", "/proc", "none").unwrap();
    vfs
}

#[test]
fn longest_prefix_mount_routes_proc_paths_to_procfs() {
    let vfs = boot_vfs();
    let creds = root();

    let file = vfs
        .open("/on_initrd", "/", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK, &creds)
        .unwrap();
    vfs.close(&file).unwrap();

    vfs.mkdir("/proc/sub", "/", FileMode::PERM_MASK).unwrap();
    let entries = vfs
        .open("/proc", "/", OpenFlags::O_DIRECTORY | OpenFlags::O_RDONLY, FileMode::empty(), &creds)
        .unwrap();
    vfs.close(&entries).unwrap();

    // both mounts answer stat() through the same switch, dispatched by
    // whichever superblock's mount path is the longest prefix match
    assert!(vfs.stat("/on_initrd", "/").is_ok());
    assert!(vfs.stat("/proc/sub", "/").is_ok());
}

#[test]
fn unmount_refuses_root_while_proc_is_still_mounted() {
    let vfs = boot_vfs();
    assert!(vfs.unmount("/").is_err());
    vfs.unmount("/proc").unwrap();
    vfs.unmount("/").unwrap();
}

#[test]
fn symlink_is_followed_across_the_same_mount() {
    let vfs = boot_vfs();
    let creds = root();

    let file = vfs
        .open("/target", "/", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, FileMode::PERM_MASK, &creds)
        .unwrap();
    vfs.close(&file).unwrap();

    vfs.symlink("/target", "/link", "/").unwrap();
    let opened = vfs.open("/link", "/", OpenFlags::O_RDONLY, FileMode::empty(), &creds).unwrap();
    vfs.close(&opened).unwrap();
}

#[test]
fn pipe_survives_a_real_cross_thread_handoff() {
    let (r, w) = pipe_create(0, 0);

    let handle = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            w.fs_ops.write(&w, b"payload", 0).unwrap();
            w.fs_ops.close(&w).unwrap();
        })
    });
    let mut buf = [0u8; 16];
    let n = r.fs_ops.read(&r, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"payload");
    handle.join().unwrap();
    assert_eq!(r.fs_ops.read(&r, &mut buf, 0).unwrap(), 0);
}

#[test]
fn open_for_write_by_non_owner_is_denied_through_the_switch() {
    let vfs = boot_vfs();
    let owner = Credentials { pid: 1, uid: 1000, gid: 1000 };
    let file = vfs
        .open(
            "/private",
            "/",
            OpenFlags::O_CREAT | OpenFlags::O_WRONLY,
            FileMode::S_IRUSR | FileMode::S_IWUSR,
            &owner,
        )
        .unwrap();
    vfs.close(&file).unwrap();

    let stranger = Credentials { pid: 2, uid: 2000, gid: 2000 };
    let err = vfs
        .open("/private", "/", OpenFlags::O_WRONLY, FileMode::empty(), &stranger)
        .unwrap_err();
    assert_eq!(err, systype::SysError::EACCES);
}
