//! Boots a VFS, mounts `initrd` and `procfs`, and exercises a handful of
//! syscalls end to end. Not a real kernel entry point — a host binary that
//! demonstrates the library the way the teacher's own demo targets do.

use kernel::{boot::boot, sys_close, sys_creat, sys_getdents, sys_mkdir, sys_open, sys_pipe, sys_read, sys_write, Task};
use vfs::{FileMode, OpenFlags};

fn main() {
    env_logger::init();

    let vfs = boot();
    let task = Task::new(1, 0, 0);

    let fd = sys_creat(&vfs, &task, "/hello", FileMode::PERM_MASK).unwrap();
    sys_write(&task, fd, b"hi").unwrap();
    sys_close(&vfs, &task, fd).unwrap();

    let fd = sys_open(&vfs, &task, "/hello", OpenFlags::O_RDONLY, FileMode::empty()).unwrap();
    let mut buf = [0u8; 16];
    let n = sys_read(&task, fd, &mut buf).unwrap();
    log::info!("read back {:?} from /hello", core::str::from_utf8(&buf[..n]).unwrap());
    sys_close(&vfs, &task, fd).unwrap();

    sys_mkdir(&vfs, &task, "/proc/demo", FileMode::PERM_MASK).unwrap();
    let fd = sys_creat(&vfs, &task, "/proc/demo/status", FileMode::PERM_MASK).unwrap();
    sys_close(&vfs, &task, fd).unwrap();
    let dir_fd = sys_open(
        &vfs,
        &task,
        "/proc/demo",
        OpenFlags::O_DIRECTORY | OpenFlags::O_RDONLY,
        FileMode::empty(),
    )
    .unwrap();
    let entries = sys_getdents(&task, dir_fd, 0, 10).unwrap();
    log::info!("/proc/demo has {} entries", entries.len());

    let (r, w) = sys_pipe(&task).unwrap();
    sys_write(&task, w, b"pipe-demo").unwrap();
    let mut buf = [0u8; 16];
    let n = sys_read(&task, r, &mut buf).unwrap();
    log::info!("pipe roundtrip: {:?}", core::str::from_utf8(&buf[..n]).unwrap());
}
