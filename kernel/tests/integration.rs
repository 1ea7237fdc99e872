//! Cross-module end-to-end scenarios.

use std::{thread, time::Duration};

use kernel::{boot::boot, sys_close, sys_open, sys_pipe, sys_read, sys_write, Task};
use vfs::{FileMode, OpenFlags};

#[test]
fn two_tasks_share_a_pipe_across_real_threads() {
    let vfs = boot();
    let task = Task::new(1, 0, 0);
    let (r, w) = sys_pipe(&task).unwrap();

    let handle = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            sys_write(&task, w, b"x").unwrap();
        })
    });
    let mut buf = [0u8; 1];
    let n = sys_read(&task, r, &mut buf).unwrap();
    assert_eq!(n, 1);
    assert_eq!(buf[0], b'x');
    handle.join().unwrap();
}

#[test]
fn root_mount_serves_files_while_proc_mount_is_independent() {
    let vfs = boot();
    let task = Task::new(1, 0, 0);

    let fd = sys_open(
        &vfs,
        &task,
        "/greeting",
        OpenFlags::O_CREAT | OpenFlags::O_WRONLY,
        FileMode::PERM_MASK,
    )
    .unwrap();
    sys_write(&task, fd, b"hello").unwrap();
    sys_close(&vfs, &task, fd).unwrap();

    let proc_fd = sys_open(
        &vfs,
        &task,
        "/proc",
        OpenFlags::O_DIRECTORY | OpenFlags::O_RDONLY,
        FileMode::empty(),
    )
    .unwrap();
    sys_close(&vfs, &task, proc_fd).unwrap();

    let read_fd = sys_open(&vfs, &task, "/greeting", OpenFlags::O_RDONLY, FileMode::empty()).unwrap();
    let mut buf = [0u8; 16];
    let n = sys_read(&task, read_fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
}
