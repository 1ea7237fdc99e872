//! Named constants the filesystem layer treats as build-time parameters.
//! Grouped the way the teacher's `config::fs` module groups its filesystem
//! constants.

/// Starting size of a fresh task's fd table.
pub const MAX_OPEN_FD: usize = 32;

/// Hard ceiling a task's fd table may grow to via the doubling policy.
pub const MAX_OPEN_FD_LIMIT: usize = 4096;

/// Fixed record-table size of the initrd backend.
pub const INITRD_MAX_FILES: usize = 128;

/// Bounded name length carried inside an initrd/procfs record.
pub const MAX_NAME_LEN: usize = 60;

/// Longest absolute path the resolver or any fs_op will accept.
pub const PATH_MAX: usize = 256;

/// Number of fixed-size buffers making up one pipe.
pub const PIPE_NUM_BUFFERS: usize = 16;

/// Size in bytes of a single pipe buffer.
pub const PIPE_BUFFER_SIZE: usize = 4096;

/// Total pipe capacity in bytes.
pub const PIPE_BUF_CAPACITY: usize = PIPE_NUM_BUFFERS * PIPE_BUFFER_SIZE;

/// Symlink-following recursion limit.
pub const SYMLOOP_MAX: usize = 40;
