use alloc::string::String;

bitflags::bitflags! {
    /// Open-flag bit values. Bits 0-1 are the access mode and
    /// are not meant to be tested with `contains` directly — use
    /// [`OpenFlags::access_mode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const O_RDONLY    = 0;
        const O_WRONLY    = 0o1;
        const O_RDWR      = 0o2;
        const O_ACCMODE   = 0o3;
        const O_CREAT     = 0o100;
        const O_EXCL      = 0o200;
        const O_TRUNC     = 0o1000;
        const O_APPEND    = 0o2000;
        const O_NONBLOCK  = 0o4000;
        const O_DIRECTORY = 0o200000;
    }
}

/// The 2-bit access-mode field packed into the low bits of [`OpenFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenFlags {
    pub fn access_mode(&self) -> AccessMode {
        match self.bits() & Self::O_ACCMODE.bits() {
            0 => AccessMode::ReadOnly,
            1 => AccessMode::WriteOnly,
            _ => AccessMode::ReadWrite,
        }
    }

    pub fn readable(&self) -> bool {
        matches!(self.access_mode(), AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self.access_mode(), AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

bitflags::bitflags! {
    /// File-mode bits: standard POSIX permission triples plus the type
    /// field occupying `S_IFMT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const TYPE_MASK = 0o170000;
        const S_IFIFO   = 0o010000;
        const S_IFCHR   = 0o020000;
        const S_IFDIR   = 0o040000;
        const S_IFBLK   = 0o060000;
        const S_IFREG   = 0o100000;
        const S_IFLNK   = 0o120000;
        const S_IFSOCK  = 0o140000;

        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o40;
        const S_IWGRP = 0o20;
        const S_IXGRP = 0o10;
        const S_IROTH = 0o4;
        const S_IWOTH = 0o2;
        const S_IXOTH = 0o1;
    }
}

impl FileMode {
    pub const PERM_MASK: FileMode = FileMode::from_bits_truncate(0o777);

    pub fn itype(self) -> InodeType {
        InodeType::from_mode(self)
    }

    pub fn permission_bits(self) -> u32 {
        (self & Self::PERM_MASK).bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InodeType {
    Unknown = 0,
    Fifo = 0o1,
    CharDevice = 0o2,
    Dir = 0o4,
    BlockDevice = 0o6,
    File = 0o10,
    SymLink = 0o12,
    Socket = 0o14,
}

impl InodeType {
    pub const fn from_mode(mode: FileMode) -> Self {
        match mode.intersection(FileMode::TYPE_MASK) {
            FileMode::S_IFDIR => Self::Dir,
            FileMode::S_IFREG => Self::File,
            FileMode::S_IFLNK => Self::SymLink,
            FileMode::S_IFCHR => Self::CharDevice,
            FileMode::S_IFBLK => Self::BlockDevice,
            FileMode::S_IFIFO => Self::Fifo,
            FileMode::S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    pub const fn is_dir(self) -> bool {
        matches!(self, Self::Dir)
    }

    pub const fn is_file(self) -> bool {
        matches!(self, Self::File)
    }

    pub const fn is_symlink(self) -> bool {
        matches!(self, Self::SymLink)
    }

    pub const fn is_fifo(self) -> bool {
        matches!(self, Self::Fifo)
    }
}

/// `lseek` whence values, matching `std::io::SeekFrom` in shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

/// One `getdents` record.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub off: u64,
    pub reclen: u16,
    pub itype: InodeType,
    pub name: String,
}
