//! POSIX-style owner/group/other permission gate, shared verbatim by the VFS
//! `open` check and by the SysV-style IPC `ctl`/`semop` checks it was
//! originally written for. Semaphores, shared memory, and message queues
//! themselves aren't modeled here; only the permission object and the gate
//! function are kept, since `vfs::switch` reuses both unchanged.

use crate::flags::{AccessMode, FileMode};

/// `{ key, uid, gid, cuid, cgid, mode }`.
#[derive(Debug, Clone, Copy)]
pub struct IpcPerm {
    /// IPC key; negative means a private ("`IPC_PRIVATE`-style") object,
    /// which additionally consults the requester's ancestor chain (see
    /// [`is_permitted`]).
    pub key: i32,
    pub uid: u32,
    pub gid: u32,
    /// uid/gid of whoever created the object, distinct from the current
    /// owner once ownership has changed hands.
    pub cuid: u32,
    pub cgid: u32,
    /// Owner/group/other permission triple, same bit layout as
    /// [`FileMode::PERM_MASK`].
    pub mode: FileMode,
}

impl IpcPerm {
    pub fn new(uid: u32, gid: u32, mode: FileMode) -> Self {
        Self {
            key: 0,
            uid,
            gid,
            cuid: uid,
            cgid: gid,
            mode,
        }
    }

    pub fn is_private(&self) -> bool {
        self.key < 0
    }
}

/// The requesting task's identity, as the scheduler hands it to a syscall —
/// the scheduler itself is an external collaborator this crate never
/// touches directly.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const fn is_root(&self) -> bool {
        self.uid == 0 || self.pid == 0
    }
}

fn bits_required(mode: AccessMode) -> (FileMode, FileMode, FileMode) {
    match mode {
        AccessMode::ReadOnly => (
            FileMode::S_IRUSR,
            FileMode::S_IRGRP,
            FileMode::S_IROTH,
        ),
        AccessMode::WriteOnly => (
            FileMode::S_IWUSR,
            FileMode::S_IWGRP,
            FileMode::S_IWOTH,
        ),
        AccessMode::ReadWrite => (
            FileMode::S_IRUSR | FileMode::S_IWUSR,
            FileMode::S_IRGRP | FileMode::S_IWGRP,
            FileMode::S_IROTH | FileMode::S_IWOTH,
        ),
    }
}

/// Evaluates the four-step gate, in order:
///
/// 1. root (`uid == 0`) or `pid == 0` always passes.
/// 2. owner match (`uid` or `cuid`) with the owner bits for `mode` set.
/// 3. group match (`gid` or `cgid`) with the group bits for `mode` set.
/// 4. other bits for `mode` set.
///
/// For a private object (`perm.key < 0`), `ancestor_uids` — the requester's
/// parent chain, nearest first, excluding `init` — is consulted as
/// additional owner candidates before falling through to the group/other
/// checks.
pub fn is_permitted(
    perm: &IpcPerm,
    requester: &Credentials,
    mode: AccessMode,
    ancestor_uids: &[u32],
) -> bool {
    if requester.is_root() {
        return true;
    }

    let (owner_bits, group_bits, other_bits) = bits_required(mode);

    let owner_match = requester.uid == perm.uid || requester.uid == perm.cuid;
    if owner_match && perm.mode.contains(owner_bits) {
        return true;
    }

    if perm.is_private() {
        if ancestor_uids
            .iter()
            .any(|&uid| uid == perm.uid || uid == perm.cuid)
            && perm.mode.contains(owner_bits)
        {
            return true;
        }
    }

    let group_match = requester.gid == perm.gid || requester.gid == perm.cgid;
    if group_match && perm.mode.contains(group_bits) {
        return true;
    }

    perm.mode.contains(other_bits)
}

/// The VFS `open` gate is the same four-step evaluation with no creator
/// distinction (a plain file has no separate "creator" from its current
/// owner) and no private-key ancestor walk.
pub fn vfs_open_permitted(
    uid: u32,
    gid: u32,
    mode: FileMode,
    requester: &Credentials,
    access: AccessMode,
) -> bool {
    let perm = IpcPerm::new(uid, gid, mode);
    is_permitted(&perm, requester, access, &[])
}
