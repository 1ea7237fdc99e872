use alloc::{
    collections::VecDeque,
    string::{String, ToString},
    vec::Vec,
};

use systype::{SysError, SysResult};

use crate::config::{PATH_MAX, SYMLOOP_MAX};

bitflags::bitflags! {
    /// Resolver flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResolveFlags: u32 {
        const FOLLOW_LINKS          = 1 << 0;
        const REMOVE_TRAILING_SLASH = 1 << 1;
        const CREAT_LAST_COMPONENT  = 1 << 2;
    }
}

/// Backend hook the resolver consults when [`ResolveFlags::FOLLOW_LINKS`]
/// is set. `Ok(None)` means "exists, not a symlink"; `Err(ENOENT)` means
/// "does not exist yet", which the resolver tolerates only for the final
/// component when [`ResolveFlags::CREAT_LAST_COMPONENT`] is set.
///
/// Keeps "not a link" and "missing" as distinct `Option`/`Err` cases in the
/// type system rather than multiplexing both onto one negative-errno
/// channel.
pub trait LinkReader {
    fn readlink(&self, abs_path: &str) -> SysResult<Option<String>>;
}

/// A [`LinkReader`] that never reports a symlink; used by callers that pass
/// `ResolveFlags::empty()` and so never dereference it.
pub struct NoLinks;

impl LinkReader for NoLinks {
    fn readlink(&self, _abs_path: &str) -> SysResult<Option<String>> {
        Ok(None)
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits on `/`, dropping empty segments and `.` — never `..`, which is
/// handled by the caller since it mutates resolution state.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

struct WorkingPath {
    components: Vec<String>,
}

impl WorkingPath {
    fn new() -> Self {
        Self { components: Vec::new() }
    }

    fn reset(&mut self) {
        self.components.clear();
    }

    fn pop(&mut self) {
        self.components.pop();
    }

    fn rendered_len(&self, extra: &str) -> usize {
        self.components.iter().map(|c| c.len() + 1).sum::<usize>() + extra.len() + 1
    }

    fn push(&mut self, component: &str) -> SysResult<()> {
        if self.rendered_len(component) > PATH_MAX {
            return Err(SysError::ENAMETOOLONG);
        }
        self.components.push(component.to_string());
        Ok(())
    }

    fn render(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            out.push_str(c);
        }
        out
    }
}

/// Resolves `path` (possibly relative to `cwd`) into a normalized absolute
/// path, following symlinks through `links` when requested.
///
/// The output never contains `.`, `..`, empty, or doubled components.
/// Resolution is a pure function of `path`, `cwd` and `links`'s responses; a
/// symlink cycle of length `<= SYMLOOP_MAX` is reported as `ELOOP`, while any
/// acyclic chain shorter than that resolves successfully.
pub fn resolve_path(
    path: &str,
    cwd: &str,
    flags: ResolveFlags,
    links: &dyn LinkReader,
) -> SysResult<String> {
    let mut pending: VecDeque<String> = VecDeque::new();
    if !is_absolute(path) {
        for c in split_path(cwd) {
            pending.push_back(c.to_string());
        }
    }
    for c in split_path(path) {
        pending.push_back(c.to_string());
    }

    let trailing_slash_requested = path.len() > 1 && path.ends_with('/');

    let mut working = WorkingPath::new();
    let mut link_depth = 0usize;

    while let Some(token) = pending.pop_front() {
        if token == ".." {
            working.pop();
            continue;
        }

        let is_last = pending.is_empty();

        if !flags.contains(ResolveFlags::FOLLOW_LINKS) {
            working.push(&token)?;
            continue;
        }

        let mut candidate = WorkingPath {
            components: working.components.clone(),
        };
        candidate.push(&token)?;
        let candidate_path = candidate.render();

        match links.readlink(&candidate_path) {
            Ok(None) => {
                working = candidate;
            }
            Ok(Some(target)) => {
                link_depth += 1;
                if link_depth >= SYMLOOP_MAX {
                    return Err(SysError::ELOOP);
                }
                if is_absolute(&target) {
                    working.reset();
                } // else: relative target resolves from `working` (the
                  // parent directory), which already excludes `token`.
                for c in split_path(&target).into_iter().rev() {
                    pending.push_front(c.to_string());
                }
            }
            Err(SysError::ENOENT) if is_last && flags.contains(ResolveFlags::CREAT_LAST_COMPONENT) => {
                working = candidate;
            }
            Err(e) => return Err(e),
        }
    }

    let mut result = working.render();
    if trailing_slash_requested
        && !flags.contains(ResolveFlags::REMOVE_TRAILING_SLASH)
        && result != "/"
    {
        result.push('/');
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::collections::BTreeMap;

    use super::*;

    struct FakeLinks {
        links: BTreeMap<&'static str, &'static str>,
    }

    impl LinkReader for FakeLinks {
        fn readlink(&self, abs_path: &str) -> SysResult<Option<String>> {
            match self.links.get(abs_path) {
                Some(target) => Ok(Some(target.to_string())),
                None => Ok(None),
            }
        }
    }

    #[test]
    fn dot_dot_is_collapsed() {
        let r = resolve_path("/a/b/../c", "/", ResolveFlags::empty(), &NoLinks).unwrap();
        assert_eq!(r, "/a/c");
    }

    #[test]
    fn dot_dot_never_pops_below_root() {
        let r = resolve_path("/../../etc", "/", ResolveFlags::empty(), &NoLinks).unwrap();
        assert_eq!(r, "/etc");
    }

    #[test]
    fn relative_path_is_seeded_from_cwd() {
        let r = resolve_path("bar", "/home/user", ResolveFlags::empty(), &NoLinks).unwrap();
        assert_eq!(r, "/home/user/bar");
    }

    #[test]
    fn idempotent_on_already_resolved_path() {
        let mut links = BTreeMap::new();
        links.insert("/a", "/b");
        let resolver = FakeLinks { links };
        let q = resolve_path("/a/x", "/", ResolveFlags::FOLLOW_LINKS, &resolver).unwrap();
        let q2 = resolve_path(&q, "/", ResolveFlags::empty(), &NoLinks).unwrap();
        assert_eq!(q, q2);
    }

    #[test]
    fn symlink_cycle_is_eloop() {
        let mut links = BTreeMap::new();
        links.insert("/link", "/dir");
        links.insert("/dir", "/link");
        let resolver = FakeLinks { links };
        let err = resolve_path("/link", "/", ResolveFlags::FOLLOW_LINKS, &resolver).unwrap_err();
        assert_eq!(err, SysError::ELOOP);
    }

    #[test]
    fn acyclic_chain_resolves() {
        let mut links = BTreeMap::new();
        links.insert("/a", "/b");
        links.insert("/b", "/c");
        let resolver = FakeLinks { links };
        let r = resolve_path("/a", "/", ResolveFlags::FOLLOW_LINKS, &resolver).unwrap();
        assert_eq!(r, "/c");
    }

    #[test]
    fn creat_last_component_tolerates_missing_final() {
        struct MissingLast;
        impl LinkReader for MissingLast {
            fn readlink(&self, abs_path: &str) -> SysResult<Option<String>> {
                if abs_path == "/newfile" {
                    Err(SysError::ENOENT)
                } else {
                    Ok(None)
                }
            }
        }
        let r = resolve_path(
            "/newfile",
            "/",
            ResolveFlags::FOLLOW_LINKS | ResolveFlags::CREAT_LAST_COMPONENT,
            &MissingLast,
        )
        .unwrap();
        assert_eq!(r, "/newfile");
    }

    #[test]
    fn missing_intermediate_component_is_enoent() {
        struct MissingMid;
        impl LinkReader for MissingMid {
            fn readlink(&self, abs_path: &str) -> SysResult<Option<String>> {
                if abs_path == "/missing" {
                    Err(SysError::ENOENT)
                } else {
                    Ok(None)
                }
            }
        }
        let err = resolve_path(
            "/missing/file",
            "/",
            ResolveFlags::FOLLOW_LINKS,
            &MissingMid,
        )
        .unwrap_err();
        assert_eq!(err, SysError::ENOENT);
    }
}
