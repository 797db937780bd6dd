//! Node graph of the in-memory backend.
//!
//! Nodes live in an inode-keyed arena. Directories map names to inodes and
//! remember their parent (the root is its own parent). A node is dropped
//! from the arena once it has no links and no open handles, so handles on
//! unlinked files keep working until closed.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use super::hub::{NodeEvent, WatchHub};
use super::Credentials;
use crate::vfs::error::{ErrorCode, Syscall, VfsError, VfsResult};
use crate::vfs::flags::{AccessMode, OpenFlags, DEFAULT_DIR_MODE};
use crate::vfs::path::VfsPath;
use crate::vfs::types::{Fd, FileType, Stats};

pub(super) type Ino = u64;

/// Symlink hops allowed before a lookup fails with `ELOOP`.
pub(super) const UNWIND_LIMIT: usize = 100;

const BLOCK_SIZE: u64 = 4096;

/// Largest file the backend will hold. Writes or truncations past it fail
/// with `EFBIG`.
pub(super) const MAX_FILE_SIZE: u64 = 1 << 32;

#[derive(Debug)]
pub(super) enum NodeKind {
    File {
        contents: Vec<u8>,
        /// Reported when `contents` is empty (lazily populated files).
        size: u64,
    },
    Directory {
        children: BTreeMap<String, Ino>,
        parent: Ino,
    },
    Symlink {
        target: String,
    },
}

#[derive(Debug)]
pub(super) struct Node {
    pub ino: Ino,
    /// Permission bits; the type comes from `kind`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
    pub nlink: u64,
    pub open_handles: usize,
    pub kind: NodeKind,
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File { .. } => FileType::File,
            NodeKind::Directory { .. } => FileType::Directory,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink { .. })
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { contents, size } if contents.is_empty() => *size,
            NodeKind::File { contents, .. } => contents.len() as u64,
            NodeKind::Directory { .. } => 4,
            NodeKind::Symlink { .. } => 1,
        }
    }

    pub fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

/// An open file description.
#[derive(Debug)]
pub(super) struct OpenFile {
    pub ino: Ino,
    pub flags: OpenFlags,
    pub cursor: u64,
}

/// Error context for one call: syscall plus the path(s) it was given.
pub(super) struct Call {
    syscall: Syscall,
    path: Option<String>,
    second: Option<String>,
}

impl Call {
    pub fn new(syscall: Syscall, path: &VfsPath) -> Self {
        Self {
            syscall,
            path: Some(path.full_path()),
            second: None,
        }
    }

    pub fn two(syscall: Syscall, path: impl ToString, second: &VfsPath) -> Self {
        Self {
            syscall,
            path: Some(path.to_string()),
            second: Some(second.full_path()),
        }
    }

    pub fn fd(syscall: Syscall) -> Self {
        Self {
            syscall,
            path: None,
            second: None,
        }
    }

    pub fn fail(&self, code: ErrorCode) -> VfsError {
        let mut err = VfsError::new(code).with_syscall(self.syscall);
        if let Some(path) = &self.path {
            err.set_path(path);
        }
        if let Some(second) = &self.second {
            err.set_second_path(second);
        }
        err
    }
}

/// How a lookup treats the final segment and missing parents.
#[derive(Debug, Clone, Copy)]
pub(super) struct Walk {
    pub follow_leaf: bool,
    pub ensure_parent: bool,
    pub superuser: bool,
}

impl Walk {
    pub fn follow() -> Self {
        Self {
            follow_leaf: true,
            ensure_parent: false,
            superuser: false,
        }
    }

    pub fn no_follow() -> Self {
        Self {
            follow_leaf: false,
            ..Self::follow()
        }
    }

    /// Permission-free walk that creates missing parents.
    pub fn bootstrap(follow_leaf: bool) -> Self {
        Self {
            follow_leaf,
            ensure_parent: true,
            superuser: true,
        }
    }
}

/// Result of a lookup.
#[derive(Debug)]
pub(super) struct Lookup {
    /// The node, or `None` if only the final segment is missing.
    pub node: Option<Ino>,
    /// Directory holding the final entry.
    pub parent: Ino,
    /// Final entry name (`.`/`..` when the path ended in one).
    pub name: String,
    pub unwinds: usize,
}

#[derive(Debug)]
pub(super) struct Graph {
    pub dev: u64,
    pub root: Ino,
    pub creds: Credentials,
    pub nodes: HashMap<Ino, Node>,
    pub handles: HashMap<Fd, OpenFile>,
    pub hub: WatchHub,
    next_ino: Ino,
    next_fd: Fd,
}

impl Graph {
    pub fn new(dev: u64, creds: Credentials) -> Self {
        let mut graph = Self {
            dev,
            root: 1,
            creds,
            nodes: HashMap::new(),
            handles: HashMap::new(),
            hub: WatchHub::default(),
            next_ino: 1,
            next_fd: 3,
        };
        let (uid, gid) = (graph.creds.uid, graph.creds.gid);
        let root = graph.alloc(
            NodeKind::Directory {
                children: BTreeMap::new(),
                parent: 1,
            },
            DEFAULT_DIR_MODE,
            uid,
            gid,
        );
        graph.root = root;
        graph
    }

    // ========================================================================
    // Node access
    // ========================================================================

    pub fn node(&self, ino: Ino) -> &Node {
        &self.nodes[&ino]
    }

    pub fn node_mut(&mut self, ino: Ino) -> &mut Node {
        self.nodes.get_mut(&ino).unwrap_or_else(|| unreachable!("dangling inode {ino}"))
    }

    pub fn children(&self, ino: Ino) -> Option<&BTreeMap<String, Ino>> {
        match &self.node(ino).kind {
            NodeKind::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    fn parent_of(&self, ino: Ino) -> Ino {
        match self.node(ino).kind {
            NodeKind::Directory { parent, .. } => parent,
            _ => self.root,
        }
    }

    pub fn stats(&self, ino: Ino) -> Stats {
        let node = self.node(ino);
        let size = node.size();
        Stats {
            dev: self.dev,
            ino: node.ino,
            mode: node.file_type().mode_bits() | node.mode,
            nlink: node.nlink,
            uid: node.uid,
            gid: node.gid,
            rdev: 0,
            size,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(512),
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            birthtime: node.birthtime,
        }
    }

    /// Absolute path of a directory, rebuilt from parent links.
    pub fn dir_path(&self, mut ino: Ino) -> String {
        let mut names = Vec::new();
        while ino != self.root {
            let parent = self.parent_of(ino);
            let name = self
                .children(parent)
                .and_then(|c| c.iter().find(|(_, child)| **child == ino))
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            names.push(name);
            ino = parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Whether the rights triplet that applies to the caller intersects `mode`.
    pub fn permits(&self, node: &Node, mode: AccessMode) -> bool {
        let shift = if node.uid == self.creds.uid {
            6
        } else if self.creds.groups.contains(&node.gid) {
            3
        } else {
            0
        };
        (node.mode >> shift) & 0o7 & mode.bits() != 0
    }

    pub fn check(&self, ino: Ino, mode: AccessMode, superuser: bool, call: &Call) -> VfsResult<()> {
        if superuser || self.permits(self.node(ino), mode) {
            Ok(())
        } else {
            Err(call.fail(ErrorCode::EACCES))
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Walk `path` from the root.
    pub fn lookup(&mut self, path: &VfsPath, walk: Walk, call: &Call) -> VfsResult<Lookup> {
        let root = self.root;
        self.walk(path.segments(), root, walk, 0, call)
    }

    fn walk(
        &mut self,
        segments: &[String],
        start: Ino,
        walk: Walk,
        mut unwinds: usize,
        call: &Call,
    ) -> VfsResult<Lookup> {
        // A trailing slash names the last real segment, which must be a directory.
        let kept = segments.iter().rposition(|s| !s.is_empty()).map_or(0, |i| i + 1);
        let dir_only = kept < segments.len();
        let segments = &segments[..kept];
        let walk = Walk {
            follow_leaf: walk.follow_leaf || dir_only,
            ..walk
        };

        let mut parent = if start == self.root {
            start
        } else {
            self.parent_of(start)
        };
        let mut current = start;
        let mut name = String::new();
        let last = segments.len().saturating_sub(1);

        for (i, part) in segments.iter().enumerate() {
            // `current` is always a directory here.
            self.check(current, AccessMode::X, walk.superuser, call)?;

            match part.as_str() {
                "" => continue,
                "." | ".." => {
                    if part == ".." {
                        current = self.parent_of(current);
                    }
                    parent = self.parent_of(current);
                    name = part.clone();
                    continue;
                }
                _ => {}
            }

            name = part.clone();
            parent = current;
            let child = self.children(current).and_then(|c| c.get(part)).copied();
            current = match child {
                Some(child) => child,
                None if i == last => {
                    return Ok(Lookup {
                        node: None,
                        parent,
                        name,
                        unwinds,
                    });
                }
                None if walk.ensure_parent => {
                    self.check(current, AccessMode::W, walk.superuser, call)?;
                    let (uid, gid) = (self.creds.uid, self.creds.gid);
                    self.create_dir(current, part, DEFAULT_DIR_MODE, uid, gid)
                }
                None => return Err(call.fail(ErrorCode::ENOENT)),
            };

            let target = match &self.node(current).kind {
                NodeKind::Symlink { target } if walk.follow_leaf || i != last => target.clone(),
                NodeKind::Directory { .. } => continue,
                _ if i != last => return Err(call.fail(ErrorCode::ENOTDIR)),
                _ => continue,
            };

            if unwinds >= UNWIND_LIMIT {
                return Err(call.fail(ErrorCode::ELOOP));
            }
            let target = VfsPath::parse(&target);
            let from = if target.is_absolute() { self.root } else { parent };
            let inner = Walk {
                follow_leaf: true,
                ensure_parent: false,
                ..walk
            };
            let resolved = self.walk(target.segments(), from, inner, unwinds + 1, call)?;
            let Some(node) = resolved.node else {
                return Err(call.fail(ErrorCode::ENOENT));
            };
            if i != last && !self.node(node).is_dir() {
                return Err(call.fail(ErrorCode::ENOTDIR));
            }
            current = node;
            parent = resolved.parent;
            name = resolved.name;
            unwinds = resolved.unwinds;
        }

        if dir_only && !self.node(current).is_dir() {
            return Err(call.fail(ErrorCode::ENOTDIR));
        }
        Ok(Lookup {
            node: Some(current),
            parent,
            name,
            unwinds,
        })
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    fn alloc(&mut self, kind: NodeKind, mode: u32, uid: u32, gid: u32) -> Ino {
        let ino = self.next_ino;
        self.next_ino += 1;
        let now = SystemTime::now();
        let nlink = if matches!(kind, NodeKind::Directory { .. }) { 2 } else { 1 };
        self.nodes.insert(
            ino,
            Node {
                ino,
                mode: mode & 0o7777,
                uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
                birthtime: now,
                nlink,
                open_handles: 0,
                kind,
            },
        );
        ino
    }

    pub fn create_file(&mut self, dir: Ino, name: &str, contents: Vec<u8>, mode: u32, uid: u32, gid: u32) -> Ino {
        let size = contents.len() as u64;
        let ino = self.alloc(NodeKind::File { contents, size }, mode, uid, gid);
        self.attach(dir, name, ino);
        ino
    }

    pub fn create_dir(&mut self, dir: Ino, name: &str, mode: u32, uid: u32, gid: u32) -> Ino {
        let kind = NodeKind::Directory {
            children: BTreeMap::new(),
            parent: dir,
        };
        let ino = self.alloc(kind, mode, uid, gid);
        self.attach(dir, name, ino);
        ino
    }

    pub fn create_symlink(&mut self, dir: Ino, name: &str, target: &str, uid: u32, gid: u32) -> Ino {
        let kind = NodeKind::Symlink {
            target: target.to_string(),
        };
        let ino = self.alloc(kind, 0o777, uid, gid);
        self.attach(dir, name, ino);
        ino
    }

    /// Add an entry `name -> ino` under `dir` and announce it.
    pub fn attach(&mut self, dir: Ino, name: &str, ino: Ino) {
        let is_dir = self.node(ino).is_dir();
        if let NodeKind::Directory { parent, .. } = &mut self.node_mut(ino).kind {
            *parent = dir;
        }
        let dir_node = self.node_mut(dir);
        if let NodeKind::Directory { children, .. } = &mut dir_node.kind {
            children.insert(name.to_string(), ino);
        }
        if is_dir {
            dir_node.nlink += 1;
        }
        dir_node.touch();
        self.hub.emit(dir, NodeEvent::ChildAdded { name, ino });
    }

    /// Remove the entry `name` from `dir` without touching the node itself.
    pub fn detach(&mut self, dir: Ino, name: &str) -> Option<Ino> {
        let dir_node = self.node_mut(dir);
        let removed = match &mut dir_node.kind {
            NodeKind::Directory { children, .. } => children.remove(name),
            _ => None,
        };
        dir_node.touch();
        let ino = removed?;
        if self.node(ino).is_dir() {
            self.node_mut(dir).nlink -= 1;
        }
        Some(ino)
    }

    /// Drop one link to `ino`, announcing the change, then collect it if it
    /// became garbage. Directories lose all links at once.
    pub fn drop_link(&mut self, ino: Ino) {
        let node = self.node_mut(ino);
        node.nlink = if node.is_dir() {
            0
        } else {
            node.nlink.saturating_sub(1)
        };
        node.ctime = SystemTime::now();
        let event = if node.nlink == 0 {
            NodeEvent::Unlinked
        } else {
            NodeEvent::Changed
        };
        self.hub.emit(ino, event);
    }

    /// Remove `ino` from the arena if nothing references it any more.
    pub fn collect(&mut self, ino: Ino) {
        if ino == self.root {
            return;
        }
        if let Some(node) = self.nodes.get(&ino) {
            if node.nlink == 0 && node.open_handles == 0 {
                self.nodes.remove(&ino);
                self.hub.forget(ino);
            }
        }
    }

    /// Whether `ino` is `ancestor` or lies beneath it.
    pub fn is_within(&self, mut ino: Ino, ancestor: Ino) -> bool {
        loop {
            if ino == ancestor {
                return true;
            }
            if ino == self.root {
                return false;
            }
            ino = self.parent_of(ino);
        }
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub fn open_handle(&mut self, ino: Ino, flags: OpenFlags) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.node_mut(ino).open_handles += 1;
        self.handles.insert(
            fd,
            OpenFile {
                ino,
                flags,
                cursor: 0,
            },
        );
        fd
    }

    pub fn handle(&self, fd: Fd, call: &Call) -> VfsResult<&OpenFile> {
        self.handles
            .get(&fd)
            .ok_or_else(|| call.fail(ErrorCode::EBADF))
    }

    pub fn close_handle(&mut self, fd: Fd, call: &Call) -> VfsResult<()> {
        let handle = self
            .handles
            .remove(&fd)
            .ok_or_else(|| call.fail(ErrorCode::EBADF))?;
        let node = self.node_mut(handle.ino);
        node.open_handles = node.open_handles.saturating_sub(1);
        self.collect(handle.ino);
        Ok(())
    }

    /// Read at the cursor (advancing it) or at an explicit position.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8], position: Option<u64>, call: &Call) -> VfsResult<usize> {
        let Graph { handles, nodes, .. } = self;
        let handle = handles.get_mut(&fd).ok_or_else(|| call.fail(ErrorCode::EBADF))?;
        if !handle.flags.is_readable() {
            return Err(call.fail(ErrorCode::EBADF));
        }
        let node = nodes
            .get_mut(&handle.ino)
            .ok_or_else(|| call.fail(ErrorCode::EBADF))?;
        let NodeKind::File { contents, .. } = &node.kind else {
            return Err(call.fail(ErrorCode::EISDIR));
        };

        let start = position.unwrap_or(handle.cursor);
        let len = contents.len() as u64;
        let n = if start >= len {
            0
        } else {
            let available = (len - start) as usize;
            let n = available.min(buf.len());
            let start = start as usize;
            buf[..n].copy_from_slice(&contents[start..start + n]);
            n
        };
        if position.is_none() {
            handle.cursor += n as u64;
        }
        node.atime = SystemTime::now();
        Ok(n)
    }

    /// Write at the cursor, an explicit position, or (append mode) the end.
    pub fn write(&mut self, fd: Fd, data: &[u8], position: Option<u64>, call: &Call) -> VfsResult<usize> {
        let Graph {
            handles, nodes, hub, ..
        } = self;
        let handle = handles.get_mut(&fd).ok_or_else(|| call.fail(ErrorCode::EBADF))?;
        if !handle.flags.is_writable() {
            return Err(call.fail(ErrorCode::EBADF));
        }
        let node = nodes
            .get_mut(&handle.ino)
            .ok_or_else(|| call.fail(ErrorCode::EBADF))?;
        let NodeKind::File { contents, size } = &mut node.kind else {
            return Err(call.fail(ErrorCode::EISDIR));
        };

        let offset = if handle.flags.contains(OpenFlags::APPEND) {
            contents.len() as u64
        } else {
            position.unwrap_or(handle.cursor)
        };
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or_else(|| call.fail(ErrorCode::EFBIG))?;
        let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
            return Err(call.fail(ErrorCode::EFBIG));
        };
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        *size = contents.len() as u64;
        if position.is_none() {
            handle.cursor = end as u64;
        }
        node.touch();
        hub.emit(node.ino, NodeEvent::Changed);
        Ok(data.len())
    }

    /// Resize a file's contents, zero-padding on growth.
    pub fn resize(&mut self, ino: Ino, len: u64, call: &Call) -> VfsResult<()> {
        let len = usize::try_from(len)
            .ok()
            .filter(|_| len <= MAX_FILE_SIZE)
            .ok_or_else(|| call.fail(ErrorCode::EFBIG))?;
        let node = self.node_mut(ino);
        let NodeKind::File { contents, size } = &mut node.kind else {
            return Err(call.fail(ErrorCode::EISDIR));
        };
        contents.resize(len, 0);
        *size = len as u64;
        node.touch();
        self.hub.emit(ino, NodeEvent::Changed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            uid: 1000,
            gid: 100,
            groups: vec![100, 20],
        }
    }

    fn graph() -> Graph {
        Graph::new(1, creds())
    }

    fn call(path: &str) -> Call {
        Call::new(Syscall::Stat, &VfsPath::parse(path))
    }

    #[test]
    fn test_permission_triplet_selection() {
        let mut g = graph();
        let root = g.root;
        let ino = g.create_file(root, "f", Vec::new(), 0o640, 1000, 100);

        assert!(g.permits(g.node(ino), AccessMode::R));
        assert!(g.permits(g.node(ino), AccessMode::W));
        assert!(!g.permits(g.node(ino), AccessMode::X));

        g.node_mut(ino).uid = 1;
        assert!(g.permits(g.node(ino), AccessMode::R));
        assert!(!g.permits(g.node(ino), AccessMode::W));

        g.node_mut(ino).gid = 7;
        assert!(!g.permits(g.node(ino), AccessMode::R));
    }

    #[test]
    fn test_permission_monotonic() {
        let mut g = graph();
        let root = g.root;
        let ino = g.create_file(root, "f", Vec::new(), 0, 1000, 100);

        for owner in [(1000, 100), (1, 20), (1, 1)] {
            for mode in 0..=0o777u32 {
                for requested in 1..=7u32 {
                    let requested = AccessMode::from_bits_truncate(requested);
                    let node = g.node_mut(ino);
                    (node.uid, node.gid, node.mode) = (owner.0, owner.1, mode);
                    let allowed = g.permits(g.node(ino), requested);

                    for bit in 0..9 {
                        let node = g.node_mut(ino);
                        node.mode = mode & !(1 << bit);
                        let still = g.permits(g.node(ino), requested);
                        assert!(!still || allowed, "clearing bit {bit} of {mode:o} granted access");
                    }
                }
            }
        }
    }

    #[test]
    fn test_lookup_missing_leaf() {
        let mut g = graph();
        let found = g.lookup(&VfsPath::parse("/nope"), Walk::follow(), &call("/nope")).unwrap();
        assert!(found.node.is_none());
        assert_eq!(found.parent, g.root);
        assert_eq!(found.name, "nope");

        let err = g
            .lookup(&VfsPath::parse("/nope/deeper"), Walk::follow(), &call("/nope/deeper"))
            .unwrap_err();
        assert!(err.is(ErrorCode::ENOENT));
        assert_eq!(err.path(), Some("/nope/deeper"));
    }

    #[test]
    fn test_lookup_ensure_parent() {
        let mut g = graph();
        let path = VfsPath::parse("/a/b/c");
        let found = g.lookup(&path, Walk::bootstrap(true), &call("/a/b/c")).unwrap();
        assert!(found.node.is_none());
        assert_eq!(found.name, "c");
        assert_eq!(g.dir_path(found.parent), "/a/b");
    }

    #[test]
    fn test_lookup_symlink_loop() {
        let mut g = graph();
        let root = g.root;
        g.create_symlink(root, "a", "b", 1000, 100);
        g.create_symlink(root, "b", "/a", 1000, 100);

        let err = g
            .lookup(&VfsPath::parse("/a"), Walk::follow(), &call("/a"))
            .unwrap_err();
        assert!(err.is(ErrorCode::ELOOP));

        let found = g.lookup(&VfsPath::parse("/a"), Walk::no_follow(), &call("/a")).unwrap();
        assert!(g.node(found.node.unwrap()).is_symlink());
    }

    #[test]
    fn test_trailing_slash_is_dropped() {
        let mut g = graph();
        let root = g.root;
        let a = g.create_dir(root, "a", 0o755, 1000, 100);

        let found = g.lookup(&VfsPath::parse("/b/"), Walk::no_follow(), &call("/b/")).unwrap();
        assert!(found.node.is_none());
        assert_eq!(found.name, "b");
        assert_eq!(found.parent, root);

        let found = g.lookup(&VfsPath::parse("/a//"), Walk::follow(), &call("/a//")).unwrap();
        assert_eq!(found.node, Some(a));
        assert_eq!(found.name, "a");
    }

    #[test]
    fn test_dot_segments() {
        let mut g = graph();
        let root = g.root;
        let a = g.create_dir(root, "a", 0o755, 1000, 100);
        g.create_dir(a, "b", 0o755, 1000, 100);

        let found = g
            .lookup(&VfsPath::parse("/a/b/.."), Walk::follow(), &call("/a/b/.."))
            .unwrap();
        assert_eq!(found.node, Some(a));
        assert_eq!(found.name, "..");

        let found = g.lookup(&VfsPath::parse("/a/."), Walk::follow(), &call("/a/.")).unwrap();
        assert_eq!(found.node, Some(a));
        assert_eq!(found.name, ".");
    }

    #[test]
    fn test_directory_link_counts() {
        let mut g = graph();
        let root = g.root;
        assert_eq!(g.node(root).nlink, 2);
        let a = g.create_dir(root, "a", 0o755, 1000, 100);
        assert_eq!(g.node(root).nlink, 3);
        assert_eq!(g.node(a).nlink, 2);

        assert_eq!(g.detach(root, "a"), Some(a));
        g.drop_link(a);
        g.collect(a);
        assert_eq!(g.node(root).nlink, 2);
        assert!(!g.nodes.contains_key(&a));
    }

    #[test]
    fn test_dir_path_follows_parents() {
        let mut g = graph();
        let root = g.root;
        let a = g.create_dir(root, "a", 0o755, 1000, 100);
        let b = g.create_dir(a, "b", 0o755, 1000, 100);
        assert_eq!(g.dir_path(b), "/a/b");
        assert_eq!(g.dir_path(root), "/");
    }
}
