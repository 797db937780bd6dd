//! VFS mount table with tree routing.
//!
//! Routes filesystem operations to the backend owning a path. Mount points
//! form a forest (one tree per path root) stored as an arena. A path is
//! walked down the tree as far as mount points go; what remains is handed to
//! the owning backend, after any `.` and `..` segments beyond the mount
//! boundary have been resolved against that backend. A `..` can climb back
//! out of a backend (or follow a symlink out of it), in which case
//! resolution starts over from the top.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use super::error::{ErrorCode, Syscall, VfsError, VfsResult};
use super::flags::{AccessMode, CopyFlags, OpenFlags};
use super::ops::VfsOps;
use super::path::VfsPath;
use super::types::{Fd, Stats, WatchOptions, WriteFileOptions};
use super::watch::Watcher;

type MountId = usize;

/// First descriptor handed out by a mount table.
const FIRST_FD: Fd = 10;

/// Symlink splices allowed during one resolution.
const RESTART_LIMIT: usize = 100;

/// Mode reported for directories that only exist as mount points.
const MOUNT_POINT_MODE: u32 = 0o555;

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/mnt/project").
    pub path: String,
    /// Number of segments above the backend's root.
    pub level: usize,
}

struct MountNode {
    /// Depth of the owning backend's root.
    level: usize,
    backend: Option<Arc<dyn VfsOps>>,
    /// Whether `backend` was mounted here rather than inherited.
    mounted: bool,
    /// Root nodes are their own parent.
    parent: MountId,
    children: BTreeMap<String, MountId>,
}

#[derive(Default)]
struct MountTree {
    roots: HashMap<String, MountId>,
    nodes: Vec<MountNode>,
}

impl MountTree {
    fn root_for(&mut self, root: &str) -> MountId {
        if let Some(&id) = self.roots.get(root) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(MountNode {
            level: 0,
            backend: None,
            mounted: false,
            parent: id,
            children: BTreeMap::new(),
        });
        self.roots.insert(root.to_string(), id);
        id
    }

    /// Hand `node`'s backend to every descendant that has none of its own,
    /// stopping at nested mount points.
    fn pass_down(&mut self, node: MountId) {
        let (backend, level) = (self.nodes[node].backend.clone(), self.nodes[node].level);
        let mut stack: Vec<MountId> = self.nodes[node].children.values().copied().collect();
        while let Some(id) = stack.pop() {
            let child = &mut self.nodes[id];
            if child.mounted {
                continue;
            }
            child.backend = backend.clone();
            child.level = level;
            stack.extend(child.children.values().copied());
        }
    }

    fn child_names(&self, node: MountId) -> Vec<String> {
        self.nodes[node].children.keys().cloned().collect()
    }

    fn collect_mounts(&self, node: MountId, prefix: &VfsPath, out: &mut Vec<MountInfo>) {
        let n = &self.nodes[node];
        if n.mounted {
            out.push(MountInfo {
                path: prefix.full_path(),
                level: n.level,
            });
        }
        for (name, &child) in &n.children {
            self.collect_mounts(child, &prefix.join(name.clone()), out);
        }
    }
}

/// A path after resolution against the mount tree.
struct Target {
    backend: Option<Arc<dyn VfsOps>>,
    /// Deepest mount-tree node the path reached, if its root is known.
    node: Option<MountId>,
    /// Whether the whole path names that node.
    at_node: bool,
    /// Segments consumed by the mount tree.
    depth: usize,
    level: usize,
    root: String,
    parts: Vec<String>,
}

impl Target {
    /// The path as seen by `engine`.
    fn inner_path(&self, engine: &dyn VfsOps) -> VfsPath {
        self.inner_prefix(engine, self.parts.len())
    }

    fn inner_prefix(&self, engine: &dyn VfsOps, end: usize) -> VfsPath {
        VfsPath::from_segments(engine.root(), self.parts[self.level..end].iter().cloned())
    }

    /// Turn a backend's canonical path into one under this table.
    fn globalize(&self, engine_root: &str, answer: &str) -> String {
        let rest = answer.strip_prefix(engine_root).unwrap_or(answer);
        let mut segments: Vec<String> = self.parts[..self.level].to_vec();
        segments.extend(
            VfsPath::parse(rest)
                .segments()
                .iter()
                .filter(|s| !s.is_empty())
                .cloned(),
        );
        VfsPath::from_segments(&self.root, segments).full_path()
    }
}

/// Outcome of resolving the segments past the mount boundary.
enum Unwind {
    Done,
    /// Start over with these segments; `true` if a symlink was spliced in.
    Restart(Vec<String>, bool),
}

/// Serves mount-tree nodes that no backend owns.
struct Detached {
    children: Vec<String>,
}

impl VfsOps for Detached {
    fn access(&self, _path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        if mode.is_empty() || mode.intersects(AccessMode::R | AccessMode::X) {
            Ok(())
        } else {
            Err(ErrorCode::EACCES.into())
        }
    }

    fn stat(&self, _path: &VfsPath) -> VfsResult<Stats> {
        Ok(Stats::directory(MOUNT_POINT_MODE))
    }

    fn lstat(&self, _path: &VfsPath) -> VfsResult<Stats> {
        Ok(Stats::directory(MOUNT_POINT_MODE))
    }

    fn readdir(&self, _path: &VfsPath) -> VfsResult<Vec<String>> {
        Ok(self.children.clone())
    }

    fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        Ok(path.normalize().full_path())
    }
}

struct FdEntry {
    fd: Fd,
    backend: Arc<dyn VfsOps>,
}

/// Routes filesystem operations to mounted backends.
///
/// A backend mounted at `/a/b` sees `/a/b/c` as `/c`. Directories that only
/// exist as mount points are synthesized, and listing a mount point merges
/// the backend's entries with the mounts beneath it. The table is itself a
/// [`VfsOps`], so tables nest.
pub struct MountTable {
    tree: RwLock<MountTree>,
    fds: DashMap<Fd, FdEntry>,
    next_fd: AtomicU32,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.mount_points())
            .field("open_fds", &self.fds.len())
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

fn same_backend(a: &Arc<dyn VfsOps>, b: &Arc<dyn VfsOps>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn enrich(mut err: VfsError, syscall: Syscall, path: &str, second: Option<&str>) -> VfsError {
    err.set_path(path);
    if let Some(second) = second {
        err.set_second_path(second);
    }
    if err.syscall().is_none() {
        err.set_syscall(syscall);
    }
    err
}

fn is_missing(err: &VfsError) -> bool {
    err.is(ErrorCode::ENOENT) || err.is(ErrorCode::ENOTDIR)
}

impl MountTable {
    /// Create a new empty mount table.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(MountTree::default()),
            fds: DashMap::new(),
            next_fd: AtomicU32::new(FIRST_FD),
        }
    }

    /// Mount a backend at the given path.
    ///
    /// Intermediate directories are created in the mount tree and stay with
    /// whichever backend owned them before. Mounting over an existing mount
    /// point replaces its backend.
    pub fn mount(&self, backend: Arc<dyn VfsOps>, path: &str) {
        let path = VfsPath::parse(path).normalize();
        let mut tree = self.tree.write();
        let mut node = tree.root_for(path.root());

        for (depth, segment) in path.segments().iter().enumerate() {
            let existing = tree.nodes[node].children.get(segment).copied();
            node = match existing {
                Some(child) => child,
                None => {
                    let id = tree.nodes.len();
                    let parent = &tree.nodes[node];
                    let inherited = MountNode {
                        level: parent.level,
                        backend: parent.backend.clone(),
                        mounted: false,
                        parent: node,
                        children: BTreeMap::new(),
                    };
                    tracing::trace!(segment = %segment, depth, "mount tree node");
                    tree.nodes.push(inherited);
                    tree.nodes[node].children.insert(segment.clone(), id);
                    id
                }
            };
        }

        let target = &mut tree.nodes[node];
        target.backend = Some(backend);
        target.level = path.segments().len();
        target.mounted = true;
        tree.pass_down(node);
        tracing::debug!(path = %path, "mounted backend");
    }

    /// List all current mounts, shallowest first.
    pub fn mount_points(&self) -> Vec<MountInfo> {
        let tree = self.tree.read();
        let mut roots: Vec<_> = tree.roots.iter().collect();
        roots.sort();
        let mut out = Vec::new();
        for (root, &id) in roots {
            tree.collect_mounts(id, &VfsPath::from_segments(root, Vec::<String>::new()), &mut out);
        }
        out
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Walk `parts` down the mount tree under `root`.
    fn walk_tree(&self, root: &str, mut parts: Vec<String>) -> Target {
        let tree = self.tree.read();
        let Some(&start) = tree.roots.get(root) else {
            return Target {
                backend: None,
                node: None,
                at_node: false,
                depth: 0,
                level: 0,
                root: root.to_string(),
                parts,
            };
        };

        let mut node = start;
        let mut consumed: Vec<String> = Vec::with_capacity(parts.len());
        let mut i = 0;
        while i < parts.len() {
            match parts[i].as_str() {
                "" | "." => {}
                ".." => {
                    node = tree.nodes[node].parent;
                    consumed.pop();
                }
                name => match tree.nodes[node].children.get(name) {
                    Some(&child) => {
                        node = child;
                        consumed.push(name.to_string());
                    }
                    None => break,
                },
            }
            i += 1;
        }

        let depth = consumed.len();
        consumed.extend(parts.drain(i..));
        let n = &tree.nodes[node];
        Target {
            backend: n.backend.clone(),
            node: Some(node),
            at_node: depth == consumed.len(),
            depth,
            level: n.level,
            root: root.to_string(),
            parts: consumed,
        }
    }

    /// Resolve `.` and `..` segments past the mount boundary.
    fn unwind(&self, target: &mut Target) -> VfsResult<Unwind> {
        let mut j = target.depth + 1;
        while j < target.parts.len() {
            match target.parts[j].as_str() {
                "" | "." => {
                    let backend = target.backend.as_ref().ok_or(ErrorCode::ENOENT)?;
                    let stats = backend.stat(&target.inner_prefix(backend.as_ref(), j))?;
                    if !stats.is_dir() {
                        return Err(ErrorCode::ENOTDIR.into());
                    }
                    target.parts.remove(j);
                }
                ".." => {
                    let backend = target.backend.as_ref().ok_or(ErrorCode::ENOENT)?;
                    let prefix = target.inner_prefix(backend.as_ref(), j);
                    let stats = backend.lstat(&prefix)?;
                    let parts = &target.parts;

                    if stats.is_symlink() {
                        let link = VfsPath::parse(&backend.readlink(&prefix)?);
                        let keep = if link.is_absolute() {
                            target.level
                        } else {
                            j - 1
                        };
                        let mut next = parts[..keep].to_vec();
                        next.extend(link.segments().iter().cloned());
                        next.extend(parts[j..].iter().cloned());
                        return Ok(Unwind::Restart(next, true));
                    }
                    if !stats.is_dir() {
                        return Err(ErrorCode::ENOTDIR.into());
                    }
                    let mut next = parts[..j - 1].to_vec();
                    next.extend(parts[j + 1..].iter().cloned());
                    return Ok(Unwind::Restart(next, false));
                }
                _ => j += 1,
            }
        }
        Ok(Unwind::Done)
    }

    fn resolve(&self, path: &VfsPath) -> VfsResult<Target> {
        let mut parts = path.segments().to_vec();
        let mut splices = 0;
        loop {
            let mut target = self.walk_tree(path.root(), parts);
            match self.unwind(&mut target)? {
                Unwind::Done => return Ok(target),
                Unwind::Restart(next, spliced) => {
                    if spliced {
                        splices += 1;
                        if splices > RESTART_LIMIT {
                            return Err(ErrorCode::ELOOP.into());
                        }
                        tracing::debug!(path = %path, splices, "symlink spliced, restarting resolution");
                    }
                    parts = next;
                }
            }
        }
    }

    /// The engine answering for `target`.
    fn engine(&self, target: &Target) -> VfsResult<Arc<dyn VfsOps>> {
        match (&target.backend, target.node) {
            (Some(backend), _) => Ok(Arc::clone(backend)),
            (None, Some(node)) if target.at_node => Ok(Arc::new(Detached {
                children: self.tree.read().child_names(node),
            })),
            _ => Err(ErrorCode::ENOENT.into()),
        }
    }

    fn child_names(&self, target: &Target) -> Vec<String> {
        match target.node {
            Some(node) if target.at_node => self.tree.read().child_names(node),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn on_path<T>(
        &self,
        syscall: Syscall,
        path: &VfsPath,
        op: impl FnOnce(&Arc<dyn VfsOps>, &VfsPath, &Target) -> VfsResult<T>,
    ) -> VfsResult<T> {
        tracing::trace!(%syscall, %path, "dispatch");
        let result = self.resolve(path).and_then(|target| {
            let engine = self.engine(&target)?;
            op(&engine, &target.inner_path(engine.as_ref()), &target)
        });
        result.map_err(|e| enrich(e, syscall, &path.full_path(), None))
    }

    fn on_paths<T>(
        &self,
        syscall: Syscall,
        from: &VfsPath,
        to: &VfsPath,
        op: impl FnOnce(&Arc<dyn VfsOps>, &VfsPath, &Arc<dyn VfsOps>, &VfsPath) -> VfsResult<T>,
    ) -> VfsResult<T> {
        tracing::trace!(%syscall, %from, %to, "dispatch");
        let result = self.resolve(from).and_then(|a| {
            let b = self.resolve(to)?;
            let (ea, eb) = (self.engine(&a)?, self.engine(&b)?);
            if a.backend.is_none() || b.backend.is_none() {
                return Err(ErrorCode::ENOSYS.into());
            }
            op(&ea, &a.inner_path(ea.as_ref()), &eb, &b.inner_path(eb.as_ref()))
        });
        result.map_err(|e| enrich(e, syscall, &from.full_path(), Some(&to.full_path())))
    }

    fn on_fd<T>(&self, fd: Fd, syscall: Syscall, op: impl FnOnce(&dyn VfsOps, Fd) -> VfsResult<T>) -> VfsResult<T> {
        let (real, backend) = self
            .fds
            .get(&fd)
            .map(|entry| (entry.fd, Arc::clone(&entry.backend)))
            .ok_or_else(|| VfsError::new(ErrorCode::EBADF).with_syscall(syscall))?;
        op(backend.as_ref(), real).map_err(|mut e| {
            if e.syscall().is_none() {
                e.set_syscall(syscall);
            }
            e
        })
    }

    /// Stats for a mount point its backend does not know about.
    fn stat_or_mount_point(target: &Target, result: VfsResult<Stats>) -> VfsResult<Stats> {
        match result {
            Err(e) if target.at_node && is_missing(&e) => Ok(Stats::directory(MOUNT_POINT_MODE)),
            other => other,
        }
    }
}

impl VfsOps for MountTable {
    // ========================================================================
    // Metadata
    // ========================================================================

    fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        self.on_path(Syscall::Access, path, |fs, p, _| fs.access(p, mode))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<Stats> {
        self.on_path(Syscall::Stat, path, |fs, p, t| {
            Self::stat_or_mount_point(t, fs.stat(p))
        })
    }

    fn lstat(&self, path: &VfsPath) -> VfsResult<Stats> {
        self.on_path(Syscall::Lstat, path, |fs, p, t| {
            Self::stat_or_mount_point(t, fs.lstat(p))
        })
    }

    fn fstat(&self, fd: Fd) -> VfsResult<Stats> {
        self.on_fd(fd, Syscall::Fstat, |fs, fd| fs.fstat(fd))
    }

    fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        self.on_path(Syscall::Chmod, path, |fs, p, _| fs.chmod(p, mode))
    }

    fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Fchmod, |fs, fd| fs.fchmod(fd, mode))
    }

    fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()> {
        self.on_path(Syscall::Chown, path, |fs, p, _| fs.chown(p, uid, gid))
    }

    fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Fchown, |fs, fd| fs.fchown(fd, uid, gid))
    }

    fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.on_path(Syscall::Utime, path, |fs, p, _| fs.utimes(p, atime, mtime))
    }

    fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Futime, |fs, fd| fs.futimes(fd, atime, mtime))
    }

    // ========================================================================
    // File handles
    // ========================================================================

    fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        self.on_path(Syscall::Open, path, |fs, p, _| {
            let real = fs.open(p, flags, mode)?;
            let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
            self.fds.insert(
                fd,
                FdEntry {
                    fd: real,
                    backend: Arc::clone(fs),
                },
            );
            Ok(fd)
        })
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Close, |fs, fd| fs.close(fd))?;
        self.fds.remove(&fd);
        Ok(())
    }

    fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        self.on_fd(fd, Syscall::Read, |fs, fd| fs.read(fd, buf, position))
    }

    fn write(&self, fd: Fd, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        self.on_fd(fd, Syscall::Write, |fs, fd| fs.write(fd, data, position))
    }

    fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Ftruncate, |fs, fd| fs.ftruncate(fd, len))
    }

    fn fsync(&self, fd: Fd) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Fsync, |fs, fd| fs.fsync(fd))
    }

    fn fdatasync(&self, fd: Fd) -> VfsResult<()> {
        self.on_fd(fd, Syscall::Fdatasync, |fs, fd| fs.fdatasync(fd))
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        self.on_path(Syscall::Mkdir, path, |fs, p, _| fs.mkdir(p, mode))
    }

    fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.on_path(Syscall::Rmdir, path, |fs, p, _| fs.rmdir(p))
    }

    fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        self.on_path(Syscall::Scandir, path, |fs, p, t| {
            let mut names = match fs.readdir(p) {
                Ok(names) => names,
                Err(e) if t.at_node && is_missing(&e) => Vec::new(),
                Err(e) => return Err(e),
            };
            if t.at_node {
                names.extend(self.child_names(t));
                names.sort();
                names.dedup();
            }
            Ok(names)
        })
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        self.on_paths(Syscall::Rename, from, to, |a, pa, b, pb| {
            if !same_backend(a, b) {
                return Err(ErrorCode::EXDEV.into());
            }
            a.rename(pa, pb)
        })
    }

    fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.on_paths(Syscall::Link, existing, new, |a, pa, b, pb| {
            if !same_backend(a, b) {
                return Err(ErrorCode::EXDEV.into());
            }
            a.link(pa, pb)
        })
    }

    fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        self.on_path(Syscall::Unlink, path, |fs, p, _| fs.unlink(p))
    }

    fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()> {
        self.on_path(Syscall::Symlink, path, |fs, p, _| fs.symlink(target, p))
            .map_err(|e| enrich(e, Syscall::Symlink, target, Some(&path.full_path())))
    }

    fn readlink(&self, path: &VfsPath) -> VfsResult<String> {
        self.on_path(Syscall::Readlink, path, |fs, p, _| fs.readlink(p))
    }

    fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        self.on_path(Syscall::Realpath, path, |fs, p, t| {
            let answer = fs.realpath(p)?;
            Ok(t.globalize(fs.root(), &answer))
        })
    }

    fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()> {
        self.on_paths(Syscall::Copyfile, src, dest, |a, pa, b, pb| {
            if same_backend(a, b) {
                return a.copy_file(pa, pb, flags);
            }
            let perm = a.stat(pa)?.perm();
            let data = a.read_file(pa, OpenFlags::RDONLY)?;
            let mut flag = OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY;
            if flags.contains(CopyFlags::EXCL) {
                flag |= OpenFlags::EXCL;
            }
            let options = WriteFileOptions::default().with_mode(perm).with_flag(flag);
            b.write_file(pb, &data, options)
        })
    }

    fn watch(&self, path: &VfsPath, options: WatchOptions) -> VfsResult<Watcher> {
        self.on_path(Syscall::Watch, path, |fs, p, _| fs.watch(p, options))
    }
}
