//! In-memory filesystem backend.
//!
//! A node graph with POSIX permission checks, open-file cursors, hard link
//! counting and change notification. Used for scratch space, for tests, and
//! as the reference implementation of [`VfsOps`]. All data is ephemeral.

mod graph;
mod hub;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::mpsc;

use self::graph::{Call, Graph, Lookup, NodeKind, Walk};
use self::hub::NodeEvent;
use crate::vfs::error::{ErrorCode, Syscall, VfsResult};
use crate::vfs::flags::{AccessMode, CopyFlags, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, OpenFlags};
use crate::vfs::ops::VfsOps;
use crate::vfs::path::VfsPath;
use crate::vfs::types::{Fd, Stats, WatchOptions};
use crate::vfs::watch::Watcher;

static NEXT_DEV: AtomicU64 = AtomicU64::new(1);

/// Identity the backend checks permissions against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, including `gid`.
    pub groups: Vec<u32>,
}

impl Credentials {
    /// The real uid/gid of this process.
    pub fn current() -> Self {
        let uid = rustix::process::getuid().as_raw();
        let gid = rustix::process::getgid().as_raw();
        Self {
            uid,
            gid,
            groups: vec![gid],
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::current()
    }
}

/// Initial state of a file added with [`MemoryBackend::add_file_with`].
#[derive(Debug, Clone, Default)]
pub struct FileSeed {
    pub contents: Vec<u8>,
    /// Permission bits, default `0o666`.
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mtime: Option<SystemTime>,
    /// Size reported while `contents` is empty.
    pub size: Option<u64>,
}

impl FileSeed {
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: contents.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via one `Mutex` around the node graph. All data is lost when
/// dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    graph: Arc<Mutex<Graph>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem owned by the current process.
    pub fn new() -> Self {
        Self::with_credentials(Credentials::current())
    }

    /// Create a filesystem that checks permissions as `creds`.
    pub fn with_credentials(creds: Credentials) -> Self {
        let dev = NEXT_DEV.fetch_add(1, Ordering::Relaxed);
        Self {
            graph: Arc::new(Mutex::new(Graph::new(dev, creds))),
        }
    }

    pub fn credentials(&self) -> Credentials {
        self.graph.lock().creds.clone()
    }

    /// Drop every node, leaving an empty root.
    pub fn clear(&self) {
        let mut graph = self.graph.lock();
        let (dev, creds) = (graph.dev, graph.creds.clone());
        *graph = Graph::new(dev, creds);
    }

    // ========================================================================
    // Bootstrap (no permission checks, parents created on demand)
    // ========================================================================

    /// Add a file with default mode and ownership.
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> VfsResult<()> {
        self.add_file_with(path, FileSeed::new(contents))
    }

    pub fn add_file_with(&self, path: &str, seed: FileSeed) -> VfsResult<()> {
        let path = VfsPath::parse(path);
        let call = Call::new(Syscall::Open, &path);
        let mut g = self.graph.lock();
        let found = g.lookup(&path, Walk::bootstrap(false), &call)?;
        if found.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        let uid = seed.uid.unwrap_or(g.creds.uid);
        let gid = seed.gid.unwrap_or(g.creds.gid);
        let mode = seed.mode.unwrap_or(DEFAULT_FILE_MODE);
        let ino = g.create_file(found.parent, &found.name, seed.contents, mode, uid, gid);
        let node = g.node_mut(ino);
        if let Some(mtime) = seed.mtime {
            node.mtime = mtime;
        }
        if let (Some(size), NodeKind::File { contents, size: declared }) = (seed.size, &mut node.kind) {
            if contents.is_empty() {
                *declared = size;
            }
        }
        Ok(())
    }

    pub fn add_directory(&self, path: &str) -> VfsResult<()> {
        let path = VfsPath::parse(path);
        let call = Call::new(Syscall::Mkdir, &path);
        let mut g = self.graph.lock();
        let found = g.lookup(&path, Walk::bootstrap(false), &call)?;
        if found.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        let (uid, gid) = (g.creds.uid, g.creds.gid);
        g.create_dir(found.parent, &found.name, DEFAULT_DIR_MODE, uid, gid);
        Ok(())
    }

    /// Add a symlink at `path` pointing to `target`.
    pub fn add_symlink(&self, target: &str, path: &str) -> VfsResult<()> {
        let path = VfsPath::parse(path);
        let call = Call::two(Syscall::Symlink, target, &path);
        let mut g = self.graph.lock();
        let found = g.lookup(&path, Walk::bootstrap(false), &call)?;
        if found.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        let (uid, gid) = (g.creds.uid, g.creds.gid);
        g.create_symlink(found.parent, &found.name, target, uid, gid);
        Ok(())
    }

    /// Resolve `path` and require that it exists.
    fn existing(g: &mut Graph, path: &VfsPath, walk: Walk, call: &Call) -> VfsResult<(u64, Lookup)> {
        let found = g.lookup(path, walk, call)?;
        match found.node {
            Some(ino) => Ok((ino, found)),
            None => Err(call.fail(ErrorCode::ENOENT)),
        }
    }

    fn with_fd<T>(&self, fd: Fd, syscall: Syscall, f: impl FnOnce(&mut Graph, u64, &Call) -> VfsResult<T>) -> VfsResult<T> {
        let call = Call::fd(syscall);
        let mut g = self.graph.lock();
        let ino = g.handle(fd, &call)?.ino;
        f(&mut g, ino, &call)
    }
}

fn set_mode(g: &mut Graph, ino: u64, mode: u32) {
    let node = g.node_mut(ino);
    node.mode = mode & 0o7777;
    node.ctime = SystemTime::now();
    g.hub.emit(ino, NodeEvent::Changed);
}

fn set_owner(g: &mut Graph, ino: u64, uid: u32, gid: u32) {
    let node = g.node_mut(ino);
    node.uid = uid;
    node.gid = gid;
    node.ctime = SystemTime::now();
    g.hub.emit(ino, NodeEvent::Changed);
}

fn set_times(g: &mut Graph, ino: u64, atime: SystemTime, mtime: SystemTime) {
    let node = g.node_mut(ino);
    node.atime = atime;
    node.mtime = mtime;
    node.ctime = SystemTime::now();
    g.hub.emit(ino, NodeEvent::Changed);
}

fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

impl VfsOps for MemoryBackend {
    // ========================================================================
    // Metadata
    // ========================================================================

    fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        let call = Call::new(Syscall::Access, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        if mode.is_empty() {
            return Ok(());
        }
        g.check(ino, mode, false, &call)
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let call = Call::new(Syscall::Stat, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        Ok(g.stats(ino))
    }

    fn lstat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let call = Call::new(Syscall::Lstat, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::no_follow(), &call)?;
        Ok(g.stats(ino))
    }

    fn fstat(&self, fd: Fd) -> VfsResult<Stats> {
        self.with_fd(fd, Syscall::Fstat, |g, ino, _| Ok(g.stats(ino)))
    }

    fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        let call = Call::new(Syscall::Chmod, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        set_mode(&mut g, ino, mode);
        Ok(())
    }

    fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()> {
        self.with_fd(fd, Syscall::Fchmod, |g, ino, _| {
            set_mode(g, ino, mode);
            Ok(())
        })
    }

    fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()> {
        let call = Call::new(Syscall::Chown, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        set_owner(&mut g, ino, uid, gid);
        Ok(())
    }

    fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()> {
        self.with_fd(fd, Syscall::Fchown, |g, ino, _| {
            set_owner(g, ino, uid, gid);
            Ok(())
        })
    }

    fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let call = Call::new(Syscall::Utime, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        set_times(&mut g, ino, atime, mtime);
        Ok(())
    }

    fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.with_fd(fd, Syscall::Futime, |g, ino, _| {
            set_times(g, ino, atime, mtime);
            Ok(())
        })
    }

    // ========================================================================
    // File handles
    // ========================================================================

    fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        let call = Call::new(Syscall::Open, path);
        let mut g = self.graph.lock();
        let nofollow = flags.contains(OpenFlags::NOFOLLOW);
        let walk = if nofollow { Walk::no_follow() } else { Walk::follow() };
        let found = g.lookup(path, walk, &call)?;

        let ino = match found.node {
            Some(ino) => {
                let node = g.node(ino);
                if nofollow && node.is_symlink() {
                    return Err(call.fail(ErrorCode::ELOOP));
                }
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(call.fail(ErrorCode::EEXIST));
                }
                let truncate = flags.contains(OpenFlags::TRUNC);
                if node.is_dir() && (flags.is_writable() || truncate) {
                    return Err(call.fail(ErrorCode::EISDIR));
                }
                let mut wanted = AccessMode::empty();
                if flags.is_readable() {
                    wanted |= AccessMode::R;
                }
                if flags.is_writable() {
                    wanted |= AccessMode::W;
                }
                // Read-write opens need either right; truncation always needs W.
                if !wanted.is_empty() {
                    g.check(ino, wanted, false, &call)?;
                }
                if truncate {
                    g.check(ino, AccessMode::W, false, &call)?;
                }
                if truncate {
                    let node = g.node_mut(ino);
                    if let NodeKind::File { contents, size } = &mut node.kind {
                        contents.clear();
                        *size = 0;
                    }
                    node.mtime = SystemTime::now();
                    node.ctime = node.mtime;
                }
                ino
            }
            None => {
                if !flags.contains(OpenFlags::CREAT) {
                    return Err(call.fail(ErrorCode::ENOENT));
                }
                g.check(found.parent, AccessMode::W, false, &call)?;
                let (uid, gid) = (g.creds.uid, g.creds.gid);
                g.create_file(found.parent, &found.name, Vec::new(), mode, uid, gid)
            }
        };
        Ok(g.open_handle(ino, flags))
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        let call = Call::fd(Syscall::Close);
        self.graph.lock().close_handle(fd, &call)
    }

    fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        let call = Call::fd(Syscall::Read);
        self.graph.lock().read(fd, buf, position, &call)
    }

    fn write(&self, fd: Fd, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        let call = Call::fd(Syscall::Write);
        self.graph.lock().write(fd, data, position, &call)
    }

    fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()> {
        let call = Call::fd(Syscall::Ftruncate);
        let mut g = self.graph.lock();
        let handle = g.handle(fd, &call)?;
        if !handle.flags.is_writable() {
            return Err(call.fail(ErrorCode::EINVAL));
        }
        let ino = handle.ino;
        g.resize(ino, len, &call)
    }

    fn fsync(&self, fd: Fd) -> VfsResult<()> {
        self.with_fd(fd, Syscall::Fsync, |_, _, _| Ok(()))
    }

    fn fdatasync(&self, fd: Fd) -> VfsResult<()> {
        self.with_fd(fd, Syscall::Fdatasync, |_, _, _| Ok(()))
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        let call = Call::new(Syscall::Mkdir, path);
        let mut g = self.graph.lock();
        let found = g.lookup(path, Walk::no_follow(), &call)?;
        if found.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        g.check(found.parent, AccessMode::W, false, &call)?;
        let (uid, gid) = (g.creds.uid, g.creds.gid);
        g.create_dir(found.parent, &found.name, mode, uid, gid);
        Ok(())
    }

    fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        let call = Call::new(Syscall::Rmdir, path);
        let mut g = self.graph.lock();
        let (ino, found) = Self::existing(&mut g, path, Walk::no_follow(), &call)?;
        if is_dot(&found.name) {
            return Err(call.fail(ErrorCode::EINVAL));
        }
        match g.children(ino) {
            None => return Err(call.fail(ErrorCode::ENOTDIR)),
            Some(children) if !children.is_empty() => {
                return Err(call.fail(ErrorCode::ENOTEMPTY));
            }
            Some(_) => {}
        }
        if ino == g.root {
            return Err(call.fail(ErrorCode::EBUSY));
        }
        g.check(found.parent, AccessMode::W, false, &call)?;

        g.detach(found.parent, &found.name);
        g.drop_link(ino);
        g.hub.emit(
            found.parent,
            NodeEvent::ChildRemoved {
                name: &found.name,
                ino,
            },
        );
        g.collect(ino);
        Ok(())
    }

    fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let call = Call::new(Syscall::Scandir, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        if !g.node(ino).is_dir() {
            return Err(call.fail(ErrorCode::ENOTDIR));
        }
        g.check(ino, AccessMode::R, false, &call)?;
        Ok(g.children(ino)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        let call = Call::two(Syscall::Rename, from, to);
        let mut g = self.graph.lock();
        let (ino, old) = Self::existing(&mut g, from, Walk::no_follow(), &call)?;
        if ino == g.root {
            return Err(call.fail(ErrorCode::EBUSY));
        }
        if is_dot(&old.name) {
            return Err(call.fail(ErrorCode::EINVAL));
        }
        let new = g.lookup(to, Walk::no_follow(), &call)?;
        if new.node == Some(ino) {
            return Ok(());
        }
        if is_dot(&new.name) {
            return Err(call.fail(ErrorCode::EINVAL));
        }

        let moving_dir = g.node(ino).is_dir();
        if let Some(dest) = new.node {
            match g.children(dest) {
                Some(_) if !moving_dir => return Err(call.fail(ErrorCode::EISDIR)),
                None if moving_dir => return Err(call.fail(ErrorCode::ENOTDIR)),
                Some(children) if !children.is_empty() => {
                    return Err(call.fail(ErrorCode::ENOTEMPTY));
                }
                _ => {}
            }
        }
        if moving_dir && g.is_within(new.parent, ino) {
            return Err(call.fail(ErrorCode::EINVAL));
        }
        g.check(old.parent, AccessMode::W, false, &call)?;
        g.check(new.parent, AccessMode::W, false, &call)?;

        g.detach(old.parent, &old.name);
        g.hub.emit(
            old.parent,
            NodeEvent::ChildRemoved {
                name: &old.name,
                ino,
            },
        );
        if let Some(dest) = new.node {
            g.detach(new.parent, &new.name);
            g.drop_link(dest);
            g.hub.emit(
                new.parent,
                NodeEvent::ChildRemoved {
                    name: &new.name,
                    ino: dest,
                },
            );
            g.collect(dest);
        }
        g.node_mut(ino).ctime = SystemTime::now();
        g.hub.emit(ino, NodeEvent::Moved { parent: new.parent });
        g.attach(new.parent, &new.name, ino);
        Ok(())
    }

    fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let call = Call::two(Syscall::Link, existing, new);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, existing, Walk::no_follow(), &call)?;
        let dest = g.lookup(new, Walk::no_follow(), &call)?;
        if dest.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        if g.node(ino).is_dir() {
            return Err(call.fail(ErrorCode::EPERM));
        }
        g.check(dest.parent, AccessMode::W, false, &call)?;

        let node = g.node_mut(ino);
        node.nlink += 1;
        node.ctime = SystemTime::now();
        g.hub.emit(ino, NodeEvent::Changed);
        g.attach(dest.parent, &dest.name, ino);
        Ok(())
    }

    fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        let call = Call::new(Syscall::Unlink, path);
        let mut g = self.graph.lock();
        let (ino, found) = Self::existing(&mut g, path, Walk::no_follow(), &call)?;
        if g.node(ino).is_dir() {
            return Err(call.fail(ErrorCode::EISDIR));
        }
        g.check(found.parent, AccessMode::W, false, &call)?;

        g.detach(found.parent, &found.name);
        g.drop_link(ino);
        g.hub.emit(
            found.parent,
            NodeEvent::ChildRemoved {
                name: &found.name,
                ino,
            },
        );
        g.collect(ino);
        Ok(())
    }

    fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()> {
        let call = Call::two(Syscall::Symlink, target, path);
        let mut g = self.graph.lock();
        let found = g.lookup(path, Walk::no_follow(), &call)?;
        if found.node.is_some() {
            return Err(call.fail(ErrorCode::EEXIST));
        }
        g.check(found.parent, AccessMode::W, false, &call)?;
        let (uid, gid) = (g.creds.uid, g.creds.gid);
        g.create_symlink(found.parent, &found.name, target, uid, gid);
        Ok(())
    }

    fn readlink(&self, path: &VfsPath) -> VfsResult<String> {
        let call = Call::new(Syscall::Readlink, path);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, path, Walk::no_follow(), &call)?;
        match &g.node(ino).kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(call.fail(ErrorCode::EINVAL)),
        }
    }

    fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        let call = Call::new(Syscall::Realpath, path);
        let mut g = self.graph.lock();
        let (ino, found) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        if g.node(ino).is_dir() {
            return Ok(g.dir_path(ino));
        }
        let parent = g.dir_path(found.parent);
        Ok(VfsPath::parse(&parent).join(found.name).full_path())
    }

    fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()> {
        let call = Call::two(Syscall::Copyfile, src, dest);
        let mut g = self.graph.lock();
        let (ino, _) = Self::existing(&mut g, src, Walk::follow(), &call)?;
        g.check(ino, AccessMode::R, false, &call)?;
        let (contents, mode) = match &g.node(ino).kind {
            NodeKind::File { contents, .. } => (contents.clone(), g.node(ino).mode),
            _ => return Err(call.fail(ErrorCode::EISDIR)),
        };

        let target = g.lookup(dest, Walk::follow(), &call)?;
        match target.node {
            Some(_) if flags.contains(CopyFlags::EXCL) => Err(call.fail(ErrorCode::EEXIST)),
            Some(existing) => {
                if g.node(existing).is_dir() {
                    return Err(call.fail(ErrorCode::EISDIR));
                }
                g.check(existing, AccessMode::W, false, &call)?;
                let node = g.node_mut(existing);
                if let NodeKind::File { contents: old, size } = &mut node.kind {
                    *size = contents.len() as u64;
                    *old = contents;
                }
                node.touch();
                g.hub.emit(existing, NodeEvent::Changed);
                Ok(())
            }
            None => {
                g.check(target.parent, AccessMode::W, false, &call)?;
                let (uid, gid) = (g.creds.uid, g.creds.gid);
                g.create_file(target.parent, &target.name, contents, mode, uid, gid);
                Ok(())
            }
        }
    }

    fn watch(&self, path: &VfsPath, _options: WatchOptions) -> VfsResult<Watcher> {
        let call = Call::new(Syscall::Watch, path);
        let mut g = self.graph.lock();
        let (ino, found) = Self::existing(&mut g, path, Walk::follow(), &call)?;
        let filename = path
            .normalize()
            .filename()
            .map_or_else(|| path.full_path(), str::to_string);

        let (tx, rx) = mpsc::unbounded_channel();
        let id = match g.children(ino) {
            Some(children) => {
                let children: Vec<(String, u64)> =
                    children.iter().map(|(name, ino)| (name.clone(), *ino)).collect();
                g.hub
                    .watch_directory(ino, found.parent, filename, children, tx)
            }
            None => g.hub.watch_file(ino, filename, tx),
        };
        tracing::debug!(path = %path, watch = id, "watching");

        let graph: Weak<Mutex<Graph>> = Arc::downgrade(&self.graph);
        Ok(Watcher::new(rx, move || {
            if let Some(graph) = graph.upgrade() {
                graph.lock().hub.close(id);
            }
        }))
    }
}
