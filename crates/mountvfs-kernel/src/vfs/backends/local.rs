//! Local filesystem backend.
//!
//! Provides access to real filesystem paths under a root directory. Paths
//! are mapped lexically, so `..` cannot climb above the root.

use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use notify::event::ModifyKind;
use std::fs::{self, File, FileTimes, Metadata, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::vfs::error::{ErrorCode, Syscall, VfsError, VfsResult};
use crate::vfs::flags::{AccessMode, CopyFlags, OpenFlags};
use crate::vfs::ops::VfsOps;
use crate::vfs::path::VfsPath;
use crate::vfs::types::{Fd, Stats, WatchOptions};
use crate::vfs::watch::{WatchEvent, Watcher};

fn io_error(e: io::Error, syscall: Syscall, path: &VfsPath) -> VfsError {
    VfsError::from(e)
        .with_syscall(syscall)
        .with_path(path.full_path())
}

fn fd_error(e: io::Error, syscall: Syscall) -> VfsError {
    VfsError::from(e).with_syscall(syscall)
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = u32::try_from(nsecs).unwrap_or(0);
    match u64::try_from(secs) {
        Ok(secs) => UNIX_EPOCH + Duration::new(secs, nanos),
        Err(_) => UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()),
    }
}

/// Convert host metadata to [`Stats`].
fn metadata_to_stats(meta: &Metadata) -> Stats {
    Stats {
        dev: meta.dev(),
        ino: meta.ino(),
        mode: meta.mode(),
        nlink: meta.nlink(),
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev(),
        size: meta.size(),
        blksize: meta.blksize(),
        blocks: meta.blocks(),
        atime: unix_time(meta.atime(), meta.atime_nsec()),
        mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
        ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        birthtime: meta.created().unwrap_or(UNIX_EPOCH),
    }
}

fn watch_error(e: notify::Error, path: &VfsPath) -> VfsError {
    let err = match e.kind {
        notify::ErrorKind::Io(io) => VfsError::from(io),
        notify::ErrorKind::PathNotFound => VfsError::new(ErrorCode::ENOENT),
        notify::ErrorKind::MaxFilesWatch => VfsError::new(ErrorCode::ENOSPC),
        _ => VfsError::new(ErrorCode::EINVAL),
    };
    err.with_syscall(Syscall::Watch).with_path(path.full_path())
}

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/home/amy/project`, then `/src/main.rs` reads
/// `/home/amy/project/src/main.rs`. Symlinks on disk are followed by the
/// host, so a link pointing outside the root is honoured.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
    files: DashMap<Fd, File>,
    next_fd: AtomicU32,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            files: DashMap::new(),
            next_fd: AtomicU32::new(3),
        }
    }

    /// Get the host root path.
    pub fn host_root(&self) -> &Path {
        &self.root
    }

    /// Map a backend path onto the host, clamped at the root.
    fn host(&self, path: &VfsPath) -> PathBuf {
        let normalized = VfsPath::from_segments("/", path.segments().iter().cloned()).normalize();
        let mut host = self.root.clone();
        host.extend(normalized.segments());
        host
    }

    fn with_file<T>(&self, fd: Fd, syscall: Syscall, op: impl FnOnce(&File) -> io::Result<T>) -> VfsResult<T> {
        let file = self
            .files
            .get(&fd)
            .ok_or_else(|| VfsError::new(ErrorCode::EBADF).with_syscall(syscall))?;
        op(&file).map_err(|e| fd_error(e, syscall))
    }
}

impl VfsOps for LocalBackend {
    // ========================================================================
    // Metadata
    // ========================================================================

    fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        use rustix::fs::Access;

        let mut access = Access::EXISTS;
        if mode.contains(AccessMode::R) {
            access |= Access::READ_OK;
        }
        if mode.contains(AccessMode::W) {
            access |= Access::WRITE_OK;
        }
        if mode.contains(AccessMode::X) {
            access |= Access::EXEC_OK;
        }
        rustix::fs::access(self.host(path).as_path(), access)
            .map_err(|e| io_error(e.into(), Syscall::Access, path))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let meta = fs::metadata(self.host(path)).map_err(|e| io_error(e, Syscall::Stat, path))?;
        Ok(metadata_to_stats(&meta))
    }

    fn lstat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let meta = fs::symlink_metadata(self.host(path))
            .map_err(|e| io_error(e, Syscall::Lstat, path))?;
        Ok(metadata_to_stats(&meta))
    }

    fn fstat(&self, fd: Fd) -> VfsResult<Stats> {
        let meta = self.with_file(fd, Syscall::Fstat, File::metadata)?;
        Ok(metadata_to_stats(&meta))
    }

    fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        fs::set_permissions(self.host(path), Permissions::from_mode(mode & 0o7777))
            .map_err(|e| io_error(e, Syscall::Chmod, path))
    }

    fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()> {
        self.with_file(fd, Syscall::Fchmod, |file| {
            file.set_permissions(Permissions::from_mode(mode & 0o7777))
        })
    }

    fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()> {
        std::os::unix::fs::chown(self.host(path), Some(uid), Some(gid))
            .map_err(|e| io_error(e, Syscall::Chown, path))
    }

    fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()> {
        self.with_file(fd, Syscall::Fchown, |file| {
            std::os::unix::fs::fchown(file, Some(uid), Some(gid))
        })
    }

    fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let times = FileTimes::new().set_accessed(atime).set_modified(mtime);
        File::open(self.host(path))
            .and_then(|file| file.set_times(times))
            .map_err(|e| io_error(e, Syscall::Utime, path))
    }

    fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let times = FileTimes::new().set_accessed(atime).set_modified(mtime);
        self.with_file(fd, Syscall::Futime, |file| file.set_times(times))
    }

    // ========================================================================
    // File handles
    // ========================================================================

    fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        let mut custom = rustix::fs::OFlags::empty();
        if flags.contains(OpenFlags::NOFOLLOW) {
            custom |= rustix::fs::OFlags::NOFOLLOW;
        }
        if flags.contains(OpenFlags::SYNC) {
            custom |= rustix::fs::OFlags::SYNC;
        }

        let file = OpenOptions::new()
            .read(flags.is_readable())
            .write(flags.is_writable())
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNC))
            .create(flags.contains(OpenFlags::CREAT))
            .create_new(flags.contains(OpenFlags::CREAT | OpenFlags::EXCL))
            .mode(mode)
            .custom_flags(custom.bits() as i32)
            .open(self.host(path))
            .map_err(|e| io_error(e, Syscall::Open, path))?;

        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.files.insert(fd, file);
        Ok(fd)
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        self.files
            .remove(&fd)
            .map(drop)
            .ok_or_else(|| VfsError::new(ErrorCode::EBADF).with_syscall(Syscall::Close))
    }

    fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        self.with_file(fd, Syscall::Read, |mut file| match position {
            Some(offset) => file.read_at(buf, offset),
            None => file.read(buf),
        })
    }

    fn write(&self, fd: Fd, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        self.with_file(fd, Syscall::Write, |mut file| match position {
            Some(offset) => file.write_at(data, offset),
            None => file.write(data),
        })
    }

    fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()> {
        self.with_file(fd, Syscall::Ftruncate, |file| file.set_len(len))
    }

    fn fsync(&self, fd: Fd) -> VfsResult<()> {
        self.with_file(fd, Syscall::Fsync, File::sync_all)
    }

    fn fdatasync(&self, fd: Fd) -> VfsResult<()> {
        self.with_file(fd, Syscall::Fdatasync, File::sync_data)
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        fs::DirBuilder::new()
            .mode(mode)
            .create(self.host(path))
            .map_err(|e| io_error(e, Syscall::Mkdir, path))
    }

    fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        fs::remove_dir(self.host(path)).map_err(|e| io_error(e, Syscall::Rmdir, path))
    }

    fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let entries = fs::read_dir(self.host(path)).map_err(|e| io_error(e, Syscall::Scandir, path))?;
        let mut names = entries
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| io_error(e, Syscall::Scandir, path))?;
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        fs::rename(self.host(from), self.host(to)).map_err(|e| {
            io_error(e, Syscall::Rename, from).with_second_path(to.full_path())
        })
    }

    fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        fs::hard_link(self.host(existing), self.host(new)).map_err(|e| {
            io_error(e, Syscall::Link, existing).with_second_path(new.full_path())
        })
    }

    fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        fs::remove_file(self.host(path)).map_err(|e| io_error(e, Syscall::Unlink, path))
    }

    fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()> {
        std::os::unix::fs::symlink(target, self.host(path)).map_err(|e| {
            VfsError::from(e)
                .with_syscall(Syscall::Symlink)
                .with_path(target)
                .with_second_path(path.full_path())
        })
    }

    fn readlink(&self, path: &VfsPath) -> VfsResult<String> {
        let target = fs::read_link(self.host(path)).map_err(|e| io_error(e, Syscall::Readlink, path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        // Use dunce for clean canonical paths (no \\?\ on Windows)
        let canonical =
            dunce::canonicalize(self.host(path)).map_err(|e| io_error(e, Syscall::Realpath, path))?;
        let relative = canonical.strip_prefix(&self.root).map_err(|_| {
            VfsError::new(ErrorCode::EACCES)
                .with_syscall(Syscall::Realpath)
                .with_path(path.full_path())
        })?;
        let segments = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned());
        Ok(VfsPath::from_segments("/", segments).full_path())
    }

    fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()> {
        let fail = |e: io::Error| io_error(e, Syscall::Copyfile, src).with_second_path(dest.full_path());
        let target = self.host(dest);
        if flags.contains(CopyFlags::EXCL) && fs::symlink_metadata(&target).is_ok() {
            return Err(fail(io::ErrorKind::AlreadyExists.into()));
        }
        fs::copy(self.host(src), target).map(drop).map_err(fail)
    }

    fn watch(&self, path: &VfsPath, _options: WatchOptions) -> VfsResult<Watcher> {
        let host = self.host(path);
        fs::metadata(&host).map_err(|e| io_error(e, Syscall::Watch, path))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let fallback = path.filename().unwrap_or("/").to_string();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "local watch error");
                        return;
                    }
                };
                let rename = match event.kind {
                    EventKind::Create(_) | EventKind::Remove(_) => true,
                    EventKind::Modify(ModifyKind::Name(_)) => true,
                    EventKind::Modify(_) => false,
                    _ => return,
                };
                for changed in &event.paths {
                    let filename = changed
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| fallback.clone());
                    let out = if rename {
                        WatchEvent::rename(filename)
                    } else {
                        WatchEvent::change(filename)
                    };
                    if tx.send(out).is_err() {
                        return;
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| watch_error(e, path))?;

        watcher
            .watch(&host, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(e, path))?;
        tracing::debug!(path = %host.display(), "watching host path");

        Ok(Watcher::new(rx, move || drop(watcher)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::types::WriteFileOptions;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    fn p(path: &str) -> VfsPath {
        VfsPath::parse(path)
    }

    #[test]
    fn test_write_and_read() {
        let (backend, dir) = setup();

        backend
            .write_file(&p("/test.txt"), b"hello world", WriteFileOptions::default())
            .unwrap();
        assert_eq!(backend.read_to_string(&p("/test.txt")).unwrap(), "hello world");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("test.txt")).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn test_positional_io() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/f"), b"hello world", WriteFileOptions::default())
            .unwrap();

        let fd = backend.open(&p("/f"), "r+".parse().unwrap(), 0o644).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(backend.read(fd, &mut buf, Some(6)).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(backend.read(fd, &mut buf, None).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        backend.write(fd, b"WORLD", Some(6)).unwrap();
        backend.ftruncate(fd, 8).unwrap();
        assert_eq!(backend.fstat(fd).unwrap().size, 8);
        backend.close(fd).unwrap();

        assert_eq!(backend.read_to_string(&p("/f")).unwrap(), "hello WO");
        assert!(backend.close(fd).unwrap_err().is(ErrorCode::EBADF));
    }

    #[test]
    fn test_mkdir_and_readdir() {
        let (backend, _dir) = setup();

        backend.mkdir(&p("/subdir"), 0o755).unwrap();
        backend
            .write_file(&p("/subdir/file.txt"), b"", WriteFileOptions::default())
            .unwrap();
        backend
            .write_file(&p("/root.txt"), b"", WriteFileOptions::default())
            .unwrap();

        assert_eq!(backend.readdir(&p("/")).unwrap(), vec!["root.txt", "subdir"]);
        assert!(backend.stat(&p("/subdir")).unwrap().is_dir());
        assert!(backend.mkdir(&p("/subdir"), 0o755).unwrap_err().is(ErrorCode::EEXIST));
        assert!(backend.rmdir(&p("/subdir")).unwrap_err().is(ErrorCode::ENOTEMPTY));
    }

    #[test]
    fn test_path_escape_clamped() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/inside"), b"x", WriteFileOptions::default())
            .unwrap();

        assert_eq!(
            backend.read_to_string(&p("/../../../inside")).unwrap(),
            "x"
        );
        let err = backend.stat(&p("/../../etc/passwd")).unwrap_err();
        assert!(err.is(ErrorCode::ENOENT));
        assert_eq!(err.syscall(), Some(Syscall::Stat));
    }

    #[test]
    fn test_symlink_and_realpath() {
        let (backend, _dir) = setup();
        backend.mkdir(&p("/real"), 0o755).unwrap();
        backend
            .write_file(&p("/real/target.txt"), b"content", WriteFileOptions::default())
            .unwrap();

        backend.symlink("real", &p("/link")).unwrap();
        assert_eq!(backend.readlink(&p("/link")).unwrap(), "real");
        assert!(backend.lstat(&p("/link")).unwrap().is_symlink());
        assert_eq!(
            backend.realpath(&p("/link/target.txt")).unwrap(),
            "/real/target.txt"
        );
        assert_eq!(backend.realpath(&p("/")).unwrap(), "/");
        assert!(backend.realpath(&p("/nonexistent")).unwrap_err().is(ErrorCode::ENOENT));
    }

    #[test]
    fn test_rename_link_unlink() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/old.txt"), b"content", WriteFileOptions::default())
            .unwrap();

        backend.rename(&p("/old.txt"), &p("/new.txt")).unwrap();
        assert!(backend.stat(&p("/old.txt")).unwrap_err().is(ErrorCode::ENOENT));

        backend.link(&p("/new.txt"), &p("/linked.txt")).unwrap();
        assert_eq!(backend.stat(&p("/new.txt")).unwrap().nlink, 2);
        backend.unlink(&p("/new.txt")).unwrap();
        assert_eq!(backend.read_to_string(&p("/linked.txt")).unwrap(), "content");

        let err = backend.rename(&p("/missing"), &p("/x")).unwrap_err();
        assert!(err.is(ErrorCode::ENOENT));
        assert_eq!(err.second_path(), Some("/x"));
    }

    #[test]
    fn test_copy_file_exclusive() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/a"), b"payload", WriteFileOptions::default())
            .unwrap();
        backend.copy_file(&p("/a"), &p("/b"), CopyFlags::empty()).unwrap();
        assert_eq!(backend.read_to_string(&p("/b")).unwrap(), "payload");
        assert!(
            backend
                .copy_file(&p("/a"), &p("/b"), CopyFlags::EXCL)
                .unwrap_err()
                .is(ErrorCode::EEXIST)
        );
    }

    #[test]
    fn test_metadata_updates() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/f"), b"x", WriteFileOptions::default())
            .unwrap();

        backend.chmod(&p("/f"), 0o600).unwrap();
        assert_eq!(backend.stat(&p("/f")).unwrap().perm(), 0o600);

        let when = UNIX_EPOCH + Duration::from_secs(1_000_000);
        backend.utimes(&p("/f"), when, when).unwrap();
        assert_eq!(backend.stat(&p("/f")).unwrap().mtime, when);

        backend.access(&p("/f"), AccessMode::R | AccessMode::W).unwrap();
        assert!(
            backend
                .access(&p("/missing"), AccessMode::F_OK)
                .unwrap_err()
                .is(ErrorCode::ENOENT)
        );
    }

    #[test]
    fn test_exclusive_open() {
        let (backend, _dir) = setup();
        backend
            .write_file(&p("/f"), b"x", WriteFileOptions::default())
            .unwrap();
        let err = backend.open(&p("/f"), "wx".parse().unwrap(), 0o644).unwrap_err();
        assert!(err.is(ErrorCode::EEXIST));
        assert_eq!(err.path(), Some("/f"));
    }

    #[tokio::test]
    async fn test_watch_reports_changes() {
        let (backend, _dir) = setup();
        backend.mkdir(&p("/d"), 0o755).unwrap();
        let mut watcher = backend.watch(&p("/d"), WatchOptions::default()).unwrap();

        backend
            .write_file(&p("/d/new.txt"), b"x", WriteFileOptions::default())
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("no watch event")
            .expect("watcher closed");
        assert_eq!(event.filename, "new.txt");
        watcher.close();
    }
}
