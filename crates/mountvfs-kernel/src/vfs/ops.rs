//! VFS operations trait.
//!
//! [`VfsOps`] is the contract every mountable backend implements. It is
//! synchronous; [`AsyncVfs`](super::AsyncVfs) derives the async surface from
//! it. Every primitive has a default body that fails with `ENOSYS`, so a
//! backend implements only what it supports.

use std::time::SystemTime;

use super::error::{ErrorCode, Syscall, VfsError, VfsResult};
use super::flags::{AccessMode, CopyFlags, DEFAULT_FILE_MODE, OpenFlags};
use super::path::VfsPath;
use super::types::{Fd, Stats, WatchOptions, WriteFileOptions};
use super::watch::Watcher;

/// Chunk size used by the composed whole-file operations.
const CHUNK: usize = 64 * 1024;

/// Random attempts before `mkdtemp` gives up.
const MKDTEMP_ATTEMPTS: usize = 64;

fn unsupported<T>(syscall: Syscall) -> VfsResult<T> {
    Err(VfsError::new(ErrorCode::ENOSYS).with_syscall(syscall))
}

/// Core VFS operations trait.
///
/// Paths are relative to the backend's own root (see [`VfsOps::root`]).
/// The [`MountTable`](super::MountTable) handles routing and path
/// translation, and is itself a `VfsOps`.
#[allow(unused_variables)]
pub trait VfsOps: Send + Sync {
    /// Root string this backend reports absolute paths under.
    fn root(&self) -> &str {
        "/"
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        unsupported(Syscall::Access)
    }

    /// Stat, following a terminal symlink.
    fn stat(&self, path: &VfsPath) -> VfsResult<Stats> {
        unsupported(Syscall::Stat)
    }

    /// Stat without following a terminal symlink.
    fn lstat(&self, path: &VfsPath) -> VfsResult<Stats> {
        unsupported(Syscall::Lstat)
    }

    fn fstat(&self, fd: Fd) -> VfsResult<Stats> {
        unsupported(Syscall::Fstat)
    }

    fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        unsupported(Syscall::Chmod)
    }

    fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()> {
        unsupported(Syscall::Fchmod)
    }

    fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()> {
        unsupported(Syscall::Chown)
    }

    fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()> {
        unsupported(Syscall::Fchown)
    }

    fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        unsupported(Syscall::Utime)
    }

    fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        unsupported(Syscall::Futime)
    }

    // ========================================================================
    // File handles
    // ========================================================================

    /// Open `path`, returning a descriptor. `mode` applies on creation.
    fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        unsupported(Syscall::Open)
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        unsupported(Syscall::Close)
    }

    /// Read into `buf`. `None` reads at (and advances) the cursor; an
    /// explicit position leaves the cursor alone.
    fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        unsupported(Syscall::Read)
    }

    /// Write `data`. Cursor rules match [`VfsOps::read`].
    fn write(&self, fd: Fd, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        unsupported(Syscall::Write)
    }

    fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()> {
        unsupported(Syscall::Ftruncate)
    }

    fn fsync(&self, fd: Fd) -> VfsResult<()> {
        unsupported(Syscall::Fsync)
    }

    fn fdatasync(&self, fd: Fd) -> VfsResult<()> {
        unsupported(Syscall::Fdatasync)
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        unsupported(Syscall::Mkdir)
    }

    fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        unsupported(Syscall::Rmdir)
    }

    /// Sorted entry names, without `.` and `..`.
    fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        unsupported(Syscall::Scandir)
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        unsupported(Syscall::Rename)
    }

    /// Create a hard link `new` to `existing`.
    fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        unsupported(Syscall::Link)
    }

    fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        unsupported(Syscall::Unlink)
    }

    /// Create a symlink at `path` whose (unresolved) target is `target`.
    fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()> {
        unsupported(Syscall::Symlink)
    }

    fn readlink(&self, path: &VfsPath) -> VfsResult<String> {
        unsupported(Syscall::Readlink)
    }

    /// Canonical absolute path with every symlink resolved.
    fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        unsupported(Syscall::Realpath)
    }

    fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()> {
        unsupported(Syscall::Copyfile)
    }

    fn watch(&self, path: &VfsPath, options: WatchOptions) -> VfsResult<Watcher> {
        unsupported(Syscall::Watch)
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &VfsPath) -> bool {
        self.stat(path).is_ok()
    }

    /// Entry names as raw bytes.
    fn readdir_buffers(&self, path: &VfsPath) -> VfsResult<Vec<Vec<u8>>> {
        Ok(self
            .readdir(path)?
            .into_iter()
            .map(String::into_bytes)
            .collect())
    }

    /// Read a whole file.
    fn read_file(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Vec<u8>> {
        let fd = self.open(path, flags, DEFAULT_FILE_MODE)?;
        let result = read_to_end(self, fd);
        let closed = self.close(fd);
        let data = result?;
        closed?;
        Ok(data)
    }

    /// Read a whole file as UTF-8 (lossy).
    fn read_to_string(&self, path: &VfsPath) -> VfsResult<String> {
        let data = self.read_file(path, OpenFlags::RDONLY)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Replace (by default) the contents of a file.
    fn write_file(&self, path: &VfsPath, data: &[u8], options: WriteFileOptions) -> VfsResult<()> {
        let fd = self.open(path, options.flag, options.mode)?;
        let result = write_all(self, fd, data);
        let closed = self.close(fd);
        result?;
        closed
    }

    /// Append to a file, creating it if needed.
    fn append_file(&self, path: &VfsPath, data: &[u8]) -> VfsResult<()> {
        self.write_file(path, data, WriteFileOptions::append())
    }

    /// Set a file's length, zero-padding on growth.
    fn truncate(&self, path: &VfsPath, len: u64) -> VfsResult<()> {
        let fd = self.open(path, OpenFlags::RDWR, DEFAULT_FILE_MODE)?;
        let result = self.ftruncate(fd, len);
        let closed = self.close(fd);
        result?;
        closed
    }

    /// Create a uniquely named directory `prefix` + six random characters.
    fn mkdtemp(&self, prefix: &str) -> VfsResult<String> {
        for _ in 0..MKDTEMP_ATTEMPTS {
            let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
            let candidate = format!("{prefix}{suffix}");
            match self.mkdir(&VfsPath::parse(&candidate), 0o700) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.is(ErrorCode::EEXIST) => continue,
                Err(mut e) => {
                    e.set_syscall(Syscall::Mkdtemp);
                    return Err(e);
                }
            }
        }
        Err(VfsError::new(ErrorCode::EEXIST)
            .with_syscall(Syscall::Mkdtemp)
            .with_path(format!("{prefix}XXXXXX")))
    }
}

fn read_to_end<T: VfsOps + ?Sized>(fs: &T, fd: Fd) -> VfsResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; CHUNK];
    loop {
        let n = fs.read(fd, &mut chunk, None)?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

fn write_all<T: VfsOps + ?Sized>(fs: &T, fd: Fd, data: &[u8]) -> VfsResult<()> {
    // An empty write still reaches the backend so watchers see the change.
    if data.is_empty() {
        fs.write(fd, data, None)?;
        return Ok(());
    }
    let mut written = 0;
    while written < data.len() {
        let n = fs.write(fd, &data[written..], None)?;
        if n == 0 {
            return Err(VfsError::new(ErrorCode::ENOSPC).with_syscall(Syscall::Write));
        }
        written += n;
    }
    Ok(())
}
