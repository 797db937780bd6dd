//! Async surface over the synchronous backend contract.
//!
//! [`AsyncVfs`] runs every call of a [`VfsOps`] implementation on tokio's
//! blocking pool, so async callers get exactly the results and errors the
//! blocking form would return.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::error::{ErrorCode, VfsError, VfsResult};
use super::flags::{AccessMode, CopyFlags, OpenFlags};
use super::ops::VfsOps;
use super::path::VfsPath;
use super::types::{Fd, Stats, WatchFileOptions, WatchOptions, WriteFileOptions};
use super::watch::{StatWatcher, Watcher};

/// Async filesystem operations.
///
/// Mirrors [`VfsOps`] with owned buffers, plus the polling
/// [`watch_file`](AsyncVfsOps::watch_file).
#[async_trait]
pub trait AsyncVfsOps: Send + Sync {
    async fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()>;
    async fn stat(&self, path: &VfsPath) -> VfsResult<Stats>;
    async fn lstat(&self, path: &VfsPath) -> VfsResult<Stats>;
    async fn fstat(&self, fd: Fd) -> VfsResult<Stats>;
    async fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()>;
    async fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()>;
    async fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()>;
    async fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()>;
    async fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()>;
    async fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()>;

    async fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd>;
    async fn close(&self, fd: Fd) -> VfsResult<()>;
    /// Read up to `len` bytes.
    async fn read(&self, fd: Fd, len: usize, position: Option<u64>) -> VfsResult<Vec<u8>>;
    async fn write(&self, fd: Fd, data: Vec<u8>, position: Option<u64>) -> VfsResult<usize>;
    async fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()>;
    async fn fsync(&self, fd: Fd) -> VfsResult<()>;
    async fn fdatasync(&self, fd: Fd) -> VfsResult<()>;

    async fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()>;
    async fn rmdir(&self, path: &VfsPath) -> VfsResult<()>;
    async fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>>;
    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()>;
    async fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()>;
    async fn unlink(&self, path: &VfsPath) -> VfsResult<()>;
    async fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()>;
    async fn readlink(&self, path: &VfsPath) -> VfsResult<String>;
    async fn realpath(&self, path: &VfsPath) -> VfsResult<String>;
    async fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()>;

    async fn exists(&self, path: &VfsPath) -> bool;
    async fn readdir_buffers(&self, path: &VfsPath) -> VfsResult<Vec<Vec<u8>>>;
    async fn read_file(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Vec<u8>>;
    async fn read_to_string(&self, path: &VfsPath) -> VfsResult<String>;
    async fn write_file(&self, path: &VfsPath, data: Vec<u8>, options: WriteFileOptions) -> VfsResult<()>;
    async fn append_file(&self, path: &VfsPath, data: Vec<u8>) -> VfsResult<()>;
    async fn truncate(&self, path: &VfsPath, len: u64) -> VfsResult<()>;
    async fn mkdtemp(&self, prefix: &str) -> VfsResult<String>;

    async fn watch(&self, path: &VfsPath, options: WatchOptions) -> VfsResult<Watcher>;

    /// Poll `stat` every `options.interval` and report `(previous, current)`
    /// whenever the snapshot changes. A missing file polls as
    /// [`Stats::zeroed`].
    async fn watch_file(&self, path: &VfsPath, options: WatchFileOptions) -> VfsResult<StatWatcher>;
}

/// Runs a synchronous [`VfsOps`] on tokio's blocking pool.
#[derive(Debug)]
pub struct AsyncVfs<T: VfsOps + ?Sized> {
    inner: Arc<T>,
}

impl<T: VfsOps + ?Sized> Clone for AsyncVfs<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: VfsOps + ?Sized + 'static> AsyncVfs<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }

    /// The wrapped synchronous filesystem.
    pub fn blocking(&self) -> &Arc<T> {
        &self.inner
    }

    async fn run<R, F>(&self, op: F) -> VfsResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> VfsResult<R> + Send + 'static,
    {
        spawn(Arc::clone(&self.inner), op).await
    }
}

async fn spawn<T, R, F>(inner: Arc<T>, op: F) -> VfsResult<R>
where
    T: VfsOps + ?Sized + 'static,
    R: Send + 'static,
    F: FnOnce(&T) -> VfsResult<R> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(&inner)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(VfsError::new(ErrorCode::EBUSY)),
    }
}

async fn poll_stat<T: VfsOps + ?Sized + 'static>(inner: Arc<T>, path: VfsPath) -> Stats {
    spawn(inner, move |fs| fs.stat(&path))
        .await
        .unwrap_or_else(|_| Stats::zeroed())
}

#[async_trait]
impl<T: VfsOps + ?Sized + 'static> AsyncVfsOps for AsyncVfs<T> {
    async fn access(&self, path: &VfsPath, mode: AccessMode) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.access(&path, mode)).await
    }

    async fn stat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let path = path.clone();
        self.run(move |fs| fs.stat(&path)).await
    }

    async fn lstat(&self, path: &VfsPath) -> VfsResult<Stats> {
        let path = path.clone();
        self.run(move |fs| fs.lstat(&path)).await
    }

    async fn fstat(&self, fd: Fd) -> VfsResult<Stats> {
        self.run(move |fs| fs.fstat(fd)).await
    }

    async fn chmod(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.chmod(&path, mode)).await
    }

    async fn fchmod(&self, fd: Fd, mode: u32) -> VfsResult<()> {
        self.run(move |fs| fs.fchmod(fd, mode)).await
    }

    async fn chown(&self, path: &VfsPath, uid: u32, gid: u32) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.chown(&path, uid, gid)).await
    }

    async fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> VfsResult<()> {
        self.run(move |fs| fs.fchown(fd, uid, gid)).await
    }

    async fn utimes(&self, path: &VfsPath, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.utimes(&path, atime, mtime)).await
    }

    async fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.run(move |fs| fs.futimes(fd, atime, mtime)).await
    }

    async fn open(&self, path: &VfsPath, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        let path = path.clone();
        self.run(move |fs| fs.open(&path, flags, mode)).await
    }

    async fn close(&self, fd: Fd) -> VfsResult<()> {
        self.run(move |fs| fs.close(fd)).await
    }

    async fn read(&self, fd: Fd, len: usize, position: Option<u64>) -> VfsResult<Vec<u8>> {
        self.run(move |fs| {
            let mut buf = vec![0u8; len];
            let n = fs.read(fd, &mut buf, position)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    async fn write(&self, fd: Fd, data: Vec<u8>, position: Option<u64>) -> VfsResult<usize> {
        self.run(move |fs| fs.write(fd, &data, position)).await
    }

    async fn ftruncate(&self, fd: Fd, len: u64) -> VfsResult<()> {
        self.run(move |fs| fs.ftruncate(fd, len)).await
    }

    async fn fsync(&self, fd: Fd) -> VfsResult<()> {
        self.run(move |fs| fs.fsync(fd)).await
    }

    async fn fdatasync(&self, fd: Fd) -> VfsResult<()> {
        self.run(move |fs| fs.fdatasync(fd)).await
    }

    async fn mkdir(&self, path: &VfsPath, mode: u32) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.mkdir(&path, mode)).await
    }

    async fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.rmdir(&path)).await
    }

    async fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let path = path.clone();
        self.run(move |fs| fs.readdir(&path)).await
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        let (from, to) = (from.clone(), to.clone());
        self.run(move |fs| fs.rename(&from, &to)).await
    }

    async fn link(&self, existing: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let (existing, new) = (existing.clone(), new.clone());
        self.run(move |fs| fs.link(&existing, &new)).await
    }

    async fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.unlink(&path)).await
    }

    async fn symlink(&self, target: &str, path: &VfsPath) -> VfsResult<()> {
        let (target, path) = (target.to_string(), path.clone());
        self.run(move |fs| fs.symlink(&target, &path)).await
    }

    async fn readlink(&self, path: &VfsPath) -> VfsResult<String> {
        let path = path.clone();
        self.run(move |fs| fs.readlink(&path)).await
    }

    async fn realpath(&self, path: &VfsPath) -> VfsResult<String> {
        let path = path.clone();
        self.run(move |fs| fs.realpath(&path)).await
    }

    async fn copy_file(&self, src: &VfsPath, dest: &VfsPath, flags: CopyFlags) -> VfsResult<()> {
        let (src, dest) = (src.clone(), dest.clone());
        self.run(move |fs| fs.copy_file(&src, &dest, flags)).await
    }

    async fn exists(&self, path: &VfsPath) -> bool {
        let path = path.clone();
        self.run(move |fs| Ok(fs.exists(&path))).await.unwrap_or(false)
    }

    async fn readdir_buffers(&self, path: &VfsPath) -> VfsResult<Vec<Vec<u8>>> {
        let path = path.clone();
        self.run(move |fs| fs.readdir_buffers(&path)).await
    }

    async fn read_file(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Vec<u8>> {
        let path = path.clone();
        self.run(move |fs| fs.read_file(&path, flags)).await
    }

    async fn read_to_string(&self, path: &VfsPath) -> VfsResult<String> {
        let path = path.clone();
        self.run(move |fs| fs.read_to_string(&path)).await
    }

    async fn write_file(&self, path: &VfsPath, data: Vec<u8>, options: WriteFileOptions) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.write_file(&path, &data, options)).await
    }

    async fn append_file(&self, path: &VfsPath, data: Vec<u8>) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.append_file(&path, &data)).await
    }

    async fn truncate(&self, path: &VfsPath, len: u64) -> VfsResult<()> {
        let path = path.clone();
        self.run(move |fs| fs.truncate(&path, len)).await
    }

    async fn mkdtemp(&self, prefix: &str) -> VfsResult<String> {
        let prefix = prefix.to_string();
        self.run(move |fs| fs.mkdtemp(&prefix)).await
    }

    async fn watch(&self, path: &VfsPath, options: WatchOptions) -> VfsResult<Watcher> {
        let path = path.clone();
        self.run(move |fs| fs.watch(&path, options)).await
    }

    async fn watch_file(&self, path: &VfsPath, options: WatchFileOptions) -> VfsResult<StatWatcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let path = path.clone();

        let mut prev = poll_stat(Arc::clone(&inner), path.clone()).await;
        if prev.same_snapshot(&Stats::zeroed()) {
            let _ = tx.send((Stats::zeroed(), Stats::zeroed()));
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(options.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let curr = poll_stat(Arc::clone(&inner), path.clone()).await;
                if curr.same_snapshot(&prev) {
                    continue;
                }
                tracing::trace!(path = %path, "watched file changed");
                if tx.send((prev.clone(), curr.clone())).is_err() {
                    tracing::warn!(path = %path, "stat watcher receiver dropped");
                    return;
                }
                prev = curr;
            }
        });

        Ok(StatWatcher::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryBackend;
    use std::time::Duration;

    fn fs() -> AsyncVfs<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.add_file("/hello.txt", b"hello world").unwrap();
        backend.add_directory("/dir").unwrap();
        AsyncVfs::new(Arc::new(backend))
    }

    fn p(path: &str) -> VfsPath {
        VfsPath::parse(path)
    }

    fn fast() -> WatchFileOptions {
        WatchFileOptions {
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_results_match_blocking_form() {
        let fs = fs();

        let sync_stat = fs.blocking().stat(&p("/hello.txt")).unwrap();
        assert_eq!(fs.stat(&p("/hello.txt")).await.unwrap(), sync_stat);

        let sync_err = fs.blocking().stat(&p("/missing")).unwrap_err();
        let async_err = fs.stat(&p("/missing")).await.unwrap_err();
        assert_eq!(async_err.message(), sync_err.message());
        assert!(async_err.is(ErrorCode::ENOENT));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let fs = fs();

        let fd = fs.open(&p("/hello.txt"), OpenFlags::RDWR, 0o666).await.unwrap();
        assert_eq!(fs.read(fd, 5, Some(6)).await.unwrap(), b"world");
        assert_eq!(fs.write(fd, b"HELLO".to_vec(), Some(0)).await.unwrap(), 5);
        fs.close(fd).await.unwrap();

        assert_eq!(fs.read_to_string(&p("/hello.txt")).await.unwrap(), "HELLO world");
        assert!(fs.close(fd).await.unwrap_err().is(ErrorCode::EBADF));
    }

    #[tokio::test]
    async fn test_composed_operations() {
        let fs = fs();

        fs.write_file(&p("/dir/a"), b"one".to_vec(), WriteFileOptions::default())
            .await
            .unwrap();
        fs.append_file(&p("/dir/a"), b"two".to_vec()).await.unwrap();
        assert_eq!(fs.read_file(&p("/dir/a"), OpenFlags::RDONLY).await.unwrap(), b"onetwo");

        fs.truncate(&p("/dir/a"), 3).await.unwrap();
        assert_eq!(fs.read_to_string(&p("/dir/a")).await.unwrap(), "one");
        assert!(fs.exists(&p("/dir/a")).await);
        assert!(!fs.exists(&p("/dir/b")).await);
        assert_eq!(fs.readdir_buffers(&p("/dir")).await.unwrap(), vec![b"a".to_vec()]);

        let tmp = fs.mkdtemp("/dir/tmp-").await.unwrap();
        assert!(tmp.starts_with("/dir/tmp-"));
        assert_eq!(tmp.len(), "/dir/tmp-".len() + 6);
    }

    #[tokio::test]
    async fn test_watch_file_reports_change() {
        let fs = fs();
        let mut watcher = fs.watch_file(&p("/hello.txt"), fast()).await.unwrap();

        fs.append_file(&p("/hello.txt"), b"!".to_vec()).await.unwrap();

        let (prev, curr) = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prev.size, 11);
        assert_eq!(curr.size, 12);
        watcher.close();
    }

    #[tokio::test]
    async fn test_watch_file_missing_then_created() {
        let fs = fs();
        let mut watcher = fs.watch_file(&p("/later"), fast()).await.unwrap();

        let (prev, curr) = watcher.recv().await.unwrap();
        assert_eq!(prev, Stats::zeroed());
        assert_eq!(curr, Stats::zeroed());

        fs.write_file(&p("/later"), b"x".to_vec(), WriteFileOptions::default())
            .await
            .unwrap();
        let (prev, curr) = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prev, Stats::zeroed());
        assert!(curr.is_file());
    }

    #[tokio::test]
    async fn test_closed_stat_watcher_is_silent() {
        let fs = fs();
        let mut watcher = fs.watch_file(&p("/hello.txt"), fast()).await.unwrap();
        watcher.close();

        fs.append_file(&p("/hello.txt"), b"!".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watcher.try_recv().is_none());
        assert!(watcher.recv().await.is_none());
    }
}
