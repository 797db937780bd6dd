//! End-to-end tests for dispatch across mixed backends.
//!
//! # Tiers
//!
//! - **Tier 1:** Blocking calls through a `MountTable` spanning memory and disk
//! - **Tier 2:** The async surface over the same table
//! - **Tier 3:** Namespaces built from RON mount files

use std::sync::Arc;
use std::time::Duration;

use mountvfs_kernel::{
    AsyncVfs, AsyncVfsOps, CopyFlags, ErrorCode, LocalBackend, MemoryBackend, MountTable, Syscall,
    VfsConfig, VfsOps, VfsPath, WatchEventKind, WatchFileOptions, WatchOptions, WriteFileOptions,
};
use tempfile::TempDir;

// ============================================================================
// Shared test setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mountvfs_kernel=debug")
        .with_test_writer()
        .try_init();
}

fn p(path: &str) -> VfsPath {
    VfsPath::parse(path)
}

/// `/` in memory, `/host` on a temp dir, `/scratch` in a second memory backend.
fn mixed() -> (MountTable, Arc<MemoryBackend>, TempDir) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("disk.txt"), "from disk").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let root = MemoryBackend::new();
    root.add_file("/etc/motd", "welcome").unwrap();
    root.add_symlink("/etc", "/etc/alias").unwrap();
    let scratch = Arc::new(MemoryBackend::new());

    let table = MountTable::new();
    table.mount(Arc::new(root), "/");
    table.mount(Arc::new(LocalBackend::new(dir.path())), "/host");
    table.mount(scratch.clone(), "/scratch");
    (table, scratch, dir)
}

// ============================================================================
// Tier 1: blocking dispatch
// ============================================================================

#[test]
fn test_listing_merges_mount_points() {
    let (table, _scratch, _dir) = mixed();

    assert_eq!(table.readdir(&p("/")).unwrap(), vec!["etc", "host", "scratch"]);
    assert_eq!(table.readdir(&p("/host")).unwrap(), vec!["disk.txt", "sub"]);
    assert!(table.stat(&p("/host/sub")).unwrap().is_dir());

    let mounts: Vec<String> = table.mount_points().into_iter().map(|m| m.path).collect();
    assert!(mounts.contains(&"/host".to_string()));
    assert!(mounts.contains(&"/scratch".to_string()));
}

#[test]
fn test_dotdot_after_symlink_crosses_mounts() {
    let (table, _scratch, _dir) = mixed();

    // The link is spliced before `..`, so the walk leaves the root backend.
    let path = p("/etc/alias/../host/disk.txt");
    assert_eq!(table.read_to_string(&path).unwrap(), "from disk");
    assert_eq!(table.realpath(&path).unwrap(), "/host/disk.txt");
    assert!(table.lstat(&p("/etc/alias")).unwrap().is_symlink());
}

#[test]
fn test_writes_reach_disk() {
    let (table, _scratch, dir) = mixed();

    table
        .write_file(&p("/host/sub/new.txt"), b"written", WriteFileOptions::default())
        .unwrap();
    table.append_file(&p("/host/sub/new.txt"), b"!").unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("sub/new.txt")).unwrap(),
        "written!"
    );
    assert_eq!(table.realpath(&p("/host/sub/../sub/new.txt")).unwrap(), "/host/sub/new.txt");
}

#[test]
fn test_two_path_ops_between_disk_and_memory() {
    let (table, scratch, _dir) = mixed();

    let err = table.rename(&p("/host/disk.txt"), &p("/scratch/disk.txt")).unwrap_err();
    assert!(err.is(ErrorCode::EXDEV));
    assert_eq!(err.syscall(), Some(Syscall::Rename));

    table
        .copy_file(&p("/host/disk.txt"), &p("/scratch/disk.txt"), CopyFlags::empty())
        .unwrap();
    assert_eq!(scratch.read_to_string(&p("/disk.txt")).unwrap(), "from disk");

    table.rename(&p("/scratch/disk.txt"), &p("/scratch/moved.txt")).unwrap();
    assert_eq!(scratch.readdir(&p("/")).unwrap(), vec!["moved.txt"]);
}

#[test]
fn test_errors_name_the_caller_path() {
    let (table, _scratch, _dir) = mixed();

    let err = table.stat(&p("/host/missing")).unwrap_err();
    assert!(err.is(ErrorCode::ENOENT));
    assert_eq!(err.path(), Some("/host/missing"));
    assert_eq!(
        err.to_string(),
        "ENOENT: no such file or directory, stat '/host/missing'"
    );

    let err = table.rmdir(&p("/host/disk.txt")).unwrap_err();
    assert!(err.is(ErrorCode::ENOTDIR));
    assert_eq!(err.path(), Some("/host/disk.txt"));
}

#[test]
fn test_fds_span_backends() {
    let (table, _scratch, _dir) = mixed();

    let disk = table.open(&p("/host/disk.txt"), "r".parse().unwrap(), 0o666).unwrap();
    let mem = table.open(&p("/etc/motd"), "r".parse().unwrap(), 0o666).unwrap();
    assert_ne!(disk, mem);

    let mut buf = [0u8; 4];
    assert_eq!(table.read(disk, &mut buf, Some(5)).unwrap(), 4);
    assert_eq!(&buf, b"disk");
    assert_eq!(table.read(mem, &mut buf, None).unwrap(), 4);
    assert_eq!(&buf, b"welc");

    table.close(disk).unwrap();
    table.close(mem).unwrap();
    assert!(table.fstat(disk).unwrap_err().is(ErrorCode::EBADF));
}

// ============================================================================
// Tier 2: async surface
// ============================================================================

#[tokio::test]
async fn test_async_matches_blocking() {
    let (table, _scratch, _dir) = mixed();
    let vfs = AsyncVfs::new(Arc::new(table));

    assert_eq!(
        vfs.readdir(&p("/")).await.unwrap(),
        vfs.blocking().readdir(&p("/")).unwrap()
    );
    assert_eq!(vfs.read_to_string(&p("/host/disk.txt")).await.unwrap(), "from disk");

    let async_err = vfs.readlink(&p("/etc/motd")).await.unwrap_err();
    let sync_err = vfs.blocking().readlink(&p("/etc/motd")).unwrap_err();
    assert!(async_err.is(ErrorCode::EINVAL));
    assert_eq!(async_err.to_string(), sync_err.to_string());
}

#[tokio::test]
async fn test_async_cross_mount_errors_match_blocking() {
    let (table, _scratch, _dir) = mixed();
    let vfs = AsyncVfs::new(Arc::new(table));
    let (from, to) = (p("/etc/motd"), p("/scratch/motd"));

    let async_err = vfs.rename(&from, &to).await.unwrap_err();
    let sync_err = vfs.blocking().rename(&from, &to).unwrap_err();
    assert!(async_err.is(ErrorCode::EXDEV));
    assert_eq!(async_err.syscall(), Some(Syscall::Rename));
    assert_eq!(async_err.path(), Some("/etc/motd"));
    assert_eq!(async_err.second_path(), Some("/scratch/motd"));
    assert_eq!(
        async_err.to_string(),
        "EXDEV: cross-device link not permitted, rename '/etc/motd' -> '/scratch/motd'"
    );
    assert_eq!(async_err.to_string(), sync_err.to_string());

    let async_err = vfs.link(&p("/host/disk.txt"), &to).await.unwrap_err();
    let sync_err = vfs.blocking().link(&p("/host/disk.txt"), &to).unwrap_err();
    assert!(async_err.is(ErrorCode::EXDEV));
    assert_eq!(async_err.syscall(), Some(Syscall::Link));
    assert_eq!(async_err.second_path(), sync_err.second_path());
    assert_eq!(async_err.to_string(), sync_err.to_string());

    assert!(!vfs.exists(&to).await);
    assert_eq!(vfs.read_to_string(&from).await.unwrap(), "welcome");
}

#[tokio::test]
async fn test_async_watch_through_table() {
    let (table, _scratch, _dir) = mixed();
    let vfs = AsyncVfs::new(Arc::new(table));

    let mut watcher = vfs.watch(&p("/scratch"), WatchOptions::default()).await.unwrap();
    vfs.write_file(&p("/scratch/a.txt"), b"x".to_vec(), WriteFileOptions::default())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, WatchEventKind::Rename);
    assert_eq!(event.filename, "a.txt");
}

#[tokio::test]
async fn test_async_watch_file_on_disk() {
    let (table, _scratch, _dir) = mixed();
    let vfs = AsyncVfs::new(Arc::new(table));
    let options = WatchFileOptions {
        interval: Duration::from_millis(10),
    };

    let mut watcher = vfs.watch_file(&p("/host/disk.txt"), options).await.unwrap();
    vfs.append_file(&p("/host/disk.txt"), b" and more".to_vec())
        .await
        .unwrap();

    let (prev, curr) = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prev.size, 9);
    assert_eq!(curr.size, 18);
}

// ============================================================================
// Tier 3: configured namespaces
// ============================================================================

#[tokio::test]
async fn test_configured_namespace() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.txt"), "local").unwrap();

    let config = VfsConfig::from_ron(&format!(
        r#"(
            mounts: [
                (path: "/", backend: Memory(files: {{
                    "/bin": Dir,
                    "/bin/hello": File("hi"),
                }})),
                (path: "/srv/data", backend: Local(root: "{}")),
            ],
        )"#,
        dir.path().display()
    ))
    .unwrap();
    let vfs = AsyncVfs::new(Arc::new(config.build().unwrap()));

    assert_eq!(vfs.readdir(&p("/")).await.unwrap(), vec!["bin", "srv"]);
    assert_eq!(vfs.readdir(&p("/srv")).await.unwrap(), vec!["data"]);
    assert_eq!(vfs.read_to_string(&p("/srv/data/data.txt")).await.unwrap(), "local");
    assert_eq!(vfs.read_to_string(&p("/bin/hello")).await.unwrap(), "hi");
}
