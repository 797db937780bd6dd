//! # mountvfs-kernel
//!
//! A mountable virtual filesystem with POSIX semantics.
//!
//! Backends (in-memory, local disk, or anything implementing [`VfsOps`]) are
//! mounted into one [`MountTable`], which resolves paths across mount points
//! and symlinks and routes each call to the backend that owns it.
//!
//! ```
//! use std::sync::Arc;
//! use mountvfs_kernel::{MemoryBackend, MountTable, VfsOps, VfsPath};
//!
//! let scratch = MemoryBackend::new();
//! scratch.add_file("/notes.txt", "hello").unwrap();
//!
//! let table = MountTable::new();
//! table.mount(Arc::new(MemoryBackend::new()), "/");
//! table.mount(Arc::new(scratch), "/scratch");
//!
//! let text = table.read_to_string(&VfsPath::parse("/scratch/notes.txt")).unwrap();
//! assert_eq!(text, "hello");
//! ```

pub mod config;
pub mod vfs;

pub use config::{BackendConfig, ConfigError, MountConfig, SeedEntry, VfsConfig};
pub use vfs::{
    AccessMode, AsyncVfs, AsyncVfsOps, CopyFlags, Credentials, ErrorCode, Fd, FileSeed, FileType,
    LocalBackend, MemoryBackend, MountInfo, MountTable, OpenFlags, StatWatcher, Stats, Syscall,
    VfsError, VfsOps, VfsPath, VfsResult, WatchEvent, WatchEventKind, WatchFileOptions,
    WatchOptions, Watcher, WriteFileOptions,
};
