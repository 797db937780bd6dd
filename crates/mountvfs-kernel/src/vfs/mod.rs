//! Mountable virtual filesystem.
//!
//! Key components:
//!
//! - [`VfsOps`] - Synchronous backend contract; every primitive defaults to `ENOSYS`
//! - [`AsyncVfsOps`] / [`AsyncVfs`] - The same surface on tokio's blocking pool
//! - [`MountTable`] - Composes backends into one namespace and routes calls
//! - [`MemoryBackend`] - In-memory inode graph with permissions and watchers
//! - [`LocalBackend`] - Host directory exposed under a lexically clamped root
//!
//! ## Design Decisions
//!
//! - **Paths are parsed once**: [`VfsPath`] keeps segments verbatim so
//!   trailing-slash and dot rules stay with the backend.
//! - **POSIX errors everywhere**: every failure is a [`VfsError`] carrying a
//!   code, the syscall and the caller-visible paths.
//! - **Mounts nest**: [`MountTable`] is itself a [`VfsOps`].

mod async_ops;
pub mod backends;
mod error;
pub mod flags;
mod mount;
mod ops;
mod path;
mod types;
mod watch;

pub use async_ops::{AsyncVfs, AsyncVfsOps};
pub use backends::{Credentials, FileSeed, LocalBackend, MemoryBackend};
pub use error::{ErrorCode, InvalidFlags, Syscall, VfsError, VfsResult};
pub use flags::{AccessMode, CopyFlags, OpenFlags};
pub use mount::{MountInfo, MountTable};
pub use ops::VfsOps;
pub use path::VfsPath;
pub use types::{Fd, FileType, Stats, WatchFileOptions, WatchOptions, WriteFileOptions};
pub use watch::{StatWatcher, WatchEvent, WatchEventKind, Watcher};
