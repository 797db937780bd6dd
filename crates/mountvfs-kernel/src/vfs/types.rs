//! Core VFS types: stat records and per-call options.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::flags::{OpenFlags, DEFAULT_FILE_MODE, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

/// File descriptor handed out by backends and the dispatcher.
pub type Fd = u32;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// The `S_IF*` bits for this type.
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }
}

/// `stat(2)`-style metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub dev: u64,
    pub ino: u64,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    /// Size in bytes.
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
}

impl Stats {
    /// All-zero stats, reported for paths that do not exist.
    pub fn zeroed() -> Self {
        Self {
            dev: 0,
            ino: 0,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            blksize: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            birthtime: UNIX_EPOCH,
        }
    }

    /// Stats for a directory that exists only as a mount point.
    pub fn directory(perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            mode: S_IFDIR | (perm & 0o7777),
            nlink: 2,
            size: 4,
            blksize: 4096,
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
            ..Self::zeroed()
        }
    }

    /// File type from the mode bits, if recognised.
    pub fn file_type(&self) -> Option<FileType> {
        match self.mode & S_IFMT {
            S_IFREG => Some(FileType::File),
            S_IFDIR => Some(FileType::Directory),
            S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Equality as seen by stat polling. Access time is ignored.
    pub fn same_snapshot(&self, other: &Stats) -> bool {
        self.dev == other.dev
            && self.ino == other.ino
            && self.size == other.size
            && self.mode == other.mode
            && self.nlink == other.nlink
            && self.uid == other.uid
            && self.gid == other.gid
            && self.mtime == other.mtime
            && self.ctime == other.ctime
    }
}

/// Options for `write_file` / `append_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteFileOptions {
    /// Permission bits used if the file gets created.
    pub mode: u32,
    /// Open flags.
    pub flag: OpenFlags,
}

impl Default for WriteFileOptions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_FILE_MODE,
            flag: OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY,
        }
    }
}

impl WriteFileOptions {
    /// Defaults for `append_file`.
    pub fn append() -> Self {
        Self {
            flag: OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::WRONLY,
            ..Self::default()
        }
    }

    /// Set the creation mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Set the open flags.
    pub fn with_flag(mut self, flag: OpenFlags) -> Self {
        self.flag = flag;
        self
    }
}

/// Options for `watch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Also report nested directories. Backends may ignore this.
    pub recursive: bool,
}

/// Options for `watch_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchFileOptions {
    /// Polling interval.
    pub interval: Duration,
}

impl Default for WatchFileOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5007),
        }
    }
}
