//! Open flags, access modes and mode bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::InvalidFlags;

/// File type mask.
pub const S_IFMT: u32 = 0o170000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Default permission bits for new files.
pub const DEFAULT_FILE_MODE: u32 = 0o666;
/// Default permission bits for new directories.
pub const DEFAULT_DIR_MODE: u32 = 0o775;

bitflags! {
    /// `O_*` open flags (Linux values). Read-only is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
        const NOFOLLOW = 0o400000;
        const SYNC = 0o4010000;
    }
}

impl OpenFlags {
    /// `O_RDONLY`.
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    /// Whether a handle opened with these flags may be read from.
    pub fn is_readable(self) -> bool {
        self.contains(OpenFlags::RDWR) || !self.contains(OpenFlags::WRONLY)
    }

    /// Whether a handle opened with these flags may be written to.
    pub fn is_writable(self) -> bool {
        self.intersects(OpenFlags::RDWR | OpenFlags::WRONLY)
    }
}

impl FromStr for OpenFlags {
    type Err = InvalidFlags;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use OpenFlags as F;
        let flags = match s {
            "r" => F::RDONLY,
            "rs" | "sr" => F::RDONLY | F::SYNC,
            "r+" => F::RDWR,
            "rs+" | "sr+" => F::RDWR | F::SYNC,
            "w" => F::TRUNC | F::CREAT | F::WRONLY,
            "wx" | "xw" => F::TRUNC | F::CREAT | F::WRONLY | F::EXCL,
            "w+" => F::TRUNC | F::CREAT | F::RDWR,
            "wx+" | "xw+" => F::TRUNC | F::CREAT | F::RDWR | F::EXCL,
            "a" => F::APPEND | F::CREAT | F::WRONLY,
            "ax" | "xa" => F::APPEND | F::CREAT | F::WRONLY | F::EXCL,
            "a+" => F::APPEND | F::CREAT | F::RDWR,
            "ax+" | "xa+" => F::APPEND | F::CREAT | F::RDWR | F::EXCL,
            other => return Err(InvalidFlags(other.to_string())),
        };
        Ok(flags)
    }
}

impl From<u32> for OpenFlags {
    fn from(bits: u32) -> Self {
        OpenFlags::from_bits_retain(bits)
    }
}

bitflags! {
    /// `access()` modes. `F_OK` (existence) is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u32 {
        const R = 4;
        const W = 2;
        const X = 1;
    }
}

impl AccessMode {
    /// `F_OK`: existence only.
    pub const F_OK: AccessMode = AccessMode::empty();
}

bitflags! {
    /// `copyFile` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CopyFlags: u32 {
        /// Fail with `EEXIST` when the destination exists.
        const EXCL = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(s: &str) -> OpenFlags {
        s.parse().unwrap()
    }

    #[test]
    fn test_fopen_table() {
        assert_eq!(mode("r"), OpenFlags::RDONLY);
        assert_eq!(mode("sr"), OpenFlags::SYNC);
        assert_eq!(mode("r+").bits(), 0o2);
        assert_eq!(mode("w").bits(), 0o1101);
        assert_eq!(mode("xw+").bits(), 0o1302);
        assert_eq!(mode("a").bits(), 0o2101);
        assert_eq!(mode("ax+").bits(), 0o2302);
    }

    #[test]
    fn test_invalid_flag_string() {
        let err = "rw".parse::<OpenFlags>().unwrap_err();
        assert_eq!(err, InvalidFlags("rw".into()));
        assert_eq!(err.to_string(), "unknown file open flag: rw");
    }

    #[test]
    fn test_readable_writable() {
        assert!(mode("r").is_readable());
        assert!(!mode("r").is_writable());
        assert!(mode("r+").is_readable());
        assert!(mode("r+").is_writable());
        assert!(!mode("w").is_readable());
        assert!(mode("a+").is_readable());
    }

    #[test]
    fn test_raw_bits_preserved() {
        let flags = OpenFlags::from(0o2 | 0o100 | 0o40000);
        assert!(flags.contains(OpenFlags::RDWR | OpenFlags::CREAT));
        assert_eq!(flags.bits(), 0o40102);
    }
}
