//! VFS error types.
//!
//! Every filesystem failure is a [`VfsError`]: a POSIX error code plus the
//! syscall and path(s) it happened on. The dispatcher usually learns the
//! caller-visible path only after a backend has already failed, so the
//! context fields are settable and the rendered message is rebuilt each time
//! one changes.

use std::fmt;
use std::io;
use thiserror::Error;

/// POSIX error codes understood by the VFS.
#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
pub enum ErrorCode {
    ENOENT,
    EEXIST,
    EISDIR,
    ENOTDIR,
    ELOOP,
    EINVAL,
    EBADF,
    EACCES,
    EPERM,
    ENOTEMPTY,
    ENOSYS,
    ENXIO,
    ESPIPE,
    EFBIG,
    ENODEV,
    EBUSY,
    ENOSPC,
    EXDEV,
}

impl ErrorCode {
    /// Fixed human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::ENOENT => "no such file or directory",
            ErrorCode::EEXIST => "file already exists",
            ErrorCode::EISDIR => "illegal operation on a directory",
            ErrorCode::ENOTDIR => "not a directory",
            ErrorCode::ELOOP => "too many symbolic links encountered",
            ErrorCode::EINVAL => "invalid argument",
            ErrorCode::EBADF => "bad file descriptor",
            ErrorCode::EACCES => "permission denied",
            ErrorCode::EPERM => "operation not permitted",
            ErrorCode::ENOTEMPTY => "directory not empty",
            ErrorCode::ENOSYS => "function not implemented",
            ErrorCode::ENXIO => "no such device or address",
            ErrorCode::ESPIPE => "invalid seek",
            ErrorCode::EFBIG => "file too large",
            ErrorCode::ENODEV => "no such device",
            ErrorCode::EBUSY => "resource busy or locked",
            ErrorCode::ENOSPC => "no space left on device",
            ErrorCode::EXDEV => "cross-device link not permitted",
        }
    }

    /// Linux errno value.
    pub fn errno(self) -> i32 {
        match self {
            ErrorCode::EPERM => 1,
            ErrorCode::ENOENT => 2,
            ErrorCode::ENXIO => 6,
            ErrorCode::EBADF => 9,
            ErrorCode::EACCES => 13,
            ErrorCode::EBUSY => 16,
            ErrorCode::EEXIST => 17,
            ErrorCode::EXDEV => 18,
            ErrorCode::ENODEV => 19,
            ErrorCode::ENOTDIR => 20,
            ErrorCode::EISDIR => 21,
            ErrorCode::EINVAL => 22,
            ErrorCode::EFBIG => 27,
            ErrorCode::ENOSPC => 28,
            ErrorCode::ESPIPE => 29,
            ErrorCode::ENOSYS => 38,
            ErrorCode::ENOTEMPTY => 39,
            ErrorCode::ELOOP => 40,
        }
    }

    /// Map a raw errno value back to a code.
    pub fn from_errno(errno: i32) -> Option<Self> {
        use strum::IntoEnumIterator;
        ErrorCode::iter().find(|code| code.errno() == errno)
    }
}

/// POSIX call names attached to errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Syscall {
    Access,
    Chmod,
    Chown,
    Close,
    Copyfile,
    Fchmod,
    Fchown,
    Fdatasync,
    Fstat,
    Fsync,
    Ftruncate,
    Futime,
    Link,
    Lstat,
    Mkdir,
    Mkdtemp,
    Open,
    Read,
    Readlink,
    Realpath,
    Rename,
    Rmdir,
    Scandir,
    Stat,
    Symlink,
    Unlink,
    Utime,
    Watch,
    Write,
}

/// A filesystem error with POSIX code and call context.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct VfsError {
    code: ErrorCode,
    syscall: Option<Syscall>,
    path: Option<String>,
    second_path: Option<String>,
    message: String,
}

impl PartialEq for VfsError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.syscall == other.syscall
            && self.path == other.path
            && self.second_path == other.second_path
    }
}

impl VfsError {
    /// Create an error carrying only a code.
    pub fn new(code: ErrorCode) -> Self {
        let mut err = Self {
            code,
            syscall: None,
            path: None,
            second_path: None,
            message: String::new(),
        };
        err.render();
        err
    }

    /// Builder form of [`VfsError::set_syscall`].
    pub fn with_syscall(mut self, syscall: Syscall) -> Self {
        self.set_syscall(syscall);
        self
    }

    /// Builder form of [`VfsError::set_path`].
    pub fn with_path(mut self, path: impl fmt::Display) -> Self {
        self.set_path(path);
        self
    }

    /// Builder form of [`VfsError::set_second_path`].
    pub fn with_second_path(mut self, path: impl fmt::Display) -> Self {
        self.set_second_path(path);
        self
    }

    pub fn set_syscall(&mut self, syscall: Syscall) {
        self.syscall = Some(syscall);
        self.render();
    }

    pub fn set_path(&mut self, path: impl fmt::Display) {
        self.path = Some(path.to_string());
        self.render();
    }

    pub fn set_second_path(&mut self, path: impl fmt::Display) {
        self.second_path = Some(path.to_string());
        self.render();
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn syscall(&self) -> Option<Syscall> {
        self.syscall
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn second_path(&self) -> Option<&str> {
        self.second_path.as_deref()
    }

    /// Fixed description of the code.
    pub fn description(&self) -> &'static str {
        self.code.description()
    }

    /// Rendered message, also used by `Display`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error carries `code`.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    fn render(&mut self) {
        let mut message = format!("{}: {}", self.code, self.code.description());
        if let Some(syscall) = self.syscall {
            message.push_str(&format!(", {}", syscall));
        }
        if let Some(path) = &self.path {
            message.push_str(&format!(" '{}'", path));
        }
        if let Some(second) = &self.second_path {
            message.push_str(&format!(" -> '{}'", second));
        }
        self.message = message;
    }
}

impl From<ErrorCode> for VfsError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

/// Map host I/O errors onto the VFS taxonomy.
impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        if let Some(code) = e.raw_os_error().and_then(ErrorCode::from_errno) {
            return Self::new(code);
        }
        let code = match e.kind() {
            io::ErrorKind::NotFound => ErrorCode::ENOENT,
            io::ErrorKind::AlreadyExists => ErrorCode::EEXIST,
            io::ErrorKind::PermissionDenied => ErrorCode::EACCES,
            io::ErrorKind::NotADirectory => ErrorCode::ENOTDIR,
            io::ErrorKind::IsADirectory => ErrorCode::EISDIR,
            io::ErrorKind::DirectoryNotEmpty => ErrorCode::ENOTEMPTY,
            io::ErrorKind::CrossesDevices => ErrorCode::EXDEV,
            io::ErrorKind::StorageFull => ErrorCode::ENOSPC,
            io::ErrorKind::FileTooLarge => ErrorCode::EFBIG,
            io::ErrorKind::NotSeekable => ErrorCode::ESPIPE,
            io::ErrorKind::ResourceBusy => ErrorCode::EBUSY,
            io::ErrorKind::Unsupported => ErrorCode::ENOSYS,
            _ => ErrorCode::EINVAL,
        };
        Self::new(code)
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        let kind = io::Error::from_raw_os_error(e.code.errno()).kind();
        io::Error::new(kind, e)
    }
}

/// Malformed open-flag string. This is a caller bug, not a filesystem error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown file open flag: {0}")]
pub struct InvalidFlags(pub String);

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_recomputed() {
        let mut err = VfsError::new(ErrorCode::ENOENT);
        assert_eq!(err.to_string(), "ENOENT: no such file or directory");

        err.set_syscall(Syscall::Open);
        assert_eq!(err.to_string(), "ENOENT: no such file or directory, open");

        err.set_path("/a/b");
        assert_eq!(
            err.to_string(),
            "ENOENT: no such file or directory, open '/a/b'"
        );

        err.set_path("/mnt/a/b");
        assert_eq!(
            err.to_string(),
            "ENOENT: no such file or directory, open '/mnt/a/b'"
        );
    }

    #[test]
    fn test_second_path() {
        let err = VfsError::new(ErrorCode::EEXIST)
            .with_syscall(Syscall::Link)
            .with_path("/a")
            .with_second_path("/b");
        assert_eq!(err.to_string(), "EEXIST: file already exists, link '/a' -> '/b'");
        assert_eq!(err.second_path(), Some("/b"));
    }

    #[test]
    fn test_syscall_names() {
        assert_eq!(Syscall::Scandir.to_string(), "scandir");
        assert_eq!(Syscall::Futime.to_string(), "futime");
        assert_eq!(Syscall::Copyfile.to_string(), "copyfile");
    }

    #[test]
    fn test_code_parse_and_errno() {
        let code: ErrorCode = "ENOTEMPTY".parse().unwrap();
        assert_eq!(code, ErrorCode::ENOTEMPTY);
        assert_eq!(ErrorCode::from_errno(2), Some(ErrorCode::ENOENT));
        assert_eq!(ErrorCode::from_errno(40), Some(ErrorCode::ELOOP));
        assert_eq!(ErrorCode::from_errno(9999), None);
    }

    #[test]
    fn test_io_round_trip() {
        let err = VfsError::from(io::Error::from_raw_os_error(21));
        assert!(err.is(ErrorCode::EISDIR));

        let io_err: io::Error = VfsError::new(ErrorCode::ENOENT).into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        let kind_only = VfsError::from(io::Error::new(io::ErrorKind::AlreadyExists, "x"));
        assert!(kind_only.is(ErrorCode::EEXIST));
    }
}
