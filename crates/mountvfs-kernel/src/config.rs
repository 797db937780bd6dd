//! RON mount configuration.
//!
//! A config file lists the mounts of one namespace in order:
//!
//! ```ron
//! (
//!     mounts: [
//!         (path: "/", backend: Memory(files: {
//!             "/etc/motd": File("hello\n"),
//!             "/tmp": Dir,
//!             "/etc/current": Symlink("motd"),
//!         })),
//!         (path: "/host", backend: Local(root: "./data")),
//!     ],
//!     credentials: Some((uid: 1000, gid: 1000, groups: [1000])),
//! )
//! ```
//!
//! Mounts may be listed in any order: directories between two mount points
//! are served by the nearest mounted ancestor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::vfs::{Credentials, LocalBackend, MemoryBackend, MountTable, VfsError, VfsOps};

/// Errors from loading or building a mount configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("seeding failed: {0}")]
    Vfs(#[from] VfsError),
}

/// One entry seeded into an in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedEntry {
    File(String),
    Dir,
    Symlink(String),
}

/// Which backend serves a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendConfig {
    Memory {
        #[serde(default)]
        files: BTreeMap<String, SeedEntry>,
    },
    Local {
        root: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub path: String,
    pub backend: BackendConfig,
}

/// A complete namespace description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsConfig {
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    /// Credentials for in-memory backends. Defaults to the process's own.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl VfsConfig {
    /// Load a config file. Relative local roots resolve against the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_ron(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for mount in &mut config.mounts {
            if let BackendConfig::Local { root } = &mut mount.backend {
                if root.is_relative() {
                    *root = base.join(&*root);
                }
            }
        }
        tracing::debug!(path = %path.display(), mounts = config.mounts.len(), "loaded mount config");
        Ok(config)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// A single empty in-memory backend at `/`.
    pub fn scratch() -> Self {
        Self {
            mounts: vec![MountConfig {
                path: "/".to_string(),
                backend: BackendConfig::Memory {
                    files: BTreeMap::new(),
                },
            }],
            credentials: None,
        }
    }

    /// Instantiate every backend and mount them in order.
    pub fn build(&self) -> Result<MountTable, ConfigError> {
        let table = MountTable::new();
        for mount in &self.mounts {
            let backend: Arc<dyn VfsOps> = match &mount.backend {
                BackendConfig::Memory { files } => Arc::new(self.seed_memory(files)?),
                BackendConfig::Local { root } => Arc::new(LocalBackend::new(root)),
            };
            table.mount(backend, &mount.path);
        }
        Ok(table)
    }

    fn seed_memory(&self, files: &BTreeMap<String, SeedEntry>) -> Result<MemoryBackend, ConfigError> {
        let backend = match &self.credentials {
            Some(creds) => MemoryBackend::with_credentials(creds.clone()),
            None => MemoryBackend::new(),
        };
        for (path, entry) in files {
            match entry {
                SeedEntry::File(text) => backend.add_file(path, text.as_bytes())?,
                SeedEntry::Dir => backend.add_directory(path)?,
                SeedEntry::Symlink(target) => backend.add_symlink(target, path)?,
            }
        }
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{ErrorCode, VfsPath};

    const SAMPLE: &str = r#"(
        mounts: [
            (path: "/", backend: Memory(files: {
                "/etc/motd": File("hello\n"),
                "/tmp": Dir,
                "/etc/current": Symlink("motd"),
            })),
            (path: "/scratch", backend: Memory(files: {})),
        ],
        credentials: Some((uid: 1000, gid: 100, groups: [100])),
    )"#;

    #[test]
    fn test_parse_sample() {
        let config = VfsConfig::from_ron(SAMPLE).unwrap();
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.mounts[1].path, "/scratch");
        assert_eq!(
            config.credentials,
            Some(Credentials {
                uid: 1000,
                gid: 100,
                groups: vec![100],
            })
        );
        match &config.mounts[0].backend {
            BackendConfig::Memory { files } => {
                assert_eq!(files.get("/tmp"), Some(&SeedEntry::Dir));
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn test_build_seeds_backends() {
        let table = VfsConfig::from_ron(SAMPLE).unwrap().build().unwrap();

        assert_eq!(
            table.read_to_string(&VfsPath::parse("/etc/current")).unwrap(),
            "hello\n"
        );
        assert!(table.stat(&VfsPath::parse("/tmp")).unwrap().is_dir());
        assert_eq!(
            table.readdir(&VfsPath::parse("/")).unwrap(),
            vec!["etc", "scratch", "tmp"]
        );
        let stats = table.stat(&VfsPath::parse("/etc/motd")).unwrap();
        assert_eq!((stats.uid, stats.gid), (1000, 100));
    }

    #[test]
    fn test_deep_mount_listed_first() {
        let table = VfsConfig::from_ron(
            r#"(mounts: [
                (path: "/srv/data", backend: Memory(files: { "/inner": File("deep") })),
                (path: "/", backend: Memory(files: { "/srv/readme": File("top") })),
            ])"#,
        )
        .unwrap()
        .build()
        .unwrap();

        assert_eq!(
            table.readdir(&VfsPath::parse("/srv")).unwrap(),
            vec!["data", "readme"]
        );
        assert_eq!(
            table.read_to_string(&VfsPath::parse("/srv/readme")).unwrap(),
            "top"
        );
        assert_eq!(
            table.read_to_string(&VfsPath::parse("/srv/data/inner")).unwrap(),
            "deep"
        );
    }

    #[test]
    fn test_parse_error() {
        let err = VfsConfig::from_ron("(mounts: [(path: 1)])").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_seed_conflict_is_vfs_error() {
        let config = VfsConfig::from_ron(
            r#"(mounts: [(path: "/", backend: Memory(files: {
                "/a": File("x"),
                "/a/b": File("y"),
            }))])"#,
        )
        .unwrap();
        match config.build().unwrap_err() {
            ConfigError::Vfs(e) => assert!(e.is(ErrorCode::ENOTDIR)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_load_resolves_local_root() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/file.txt"), "on disk").unwrap();
        let config_path = dir.path().join("mounts.ron");
        std::fs::write(
            &config_path,
            r#"(mounts: [
                (path: "/", backend: Memory(files: {})),
                (path: "/host", backend: Local(root: "data")),
            ])"#,
        )
        .unwrap();

        let config = VfsConfig::load(&config_path).unwrap();
        let table = config.build().unwrap();
        assert_eq!(
            table.read_to_string(&VfsPath::parse("/host/file.txt")).unwrap(),
            "on disk"
        );
    }

    #[test]
    fn test_missing_file() {
        let err = VfsConfig::load("/nonexistent/mounts.ron").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_scratch_is_writable() {
        let table = VfsConfig::scratch().build().unwrap();
        table.mkdir(&VfsPath::parse("/work"), 0o755).unwrap();
        assert_eq!(table.readdir(&VfsPath::parse("/")).unwrap(), vec!["work"]);
    }
}
