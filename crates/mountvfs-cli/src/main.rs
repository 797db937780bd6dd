//! mountvfs command-line explorer.
//!
//! Builds a namespace from a RON mount file and runs one command against it.
//!
//! Usage:
//!   # Empty in-memory namespace
//!   cargo run -p mountvfs-cli -- ls /
//!
//!   # Namespace from a mount file
//!   cargo run -p mountvfs-cli -- --config mounts.ron tree /
//!   RUST_LOG=mountvfs_kernel=trace cargo run -p mountvfs-cli -- --config mounts.ron cat /etc/motd

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{EnvFilter, fmt};

use mountvfs_kernel::{AsyncVfs, AsyncVfsOps, MountTable, OpenFlags, Stats, VfsConfig, VfsPath};

/// Explore a mountable virtual filesystem.
#[derive(Parser, Debug)]
#[command(name = "mountvfs")]
#[command(about = "Run filesystem commands against a composed mount namespace")]
struct Args {
    /// RON mount file (defaults to one empty in-memory backend at /)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List directory entries
    Ls { path: String },
    /// Print file contents
    Cat { path: String },
    /// Show file metadata
    Stat { path: String },
    /// Print a symlink's target
    Readlink { path: String },
    /// Print the canonical path
    Realpath { path: String },
    /// Print the tree below a directory (symlinks are not followed)
    Tree { path: String },
    /// List mount points
    Mounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VfsConfig::load(path)?,
        None => VfsConfig::scratch(),
    };
    let table = Arc::new(config.build()?);
    tracing::debug!(mounts = table.mount_points().len(), "namespace ready");

    let vfs = AsyncVfs::new(Arc::clone(&table));
    let mut out = std::io::stdout().lock();

    match args.command {
        Command::Ls { path } => {
            for name in vfs.readdir(&VfsPath::parse(&path)).await? {
                writeln!(out, "{name}")?;
            }
        }
        Command::Cat { path } => {
            out.write_all(&vfs.read_file(&VfsPath::parse(&path), OpenFlags::RDONLY).await?)?;
        }
        Command::Stat { path } => {
            let stats = vfs.stat(&VfsPath::parse(&path)).await?;
            print_stats(&mut out, &path, &stats)?;
        }
        Command::Readlink { path } => {
            writeln!(out, "{}", vfs.readlink(&VfsPath::parse(&path)).await?)?;
        }
        Command::Realpath { path } => {
            writeln!(out, "{}", vfs.realpath(&VfsPath::parse(&path)).await?)?;
        }
        Command::Tree { path } => print_tree(&mut out, &vfs, &path).await?,
        Command::Mounts => {
            for mount in table.mount_points() {
                writeln!(out, "{}\t(level {})", mount.path, mount.level)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

fn seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn print_stats(out: &mut impl Write, path: &str, stats: &Stats) -> Result<()> {
    let kind = match stats.file_type() {
        Some(t) if t.is_dir() => "directory",
        Some(t) if t.is_symlink() => "symbolic link",
        Some(_) => "regular file",
        None => "unknown",
    };
    writeln!(out, "  File: {path}")?;
    writeln!(
        out,
        "  Size: {}\tBlocks: {}\tIO Block: {}\t{kind}",
        stats.size, stats.blocks, stats.blksize
    )?;
    writeln!(out, "Device: {}\tInode: {}\tLinks: {}", stats.dev, stats.ino, stats.nlink)?;
    writeln!(out, "Access: ({:04o})\tUid: {}\tGid: {}", stats.perm(), stats.uid, stats.gid)?;
    writeln!(out, "Access: {}", seconds(stats.atime))?;
    writeln!(out, "Modify: {}", seconds(stats.mtime))?;
    writeln!(out, "Change: {}", seconds(stats.ctime))?;
    writeln!(out, " Birth: {}", seconds(stats.birthtime))?;
    Ok(())
}

async fn print_tree(out: &mut impl Write, vfs: &AsyncVfs<MountTable>, root: &str) -> Result<()> {
    let root = VfsPath::parse(root).normalize();
    let label = root.full_path();
    let mut stack = vec![(root, label, 0usize)];

    // Pre-order: pop an entry, print it, push its children in reverse.
    while let Some((path, label, depth)) = stack.pop() {
        let stats = vfs.lstat(&path).await?;
        let indent = "  ".repeat(depth);
        if stats.is_symlink() {
            let target = vfs.readlink(&path).await?;
            writeln!(out, "{indent}{label} -> {target}")?;
        } else if stats.is_dir() {
            let slash = if label.ends_with('/') { "" } else { "/" };
            writeln!(out, "{indent}{label}{slash}")?;
            let names = vfs.readdir(&path).await?;
            stack.extend(
                names
                    .into_iter()
                    .rev()
                    .map(|name| (path.join(name.as_str()), name, depth + 1)),
            );
        } else {
            writeln!(out, "{indent}{label}")?;
        }
    }
    Ok(())
}
