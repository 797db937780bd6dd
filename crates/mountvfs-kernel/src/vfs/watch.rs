//! Change notification handles.
//!
//! [`Watcher`] delivers `rename`/`change` events for a path watched through
//! [`VfsOps::watch`](super::VfsOps::watch). [`StatWatcher`] delivers
//! `(previous, current)` stat pairs from the polling `watch_file`.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::Stats;

/// Kind of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum WatchEventKind {
    /// An entry appeared, disappeared or was renamed.
    Rename,
    /// Contents or metadata changed.
    Change,
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Name of the affected entry (never a full path).
    pub filename: String,
}

impl WatchEvent {
    pub fn rename(filename: impl Into<String>) -> Self {
        Self {
            kind: WatchEventKind::Rename,
            filename: filename.into(),
        }
    }

    pub fn change(filename: impl Into<String>) -> Self {
        Self {
            kind: WatchEventKind::Change,
            filename: filename.into(),
        }
    }
}

type Closer = Box<dyn FnOnce() + Send>;

/// Subscription to change events on one path.
///
/// Dropping the watcher unsubscribes it.
pub struct Watcher {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    closer: Option<Closer>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("closed", &self.closer.is_none())
            .finish()
    }
}

impl Watcher {
    /// Wrap a receiver. `closer` runs once, on `close()` or drop, and must
    /// detach the sending side from its source.
    pub fn new(
        rx: mpsc::UnboundedReceiver<WatchEvent>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            closer: Some(Box::new(closer)),
        }
    }

    /// Wait for the next event. Returns `None` once closed.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued event.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop watching. Queued events are discarded.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stat polling subscription returned by `watch_file`.
///
/// Dropping it stops the polling task.
#[derive(Debug)]
pub struct StatWatcher {
    rx: mpsc::UnboundedReceiver<(Stats, Stats)>,
    task: Option<JoinHandle<()>>,
}

impl StatWatcher {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<(Stats, Stats)>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wait for the next `(previous, current)` pair.
    pub async fn recv(&mut self) -> Option<(Stats, Stats)> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<(Stats, Stats)> {
        self.rx.try_recv().ok()
    }

    /// Stop polling (`unwatchFile`).
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for StatWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
