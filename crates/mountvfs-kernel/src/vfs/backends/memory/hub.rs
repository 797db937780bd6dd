//! Subscription hub behind in-memory watchers.
//!
//! Node events are published on two channels per inode: `Content` (the
//! node's own data, metadata and link count) and `Structure` (entries added
//! to or removed from a directory). A file watch subscribes to its target's
//! content channel. A directory watch subscribes to its target's structure
//! channel, to each child's content channel, and to its parent's structure
//! channel to notice its own removal. Child subscriptions are added and
//! dropped as entries come and go, the parent subscription follows the
//! directory when it moves, and everything keyed on a node goes away once
//! the node is collected.

use std::collections::HashMap;
use tokio::sync::mpsc;

use super::graph::Ino;
use crate::vfs::watch::WatchEvent;

pub(super) type WatchId = u64;

/// What happened to a node.
#[derive(Debug, Clone, Copy)]
pub(super) enum NodeEvent<'a> {
    /// Contents, metadata or link count changed.
    Changed,
    /// Last link removed.
    Unlinked,
    /// Entry moved to another name or directory.
    Moved { parent: Ino },
    ChildAdded { name: &'a str, ino: Ino },
    ChildRemoved { name: &'a str, ino: Ino },
}

impl NodeEvent<'_> {
    fn channel(&self) -> Channel {
        match self {
            NodeEvent::Changed | NodeEvent::Unlinked | NodeEvent::Moved { .. } => {
                Channel::Content
            }
            NodeEvent::ChildAdded { .. } | NodeEvent::ChildRemoved { .. } => Channel::Structure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Content,
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    /// File watch on its own node.
    Target,
    /// Directory watch on its own entries.
    Children,
    /// Directory watch on its parent, for its own removal.
    Parent,
    /// Directory watch on one entry's content.
    Child(String),
}

#[derive(Debug, Clone)]
struct Subscription {
    watch: WatchId,
    role: Role,
}

#[derive(Debug)]
struct WatchEntry {
    filename: String,
    target: Ino,
    /// Directory watched for the target's removal (directory watches only).
    parent: Option<Ino>,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

enum Follow {
    Subscribe(Ino, String),
    Unsubscribe(Ino, String),
}

#[derive(Debug, Default)]
pub(super) struct WatchHub {
    next_id: WatchId,
    watches: HashMap<WatchId, WatchEntry>,
    subscriptions: HashMap<(Ino, Channel), Vec<Subscription>>,
}

impl WatchHub {
    /// Watch a non-directory node.
    pub(super) fn watch_file(
        &mut self,
        target: Ino,
        filename: String,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> WatchId {
        let id = self.register(target, None, filename, tx);
        self.subscribe(target, Channel::Content, id, Role::Target);
        id
    }

    /// Watch a directory and its current entries.
    pub(super) fn watch_directory(
        &mut self,
        target: Ino,
        parent: Ino,
        filename: String,
        children: impl IntoIterator<Item = (String, Ino)>,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> WatchId {
        let id = self.register(target, Some(parent), filename, tx);
        self.subscribe(target, Channel::Structure, id, Role::Children);
        self.subscribe(parent, Channel::Structure, id, Role::Parent);
        for (name, ino) in children {
            self.subscribe(ino, Channel::Content, id, Role::Child(name));
        }
        id
    }

    /// Drop a watch and all of its subscriptions.
    pub(super) fn close(&mut self, id: WatchId) {
        if self.watches.remove(&id).is_none() {
            return;
        }
        self.subscriptions.retain(|_, subs| {
            subs.retain(|sub| sub.watch != id);
            !subs.is_empty()
        });
    }

    /// Drop every subscription keyed on a node that no longer exists.
    pub(super) fn forget(&mut self, ino: Ino) {
        self.subscriptions.remove(&(ino, Channel::Content));
        self.subscriptions.remove(&(ino, Channel::Structure));
    }

    #[cfg(test)]
    pub(super) fn is_subscribed(&self, ino: Ino) -> bool {
        self.subscriptions
            .keys()
            .any(|&(subscribed, _)| subscribed == ino)
    }

    /// Number of live watches.
    pub(super) fn len(&self) -> usize {
        self.watches.len()
    }

    /// Deliver `event` on `ino` to every interested watch.
    pub(super) fn emit(&mut self, ino: Ino, event: NodeEvent<'_>) {
        if let NodeEvent::Moved { parent } = event {
            self.reparent(ino, parent);
        }
        let Some(subs) = self.subscriptions.get(&(ino, event.channel())) else {
            return;
        };
        let subs = subs.clone();
        let mut dead = Vec::new();

        for sub in subs {
            let Some(entry) = self.watches.get(&sub.watch) else {
                continue;
            };
            let (out, follow) = match (&sub.role, event) {
                (Role::Target, NodeEvent::Changed) => {
                    (Some(WatchEvent::change(&entry.filename)), None)
                }
                (Role::Target, NodeEvent::Unlinked | NodeEvent::Moved { .. }) => {
                    (Some(WatchEvent::rename(&entry.filename)), None)
                }
                (Role::Children, NodeEvent::ChildAdded { name, ino }) => (
                    Some(WatchEvent::rename(name)),
                    Some(Follow::Subscribe(ino, name.to_string())),
                ),
                (Role::Children, NodeEvent::ChildRemoved { name, ino }) => (
                    Some(WatchEvent::rename(name)),
                    Some(Follow::Unsubscribe(ino, name.to_string())),
                ),
                (Role::Parent, NodeEvent::ChildRemoved { ino, .. }) if ino == entry.target => {
                    (Some(WatchEvent::rename(&entry.filename)), None)
                }
                (Role::Child(name), NodeEvent::Changed) => (Some(WatchEvent::change(name)), None),
                _ => (None, None),
            };

            if let Some(out) = out {
                if entry.tx.send(out).is_err() {
                    dead.push(sub.watch);
                    continue;
                }
            }
            match follow {
                Some(Follow::Subscribe(child, name)) => {
                    self.subscribe(child, Channel::Content, sub.watch, Role::Child(name));
                }
                Some(Follow::Unsubscribe(child, name)) => {
                    self.unsubscribe(child, Channel::Content, sub.watch, &Role::Child(name));
                }
                None => {}
            }
        }

        for id in dead {
            tracing::warn!(watch = id, "watch receiver dropped without close, unsubscribing");
            self.close(id);
        }
    }

    /// Point directory watches on `ino` at its new parent.
    fn reparent(&mut self, ino: Ino, parent: Ino) {
        let stale: Vec<(WatchId, Ino)> = self
            .watches
            .iter()
            .filter(|(_, entry)| entry.target == ino)
            .filter_map(|(&id, entry)| {
                let old = entry.parent.filter(|&old| old != parent)?;
                Some((id, old))
            })
            .collect();
        for (id, old) in stale {
            self.unsubscribe(old, Channel::Structure, id, &Role::Parent);
            self.subscribe(parent, Channel::Structure, id, Role::Parent);
            if let Some(entry) = self.watches.get_mut(&id) {
                entry.parent = Some(parent);
            }
        }
    }

    fn register(
        &mut self,
        target: Ino,
        parent: Option<Ino>,
        filename: String,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> WatchId {
        self.next_id += 1;
        let id = self.next_id;
        self.watches.insert(
            id,
            WatchEntry {
                filename,
                target,
                parent,
                tx,
            },
        );
        id
    }

    fn subscribe(&mut self, ino: Ino, channel: Channel, watch: WatchId, role: Role) {
        self.subscriptions
            .entry((ino, channel))
            .or_default()
            .push(Subscription { watch, role });
    }

    fn unsubscribe(&mut self, ino: Ino, channel: Channel, watch: WatchId, role: &Role) {
        if let Some(subs) = self.subscriptions.get_mut(&(ino, channel)) {
            subs.retain(|sub| !(sub.watch == watch && &sub.role == role));
            if subs.is_empty() {
                self.subscriptions.remove(&(ino, channel));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> Vec<WatchEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_file_watch() {
        let mut hub = WatchHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.watch_file(7, "a".into(), tx);

        hub.emit(7, NodeEvent::Changed);
        hub.emit(8, NodeEvent::Changed);
        hub.emit(7, NodeEvent::Moved { parent: 1 });
        assert_eq!(
            drain(&mut rx),
            vec![WatchEvent::change("a"), WatchEvent::rename("a")]
        );
    }

    #[test]
    fn test_directory_follows_children() {
        let mut hub = WatchHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.watch_directory(2, 1, "d".into(), [("x".to_string(), 3)], tx);

        hub.emit(3, NodeEvent::Changed);
        hub.emit(2, NodeEvent::ChildAdded { name: "y", ino: 4 });
        hub.emit(4, NodeEvent::Changed);
        hub.emit(2, NodeEvent::ChildRemoved { name: "x", ino: 3 });
        hub.emit(3, NodeEvent::Changed);
        hub.emit(1, NodeEvent::ChildRemoved { name: "other", ino: 9 });
        hub.emit(1, NodeEvent::ChildRemoved { name: "d", ino: 2 });

        assert_eq!(
            drain(&mut rx),
            vec![
                WatchEvent::change("x"),
                WatchEvent::rename("y"),
                WatchEvent::change("y"),
                WatchEvent::rename("x"),
                WatchEvent::rename("d"),
            ]
        );
    }

    #[test]
    fn test_close_drops_subscriptions() {
        let mut hub = WatchHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.watch_directory(2, 1, "d".into(), [("x".to_string(), 3)], tx);
        hub.close(id);
        assert_eq!(hub.len(), 0);
        assert!(hub.subscriptions.is_empty());

        hub.emit(3, NodeEvent::Changed);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut hub = WatchHub::default();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.watch_file(7, "a".into(), tx);
        drop(rx);

        hub.emit(7, NodeEvent::Changed);
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn test_parent_subscription_follows_move() {
        let mut hub = WatchHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.watch_directory(2, 1, "d".into(), [], tx);

        // `d` moves from 1 into 5.
        hub.emit(1, NodeEvent::ChildRemoved { name: "d", ino: 2 });
        hub.emit(2, NodeEvent::Moved { parent: 5 });
        hub.emit(5, NodeEvent::ChildAdded { name: "d", ino: 2 });
        hub.emit(1, NodeEvent::ChildRemoved { name: "d", ino: 2 });
        hub.emit(5, NodeEvent::ChildRemoved { name: "d", ino: 2 });

        assert_eq!(
            drain(&mut rx),
            vec![WatchEvent::rename("d"), WatchEvent::rename("d")]
        );
        assert!(!hub.subscriptions.contains_key(&(1, Channel::Structure)));
        assert!(hub.subscriptions.contains_key(&(5, Channel::Structure)));
    }

    #[test]
    fn test_forget_drops_node_subscriptions() {
        let mut hub = WatchHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.watch_directory(2, 1, "d".into(), [("x".to_string(), 3)], tx);

        hub.forget(3);
        assert!(!hub.subscriptions.contains_key(&(3, Channel::Content)));
        assert_eq!(hub.subscriptions.len(), 2);
        hub.emit(3, NodeEvent::Changed);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.len(), 1);
    }
}
