//! Change notifications.

use futures_util::stream::BoxStream;
use holdgate_resource::Resource;

/// Stream of change notifications returned by a subscription.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Kind of change reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// First sighting of a resource (initial list or creation).
    Added,
    Modified,
    Deleted,
    /// Periodic redelivery of an unchanged resource.
    Sync,
}

impl EventKind {
    /// Added and resync deliveries both announce a resource as present.
    pub fn is_add_like(&self) -> bool {
        matches!(self, EventKind::Added | EventKind::Sync)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Sync => "sync",
        }
    }
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub resource: Resource,
}

impl WatchEvent {
    pub fn new(kind: EventKind, resource: Resource) -> Self {
        Self { kind, resource }
    }
}
