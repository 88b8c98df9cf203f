//! Change notifications published after each committed transaction

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use serde::Serialize;

use crate::model::{Page, PageId, SpaceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub space_id: SpaceId,
    /// Store revision the change was committed at
    pub revision: u64,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChangeKind {
    PagesMetaUpdated { pages: Vec<Page> },
    PagesDeleted { page_ids: Vec<PageId> },
    PermissionsChanged { page_ids: Vec<PageId> },
}

/// Delivery is the implementation's concern; publishing never fails the
/// operation that produced the event.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: &ChangeEvent);
}

#[derive(Debug, Default)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn publish(&self, _event: &ChangeEvent) {}
}

/// Forwards events into an in-process channel
pub struct ChannelBroadcaster {
    tx: Mutex<Sender<ChangeEvent>>,
}

impl ChannelBroadcaster {
    pub fn channel() -> (Self, Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel();
        (ChannelBroadcaster { tx: Mutex::new(tx) }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: &ChangeEvent) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        if tx.send(event.clone()).is_err() {
            tracing::debug!(space_id = %event.space_id, "change receiver dropped");
        }
    }
}

/// Logs each event as JSON at `info`
#[derive(Debug, Default)]
pub struct TracingBroadcaster;

impl Broadcaster for TracingBroadcaster {
    fn publish(&self, event: &ChangeEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(target: "pagetree::events", space_id = %event.space_id, revision = event.revision, "{json}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode change event"),
        }
    }
}
