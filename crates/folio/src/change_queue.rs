//! Journal of local mutations awaiting acknowledgement.
//!
//! The queue performs no network I/O. The sync scheduler (outside this crate) reads
//! [`ChangeQueue::list_pending`] / [`ChangeQueue::list_sending`] and drives each entry
//! through its lifecycle with [`ChangeQueue::update`]:
//!
//! ```text
//! Pending ──▶ Sending ──▶ Acknowledged (entry deleted)
//!    ▲           │
//!    └───────────┤ transient failure (Rejected once max_attempts is reached)
//!                ▼
//!            Rejected ──▶ Pending (explicit user retry)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use folio_api::{Document, Timestamp, now_millis};
use folio_core::Cell;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;

pub type QueueId = u64;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting to be handed to the network layer
    Pending,
    /// Handed to the network layer, no answer yet
    Sending,
    /// Accepted by the remote service. Entries are deleted on reaching this status.
    Acknowledged,
    /// Permanently refused; kept for the user to retry or discard
    Rejected,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sending => "sending",
            QueueStatus::Acknowledged => "acknowledged",
            QueueStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "sending" => Some(QueueStatus::Sending),
            "acknowledged" => Some(QueueStatus::Acknowledged),
            "rejected" => Some(QueueStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub queue_id: QueueId,
    pub document_id: String,
    pub proposed_document: Document,
    pub status: QueueStatus,
    /// Failed sends since the entry was last (re)queued
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
}

impl QueueEntry {
    /// The user-facing rejection, if this entry was rejected.
    pub fn rejection(&self) -> Option<QueueError> {
        (self.status == QueueStatus::Rejected).then(|| QueueError::Rejected {
            id: self.queue_id,
            document_id: self.document_id.clone(),
            reason: self
                .last_error
                .clone()
                .unwrap_or_else(|| "rejected by remote service".to_string()),
        })
    }
}

/// A status change requested by the sync scheduler or the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueUpdate {
    pub status: QueueStatus,
    pub error: Option<String>,
}

impl QueueUpdate {
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(status: QueueStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

struct QueueState {
    next_id: QueueId,
    entries: BTreeMap<QueueId, QueueEntry>,
}

pub struct ChangeQueue {
    state: Mutex<QueueState>,
    max_attempts: u32,
    rejections: Cell<Vec<QueueEntry>>,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl ChangeQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
            max_attempts: config.max_attempts.max(1),
            rejections: Cell::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal one proposed document. Every call creates a new entry, even when an
    /// earlier entry for the same document is still pending.
    pub fn enqueue(&self, document_id: impl Into<String>, proposed_document: Document) -> QueueId {
        let document_id = document_id.into();
        let mut state = self.lock();
        let queue_id = state.next_id;
        state.next_id += 1;

        debug!(queue_id, document_id = %document_id, "enqueued change");
        state.entries.insert(
            queue_id,
            QueueEntry {
                queue_id,
                document_id,
                proposed_document,
                status: QueueStatus::Pending,
                attempts: 0,
                last_error: None,
                created_at: now_millis(),
            },
        );
        queue_id
    }

    pub fn get(&self, queue_id: QueueId) -> Option<QueueEntry> {
        self.lock().entries.get(&queue_id).cloned()
    }

    /// Apply a status transition.
    ///
    /// Returns the entry as it now stands, or `None` when it was acknowledged and deleted.
    pub fn update(&self, queue_id: QueueId, update: QueueUpdate) -> Result<Option<QueueEntry>> {
        let (outcome, rejected_changed) = {
            let mut state = self.lock();
            let entry = state
                .entries
                .get_mut(&queue_id)
                .ok_or(QueueError::EntryNotFound(queue_id))?;
            let from = entry.status;
            let to = update.status;

            match (from, to) {
                (a, b) if a == b => {
                    let reason_changed =
                        update.error.is_some() && update.error != entry.last_error;
                    if reason_changed {
                        entry.last_error = update.error;
                    }
                    (Some(entry.clone()), reason_changed && a == QueueStatus::Rejected)
                }
                (QueueStatus::Pending | QueueStatus::Sending, QueueStatus::Acknowledged) => {
                    state.entries.remove(&queue_id);
                    debug!(queue_id, %from, "change acknowledged");
                    (None, false)
                }
                (QueueStatus::Pending, QueueStatus::Sending) => {
                    entry.status = QueueStatus::Sending;
                    debug!(queue_id, "change sending");
                    (Some(entry.clone()), false)
                }
                (QueueStatus::Sending, QueueStatus::Pending) => {
                    entry.attempts += 1;
                    entry.last_error = update.error;
                    if entry.attempts >= self.max_attempts {
                        entry.status = QueueStatus::Rejected;
                        warn!(
                            queue_id,
                            document_id = %entry.document_id,
                            attempts = entry.attempts,
                            error = ?entry.last_error,
                            "change rejected after repeated failures"
                        );
                        (Some(entry.clone()), true)
                    } else {
                        entry.status = QueueStatus::Pending;
                        debug!(
                            queue_id,
                            attempts = entry.attempts,
                            error = ?entry.last_error,
                            "change send failed, will retry"
                        );
                        (Some(entry.clone()), false)
                    }
                }
                (QueueStatus::Sending, QueueStatus::Rejected) => {
                    entry.status = QueueStatus::Rejected;
                    entry.last_error = update.error;
                    warn!(
                        queue_id,
                        document_id = %entry.document_id,
                        error = ?entry.last_error,
                        "change rejected"
                    );
                    (Some(entry.clone()), true)
                }
                (QueueStatus::Rejected, QueueStatus::Pending) => {
                    entry.status = QueueStatus::Pending;
                    entry.attempts = 0;
                    entry.last_error = None;
                    info!(queue_id, document_id = %entry.document_id, "rejected change requeued");
                    (Some(entry.clone()), true)
                }
                (from, to) => {
                    return Err(QueueError::InvalidTransition {
                        id: queue_id,
                        from,
                        to,
                    });
                }
            }
        };

        if rejected_changed {
            self.publish_rejections();
        }
        Ok(outcome)
    }

    /// Remove an entry regardless of status (the user discarding a rejected change).
    pub fn delete(&self, queue_id: QueueId) -> Option<QueueEntry> {
        let removed = self.lock().entries.remove(&queue_id);
        if let Some(entry) = &removed {
            debug!(queue_id, status = %entry.status, "queue entry deleted");
            if entry.status == QueueStatus::Rejected {
                self.publish_rejections();
            }
        }
        removed
    }

    fn with_status(&self, status: QueueStatus) -> Vec<QueueEntry> {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect()
    }

    /// Pending entries, oldest first.
    pub fn list_pending(&self) -> Vec<QueueEntry> {
        self.with_status(QueueStatus::Pending)
    }

    pub fn list_sending(&self) -> Vec<QueueEntry> {
        self.with_status(QueueStatus::Sending)
    }

    pub fn list_rejected(&self) -> Vec<QueueEntry> {
        self.with_status(QueueStatus::Rejected)
    }

    pub fn entries_for_document(&self, document_id: &str) -> Vec<QueueEntry> {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.document_id == document_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejected entries, kept current for the UI to surface.
    pub fn rejections(&self) -> Cell<Vec<QueueEntry>> {
        self.rejections.clone()
    }

    fn publish_rejections(&self) {
        self.rejections.set_if_changed(self.list_rejected());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_api::{DocumentBody, GroupBody};

    fn doc(id: &str) -> Document {
        Document::new(
            id,
            DocumentBody::Group(GroupBody {
                name: id.to_string(),
            }),
        )
    }

    fn queue(max_attempts: u32) -> ChangeQueue {
        ChangeQueue::new(&QueueConfig { max_attempts })
    }

    #[test]
    fn test_enqueue_creates_pending_entry() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.document_id, "a");
        assert_eq!(queue.list_pending().len(), 1);
        assert!(queue.list_sending().is_empty());
    }

    #[test]
    fn test_second_edit_creates_second_entry() {
        let queue = ChangeQueue::default();
        let first = queue.enqueue("a", doc("a"));
        let second = queue.enqueue("a", doc("a"));

        assert_ne!(first, second);
        assert_eq!(queue.entries_for_document("a").len(), 2);
    }

    #[test]
    fn test_acknowledge_deletes_entry() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));
        queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();

        assert_eq!(queue.list_sending().len(), 1);
        let outcome = queue
            .update(id, QueueUpdate::status(QueueStatus::Acknowledged))
            .unwrap();

        assert!(outcome.is_none());
        assert!(queue.get(id).is_none());
        assert!(queue.list_pending().is_empty());
        assert!(queue.list_sending().is_empty());
    }

    #[test]
    fn test_transient_failure_returns_to_pending() {
        let queue = queue(3);
        let id = queue.enqueue("a", doc("a"));
        queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();

        let entry = queue
            .update(id, QueueUpdate::failed(QueueStatus::Pending, "timeout"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_max_attempts_converts_to_rejected() {
        let queue = queue(2);
        let id = queue.enqueue("a", doc("a"));

        for _ in 0..2 {
            queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();
            queue
                .update(id, QueueUpdate::failed(QueueStatus::Pending, "timeout"))
                .unwrap();
        }

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.status, QueueStatus::Rejected);
        assert_eq!(queue.rejections().get().len(), 1);
    }

    #[test]
    fn test_rejection_is_retained_and_retryable() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));
        queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();
        queue
            .update(id, QueueUpdate::failed(QueueStatus::Rejected, "conflict"))
            .unwrap();

        let entry = queue.get(id).unwrap();
        assert!(matches!(
            entry.rejection(),
            Some(QueueError::Rejected { ref reason, .. }) if reason == "conflict"
        ));
        assert_eq!(queue.list_rejected().len(), 1);

        let entry = queue
            .update(id, QueueUpdate::status(QueueStatus::Pending))
            .unwrap()
            .unwrap();
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert!(queue.rejections().get().is_empty());
    }

    #[test]
    fn test_invalid_transitions() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));

        let err = queue
            .update(id, QueueUpdate::status(QueueStatus::Rejected))
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::InvalidTransition {
                id,
                from: QueueStatus::Pending,
                to: QueueStatus::Rejected
            }
        );

        assert_eq!(
            queue.update(99, QueueUpdate::status(QueueStatus::Sending)),
            Err(QueueError::EntryNotFound(99))
        );
    }

    #[test]
    fn test_discarding_rejected_entry_clears_rejections() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));
        queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();
        queue.update(id, QueueUpdate::status(QueueStatus::Rejected)).unwrap();
        assert_eq!(queue.rejections().get().len(), 1);

        assert!(queue.delete(id).is_some());
        assert!(queue.rejections().get().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_new_rejection_reason_reaches_rejections_cell() {
        let queue = ChangeQueue::default();
        let id = queue.enqueue("a", doc("a"));
        queue.update(id, QueueUpdate::status(QueueStatus::Sending)).unwrap();
        queue
            .update(id, QueueUpdate::failed(QueueStatus::Rejected, "revision conflict"))
            .unwrap();

        queue
            .update(id, QueueUpdate::failed(QueueStatus::Rejected, "permission denied"))
            .unwrap();

        let rejected = queue.rejections().get();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].last_error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_status_names() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Sending,
            QueueStatus::Acknowledged,
            QueueStatus::Rejected,
        ] {
            assert_eq!(QueueStatus::from_str(status.as_str()), Some(status));
        }
    }

    fn arb_status() -> impl proptest::strategy::Strategy<Value = QueueStatus> {
        proptest::prop_oneof![
            proptest::strategy::Just(QueueStatus::Pending),
            proptest::strategy::Just(QueueStatus::Sending),
            proptest::strategy::Just(QueueStatus::Acknowledged),
            proptest::strategy::Just(QueueStatus::Rejected),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_every_entry_has_exactly_one_live_status(
            steps in proptest::collection::vec((0u64..4, arb_status()), 0..60),
        ) {
            let queue = queue(3);
            let ids: Vec<QueueId> = (0..4).map(|n| queue.enqueue(format!("doc-{n}"), doc("x"))).collect();

            for (index, status) in steps {
                let _ = queue.update(ids[index as usize], QueueUpdate::failed(status, "step"));
            }

            let pending = queue.list_pending().len();
            let sending = queue.list_sending().len();
            let rejected = queue.list_rejected().len();
            proptest::prop_assert_eq!(pending + sending + rejected, queue.len());
            proptest::prop_assert_eq!(queue.rejections().get().len(), rejected);
            for entry in queue.list_pending().iter().chain(queue.list_sending().iter()) {
                proptest::prop_assert!(entry.attempts < 3);
            }
        }
    }
}
