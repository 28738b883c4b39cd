//! Editable overlay over a reactive source list.
//!
//! The overlay keeps three values per id: the latest `source` value, the `shadow`
//! (what was last reconciled from source) and the user-editable `working` copy.
//! Reconciliation runs on every source change and never overwrites an edit that is
//! still in flight; the stale shadow is what keeps such a conflict visible.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use folio_api::{Document, DocumentBody, Timestamp, new_document_id};
use folio_core::{Cell, Subscription};
use tracing::{debug, info, warn};

use crate::change_queue::{ChangeQueue, QueueId};

/// Something the overlay can track: keyed, and comparable while ignoring fields
/// that change on every server round-trip.
pub trait OverlayItem: Clone + PartialEq + Send + Sync + 'static {
    fn key(&self) -> &str;

    fn content_eq(&self, other: &Self) -> bool;
}

impl OverlayItem for Document {
    fn key(&self) -> &str {
        &self.id
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted,
    /// The id is gone from source; the working copy was left untouched.
    MissingSource,
}

pub struct EditableOverlay<T: OverlayItem> {
    inner: Arc<OverlayInner<T>>,
    _source_subscription: Subscription,
}

struct OverlayInner<T> {
    state: Mutex<OverlayState<T>>,
    working: Cell<Vec<T>>,
}

struct OverlayState<T> {
    /// Latest source snapshot, by id
    source: BTreeMap<String, T>,
    shadow: BTreeMap<String, T>,
    working: BTreeMap<String, T>,
    /// Source order, followed by local creations
    order: Vec<String>,
    /// Created locally and not yet seen in source
    created: BTreeSet<String>,
    /// Working value last handed to the change queue, per id
    committed: BTreeMap<String, T>,
}

#[derive(Debug, Default)]
struct PassSummary {
    added: usize,
    removed: usize,
    adopted: usize,
    deferred: usize,
}

impl<T: OverlayItem> OverlayState<T> {
    fn is_locally_edited(&self, id: &str) -> bool {
        if self.created.contains(id) {
            return true;
        }
        match (self.working.get(id), self.shadow.get(id)) {
            (Some(working), Some(shadow)) => !working.content_eq(shadow),
            _ => false,
        }
    }

    fn is_upstream_changed(&self, id: &str) -> bool {
        match (self.shadow.get(id), self.source.get(id)) {
            (Some(shadow), Some(source)) => !shadow.content_eq(source),
            _ => false,
        }
    }

    fn reconcile(&mut self, snapshot: &[T]) -> PassSummary {
        let mut summary = PassSummary::default();
        let next: BTreeMap<String, T> = snapshot
            .iter()
            .map(|item| (item.key().to_string(), item.clone()))
            .collect();

        let removed: Vec<String> = self
            .shadow
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        for id in removed {
            if self.is_locally_edited(&id) {
                warn!(id = %id, "document removed upstream while locally edited; dropping working copy");
            }
            self.shadow.remove(&id);
            self.working.remove(&id);
            self.committed.remove(&id);
            summary.removed += 1;
        }

        for (id, incoming) in &next {
            let Some(shadow) = self.shadow.get(id) else {
                self.adopt_new(id, incoming);
                summary.added += 1;
                continue;
            };
            if shadow == incoming {
                continue;
            }

            let working = self.working.get(id).unwrap_or(shadow);
            if working.content_eq(shadow) || incoming.content_eq(working) {
                // No edit in flight, or the edit has landed upstream.
                self.adopt(id, incoming);
                summary.adopted += 1;
            } else if incoming.content_eq(shadow) {
                // Only bookkeeping moved; keep the edit against the newer revision.
                self.shadow.insert(id.clone(), incoming.clone());
            } else {
                debug!(id = %id, "upstream change deferred behind local edit");
                summary.deferred += 1;
            }
        }

        self.order = snapshot.iter().map(|item| item.key().to_string()).collect();
        self.order.extend(self.created.iter().cloned());
        self.source = next;
        summary
    }

    fn adopt_new(&mut self, id: &str, incoming: &T) {
        if self.created.remove(id) {
            // A local creation arriving back from upstream.
            self.shadow.insert(id.to_string(), incoming.clone());
            let landed = self
                .working
                .get(id)
                .is_none_or(|working| incoming.content_eq(working));
            if landed {
                self.working.insert(id.to_string(), incoming.clone());
                self.committed.remove(id);
            }
            return;
        }
        self.adopt(id, incoming);
    }

    fn adopt(&mut self, id: &str, incoming: &T) {
        self.shadow.insert(id.to_string(), incoming.clone());
        self.working.insert(id.to_string(), incoming.clone());
        self.committed.remove(id);
    }

    fn working_snapshot(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|id| self.working.get(id).cloned())
            .collect()
    }

    fn edited_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.is_locally_edited(id))
            .cloned()
            .collect()
    }
}

impl<T: OverlayItem> OverlayInner<T> {
    fn lock(&self) -> MutexGuard<'_, OverlayState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state, then publish the working snapshot if it changed.
    fn mutate<R>(&self, f: impl FnOnce(&mut OverlayState<T>) -> R) -> R {
        let (result, changed) = {
            let mut state = self.lock();
            let result = f(&mut state);
            let snapshot = state.working_snapshot();
            let changed = self.working.with(|current| *current != snapshot);
            if changed {
                self.working.stage(snapshot);
            }
            (result, changed)
        };
        if changed {
            self.working.flush();
        }
        result
    }

    fn on_source(&self, snapshot: &[T]) {
        let summary = self.mutate(|state| state.reconcile(snapshot));
        debug!(
            added = summary.added,
            removed = summary.removed,
            adopted = summary.adopted,
            deferred = summary.deferred,
            "overlay reconciled"
        );
    }
}

impl<T: OverlayItem> EditableOverlay<T> {
    /// Start an editing session over `source`. All three views start equal.
    pub fn new(source: &Cell<Vec<T>>) -> Self {
        let inner = Arc::new(OverlayInner {
            state: Mutex::new(OverlayState {
                source: BTreeMap::new(),
                shadow: BTreeMap::new(),
                working: BTreeMap::new(),
                order: Vec::new(),
                created: BTreeSet::new(),
                committed: BTreeMap::new(),
            }),
            working: Cell::new(Vec::new()),
        });

        source.with(|snapshot| inner.on_source(snapshot));

        let weak: Weak<OverlayInner<T>> = Arc::downgrade(&inner);
        let subscription = source.subscribe(move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source(snapshot);
            }
        });

        Self {
            inner,
            _source_subscription: subscription,
        }
    }

    /// Current working copies, in source order followed by local creations.
    pub fn working(&self) -> Vec<T> {
        self.inner.working.get()
    }

    pub fn working_cell(&self) -> Cell<Vec<T>> {
        self.inner.working.clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.lock().working.get(id).cloned()
    }

    pub fn is_locally_edited(&self, id: &str) -> bool {
        self.inner.lock().is_locally_edited(id)
    }

    pub fn is_upstream_changed(&self, id: &str) -> bool {
        self.inner.lock().is_upstream_changed(id)
    }

    /// Ids that are locally edited and have an unapplied upstream change.
    pub fn conflicts(&self) -> Vec<String> {
        let state = self.inner.lock();
        state
            .order
            .iter()
            .filter(|id| state.is_locally_edited(id) && state.is_upstream_changed(id))
            .cloned()
            .collect()
    }

    pub fn edited_ids(&self) -> Vec<String> {
        self.inner.lock().edited_ids()
    }

    /// Modify the working copy of `id`. Returns false if there is no such document.
    pub fn edit(&self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        self.inner.mutate(|state| match state.working.get_mut(id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        })
    }

    /// Add a new local document. Returns false if the id is already tracked.
    pub fn create(&self, item: T) -> bool {
        let id = item.key().to_string();
        self.inner.mutate(|state| {
            if state.working.contains_key(&id) {
                return false;
            }
            state.working.insert(id.clone(), item);
            state.created.insert(id.clone());
            state.order.push(id);
            true
        })
    }

    /// Reset the working copy (and shadow) of `id` to the current source value.
    pub fn revert(&self, id: &str) -> RevertOutcome {
        let outcome = self.inner.mutate(|state| match state.source.get(id).cloned() {
            Some(current) => {
                state.adopt(id, &current);
                RevertOutcome::Reverted
            }
            None => RevertOutcome::MissingSource,
        });
        match outcome {
            RevertOutcome::Reverted => info!(id, "reverted working copy"),
            RevertOutcome::MissingSource => {
                warn!(id, "revert requested for a document missing from source; keeping working copy")
            }
        }
        outcome
    }

    /// Resolve a conflict by taking the upstream value.
    pub fn accept_upstream(&self, id: &str) -> RevertOutcome {
        self.revert(id)
    }
}

impl EditableOverlay<Document> {
    /// Start a new document on this device under a freshly generated id.
    pub fn create_document<I, S>(&self, body: DocumentBody, groups: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let doc = Document::new(new_document_id(), body).with_groups(groups);
        let id = doc.id.clone();
        self.create(doc);
        debug!(id = %id, "created local document");
        id
    }

    /// Journal every locally edited document that has changed since its last commit.
    ///
    /// Each proposed document carries the shadow's revision as its base revision and
    /// fresh `updatedBy`/`updatedAt` values. Returns the new queue ids in document order.
    pub fn commit(&self, queue: &ChangeQueue, editor: &str, now: Timestamp) -> Vec<QueueId> {
        let proposals = self.inner.mutate(|state| {
            let mut proposals = Vec::new();
            for id in state.edited_ids() {
                let Some(working) = state.working.get(&id) else {
                    continue;
                };
                let already_committed = state
                    .committed
                    .get(&id)
                    .is_some_and(|last| last.content_eq(working));
                if already_committed {
                    continue;
                }

                let mut proposed = working.clone();
                proposed.rev = state.shadow.get(&id).and_then(|shadow| shadow.rev.clone());
                proposed.updated_by = Some(editor.to_string());
                proposed.updated_at = now;

                state.working.insert(id.clone(), proposed.clone());
                state.committed.insert(id.clone(), proposed.clone());
                proposals.push(proposed);
            }
            proposals
        });

        let ids: Vec<QueueId> = proposals
            .into_iter()
            .map(|proposed| queue.enqueue(proposed.id.clone(), proposed))
            .collect();
        if !ids.is_empty() {
            info!(count = ids.len(), editor, "committed local edits");
        }
        ids
    }
}
