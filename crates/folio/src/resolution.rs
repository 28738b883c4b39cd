//! Live resolution of one entity by natural key.
//!
//! A [`LiveResolution`] answers "what is the current document for key K" as a cell
//! of [`ResolutionState`]. The local cache is consulted first and stays observed;
//! the remote service is only probed after a local miss while connected, and the
//! resolution sits in [`ResolutionState::Probing`] until that probe answers, so a
//! slow network check never shows up as a not-found flash.
//!
//! At most one probe per resolution is outstanding. Changing the key, a local write
//! that settles the current key, or closing the resolution cancels it; an answer
//! that arrives for a cancelled probe is discarded and never touches the cell.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use folio_api::Document;
use folio_core::{Cell, Selector, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::config::{FolioConfig, ResolverConfig};
use crate::error::{RemoteError, ResolveError};
use crate::remote::{RedirectHandler, RedirectTarget, RemoteAnswer, RemoteDocumentService, RemoteQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    /// Nothing decided yet
    Loading,
    /// Missing locally; a remote check is outstanding
    Probing,
    Found(Document),
    NotFound,
    /// The key is a redirect marker and navigation was requested. Not a miss.
    Redirected(RedirectTarget),
    /// The remote check failed. Try again later; this is not a confirmed miss.
    ProbeFailed(String),
}

impl ResolutionState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ResolutionState::Loading | ResolutionState::Probing)
    }

    /// Whether a not-found view should be shown.
    pub fn shows_not_found(&self) -> bool {
        matches!(self, ResolutionState::NotFound)
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            ResolutionState::Found(doc) => Some(doc),
            _ => None,
        }
    }
}

struct ResolverContext {
    cache: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteDocumentService>,
    redirects: Arc<dyn RedirectHandler>,
    connectivity: Cell<bool>,
    access_groups: Vec<String>,
    config: ResolverConfig,
}

/// Creates resolutions that share one cache, remote service and connectivity signal.
#[derive(Clone)]
pub struct LiveResolver {
    ctx: Arc<ResolverContext>,
}

impl LiveResolver {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteDocumentService>,
        redirects: Arc<dyn RedirectHandler>,
        connectivity: Cell<bool>,
        access_groups: Vec<String>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(ResolverContext {
                cache,
                remote,
                redirects,
                connectivity,
                access_groups,
                config,
            }),
        }
    }

    pub fn from_config(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteDocumentService>,
        redirects: Arc<dyn RedirectHandler>,
        connectivity: Cell<bool>,
        config: &FolioConfig,
    ) -> Self {
        Self::new(
            cache,
            remote,
            redirects,
            connectivity,
            config.content.access_groups.clone(),
            config.resolver.clone(),
        )
    }

    pub fn resolve(&self, key: impl Into<String>) -> LiveResolution {
        let key = key.into();
        let core = Arc::new(ResolutionCore {
            ctx: self.ctx.clone(),
            cell: Cell::new(ResolutionState::Loading),
            instance: Mutex::new(Instance {
                key: key.clone(),
                local: None,
                probe: None,
                next_token: 0,
                answer: None,
                offline_miss: false,
                redirected_for: None,
                closed: false,
            }),
        });

        let weak = Arc::downgrade(&core);
        let connectivity = self.ctx.connectivity.subscribe(move |online| {
            if let Some(core) = weak.upgrade() {
                core.on_connectivity(*online);
            }
        });

        core.start(key);
        LiveResolution {
            core,
            _connectivity: connectivity,
        }
    }
}

/// One resolution instance. Dropping it cancels any outstanding probe.
pub struct LiveResolution {
    core: Arc<ResolutionCore>,
    _connectivity: Subscription,
}

impl LiveResolution {
    pub fn state(&self) -> ResolutionState {
        self.core.cell.get()
    }

    pub fn cell(&self) -> Cell<ResolutionState> {
        self.core.cell.clone()
    }

    pub fn key(&self) -> String {
        self.core.lock().key.clone()
    }

    /// Resolve a different key. Anything outstanding for the previous key is cancelled.
    pub fn set_key(&self, key: impl Into<String>) {
        let key = key.into();
        if self.core.lock().key == key {
            return;
        }
        self.core.start(key);
    }

    pub fn close(&self) {
        self.core.close();
    }
}

impl Drop for LiveResolution {
    fn drop(&mut self) {
        self.core.close();
    }
}

struct Probe {
    key: String,
    token: u64,
    handle: Option<JoinHandle<()>>,
}

struct Instance {
    key: String,
    local: Option<(Cell<Option<Document>>, Subscription)>,
    probe: Option<Probe>,
    next_token: u64,
    /// Remote answer for the current key, until the local cache takes over
    answer: Option<RemoteAnswer>,
    /// The current NotFound was decided offline, without asking the remote service
    offline_miss: bool,
    /// Key whose redirect side effect has already run
    redirected_for: Option<String>,
    closed: bool,
}

impl Instance {
    fn cancel_probe(&mut self) {
        if let Some(probe) = self.probe.take() {
            debug!(key = %probe.key, "cancelling outstanding probe");
            if let Some(handle) = probe.handle {
                handle.abort();
            }
        }
    }
}

enum Effect {
    Redirect {
        from: String,
        target: RedirectTarget,
        doc: Document,
    },
    Probe {
        key: String,
        token: u64,
    },
}

struct ResolutionCore {
    ctx: Arc<ResolverContext>,
    cell: Cell<ResolutionState>,
    instance: Mutex<Instance>,
}

impl ResolutionCore {
    fn lock(&self) -> MutexGuard<'_, Instance> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>, key: String) {
        let local = self.ctx.cache.observe_key(&key);
        let weak = Arc::downgrade(self);
        let subscription = local.subscribe(move |_| {
            if let Some(core) = weak.upgrade() {
                core.on_local_change();
            }
        });

        let (previous, effects) = {
            let mut inst = self.lock();
            if inst.closed {
                return;
            }
            inst.cancel_probe();
            debug!(from = %inst.key, to = %key, "resolving key");
            inst.key = key;
            inst.answer = None;
            inst.offline_miss = false;
            inst.redirected_for = None;
            let previous = inst.local.replace((local, subscription));

            self.cell.stage(ResolutionState::Loading);
            let effects = self.evaluate(&mut inst);
            (previous, effects)
        };
        drop(previous);
        self.cell.flush();
        self.run(effects);
    }

    fn close(&self) {
        let local = {
            let mut inst = self.lock();
            if inst.closed {
                return;
            }
            inst.closed = true;
            inst.cancel_probe();
            inst.local.take()
        };
        drop(local);
    }

    fn on_local_change(self: &Arc<Self>) {
        self.reevaluate();
    }

    fn on_connectivity(self: &Arc<Self>, online: bool) {
        if !online || !self.ctx.config.reprobe_on_reconnect {
            return;
        }
        let retry = {
            let inst = self.lock();
            !inst.closed
                && (inst.offline_miss
                    || matches!(self.cell.get(), ResolutionState::ProbeFailed(_)))
        };
        if retry {
            info!("connectivity restored, re-probing");
            self.reevaluate();
        }
    }

    fn reevaluate(self: &Arc<Self>) {
        let effects = {
            let mut inst = self.lock();
            if inst.closed {
                return;
            }
            self.evaluate(&mut inst)
        };
        self.cell.flush();
        self.run(effects);
    }

    /// Decide the state for the current key, staging it on the cell.
    ///
    /// Side effects are returned instead of performed so they run after the lock is
    /// released; a redirect handler may well call back into this resolution.
    fn evaluate(&self, inst: &mut Instance) -> Vec<Effect> {
        let mut effects = Vec::new();
        let key = inst.key.clone();
        let local = inst.local.as_ref().and_then(|(cell, _)| cell.get());

        let state = if let Some(doc) = local {
            inst.cancel_probe();
            inst.answer = None;
            inst.offline_miss = false;
            self.settle_document(inst, doc, &mut effects)
        } else if !self.ctx.connectivity.get() {
            inst.cancel_probe();
            inst.answer = None;
            inst.offline_miss = true;
            debug!(key = %key, "local miss while offline");
            ResolutionState::NotFound
        } else if let Some(answer) = inst.answer.clone() {
            inst.offline_miss = false;
            match answer.first() {
                Some(doc) => self.settle_document(inst, doc.clone(), &mut effects),
                None => ResolutionState::NotFound,
            }
        } else {
            inst.offline_miss = false;
            let in_flight = inst.probe.as_ref().is_some_and(|probe| probe.key == key);
            if !in_flight {
                inst.cancel_probe();
                let token = inst.next_token;
                inst.next_token += 1;
                inst.probe = Some(Probe {
                    key: key.clone(),
                    token,
                    handle: None,
                });
                effects.push(Effect::Probe { key, token });
            }
            ResolutionState::Probing
        };

        let changed = self.cell.with(|current| *current != state);
        if changed {
            self.cell.stage(state);
        }
        effects
    }

    fn settle_document(
        &self,
        inst: &mut Instance,
        doc: Document,
        effects: &mut Vec<Effect>,
    ) -> ResolutionState {
        if !doc.is_redirect() {
            return ResolutionState::Found(doc);
        }

        let Some(target) = RedirectTarget::of(&doc) else {
            warn!(key = %inst.key, id = %doc.id, "redirect document has no target");
            return ResolutionState::NotFound;
        };
        if inst.redirected_for.as_deref() != Some(inst.key.as_str()) {
            inst.redirected_for = Some(inst.key.clone());
            effects.push(Effect::Redirect {
                from: inst.key.clone(),
                target: target.clone(),
                doc,
            });
        }
        ResolutionState::Redirected(target)
    }

    fn run(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Redirect { from, target, doc } => {
                    info!(from = %from, target = ?target, "following redirect");
                    self.ctx.redirects.redirect(&from, &target, &doc);
                }
                Effect::Probe { key, token } => self.spawn_probe(key, token),
            }
        }
    }

    fn spawn_probe(self: &Arc<Self>, key: String, token: u64) {
        let query = RemoteQuery::new(Selector::eq("slug", key.as_str()), self.ctx.access_groups.clone())
            .with_limit(self.ctx.config.remote_limit);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let failure = Err(RemoteError::Unreachable(format!("no async runtime: {e}")));
                if let Err(e) = self.apply_probe(&key, token, failure) {
                    debug!(error = %e, "probe could not start");
                }
                return;
            }
        };

        debug!(key = %key, token, "probing remote service");
        let remote = self.ctx.remote.clone();
        let weak = Arc::downgrade(self);
        let probe_key = key.clone();
        let handle = runtime.spawn(async move {
            let result = remote.query(query).await;
            if let Some(core) = weak.upgrade() {
                match core.apply_probe(&probe_key, token, result) {
                    Ok(()) => {}
                    Err(e @ ResolveError::StaleResultDiscarded { .. }) => debug!("{e}"),
                    Err(e) => warn!("{e}"),
                }
            }
        });

        let mut inst = self.lock();
        match inst.probe.as_mut() {
            Some(probe) if probe.token == token => probe.handle = Some(handle),
            // Already answered or cancelled.
            _ => handle.abort(),
        }
    }

    /// Apply a probe's answer, unless the probe was superseded.
    fn apply_probe(
        self: &Arc<Self>,
        key: &str,
        token: u64,
        result: Result<RemoteAnswer, RemoteError>,
    ) -> Result<(), ResolveError> {
        let (outcome, effects) = {
            let mut inst = self.lock();
            let current = !inst.closed
                && inst
                    .probe
                    .as_ref()
                    .is_some_and(|probe| probe.token == token && probe.key == key);
            if !current {
                return Err(ResolveError::StaleResultDiscarded {
                    key: key.to_string(),
                });
            }
            inst.probe = None;

            match result {
                Ok(answer) => {
                    debug!(key, found = answer.first().is_some(), "probe answered");
                    inst.answer = Some(answer);
                    (Ok(()), self.evaluate(&mut inst))
                }
                Err(source) => {
                    self.cell
                        .stage(ResolutionState::ProbeFailed(source.to_string()));
                    (
                        Err(ResolveError::RemoteProbeFailure {
                            key: key.to_string(),
                            source,
                        }),
                        Vec::new(),
                    )
                }
            }
        };
        self.cell.flush();
        self.run(effects);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testing::{FakeRemote, RecordingRedirects};
    use folio_api::{ContentBody, DocumentBody};

    fn resolver() -> LiveResolver {
        LiveResolver::new(
            Arc::new(MemoryCache::new()),
            Arc::new(FakeRemote::new()),
            Arc::new(RecordingRedirects::new()),
            Cell::new(true),
            vec!["public".to_string()],
            ResolverConfig::default(),
        )
    }

    fn answer(id: &str, slug: &str) -> RemoteAnswer {
        RemoteAnswer::from_documents(vec![Document::new(
            id,
            DocumentBody::Content(ContentBody {
                slug: slug.to_string(),
                ..Default::default()
            }),
        )])
    }

    fn outstanding(resolution: &LiveResolution) -> (String, u64) {
        let inst = resolution.core.lock();
        let probe = inst.probe.as_ref().unwrap();
        (probe.key.clone(), probe.token)
    }

    // The current-thread runtime does not poll spawned probes until the test
    // yields, so answers are delivered by hand.
    #[tokio::test]
    async fn test_superseded_answer_is_discarded() {
        let resolution = resolver().resolve("k4");
        let (old_key, old_token) = outstanding(&resolution);

        resolution.set_key("k5");
        let (new_key, new_token) = outstanding(&resolution);
        assert_eq!(new_key, "k5");
        assert_ne!(new_token, old_token);

        let result = resolution
            .core
            .apply_probe(&old_key, old_token, Ok(answer("4", "k4")));
        assert!(matches!(
            result,
            Err(ResolveError::StaleResultDiscarded { ref key }) if key == "k4"
        ));
        assert_eq!(resolution.state(), ResolutionState::Probing);

        resolution
            .core
            .apply_probe(&new_key, new_token, Ok(answer("5", "k5")))
            .unwrap();
        assert_eq!(resolution.state().document().map(|d| d.id.as_str()), Some("5"));
    }

    #[tokio::test]
    async fn test_answer_after_close_is_discarded() {
        let resolution = resolver().resolve("k11");
        let (key, token) = outstanding(&resolution);

        resolution.close();
        let result = resolution.core.apply_probe(&key, token, Ok(answer("11", "k11")));

        assert!(matches!(result, Err(ResolveError::StaleResultDiscarded { .. })));
        assert_eq!(resolution.state(), ResolutionState::Probing);
    }

    #[test]
    fn test_state_predicates() {
        assert!(!ResolutionState::Loading.is_settled());
        assert!(!ResolutionState::Probing.is_settled());
        assert!(ResolutionState::NotFound.shows_not_found());
        assert!(!ResolutionState::Redirected(RedirectTarget::Key("k".into())).shows_not_found());
        assert!(!ResolutionState::ProbeFailed("down".into()).shows_not_found());
        assert!(ResolutionState::ProbeFailed("down".into()).is_settled());
    }
}
