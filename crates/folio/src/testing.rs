//! Fakes for the network-facing collaborators, and helpers for waiting on cells.
//!
//! - `FakeRemote`: an in-memory remote document service that evaluates queries with
//!   the real selector compiler, records every call, and can hold answers per key
//! - `RecordingRedirects`: a redirect handler that only records
//! - `wait_for`: await a cell value satisfying a predicate

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use folio_api::Document;
use folio_core::{AlwaysTrue, Cell, Predicate, access_selector, compile};

use crate::error::RemoteError;
use crate::remote::{RedirectHandler, RedirectTarget, RemoteAnswer, RemoteDocumentService, RemoteQuery};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct FakeRemote {
    docs: Mutex<Vec<Document>>,
    calls: Mutex<Vec<RemoteQuery>>,
    gates: Mutex<HashMap<String, watch::Sender<bool>>>,
    failure: Mutex<Option<RemoteError>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let remote = Self::new();
        lock(&remote.docs).extend(docs);
        remote
    }

    pub fn insert(&self, doc: Document) {
        let mut docs = lock(&self.docs);
        docs.retain(|existing| existing.id != doc.id);
        docs.push(doc);
    }

    /// Make queries for `key` wait until [`FakeRemote::release`] is called.
    pub fn hold(&self, key: &str) {
        let (sender, _) = watch::channel(false);
        lock(&self.gates).insert(key.to_string(), sender);
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = lock(&self.gates).remove(key) {
            gate.send_replace(true);
        }
    }

    /// Fail every query from now on, or stop failing with `None`.
    pub fn fail_with(&self, failure: Option<RemoteError>) {
        *lock(&self.failure) = failure;
    }

    pub fn calls(&self) -> Vec<RemoteQuery> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of queries whose selector asked for `slug == key`.
    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|query| query_key(query).as_deref() == Some(key))
            .count()
    }
}

fn query_key(query: &RemoteQuery) -> Option<String> {
    query
        .selector
        .as_json()
        .get("slug")
        .and_then(|slug| slug.as_str())
        .map(str::to_string)
}

#[async_trait]
impl RemoteDocumentService for FakeRemote {
    async fn query(&self, query: RemoteQuery) -> Result<RemoteAnswer, RemoteError> {
        lock(&self.calls).push(query.clone());

        let gate = query_key(&query).and_then(|key| lock(&self.gates).get(&key).map(|g| g.subscribe()));
        if let Some(mut gate) = gate {
            // A dropped sender counts as released.
            let _ = gate.wait_for(|open| *open).await;
        }

        if let Some(failure) = lock(&self.failure).clone() {
            return Err(failure);
        }

        let refused = |e: folio_core::CompileError| RemoteError::Refused(e.to_string());
        let access: Arc<dyn Predicate<Document>> = if query.member_of.is_empty() {
            Arc::new(AlwaysTrue)
        } else {
            Arc::new(compile(&access_selector(&query.member_of)).map_err(refused)?)
        };
        let predicate = compile(&query.selector).map_err(refused)?.and(access);

        let docs = lock(&self.docs);
        let matches = docs
            .iter()
            .filter(|doc| predicate.test(doc))
            .skip(query.skip.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(RemoteAnswer::from_documents(matches))
    }
}

#[derive(Default)]
pub struct RecordingRedirects {
    seen: Mutex<Vec<(String, RedirectTarget)>>,
}

impl RecordingRedirects {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(from_key, target)` for every redirect performed, in order.
    pub fn redirects(&self) -> Vec<(String, RedirectTarget)> {
        lock(&self.seen).clone()
    }
}

impl RedirectHandler for RecordingRedirects {
    fn redirect(&self, from_key: &str, target: &RedirectTarget, _redirect: &Document) {
        lock(&self.seen).push((from_key.to_string(), target.clone()));
    }
}

/// Wait until `cell` holds a value satisfying `predicate`, or fail after `timeout_duration`.
pub async fn wait_for<T, F>(cell: &Cell<T>, timeout_duration: Duration, predicate: F) -> anyhow::Result<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
    F: Fn(&T) -> bool,
{
    let mut updates = Box::pin(cell.updates());
    let current = cell.get();
    if predicate(&current) {
        return Ok(current);
    }

    let deadline = tokio::time::Instant::now() + timeout_duration;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(anyhow::anyhow!(
                "Timeout waiting for cell; last value {:?}",
                cell.get()
            ));
        }
        match timeout(remaining, updates.next()).await {
            Ok(Some(value)) if predicate(&value) => return Ok(value),
            Ok(Some(_)) => continue,
            Ok(None) => return Err(anyhow::anyhow!("cell update stream closed")),
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "Timeout waiting for cell; last value {:?}",
                    cell.get()
                ));
            }
        }
    }
}

/// Poll `condition` until it holds, or fail after `timeout_duration`.
pub async fn wait_until(timeout_duration: Duration, condition: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout_duration;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow::anyhow!("Timeout waiting for condition"));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
