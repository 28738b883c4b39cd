//! Local document cache collaborator.
//!
//! The storage engine behind the cache is out of scope; [`LocalCache`] is the narrow
//! contract the overlay and the resolver need, and [`MemoryCache`] is an indexed
//! in-memory table that satisfies it. Writes are last-write-wins per document id.

use std::collections::BTreeMap;
use std::sync::Arc;

use folio_api::Document;
use folio_core::{Cell, Predicate};
use tracing::debug;

pub trait LocalCache: Send + Sync {
    fn get(&self, id: &str) -> Option<Document>;

    /// Look up a document by its natural key (slug).
    ///
    /// When an ordinary document and a redirect share a key, the ordinary document wins.
    fn get_by_key(&self, key: &str) -> Option<Document>;

    fn get_by_ids(&self, ids: &[String]) -> Vec<Document>;

    fn put(&self, doc: Document);

    fn put_many(&self, docs: Vec<Document>);

    fn delete(&self, id: &str) -> Option<Document>;

    fn query(&self, predicate: &dyn Predicate<Document>) -> Vec<Document>;

    /// Live result set for `predicate`, ordered by id.
    fn observe(&self, predicate: Arc<dyn Predicate<Document>>) -> Cell<Vec<Document>>;

    /// Live lookup by natural key, with the same precedence as [`LocalCache::get_by_key`].
    fn observe_key(&self, key: &str) -> Cell<Option<Document>>;
}

type Rows = Arc<BTreeMap<String, Document>>;

#[derive(Clone, Default)]
pub struct MemoryCache {
    rows: Cell<Rows>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let rows: BTreeMap<String, Document> =
            docs.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
        Self {
            rows: Cell::new(Arc::new(rows)),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.with(|rows| rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent view of every row at this instant.
    pub fn snapshot(&self) -> Rows {
        self.rows.get()
    }
}

fn find_by_key(rows: &BTreeMap<String, Document>, key: &str) -> Option<Document> {
    let mut redirect = None;
    for doc in rows.values().filter(|doc| doc.slug() == Some(key)) {
        if !doc.is_redirect() {
            return Some(doc.clone());
        }
        redirect.get_or_insert(doc);
    }
    redirect.cloned()
}

impl LocalCache for MemoryCache {
    fn get(&self, id: &str) -> Option<Document> {
        self.rows.with(|rows| rows.get(id).cloned())
    }

    fn get_by_key(&self, key: &str) -> Option<Document> {
        self.rows.with(|rows| find_by_key(rows, key))
    }

    fn get_by_ids(&self, ids: &[String]) -> Vec<Document> {
        self.rows
            .with(|rows| ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    fn put(&self, doc: Document) {
        debug!(id = %doc.id, kind = %doc.kind(), "cache put");
        self.rows.update(|rows| {
            Arc::make_mut(rows).insert(doc.id.clone(), doc);
        });
    }

    fn put_many(&self, docs: Vec<Document>) {
        if docs.is_empty() {
            return;
        }
        debug!(count = docs.len(), "cache put_many");
        self.rows.update(|rows| {
            let rows = Arc::make_mut(rows);
            for doc in docs {
                rows.insert(doc.id.clone(), doc);
            }
        });
    }

    fn delete(&self, id: &str) -> Option<Document> {
        if !self.rows.with(|rows| rows.contains_key(id)) {
            return None;
        }
        let mut removed = None;
        self.rows.update(|rows| {
            removed = Arc::make_mut(rows).remove(id);
        });
        debug!(id, found = removed.is_some(), "cache delete");
        removed
    }

    fn query(&self, predicate: &dyn Predicate<Document>) -> Vec<Document> {
        self.rows.with(|rows| {
            rows.values()
                .filter(|doc| predicate.test(doc))
                .cloned()
                .collect()
        })
    }

    fn observe(&self, predicate: Arc<dyn Predicate<Document>>) -> Cell<Vec<Document>> {
        self.rows.map(move |rows| {
            rows.values()
                .filter(|doc| predicate.test(doc))
                .cloned()
                .collect()
        })
    }

    fn observe_key(&self, key: &str) -> Cell<Option<Document>> {
        let key = key.to_string();
        self.rows.map(move |rows| find_by_key(rows, &key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_api::{ContentBody, DocumentBody, RedirectBody};
    use folio_core::{compile, Selector};
    use std::sync::Mutex;

    fn content(id: &str, slug: &str, language: &str) -> Document {
        Document::new(
            id,
            DocumentBody::Content(ContentBody {
                parent_id: "p1".to_string(),
                language: language.to_string(),
                slug: slug.to_string(),
                ..Default::default()
            }),
        )
    }

    fn redirect(id: &str, slug: &str, to: &str) -> Document {
        Document::new(
            id,
            DocumentBody::Redirect(RedirectBody {
                slug: slug.to_string(),
                to_slug: Some(to.to_string()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_put_get_delete() {
        let cache = MemoryCache::new();
        cache.put(content("a", "hello", "en"));
        cache.put_many(vec![content("b", "bonjour", "fr"), content("c", "hola", "es")]);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a").unwrap().slug(), Some("hello"));
        assert_eq!(
            cache
                .get_by_ids(&["c".to_string(), "missing".to_string(), "a".to_string()])
                .iter()
                .map(|d| d.id.as_str())
                .collect::<Vec<_>>(),
            vec!["c", "a"]
        );

        assert!(cache.delete("a").is_some());
        assert!(cache.delete("a").is_none());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = MemoryCache::new();
        cache.put(content("a", "first", "en"));
        cache.put(content("a", "second", "en"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().slug(), Some("second"));
    }

    #[test]
    fn test_get_by_key_prefers_ordinary_document() {
        let cache = MemoryCache::with_documents([
            redirect("a-redirect", "hello", "elsewhere"),
            content("z-content", "hello", "en"),
        ]);
        assert_eq!(cache.get_by_key("hello").unwrap().id, "z-content");

        cache.delete("z-content");
        assert!(cache.get_by_key("hello").unwrap().is_redirect());
        assert!(cache.get_by_key("nope").is_none());
    }

    #[test]
    fn test_observe_tracks_writes() {
        let cache = MemoryCache::new();
        let english = compile(&Selector::eq("language", "en")).unwrap();
        let live = cache.observe(Arc::new(english.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = live.subscribe(move |docs| sink.lock().unwrap().push(docs.len()));

        cache.put(content("a", "hello", "en"));
        cache.put(content("b", "bonjour", "fr"));
        cache.put(content("c", "hi", "en"));
        cache.delete("a");

        assert_eq!(live.get().len(), 1);
        assert_eq!(cache.query(&english).len(), 1);
        // The French write does not change the English result set.
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_observe_key() {
        let cache = MemoryCache::new();
        let live = cache.observe_key("hello");
        assert!(live.get().is_none());

        cache.put(content("a", "hello", "en"));
        assert_eq!(live.get().unwrap().id, "a");
    }
}
