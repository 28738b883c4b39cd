//! Local-first consistency layer shared by the editing and reading clients.
//!
//! - [`cache`]: the local document cache contract and an in-memory implementation
//! - [`overlay`]: editable working copies reconciled against a live source
//! - [`resolution`]: cache-first, remote-fallback resolution of a key
//! - [`change_queue`]: journal of local mutations awaiting acknowledgement
//!
//! Selectors, eligibility rules and the reactive cell graph live in `folio-core`
//! and are re-exported here.

pub mod cache;
pub mod change_queue;
pub mod config;
pub mod error;
pub mod overlay;
pub mod remote;
pub mod resolution;
pub mod telemetry;
pub mod testing;

pub use cache::{LocalCache, MemoryCache};
pub use change_queue::{ChangeQueue, QueueEntry, QueueId, QueueStatus, QueueUpdate};
pub use config::{ContentConfig, FolioConfig, LoggingConfig, QueueConfig, ResolverConfig};
pub use error::{CompileError, ConfigError, QueueError, RemoteError, ResolveError};
pub use overlay::{EditableOverlay, OverlayItem, RevertOutcome};
pub use remote::{
    RedirectHandler, RedirectTarget, RemoteAnswer, RemoteDocumentService, RemoteQuery, SortDirection,
    SortKey,
};
pub use resolution::{LiveResolution, LiveResolver, ResolutionState};

pub use folio_api::{Document, DocumentBody, DocumentKind, Timestamp};
pub use folio_core::{
    Cell, CompiledSelector, Predicate, Selector, Subscription, access_selector, build_eligibility,
    compile, eligibility_selector,
};
