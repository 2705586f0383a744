//! Core synchronization primitives for otdom.
//!
//! Keeps a mutable element tree and a replicated element-list document in
//! lock step: local mutations are observed, translated into json0-style
//! list/object/string operations, and committed; remote operations are
//! resolved against a shadow tree and replayed onto the live tree.
//!
//! [`session::SyncSession`] ties the pieces together for one replica.

pub mod apply;
pub mod diff;
pub mod element_list;
pub mod error;
pub mod hooks;
pub mod op;
pub mod path;
pub mod policy;
pub mod session;
pub mod shadow;
pub mod translate;
pub mod watcher;

pub use apply::Applier;
pub use error::SyncError;
pub use hooks::Hooks;
pub use op::Operation;
pub use path::{Path, PathToken};
pub use policy::{IdAllocator, NoTransience, PrefixTransience, TransiencePolicy};
pub use session::{SyncConfig, SyncSession};
pub use shadow::{ShadowNode, ShadowTree};
pub use translate::Translator;
pub use watcher::{MutationWatcher, WatcherState};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
