//! Snapshot persistence for the Stagehand event pipeline.
//!
//! The three lanes (config, rules, theme) are stored together as one JSON
//! document, `state.json`, inside the data directory.
//!
//! - [`load_or_create`] runs once at startup. It never fails on bad
//!   content: a missing file is created from defaults, a file without a
//!   theme lane is migrated, and anything unreadable is replaced.
//! - [`FilePersistor`] implements [`Persistence`]: debounced, coalescing,
//!   atomic (temp file + rename) writes where the latest snapshot wins.

mod error;
mod persistor;
mod snapshot;

pub use error::{PersistError, StoreError};
pub use persistor::{FilePersistor, Persistence, DEFAULT_DEBOUNCE};
pub use snapshot::{
    load_or_create, state_file, LoadedSnapshot, PersistedState, SnapshotOrigin, SNAPSHOT_VERSION,
};
