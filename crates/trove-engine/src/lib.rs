//! The trove record engine.
//!
//! Two layers live here:
//!
//! - [`Tstore`] — the storage layer that glues the verifiable log and the
//!   blob store together: per-iteration record saves, loads, freeze and
//!   censor, plugin blob APIs, the plugin registry and hook bus, and the
//!   anchor engine that periodically timestamps log roots onto an external
//!   chain.
//! - [`TroveBackend`] — the record API: content validation, the status
//!   state machine, per-record locking, the inventory cache, batch reads,
//!   timestamp derivation, fsck, and shutdown.

mod anchor;
mod backend;
mod error;
mod inventory;
mod mime;
mod plugin;
mod tstore;
mod validate;

#[cfg(test)]
mod tests;

pub use anchor::{anchor_scheduler_start, Anchor, ANCHOR_SCHEDULE};
pub use backend::TroveBackend;
pub use error::BackendError;
pub use inventory::InventoryCache;
pub use mime::{detect_mime, mime_valid, MIME_PNG, MIME_TEXT};
pub use plugin::{
    HookEditMetadata, HookEditRecord, HookNewRecordPost, HookNewRecordPre, HookPluginPost,
    HookPluginPre, HookSetRecordStatus, HookType, Plugin, PluginClient, PluginSetting,
};
pub use tstore::{ExtraData, Tstore, DESC_ANCHOR, DESC_FILE, DESC_METADATA_STREAM,
    DESC_RECORD_INDEX, DESC_RECORD_METADATA};
pub use validate::record_metadata_new;
