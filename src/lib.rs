//! Minimal Rust SDK for Matrix bots.
//!
//! A [`SmallBot`] authenticates with a static access token, long-polls
//! `/sync`, hands every timeline event to an [`EventHandler`] and persists the
//! sync cursor between batches. The crate is organized by concern:
//! - `client`: session configuration, the authenticated request executor,
//!   messaging and metadata calls.
//! - `sync`: wire types and the long-poll loop.
//! - `transport`, `store`, `logger`, `format`: pluggable collaborators with
//!   default implementations.

/// Session handle, configuration, and request/response calls.
pub mod client;
/// HTML to plain-text conversion for outbound messages.
pub mod format;
/// Logger collaborator.
pub mod logger;
/// Sync cursor persistence.
pub mod store;
/// Wire types and the long-poll sync loop.
pub mod sync;
/// HTTP transport seam.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{SmallBot, SmallBotConfig, SmallBotDefaults, SmallBotError};
pub use sync::proto::{EventContent, SyncResponse, TimelineEvent};
pub use sync::session::{handler_fn, EventHandler, HandlerError};
