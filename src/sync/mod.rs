//! Event feed modules.
//!
//! - `proto`: wire types for `/sync`, metadata responses and outbound
//!   message content.
//! - `session`: the long-poll loop and the event handler boundary.

/// Matrix client-server wire types.
pub mod proto;
/// Sync loop, handler trait and closure adapter.
pub mod session;
