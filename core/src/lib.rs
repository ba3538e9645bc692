//! vahti-core - Core types for the VAHTI discovery gateway
//!
//! This crate provides the foundational types that are shared between
//! the VAHTI gateway and external discovery plugins:
//!
//! - [`DiscoveryNode`] - a node in the discovery tree (the publish wire format)
//! - [`Target`] - a monitored runtime target carried inside a plugin's subtree
//! - [`TargetDiscovery`] - lifecycle notification emitted when a target is
//!   found, modified, or lost
//! - [`RegistrationRequest`] / [`RegistrationReply`] - the registration
//!   protocol payloads
//!
//! # Why this crate exists
//!
//! A discovery plugin needs the node and target wire types to build the
//! subtree it publishes, and the registration payloads to talk to the
//! gateway. Without `vahti-core` it would have to depend on
//! `vahti-gateway`, pulling the whole service (scheduler, HTTP server,
//! storage) into every plugin build. Extracting the shared types keeps the
//! plugin side of the protocol a plain-data dependency:
//!
//! ```text
//! vahti-core ◄── vahti-gateway
//!     ▲
//!     └────────── external discovery plugins
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

/// Discovery tree node types
pub mod node;
/// Registration protocol payloads and the REST response envelope
pub mod protocol;
/// Monitored targets and their lifecycle events
pub mod target;

pub use node::{DiscoveryNode, NodeType};
pub use protocol::{ApiEnvelope, ApiMeta, RegistrationReply, RegistrationRequest};
pub use target::{ActiveRecording, Annotations, EventKind, Target, TargetDiscovery};
