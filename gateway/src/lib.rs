//! VAHTI gateway - live inventory of monitored runtime targets
//!
//! External discovery plugins register with the gateway, publish the
//! subtree of targets they can see, and are periodically verified for
//! liveness. Plugins that go silent or fail verification are pruned:
//! their realm, targets, and stored credentials disappear from the
//! inventory atomically.
//!
//! # Architecture
//!
//! ```text
//! plugin ──register/publish──► DiscoveryService ──► MemoryStore (tree + targets)
//!    ▲                              │    │
//!    └────── ping / refresh ────────┘    └──► DiscoveryBus (FOUND/MODIFIED/LOST)
//!              (JobScheduler)
//! ```
//!
//! The registration protocol, token scheme, and liveness semantics live
//! in [`registration`], [`token`], and [`scheduler`]; everything else is
//! plumbing around them.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod callback;
pub mod config;
pub mod error;
pub mod notify;
pub mod registration;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod token;
pub mod tree;

pub use callback::{CallbackError, PluginCallback};
pub use config::{Config, ConfigError, LogFormat};
pub use error::{DiscoveryError, Result};
pub use notify::DiscoveryBus;
pub use registration::{DiscoveryService, PluginSummary};
pub use scheduler::{JobError, JobGroup, JobRunner, JobScheduler, JobSpec};
pub use store::{Credential, DiscoveryStore, MemoryStore, PluginRecord};
pub use token::{TokenError, TokenService};
pub use tree::{NodeGraph, NodeId};
