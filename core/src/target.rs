//! Monitored targets and their discovery lifecycle events

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// Annotation maps attached to a target
///
/// `platform` annotations come from the discovery plugin's platform (e.g.
/// container labels); `vahti` annotations are derived by the gateway itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    /// Platform-derived annotations
    #[serde(default)]
    pub platform: BTreeMap<String, String>,
    /// Gateway-derived annotations
    #[serde(default)]
    pub vahti: BTreeMap<String, String>,
}

/// A recording session associated with a target
///
/// Carried only for ownership: recordings live and die with their target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecording {
    /// Recording id, unique within the owning target
    pub id: String,
    /// Human-readable recording name
    pub name: String,
}

/// A monitored runtime target
///
/// Equality is structural over the descriptive fields (connect URL, alias,
/// JVM id, labels, annotations) and deliberately ignores the owned
/// recordings list, so a target compares equal across publishes regardless
/// of recording churn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique, immutable connection URL
    #[serde(rename = "connectUrl")]
    pub connect_url: Url,
    /// Human-readable alias
    pub alias: String,
    /// Hash identifying the remote JVM instance, if known
    #[serde(rename = "jvmId", default, skip_serializing_if = "Option::is_none")]
    pub jvm_id: Option<String>,
    /// Free-form key/value labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Structured annotations
    #[serde(default)]
    pub annotations: Annotations,
    /// Recordings owned by this target, cascade-deleted with it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recordings: Vec<ActiveRecording>,
}

impl Target {
    /// Create a target with the given connect URL and alias
    pub fn new(connect_url: Url, alias: impl Into<String>) -> Self {
        Self {
            connect_url,
            alias: alias.into(),
            jvm_id: None,
            labels: BTreeMap::new(),
            annotations: Annotations::default(),
            recordings: Vec::new(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.connect_url == other.connect_url
            && self.alias == other.alias
            && self.jvm_id == other.jvm_id
            && self.labels == other.labels
            && self.annotations == other.annotations
    }
}

impl Eq for Target {}

/// What happened to a target's persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Target was created
    Found,
    /// Target was updated in place
    Modified,
    /// Target was deleted
    Lost,
}

/// Notification emitted whenever a target transitions through
/// create/update/delete
///
/// Pure notification: consumers must not feed it back into the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDiscovery {
    /// The transition kind
    pub kind: EventKind,
    /// The target as persisted after (or, for `Lost`, before) the transition
    pub target: Target,
}

impl TargetDiscovery {
    /// Convenience constructor
    pub fn new(kind: EventKind, target: Target) -> Self {
        Self { kind, target }
    }
}
