//! Storage for plugins, tree nodes, targets, and credentials
//!
//! [`DiscoveryStore`] is the transactional seam the protocol handler works
//! against: every multi-step mutation (register, publish, prune) is one
//! trait method executing atomically. [`MemoryStore`] keeps the whole
//! state behind a single `parking_lot::RwLock`, so a mutator holds the
//! write lock for the full cascade and partial states are never
//! observable by readers.
//!
//! Cascade deletion is an explicit walk of the ownership graph
//! (Plugin → Realm subtree → Targets → Recordings → Credential) rather
//! than anything framework-implicit.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::RwLock;
use url::Url;
use vahti_core::{DiscoveryNode, EventKind, Target, TargetDiscovery};

use crate::error::DiscoveryError;
use crate::tree::{NodeGraph, NodeId};

/// A registered discovery plugin
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// Plugin id (ULID)
    pub id: String,
    /// The realm node this plugin owns, 1:1
    pub realm: NodeId,
    /// Callback URI used to ping/refresh the plugin; builtin plugins
    /// have none
    pub callback: Option<Url>,
    /// Builtin plugins cannot be deregistered or pruned
    pub builtin: bool,
}

/// Stored authorization material for a plugin's callback
#[derive(Debug, Clone)]
pub struct Credential {
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
}

#[derive(Debug)]
struct TargetRecord {
    target: Target,
    /// Back-reference to the owning tree node
    node: NodeId,
}

/// Typed repository interface over the discovery state
///
/// Mutating methods are transactions: they either apply completely or
/// leave the state untouched.
pub trait DiscoveryStore: Send + Sync {
    /// Create the Universe root if it does not exist yet
    fn ensure_universe(&self);

    /// The full tree, rooted at the Universe, recursively serialized
    fn tree(&self) -> DiscoveryNode;

    /// Look up a plugin by id
    fn plugin(&self, id: &str) -> Option<PluginRecord>;

    /// All plugins, optionally filtered by realm name
    fn plugins(&self, realm: Option<&str>) -> Vec<PluginRecord>;

    /// Display name of a tree node
    fn node_name(&self, id: &str) -> Option<String>;

    /// Look up a target by its unique connect URL
    fn target_by_connect_url(&self, url: &Url) -> Option<Target>;

    /// Stored callback credential for a plugin, if any
    fn credential_for(&self, plugin_id: &str) -> Option<Credential>;

    /// Store (or replace) a plugin's callback credential
    fn put_credential(&self, plugin_id: &str, credential: Credential);

    /// Create a plugin together with its realm, attached under the
    /// Universe, as one transaction
    fn insert_plugin(
        &self,
        realm_name: &str,
        callback: Option<Url>,
        builtin: bool,
    ) -> Result<PluginRecord, DiscoveryError>;

    /// Atomically replace the children of a plugin's realm
    ///
    /// Incoming target payloads are re-linked to their new nodes before
    /// persisting. Returns the resulting target lifecycle events in
    /// order: lost targets first, then found/modified in tree order.
    /// Fails `ConflictError` without mutating anything if the incoming
    /// subtree repeats a connect URL or claims one owned by another
    /// plugin.
    fn replace_children(
        &self,
        plugin_id: &str,
        children: &[DiscoveryNode],
    ) -> Result<Vec<TargetDiscovery>, DiscoveryError>;

    /// Delete a plugin and everything it owns: realm subtree, targets
    /// (with their recordings), and stored credential
    ///
    /// Tolerant of absence: returns `None` if no such plugin exists, so
    /// racing prune/deregister callers can treat the loss silently.
    fn remove_plugin(&self, plugin_id: &str) -> Option<Vec<TargetDiscovery>>;
}

#[derive(Default)]
struct State {
    graph: NodeGraph,
    plugins: IndexMap<String, PluginRecord>,
    targets: IndexMap<Url, TargetRecord>,
    credentials: HashMap<String, Credential>,
}

/// In-memory [`DiscoveryStore`] for single-node deployments and tests
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn flatten_targets(
    node: &DiscoveryNode,
    out: &mut IndexMap<Url, Target>,
) -> Result<(), DiscoveryError> {
    if let Some(target) = &node.target {
        if out
            .insert(target.connect_url.clone(), target.clone())
            .is_some()
        {
            return Err(DiscoveryError::Conflict(format!(
                "duplicate connectUrl {} in published subtree",
                target.connect_url
            )));
        }
    }
    for child in &node.children {
        flatten_targets(child, out)?;
    }
    Ok(())
}

impl DiscoveryStore for MemoryStore {
    fn ensure_universe(&self) {
        self.state.write().graph.universe();
    }

    fn tree(&self) -> DiscoveryNode {
        let mut state = self.state.write();
        let universe = state.graph.universe();
        let state = &*state;
        let resolve = |url: &Url| state.targets.get(url).map(|rec| rec.target.clone());
        // The universe always exists at this point
        state
            .graph
            .to_wire(&universe, &resolve)
            .unwrap_or_else(|_| DiscoveryNode::new(crate::tree::UNIVERSE_NAME, vahti_core::NodeType::Universe))
    }

    fn plugin(&self, id: &str) -> Option<PluginRecord> {
        self.state.read().plugins.get(id).cloned()
    }

    fn plugins(&self, realm: Option<&str>) -> Vec<PluginRecord> {
        let state = self.state.read();
        state
            .plugins
            .values()
            .filter(|p| match realm {
                Some(name) => state
                    .graph
                    .get(&p.realm)
                    .map(|node| node.name == name)
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn node_name(&self, id: &str) -> Option<String> {
        self.state.read().graph.get(id).ok().map(|n| n.name.clone())
    }

    fn target_by_connect_url(&self, url: &Url) -> Option<Target> {
        self.state
            .read()
            .targets
            .get(url)
            .map(|rec| rec.target.clone())
    }

    fn credential_for(&self, plugin_id: &str) -> Option<Credential> {
        self.state.read().credentials.get(plugin_id).cloned()
    }

    fn put_credential(&self, plugin_id: &str, credential: Credential) {
        self.state
            .write()
            .credentials
            .insert(plugin_id.to_string(), credential);
    }

    fn insert_plugin(
        &self,
        realm_name: &str,
        callback: Option<Url>,
        builtin: bool,
    ) -> Result<PluginRecord, DiscoveryError> {
        let mut state = self.state.write();
        let universe = state.graph.universe();
        let realm = state.graph.create_realm(realm_name);
        state.graph.attach(&universe, &realm)?;

        let record = PluginRecord {
            id: ulid::Ulid::new().to_string(),
            realm,
            callback,
            builtin,
        };
        state.plugins.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn replace_children(
        &self,
        plugin_id: &str,
        children: &[DiscoveryNode],
    ) -> Result<Vec<TargetDiscovery>, DiscoveryError> {
        let mut state = self.state.write();
        let realm = state
            .plugins
            .get(plugin_id)
            .map(|p| p.realm.clone())
            .ok_or_else(|| DiscoveryError::NotFound(format!("plugin {plugin_id}")))?;

        // Validate everything up front so a rejected publish leaves the
        // pre-publish state fully intact.
        let mut incoming = IndexMap::new();
        for child in children {
            flatten_targets(child, &mut incoming)?;
        }

        let old_urls = state.graph.collect_connect_urls(&realm);
        for url in incoming.keys() {
            if let Some(existing) = state.targets.get(url) {
                if !old_urls.contains(url) {
                    return Err(DiscoveryError::Conflict(format!(
                        "connectUrl {url} is already owned by node {}",
                        existing.node
                    )));
                }
            }
        }

        let mut events = Vec::new();

        state.graph.clear_children(&realm)?;
        for url in &old_urls {
            if !incoming.contains_key(url) {
                if let Some(rec) = state.targets.swap_remove(url) {
                    events.push(TargetDiscovery::new(EventKind::Lost, rec.target));
                }
            }
        }

        for child in children {
            state.graph.insert_subtree(&realm, child)?;
        }

        // Re-link each published target to its new node, then persist
        for (node, url) in state.graph.collect_target_nodes(&realm) {
            let Some(published) = incoming.get(&url).cloned() else {
                continue;
            };
            match state.targets.get_mut(&url) {
                Some(rec) => {
                    let changed = rec.target != published;
                    let recordings = std::mem::take(&mut rec.target.recordings);
                    rec.target = published;
                    // Recordings are owned state, not publish payload
                    rec.target.recordings = recordings;
                    rec.node = node;
                    if changed {
                        events.push(TargetDiscovery::new(EventKind::Modified, rec.target.clone()));
                    }
                }
                None => {
                    events.push(TargetDiscovery::new(EventKind::Found, published.clone()));
                    state.targets.insert(
                        url,
                        TargetRecord {
                            target: published,
                            node,
                        },
                    );
                }
            }
        }

        Ok(events)
    }

    fn remove_plugin(&self, plugin_id: &str) -> Option<Vec<TargetDiscovery>> {
        let mut state = self.state.write();
        let plugin = state.plugins.swap_remove(plugin_id)?;

        // Realm subtree first (also detaches the realm from the
        // Universe), then the target records it referenced, then the
        // credential. Each step is a no-op if its object is already gone.
        let urls = state.graph.remove_subtree(&plugin.realm).unwrap_or_default();

        let mut events = Vec::new();
        for url in urls {
            if let Some(rec) = state.targets.swap_remove(&url) {
                events.push(TargetDiscovery::new(EventKind::Lost, rec.target));
            }
        }
        state.credentials.remove(plugin_id);

        Some(events)
    }
}
