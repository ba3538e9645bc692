//! The discovery tree node graph
//!
//! Nodes are kept flat, keyed by id, with parent/child links - the shape
//! the tree contract needs for cycle checks and for `NotFoundError` on
//! operations against deleted nodes. The nested [`DiscoveryNode`] wire
//! form is produced on demand by [`NodeGraph::to_wire`].
//!
//! The graph itself is not synchronized; the store wraps it in a single
//! lock together with the plugin/target/credential tables so that every
//! multi-step mutation is atomic.

use std::collections::BTreeMap;
use std::collections::HashMap;

use url::Url;
use vahti_core::{DiscoveryNode, NodeType, Target};

use crate::error::DiscoveryError;

/// Node identifier (ULID string)
pub type NodeId = String;

/// Name of the singleton root node
pub const UNIVERSE_NAME: &str = "Universe";

fn new_id() -> NodeId {
    ulid::Ulid::new().to_string()
}

/// A stored tree node
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Node id
    pub id: NodeId,
    /// Display name
    pub name: String,
    /// Node kind
    pub node_type: NodeType,
    /// Free-form labels
    pub labels: BTreeMap<String, String>,
    /// Ordered child ids
    pub children: Vec<NodeId>,
    /// Owning parent, if attached
    pub parent: Option<NodeId>,
    /// Connect URL of the target record attached to this node
    pub connect_url: Option<Url>,
}

/// Flat node table with parent/child links
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: HashMap<NodeId, GraphNode>,
    universe: Option<NodeId>,
}

impl NodeGraph {
    /// Create an empty graph; the Universe is created on first access
    pub fn new() -> Self {
        Self::default()
    }

    /// The singleton root, created lazily
    pub fn universe(&mut self) -> NodeId {
        if let Some(id) = &self.universe {
            return id.clone();
        }
        let id = new_id();
        self.nodes.insert(
            id.clone(),
            GraphNode {
                id: id.clone(),
                name: UNIVERSE_NAME.to_string(),
                node_type: NodeType::Universe,
                labels: BTreeMap::new(),
                children: Vec::new(),
                parent: None,
                connect_url: None,
            },
        );
        self.universe = Some(id.clone());
        id
    }

    /// Create a new, unattached realm node
    pub fn create_realm(&mut self, name: &str) -> NodeId {
        let id = new_id();
        self.nodes.insert(
            id.clone(),
            GraphNode {
                id: id.clone(),
                name: name.to_string(),
                node_type: NodeType::Realm,
                labels: BTreeMap::new(),
                children: Vec::new(),
                parent: None,
                connect_url: None,
            },
        );
        id
    }

    /// Look up a node
    pub fn get(&self, id: &str) -> Result<&GraphNode, DiscoveryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| DiscoveryError::NotFound(format!("node {id}")))
    }

    /// Attach `child` under `parent`
    ///
    /// Rejects re-parenting an already-attached node and anything that
    /// would introduce a cycle.
    pub fn attach(&mut self, parent: &str, child: &str) -> Result<(), DiscoveryError> {
        self.get(parent)?;
        let child_node = self.get(child)?;
        if child_node.parent.is_some() {
            return Err(DiscoveryError::Conflict(format!(
                "node {child} is already attached; detach it first"
            )));
        }

        // Walk up from the parent: if we reach the child, attaching would
        // close a cycle.
        let mut cursor = Some(parent.to_string());
        while let Some(id) = cursor {
            if id == child {
                return Err(DiscoveryError::Conflict(format!(
                    "attaching {child} under {parent} would create a cycle"
                )));
            }
            cursor = self.get(&id)?.parent.clone();
        }

        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child.to_string());
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent.to_string());
        }
        Ok(())
    }

    /// Detach `child` from `parent`
    pub fn detach(&mut self, parent: &str, child: &str) -> Result<(), DiscoveryError> {
        self.get(parent)?;
        let child_node = self.get(child)?;
        if child_node.parent.as_deref() != Some(parent) {
            return Err(DiscoveryError::Conflict(format!(
                "node {child} is not a child of {parent}"
            )));
        }

        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.retain(|c| c != child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = None;
        }
        Ok(())
    }

    /// Insert a wire subtree under `parent`, assigning fresh ids
    ///
    /// Returns the id of the subtree root. Target leaves are linked by
    /// connect URL; the caller persists the target records themselves.
    pub fn insert_subtree(
        &mut self,
        parent: &str,
        node: &DiscoveryNode,
    ) -> Result<NodeId, DiscoveryError> {
        self.get(parent)?;

        let id = new_id();
        self.nodes.insert(
            id.clone(),
            GraphNode {
                id: id.clone(),
                name: node.name.clone(),
                node_type: node.node_type.clone(),
                labels: node.labels.clone(),
                children: Vec::new(),
                parent: Some(parent.to_string()),
                connect_url: node.target.as_ref().map(|t| t.connect_url.clone()),
            },
        );
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id.clone());
        }

        for child in &node.children {
            self.insert_subtree(&id, child)?;
        }
        Ok(id)
    }

    /// Remove a node and its whole subtree
    ///
    /// Returns the connect URLs of all target nodes that were removed, so
    /// the caller can cascade into the target records.
    pub fn remove_subtree(&mut self, id: &str) -> Result<Vec<Url>, DiscoveryError> {
        let node = self.get(id)?.clone();
        if let Some(parent) = &node.parent {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.retain(|c| c != id);
            }
        }

        let mut removed = Vec::new();
        self.remove_recursive(id, &mut removed);
        Ok(removed)
    }

    fn remove_recursive(&mut self, id: &str, removed: &mut Vec<Url>) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some(url) = node.connect_url {
            removed.push(url);
        }
        for child in node.children {
            self.remove_recursive(&child, removed);
        }
    }

    /// Remove every child subtree of `id`, keeping the node itself
    pub fn clear_children(&mut self, id: &str) -> Result<Vec<Url>, DiscoveryError> {
        let children = self.get(id)?.children.clone();
        let mut removed = Vec::new();
        for child in children {
            self.remove_recursive(&child, &mut removed);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.children.clear();
        }
        Ok(removed)
    }

    /// Connect URLs of all target nodes in the subtree rooted at `id`
    pub fn collect_connect_urls(&self, id: &str) -> Vec<Url> {
        self.collect_target_nodes(id)
            .into_iter()
            .map(|(_, url)| url)
            .collect()
    }

    /// `(node id, connect URL)` pairs for all target nodes in the subtree
    /// rooted at `id`, in tree order
    pub fn collect_target_nodes(&self, id: &str) -> Vec<(NodeId, Url)> {
        let mut pairs = Vec::new();
        self.collect_recursive(id, &mut pairs);
        pairs
    }

    fn collect_recursive(&self, id: &str, pairs: &mut Vec<(NodeId, Url)>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if let Some(url) = &node.connect_url {
            pairs.push((node.id.clone(), url.clone()));
        }
        for child in &node.children {
            self.collect_recursive(child, pairs);
        }
    }

    /// Build the nested wire form of the subtree rooted at `id`
    ///
    /// Target payloads are looked up through `resolve` so the graph stays
    /// decoupled from the target table.
    pub fn to_wire(
        &self,
        id: &str,
        resolve: &impl Fn(&Url) -> Option<Target>,
    ) -> Result<DiscoveryNode, DiscoveryError> {
        let node = self.get(id)?;
        let mut children = Vec::with_capacity(node.children.len());
        for child in &node.children {
            children.push(self.to_wire(child, resolve)?);
        }
        Ok(DiscoveryNode {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            labels: node.labels.clone(),
            children,
            target: node.connect_url.as_ref().and_then(resolve),
        })
    }

    /// Number of nodes currently in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds no nodes at all
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn leaf(url: &str, alias: &str) -> DiscoveryNode {
        DiscoveryNode::leaf(Target::new(url.parse().unwrap(), alias))
    }

    fn no_targets(_: &Url) -> Option<Target> {
        None
    }

    #[test]
    fn test_universe_is_a_lazy_singleton() {
        let mut graph = NodeGraph::new();
        assert!(graph.is_empty());

        let first = graph.universe();
        let second = graph.universe();

        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get(&first).unwrap().node_type, NodeType::Universe);
    }

    #[test]
    fn test_attach_realm_under_universe() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");

        assert!(graph.get(&realm).unwrap().parent.is_none());
        graph.attach(&universe, &realm).unwrap();

        assert_eq!(graph.get(&universe).unwrap().children, vec![realm.clone()]);
        assert_eq!(graph.get(&realm).unwrap().parent.as_deref(), Some(universe.as_str()));
    }

    #[test]
    fn test_attach_rejects_second_parent() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let other = graph.create_realm("other");
        graph.attach(&universe, &other).unwrap();

        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();

        let err = graph.attach(&other, &realm).unwrap_err();
        assert!(matches!(err, DiscoveryError::Conflict(_)));
    }

    #[test]
    fn test_attach_rejects_cycle() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();

        // Universe is an ancestor of realm; attaching it underneath would
        // close a cycle. It is also already rejected as "attached" only when
        // it has a parent, which the root never does - the cycle walk must
        // catch this case.
        let err = graph.attach(&realm, &universe).unwrap_err();
        assert!(matches!(err, DiscoveryError::Conflict(_)));
    }

    #[test]
    fn test_attach_rejects_self() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let err = graph.attach(&universe, &universe).unwrap_err();
        assert!(matches!(err, DiscoveryError::Conflict(_)));
    }

    #[test]
    fn test_detach_then_reattach() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();

        graph.detach(&universe, &realm).unwrap();
        assert!(graph.get(&universe).unwrap().children.is_empty());

        graph.attach(&universe, &realm).unwrap();
        assert_eq!(graph.get(&universe).unwrap().children.len(), 1);
    }

    #[test]
    fn test_detach_requires_parent_child_pair() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");

        let err = graph.detach(&universe, &realm).unwrap_err();
        assert!(matches!(err, DiscoveryError::Conflict(_)));
    }

    #[test]
    fn test_operations_on_missing_nodes_fail_not_found() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();

        assert!(matches!(
            graph.attach(&universe, "nope"),
            Err(DiscoveryError::NotFound(_))
        ));
        assert!(matches!(
            graph.remove_subtree("nope"),
            Err(DiscoveryError::NotFound(_))
        ));
        assert!(matches!(
            graph.clear_children("nope"),
            Err(DiscoveryError::NotFound(_))
        ));
    }

    #[test]
    fn test_insert_subtree_assigns_ids_and_links_targets() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();

        let mut pod = DiscoveryNode::new("pod-1", NodeType::Custom("Pod".into()));
        pod.children.push(leaf("http://a:1/", "a"));

        let root = graph.insert_subtree(&realm, &pod).unwrap();

        let stored = graph.get(&root).unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.children.len(), 1);

        let urls = graph.collect_connect_urls(&realm);
        assert_eq!(urls, vec!["http://a:1/".parse().unwrap()]);
    }

    #[test]
    fn test_remove_subtree_cascades_and_reports_targets() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();
        graph.insert_subtree(&realm, &leaf("http://a:1/", "a")).unwrap();
        graph.insert_subtree(&realm, &leaf("http://b:2/", "b")).unwrap();

        let removed = graph.remove_subtree(&realm).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(graph.get(&universe).unwrap().children.is_empty());
        assert!(matches!(
            graph.get(&realm),
            Err(DiscoveryError::NotFound(_))
        ));
        // Universe survives
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_clear_children_keeps_the_realm() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();
        graph.insert_subtree(&realm, &leaf("http://a:1/", "a")).unwrap();

        let removed = graph.clear_children(&realm).unwrap();

        assert_eq!(removed.len(), 1);
        assert!(graph.contains(&realm));
        assert!(graph.get(&realm).unwrap().children.is_empty());
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        for name in ["alpha", "beta", "gamma"] {
            let realm = graph.create_realm(name);
            graph.attach(&universe, &realm).unwrap();
        }

        let wire = graph.to_wire(&universe, &no_targets).unwrap();
        let names: Vec<_> = wire.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_to_wire_resolves_targets() {
        let mut graph = NodeGraph::new();
        let universe = graph.universe();
        let realm = graph.create_realm("JDP");
        graph.attach(&universe, &realm).unwrap();
        graph.insert_subtree(&realm, &leaf("http://a:1/", "a")).unwrap();

        let resolve = |url: &Url| Some(Target::new(url.clone(), "resolved"));
        let wire = graph.to_wire(&universe, &resolve).unwrap();

        let target_node = &wire.children[0].children[0];
        assert_eq!(target_node.node_type, NodeType::Target);
        assert_eq!(target_node.target.as_ref().unwrap().alias, "resolved");
    }
}
