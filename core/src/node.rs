//! Nodes of the discovery tree
//!
//! The tree is a hierarchy of [`DiscoveryNode`]s: a single Universe root,
//! one Realm per registered plugin, and whatever subtree the plugin
//! publishes beneath its realm. This type doubles as the publish wire
//! format: plugins submit nodes without ids, and the gateway assigns ids
//! when it persists them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::target::Target;

/// The kind of a discovery tree node
///
/// `Universe` and `Realm` are structural: the Universe is the process-wide
/// singleton root and each Realm is the attachment point for exactly one
/// plugin. `Target` marks a leaf carrying a monitored target. Anything else
/// a plugin invents (pods, hosts, clusters) round-trips as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// The singleton root of the tree
    Universe,
    /// A plugin's attachment point under the Universe
    Realm,
    /// A leaf node carrying a monitored target
    Target,
    /// Plugin-defined intermediate node kind
    Custom(String),
}

impl NodeType {
    /// The wire name of this node type
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Universe => "Universe",
            NodeType::Realm => "Realm",
            NodeType::Target => "Target",
            NodeType::Custom(name) => name,
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Universe" => NodeType::Universe,
            "Realm" => NodeType::Realm,
            "Target" => NodeType::Target,
            _ => NodeType::Custom(s),
        }
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the discovery tree
///
/// Serialized recursively for the tree endpoint; deserialized from publish
/// bodies, where `id` is absent and assigned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Gateway-assigned node id (ULID). Empty on the publish wire.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Display name; for target leaves conventionally the connect URL
    pub name: String,
    /// Node kind
    #[serde(rename = "nodeType")]
    pub node_type: NodeType,
    /// Free-form key/value labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Ordered child nodes, unique by identity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DiscoveryNode>,
    /// The monitored target attached to this node, if it is a leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

impl DiscoveryNode {
    /// Create an empty node of the given kind
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            node_type,
            labels: BTreeMap::new(),
            children: Vec::new(),
            target: None,
        }
    }

    /// Create a target leaf node, named after the target's connect URL
    pub fn leaf(target: Target) -> Self {
        Self {
            id: String::new(),
            name: target.connect_url.to_string(),
            node_type: NodeType::Target,
            labels: BTreeMap::new(),
            children: Vec::new(),
            target: Some(target),
        }
    }

    /// Whether this node is a target leaf
    pub fn is_target(&self) -> bool {
        self.node_type == NodeType::Target
    }

    /// Total number of nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;

    fn make_target(url: &str, alias: &str) -> Target {
        Target::new(url.parse().expect("valid url"), alias)
    }

    #[test]
    fn test_node_type_wire_names() {
        assert_eq!(NodeType::Universe.as_str(), "Universe");
        assert_eq!(NodeType::Realm.as_str(), "Realm");
        assert_eq!(NodeType::Target.as_str(), "Target");
        assert_eq!(NodeType::Custom("Pod".into()).as_str(), "Pod");
    }

    #[test]
    fn test_node_type_roundtrip_through_string() {
        for t in [
            NodeType::Universe,
            NodeType::Realm,
            NodeType::Target,
            NodeType::Custom("Deployment".into()),
        ] {
            let s: String = t.clone().into();
            assert_eq!(NodeType::from(s), t);
        }
    }

    #[test]
    fn test_node_serializes_without_empty_fields() {
        let node = DiscoveryNode::new("JDP", NodeType::Realm);
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(json["name"], "JDP");
        assert_eq!(json["nodeType"], "Realm");
        // id, labels, children, target are all omitted when empty
        assert!(json.get("id").is_none());
        assert!(json.get("children").is_none());
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_publish_body_deserializes_without_id() {
        let json = r#"{
            "name": "service:jmx:rmi:///jndi/rmi://host:9091/jmxrmi",
            "nodeType": "Target",
            "target": {
                "connectUrl": "service:jmx:rmi:///jndi/rmi://host:9091/jmxrmi",
                "alias": "app1"
            }
        }"#;

        let node: DiscoveryNode = serde_json::from_str(json).unwrap();
        assert!(node.id.is_empty());
        assert!(node.is_target());
        assert_eq!(node.target.unwrap().alias, "app1");
    }

    #[test]
    fn test_leaf_named_after_connect_url() {
        let target = make_target("service:jmx:rmi://host:9091/jmxrmi", "app1");
        let node = DiscoveryNode::leaf(target);

        assert_eq!(node.node_type, NodeType::Target);
        assert_eq!(node.name, "service:jmx:rmi://host:9091/jmxrmi");
    }

    #[test]
    fn test_subtree_len_counts_recursively() {
        let mut realm = DiscoveryNode::new("realm", NodeType::Realm);
        let mut pod = DiscoveryNode::new("pod", NodeType::Custom("Pod".into()));
        pod.children
            .push(DiscoveryNode::leaf(make_target("http://a:1/x", "a")));
        realm.children.push(pod);
        realm
            .children
            .push(DiscoveryNode::leaf(make_target("http://b:2/x", "b")));

        assert_eq!(realm.subtree_len(), 4);
    }
}
