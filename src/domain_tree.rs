use std::collections::HashMap;

/// Stable handle to a node in the tree. Nodes are never removed, so a
/// NodeId stays valid for the lifetime of the tree.
pub type NodeId = usize;

const WILDCARD: &str = "*";

struct Node<T> {
    parent: Option<NodeId>,
    label: String,
    value: Option<T>,
    children: HashMap<String, NodeId>,
}

/// Suffix trie over dot-separated DNS labels.
///
/// Labels are indexed from the root label inward (`a.b.com` is stored as
/// `com` -> `b` -> `a`), so the most specific configured ancestor of a
/// query name wins. The literal label `*` acts as a per-level fallback:
/// it catches any label at that level, but a failed match never backtracks
/// to a wildcard at a shallower level.
pub struct DomainTree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> DomainTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                label: String::new(),
                value: None,
                children: HashMap::new(),
            }],
        }
    }

    /// Insert a domain name, creating missing nodes along the path, and
    /// return the terminal node. Idempotent: repeated insertion of the
    /// same name returns the same node.
    pub fn insert(&mut self, domain: &str) -> NodeId {
        let mut current = 0;
        for label in domain.split('.').rev() {
            current = match self.nodes[current].children.get(label).copied() {
                Some(child) => child,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(Node {
                        parent: Some(current),
                        label: label.to_string(),
                        value: None,
                        children: HashMap::new(),
                    });
                    self.nodes[current].children.insert(label.to_string(), id);
                    id
                }
            };
        }
        current
    }

    /// Find the node for a domain name, taking the `*` child wherever an
    /// exact label is missing. Returns None as soon as a level matches
    /// neither.
    pub fn find(&self, domain: &str) -> Option<NodeId> {
        let mut current = 0;
        for label in domain.split('.').rev() {
            let node = &self.nodes[current];
            current = match node.children.get(label) {
                Some(&child) => child,
                None => *node.children.get(WILDCARD)?,
            };
        }
        Some(current)
    }

    /// Look up the value attached to a domain name
    pub fn get(&self, domain: &str) -> Option<&T> {
        self.value(self.find(domain)?)
    }

    pub fn value(&self, id: NodeId) -> Option<&T> {
        self.nodes[id].value.as_ref()
    }

    pub fn set_value(&mut self, id: NodeId, value: T) {
        self.nodes[id].value = Some(value);
    }

    /// Reconstruct the dotted name of a node by walking parent links
    pub fn full_path(&self, id: NodeId) -> String {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            if node.parent.is_some() {
                labels.push(node.label.as_str());
            }
            current = node.parent;
        }
        labels.join(".")
    }
}

impl<T> Default for DomainTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
