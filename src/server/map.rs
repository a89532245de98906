use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::server::node::NodeRegister;
use crate::types::UnitId;

/// Registry of slave id -> register bank, shared between the server and the
/// owning application
///
/// Lookup by id is the hot path; iteration exists for administrative use.
#[derive(Default)]
pub struct NodeMap {
    nodes: RwLock<BTreeMap<u8, Arc<NodeRegister>>>,
}

impl NodeMap {
    /// add (or replace) a node, keyed by its own unit id
    pub fn add_node(&self, node: NodeRegister) -> Arc<NodeRegister> {
        let node = Arc::new(node);
        self.nodes
            .write()
            .unwrap()
            .insert(node.unit_id().value, node.clone());
        node
    }

    /// add several nodes at once
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = NodeRegister>) {
        let mut map = self.nodes.write().unwrap();
        for node in nodes {
            map.insert(node.unit_id().value, Arc::new(node));
        }
    }

    /// remove the node with the given id
    pub fn delete_node(&self, unit_id: UnitId) {
        self.nodes.write().unwrap().remove(&unit_id.value);
    }

    /// remove every node
    pub fn delete_all_nodes(&self) {
        self.nodes.write().unwrap().clear();
    }

    /// look up a node by id
    pub fn get_node(&self, unit_id: UnitId) -> Option<Arc<NodeRegister>> {
        self.nodes.read().unwrap().get(&unit_id.value).cloned()
    }

    /// snapshot of every registered node
    pub fn node_list(&self) -> Vec<Arc<NodeRegister>> {
        self.nodes.read().unwrap().values().cloned().collect()
    }

    /// visit every node until the callback returns false
    pub fn for_each(&self, mut f: impl FnMut(UnitId, &NodeRegister) -> bool) {
        for (id, node) in self.nodes.read().unwrap().iter() {
            if !f(UnitId::new(*id), node) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::node::RegisterLayout;

    fn empty_node(id: u8) -> NodeRegister {
        NodeRegister::new(UnitId::new(id), RegisterLayout::default())
    }

    #[test]
    fn lookup_finds_registered_nodes_only() {
        let map = NodeMap::default();
        map.add_nodes([empty_node(1), empty_node(2)]);
        assert!(map.get_node(UnitId::new(1)).is_some());
        assert!(map.get_node(UnitId::new(3)).is_none());
    }

    #[test]
    fn delete_removes_a_single_node() {
        let map = NodeMap::default();
        map.add_nodes([empty_node(1), empty_node(2)]);
        map.delete_node(UnitId::new(1));
        assert!(map.get_node(UnitId::new(1)).is_none());
        assert!(map.get_node(UnitId::new(2)).is_some());
        map.delete_all_nodes();
        assert!(map.node_list().is_empty());
    }

    #[test]
    fn for_each_stops_when_asked() {
        let map = NodeMap::default();
        map.add_nodes([empty_node(1), empty_node(2), empty_node(3)]);
        let mut visited = 0;
        map.for_each(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }
}
