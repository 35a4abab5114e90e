/* SPDX-License-Identifier: GPL-2.0-only */

//! Device-tree query and translation layer
//!
//! The composer consumes a parsed device tree to resolve physical
//! addresses, interrupt numbers and triggers, interrupt-controller
//! geometry and passthrough regions for a concrete board. Blob parsing is
//! delegated to the `fdt` crate; the query layer owns its node arena so
//! ancestors stay reachable for `ranges` walks and so tests can assemble
//! trees without a blob.

mod error;
mod query;

pub use error::Error;
pub use query::{
    is_compatible, parse_irq, ArmGic, DeviceIrq, GicCpuIface, GicVersion, RegEntry, UioDevice,
};

use byteorder::{BigEndian, ByteOrder};

/// Stable handle to a node in a [`DeviceTree`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Clone, Debug)]
pub struct Prop {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug)]
struct NodeData {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    props: Vec<Prop>,
}

/// An owned device tree in pre-order
pub struct DeviceTree {
    nodes: Vec<NodeData>,
}

impl DeviceTree {
    /// Build the tree from a flattened device-tree blob
    pub fn parse(blob: &[u8]) -> Result<Self, Error> {
        let fdt = fdt::Fdt::new(blob).map_err(|e| Error::Blob(format!("{e:?}")))?;
        let root = fdt
            .find_node("/")
            .ok_or_else(|| Error::Blob("blob has no root node".to_string()))?;
        let mut tree = Self { nodes: Vec::new() };
        tree.adopt(root, None);
        Ok(tree)
    }

    fn adopt(&mut self, node: fdt::node::FdtNode, parent: Option<usize>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(NodeData {
            name: node.name.to_string(),
            parent,
            children: Vec::new(),
            props: node
                .properties()
                .map(|p| Prop {
                    name: p.name.to_string(),
                    value: p.value.to_vec(),
                })
                .collect(),
        });
        for child in node.children() {
            let child_id = self.adopt(child, Some(id));
            self.nodes[id].children.push(child_id);
        }
        id
    }

    pub fn root(&self) -> Node<'_> {
        Node { tree: self, id: NodeId(0) }
    }

    pub fn node(&self, id: NodeId) -> Node<'_> {
        Node { tree: self, id }
    }

    /// Look a node up by its full path, e.g. `/soc/serial@10000000`
    ///
    /// A path segment without a unit address also matches a node that
    /// carries one (`serial` matches `serial@10000000`).
    pub fn find_node(&self, path: &str) -> Option<Node<'_>> {
        let mut current = self.root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.children().find(|c| {
                let name = c.name();
                name == segment
                    || (!segment.contains('@')
                        && name.split('@').next() == Some(segment))
            })?;
        }
        Some(current)
    }

    /// First node (pre-order) compatible with any of `wanted`
    pub fn find_compatible(&self, wanted: &[&str]) -> Option<Node<'_>> {
        (0..self.nodes.len())
            .map(|i| self.node(NodeId(i)))
            .find(|n| is_compatible(&n.compatible(), wanted))
    }

    /// All nodes (pre-order) compatible with any of `wanted`
    pub fn find_all_compatible(&self, wanted: &[&str]) -> Vec<Node<'_>> {
        (0..self.nodes.len())
            .map(|i| self.node(NodeId(i)))
            .filter(|n| is_compatible(&n.compatible(), wanted))
            .collect()
    }

    /// First descendant with `device_type = "memory"`
    pub fn memory(&self) -> Option<Node<'_>> {
        (0..self.nodes.len())
            .map(|i| self.node(NodeId(i)))
            .find(|n| n.device_type() == Some("memory"))
    }

    pub fn chosen(&self) -> Option<Node<'_>> {
        self.find_node("/chosen")
    }
}

/// A borrowed view of one tree node
#[derive(Clone, Copy)]
pub struct Node<'a> {
    tree: &'a DeviceTree,
    id: NodeId,
}

impl<'a> Node<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.tree.nodes[self.id.0].name
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        self.tree.nodes[self.id.0]
            .parent
            .map(|p| Node { tree: self.tree, id: NodeId(p) })
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let tree = self.tree;
        self.tree.nodes[self.id.0]
            .children
            .iter()
            .map(move |&c| Node { tree, id: NodeId(c) })
    }

    pub fn prop(&self, name: &str) -> Option<&'a [u8]> {
        self.tree.nodes[self.id.0]
            .props
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_slice())
    }

    /// A property's value as a NUL-terminated string
    pub fn prop_str(&self, name: &str) -> Option<&'a str> {
        let value = self.prop(name)?;
        let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
        core::str::from_utf8(&value[..end]).ok()
    }

    /// A property's value as a NUL-delimited string list
    pub fn prop_str_list(&self, name: &str) -> Vec<&'a str> {
        match self.prop(name) {
            Some(value) => value
                .split(|&b| b == 0)
                .filter(|s| !s.is_empty())
                .filter_map(|s| core::str::from_utf8(s).ok())
                .collect(),
            None => Vec::new(),
        }
    }

    /// A property's value as big-endian 32-bit cells
    pub fn prop_cells(&self, name: &str) -> Result<Option<Vec<u32>>, Error> {
        let Some(value) = self.prop(name) else {
            return Ok(None);
        };
        if value.len() % 4 != 0 {
            return Err(Error::BadCells {
                node: self.name().to_string(),
                prop: name.to_string(),
            });
        }
        Ok(Some(
            value.chunks_exact(4).map(BigEndian::read_u32).collect(),
        ))
    }

    /// A one- or two-cell address property, e.g. `linux,initrd-start`
    pub fn prop_address(&self, name: &str) -> Result<Option<u64>, Error> {
        match self.prop_cells(name)? {
            None => Ok(None),
            Some(cells) => match cells.as_slice() {
                [lo] => Ok(Some(*lo as u64)),
                [hi, lo] => Ok(Some(((*hi as u64) << 32) | *lo as u64)),
                _ => Err(Error::BadCells {
                    node: self.name().to_string(),
                    prop: name.to_string(),
                }),
            },
        }
    }

    pub fn compatible(&self) -> Vec<&'a str> {
        self.prop_str_list("compatible")
    }

    pub fn device_type(&self) -> Option<&'a str> {
        self.prop_str("device_type")
    }

    /// True unless a `status` property says otherwise
    pub fn is_enabled(&self) -> bool {
        match self.prop_str("status") {
            None => true,
            Some(status) => status == "okay" || status == "ok",
        }
    }

    /// `#address-cells` governing this node's children (default 2)
    pub fn address_cells(&self) -> u32 {
        match self.prop("#address-cells") {
            Some(v) if v.len() >= 4 => BigEndian::read_u32(v),
            _ => 2,
        }
    }

    /// `#size-cells` governing this node's children (default 1)
    pub fn size_cells(&self) -> u32 {
        match self.prop("#size-cells") {
            Some(v) if v.len() >= 4 => BigEndian::read_u32(v),
            _ => 1,
        }
    }
}

/// Assembles a [`DeviceTree`] node by node, without a blob
///
/// Exercised heavily by tests; also the entry point for hosts that carry
/// their own device-tree source.
pub struct Builder {
    tree: DeviceTree,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            tree: DeviceTree {
                nodes: vec![NodeData {
                    name: String::new(),
                    parent: None,
                    children: Vec::new(),
                    props: Vec::new(),
                }],
            },
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn add_node(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.tree.nodes.len();
        self.tree.nodes.push(NodeData {
            name: name.to_string(),
            parent: Some(parent.0),
            children: Vec::new(),
            props: Vec::new(),
        });
        self.tree.nodes[parent.0].children.push(id);
        NodeId(id)
    }

    pub fn add_prop(&mut self, node: NodeId, name: &str, value: &[u8]) {
        self.tree.nodes[node.0].props.push(Prop {
            name: name.to_string(),
            value: value.to_vec(),
        });
    }

    pub fn add_prop_cells(&mut self, node: NodeId, name: &str, cells: &[u32]) {
        let mut value = vec![0u8; cells.len() * 4];
        for (i, c) in cells.iter().enumerate() {
            BigEndian::write_u32(&mut value[i * 4..], *c);
        }
        self.add_prop(node, name, &value);
    }

    pub fn add_prop_str(&mut self, node: NodeId, name: &str, s: &str) {
        let mut value = s.as_bytes().to_vec();
        value.push(0);
        self.add_prop(node, name, &value);
    }

    pub fn add_prop_str_list(&mut self, node: NodeId, name: &str, strings: &[&str]) {
        let mut value = Vec::new();
        for s in strings {
            value.extend_from_slice(s.as_bytes());
            value.push(0);
        }
        self.add_prop(node, name, &value);
    }

    pub fn finish(self) -> DeviceTree {
        self.tree
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
