//! [`MetadataTree`]: the process-wide, append-only, structurally-shared tree
//! of annotation context paths.
//!
//! Every distinct (attribute, value) pair reachable from the same parent is
//! interned exactly once: two scopes annotating with the same nested path
//! end up pointing at the same node, which is what makes the tree cheap to
//! snapshot (a snapshot records node ids, not copies of the path) and cheap
//! to merge (two records sharing a node share it structurally, not just by
//! equal value).
//!
//! Nodes are never removed. Logical "unset"/"replace" operations
//! ([`MetadataTree::remove_first_in_path`], [`MetadataTree::replace_first_in_path`],
//! [`MetadataTree::replace_all_in_path`]) build and return a *new* path
//! rooted differently; the nodes the caller no longer references simply stop
//! being pointed at; nothing is ever mutated or freed. New nodes are stored
//! at the end of a single growable vector with the node's id equal to its
//! index, rather than in a generation-checked arena (`moxie-wrench`'s
//! `generational-arena` dependency was considered for this and rejected,
//! see `DESIGN.md`): the "ids are dense, monotonic, and never reused"
//! invariant this crate already requires of the spec makes a plain `Vec`
//! provably sufficient, with no slot-reuse bugs to guard against.

use crate::pool::MemoryPool;
use crate::variant::{TypeTag, Variant};
use parking_lot::RwLock;

/// An index into [`MetadataTree`]'s node vector. `NodeId(0)` is always the
/// tree's root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn raw(self) -> u64 {
        self.0
    }
}

struct NodeData {
    attribute_id: u64,
    value: Variant,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

/// A read-only view of one tree node, returned from lookups.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// The id of the attribute this node's value was recorded against. For
    /// the root and the nine reserved type nodes this is `0`, a sentinel no
    /// real attribute can ever be assigned (attribute ids start at 10, after
    /// the root and the type nodes).
    pub attribute_id: u64,
    pub value: Variant,
    pub parent: Option<NodeId>,
}

struct TreeInner {
    nodes: Vec<NodeData>,
    type_nodes: [NodeId; 9],
    /// Index of the first node not yet handed to a [`MetadataTree::write_new_nodes`]
    /// sink. Monotonically increasing; never rewinds.
    published: usize,
}

/// Ids of the bootstrap meta-attributes, handed back from
/// [`MetadataTree::bootstrap`] so that [`crate::registry::AttributeRegistry`]
/// can wire up `name`/`type`/`properties`/`key.attribute` as ordinary
/// attributes without recursing back into attribute creation.
pub struct MetaIds {
    pub name: NodeId,
    pub type_: NodeId,
    pub properties: NodeId,
    pub key: NodeId,
}

/// The process-wide annotation path tree.
pub struct MetadataTree {
    inner: RwLock<TreeInner>,
}

impl MetadataTree {
    /// Build the tree and its fixed bootstrap nodes: the root, the nine
    /// reserved type nodes (one per [`TypeTag`], in [`TypeTag::ALL`] order),
    /// and the four meta-attributes every other attribute's definition is
    /// itself expressed as a path through (`name`, `type`, `properties`, and
    /// the hidden `key.attribute` used to record an attribute's own name on
    /// its definition node).
    ///
    /// Bootstrap node ids are fixed by construction order: root is `0`, the
    /// type nodes are `1..=9`, and the four meta-attribute ids follow
    /// immediately after. `key.attribute`'s definition is two nodes deep
    /// (a `properties` node carrying the `HIDDEN` bit, with a `name` node
    /// for `"key.attribute"` beneath it), matching how every other
    /// attribute's definition is expressed once [`crate::registry::AttributeRegistry`]
    /// takes over.
    pub fn bootstrap() -> (Self, MetaIds) {
        let mut nodes = Vec::new();

        nodes.push(NodeData {
            attribute_id: 0,
            value: Variant::Type(TypeTag::Inv),
            parent: None,
            first_child: None,
            next_sibling: None,
        });
        let root = NodeId::ROOT;

        let mut type_nodes = [NodeId::ROOT; 9];
        for (i, tag) in TypeTag::ALL.iter().enumerate() {
            let id = NodeId(nodes.len() as u64);
            nodes.push(NodeData {
                attribute_id: 0,
                value: Variant::Type(*tag),
                parent: Some(root),
                first_child: None,
                next_sibling: None,
            });
            Self::link_child(&mut nodes, root, id);
            type_nodes[i] = id;
        }
        let type_node_for = |tag: TypeTag| type_nodes[TypeTag::ALL.iter().position(|t| *t == tag).unwrap()];

        // `name`: type STRING, self-referential (its own `type`'s attribute_id
        // *is* the id being assigned here).
        let id_name = NodeId(nodes.len() as u64);
        nodes.push(NodeData {
            attribute_id: id_name.raw(),
            value: Variant::from_str("name"),
            parent: Some(type_node_for(TypeTag::String)),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut nodes, type_node_for(TypeTag::String), id_name);

        // `type`: type TYPE.
        let id_type = NodeId(nodes.len() as u64);
        nodes.push(NodeData {
            attribute_id: id_name.raw(),
            value: Variant::from_str("type"),
            parent: Some(type_node_for(TypeTag::Type)),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut nodes, type_node_for(TypeTag::Type), id_type);

        // `properties`: type UINT.
        let id_prop = NodeId(nodes.len() as u64);
        nodes.push(NodeData {
            attribute_id: id_name.raw(),
            value: Variant::from_str("properties"),
            parent: Some(type_node_for(TypeTag::Uint)),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut nodes, type_node_for(TypeTag::Uint), id_prop);

        // `key.attribute`: type USR, HIDDEN — two nodes, a properties node
        // carrying the HIDDEN bit and a name node beneath it.
        let usr_type = type_node_for(TypeTag::Usr);
        let hidden_bits = crate::attribute::Properties::HIDDEN.bits() as u64;
        let prop_node = NodeId(nodes.len() as u64);
        nodes.push(NodeData {
            attribute_id: id_prop.raw(),
            value: Variant::Uint(hidden_bits),
            parent: Some(usr_type),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut nodes, usr_type, prop_node);

        let id_key = NodeId(nodes.len() as u64);
        nodes.push(NodeData {
            attribute_id: id_name.raw(),
            value: Variant::from_str("key.attribute"),
            parent: Some(prop_node),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut nodes, prop_node, id_key);

        let tree = MetadataTree { inner: RwLock::new(TreeInner { nodes, type_nodes, published: 0 }) };
        (tree, MetaIds { name: id_name, type_: id_type, properties: id_prop, key: id_key })
    }

    /// The reserved node for a given [`TypeTag`].
    pub fn type_node(&self, tag: TypeTag) -> NodeId {
        let inner = self.inner.read();
        inner.type_nodes[TypeTag::ALL.iter().position(|t| *t == tag).unwrap()]
    }

    /// Look up a node by id. Panics if `id` was never handed out by this
    /// tree; every `NodeId` in circulation came from this tree, so that
    /// should never happen outside of a bug.
    pub fn node(&self, id: NodeId) -> Node {
        let inner = self.inner.read();
        let nd = &inner.nodes[id.raw() as usize];
        Node { id, attribute_id: nd.attribute_id, value: nd.value.clone(), parent: nd.parent }
    }

    /// Intern the path `pairs` (oldest ancestor first) beneath `base`
    /// (defaulting to the root), returning the id of the deepest node.
    /// Payload bytes in `pairs` are recorded as owned by `pool` via
    /// [`MemoryPool::own`].
    ///
    /// When `merge` is `false`, every pair gets a freshly allocated node
    /// even if an identical sibling already exists — this is how
    /// [`crate::runtime::Runtime`] honors [`crate::config::Config::automerge`]
    /// being disabled for a single annotation call. Internal callers that
    /// replay already-published ancestry (the tree-rebuilding helpers below)
    /// always pass `true`, since they are reconstructing structure that was
    /// already decided when it was first created, not making a new merge
    /// decision.
    pub fn get_path(&self, pairs: &[(u64, Variant)], base: Option<NodeId>, pool: &MemoryPool, merge: bool) -> NodeId {
        let mut current = base.unwrap_or(NodeId::ROOT);
        for (attr_id, value) in pairs {
            current = if merge {
                self.intern_child(current, *attr_id, value.clone(), pool)
            } else {
                self.force_child(current, *attr_id, value.clone(), pool)
            };
        }
        current
    }

    fn intern_child(&self, parent: NodeId, attr_id: u64, value: Variant, pool: &MemoryPool) -> NodeId {
        if let Some(found) = Self::scan_children(&self.inner.read(), parent, attr_id, &value) {
            return found;
        }
        let mut inner = self.inner.write();
        if let Some(found) = Self::scan_children(&inner, parent, attr_id, &value) {
            return found;
        }
        let owned = pool.own(value);
        let id = NodeId(inner.nodes.len() as u64);
        inner.nodes.push(NodeData {
            attribute_id: attr_id,
            value: owned,
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut inner.nodes, parent, id);
        id
    }

    /// Like [`MetadataTree::intern_child`] but never reuses an existing
    /// sibling, even if one matches exactly.
    fn force_child(&self, parent: NodeId, attr_id: u64, value: Variant, pool: &MemoryPool) -> NodeId {
        let mut inner = self.inner.write();
        let owned = pool.own(value);
        let id = NodeId(inner.nodes.len() as u64);
        inner.nodes.push(NodeData {
            attribute_id: attr_id,
            value: owned,
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
        });
        Self::link_child(&mut inner.nodes, parent, id);
        id
    }

    fn scan_children(inner: &TreeInner, parent: NodeId, attr_id: u64, value: &Variant) -> Option<NodeId> {
        let mut cur = inner.nodes[parent.raw() as usize].first_child;
        while let Some(c) = cur {
            let nd = &inner.nodes[c.raw() as usize];
            if nd.attribute_id == attr_id && &nd.value == value {
                return Some(c);
            }
            cur = nd.next_sibling;
        }
        None
    }

    fn link_child(nodes: &mut [NodeData], parent: NodeId, child: NodeId) {
        match nodes[parent.raw() as usize].first_child {
            None => nodes[parent.raw() as usize].first_child = Some(child),
            Some(mut cur) => loop {
                match nodes[cur.raw() as usize].next_sibling {
                    Some(next) => cur = next,
                    None => {
                        nodes[cur.raw() as usize].next_sibling = Some(child);
                        break;
                    }
                }
            },
        }
    }

    /// Walk from `from` toward the root looking for the topmost (nearest to
    /// `from`) node recorded against `attr_id`. On a match, returns the
    /// node just above it (its parent, or the root) and the path strictly
    /// below it, oldest-first, ready to be replayed with [`MetadataTree::get_path`].
    fn split_at_topmost(&self, from: NodeId, attr_id: u64) -> Option<(NodeId, Vec<(u64, Variant)>)> {
        let mut newest_first = Vec::new();
        let mut cur = from;
        loop {
            if cur == NodeId::ROOT {
                return None;
            }
            let nd = self.node(cur);
            if nd.attribute_id == attr_id {
                let base = nd.parent.unwrap_or(NodeId::ROOT);
                newest_first.reverse();
                return Some((base, newest_first));
            }
            newest_first.push((nd.attribute_id, nd.value));
            cur = nd.parent.unwrap_or(NodeId::ROOT);
        }
    }

    /// Remove the topmost occurrence of `attr_id` in `from`'s ancestry,
    /// rebuilding everything above it. A no-op (returns `from` unchanged) if
    /// `attr_id` does not appear in the ancestry at all.
    pub fn remove_first_in_path(&self, from: NodeId, attr_id: u64, pool: &MemoryPool) -> NodeId {
        match self.split_at_topmost(from, attr_id) {
            Some((base, suffix)) => self.get_path(&suffix, Some(base), pool, true),
            None => from,
        }
    }

    /// Replace the topmost occurrence of `attr_id` in `from`'s ancestry with
    /// `value`, rebuilding everything above it. If `attr_id` does not appear
    /// in the ancestry, this instead pushes a single new `(attr_id, value)`
    /// node on top of `from`, exactly as [`MetadataTree::get_path`] with a
    /// one-element path would.
    pub fn replace_first_in_path(&self, from: NodeId, attr_id: u64, value: Variant, pool: &MemoryPool) -> NodeId {
        match self.split_at_topmost(from, attr_id) {
            Some((base, mut suffix)) => {
                let mut full = Vec::with_capacity(suffix.len() + 1);
                full.push((attr_id, value));
                full.append(&mut suffix);
                self.get_path(&full, Some(base), pool, true)
            }
            None => self.get_path(&[(attr_id, value)], Some(from), pool, true),
        }
    }

    /// Replace *every* occurrence of `attr_id` anywhere in `from`'s ancestry
    /// with `values` (in order), rebuilding the entire path from the root.
    /// Used for attributes that can legally repeat in a single path (e.g. a
    /// multi-valued loop-nest annotation collapsed into one list).
    pub fn replace_all_in_path(&self, from: NodeId, attr_id: u64, values: &[Variant], pool: &MemoryPool) -> NodeId {
        let mut pairs = Vec::new();
        let mut cur = from;
        while cur != NodeId::ROOT {
            let nd = self.node(cur);
            if nd.attribute_id != attr_id {
                pairs.push((nd.attribute_id, nd.value));
            }
            cur = nd.parent.unwrap_or(NodeId::ROOT);
        }
        pairs.reverse();
        for v in values {
            pairs.push((attr_id, v.clone()));
        }
        self.get_path(&pairs, Some(NodeId::ROOT), pool, true)
    }

    /// Find the nearest ancestor of (and including) `from` recorded against
    /// `attr_id`, or `None` if it does not appear in the ancestry.
    pub fn find_node_with_attribute(&self, from: NodeId, attr_id: u64) -> Option<NodeId> {
        let mut cur = from;
        loop {
            if cur == NodeId::ROOT {
                return None;
            }
            let nd = self.node(cur);
            if nd.attribute_id == attr_id {
                return Some(cur);
            }
            cur = nd.parent.unwrap_or(NodeId::ROOT);
        }
    }

    /// Hand every node created since the last call (or since bootstrap, on
    /// the first call) to `sink`, in creation order, then advance the
    /// publication cursor past them. Writers call this immediately before
    /// emitting a snapshot so that every node id the snapshot references has
    /// already been described to them.
    pub fn write_new_nodes(&self, mut sink: impl FnMut(&Node)) {
        let mut inner = self.inner.write();
        let end = inner.nodes.len();
        let start = inner.published;
        for i in start..end {
            let nd = &inner.nodes[i];
            let node = Node { id: NodeId(i as u64), attribute_id: nd.attribute_id, value: nd.value.clone(), parent: nd.parent };
            sink(&node);
        }
        inner.published = end;
    }
}
