//! [`Snapshot`]: a point-in-time capture of every scope's active annotation
//! state, as handed to snapshot-processing services via the event bus, and
//! [`Entry`], the "trigger" value a caller may seed a snapshot with.
//!
//! A snapshot is a flat, cheap-to-move record: one tree node id per
//! contributing scope (there is no single combined node, since the process,
//! thread, and task scopes each walk their own independent path through the
//! shared tree) plus the as-value entries active anywhere at capture time.
//! [`smallvec`] backs both collections since the overwhelmingly common case
//! is "one or two scopes, a handful of as-value attributes" and a snapshot
//! is taken often enough (every sample period, in a sampling profiler) that
//! avoiding a heap allocation per capture is worth the inline capacity.

use crate::tree::NodeId;
use crate::variant::Variant;
use smallvec::SmallVec;

/// One as-value entry in a [`Snapshot`]: an attribute id paired with the
/// value active for it at capture time.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueEntry {
    pub attribute_id: u64,
    pub value: Variant,
}

/// Either a reference to a context-tree node or an (attribute, value)
/// immediate pair — what [`crate::runtime::Runtime::make_entry`] builds and
/// what a `trigger` argument to `pull_snapshot`/`push_snapshot` seeds a
/// snapshot with before services and scopes contribute to it.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Node(NodeId),
    Value(ValueEntry),
}

impl Entry {
    pub fn value(attribute_id: u64, value: Variant) -> Self {
        Entry::Value(ValueEntry { attribute_id, value })
    }
}

/// A captured snapshot: the tree node(s) representing every contributing
/// scope's node-valued annotations, plus every as-value entry active
/// anywhere at capture time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub nodes: SmallVec<[NodeId; 3]>,
    pub values: SmallVec<[ValueEntry; 4]>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_node(&mut self, node: NodeId) {
        self.nodes.push(node);
    }

    pub fn push_value(&mut self, attribute_id: u64, value: Variant) {
        self.values.push(ValueEntry { attribute_id, value });
    }

    /// Pre-fill with a trigger `Entry`, as `pull_snapshot` does before
    /// invoking the event bus and walking scope buffers.
    pub fn push_entry(&mut self, entry: Entry) {
        match entry {
            Entry::Node(n) => self.push_node(n),
            Entry::Value(v) => self.push_value(v.attribute_id, v.value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.values.is_empty()
    }

    /// Merge another snapshot's contents into this one, e.g. to fold a
    /// service's derived-metric snapshot into the one being pushed to
    /// writers.
    pub fn merge(&mut self, other: Snapshot) {
        self.nodes.extend(other.nodes);
        self.values.extend(other.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_entry_dispatches_by_variant() {
        let mut snap = Snapshot::new();
        snap.push_entry(Entry::Node(NodeId::ROOT));
        snap.push_entry(Entry::value(7, Variant::Bool(true)));
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.values.len(), 1);
        assert_eq!(snap.values[0].attribute_id, 7);
    }

    #[test]
    fn merge_concatenates_both_collections() {
        let mut a = Snapshot::new();
        a.push_node(NodeId::ROOT);
        let mut b = Snapshot::new();
        b.push_value(7, Variant::Bool(true));
        a.merge(b);
        assert_eq!(a.nodes.len(), 1);
        assert_eq!(a.values.len(), 1);
    }
}
