//! [`ContextBuffer`]: the live annotation state held by one [`crate::scope::Scope`].
//!
//! A buffer tracks two independent kinds of active entry:
//!
//! - node-valued attributes are folded into a *map* of current-node
//!   pointers into the [`crate::tree::MetadataTree`], keyed by whichever
//!   attribute id is currently acting as that pointer's key (ordinarily the
//!   shared `key.attribute` id once auto-merge folds several attributes
//!   together, but an attribute's own id when it isn't auto-combineable, or
//!   when auto-merge is disabled). Beginning one walks the pointer one step
//!   deeper, ending one walks it back out
//!   ([`crate::tree::MetadataTree::remove_first_in_path`]);
//! - `ASVALUE` attributes bypass the tree entirely and live in a small
//!   per-attribute stack here, so that a high-frequency counter never
//!   forces a tree-interning lock acquisition.
//!
//! Both kinds support the same begin/end (stack) and set/get/exchange
//! (in-place) operations; the buffer does not itself decide which kind an
//! attribute is, or which key a node-valued attribute's pointer is filed
//! under — that is [`crate::runtime::Runtime`]'s job.

use crate::snapshot::Snapshot;
use crate::tree::NodeId;
use crate::variant::Variant;
use smallvec::SmallVec;
use std::collections::HashMap;

/// The live annotation state for one scope: a map of key-attribute-id to
/// current tree position, plus a table of active as-value entries.
pub struct ContextBuffer {
    node_map: HashMap<u64, NodeId>,
    values: HashMap<u64, SmallVec<[Variant; 1]>>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        ContextBuffer { node_map: HashMap::new(), values: HashMap::new() }
    }

    /// The current tree position filed under `key`, or the tree's root if
    /// nothing is active under that key. The root is never itself a valid
    /// "current node" for a key, so it doubles as the absent-entry sentinel
    /// the way `NULL` doubled for the source runtime's node pointer.
    pub fn get_node(&self, key: u64) -> NodeId {
        self.node_map.get(&key).copied().unwrap_or(NodeId::ROOT)
    }

    /// Overwrite the current tree position filed under `key`. Storing the
    /// root is equivalent to [`ContextBuffer::unset_node`]: it means "no
    /// entry", not "an entry pointing at the root".
    pub fn set_node(&mut self, key: u64, node: NodeId) {
        if node == NodeId::ROOT {
            self.node_map.remove(&key);
        } else {
            self.node_map.insert(key, node);
        }
    }

    pub fn unset_node(&mut self, key: u64) {
        self.node_map.remove(&key);
    }

    /// Push a new value for `attr_id`, nesting over any existing active
    /// value for the same attribute.
    pub fn begin_value(&mut self, attr_id: u64, value: Variant) {
        self.values.entry(attr_id).or_default().push(value);
    }

    /// Pop the innermost active value for `attr_id`. Returns `None` (and
    /// leaves the buffer unchanged) if the attribute has no active value.
    pub fn end_value(&mut self, attr_id: u64) -> Option<Variant> {
        let stack = self.values.get_mut(&attr_id)?;
        let popped = stack.pop();
        if stack.is_empty() {
            self.values.remove(&attr_id);
        }
        popped
    }

    /// Replace the innermost active value for `attr_id` with `value`,
    /// pushing a new one if none is active yet. Returns the value that was
    /// replaced, if any.
    pub fn set_value(&mut self, attr_id: u64, value: Variant) -> Option<Variant> {
        let stack = self.values.entry(attr_id).or_default();
        match stack.last_mut() {
            Some(top) => Some(std::mem::replace(top, value)),
            None => {
                stack.push(value);
                None
            }
        }
    }

    /// Atomically read and replace the innermost active value for
    /// `attr_id`. Identical to [`ContextBuffer::set_value`] in this crate,
    /// since every caller already holds the scope's buffer lock for the
    /// duration of the call — there is no intermediate state for a second
    /// caller to observe.
    pub fn exchange_value(&mut self, attr_id: u64, value: Variant) -> Option<Variant> {
        self.set_value(attr_id, value)
    }

    /// Peek the innermost active value for `attr_id`, if any.
    pub fn get_value(&self, attr_id: u64) -> Option<&Variant> {
        self.values.get(&attr_id).and_then(|s| s.last())
    }

    /// Every currently active as-value entry, innermost value only, in
    /// unspecified order. Used by [`ContextBuffer::snapshot`] and by
    /// [`crate::runtime::Runtime::pull_snapshot`] to assemble a snapshot's
    /// as-value portion.
    pub fn active_values(&self) -> impl Iterator<Item = (u64, &Variant)> {
        self.values.iter().filter_map(|(id, stack)| stack.last().map(|v| (*id, v)))
    }

    /// Append one node entry per active `node_map` binding and one
    /// (attr-id, variant) entry per active as-value binding into `dest`.
    /// Ordering is unspecified, matching the spec's snapshot contract.
    pub fn snapshot(&self, dest: &mut Snapshot) {
        for node in self.node_map.values() {
            dest.push_node(*node);
        }
        for (id, v) in self.active_values() {
            dest.push_value(id, v.clone());
        }
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new()
    }
}
