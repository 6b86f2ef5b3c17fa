//! [`Attribute`]: a handle to a registered attribute, and [`Properties`],
//! the bitset controlling how that attribute's values are scoped, stored,
//! and merged.

use crate::scope::ScopeKind;
use crate::tree::NodeId;
use crate::variant::TypeTag;
use std::sync::Arc;

bitflags::bitflags! {
    /// Flags controlling an attribute's scope, storage, and merge behavior.
    ///
    /// Mirrors `cali_attr_properties` from the source runtime one bit at a
    /// time rather than as an opaque integer, so combinations are checked by
    /// the type system instead of by convention.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Properties: u32 {
        const SCOPE_PROCESS = 1 << 0;
        const SCOPE_THREAD   = 1 << 1;
        const SCOPE_TASK     = 1 << 2;
        const ASVALUE        = 1 << 3;
        const HIDDEN         = 1 << 4;
        const NOMERGE        = 1 << 5;
        const SKIP_EVENTS    = 1 << 6;
    }
}

const SCOPE_MASK: Properties = Properties::SCOPE_PROCESS
    .union(Properties::SCOPE_THREAD)
    .union(Properties::SCOPE_TASK);

impl Properties {
    /// The scope this attribute's values live in. Defaults to thread scope
    /// when none of the three scope bits is set, matching the source
    /// runtime's default.
    pub fn scope(&self) -> ScopeKind {
        if self.contains(Properties::SCOPE_PROCESS) {
            ScopeKind::Process
        } else if self.contains(Properties::SCOPE_TASK) {
            ScopeKind::Task
        } else {
            ScopeKind::Thread
        }
    }

    pub fn is_asvalue(&self) -> bool {
        self.contains(Properties::ASVALUE)
    }

    pub fn is_hidden(&self) -> bool {
        self.contains(Properties::HIDDEN)
    }

    pub fn skips_events(&self) -> bool {
        self.contains(Properties::SKIP_EVENTS)
    }

    /// Whether values of this attribute may be folded into a shared
    /// ancestor node by the tree's structural interning. `ASVALUE`
    /// attributes never go through the tree at all; `NOMERGE` and `HIDDEN`
    /// attributes are excluded even though they are node-valued, because
    /// collapsing them would make distinguishable records indistinguishable
    /// to the writer (`NOMERGE`) or hide bookkeeping data behind a shared
    /// node whose identity a reader might rely on (`HIDDEN`).
    pub fn is_auto_combineable(&self) -> bool {
        !self.intersects(Properties::ASVALUE | Properties::NOMERGE | Properties::HIDDEN)
    }
}

impl Default for Properties {
    fn default() -> Self {
        Properties::empty()
    }
}

/// A handle to a registered attribute. Cheap to clone and copy around;
/// carries everything needed to annotate with it without another registry
/// lookup.
#[derive(Clone, Debug)]
pub struct Attribute {
    id: NodeId,
    name: Arc<str>,
    type_tag: TypeTag,
    properties: Properties,
}

impl Attribute {
    pub(crate) fn new(id: NodeId, name: Arc<str>, type_tag: TypeTag, properties: Properties) -> Self {
        Attribute { id, name, type_tag, properties }
    }

    /// The tree node id this attribute's *definition* lives at. Distinct
    /// from any node id created while annotating *with* this attribute.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn properties(&self) -> Properties {
        self.properties
    }

    pub fn scope(&self) -> ScopeKind {
        self.properties.scope()
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Attribute {}

impl std::hash::Hash for Attribute {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scope_is_thread() {
        assert_eq!(Properties::empty().scope(), ScopeKind::Thread);
        assert_eq!(Properties::SCOPE_PROCESS.scope(), ScopeKind::Process);
        assert_eq!(Properties::SCOPE_TASK.scope(), ScopeKind::Task);
    }

    #[test]
    fn asvalue_nomerge_hidden_are_not_auto_combineable() {
        assert!(Properties::empty().is_auto_combineable());
        assert!(!Properties::ASVALUE.is_auto_combineable());
        assert!(!Properties::NOMERGE.is_auto_combineable());
        assert!(!Properties::HIDDEN.is_auto_combineable());
    }
}
