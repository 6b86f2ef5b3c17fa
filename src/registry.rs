//! [`AttributeRegistry`]: the process-wide name → [`Attribute`] table.
//!
//! Looked up far more often than it is written to (every `begin`/`set`/`get`
//! call resolves an attribute, but `create_attribute` runs once per distinct
//! attribute name over a process's lifetime), so lookups go through
//! [`crate::sync::SignalSafeRwLock`]'s cheap multi-reader path and creation
//! pays for a double-checked write-lock acquisition instead.
//!
//! An attribute's definition is itself expressed as a path through the
//! metadata tree (`type` node → optional `properties` node → `name` node),
//! exactly like any other node-valued annotation; `AttributeRegistry` is
//! the thing that remembers the mapping from a definition's leaf node id
//! back to a friendly `name`/`type_tag`/`properties` triple, so callers
//! never have to walk the tree to resolve a name.

use crate::attribute::{Attribute, Properties};
use crate::pool::MemoryPool;
use crate::sync::SignalSafeRwLock;
use crate::tree::{MetaIds, MetadataTree, NodeId};
use crate::variant::{TypeTag, Variant};
use std::collections::HashMap;
use std::sync::Arc;

struct RegistryInner {
    by_name: HashMap<Box<str>, Attribute>,
    by_id: HashMap<u64, Attribute>,
}

pub struct AttributeRegistry {
    inner: SignalSafeRwLock<RegistryInner>,
}

impl AttributeRegistry {
    /// Build the registry and pre-register the four bootstrap meta
    /// attributes at the ids [`MetadataTree::bootstrap`] already assigned
    /// them, so that `get_attribute("name")` etc. work without a separate
    /// first-use creation step.
    pub fn bootstrap(meta: &MetaIds) -> Self {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();

        let mut register = |id: NodeId, name: &str, type_tag: TypeTag| {
            let attr = Attribute::new(id, Arc::from(name), type_tag, Properties::HIDDEN);
            by_name.insert(Box::from(name), attr.clone());
            by_id.insert(id.raw(), attr);
        };
        register(meta.name, "name", TypeTag::String);
        register(meta.type_, "type", TypeTag::Type);
        register(meta.properties, "properties", TypeTag::Uint);
        register(meta.key, "key.attribute", TypeTag::Usr);

        AttributeRegistry { inner: SignalSafeRwLock::new(RegistryInner { by_name, by_id }) }
    }

    /// Look up (or, on first use for this name, create) an attribute.
    /// `pool` is always the process scope's pool: attribute *definitions*
    /// are process-wide regardless of which scope first uses them,
    /// distinct from the annotation *values* later recorded with that
    /// attribute, which go through the resolving scope's own pool instead
    /// (see `DESIGN.md`).
    pub fn create_attribute(
        &self,
        tree: &MetadataTree,
        process_pool: &MemoryPool,
        meta: &MetaIds,
        name: &str,
        type_tag: TypeTag,
        properties: Properties,
    ) -> Attribute {
        if let Some(found) = self.get_attribute(name) {
            return found;
        }

        let mut inner = self.inner.write();
        if let Some(found) = inner.by_name.get(name) {
            return found.clone();
        }

        let mut pairs = Vec::with_capacity(2);
        if !properties.is_empty() {
            pairs.push((meta.properties.raw(), Variant::Uint(properties.bits() as u64)));
        }
        pairs.push((meta.name.raw(), Variant::from_str(name)));
        let base = tree.type_node(type_tag);
        let id = tree.get_path(&pairs, Some(base), process_pool, true);

        let attr = Attribute::new(id, Arc::from(name), type_tag, properties);
        inner.by_name.insert(Box::from(name), attr.clone());
        inner.by_id.insert(id.raw(), attr.clone());
        attr
    }

    pub fn get_attribute(&self, name: &str) -> Option<Attribute> {
        self.inner.read().by_name.get(name).cloned()
    }

    pub fn get_attribute_by_id(&self, id: u64) -> Option<Attribute> {
        self.inner.read().by_id.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_attributes_are_immediately_resolvable() {
        let (tree, meta) = MetadataTree::bootstrap();
        let registry = AttributeRegistry::bootstrap(&meta);
        let name_attr = registry.get_attribute("name").unwrap();
        assert_eq!(name_attr.id(), meta.name);
        assert_eq!(name_attr.type_tag(), TypeTag::String);
        let _ = tree; // bootstrap tree retained only to keep ids comparable above
    }

    #[test]
    fn create_attribute_is_idempotent_by_name() {
        let (tree, meta) = MetadataTree::bootstrap();
        let registry = AttributeRegistry::bootstrap(&meta);
        let pool = MemoryPool::new();
        let a = registry.create_attribute(&tree, &pool, &meta, "region", TypeTag::String, Properties::empty());
        let b = registry.create_attribute(&tree, &pool, &meta, "region", TypeTag::String, Properties::empty());
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let (tree, meta) = MetadataTree::bootstrap();
        let registry = AttributeRegistry::bootstrap(&meta);
        let pool = MemoryPool::new();
        let a = registry.create_attribute(&tree, &pool, &meta, "region", TypeTag::String, Properties::empty());
        let b = registry.create_attribute(&tree, &pool, &meta, "iteration", TypeTag::Int, Properties::ASVALUE);
        assert_ne!(a.id(), b.id());
        assert!(b.properties().is_asvalue());
    }
}
