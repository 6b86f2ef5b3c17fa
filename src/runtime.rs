//! [`Runtime`]: the process-wide singleton that wires every other
//! component together, and [`RuntimeHandle`], the fallible reference to it
//! every public annotation call goes through.
//!
//! Ownership follows the cyclic graph the spec describes (runtime → scopes
//! → tree → registry → back to the runtime) by making [`Runtime`] the sole
//! owner of the tree, the registry, the process scope, and the event bus;
//! every other component holds only non-owning references (an `Arc` clone
//! of the process scope, or a `&Runtime` passed into a callback) rather
//! than owning a cycle back.
//!
//! Lifecycle is the three-state sentinel from the spec: uninitialized → live
//! → torn down, one-way. [`SIGLOCK`] is the sentinel; [`Runtime::instance`]
//! bootstraps on first call and every call thereafter until [`Runtime::release`]
//! moves it to torn-down, after which `instance()` hands back an empty
//! [`RuntimeHandle`] forever. There is no `std` equivalent of the source
//! runtime's `atexit` hook (Rust does not run destructors on process-duration
//! statics), so — unlike the source, which wires its own exit handler —
//! this crate expects the host application to call [`Runtime::release`]
//! explicitly during shutdown, the same way it would flush a tracing
//! subscriber or a metrics exporter.

use crate::attribute::{Attribute, Properties};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::registry::AttributeRegistry;
use crate::resolver::{ScopeCallback, ScopeResolver};
use crate::scope::{Scope, ScopeKind, ScopeMask};
use crate::service;
use crate::snapshot::{Entry, Snapshot};
use crate::tree::{MetaIds, MetadataTree, NodeId};
use crate::variant::{TypeTag, Variant};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Sentinel values for [`SIGLOCK`], named after the source runtime's
/// `s_siglock`. A signal handler reads this with a single atomic load and
/// never blocks, regardless of what the interrupted thread was doing.
const UNINIT: i32 = 1;
const LIVE: i32 = 0;
const TORN_DOWN: i32 = 2;

static SIGLOCK: AtomicI32 = AtomicI32::new(UNINIT);
static GLOBAL: OnceCell<Mutex<Option<Arc<Runtime>>>> = OnceCell::new();

fn global() -> &'static Mutex<Option<Arc<Runtime>>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// The process-wide runtime: the tree, the attribute registry, the process
/// scope, the scope resolver, and the event bus, plus the bootstrap
/// meta-attribute ids and the hidden `key.attribute` used to fold
/// auto-combineable attributes onto a shared context-tree key.
pub struct Runtime {
    tree: MetadataTree,
    meta: MetaIds,
    registry: AttributeRegistry,
    resolver: ScopeResolver,
    process_scope: Arc<Scope>,
    events: EventBus,
    key_attr: Attribute,
    config: Config,
}

impl Runtime {
    fn bootstrap_with_config(config: Config) -> Self {
        let (tree, meta) = MetadataTree::bootstrap();
        let registry = AttributeRegistry::bootstrap(&meta);
        let process_scope = Arc::new(Scope::new(ScopeKind::Process));
        let resolver = ScopeResolver::new(Arc::clone(&process_scope));
        let key_attr = registry.get_attribute("key.attribute").expect("bootstrap registers key.attribute");

        Runtime { tree, meta, registry, resolver, process_scope, events: EventBus::new(), key_attr, config }
    }

    /// Construct a standalone runtime that never touches the process-wide
    /// singleton. For tests that need a working [`Runtime`] to pass to a
    /// [`crate::event::Service`] hook or a [`service::ServiceRegistration`]
    /// without going through [`Runtime::instance`]'s bootstrap gate.
    #[doc(hidden)]
    pub fn for_test(config: Config) -> Self {
        Self::bootstrap_with_config(config)
    }

    /// Like [`Runtime::for_test`], but pre-populates the event bus with
    /// `services` before any `post_init` hook can fire — the same ordering
    /// a real bootstrap gives a [`service::ServiceRegistration`]'s
    /// `register` function, which always runs before `post_init` is fired
    /// (see [`Runtime::instance`]). Exists so tests can exercise a fake
    /// [`crate::event::Service`] end-to-end without going through the
    /// process-wide singleton or the pending-registration queue.
    #[doc(hidden)]
    pub fn with_services(config: Config, services: Vec<Arc<dyn crate::event::Service>>) -> Self {
        let mut rt = Self::bootstrap_with_config(config);
        let mut builder = EventBus::builder();
        for svc in services {
            builder = builder.with_service(svc);
        }
        rt.events = builder.build();
        rt
    }

    /// The process-wide runtime handle. Bootstraps on the first call in the
    /// process; every call after a [`Runtime::release`] returns an invalid
    /// handle instead of bootstrapping again.
    pub fn instance() -> RuntimeHandle {
        if SIGLOCK.load(Ordering::Acquire) == TORN_DOWN {
            return RuntimeHandle(None);
        }

        let mut slot = global().lock();
        if slot.is_none() {
            let rt = Arc::new(Self::bootstrap_with_config(crate::config::current()));
            service::run_pending(&rt);
            rt.events.fire_post_init(&rt);
            *slot = Some(rt);
            SIGLOCK.store(LIVE, Ordering::Release);
        }
        RuntimeHandle(slot.clone())
    }

    /// Fire `finish`, then tear the singleton down. Every subsequent
    /// [`Runtime::instance`] call in this process returns an invalid
    /// handle. Idempotent: releasing an already-released runtime is a
    /// no-op.
    ///
    /// A service's `finish` hook runs arbitrary third-party code; if it
    /// panics, the sentinel must still end up at [`TORN_DOWN`] rather than
    /// left at `LIVE` with no singleton behind it, or every later
    /// `instance()` call in this process would bootstrap a second runtime
    /// instead of correctly observing teardown. `scopeguard::guard` runs
    /// that store unconditionally, panic or not.
    pub fn release() {
        let mut slot = global().lock();
        let torn_down = scopeguard::guard((), |_| SIGLOCK.store(TORN_DOWN, Ordering::Release));
        if let Some(rt) = slot.take() {
            rt.events.fire_finish(&rt);
        }
        drop(torn_down);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn tree(&self) -> &MetadataTree {
        &self.tree
    }

    // --- Scopes ---------------------------------------------------------

    pub fn set_scope_callback(&self, kind: ScopeKind, cb: ScopeCallback) -> Result<()> {
        self.resolver.set_scope_callback(kind, cb)
    }

    /// Allocate a fresh scope of `kind`, firing `create_scope`. The caller
    /// owns the returned scope's lifetime — this crate never reclaims it.
    pub fn create_scope(&self, kind: ScopeKind) -> Arc<Scope> {
        let scope = Arc::new(Scope::new(kind));
        self.events.fire_create_scope(self, kind);
        scope
    }

    /// Signal that `scope` is no longer in use. Does **not** free the
    /// scope's memory pool: tree nodes allocated from it may still be
    /// referenced by snapshots already handed to services.
    pub fn release_scope(&self, scope: &Scope) {
        self.events.fire_release_scope(self, scope.kind());
    }

    fn scope_for(&self, attr: &Attribute) -> Arc<Scope> {
        match attr.scope() {
            ScopeKind::Process => Arc::clone(&self.process_scope),
            ScopeKind::Thread => self.resolver.thread_scope(),
            ScopeKind::Task => self.resolver.resolve(ScopeKind::Task),
        }
    }

    /// The `node_map` key a node-valued attribute's current position is
    /// filed under: the shared `key.attribute` id when auto-merge applies,
    /// the attribute's own id otherwise.
    fn key_for(&self, attr: &Attribute) -> u64 {
        if self.config.automerge && attr.properties().is_auto_combineable() {
            self.key_attr.id().raw()
        } else {
            attr.id().raw()
        }
    }

    fn merges(&self, attr: &Attribute) -> bool {
        self.config.automerge && attr.properties().is_auto_combineable()
    }

    // --- Attributes -------------------------------------------------------

    pub fn create_attribute(&self, name: &str, type_tag: TypeTag, props: Properties) -> Attribute {
        let scope_bits = Properties::SCOPE_PROCESS | Properties::SCOPE_THREAD | Properties::SCOPE_TASK;
        let props = if props.intersects(scope_bits) { props } else { props | Properties::SCOPE_THREAD };

        let attr = self.registry.create_attribute(&self.tree, self.process_scope.pool(), &self.meta, name, type_tag, props);
        self.events.fire_create_attr(self, &attr);
        attr
    }

    pub fn get_attribute_by_name(&self, name: &str) -> Option<Attribute> {
        self.registry.get_attribute(name)
    }

    pub fn get_attribute_by_id(&self, id: u64) -> Option<Attribute> {
        self.registry.get_attribute_by_id(id)
    }

    /// Like [`Runtime::get_attribute_by_name`] but fails with
    /// [`Error::UnknownAttribute`] instead of returning `None`, for callers
    /// that only ever expect to see already-registered names.
    pub fn require_attribute(&self, name: &str) -> Result<Attribute> {
        self.get_attribute_by_name(name).ok_or_else(|| Error::UnknownAttribute(Some(name.to_string())))
    }

    // --- Annotations --------------------------------------------------------

    pub fn begin(&self, attr: &Attribute, data: Variant) -> Result<()> {
        let skip = attr.properties().skips_events();
        if !skip {
            self.events.fire_pre_begin(self, attr);
        }

        let scope = self.scope_for(attr);
        if attr.properties().is_asvalue() {
            scope.with_buffer(|b| b.begin_value(attr.id().raw(), data));
        } else {
            let key = self.key_for(attr);
            let merge = self.merges(attr);
            let base = scope.with_buffer(|b| b.get_node(key));
            let node = self.tree.get_path(&[(attr.id().raw(), data)], Some(base), scope.pool(), merge);
            scope.with_buffer(|b| b.set_node(key, node));
        }

        if !skip {
            self.events.fire_post_begin(self, attr);
        }
        Ok(())
    }

    pub fn end(&self, attr: &Attribute) -> Result<()> {
        let skip = attr.properties().skips_events();
        if !skip {
            self.events.fire_pre_end(self, attr);
        }

        let scope = self.scope_for(attr);
        let result = if attr.properties().is_asvalue() {
            match scope.with_buffer(|b| b.end_value(attr.id().raw())) {
                Some(_) => Ok(()),
                None => Err(Error::NotActive(attr.name().to_string())),
            }
        } else {
            let key = self.key_for(attr);
            let current = scope.with_buffer(|b| b.get_node(key));
            if current == NodeId::ROOT {
                Err(Error::NotActive(attr.name().to_string()))
            } else {
                let popped = self.tree.remove_first_in_path(current, attr.id().raw(), scope.pool());
                scope.with_buffer(|b| b.set_node(key, popped));
                Ok(())
            }
        };

        if result.is_err() {
            warn!(attribute = attr.name(), "end() on an attribute with no active entry");
        }
        if !skip {
            self.events.fire_post_end(self, attr);
        }
        result
    }

    pub fn set(&self, attr: &Attribute, data: Variant) -> Result<()> {
        let skip = attr.properties().skips_events();
        if !skip {
            self.events.fire_pre_set(self, attr);
        }

        let scope = self.scope_for(attr);
        if attr.properties().is_asvalue() {
            scope.with_buffer(|b| b.set_value(attr.id().raw(), data));
        } else {
            let key = self.key_for(attr);
            let base = scope.with_buffer(|b| b.get_node(key));
            let node = self.tree.replace_first_in_path(base, attr.id().raw(), data, scope.pool());
            scope.with_buffer(|b| b.set_node(key, node));
        }

        if !skip {
            self.events.fire_post_set(self, attr);
        }
        Ok(())
    }

    pub fn set_path(&self, attr: &Attribute, values: &[Variant]) -> Result<()> {
        if attr.properties().is_asvalue() {
            warn!(attribute = attr.name(), "set_path() invoked on an as-value attribute");
            return Err(Error::WrongKind(attr.name().to_string()));
        }

        let skip = attr.properties().skips_events();
        if !skip {
            self.events.fire_pre_set(self, attr);
        }

        let scope = self.scope_for(attr);
        let key = self.key_for(attr);
        let base = scope.with_buffer(|b| b.get_node(key));
        let node = self.tree.replace_all_in_path(base, attr.id().raw(), values, scope.pool());
        scope.with_buffer(|b| b.set_node(key, node));

        if !skip {
            self.events.fire_post_set(self, attr);
        }
        Ok(())
    }

    pub fn get(&self, attr: &Attribute) -> Option<Entry> {
        let scope = self.scope_for(attr);
        if attr.properties().is_asvalue() {
            scope.with_buffer(|b| b.get_value(attr.id().raw()).cloned()).map(|v| Entry::value(attr.id().raw(), v))
        } else {
            let key = self.key_for(attr);
            let current = scope.with_buffer(|b| b.get_node(key));
            self.tree.find_node_with_attribute(current, attr.id().raw()).map(Entry::Node)
        }
    }

    pub fn exchange(&self, attr: &Attribute, data: Variant) -> Result<Variant> {
        if !attr.properties().is_asvalue() {
            return Err(Error::WrongKind(attr.name().to_string()));
        }
        let scope = self.scope_for(attr);
        let old = scope.with_buffer(|b| b.exchange_value(attr.id().raw(), data));
        Ok(old.unwrap_or(Variant::Type(TypeTag::Inv)))
    }

    // --- Snapshots ----------------------------------------------------------

    pub fn make_entry(&self, attr: &Attribute, value: Variant) -> Entry {
        if attr.properties().is_asvalue() {
            Entry::value(attr.id().raw(), value)
        } else {
            let scope = self.scope_for(attr);
            let merge = self.merges(attr);
            let node = self.tree.get_path(&[(attr.id().raw(), value)], None, scope.pool(), merge);
            Entry::Node(node)
        }
    }

    /// Build an `Entry` for a whole sequence of (attribute, value) pairs at
    /// once, the way a service assembling a synthetic record (e.g. a call
    /// path captured outside the normal begin/end flow) would. As-value
    /// attributes are accepted but always intern as nodes here: the result
    /// is a single combined `Entry`, and only a tree node can represent more
    /// than one pair.
    pub fn make_entry_path(&self, pairs: &[(Attribute, Variant)]) -> Entry {
        let encoded: Vec<(u64, Variant)> = pairs.iter().map(|(a, v)| (a.id().raw(), v.clone())).collect();
        let node = self.tree.get_path(&encoded, None, self.process_scope.pool(), true);
        Entry::Node(node)
    }

    pub fn pull_snapshot(&self, scope_mask: ScopeMask, trigger: Option<&Entry>, dest: &mut Snapshot) {
        if let Some(entry) = trigger {
            dest.push_entry(entry.clone());
        }

        self.events.fire_snapshot(self, scope_mask, trigger, dest);

        if scope_mask.contains(ScopeMask::TASK) {
            if let Some(task) = self.resolver.task_scope() {
                task.with_buffer(|b| b.snapshot(dest));
            }
        }
        if scope_mask.contains(ScopeMask::THREAD) {
            self.resolver.thread_scope().with_buffer(|b| b.snapshot(dest));
        }
        if scope_mask.contains(ScopeMask::PROCESS) {
            self.process_scope.with_buffer(|b| b.snapshot(dest));
        }
    }

    pub fn push_snapshot(&self, scope_mask: ScopeMask, trigger: Option<&Entry>) {
        let mut dest = Snapshot::new();
        self.pull_snapshot(scope_mask, trigger, &mut dest);

        self.tree.write_new_nodes(|node| self.events.fire_write_record(node));
        self.events.fire_process_snapshot(self, trigger, &dest);
    }
}

/// A reference to the process-wide [`Runtime`], possibly invalid (before
/// bootstrap, or after [`Runtime::release`]). Every method short-circuits
/// to [`Error::RuntimeUnavailable`] when invalid, without logging — logging
/// here risks reentering a process that is already tearing down.
#[derive(Clone)]
pub struct RuntimeHandle(Option<Arc<Runtime>>);

impl RuntimeHandle {
    fn rt(&self) -> Result<&Runtime> {
        self.0.as_deref().ok_or(Error::RuntimeUnavailable)
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn config(&self) -> Result<Config> {
        Ok(self.rt()?.config())
    }

    /// Borrow the event bus. Returns an error instead of a reference when
    /// the handle is invalid, since there is no bus to borrow from.
    pub fn events(&self) -> Result<&EventBus> {
        self.rt().map(Runtime::events)
    }

    pub fn set_scope_callback(&self, kind: ScopeKind, cb: ScopeCallback) -> Result<()> {
        self.rt()?.set_scope_callback(kind, cb)
    }

    pub fn create_scope(&self, kind: ScopeKind) -> Result<Arc<Scope>> {
        Ok(self.rt()?.create_scope(kind))
    }

    pub fn release_scope(&self, scope: &Scope) -> Result<()> {
        self.rt()?.release_scope(scope);
        Ok(())
    }

    pub fn create_attribute(&self, name: &str, type_tag: TypeTag, props: Properties) -> Result<Attribute> {
        Ok(self.rt()?.create_attribute(name, type_tag, props))
    }

    pub fn get_attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.rt()?.get_attribute_by_name(name))
    }

    pub fn get_attribute_by_id(&self, id: u64) -> Result<Option<Attribute>> {
        Ok(self.rt()?.get_attribute_by_id(id))
    }

    pub fn begin(&self, attr: &Attribute, data: Variant) -> Result<()> {
        self.rt()?.begin(attr, data)
    }

    pub fn end(&self, attr: &Attribute) -> Result<()> {
        self.rt()?.end(attr)
    }

    pub fn set(&self, attr: &Attribute, data: Variant) -> Result<()> {
        self.rt()?.set(attr, data)
    }

    pub fn set_path(&self, attr: &Attribute, values: &[Variant]) -> Result<()> {
        self.rt()?.set_path(attr, values)
    }

    pub fn get(&self, attr: &Attribute) -> Result<Option<Entry>> {
        Ok(self.rt()?.get(attr))
    }

    pub fn exchange(&self, attr: &Attribute, data: Variant) -> Result<Variant> {
        self.rt()?.exchange(attr, data)
    }

    pub fn make_entry(&self, attr: &Attribute, value: Variant) -> Result<Entry> {
        Ok(self.rt()?.make_entry(attr, value))
    }

    pub fn make_entry_path(&self, pairs: &[(Attribute, Variant)]) -> Result<Entry> {
        Ok(self.rt()?.make_entry_path(pairs))
    }

    pub fn pull_snapshot(&self, scope_mask: ScopeMask, trigger: Option<&Entry>, dest: &mut Snapshot) -> Result<()> {
        self.rt()?.pull_snapshot(scope_mask, trigger, dest);
        Ok(())
    }

    pub fn push_snapshot(&self, scope_mask: ScopeMask, trigger: Option<&Entry>) -> Result<()> {
        self.rt()?.push_snapshot(scope_mask, trigger);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Properties;

    fn rt() -> Runtime {
        Runtime::for_test(Config { automerge: true })
    }

    #[test]
    fn nested_begin_end_forms_a_single_chain_and_unwinds() {
        let rt = rt();
        let region = rt.create_attribute("region", TypeTag::String, Properties::empty());

        rt.begin(&region, Variant::from_str("A")).unwrap();
        rt.begin(&region, Variant::from_str("B")).unwrap();

        let mut snap = Snapshot::new();
        rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
        assert_eq!(snap.nodes.len(), 1);
        let top = rt.tree.node(snap.nodes[0]);
        assert_eq!(top.value, Variant::from_str("B"));

        rt.end(&region).unwrap();
        let entry = rt.get(&region).unwrap();
        match entry {
            Entry::Node(n) => assert_eq!(rt.tree.node(n).value, Variant::from_str("A")),
            _ => panic!("expected a node entry"),
        }

        rt.end(&region).unwrap();
        assert!(rt.get(&region).is_none());
    }

    #[test]
    fn end_on_inactive_attribute_is_a_harmless_error() {
        let rt = rt();
        let region = rt.create_attribute("region", TypeTag::String, Properties::empty());
        assert_eq!(rt.end(&region), Err(Error::NotActive("region".into())));
    }

    #[test]
    fn asvalue_set_and_exchange_round_trip() {
        let rt = rt();
        let iter = rt.create_attribute("iter", TypeTag::Int, Properties::ASVALUE | Properties::SCOPE_PROCESS);
        rt.set(&iter, Variant::Int(7)).unwrap();

        let mut snap = Snapshot::new();
        rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
        assert_eq!(snap.values[0].value, Variant::Int(7));

        let old = rt.exchange(&iter, Variant::Int(8)).unwrap();
        assert_eq!(old, Variant::Int(7));

        let mut snap2 = Snapshot::new();
        rt.pull_snapshot(ScopeMask::ALL, None, &mut snap2);
        assert_eq!(snap2.values[0].value, Variant::Int(8));
    }

    #[test]
    fn automerge_folds_distinct_attributes_onto_one_node() {
        let rt = rt();
        let phase = rt.create_attribute("phase", TypeTag::String, Properties::empty());
        let func = rt.create_attribute("func", TypeTag::String, Properties::empty());

        rt.begin(&phase, Variant::from_str("init")).unwrap();
        rt.begin(&func, Variant::from_str("f")).unwrap();

        let mut snap = Snapshot::new();
        rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
        assert_eq!(snap.nodes.len(), 1, "auto-combineable attributes share one node_map key");

        let leaf = rt.tree.node(snap.nodes[0]);
        assert_eq!(leaf.attribute_id, func.id().raw());
        let parent = rt.tree.node(leaf.parent.unwrap());
        assert_eq!(parent.attribute_id, phase.id().raw());
    }

    #[test]
    fn set_path_on_asvalue_attribute_is_rejected() {
        let rt = rt();
        let counter = rt.create_attribute("counter", TypeTag::Int, Properties::ASVALUE);
        let err = rt.set_path(&counter, &[Variant::Int(1)]).unwrap_err();
        assert_eq!(err, Error::WrongKind("counter".into()));
    }

    #[test]
    fn create_attribute_is_idempotent_across_threads() {
        let rt = Arc::new(rt());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let rt = Arc::clone(&rt);
                std::thread::spawn(move || rt.create_attribute("x", TypeTag::Int, Properties::empty()).id())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[test]
    fn process_scope_is_visible_from_every_thread() {
        let rt = Arc::new(rt());
        let cfg = rt.create_attribute("cfg", TypeTag::String, Properties::SCOPE_PROCESS);
        rt.set(&cfg, Variant::from_str("v")).unwrap();

        let rt2 = Arc::clone(&rt);
        let seen = std::thread::spawn(move || {
            let mut snap = Snapshot::new();
            rt2.pull_snapshot(ScopeMask::PROCESS, None, &mut snap);
            snap.nodes.len()
        })
        .join()
        .unwrap();
        assert_eq!(seen, 1);
    }
}
