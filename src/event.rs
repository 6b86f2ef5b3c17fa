//! [`EventBus`]: the registration-ordered callback dispatcher services hook
//! into, and the [`Service`] trait they implement to do so.
//!
//! Every annotation operation fires a pre- and a post-hook around the state
//! change it makes (e.g. `pre_begin`/`post_begin`), and the snapshot pipeline
//! fires `snapshot`/`process_snapshot` around the pull and the push. Services
//! run in the order they were registered in, synchronously, on the calling
//! thread — there is no queue or async dispatch here, since a profiling
//! service's entire purpose is usually to observe exactly the call stack
//! frame the event fired from.
//!
//! Services are registered once, at bootstrap (see
//! [`crate::runtime::register_service`]), through [`EventBus::add_service`];
//! nothing in this crate removes a service afterwards, so the list itself is
//! guarded by an ordinary [`parking_lot::RwLock`] rather than anything
//! signal-safe — unlike [`crate::registry::AttributeRegistry`], no signal
//! handler is expected to reach into the event bus.

use crate::attribute::Attribute;
use crate::runtime::Runtime;
use crate::scope::{ScopeKind, ScopeMask};
use crate::snapshot::{Entry, Snapshot};
use crate::tree::Node;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// A service plugged into the runtime's [`EventBus`]. All methods default
/// to a no-op; implement only the hooks a given service actually cares
/// about. Hooks never return a value: a misbehaving service must not be
/// able to short-circuit or corrupt the core's own state, only observe it
/// (and, for `snapshot`, contribute additional entries).
pub trait Service: Send + Sync {
    /// Fired once, after bootstrap (meta-attributes, `key.attribute`, and
    /// every other registered service's own `register_fn`) has completed.
    fn post_init(&self, _rt: &Runtime) {}
    /// Fired just before teardown, while the runtime is still fully live.
    fn finish(&self, _rt: &Runtime) {}

    fn create_attr(&self, _rt: &Runtime, _attr: &Attribute) {}

    fn pre_begin(&self, _rt: &Runtime, _attr: &Attribute) {}
    fn post_begin(&self, _rt: &Runtime, _attr: &Attribute) {}

    fn pre_set(&self, _rt: &Runtime, _attr: &Attribute) {}
    fn post_set(&self, _rt: &Runtime, _attr: &Attribute) {}

    fn pre_end(&self, _rt: &Runtime, _attr: &Attribute) {}
    fn post_end(&self, _rt: &Runtime, _attr: &Attribute) {}

    fn create_scope(&self, _rt: &Runtime, _kind: ScopeKind) {}
    fn release_scope(&self, _rt: &Runtime, _kind: ScopeKind) {}

    /// Fired during [`crate::runtime::Runtime::pull_snapshot`], before any
    /// scope buffer has contributed to `dest`. Services may append their
    /// own entries (timestamps, counters) here; reentering the public
    /// annotation API from this hook is allowed, but a service must not
    /// mutate the buffers of the scopes `scope_mask` is about to read.
    fn snapshot(&self, _rt: &Runtime, _scope_mask: ScopeMask, _trigger: Option<&Entry>, _dest: &mut Snapshot) {}
    /// Fired during [`crate::runtime::Runtime::push_snapshot`], once the
    /// record is complete and every node it references has already been
    /// handed to [`Service::write_record`].
    fn process_snapshot(&self, _rt: &Runtime, _trigger: Option<&Entry>, _snapshot: &Snapshot) {}

    /// Sink for tree nodes created since the last call, in id order. A
    /// writer that wants to resolve a snapshot's node ids into full paths
    /// must have seen every ancestor node through this hook first.
    fn write_record(&self, _node: &Node) {}
}

/// Builds an [`EventBus`] by registering services in the order they should
/// fire in. Used by tests and by callers assembling a bus outside of the
/// runtime's own bootstrap sequence.
#[derive(Default)]
pub struct EventBusBuilder {
    services: Vec<Arc<dyn Service>>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus { services: RwLock::new(self.services) }
    }
}

/// The runtime's registered services, fired in registration order.
#[derive(Default)]
pub struct EventBus {
    services: RwLock<Vec<Arc<dyn Service>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Register a service to fire after every service already registered.
    /// Called during bootstrap only, by each service's own `register_fn`.
    pub fn add_service(&self, service: Arc<dyn Service>) {
        self.services.write().push(service);
    }

    pub fn fire_post_init(&self, rt: &Runtime) {
        trace!("post_init");
        for s in self.services.read().iter() {
            s.post_init(rt);
        }
    }

    pub fn fire_finish(&self, rt: &Runtime) {
        trace!("finish");
        for s in self.services.read().iter() {
            s.finish(rt);
        }
    }

    pub fn fire_create_attr(&self, rt: &Runtime, attr: &Attribute) {
        trace!(attribute = attr.name(), "create_attr");
        for s in self.services.read().iter() {
            s.create_attr(rt, attr);
        }
    }

    pub fn fire_pre_begin(&self, rt: &Runtime, attr: &Attribute) {
        for s in self.services.read().iter() {
            s.pre_begin(rt, attr);
        }
    }

    pub fn fire_post_begin(&self, rt: &Runtime, attr: &Attribute) {
        trace!(attribute = attr.name(), "begin");
        for s in self.services.read().iter() {
            s.post_begin(rt, attr);
        }
    }

    pub fn fire_pre_end(&self, rt: &Runtime, attr: &Attribute) {
        for s in self.services.read().iter() {
            s.pre_end(rt, attr);
        }
    }

    pub fn fire_post_end(&self, rt: &Runtime, attr: &Attribute) {
        trace!(attribute = attr.name(), "end");
        for s in self.services.read().iter() {
            s.post_end(rt, attr);
        }
    }

    pub fn fire_pre_set(&self, rt: &Runtime, attr: &Attribute) {
        for s in self.services.read().iter() {
            s.pre_set(rt, attr);
        }
    }

    pub fn fire_post_set(&self, rt: &Runtime, attr: &Attribute) {
        trace!(attribute = attr.name(), "set");
        for s in self.services.read().iter() {
            s.post_set(rt, attr);
        }
    }

    pub fn fire_create_scope(&self, rt: &Runtime, kind: ScopeKind) {
        trace!(?kind, "create_scope");
        for s in self.services.read().iter() {
            s.create_scope(rt, kind);
        }
    }

    pub fn fire_release_scope(&self, rt: &Runtime, kind: ScopeKind) {
        trace!(?kind, "release_scope");
        for s in self.services.read().iter() {
            s.release_scope(rt, kind);
        }
    }

    pub fn fire_snapshot(&self, rt: &Runtime, scope_mask: ScopeMask, trigger: Option<&Entry>, dest: &mut Snapshot) {
        for s in self.services.read().iter() {
            s.snapshot(rt, scope_mask, trigger, dest);
        }
    }

    pub fn fire_process_snapshot(&self, rt: &Runtime, trigger: Option<&Entry>, snapshot: &Snapshot) {
        trace!(nodes = snapshot.nodes.len(), values = snapshot.values.len(), "process_snapshot");
        for s in self.services.read().iter() {
            s.process_snapshot(rt, trigger, snapshot);
        }
    }

    pub fn fire_write_record(&self, node: &Node) {
        for s in self.services.read().iter() {
            s.write_record(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tree::NodeId;
    use crate::variant::TypeTag;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl Service for CountingService {
        fn post_begin(&self, _rt: &Runtime, _attr: &Attribute) {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        fn post_end(&self, _rt: &Runtime, _attr: &Attribute) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn services_fire_in_registration_order_and_see_every_call() {
        let svc = Arc::new(CountingService { begins: AtomicUsize::new(0), ends: AtomicUsize::new(0) });
        let bus = EventBus::builder().with_service(svc.clone()).build();
        let rt = Runtime::for_test(Config { automerge: true });
        let attr = Attribute::new(NodeId::ROOT, Arc::from("x"), TypeTag::Int, crate::attribute::Properties::ASVALUE);
        bus.fire_post_begin(&rt, &attr);
        bus.fire_post_begin(&rt, &attr);
        bus.fire_post_end(&rt, &attr);
        assert_eq!(svc.begins.load(Ordering::SeqCst), 2);
        assert_eq!(svc.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_service_after_construction_still_fires() {
        let bus = EventBus::new();
        let svc = Arc::new(CountingService { begins: AtomicUsize::new(0), ends: AtomicUsize::new(0) });
        bus.add_service(svc.clone());
        let rt = Runtime::for_test(Config { automerge: true });
        let attr = Attribute::new(NodeId::ROOT, Arc::from("x"), TypeTag::Int, crate::attribute::Properties::ASVALUE);
        bus.fire_post_begin(&rt, &attr);
        assert_eq!(svc.begins.load(Ordering::SeqCst), 1);
    }
}
