//! [`ScopeResolver`]: lazily acquires the right [`Scope`] for an attribute
//! being annotated with, caching a thread's own scope in a thread-local the
//! way [`illicit`]'s `CURRENT_SCOPE` caches its dynamic-scope layer.
//!
//! The process scope is fixed for the runtime's whole lifetime. The thread
//! scope is created automatically, on first use, via a native
//! [`std::thread_local`] — there is no host callback involved, because Rust
//! already gives every thread first-class, lazily-initializable storage.
//! Task scope has no such built-in concept (a "task" is whatever the host's
//! cooperative scheduler says it is), so acquiring one goes through a host
//! callback registered with [`ScopeResolver::set_scope_callback`]; if none
//! is registered, annotations requesting task scope fall back to the
//! calling thread's scope, matching the source runtime's documented
//! behavior for embeddings that never call into a task scheduler at all.
//!
//! [`illicit`]: https://docs.rs/illicit

use crate::scope::{Scope, ScopeKind};
use crate::Error;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;

/// A host-supplied function returning the scope for "whatever task is
/// running right now", or `None` if the calling thread isn't inside one.
pub type ScopeCallback = Box<dyn Fn() -> Option<Arc<Scope>> + Send + Sync>;

thread_local! {
    static THREAD_SCOPE: RefCell<Option<Arc<Scope>>> = const { RefCell::new(None) };
}

pub struct ScopeResolver {
    process: Arc<Scope>,
    thread_callback: RwLock<Option<ScopeCallback>>,
    task_callback: RwLock<Option<ScopeCallback>>,
}

impl ScopeResolver {
    pub fn new(process: Arc<Scope>) -> Self {
        ScopeResolver { process, thread_callback: RwLock::new(None), task_callback: RwLock::new(None) }
    }

    /// Register the host's scope-acquisition callback for `kind`. Only
    /// `Thread` and `Task` may be registered (the process scope is fixed at
    /// bootstrap); registering a second callback for the same kind is
    /// rejected rather than silently replacing the first.
    pub fn set_scope_callback(&self, kind: ScopeKind, callback: ScopeCallback) -> Result<(), Error> {
        let slot = match kind {
            ScopeKind::Process => return Err(Error::CallbackAlreadySet(kind)),
            ScopeKind::Thread => &self.thread_callback,
            ScopeKind::Task => &self.task_callback,
        };
        let mut guard = slot.write();
        if guard.is_some() {
            return Err(Error::CallbackAlreadySet(kind));
        }
        *guard = Some(callback);
        Ok(())
    }

    pub fn process_scope(&self) -> Arc<Scope> {
        Arc::clone(&self.process)
    }

    /// This thread's scope, creating it on first call. Uses the registered
    /// thread callback if the host installed one, otherwise falls back to a
    /// plain thread-local.
    pub fn thread_scope(&self) -> Arc<Scope> {
        if let Some(cb) = self.thread_callback.read().as_ref() {
            if let Some(scope) = cb() {
                return scope;
            }
        }
        THREAD_SCOPE.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                *slot = Some(Arc::new(Scope::new(ScopeKind::Thread)));
            }
            Arc::clone(slot.as_ref().unwrap())
        })
    }

    /// The current task's scope, if the host registered a callback and that
    /// callback reports one active right now.
    pub fn task_scope(&self) -> Option<Arc<Scope>> {
        self.task_callback.read().as_ref().and_then(|cb| cb())
    }

    /// Resolve the scope an attribute with the given scope kind should be
    /// recorded against.
    pub fn resolve(&self, kind: ScopeKind) -> Arc<Scope> {
        match kind {
            ScopeKind::Process => self.process_scope(),
            ScopeKind::Thread => self.thread_scope(),
            ScopeKind::Task => self.task_scope().unwrap_or_else(|| self.thread_scope()),
        }
    }

    /// Drop this thread's cached scope. Called when a thread is known to be
    /// exiting, so its `ContextBuffer`/`MemoryPool` can be reclaimed instead
    /// of waiting for process teardown.
    pub fn release_thread_scope(&self) {
        THREAD_SCOPE.with(|cell| {
            *cell.borrow_mut() = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_scope_is_lazily_created_and_cached() {
        let resolver = ScopeResolver::new(Arc::new(Scope::new(ScopeKind::Process)));
        let a = resolver.thread_scope();
        let b = resolver.thread_scope();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn task_scope_falls_back_to_thread_scope_without_a_callback() {
        let resolver = ScopeResolver::new(Arc::new(Scope::new(ScopeKind::Process)));
        let thread = resolver.thread_scope();
        let resolved = resolver.resolve(ScopeKind::Task);
        assert!(Arc::ptr_eq(&thread, &resolved));
    }

    #[test]
    fn registering_a_second_callback_for_the_same_kind_is_rejected() {
        let resolver = ScopeResolver::new(Arc::new(Scope::new(ScopeKind::Process)));
        assert!(resolver.set_scope_callback(ScopeKind::Task, Box::new(|| None)).is_ok());
        assert!(resolver.set_scope_callback(ScopeKind::Task, Box::new(|| None)).is_err());
    }

    #[test]
    fn different_threads_get_different_scopes() {
        let resolver = Arc::new(ScopeResolver::new(Arc::new(Scope::new(ScopeKind::Process))));
        let main_scope = resolver.thread_scope();
        let other = {
            let resolver = Arc::clone(&resolver);
            std::thread::spawn(move || resolver.thread_scope()).join().unwrap()
        };
        assert!(!Arc::ptr_eq(&main_scope, &other));
    }
}
