//! Service registration: the bootstrap-time wiring between a compiled-in
//! service and the runtime's event bus.
//!
//! Concrete services (trace writers, profiler adapters, MPI wrappers) are
//! out of scope for this crate — see the crate-level docs — but a service
//! crate built on top of this one needs a way to hook itself into every
//! runtime this process ever bootstraps, without the application having to
//! remember to call some `my_service::attach(&runtime)` after every
//! `Runtime::instance()`. This module is that hook, mirroring the source
//! runtime's compiled-in `Services::register_services` table.

use crate::runtime::Runtime;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

/// A service's registration: a name (used only for diagnostics) and a
/// function invoked once, during bootstrap, with a handle to the runtime.
/// `register` typically calls [`Runtime::create_attribute`] for the
/// service's own attributes and [`Runtime::events`]`().`[`add_service`]
/// to attach its callbacks.
///
/// [`add_service`]: crate::event::EventBus::add_service
#[derive(Clone, Copy)]
pub struct ServiceRegistration {
    pub name: &'static str,
    pub register: fn(&Runtime),
}

static PENDING: OnceCell<Mutex<Vec<ServiceRegistration>>> = OnceCell::new();

fn pending() -> &'static Mutex<Vec<ServiceRegistration>> {
    PENDING.get_or_init(|| Mutex::new(Vec::new()))
}

/// Queue a service for registration at the next bootstrap. Has no effect on
/// a runtime that has already bootstrapped in this process — call this
/// before the first [`Runtime::instance`] call (e.g. from a library's own
/// static setup, before the application starts annotating).
pub fn register_service(registration: ServiceRegistration) {
    pending().lock().push(registration);
}

/// Run every pending registration against `rt`, then drain the queue so a
/// later bootstrap in the same process (after a `release()`/re-`instance()`
/// cycle) doesn't register everything a second time on top of a fresh
/// runtime that never asked for it again.
pub(crate) fn run_pending(rt: &Runtime) {
    let mut guard = pending().lock();
    for reg in guard.drain(..) {
        tracing::debug!(service = reg.name, "registering service");
        (reg.register)(rt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump(_rt: &Runtime) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn pending_registrations_run_once_and_drain() {
        let before = CALLS.load(Ordering::SeqCst);
        register_service(ServiceRegistration { name: "test-service", register: bump });

        let rt = Runtime::for_test(Config { automerge: true });
        run_pending(&rt);
        assert_eq!(CALLS.load(Ordering::SeqCst), before + 1);

        let rt2 = Runtime::for_test(Config { automerge: true });
        run_pending(&rt2);
        assert_eq!(CALLS.load(Ordering::SeqCst), before + 1, "registrations drain after running once");
    }
}
