//! [`Scope`]: the unit of context isolation, and [`ScopeKind`], which of the
//! three fixed scopes a given [`Scope`] is.
//!
//! A process has exactly one process scope for its whole lifetime. Each
//! thread that ever annotates gets its own thread scope, created lazily on
//! first use by the host's registered scope callback (see
//! [`crate::resolver::ScopeResolver`]). Task scopes exist for the same
//! reason on top of cooperative (e.g. fiber/coroutine) schedulers that the
//! host application, not this crate, knows how to identify; this crate never
//! creates one on its own.

use crate::buffer::ContextBuffer;
use crate::pool::MemoryPool;
use parking_lot::Mutex;

/// Which of the three fixed scope kinds a [`Scope`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Process,
    Thread,
    Task,
}

impl ScopeKind {
    /// All scope kinds, widest to narrowest.
    pub const ALL: [ScopeKind; 3] = [ScopeKind::Process, ScopeKind::Thread, ScopeKind::Task];

    /// The single-bit [`ScopeMask`] selecting just this kind.
    pub fn mask(self) -> ScopeMask {
        match self {
            ScopeKind::Process => ScopeMask::PROCESS,
            ScopeKind::Thread => ScopeMask::THREAD,
            ScopeKind::Task => ScopeMask::TASK,
        }
    }
}

bitflags::bitflags! {
    /// Which scopes a [`crate::runtime::Runtime::pull_snapshot`] /
    /// [`crate::runtime::Runtime::push_snapshot`] call should collect from.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ScopeMask: u8 {
        const PROCESS = 1 << 0;
        const THREAD  = 1 << 1;
        const TASK    = 1 << 2;
    }
}

impl ScopeMask {
    /// All three scopes.
    pub const ALL: ScopeMask = ScopeMask::PROCESS.union(ScopeMask::THREAD).union(ScopeMask::TASK);
}

/// One isolated annotation context: a buffer of active attribute values and
/// the memory pool that backs them.
///
/// The reference runtime gives thread/task scopes lock-free single-owner
/// access, relying on the invariant that only the owning thread ever touches
/// them outside of a snapshot pull. This crate instead guards every scope's
/// buffer with an ordinary mutex uniformly across all three kinds: the
/// uncontended-lock cost is negligible next to the gain of not having to
/// prove, crate-wide, that a `Scope` handed out by [`crate::resolver::ScopeResolver`]
/// is never reachable from a second thread. See `DESIGN.md` for the
/// reasoning behind this deviation.
pub struct Scope {
    kind: ScopeKind,
    buffer: Mutex<ContextBuffer>,
    pool: MemoryPool,
}

impl Scope {
    pub fn new(kind: ScopeKind) -> Self {
        Scope { kind, buffer: Mutex::new(ContextBuffer::new()), pool: MemoryPool::new() }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Run `f` with exclusive access to this scope's context buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut ContextBuffer) -> R) -> R {
        f(&mut self.buffer.lock())
    }
}
