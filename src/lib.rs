//! A context-annotation runtime for performance measurement tools.
//!
//! Applications and libraries annotate the call paths they care about with
//! named attributes — `region`, `loop.id`, `function`, a counter — and a
//! profiler or tracer reads those annotations back as a [`Snapshot`] at
//! whatever moments it cares about (a sample tick, a communication event, an
//! exit from a region). The crate's job is everything in between: storing
//! every distinct annotation path exactly once in a shared
//! [`MetadataTree`](tree::MetadataTree), keeping each thread's/task's/the
//! process's own active annotations in an independent
//! [`ContextBuffer`](buffer::ContextBuffer), and giving services a
//! synchronous hook into every state change through an
//! [`EventBus`](event::EventBus).
//!
//! ```
//! use contextrt::{Runtime, Properties, TypeTag, Variant, ScopeMask};
//!
//! let rt = Runtime::instance();
//! let region = rt.create_attribute("region", TypeTag::String, Properties::empty()).unwrap();
//!
//! rt.begin(&region, Variant::from_str("startup")).unwrap();
//! // ... application code runs annotated with region=startup ...
//! rt.end(&region).unwrap();
//!
//! let mut snapshot = contextrt::Snapshot::new();
//! rt.pull_snapshot(ScopeMask::ALL, None, &mut snapshot).unwrap();
//! # Runtime::release();
//! ```
//!
//! # Layout
//!
//! - [`variant`] — the tagged value type every annotation payload is stored
//!   and compared as.
//! - [`tree`] — the process-wide, append-only tree of interned annotation
//!   paths.
//! - [`pool`] — per-scope ownership of string/blob payload bytes.
//! - [`attribute`] — attribute handles and the [`Properties`] bitset.
//! - [`buffer`] — per-scope live annotation state.
//! - [`scope`] — the process/thread/task scope distinction.
//! - [`resolver`] — resolves which [`scope::Scope`] an attribute's value
//!   belongs in.
//! - [`registry`] — the process-wide name → attribute table.
//! - [`sync`] — the signal-safe lock the registry's reads go through.
//! - [`snapshot`] — captured point-in-time annotation state.
//! - [`event`] — the service trait and the bus that dispatches to it.
//! - [`service`] — bootstrap-time service registration.
//! - [`config`] — environment-driven runtime configuration.
//! - [`error`] — the crate's error type.
//! - [`runtime`] — [`Runtime`], wiring every other component together.

pub mod attribute;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod scope;
pub mod service;
pub mod snapshot;
pub mod sync;
pub mod tree;
pub mod variant;

pub use attribute::{Attribute, Properties};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventBus, EventBusBuilder, Service};
pub use runtime::{Runtime, RuntimeHandle};
pub use scope::{Scope, ScopeKind, ScopeMask};
pub use service::{register_service, ServiceRegistration};
pub use snapshot::{Entry, Snapshot, ValueEntry};
pub use tree::NodeId;
pub use variant::{TypeTag, Variant};
