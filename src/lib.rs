//! replay-shim - Optional record/replay backend indirection
//!
//! Lets a host program call diagnostic, instrumentation and record/replay
//! capabilities without the backend being present at link time or at
//! runtime. Capabilities are looked up by name in the running process the
//! first time any operation is used; when the backend is missing, every
//! operation falls back to a safe default (no-op, fail-open feature gate,
//! identity for recorded values).

pub mod capability;
pub mod cli;
pub mod message;
pub mod record_replay;
pub mod status;
pub mod symbol_binder;

pub use capability::{Capability, ShimError};
pub use record_replay::{global, InitState, PassThroughGuard, RecordReplay, SessionFlags};
pub use status::{BackendStatus, CapabilityStatus};
pub use symbol_binder::{Namespace, ProcessBinder, SymbolBinder, SymbolTable};
