//! Record/replay capability facade
//!
//! [`RecordReplay`] owns the capability table for one symbol namespace. The
//! table is built lazily on the first call to any operation, exactly once
//! even when many threads race on that first call, and is immutable from
//! then on, so the read path takes no locks.
//!
//! Every operation degrades to a safe default when the backend (or the one
//! capability it needs) is missing: instrumentation must never change how the
//! host behaves.
//!
//! # Example
//!
//! ```no_run
//! use replay_shim::{RecordReplay, SymbolTable};
//!
//! let replay = RecordReplay::new(SymbolTable::new());
//! assert!(!replay.is_replaying());
//! assert_eq!(replay.value(c"seed", 7), 7);
//! replay.assert(format_args!("frame {} decoded", 3));
//! ```

use crate::capability::{CapabilityTable, MessageFn, Slot};
use crate::message;
use crate::status::BackendStatus;
use crate::symbol_binder::{ProcessBinder, SymbolBinder};
use std::cell::RefCell;
use std::ffi::{c_char, c_ulong, c_void, CStr};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::thread;

/// Feature queried at startup to decide whether a session is active
pub const RECORD_REPLAY_FEATURE: &CStr = c"record-replay";
/// Feature gating [`RecordReplay::are_events_disallowed`]
pub const DISALLOW_EVENTS_FEATURE: &CStr = c"disallow-events";
/// Feature gating [`RecordReplay::value`]
pub const VALUES_FEATURE: &CStr = c"values";

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;

/// Lifecycle of the lazily built capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    NotStarted,
    InProgress,
    Done,
}

/// Flags derived once from the backend right after resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// A recording or replaying session is in progress
    pub active: bool,
    /// The session disables some features instead of all-or-nothing
    pub has_disabled_features: bool,
}

struct Session {
    table: CapabilityTable,
    flags: SessionFlags,
    /// The assert capability resolved
    usable: bool,
}

impl Session {
    fn resolve(binder: &dyn SymbolBinder) -> Self {
        let table = CapabilityTable::resolve(binder);

        let active = table.feature_enabled.get().is_ok_and(|feature_enabled| {
            // SAFETY: resolved from the backend; NULL subfeature is accepted.
            unsafe { feature_enabled(RECORD_REPLAY_FEATURE.as_ptr(), ptr::null()) != 0 }
        });
        let has_disabled_features = active
            && table.has_disabled_features.get().is_ok_and(|has_disabled| {
                // SAFETY: resolved from the backend; takes no arguments.
                unsafe { has_disabled() != 0 }
            });
        let usable = table.assert.is_resolved();

        tracing::info!(
            "record/replay backend: usable={} active={} has_disabled_features={}",
            usable,
            active,
            has_disabled_features
        );

        Session {
            table,
            flags: SessionFlags {
                active,
                has_disabled_features,
            },
            usable,
        }
    }
}

thread_local! {
    /// Facades this thread is currently initializing
    static INITIALIZING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a facade as initializing on this thread
///
/// Once the thread-local is destroyed (an operation running from another
/// thread-local's destructor) nothing is tracked and nothing is popped.
struct InitializingGuard<'a> {
    id: usize,
    state: &'a AtomicU8,
}

impl<'a> InitializingGuard<'a> {
    fn enter(id: usize, state: &'a AtomicU8) -> Self {
        let _ = INITIALIZING.try_with(|stack| stack.borrow_mut().push(id));
        state.store(IN_PROGRESS, Ordering::Release);
        InitializingGuard { id, state }
    }

    fn is_active(id: usize) -> bool {
        INITIALIZING
            .try_with(|stack| stack.borrow().contains(&id))
            .unwrap_or(false)
    }
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        // A panicking binder leaves the session unset; the next call retries.
        if thread::panicking() {
            self.state.store(NOT_STARTED, Ordering::Release);
        }
        let _ = INITIALIZING.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|&id| id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

fn opt_ptr(value: Option<&CStr>) -> *const c_char {
    value.map_or(ptr::null(), CStr::as_ptr)
}

/// Facade over an optional record/replay backend
pub struct RecordReplay<B: SymbolBinder = ProcessBinder> {
    binder: B,
    state: AtomicU8,
    session: OnceLock<Session>,
}

static GLOBAL: RecordReplay = RecordReplay::new(ProcessBinder::platform_default());

/// Process-wide facade bound to the platform's default namespace
pub fn global() -> &'static RecordReplay {
    &GLOBAL
}

impl<B: SymbolBinder> RecordReplay<B> {
    /// Create a facade; nothing is resolved until the first operation
    pub const fn new(binder: B) -> Self {
        RecordReplay {
            binder,
            state: AtomicU8::new(NOT_STARTED),
            session: OnceLock::new(),
        }
    }

    pub fn binder(&self) -> &B {
        &self.binder
    }

    /// Observe the lifecycle without triggering initialization
    pub fn init_state(&self) -> InitState {
        if self.session.get().is_some() {
            return InitState::Done;
        }
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => InitState::NotStarted,
            _ => InitState::InProgress,
        }
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Initialized session, or `None` when called from inside initialization
    fn session(&self) -> Option<&Session> {
        if let Some(session) = self.session.get() {
            return Some(session);
        }
        if InitializingGuard::is_active(self.id()) {
            tracing::warn!("record/replay operation called during initialization; using default");
            return None;
        }
        Some(self.session.get_or_init(|| {
            let _guard = InitializingGuard::enter(self.id(), &self.state);
            Session::resolve(&self.binder)
        }))
    }

    /// Session whose backend is usable
    fn ready(&self) -> Option<&Session> {
        self.session().filter(|session| session.usable)
    }

    /// Run initialization if needed; true iff the backend is usable
    pub fn ensure_initialized(&self) -> bool {
        self.ready().is_some()
    }

    /// Session flags (all false when the backend is unusable)
    pub fn session_flags(&self) -> SessionFlags {
        self.ready().map(|session| session.flags).unwrap_or_default()
    }

    pub fn status(&self) -> BackendStatus {
        match self.session() {
            Some(session) => {
                let flags = if session.usable {
                    session.flags
                } else {
                    SessionFlags::default()
                };
                BackendStatus::from_table(&session.table, flags, session.usable)
            }
            None => BackendStatus::unavailable(),
        }
    }

    /// Ask whether `feature`/`subfeature` is enabled
    ///
    /// Fails open: true unless the backend is usable, disables features
    /// selectively, and says this one is off.
    pub fn is_feature_enabled(&self, feature: &CStr, subfeature: Option<&CStr>) -> bool {
        let Some(session) = self.ready() else {
            return true;
        };
        if !session.flags.has_disabled_features {
            return true;
        }
        match session.table.feature_enabled.get() {
            // SAFETY: resolved from the backend; both strings outlive the call.
            Ok(feature_enabled) => unsafe {
                feature_enabled(feature.as_ptr(), opt_ptr(subfeature)) != 0
            },
            Err(_) => true,
        }
    }

    /// True while recording or replaying and, when `feature` is given, that
    /// feature is enabled
    pub fn is_recording_or_replaying(
        &self,
        feature: Option<&CStr>,
        subfeature: Option<&CStr>,
    ) -> bool {
        let Some(session) = self.ready() else {
            return false;
        };
        session.flags.active
            && feature.map_or(true, |feature| self.is_feature_enabled(feature, subfeature))
    }

    /// Emit a message, only while recording or replaying
    pub fn print(&self, args: fmt::Arguments<'_>) {
        if self.is_recording_or_replaying(None, None) {
            self.forward_message(|table| &table.print, args);
        }
    }

    pub fn warning(&self, args: fmt::Arguments<'_>) {
        self.forward_message(|table| &table.warning, args);
    }

    /// Record an assertion message; replay checks it matches
    pub fn assert(&self, args: fmt::Arguments<'_>) {
        self.forward_message(|table| &table.assert, args);
    }

    pub fn diagnostic(&self, args: fmt::Arguments<'_>) {
        self.forward_message(|table| &table.diagnostic, args);
    }

    fn forward_message(
        &self,
        slot: impl FnOnce(&CapabilityTable) -> &Slot<MessageFn>,
        args: fmt::Arguments<'_>,
    ) {
        if let Some(function) = self.ready().and_then(|s| slot(&s.table).get().ok()) {
            message::forward(function, args);
        }
    }

    /// Give `ptr` a stable identity across recording and replay
    pub fn register_pointer<T: ?Sized>(&self, ptr: *const T) {
        if let Some(register) = self.ready().and_then(|s| s.table.register_pointer.get().ok()) {
            // SAFETY: resolved from the backend; the address is opaque to it.
            unsafe { register(ptr.cast::<c_void>()) }
        }
    }

    pub fn unregister_pointer<T: ?Sized>(&self, ptr: *const T) {
        if let Some(unregister) = self
            .ready()
            .and_then(|s| s.table.unregister_pointer.get().ok())
        {
            // SAFETY: resolved from the backend; the address is opaque to it.
            unsafe { unregister(ptr.cast::<c_void>()) }
        }
    }

    /// Backend id of a registered pointer; 0 without a backend
    pub fn pointer_id<T: ?Sized>(&self, ptr: *const T) -> i32 {
        match self.ready().and_then(|s| s.table.pointer_id.get().ok()) {
            // SAFETY: resolved from the backend; the address is opaque to it.
            Some(pointer_id) => unsafe { pointer_id(ptr.cast::<c_void>()) },
            None => 0,
        }
    }

    /// Whether the backend currently disallows recorded events
    pub fn are_events_disallowed(&self, why: Option<&CStr>) -> bool {
        if !self.is_recording_or_replaying(Some(DISALLOW_EVENTS_FEATURE), why) {
            return false;
        }
        match self.ready().and_then(|s| s.table.events_disallowed.get().ok()) {
            // SAFETY: resolved from the backend; NULL `why` is accepted.
            Some(events_disallowed) => unsafe { events_disallowed(opt_ptr(why)) != 0 },
            None => false,
        }
    }

    pub fn begin_pass_through_events(&self) {
        if let Some(begin) = self
            .ready()
            .and_then(|s| s.table.begin_pass_through.get().ok())
        {
            // SAFETY: resolved from the backend; takes no arguments.
            unsafe { begin() }
        }
    }

    pub fn end_pass_through_events(&self) {
        if let Some(end) = self.ready().and_then(|s| s.table.end_pass_through.get().ok()) {
            // SAFETY: resolved from the backend; takes no arguments.
            unsafe { end() }
        }
    }

    /// Begin passing events through; they end when the guard drops
    pub fn pass_through_events(&self) -> PassThroughGuard<'_, B> {
        self.begin_pass_through_events();
        PassThroughGuard { replay: self }
    }

    pub fn is_replaying(&self) -> bool {
        match self.ready().and_then(|s| s.table.is_replaying.get().ok()) {
            // SAFETY: resolved from the backend; takes no arguments.
            Some(is_replaying) => unsafe { is_replaying() != 0 },
            None => false,
        }
    }

    /// Record `v` while recording, or return the recorded value on replay
    ///
    /// Identity when not recording/replaying or when "values" is disabled
    /// for `why`.
    pub fn value(&self, why: &CStr, v: c_ulong) -> c_ulong {
        if !self.is_recording_or_replaying(Some(VALUES_FEATURE), Some(why)) {
            return v;
        }
        match self.ready().and_then(|s| s.table.value.get().ok()) {
            // SAFETY: resolved from the backend; `why` outlives the call.
            Some(value) => unsafe { value(why.as_ptr(), v) },
            None => v,
        }
    }
}

impl<B: SymbolBinder> fmt::Debug for RecordReplay<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("RecordReplay");
        out.field("state", &self.init_state());
        if let Some(session) = self.session.get() {
            out.field("usable", &session.usable)
                .field("flags", &session.flags)
                .field("capabilities", &session.table);
        }
        out.finish()
    }
}

/// Ends pass-through events when dropped
#[must_use = "pass-through ends as soon as the guard is dropped"]
pub struct PassThroughGuard<'a, B: SymbolBinder = ProcessBinder> {
    replay: &'a RecordReplay<B>,
}

impl<B: SymbolBinder> Drop for PassThroughGuard<'_, B> {
    fn drop(&mut self) {
        self.replay.end_pass_through_events();
    }
}

/// Print through [`global`] while recording or replaying
#[macro_export]
macro_rules! rr_print {
    ($($arg:tt)*) => {
        $crate::global().print(::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rr_warning {
    ($($arg:tt)*) => {
        $crate::global().warning(::std::format_args!($($arg)*))
    };
}

/// Record an assertion through [`global`]
#[macro_export]
macro_rules! rr_assert {
    ($($arg:tt)*) => {
        $crate::global().assert(::std::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rr_diagnostic {
    ($($arg:tt)*) => {
        $crate::global().diagnostic(::std::format_args!($($arg)*))
    };
}
