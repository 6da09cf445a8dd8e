// Fake record/replay backend for integration tests
//
// Every capability is an `extern "C"` function that records what it was
// called with into process-wide state. Tests that install a configuration
// must run under `#[serial]`.

#![allow(dead_code)]

use replay_shim::message::EmptyArgs;
use replay_shim::{Capability, SymbolTable};
use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Offset the fake backend adds to every recorded value
pub const VALUE_OFFSET: c_ulong = 1000;

/// Behavior of the fake backend
#[derive(Debug, Clone, Default)]
pub struct FakeConfig {
    /// Answer to feature-enabled("record-replay", NULL)
    pub active: bool,
    pub has_disabled_features: bool,
    /// (feature, subfeature) pairs reported disabled; `None` disables all subfeatures
    pub disabled: Vec<(&'static str, Option<&'static str>)>,
    pub replaying: bool,
    pub events_disallowed: bool,
}

impl FakeConfig {
    pub fn active() -> Self {
        FakeConfig {
            active: true,
            ..Default::default()
        }
    }

    pub fn with_disabled(mut self, feature: &'static str, subfeature: Option<&'static str>) -> Self {
        self.has_disabled_features = true;
        self.disabled.push((feature, subfeature));
        self
    }
}

static CONFIG: Mutex<Option<FakeConfig>> = Mutex::new(None);
static FEATURE_QUERIES: AtomicUsize = AtomicUsize::new(0);
static HAS_DISABLED_QUERIES: AtomicUsize = AtomicUsize::new(0);
static MESSAGES: Mutex<Vec<(&'static str, String)>> = Mutex::new(Vec::new());
static POINTERS: Mutex<Vec<usize>> = Mutex::new(Vec::new());
static EVENT_REASONS: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
static VALUE_REASONS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static PASS_THROUGH_BEGINS: AtomicUsize = AtomicUsize::new(0);
static PASS_THROUGH_ENDS: AtomicUsize = AtomicUsize::new(0);
static IN_PASS_THROUGH: AtomicBool = AtomicBool::new(false);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn config() -> FakeConfig {
    lock(&CONFIG).clone().unwrap_or_default()
}

fn read(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Reset all recorded calls and install `config`
pub fn install(config: FakeConfig) {
    *lock(&CONFIG) = Some(config);
    FEATURE_QUERIES.store(0, Ordering::SeqCst);
    HAS_DISABLED_QUERIES.store(0, Ordering::SeqCst);
    lock(&MESSAGES).clear();
    lock(&POINTERS).clear();
    lock(&EVENT_REASONS).clear();
    lock(&VALUE_REASONS).clear();
    PASS_THROUGH_BEGINS.store(0, Ordering::SeqCst);
    PASS_THROUGH_ENDS.store(0, Ordering::SeqCst);
    IN_PASS_THROUGH.store(false, Ordering::SeqCst);
}

pub fn feature_queries() -> usize {
    FEATURE_QUERIES.load(Ordering::SeqCst)
}

pub fn has_disabled_queries() -> usize {
    HAS_DISABLED_QUERIES.load(Ordering::SeqCst)
}

/// (capability label, message) pairs in call order
pub fn messages() -> Vec<(&'static str, String)> {
    lock(&MESSAGES).clone()
}

pub fn registered_pointers() -> Vec<usize> {
    lock(&POINTERS).clone()
}

pub fn event_reasons() -> Vec<Option<String>> {
    lock(&EVENT_REASONS).clone()
}

pub fn value_reasons() -> Vec<String> {
    lock(&VALUE_REASONS).clone()
}

pub fn pass_through_counts() -> (usize, usize) {
    (
        PASS_THROUGH_BEGINS.load(Ordering::SeqCst),
        PASS_THROUGH_ENDS.load(Ordering::SeqCst),
    )
}

pub fn in_pass_through() -> bool {
    IN_PASS_THROUGH.load(Ordering::SeqCst)
}

fn record_message(label: &'static str, format: *const c_char) {
    let text = read(format).unwrap_or_default();
    lock(&MESSAGES).push((label, text));
}

extern "C" fn fake_print(format: *const c_char, _args: *mut EmptyArgs) {
    record_message("print", format);
}

extern "C" fn fake_warning(format: *const c_char, _args: *mut EmptyArgs) {
    record_message("warning", format);
}

extern "C" fn fake_assert(format: *const c_char, _args: *mut EmptyArgs) {
    record_message("assert", format);
}

extern "C" fn fake_diagnostic(format: *const c_char, _args: *mut EmptyArgs) {
    record_message("diagnostic", format);
}

extern "C" fn fake_register_pointer(ptr: *const c_void) {
    lock(&POINTERS).push(ptr as usize);
}

extern "C" fn fake_unregister_pointer(ptr: *const c_void) {
    lock(&POINTERS).retain(|&registered| registered != ptr as usize);
}

extern "C" fn fake_pointer_id(ptr: *const c_void) -> c_int {
    lock(&POINTERS)
        .iter()
        .position(|&registered| registered == ptr as usize)
        .map_or(0, |index| index as c_int + 1)
}

extern "C" fn fake_has_disabled_features() -> c_char {
    HAS_DISABLED_QUERIES.fetch_add(1, Ordering::SeqCst);
    config().has_disabled_features as c_char
}

extern "C" fn fake_feature_enabled(feature: *const c_char, subfeature: *const c_char) -> c_char {
    FEATURE_QUERIES.fetch_add(1, Ordering::SeqCst);
    let config = config();
    let feature = read(feature).unwrap_or_default();
    let subfeature = read(subfeature);

    if feature == "record-replay" {
        return config.active as c_char;
    }
    let disabled = config.disabled.iter().any(|(f, s)| {
        *f == feature && s.map_or(true, |s| subfeature.as_deref() == Some(s))
    });
    (!disabled) as c_char
}

extern "C" fn fake_events_disallowed(why: *const c_char) -> c_char {
    lock(&EVENT_REASONS).push(read(why));
    config().events_disallowed as c_char
}

extern "C" fn fake_begin_pass_through() {
    PASS_THROUGH_BEGINS.fetch_add(1, Ordering::SeqCst);
    IN_PASS_THROUGH.store(true, Ordering::SeqCst);
}

extern "C" fn fake_end_pass_through() {
    PASS_THROUGH_ENDS.fetch_add(1, Ordering::SeqCst);
    IN_PASS_THROUGH.store(false, Ordering::SeqCst);
}

extern "C" fn fake_is_replaying() -> c_char {
    config().replaying as c_char
}

extern "C" fn fake_value(why: *const c_char, v: c_ulong) -> c_ulong {
    lock(&VALUE_REASONS).push(read(why).unwrap_or_default());
    v + VALUE_OFFSET
}

/// Address of the fake implementation of `capability`
pub fn address_of(capability: Capability) -> *const c_void {
    match capability {
        Capability::Print => fake_print as *const c_void,
        Capability::Warning => fake_warning as *const c_void,
        Capability::Assert => fake_assert as *const c_void,
        Capability::Diagnostic => fake_diagnostic as *const c_void,
        Capability::RegisterPointer => fake_register_pointer as *const c_void,
        Capability::UnregisterPointer => fake_unregister_pointer as *const c_void,
        Capability::PointerId => fake_pointer_id as *const c_void,
        Capability::HasDisabledFeatures => fake_has_disabled_features as *const c_void,
        Capability::FeatureEnabled => fake_feature_enabled as *const c_void,
        Capability::EventsDisallowed => fake_events_disallowed as *const c_void,
        Capability::BeginPassThrough => fake_begin_pass_through as *const c_void,
        Capability::EndPassThrough => fake_end_pass_through as *const c_void,
        Capability::IsReplaying => fake_is_replaying as *const c_void,
        Capability::Value => fake_value as *const c_void,
    }
}

/// Binder exporting every fake capability
pub fn full_backend() -> SymbolTable {
    backend_without(&[])
}

/// Binder exporting every fake capability except `missing`
pub fn backend_without(missing: &[Capability]) -> SymbolTable {
    Capability::ALL
        .iter()
        .filter(|&&capability| !missing.contains(&capability))
        .fold(SymbolTable::new(), |table, &capability| {
            table.with_symbol(capability.symbol(), address_of(capability))
        })
}
