//! Typed capability table
//!
//! Each backend capability is declared once below with its exported symbol
//! name and its C signature. The declaration expands to the [`Capability`]
//! enum and to [`CapabilityTable`], which holds one typed [`Slot`] per
//! capability so every call site is checked against the right signature.

use crate::message::EmptyArgs;
use crate::symbol_binder::SymbolBinder;
use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::fmt;
use std::ptr::NonNull;
use thiserror::Error;

/// `void (const char* format, va_list args)`
pub type MessageFn = unsafe extern "C" fn(*const c_char, *mut EmptyArgs);
/// `void (const void* ptr)`
pub type PointerFn = unsafe extern "C" fn(*const c_void);
/// `int (const void* ptr)`
pub type PointerIdFn = unsafe extern "C" fn(*const c_void) -> c_int;
/// `char (void)`
pub type FlagFn = unsafe extern "C" fn() -> c_char;
/// `char (const char* feature, const char* subfeature)`
pub type FeatureEnabledFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_char;
/// `char (const char* why)`
pub type EventsDisallowedFn = unsafe extern "C" fn(*const c_char) -> c_char;
/// `void (void)`
pub type PassThroughFn = unsafe extern "C" fn();
/// `unsigned long (const char* why, unsigned long v)`
pub type ValueFn = unsafe extern "C" fn(*const c_char, c_ulong) -> c_ulong;

/// The only failure this crate knows about
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimError {
    /// The capability is not exported, or no backend is loaded at all
    #[error("record/replay backend unavailable: {capability} is not exported")]
    BackendUnavailable { capability: Capability },
}

pub type Result<T> = std::result::Result<T, ShimError>;

const fn symbol_cstr(bytes: &'static [u8]) -> &'static CStr {
    match CStr::from_bytes_with_nul(bytes) {
        Ok(name) => name,
        Err(_) => panic!("capability symbol names must not contain NUL"),
    }
}

macro_rules! capabilities {
    ($( $(#[$doc:meta])* $variant:ident => $field:ident: $ty:ty = $symbol:literal, $label:literal; )*) => {
        /// A named, independently resolvable backend function
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Capability {
            $( $(#[$doc])* $variant, )*
        }

        impl Capability {
            /// Every capability, in resolution order
            pub const ALL: &'static [Capability] = &[$( Capability::$variant, )*];

            /// Exported symbol name, byte-for-byte as the backend exports it
            pub const fn symbol(self) -> &'static CStr {
                match self {
                    $( Capability::$variant => {
                        const SYMBOL: &CStr = symbol_cstr(concat!($symbol, "\0").as_bytes());
                        SYMBOL
                    } )*
                }
            }

            pub const fn symbol_name(self) -> &'static str {
                match self {
                    $( Capability::$variant => $symbol, )*
                }
            }

            /// Short kebab-case name used in reports
            pub const fn label(self) -> &'static str {
                match self {
                    $( Capability::$variant => $label, )*
                }
            }
        }

        /// One slot per capability, filled in a single pass
        pub struct CapabilityTable {
            $( pub(crate) $field: Slot<$ty>, )*
        }

        impl CapabilityTable {
            /// Look every capability up through `binder`
            pub fn resolve(binder: &dyn SymbolBinder) -> Self {
                CapabilityTable {
                    $( $field: Slot::bind(binder, Capability::$variant, |address| {
                        // SAFETY: the backend exports this name with exactly this
                        // signature; the address is a non-null function entry point.
                        unsafe { std::mem::transmute::<*mut c_void, $ty>(address.as_ptr()) }
                    }), )*
                }
            }

            /// A table with nothing resolved
            pub fn absent() -> Self {
                CapabilityTable {
                    $( $field: Slot::absent(Capability::$variant), )*
                }
            }

            pub fn is_resolved(&self, capability: Capability) -> bool {
                match capability {
                    $( Capability::$variant => self.$field.is_resolved(), )*
                }
            }
        }
    };
}

capabilities! {
    /// Formatted message, emitted only while recording or replaying
    Print => print: MessageFn = "RecordReplayPrint", "print";
    Warning => warning: MessageFn = "RecordReplayWarning", "warning";
    /// Recorded assertion; its presence marks the backend as usable
    Assert => assert: MessageFn = "RecordReplayAssert", "assert";
    Diagnostic => diagnostic: MessageFn = "RecordReplayDiagnostic", "diagnostic";
    RegisterPointer => register_pointer: PointerFn = "RecordReplayRegisterPointer", "register-pointer";
    UnregisterPointer => unregister_pointer: PointerFn = "RecordReplayUnregisterPointer", "unregister-pointer";
    PointerId => pointer_id: PointerIdFn = "RecordReplayPointerId", "pointer-id";
    HasDisabledFeatures => has_disabled_features: FlagFn = "RecordReplayHasDisabledFeatures", "has-disabled-features";
    FeatureEnabled => feature_enabled: FeatureEnabledFn = "RecordReplayFeatureEnabled", "feature-enabled";
    EventsDisallowed => events_disallowed: EventsDisallowedFn = "RecordReplayAreEventsDisallowed", "events-disallowed";
    BeginPassThrough => begin_pass_through: PassThroughFn = "RecordReplayBeginPassThroughEvents", "begin-pass-through";
    EndPassThrough => end_pass_through: PassThroughFn = "RecordReplayEndPassThroughEvents", "end-pass-through";
    IsReplaying => is_replaying: FlagFn = "RecordReplayIsReplaying", "is-replaying";
    /// Recorded value, replayed verbatim
    Value => value: ValueFn = "RecordReplayValue", "get-value";
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol_name())
    }
}

/// A capability paired with its resolved handle, if any
#[derive(Clone, Copy)]
pub struct Slot<F> {
    capability: Capability,
    handle: Option<F>,
}

impl<F: Copy> Slot<F> {
    fn bind(
        binder: &dyn SymbolBinder,
        capability: Capability,
        cast: impl FnOnce(NonNull<c_void>) -> F,
    ) -> Self {
        let handle = binder.lookup(capability.symbol()).map(cast);
        tracing::debug!(
            "capability {} {}",
            capability,
            if handle.is_some() { "resolved" } else { "absent" }
        );
        Slot { capability, handle }
    }

    fn absent(capability: Capability) -> Self {
        Slot {
            capability,
            handle: None,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn is_resolved(&self) -> bool {
        self.handle.is_some()
    }

    /// The typed handle, or [`ShimError::BackendUnavailable`]
    pub fn get(&self) -> Result<F> {
        self.handle.ok_or(ShimError::BackendUnavailable {
            capability: self.capability,
        })
    }
}

impl<F> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("capability", &self.capability)
            .field("resolved", &self.handle.is_some())
            .finish()
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for &capability in Capability::ALL {
            list.entry(&capability.symbol_name(), &self.is_resolved(capability));
        }
        list.finish()
    }
}
