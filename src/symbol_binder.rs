//! Symbol lookup for optional backend capabilities
//!
//! Resolves a capability by its exported name without loading anything new:
//! the backend, when present, has already been loaded by the host environment.
//! A name either resolves or it does not; absence is an ordinary outcome.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Module the backend ships as on platforms without a global export namespace
pub const WINDOWS_BACKEND_MODULE: &CStr = c"windows-recordreplay.dll";

/// Something that can look up an exported function by name
pub trait SymbolBinder: Send + Sync {
    /// Return the address of `name`, or `None` if it is not exported
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>>;
}

impl<T: SymbolBinder + ?Sized> SymbolBinder for &T {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        (**self).lookup(name)
    }
}

impl<T: SymbolBinder + ?Sized> SymbolBinder for Arc<T> {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        (**self).lookup(name)
    }
}

/// Where [`ProcessBinder`] searches for symbols
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    /// The process-wide export table (`dlsym(RTLD_DEFAULT, ..)`)
    Global,
    /// A single module that must already be loaded
    Module(Cow<'static, CStr>),
}

impl Namespace {
    /// Global namespace on POSIX, the backend module on Windows
    pub const fn platform_default() -> Self {
        if cfg!(windows) {
            Namespace::Module(Cow::Borrowed(WINDOWS_BACKEND_MODULE))
        } else {
            Namespace::Global
        }
    }

    /// Search only inside the named module
    pub fn module(name: CString) -> Self {
        Namespace::Module(Cow::Owned(name))
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::Global => write!(f, "global"),
            Namespace::Module(name) => write!(f, "module:{}", name.to_string_lossy()),
        }
    }
}

/// Binder backed by the dynamic loader of the running process
#[derive(Debug)]
pub struct ProcessBinder {
    namespace: Namespace,
    /// Module handle (0 = not loaded), fetched once and never closed
    module: OnceLock<usize>,
}

impl ProcessBinder {
    /// Create a binder over the given namespace
    pub const fn new(namespace: Namespace) -> Self {
        ProcessBinder {
            namespace,
            module: OnceLock::new(),
        }
    }

    /// Binder over [`Namespace::platform_default`]
    pub const fn platform_default() -> Self {
        Self::new(Namespace::platform_default())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn module_handle(&self, module: &CStr) -> Option<NonNull<c_void>> {
        let handle = *self
            .module
            .get_or_init(|| os::loaded_module(module) as usize);
        NonNull::new(handle as *mut c_void)
    }
}

impl Default for ProcessBinder {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl SymbolBinder for ProcessBinder {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        match &self.namespace {
            Namespace::Global => NonNull::new(os::global_symbol(name)),
            Namespace::Module(module) => {
                let handle = self.module_handle(module)?;
                NonNull::new(os::module_symbol(handle, name))
            }
        }
    }
}

#[cfg(unix)]
mod os {
    use std::ffi::{c_void, CStr};
    use std::ptr::NonNull;

    pub fn global_symbol(name: &CStr) -> *mut c_void {
        // SAFETY: `name` is NUL-terminated and RTLD_DEFAULT is always valid.
        unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) }
    }

    /// Handle for an already-loaded module; RTLD_NOLOAD never maps a new one
    pub fn loaded_module(module: &CStr) -> *mut c_void {
        // SAFETY: `module` is NUL-terminated.
        unsafe { libc::dlopen(module.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) }
    }

    pub fn module_symbol(handle: NonNull<c_void>, name: &CStr) -> *mut c_void {
        // SAFETY: `handle` came from dlopen and is never closed.
        unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) }
    }
}

#[cfg(windows)]
mod os {
    use std::ffi::{c_char, c_void, CStr};
    use std::ptr::NonNull;

    #[link(name = "kernel32")]
    extern "system" {
        fn GetModuleHandleA(module_name: *const c_char) -> *mut c_void;
        fn GetProcAddress(module: *mut c_void, proc_name: *const c_char) -> *mut c_void;
    }

    pub fn global_symbol(_name: &CStr) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub fn loaded_module(module: &CStr) -> *mut c_void {
        // SAFETY: `module` is NUL-terminated; GetModuleHandleA does not load.
        unsafe { GetModuleHandleA(module.as_ptr()) }
    }

    pub fn module_symbol(handle: NonNull<c_void>, name: &CStr) -> *mut c_void {
        // SAFETY: `handle` is a live module handle and `name` is NUL-terminated.
        unsafe { GetProcAddress(handle.as_ptr(), name.as_ptr()) }
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use std::ffi::{c_void, CStr};
    use std::ptr::NonNull;

    pub fn global_symbol(_name: &CStr) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub fn loaded_module(_module: &CStr) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub fn module_symbol(_handle: NonNull<c_void>, _name: &CStr) -> *mut c_void {
        std::ptr::null_mut()
    }
}

/// In-memory binder for backends linked into the host or faked in tests
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<CString, usize>,
}

impl SymbolTable {
    /// Create an empty table (every lookup misses)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol (builder form); null addresses are ignored
    pub fn with_symbol(mut self, name: &CStr, address: *const c_void) -> Self {
        self.insert(name, address);
        self
    }

    /// Add or replace a symbol; null addresses are ignored
    pub fn insert(&mut self, name: &CStr, address: *const c_void) {
        if !address.is_null() {
            self.symbols.insert(name.to_owned(), address as usize);
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolBinder for SymbolTable {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|&address| NonNull::new(address as *mut c_void))
    }
}
