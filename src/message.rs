//! Message forwarding for the formatted capabilities
//!
//! The backend's message functions take a printf-style format string and a
//! `va_list`. Rust has no stable way to build a `va_list`, so messages are
//! rendered on this side from `fmt::Arguments` (each argument evaluated once)
//! and handed over as a format string that contains no conversion
//! specifiers: every `%` is doubled and NUL bytes are dropped. The backend
//! then never reads from the argument list, which is passed as an empty,
//! zeroed block.

use crate::capability::MessageFn;
use std::ffi::{c_char, CStr, CString};
use std::fmt::{self, Write};

/// Zeroed stand-in for an empty `va_list`
///
/// Large and aligned enough for every supported ABI's `va_list`, all of
/// which are passed to a callee as a pointer.
#[repr(C, align(16))]
pub struct EmptyArgs {
    _storage: [u64; 4],
}

impl EmptyArgs {
    pub const fn new() -> Self {
        EmptyArgs { _storage: [0; 4] }
    }
}

impl Default for EmptyArgs {
    fn default() -> Self {
        Self::new()
    }
}

/// A rendered message, safe to use as a printf format string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(CString);

impl Message {
    /// Render captured arguments
    pub fn render(args: fmt::Arguments<'_>) -> Self {
        let mut escaped = EscapedFormat::default();
        match args.as_str() {
            Some(text) => {
                let _ = escaped.write_str(text);
            }
            None => {
                // A failing Display impl still leaves its partial output behind.
                let _ = escaped.write_fmt(args);
            }
        }
        Message(CString::new(escaped.0).unwrap_or_default())
    }

    pub fn as_c_str(&self) -> &CStr {
        &self.0
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr()
    }
}

#[derive(Default)]
struct EscapedFormat(Vec<u8>);

impl Write for EscapedFormat {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0 => {}
                b'%' => self.0.extend_from_slice(b"%%"),
                _ => self.0.push(byte),
            }
        }
        Ok(())
    }
}

/// Render `args` and pass them to a message capability
pub(crate) fn forward(function: MessageFn, args: fmt::Arguments<'_>) {
    let message = Message::render(args);
    let mut empty = EmptyArgs::new();
    // SAFETY: `function` is the backend's message entry point; the format
    // string holds no conversions, so the empty argument block is never read.
    unsafe { function(message.as_ptr(), &mut empty) }
}
