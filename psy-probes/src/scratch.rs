//! Per-invocation scratch records
//!
//! A return probe only sees the return slot when the wrapped call finishes.
//! Whatever it needs from the call's arguments is copied into an
//! `InvocationScratch` at entry. The scratch lives on the call site's stack
//! for exactly one call and never touches the heap.

use crate::host::ShowArgs;

/// Capacity of the captured device name
pub const DEVICE_NAME_CAP: usize = 32;

/// Capacity of the captured attribute name
pub const ATTR_NAME_CAP: usize = 48;

/// Fixed-capacity, stack-allocated copy of a string
#[derive(Clone, Copy)]
pub struct FixedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedStr<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Copy `s` in. Returns `false` and leaves the value empty if it does not fit.
    pub fn set(&mut self, s: &str) -> bool {
        let bytes = s.as_bytes();
        if bytes.len() > N {
            self.len = 0;
            return false;
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a whole `&str`
        core::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> core::fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Arguments captured at a return probe's entry point
#[derive(Debug, Default, Clone, Copy)]
pub struct InvocationScratch {
    pub device: FixedStr<DEVICE_NAME_CAP>,
    pub attr: FixedStr<ATTR_NAME_CAP>,
    /// Set once both names were copied in full
    pub captured: bool,
}

impl InvocationScratch {
    /// Copy the call's device and attribute names.
    ///
    /// Names longer than the fixed capacity leave the scratch uncaptured,
    /// which return handlers treat as "not ours".
    pub fn capture(&mut self, args: &ShowArgs<'_>) -> bool {
        self.captured = self.device.set(args.device) && self.attr.set(args.attr);
        self.captured
    }
}
