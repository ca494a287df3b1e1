//! In-process instrumentation host
//!
//! Every intercepted function is reached through a `CallSite`. A call site
//! fires the probe registered on it, then runs the original call:
//!
//! ```text
//! caller ──> CallSite::call_write ──> PreHandler::pre(&mut msg) ──> original(msg)
//!
//! caller ──> CallSite::call_show  ──> ReturnHandler::entry(args, &mut scratch)
//!                                 ──> original(args, buf) -> ret
//!                                 ──> ReturnHandler::ret(&scratch, {ret, buf})
//! ```
//!
//! Symbols only become resolvable once `define` has been called for them, so
//! registration against a path this build does not provide fails with
//! `ProbeError::SymbolNotFound`, just like an unresolvable kernel symbol.
//!
//! The fire path never waits: handler lookup is a `try_read`. A lookup that
//! loses against a concurrent (un)registration counts as a miss and the
//! original call runs unmodified. Handlers run while the read guard is held,
//! so `unregister` returns only after every in-flight handler has finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::ProbeError;
use crate::scratch::InvocationScratch;

/// Arguments of an attribute-show call
#[derive(Debug, Clone, Copy)]
pub struct ShowArgs<'a> {
    /// Name of the device (or class) the attribute belongs to
    pub device: &'a str,
    /// Attribute name
    pub attr: &'a str,
}

/// Return slot of an attribute-show call.
///
/// The caller's output buffer cannot be held in the scratch while the wrapped
/// call writes it, so the call site hands it back here together with `ret`.
pub struct ReturnSlot<'a> {
    /// Bytes written, or a negative errno
    pub ret: &'a mut isize,
    /// The caller's output buffer
    pub buf: &'a mut [u8],
}

/// Pre-handler on a message-transmit call site.
///
/// Runs synchronously inside the caller. Must not block, allocate, or lock.
pub trait PreHandler: Send + Sync {
    fn pre(&self, data: &mut [u8]);
}

/// Entry/return handler pair on an attribute-show call site.
///
/// Same execution constraints as `PreHandler`.
pub trait ReturnHandler: Send + Sync {
    /// Capture what the return point needs. Defaults to device + attribute.
    fn entry(&self, args: &ShowArgs<'_>, scratch: &mut InvocationScratch) {
        scratch.capture(args);
    }

    fn ret(&self, scratch: &InvocationScratch, slot: ReturnSlot<'_>);
}

/// Probe flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Runs before the call, may rewrite its input
    Pre,
    /// Runs at entry and return, may rewrite the result
    Return,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "kprobe",
            Self::Return => "kretprobe",
        }
    }
}

/// Live registration. Give it back to `unregister` to remove the probe.
#[derive(Debug)]
#[must_use = "dropping a handle leaves the probe registered"]
pub struct ProbeHandle {
    symbol: String,
    kind: ProbeKind,
    id: u64,
}

/// Hit/miss counters of a call site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    pub hits: u64,
    pub missed: u64,
}

/// The capability a host environment provides to place probes.
pub trait InstrumentationHost: Send + Sync {
    fn register_kprobe(
        &self,
        symbol: &str,
        handler: Arc<dyn PreHandler>,
    ) -> Result<ProbeHandle, ProbeError>;

    fn register_kretprobe(
        &self,
        symbol: &str,
        handler: Arc<dyn ReturnHandler>,
    ) -> Result<ProbeHandle, ProbeError>;

    fn unregister(&self, handle: ProbeHandle) -> Result<(), ProbeError>;
}

type Slot<H> = RwLock<Option<(u64, Arc<H>)>>;

/// One instrumented function
pub struct CallSite {
    symbol: String,
    pre: Slot<dyn PreHandler>,
    ret: Slot<dyn ReturnHandler>,
    hits: AtomicU64,
    missed: AtomicU64,
}

impl CallSite {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            pre: RwLock::new(None),
            ret: RwLock::new(None),
            hits: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> SiteStats {
        SiteStats {
            hits: self.hits.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
        }
    }

    /// Transmit `data` through `f`, letting a pre-handler rewrite it first.
    pub fn call_write<R>(&self, data: &mut [u8], f: impl FnOnce(&[u8]) -> R) -> R {
        match self.pre.try_read() {
            Some(guard) => {
                if let Some((_, handler)) = guard.as_ref() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    handler.pre(data);
                }
            }
            None => {
                self.missed.fetch_add(1, Ordering::Relaxed);
            }
        }
        f(data)
    }

    /// Render an attribute through `f`, bracketing it with the return probe.
    ///
    /// `f` returns bytes written or a negative errno. The (possibly
    /// rewritten) return value is passed back to the caller.
    pub fn call_show(
        &self,
        args: ShowArgs<'_>,
        buf: &mut [u8],
        f: impl FnOnce(&ShowArgs<'_>, &mut [u8]) -> isize,
    ) -> isize {
        let mut scratch = InvocationScratch::default();

        let entered = match self.ret.try_read() {
            Some(guard) => guard.as_ref().map(|(id, handler)| {
                handler.entry(&args, &mut scratch);
                *id
            }),
            None => {
                self.missed.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        let mut ret = f(&args, buf);

        let Some(entry_id) = entered else {
            return ret;
        };

        match self.ret.try_read() {
            // Same registration that saw the entry
            Some(guard) => {
                if let Some((id, handler)) = guard.as_ref() {
                    if *id == entry_id {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        handler.ret(
                            &scratch,
                            ReturnSlot {
                                ret: &mut ret,
                                buf,
                            },
                        );
                    }
                }
            }
            None => {
                self.missed.fetch_add(1, Ordering::Relaxed);
            }
        }

        ret
    }
}

/// Symbol table plus probe bookkeeping for in-process call sites
pub struct ProbeHost {
    sites: RwLock<HashMap<String, Arc<CallSite>>>,
    next_id: AtomicU64,
}

impl Default for ProbeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeHost {
    pub fn new() -> Self {
        Self {
            sites: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make `symbol` resolvable and return its call site.
    ///
    /// Defining an existing symbol returns the same site.
    pub fn define(&self, symbol: &str) -> Arc<CallSite> {
        let mut sites = self.sites.write();
        let site = sites
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(CallSite::new(symbol)));
        debug!("Defined call site {}", symbol);
        Arc::clone(site)
    }

    /// Look up a defined call site
    pub fn lookup(&self, symbol: &str) -> Option<Arc<CallSite>> {
        self.sites.read().get(symbol).cloned()
    }

    fn site(&self, symbol: &str) -> Result<Arc<CallSite>, ProbeError> {
        self.lookup(symbol)
            .ok_or_else(|| ProbeError::SymbolNotFound(symbol.to_string()))
    }

    fn install<H: ?Sized>(
        &self,
        site: &CallSite,
        slot: &Slot<H>,
        kind: ProbeKind,
        handler: Arc<H>,
    ) -> Result<ProbeHandle, ProbeError> {
        let mut guard = slot.write();
        if guard.is_some() {
            return Err(ProbeError::Busy {
                symbol: site.symbol.clone(),
                kind: kind.as_str(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *guard = Some((id, handler));
        info!("Registered {} on {}", kind.as_str(), site.symbol);
        Ok(ProbeHandle {
            symbol: site.symbol.clone(),
            kind,
            id,
        })
    }

    fn remove<H: ?Sized>(slot: &Slot<H>, handle: &ProbeHandle) -> Result<(), ProbeError> {
        // Waits for in-flight handlers holding the read side
        let mut guard = slot.write();
        match guard.as_ref() {
            Some((id, _)) if *id == handle.id => {
                *guard = None;
                Ok(())
            }
            _ => Err(ProbeError::NotRegistered(handle.symbol.clone())),
        }
    }
}

impl InstrumentationHost for ProbeHost {
    fn register_kprobe(
        &self,
        symbol: &str,
        handler: Arc<dyn PreHandler>,
    ) -> Result<ProbeHandle, ProbeError> {
        let site = self.site(symbol)?;
        self.install(&site, &site.pre, ProbeKind::Pre, handler)
    }

    fn register_kretprobe(
        &self,
        symbol: &str,
        handler: Arc<dyn ReturnHandler>,
    ) -> Result<ProbeHandle, ProbeError> {
        let site = self.site(symbol)?;
        self.install(&site, &site.ret, ProbeKind::Return, handler)
    }

    fn unregister(&self, handle: ProbeHandle) -> Result<(), ProbeError> {
        let site = self
            .lookup(&handle.symbol)
            .ok_or_else(|| ProbeError::NotRegistered(handle.symbol.clone()))?;
        match handle.kind {
            ProbeKind::Pre => Self::remove(&site.pre, &handle)?,
            ProbeKind::Return => Self::remove(&site.ret, &handle)?,
        }
        info!("Unregistered {} on {}", handle.kind.as_str(), handle.symbol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Zeroer;

    impl PreHandler for Zeroer {
        fn pre(&self, data: &mut [u8]) {
            data.fill(0);
        }
    }

    struct ForceOk {
        entries: AtomicUsize,
    }

    impl ReturnHandler for ForceOk {
        fn ret(&self, scratch: &InvocationScratch, slot: ReturnSlot<'_>) {
            self.entries.fetch_add(1, Ordering::Relaxed);
            if scratch.captured && scratch.attr == *"online" {
                slot.buf[..3].copy_from_slice(b"ok\n");
                *slot.ret = 3;
            }
        }
    }

    fn render(_args: &ShowArgs<'_>, buf: &mut [u8]) -> isize {
        buf[..2].copy_from_slice(b"0\n");
        2
    }

    #[test]
    fn test_undefined_symbol() {
        let host = ProbeHost::new();
        let err = host
            .register_kprobe("pmic_glink_write", Arc::new(Zeroer))
            .unwrap_err();
        assert_eq!(err, ProbeError::SymbolNotFound("pmic_glink_write".into()));
    }

    #[test]
    fn test_pre_handler_rewrites_before_call() {
        let host = ProbeHost::new();
        let site = host.define("pmic_glink_write");
        let handle = host.register_kprobe("pmic_glink_write", Arc::new(Zeroer)).unwrap();

        let mut msg = [1u8, 2, 3];
        let seen = site.call_write(&mut msg, |d| d.to_vec());
        assert_eq!(seen, vec![0, 0, 0]);
        assert_eq!(site.stats().hits, 1);

        host.unregister(handle).unwrap();
        let mut msg = [1u8, 2, 3];
        let seen = site.call_write(&mut msg, |d| d.to_vec());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_second_probe_is_busy() {
        let host = ProbeHost::new();
        host.define("pmic_glink_write");
        let _first = host.register_kprobe("pmic_glink_write", Arc::new(Zeroer)).unwrap();
        let err = host
            .register_kprobe("pmic_glink_write", Arc::new(Zeroer))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Busy { .. }));
    }

    #[test]
    fn test_return_handler_sees_scratch_and_slot() {
        let host = ProbeHost::new();
        let site = host.define("power_supply_show_property");
        let handler = Arc::new(ForceOk {
            entries: AtomicUsize::new(0),
        });
        let _h = host
            .register_kretprobe("power_supply_show_property", handler.clone())
            .unwrap();

        let mut buf = [0u8; 16];
        let ret = site.call_show(
            ShowArgs {
                device: "usb",
                attr: "online",
            },
            &mut buf,
            render,
        );
        assert_eq!(ret, 3);
        assert_eq!(&buf[..3], b"ok\n");

        let ret = site.call_show(
            ShowArgs {
                device: "usb",
                attr: "type",
            },
            &mut buf,
            render,
        );
        assert_eq!(ret, 2);
        assert_eq!(handler.entries.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unregister_twice() {
        let host = ProbeHost::new();
        host.define("pd_verifed_show");
        let handle = host
            .register_kretprobe(
                "pd_verifed_show",
                Arc::new(ForceOk {
                    entries: AtomicUsize::new(0),
                }),
            )
            .unwrap();
        let stale = ProbeHandle {
            symbol: handle.symbol.clone(),
            kind: handle.kind,
            id: handle.id,
        };
        host.unregister(handle).unwrap();
        assert!(matches!(
            host.unregister(stale),
            Err(ProbeError::NotRegistered(_))
        ));
    }
}
