//! Interception engine
//!
//! Three independent layers, each a probe on one call site:
//!
//! | Layer | Symbol | Probe | Effect |
//! |-------|--------|-------|--------|
//! | `GlinkWrite` | `pmic_glink_write` | pre | rewrite the ICL value in outbound USB-status writes |
//! | `PropertyShow` | `power_supply_show_property` | return | report overrides for tracked attributes |
//! | `PdVerifiedShow` | `pd_verifed_show` | return | always report `1` |
//!
//! A layer whose symbol cannot be resolved is logged and left out; the others
//! still install. `HookSet` owns the registrations and removes them in
//! reverse order.

mod glink;
mod pd_show;
mod show;
mod stats;

use std::fmt;
use std::sync::Arc;

use psy_probes::{symbol, CallSite, InstrumentationHost, ProbeError, ProbeHandle, ShowArgs};
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::error::DeviceError;

pub use glink::{rewrite_input_current_limit, GlinkRewriter};
pub use pd_show::PdVerifiedRewriter;
pub use show::{render_decimal, tracked_field, PropertyShowRewriter};
pub use stats::{RewriteCounts, RewriteStats};

/// Interception layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Message rewrite on the coprocessor transmit path
    GlinkWrite,
    /// Generic attribute-show return rewrite
    PropertyShow,
    /// Fixed `pd_verifed` show return rewrite
    PdVerifiedShow,
}

impl HookKind {
    /// Registration order; teardown runs in reverse
    pub const INSTALL_ORDER: [HookKind; 3] = [
        HookKind::PropertyShow,
        HookKind::PdVerifiedShow,
        HookKind::GlinkWrite,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GlinkWrite => symbol::PMIC_GLINK_WRITE,
            Self::PropertyShow => symbol::POWER_SUPPLY_SHOW_PROPERTY,
            Self::PdVerifiedShow => symbol::PD_VERIFED_SHOW,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlinkWrite => "glink-write",
            Self::PropertyShow => "property-show",
            Self::PdVerifiedShow => "pd-verifed-show",
        }
    }
}

/// Whether a layer made it in
#[derive(Debug)]
pub enum Availability {
    Registered(ProbeHandle),
    Unavailable(ProbeError),
}

/// One layer's registration record
#[derive(Debug)]
pub struct HookRegistration {
    kind: HookKind,
    availability: Availability,
}

impl HookRegistration {
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        matches!(self.availability, Availability::Registered(_))
    }

    /// Why the layer is absent
    pub fn reason(&self) -> Option<&ProbeError> {
        match &self.availability {
            Availability::Unavailable(e) => Some(e),
            Availability::Registered(_) => None,
        }
    }
}

impl fmt::Display for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            None => write!(f, "{}: active", self.kind.as_str()),
            Some(e) => write!(f, "{}: unavailable ({})", self.kind.as_str(), e),
        }
    }
}

/// All interception layers installed on one host
pub struct HookSet {
    host: Arc<dyn InstrumentationHost>,
    registrations: Vec<HookRegistration>,
}

impl HookSet {
    /// Install every layer the host can resolve.
    ///
    /// Never fails as a whole: an unresolvable layer is recorded as
    /// unavailable and logged.
    pub fn install(
        host: Arc<dyn InstrumentationHost>,
        store: Arc<ConfigStore>,
        stats: Arc<RewriteStats>,
    ) -> Self {
        let mut registrations = Vec::with_capacity(HookKind::INSTALL_ORDER.len());

        for kind in HookKind::INSTALL_ORDER {
            let result = match kind {
                HookKind::PropertyShow => host.register_kretprobe(
                    kind.symbol(),
                    Arc::new(PropertyShowRewriter::new(store.clone(), stats.clone())),
                ),
                HookKind::PdVerifiedShow => host.register_kretprobe(
                    kind.symbol(),
                    Arc::new(PdVerifiedRewriter::new(stats.clone())),
                ),
                HookKind::GlinkWrite => host.register_kprobe(
                    kind.symbol(),
                    Arc::new(GlinkRewriter::new(store.clone(), stats.clone())),
                ),
            };

            let availability = match result {
                Ok(handle) => {
                    info!("{} hook installed on {}", kind.as_str(), kind.symbol());
                    Availability::Registered(handle)
                }
                Err(e) => {
                    warn!("{} hook unavailable, layer disabled: {}", kind.as_str(), e);
                    Availability::Unavailable(e)
                }
            };
            registrations.push(HookRegistration { kind, availability });
        }

        Self {
            host,
            registrations,
        }
    }

    pub fn registrations(&self) -> &[HookRegistration] {
        &self.registrations
    }

    /// Layers currently registered, in install order
    pub fn active(&self) -> Vec<HookKind> {
        self.registrations
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.kind)
            .collect()
    }

    /// Unregister every active layer, newest first.
    ///
    /// Returns the layers removed, in removal order. When this returns, no
    /// handler of this set is still running.
    pub fn remove(&mut self) -> Vec<HookKind> {
        let mut removed = Vec::new();
        while let Some(reg) = self.registrations.pop() {
            let Availability::Registered(handle) = reg.availability else {
                continue;
            };
            match self.host.unregister(handle) {
                Ok(()) => removed.push(reg.kind),
                Err(e) => warn!("Failed to remove {} hook: {}", reg.kind.as_str(), e),
            }
        }
        removed
    }
}

impl Drop for HookSet {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Render a device attribute through the instrumented show path.
///
/// Device errors come back as a negative errno, the way the wrapped
/// renderer reports them. Without a call site the device renders directly.
pub fn show_via(
    site: Option<&CallSite>,
    args: ShowArgs<'_>,
    buf: &mut [u8],
    render: impl FnOnce(&mut [u8]) -> Result<usize, DeviceError>,
) -> isize {
    let wrapped = |_: &ShowArgs<'_>, buf: &mut [u8]| match render(buf) {
        Ok(len) => len as isize,
        Err(e) => -(e.errno() as isize),
    };
    match site {
        Some(site) => site.call_show(args, buf, wrapped),
        None => wrapped(&args, buf),
    }
}
