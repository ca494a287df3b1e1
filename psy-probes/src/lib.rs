//! Instrumentation boundary for power-supply overrides
//!
//! This crate provides what an override engine needs from its host
//! environment, without knowing anything about override policy:
//!
//! - `ProbeHost` / `CallSite`: in-process call-site instrumentation with
//!   entry/return probes and per-call scratch records
//! - `InstrumentationHost`: the registration capability, so engines can be
//!   pointed at other hosts
//! - `glink`: the PMIC Glink battery-charger message layout

pub mod error;
pub mod glink;
pub mod host;
pub mod scratch;

pub use error::ProbeError;
pub use glink::{ChargerRequest, GlinkHeader};
pub use host::{
    CallSite, InstrumentationHost, PreHandler, ProbeHandle, ProbeHost, ProbeKind, ReturnHandler,
    ReturnSlot, ShowArgs, SiteStats,
};
pub use scratch::{FixedStr, InvocationScratch, ATTR_NAME_CAP, DEVICE_NAME_CAP};

/// Well-known symbols of the intercepted subsystem
pub mod symbol {
    /// Transmit path to the power-management coprocessor
    pub const PMIC_GLINK_WRITE: &str = "pmic_glink_write";
    /// Generic power-supply attribute renderer
    pub const POWER_SUPPLY_SHOW_PROPERTY: &str = "power_supply_show_property";
    /// Vendor class attribute renderer for the PD verification flag
    pub const PD_VERIFED_SHOW: &str = "pd_verifed_show";
}
