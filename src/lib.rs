//! Charging parameter override engine
//!
//! Holds user-chosen targets for a battery and a USB input power supply,
//! pushes them to the devices through the normal property-write path, and
//! rewrites what the charger is told and what userspace reads back so that
//! vendor-side adjustments do not silently win.

pub mod apply;
pub mod config;
pub mod control;
pub mod dbus;
pub mod error;
pub mod gateway;
pub mod interception;
pub mod pd_mode;
pub mod power_supply;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod uevent;

pub use apply::{ApplyReport, Applier};
pub use config::{ConfigStore, DeviceRole, Field};
pub use error::{ControlError, DeviceError, RangeError, SettingsError};
pub use interception::{HookKind, HookSet, RewriteStats};
pub use service::Engine;
pub use settings::Settings;
