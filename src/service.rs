//! Override engine assembly and daemon lifecycle

use std::io;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use psy_probes::{symbol, CallSite, ProbeHost, ShowArgs};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::apply::{ApplyReport, Applier};
use crate::config::{ConfigStore, DeviceRole};
use crate::control;
use crate::dbus;
use crate::error::{ControlError, DeviceError, RangeError};
use crate::interception::{self, HookKind, HookSet, RewriteStats};
use crate::pd_mode::{ProtocolModeControl, SysfsProtocolMode};
use crate::power_supply::{PowerSupplyClass, SysfsPowerSupplyClass};
use crate::scheduler::ReapplyScheduler;
use crate::settings::Settings;
use crate::uevent::{PowerSupplyEvent, UdevSource};

/// Output buffer handed to attribute renderers (one page, like sysfs)
pub const SHOW_BUF_LEN: usize = 4096;

/// Class and attribute the vendor PD flag is shown under
/// Device and attribute under which the PD verification flag is shown
pub const PD_CLASS: &str = "qcom-battery";
pub const PD_ATTR: &str = "pd_verifed";

/// Store, applier and installed hooks, shared by every control surface
pub struct Engine {
    store: Arc<ConfigStore>,
    supplies: Arc<dyn PowerSupplyClass>,
    applier: Arc<Applier>,
    stats: Arc<RewriteStats>,
    host: Arc<ProbeHost>,
    hooks: Mutex<Option<HookSet>>,
}

impl Engine {
    /// Build the engine and install every hook `host` can resolve
    pub fn new(
        store: Arc<ConfigStore>,
        supplies: Arc<dyn PowerSupplyClass>,
        protocol: Option<Arc<dyn ProtocolModeControl>>,
        host: Arc<ProbeHost>,
    ) -> Self {
        let stats = Arc::new(RewriteStats::new());
        let applier = Arc::new(Applier::new(
            Arc::clone(&store),
            Arc::clone(&supplies),
            protocol,
        ));
        let hooks = HookSet::install(host.clone(), Arc::clone(&store), Arc::clone(&stats));

        Self {
            store,
            supplies,
            applier,
            stats,
            host,
            hooks: Mutex::new(Some(hooks)),
        }
    }

    /// Copy device names and flags from settings into the store
    pub fn configure(&self, settings: &Settings) -> Result<(), RangeError> {
        let mut guard = self.store.lock();
        guard.set_device_name(DeviceRole::Battery, &settings.battery)?;
        guard.set_device_name(DeviceRole::UsbInput, &settings.usb)?;
        guard.set_auto_reapply(settings.auto_reapply);
        Ok(())
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn applier(&self) -> Arc<Applier> {
        Arc::clone(&self.applier)
    }

    pub fn stats(&self) -> Arc<RewriteStats> {
        Arc::clone(&self.stats)
    }

    /// Control-channel write
    pub fn write_batch(&self, batch: &str) -> Result<ApplyReport, ControlError> {
        control::execute(&self.applier, batch)
    }

    /// Control-channel read
    pub fn read(&self) -> String {
        control::read_status(&self.store)
    }

    /// Read `device/attr` through the instrumented renderer.
    ///
    /// `qcom-battery/pd_verifed` goes to the PD verification renderer.
    pub fn show(&self, device: &str, attr: &str) -> Result<String, DeviceError> {
        if device == PD_CLASS && attr == PD_ATTR {
            return self.show_pd_verifed();
        }
        let dev = self
            .supplies
            .get_by_name(device)
            .ok_or_else(|| DeviceError::NotFound(device.to_string()))?;
        let site = self.host.lookup(symbol::POWER_SUPPLY_SHOW_PROPERTY);
        self.render(site.as_deref(), ShowArgs { device, attr }, |buf| {
            dev.show(attr, buf)
        })
    }

    /// Read the vendor PD verification flag through its instrumented renderer
    fn show_pd_verifed(&self) -> Result<String, DeviceError> {
        let protocol = self
            .applier
            .protocol()
            .ok_or_else(|| DeviceError::NotFound(PD_ATTR.to_string()))?;
        let site = self.host.lookup(symbol::PD_VERIFED_SHOW);
        let args = ShowArgs {
            device: PD_CLASS,
            attr: PD_ATTR,
        };
        self.render(site.as_deref(), args, |buf| {
            let text: &[u8] = match protocol.read()? {
                Some(true) => b"1\n",
                Some(false) => b"0\n",
                None => {
                    return Err(DeviceError::NotSupported {
                        device: PD_CLASS.to_string(),
                        property: PD_ATTR.to_string(),
                    })
                }
            };
            let out = buf
                .get_mut(..text.len())
                .ok_or_else(|| DeviceError::InvalidValue("buffer too small".into()))?;
            out.copy_from_slice(text);
            Ok(text.len())
        })
    }

    fn render(
        &self,
        site: Option<&CallSite>,
        args: ShowArgs<'_>,
        render: impl FnOnce(&mut [u8]) -> Result<usize, DeviceError>,
    ) -> Result<String, DeviceError> {
        let mut buf = vec![0u8; SHOW_BUF_LEN];
        let ret = interception::show_via(site, args, &mut buf, render);
        if ret < 0 {
            let errno = i32::try_from(-ret).unwrap_or(libc::EIO);
            return Err(io::Error::from_raw_os_error(errno).into());
        }
        let len = (ret as usize).min(buf.len());
        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// Layers currently installed
    pub fn active_hooks(&self) -> Vec<HookKind> {
        self.hooks
            .lock()
            .as_ref()
            .map(HookSet::active)
            .unwrap_or_default()
    }

    /// One line per layer: `<layer>: active` or `<layer>: unavailable (<why>)`.
    ///
    /// Empty once the hooks are removed.
    pub fn hook_status(&self) -> Vec<String> {
        self.hooks
            .lock()
            .as_ref()
            .map(|hooks| {
                hooks
                    .registrations()
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unregister all hooks (reverse install order). Idempotent.
    pub fn remove_hooks(&self) -> Vec<HookKind> {
        match self.hooks.lock().take() {
            Some(mut hooks) => hooks.remove(),
            None => Vec::new(),
        }
    }
}

async fn next_change(source: &mut Option<UdevSource>) -> Option<PowerSupplyEvent> {
    match source {
        Some(source) => source.next_event().await,
        None => std::future::pending().await,
    }
}

/// Run the override daemon until Ctrl-C.
///
/// - Installs the show hooks on the in-process host
/// - Applies the startup batch, if any
/// - Feeds udev change events to the reapply scheduler
/// - Serves the control interface on D-Bus
///
/// Teardown order: control surface, scheduler (waits for in-flight applies),
/// hooks in reverse order.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let store = Arc::new(ConfigStore::new());
    let supplies: Arc<dyn PowerSupplyClass> =
        Arc::new(SysfsPowerSupplyClass::new(&settings.power_supply_root));

    let protocol = SysfsProtocolMode::probe(&settings.pd_verifed_path)
        .map(|p| Arc::new(p) as Arc<dyn ProtocolModeControl>);
    if protocol.is_none() {
        warn!(
            "{} not present, pd_verifed control disabled",
            settings.pd_verifed_path.display()
        );
    }

    // Only the render paths this process owns are resolvable
    let host = Arc::new(ProbeHost::new());
    host.define(symbol::POWER_SUPPLY_SHOW_PROPERTY);
    if protocol.is_some() {
        host.define(symbol::PD_VERIFED_SHOW);
    }

    let engine = Arc::new(Engine::new(store, supplies, protocol, host));
    engine
        .configure(&settings)
        .context("Invalid device names in settings")?;
    info!(
        "Tracking battery={} usb={}, hooks: {:?}",
        settings.battery,
        settings.usb,
        engine.active_hooks()
    );

    if let Some(batch) = &settings.initial {
        let report = engine
            .write_batch(batch)
            .context("Invalid startup batch")?;
        info!("Startup batch applied ({} writes)", report.attempted);
    }

    let (events_tx, events_rx) = broadcast::channel(64);
    let scheduler = ReapplyScheduler::start(
        engine.applier(),
        events_rx,
        engine.stats(),
        settings.scheduler_config(),
    );

    let mut udev = match UdevSource::open() {
        Ok(source) => Some(source),
        Err(e) => {
            warn!("udev monitor unavailable, heartbeat only: {}", e);
            None
        }
    };

    let stop = Arc::new(Notify::new());
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_handler.notify_one())
        .context("Failed to install Ctrl-C handler")?;

    let conn = match dbus::serve(Arc::clone(&engine), settings.bus).await {
        Ok(conn) => {
            info!("D-Bus: {} on {:?} bus", dbus::BUS_NAME, settings.bus);
            Some(conn)
        }
        Err(e) => {
            warn!("D-Bus control interface unavailable: {}", e);
            None
        }
    };

    info!("Ready. Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            event = next_change(&mut udev) => match event {
                Some(event) => {
                    // No receiver only if the scheduler is gone
                    let _ = events_tx.send(event);
                }
                None => {
                    warn!("udev monitor closed, heartbeat only");
                    udev = None;
                }
            },
        }
    }

    info!("Shutting down");
    drop(conn);
    drop(events_tx);
    scheduler.shutdown().await;
    let removed = engine.remove_hooks();
    debug!("Removed hooks: {:?}", removed);
    info!("Done.");
    Ok(())
}
