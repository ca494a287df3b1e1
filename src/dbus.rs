//! D-Bus control interface.
//!
//! Bus name: `org.chgoverride.Control1`
//! Object path: `/org/chgoverride/Control1`

use std::sync::Arc;

use tracing::{debug, info};
use zbus::{fdo, interface, Connection};

use crate::service::Engine;
use crate::settings::BusKind;

pub const BUS_NAME: &str = "org.chgoverride.Control1";
pub const OBJECT_PATH: &str = "/org/chgoverride/Control1";
pub const INTERFACE: &str = "org.chgoverride.Control1";

/// D-Bus view of the override engine
pub struct ControlInterface {
    engine: Arc<Engine>,
}

impl ControlInterface {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.chgoverride.Control1")]
impl ControlInterface {
    /// Apply a `key=value` batch. Rejected as a whole on any invalid line.
    async fn write(&self, batch: String) -> fdo::Result<()> {
        let engine = Arc::clone(&self.engine);
        let report = tokio::task::spawn_blocking(move || engine.write_batch(&batch))
            .await
            .map_err(|e| fdo::Error::Failed(format!("apply task failed: {e}")))?
            .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))?;

        if report.is_clean() {
            debug!("Batch applied ({} writes)", report.attempted);
        } else {
            info!(
                "Batch applied with errors: {} of {} writes failed, missing {:?}, pd failed {}",
                report.failed, report.attempted, report.missing, report.protocol_failed
            );
        }
        Ok(())
    }

    /// Current targets, one `key=value` per line
    async fn read(&self) -> fdo::Result<String> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.read())
            .await
            .map_err(|e| fdo::Error::Failed(format!("read task failed: {e}")))
    }

    /// Read one attribute through the instrumented show path
    async fn show(&self, device: String, attr: String) -> fdo::Result<String> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.show(&device, &attr))
            .await
            .map_err(|e| fdo::Error::Failed(format!("show task failed: {e}")))?
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Interception layers and whether each one is installed
    async fn hooks(&self) -> Vec<String> {
        self.engine.hook_status()
    }
}

/// Claim the bus name and export the interface.
///
/// The returned connection keeps serving until dropped.
pub async fn serve(engine: Arc<Engine>, bus: BusKind) -> zbus::Result<Connection> {
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, ControlInterface::new(engine))?
        .build()
        .await
}
