//! Power supply change notifications (udev)

use std::io;

use futures::StreamExt;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};
use tracing::debug;

/// Subsystem the monitor listens on
pub const SUBSYSTEM: &str = "power_supply";

/// A device's properties changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerSupplyEvent {
    /// Device name (sysfs directory name)
    pub name: String,
}

/// udev monitor on the power_supply subsystem
pub struct UdevSource {
    socket: AsyncMonitorSocket,
}

impl UdevSource {
    pub fn open() -> io::Result<Self> {
        let socket = MonitorBuilder::new()?
            .match_subsystem(SUBSYSTEM)?
            .listen()?;
        Ok(Self {
            socket: AsyncMonitorSocket::new(socket)?,
        })
    }

    /// Next `change` event. `None` once the monitor is gone.
    pub async fn next_event(&mut self) -> Option<PowerSupplyEvent> {
        while let Some(item) = self.socket.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    debug!("udev monitor error: {}", e);
                    continue;
                }
            };
            if event.event_type() != EventType::Change {
                continue;
            }
            let name = event.sysname().to_string_lossy().into_owned();
            debug!("power_supply change: {}", name);
            return Some(PowerSupplyEvent { name });
        }
        None
    }
}
