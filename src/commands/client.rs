//! D-Bus client commands for a running daemon.

use anyhow::Context;
use chg_override::dbus::{BUS_NAME, INTERFACE, OBJECT_PATH};

use super::CommandResult;

/// Helper to create a D-Bus proxy for the daemon.
async fn control_proxy(session: bool) -> anyhow::Result<zbus::Proxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await?
    } else {
        zbus::Connection::system().await?
    };
    let proxy = zbus::Proxy::new_owned(conn, BUS_NAME, OBJECT_PATH, INTERFACE)
        .await
        .context("Failed to reach chg-override daemon")?;
    Ok(proxy)
}

/// Send a batch.
pub async fn write(session: bool, batch: &str) -> CommandResult {
    let proxy = control_proxy(session).await?;
    proxy.call_method("Write", &(batch,)).await?;
    println!("OK");
    Ok(())
}

/// Print current targets.
pub async fn read(session: bool) -> CommandResult {
    let proxy = control_proxy(session).await?;
    let reply = proxy.call_method("Read", &()).await?;
    let status: String = reply.body().deserialize()?;
    print!("{status}");
    Ok(())
}

/// Print an attribute as the daemon's show path renders it.
pub async fn show(session: bool, device: &str, attr: &str) -> CommandResult {
    let proxy = control_proxy(session).await?;
    let reply = proxy.call_method("Show", &(device, attr)).await?;
    let text: String = reply.body().deserialize()?;
    print!("{text}");
    Ok(())
}

/// List interception layers and their state.
pub async fn hooks(session: bool) -> CommandResult {
    let proxy = control_proxy(session).await?;
    let reply = proxy.call_method("Hooks", &()).await?;
    let hooks: Vec<String> = reply.body().deserialize()?;

    if hooks.is_empty() {
        println!("No interception layers installed.");
    } else {
        for hook in hooks {
            println!("{hook}");
        }
    }
    Ok(())
}
