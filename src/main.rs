//! chg-override CLI
//!
//! Runs the override daemon or talks to a running one.

use anyhow::{Context, Result};
use clap::Parser;

mod cli;
use cli::{batch_of, Cli, Commands};

mod commands;

use chg_override::settings::{BusKind, Settings};

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if cli.session {
        settings.bus = BusKind::Session;
    }
    setup_logging(cli.verbose || settings.verbose);

    let session = settings.bus == BusKind::Session;

    match cli.command {
        Commands::Serve {
            battery,
            usb,
            no_auto_reapply,
        } => {
            if let Some(battery) = battery {
                settings.battery = battery;
            }
            if let Some(usb) = usb {
                settings.usb = usb;
            }
            if no_auto_reapply {
                settings.auto_reapply = false;
            }
            settings.validate()?;
            chg_override::service::run(settings).await?;
        }
        Commands::Write { assignments } => {
            commands::client::write(session, &batch_of(&assignments)).await?;
        }
        Commands::Read => {
            commands::client::read(session).await?;
        }
        Commands::Show { device, attr } => {
            commands::client::show(session, &device, &attr).await?;
        }
        Commands::Hooks => {
            commands::client::hooks(session).await?;
        }
        Commands::Apply {
            assignments,
            root,
            pd_path,
        } => {
            if let Some(root) = root {
                settings.power_supply_root = root;
            }
            if let Some(pd_path) = pd_path {
                settings.pd_verifed_path = pd_path;
            }
            commands::apply::run(&settings, &batch_of(&assignments))?;
        }
    }

    Ok(())
}
