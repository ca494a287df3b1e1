// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chg-override")]
#[command(author, version, about = "Charging parameter override daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (default: /etc/chg-override/config.toml if present)
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Use the session bus instead of the system bus
    #[arg(long, global = true)]
    pub session: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the override daemon
    #[command(visible_alias = "daemon")]
    Serve {
        /// Battery power supply name
        #[arg(long)]
        battery: Option<String>,

        /// USB input power supply name
        #[arg(long)]
        usb: Option<String>,

        /// Disable heartbeat re-apply after a pd_verifed reset
        #[arg(long)]
        no_auto_reapply: bool,
    },

    /// Send a key=value batch to the daemon
    #[command(visible_alias = "w")]
    Write {
        /// Assignments, e.g. "voltage_max=4460000" "icl=1500000"
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Print the daemon's current targets
    #[command(visible_alias = "r")]
    Read,

    /// Read an attribute through the daemon's instrumented show path
    Show {
        /// Power supply name
        device: String,
        /// Attribute name, e.g. voltage_max
        attr: String,
    },

    /// List installed interception layers
    Hooks,

    /// Apply a batch once, directly to sysfs, without a daemon
    Apply {
        /// Assignments, e.g. "ccc=6000000"
        #[arg(required = true)]
        assignments: Vec<String>,

        /// Power supply class directory
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// pd_verifed node
        #[arg(long, value_name = "FILE")]
        pd_path: Option<PathBuf>,
    },
}

/// Join CLI assignments into one control-channel batch
pub fn batch_of(assignments: &[String]) -> String {
    assignments.join("\n")
}
