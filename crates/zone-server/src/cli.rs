//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zone-server", version, about = "A SubSpace-protocol zone server")]
pub struct Cli {
    /// Path to the zone's configuration file.
    #[arg(short, long, default_value = "zone.conf")]
    pub config: PathBuf,

    /// Override the primary listener port from the config file.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Run the arena tick and reaper once, then exit — for smoke-testing a
    /// config without holding sockets open.
    #[arg(long)]
    pub dry_run: bool,
}
