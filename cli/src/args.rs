//! Launch flags.

use clap::Parser;

/// QBolapp: peer-to-peer LAN messaging over raw Ethernet frames.
#[derive(Parser, Debug)]
#[command(name = "qbolapp", version, about)]
pub struct Args {
    /// Network interface to bind the engine to (e.g. eth0).
    #[arg(short = 'i', long = "interface")]
    pub interface: String,

    /// Display name announced to other peers.
    #[arg(short = 'u', long = "user")]
    pub user: String,

    /// Raise the log filter to `debug`.
    #[arg(long)]
    pub debug: bool,
}
