//! CLI surface (spec §6 additions): `up` brings an interface up; `route show`
//! is a thin client for the control RPC's read-only route listing, grounded
//! on `original_source/cli/up.go`'s `GlobalFlags` (config path + interface
//! name). The full init/peers/status subcommand surface is out of scope.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hyprspace", about = "Hyprspace: a peer-to-peer mesh VPN daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create and bring up a Hyprspace interface.
    Up(UpArgs),
    /// Control-RPC operations against a running interface.
    Route(RouteArgs),
}

#[derive(Parser)]
pub struct UpArgs {
    /// Network interface name (default: "hyprspace").
    #[arg(short = 'i', long, default_value = "hyprspace")]
    pub interface: String,
    /// Path to the JSON config file (default: /etc/hyprspace/<interface>.json).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Parser)]
pub struct RouteArgs {
    #[command(subcommand)]
    pub action: RouteAction,
    /// Network interface whose control socket to dial (default: "hyprspace").
    #[arg(short = 'i', long, default_value = "hyprspace")]
    pub interface: String,
}

#[derive(Subcommand)]
pub enum RouteAction {
    /// List the routes currently installed.
    Show,
}
