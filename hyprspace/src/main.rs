//! Hyprspace daemon entry point: CLI dispatch, logging setup, and signal
//! handling for an up'd interface, grounded on
//! `original_source/cli/up.go`'s two-channel `signal.Notify` pattern
//! (`SIGINT`/`SIGTERM`/`SIGHUP`/`SIGQUIT` for orderly shutdown,
//! `SIGUSR1` to rebootstrap discovery).

mod cli;
mod config;
mod route_client;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, RouteAction};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::layer;

#[tokio::main]
async fn main() {
    // Enforce errors only being printed on a single line, per the anyhow docs'
    // recommended technique: by default anyhow prints a stacktrace on exit,
    // which reads as a crash rather than a clean fatal error.
    if let Err(e) = try_main().await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    hyprspace_logging::setup_global_subscriber(layer::Identity::new());
    let cli = Cli::parse();

    match cli.command {
        Command::Up(args) => run_up(args).await,
        Command::Route(args) => run_route(args).await,
    }
}

async fn run_up(args: cli::UpArgs) -> Result<()> {
    let node = supervisor::start(args.interface.clone(), args.config)
        .await
        .with_context(|| format!("bringing up interface {}", args.interface))?;

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    tracing::info!(interface = %args.interface, "up");

    tokio::select! {
        _ = term.recv() => tracing::info!("received sigterm"),
        _ = int.recv() => tracing::info!("received sigint"),
        _ = hup.recv() => tracing::info!("received sighup"),
        _ = quit.recv() => tracing::info!("received sigquit"),
        _ = rebootstrap_forever(&mut usr1, &node) => {}
    }

    // A second shutdown signal while teardown is already in flight forces an
    // immediate exit rather than waiting on a stream that may be stuck.
    tokio::select! {
        _ = node.shutdown() => {}
        _ = term.recv() => std::process::exit(130),
        _ = int.recv() => std::process::exit(130),
    }

    Ok(())
}

/// Runs forever, re-bootstrapping discovery on every `SIGUSR1` (spec §4.9,
/// §4.4). Only returns if the signal stream itself errors out.
async fn rebootstrap_forever(
    usr1: &mut tokio::signal::unix::Signal,
    node: &supervisor::Supervisor,
) {
    loop {
        if usr1.recv().await.is_none() {
            return;
        }
        tracing::info!("rebootstrapping on sigusr1");
        node.rediscover();
    }
}

async fn run_route(args: cli::RouteArgs) -> Result<()> {
    match args.action {
        RouteAction::Show => {
            let socket = hyprspace_rpc::socket_path(&args.interface);
            route_client::route_show(&socket)
                .await
                .with_context(|| format!("listing routes on interface {}", args.interface))
        }
    }
}
