//! OpenBDR native messaging host binary.
//!
//! Browsers start the host themselves and talk to it over stdin/stdout, so
//! stdout carries nothing but framed replies and all diagnostics go to
//! stderr.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=bdr_host=debug bdr-host --home ~/.openbdr
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bdr_config::AgentPaths;
use bdr_host::framing::DEFAULT_MAX_FRAME_BYTES;
use bdr_host::{serve, telemetry, Host, HostError, ServeOptions};
use bdr_logs::SystemClock;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bdr-host")]
#[command(about = "OpenBDR native messaging host")]
#[command(version)]
struct Cli {
    /// Directory holding config.json, state.json and the default log tree
    #[arg(long, env = "OPENBDR_HOME")]
    home: Option<PathBuf>,

    /// Largest accepted incoming message in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Launch arguments passed by the browser (extension origin or manifest path)
    #[arg(hide = true)]
    browser_args: Vec<String>,

    /// Parent window handle, passed by some browsers on Windows
    #[arg(long, hide = true)]
    parent_window: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cli = Cli::parse();

    let home = match cli.home {
        Some(home) => home,
        None => AgentPaths::default_home().context("cannot determine the home directory")?,
    };
    let paths = AgentPaths::from_home(home);
    info!(
        home = %paths.home.display(),
        caller = ?cli.browser_args,
        parent_window = ?cli.parent_window,
        "bdr-host starting"
    );

    let host = Host::open(paths, Arc::new(SystemClock));
    let options = ServeOptions {
        max_frame_bytes: cli.max_frame_bytes,
        flush_interval: host.flush_interval().max(Duration::from_millis(100)),
    };

    match serve(tokio::io::stdin(), tokio::io::stdout(), host, options, shutdown_signal()).await {
        Ok(()) => {}
        // A broken pipe means the browser went away; the log is already closed.
        Err(HostError::Io(e)) => warn!(error = %e, "transport closed"),
        Err(e) => return Err(e.into()),
    }

    info!("bdr-host stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }
}
