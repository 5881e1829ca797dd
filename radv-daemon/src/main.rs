//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use nix::unistd::Uid;
use radv::config::Config;
use radv::daemon::Daemon;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

// How long a SIGHUP-triggered reload may take before it is abandoned.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("radv=debug".parse().unwrap())
        .from_env_lossy();
    let stdout = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

async fn run(config_file: String, config: Config) {
    let daemon = match Daemon::new(config) {
        Ok(daemon) => Arc::new(daemon),
        Err(error) => {
            error!(%error, "invalid configuration");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();

    // SIGINT/SIGTERM trigger a graceful shutdown, SIGHUP a reload.
    {
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut sigint = signal(SignalKind::interrupt())
                .expect("failed to register signal handler");
            let mut sigterm = signal(SignalKind::terminate())
                .expect("failed to register signal handler");
            let mut sighup = signal(SignalKind::hangup())
                .expect("failed to register signal handler");
            loop {
                tokio::select! {
                    _ = sigint.recv() => break,
                    _ = sigterm.recv() => break,
                    _ = sighup.recv() => {
                        info!("reloading configuration");
                        match Config::from_yaml_file(&config_file) {
                            Ok(config) => {
                                let deadline =
                                    Instant::now() + RELOAD_TIMEOUT;
                                if let Err(error) =
                                    daemon.reload(deadline, config).await
                                {
                                    warn!(%error, "reload failed");
                                }
                            }
                            Err(error) => {
                                warn!(%error, "reload failed");
                            }
                        }
                    }
                }
            }
            cancel.cancel();
        });
    }

    daemon.run(cancel).await;
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = Command::new("radvd")
        .about("IPv6 Router Advertisement daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("file")
                .default_value("/etc/radvd.yaml")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .cloned()
        .expect("config has a default value");

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing();

    // Read configuration file.
    let config = match Config::from_yaml_file(&config_file) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, file = %config_file, "failed to load configuration");
            std::process::exit(1);
        }
    };

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config_file, config));
}
