//! os-imagetool - discover, transfer and rotate OpenStack images.

use std::process::ExitCode;

use clap::Parser;
use imagetool_core::{CancelFlag, Error};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod args;
mod run;

use args::Args;

const DEFAULT_FILTER: &str = "os_imagetool=info,imagetool_core=info,imagetool_registry=info";
const DEBUG_FILTER: &str = "os_imagetool=debug,imagetool_core=debug,imagetool_registry=debug";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancelFlag::new();
    tokio::spawn(watch_signals(cancel.clone()));

    match run::run(&args, &cancel).await {
        Ok(outcome) => {
            print!("{outcome}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            if err.downcast_ref::<Error>().is_some_and(Error::is_interrupted) {
                eprintln!("User interrupt");
            } else {
                eprintln!("ERROR: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Cancels on the first SIGINT/SIGTERM and exits on the second.
async fn watch_signals(cancel: CancelFlag) {
    loop {
        if let Err(err) = interrupted().await {
            warn!("Error whilst waiting for signals: {err}");
            return;
        }
        if cancel.is_cancelled() {
            eprintln!("User interrupt");
            std::process::exit(1);
        }
        warn!("Interrupt received, stopping");
        cancel.cancel();
    }
}

#[cfg(unix)]
async fn interrupted() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn interrupted() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
