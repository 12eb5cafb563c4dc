use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use procherd::{FleetConfig, Supervisor};
use tracing_subscriber::EnvFilter;

/// Run a fleet of dependent processes described by a TOML file.
#[derive(Debug, Parser)]
#[command(name = "procherd", version)]
struct Cli {
	/// Fleet file
	#[arg(short, long, default_value = "procherd.toml")]
	config: PathBuf,

	/// Log filter, e.g. "info" or "procherd=debug". Overrides RUST_LOG.
	#[arg(long)]
	log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let filter = match &cli.log_level {
		Some(level) => EnvFilter::new(level),
		None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
	};
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

	let config = match FleetConfig::load(&cli.config) {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("{}", e);
			return ExitCode::FAILURE;
		}
	};

	let supervisor = Supervisor::new(config.supervisor_config());
	for spec in config.specs() {
		if let Err(e) = supervisor.register(spec).await {
			tracing::error!("{}", e);
			return ExitCode::FAILURE;
		}
	}

	if let Err(e) = supervisor.start().await {
		tracing::error!("{}", e);
		return ExitCode::FAILURE;
	}
	tracing::info!(pid = std::process::id(), "supervisor running");

	tokio::select! {
		_ = supervisor.wait() => {
			tracing::info!("all processes have exited");
		}
		res = wait_for_shutdown_signal() => match res {
			Ok(()) => tracing::info!("shutting down"),
			Err(e) => {
				tracing::error!("failed to install signal handlers: {}", e);
				supervisor.wait().await;
			}
		},
	}

	// settles output relays even when every process already exited
	supervisor.stop().await;

	ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
	use tokio::signal::unix::{signal, SignalKind};

	let mut sigterm = signal(SignalKind::terminate())?;
	let mut sigquit = signal(SignalKind::quit())?;

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {},
		_ = sigterm.recv() => {},
		_ = sigquit.recv() => {},
	}
	Ok(())
}
