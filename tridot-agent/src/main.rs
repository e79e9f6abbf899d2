use std::env;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tridot_agent::{AgentConfig, VERSION, build_runtime, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tridot_agent=info".parse()?))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install default crypto provider")?;

    if env::args().any(|arg| arg == "--version" || arg == "-V") {
        println!("tridot-agent {VERSION}");
        return Ok(());
    }

    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    info!(
        version = VERSION,
        control_plane = %config.control_plane.url,
        interface = %config.wireguard.interface_name,
        poll_interval_secs = config.agent.poll_interval_secs,
        "Tridot node agent starting"
    );

    let runtime = match build_runtime(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to initialise agent");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let metrics_task = runtime.metrics_addr.map(|addr| {
        let exporter = runtime.exporter.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, exporter, cancel).await {
                error!(error = %e, "Metrics server stopped");
            }
        })
    });

    let result = runtime.agent.run(cancel.clone()).await;
    cancel.cancel();

    if let Some(task) = metrics_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Metrics task did not shut down cleanly");
        }
    }

    if let Err(e) = result {
        error!(error = %e, "Agent stopped with error");
        std::process::exit(1);
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
