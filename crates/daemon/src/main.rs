// SPDX-License-Identifier: MIT

use bitk_daemon::{init_logging, Config, Daemon};

#[tokio::main]
async fn main() {
    let config = Config::load();
    init_logging(&config);
    tracing::info!(service = %config.service_name, "starting bitk daemon");

    let daemon = match Daemon::startup(config.clone()).await {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("failed to start bitk daemon: {e}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind("0.0.0.0:4756").await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "listening");
    let router = daemon.axum_router.clone();
    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
