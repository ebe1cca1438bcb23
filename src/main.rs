use std::sync::Arc;

use stap_core::config::StapConfig;
use stap_core::ipc::IPCServer;
use stap_core::supervisor::Supervisor;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("stap-core starting");

    let config = match StapConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            StapConfig::default()
        }
    };
    let listen_addr = config.ipc_listen.clone();

    let supervisor = Arc::new(Supervisor::from_config(config)?);
    if let Err(e) = supervisor.initialize().await {
        tracing::warn!("Failed to initialize supervisor: {}", e);
    }

    // Graceful shutdown: Ctrl+C 시 대기 중인 요청을 마치고 타이머/wake lock 반납
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let ipc_server = IPCServer::new(supervisor.clone(), &listen_addr);
    if let Err(e) = ipc_server.start(shutdown).await {
        tracing::error!("IPC server error: {}", e);
    }

    supervisor.shutdown().await;
    tracing::info!("stap-core stopped");
    Ok(())
}
