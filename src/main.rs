use usbtun_bridge::config::BridgeConfig;
use usbtun_bridge::events::{EventBridge, EventFeed};
use usbtun_bridge::ipc::IPCServer;
use usbtun_bridge::supervisor::TunnelSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("USB tunnel bridge starting");

    let cfg = BridgeConfig::load()?;
    let supervisor = TunnelSupervisor::new(cfg.clone());

    // 시스템 이벤트 피드와 브릿지 연결 (드랍 시 구독 해제)
    let feed = EventFeed::new();
    let _bridge = EventBridge::attach(supervisor.clone(), &feed);

    // 부팅 시 1회 시작 시도 — 디바이스가 없으면 이후 마운트 이벤트가 재개
    match supervisor.start().await {
        Ok(()) => tracing::info!("Tunnel helper running on port {}", cfg.local_port),
        Err(e) => tracing::info!("Tunnel not started yet: {}", e),
    }

    // Graceful shutdown: Ctrl+C / SIGTERM 시 헬퍼 정리
    let supervisor_shutdown = supervisor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, stopping helper...");
        supervisor_shutdown.stop(true).await;
        tracing::info!("Cleanup complete, exiting");
        std::process::exit(0);
    });

    let ipc_server = IPCServer::new(supervisor, feed, &cfg.ipc_listen);
    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("Bridge daemon shutting down");
    Ok(())
}
