//! 시스템 이벤트 브릿지.
//!
//! 호스트 알림(볼륨 마운트, 슬립, 웨이크)을 Supervisor 명령으로 변환합니다.
//! 이벤트는 임의의 실행 컨텍스트에서 도착할 수 있으므로 모든 Supervisor
//! 호출은 Supervisor 내부의 직렬화 규칙을 그대로 따릅니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::supervisor::TunnelSupervisor;

/// 외부 알림 시스템이 전달하는 이벤트
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// 새 볼륨이 마운트됨 — 대상 디바이스면 헬퍼 시작 예약
    VolumeMounted(PathBuf),
    /// 시스템이 잠들기 직전 — 헬퍼 즉시 정지
    WillSleep,
    /// 시스템이 깨어남 — 지연 후 헬퍼 재시작
    DidWake,
}

/// 이벤트 주입용 송신 핸들. 플랫폼 알림 글루와 IPC가 공유합니다.
#[derive(Clone)]
pub struct EventFeed {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// 구독자가 없어도 실패하지 않음
    pub fn emit(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// 생성 시 피드를 구독하고 드랍 시 구독 태스크를 중단하는 브릿지.
pub struct EventBridge {
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Subscribe to the feed and start dispatching events to the supervisor.
    pub fn attach(supervisor: Arc<TunnelSupervisor>, feed: &EventFeed) -> Self {
        let mut rx = feed.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatch(&supervisor, event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event bridge lagged, dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        // 구독 해제 보장 — 이미 예약된 지연 태스크까지 강제 취소하지는 않음
        self.task.abort();
    }
}

async fn dispatch(supervisor: &Arc<TunnelSupervisor>, event: SystemEvent) {
    let cfg = supervisor.config();
    match event {
        SystemEvent::VolumeMounted(path) => {
            if !is_target_volume(&path, &cfg.volume_prefixes) {
                tracing::debug!("Ignoring non-target volume mount: {}", path.display());
                return;
            }
            tracing::info!("Target device volume mounted: {}", path.display());
            // 디바이스 열거가 안정될 때까지 잠시 기다렸다가 시작
            supervisor
                .schedule_start(cfg.mount_settle_delay(), None, "device mount")
                .await;
        }
        SystemEvent::WillSleep => {
            tracing::info!("System going to sleep, suspending helper");
            supervisor.stop(false).await;
        }
        SystemEvent::DidWake => {
            tracing::info!("System woke, scheduling helper restart");
            supervisor
                .schedule_start(cfg.wake_delay(), Some(cfg.restart.retry_delay()), "wake")
                .await;
        }
    }
}

/// 마운트된 볼륨 이름이 대상 디바이스 계열 접두사와 일치하는지
fn is_target_volume(path: &Path, prefixes: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}
