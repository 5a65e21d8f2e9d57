//! 관찰 가능한 브릿지 상태 (single-writer / multi-reader).
//!
//! Supervisor만이 상태 전이 직후 새 스냅샷을 발행하고, 외부 호출자
//! (IPC, 진단)는 읽기 전용 복사본을 받습니다. 스냅샷은 교체될 뿐
//! 제자리에서 변경되지 않습니다.

use serde::Serialize;
use tokio::sync::watch;

/// 외부에 노출되는 불변 상태 뷰
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status_text: String,
    pub last_error: Option<String>,
    pub bound_port: Option<u16>,
    pub pid: Option<u32>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            running: false,
            status_text: "idle".to_string(),
            last_error: None,
            bound_port: None,
            pid: None,
        }
    }
}

/// watch 채널 기반 발행자. Supervisor가 유일한 쓰기 주체입니다.
pub struct StatusPublisher {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::idle());
        Self { tx }
    }

    /// 새 스냅샷으로 교체 (리시버가 없어도 실패하지 않음)
    pub fn publish(&self, snapshot: StatusSnapshot) {
        tracing::debug!(
            "Status: {} (running: {}, port: {:?})",
            snapshot.status_text,
            snapshot.running,
            snapshot.bound_port
        );
        let _ = self.tx.send_replace(snapshot);
    }

    /// 현재 스냅샷의 복사본
    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// 변경 알림 구독 (읽기 전용)
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
