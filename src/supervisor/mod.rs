pub mod error;
pub mod handle;
pub mod state_machine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::device;
use crate::helper_locator;
use crate::process_monitor;
use crate::status::{StatusPublisher, StatusSnapshot};
use error::SupervisorError;
use handle::{ExitEvent, HelperHandle};
use state_machine::{classify_exit, LifecycleState, StateMachine, TerminationReason};

/// 스폰 후 포트 도달성 진단까지 기다리는 시간
const PORT_PROBE_DELAY: Duration = Duration::from_secs(1);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervisor가 단독으로 변경하는 내부 상태.
/// 핸들, 상태 기계, 예약된 재시작은 전부 하나의 뮤텍스 뒤에서만 변경됩니다 —
/// 수동 stop()과 크래시 재시작이 경합해도 살아 있는 헬퍼는 최대 하나.
struct Inner {
    machine: StateMachine,
    handle: Option<HelperHandle>,
    /// 스폰마다 증가 — 늦게 도착한 exit 통지/예약 재시작의 세대 검사용
    generation: u64,
    /// 예약된 지연 시작 태스크. start()/stop()이 취소합니다.
    pending_restart: Option<JoinHandle<()>>,
    status_text: String,
    last_error: Option<String>,
}

impl Inner {
    fn cancel_pending_restart(&mut self) {
        if let Some(task) = self.pending_restart.take() {
            task.abort();
            tracing::debug!("Cancelled pending scheduled restart");
        }
    }
}

/// 터널 헬퍼 프로세스의 수명 주기를 소유하는 Supervisor.
///
/// start/stop/exit 처리/이벤트 브릿지 명령은 모두 내부 뮤텍스로 직렬화되고,
/// 상태 변화는 StatusPublisher를 통해 스냅샷으로만 노출됩니다.
pub struct TunnelSupervisor {
    cfg: BridgeConfig,
    inner: Mutex<Inner>,
    /// start() 재진입 방지 게이트 — 진행 중이면 즉시 거부
    start_gate: AtomicBool,
    status: StatusPublisher,
    exit_tx: mpsc::Sender<ExitEvent>,
    /// 백그라운드 태스크가 자신을 소유 참조로 승격할 때 사용
    weak: Weak<Self>,
}

/// start_gate 해제 보장용 가드
struct GateGuard<'a>(&'a AtomicBool);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TunnelSupervisor {
    /// Supervisor를 만들고 exit 통지 소비 태스크를 시작합니다.
    /// 반드시 tokio 런타임 안에서 호출해야 합니다.
    pub fn new(cfg: BridgeConfig) -> Arc<Self> {
        let (exit_tx, mut exit_rx) = mpsc::channel::<ExitEvent>(16);

        let supervisor = Arc::new_cyclic(|weak| Self {
            cfg,
            inner: Mutex::new(Inner {
                machine: StateMachine::new(),
                handle: None,
                generation: 0,
                pending_restart: None,
                status_text: "idle".to_string(),
                last_error: None,
            }),
            start_gate: AtomicBool::new(false),
            status: StatusPublisher::new(),
            exit_tx,
            weak: weak.clone(),
        });

        // exit-watcher들이 보내는 종료 통지를 단일 소비자로 처리
        let weak = Arc::downgrade(&supervisor);
        tokio::spawn(async move {
            while let Some(event) = exit_rx.recv().await {
                let Some(sup) = weak.upgrade() else { break };
                sup.handle_exit(event).await;
            }
        });

        supervisor
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    /// 현재 상태 스냅샷 (읽기 전용 복사본)
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// 상태 변경 알림 구독
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Start the tunnel helper.
    ///
    /// 진행 중인 start가 있으면 `StartInProgress`로 거부합니다. 성공 시
    /// 스폰 직후 반환하며 프로세스 수명을 기다리지 않습니다.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.start_gate.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::StartInProgress);
        }
        let _gate = GateGuard(&self.start_gate);
        self.start_inner().await
    }

    async fn start_inner(&self) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;

        // (1) 기존 인스턴스가 있으면 강제 정리 (idempotent)
        self.stop_locked(&mut inner, true).await;

        let _ = inner.machine.transition(LifecycleState::Starting);
        inner.status_text = "starting".to_string();
        self.publish_locked(&inner);

        // (2) 디바이스 확인 — 확실히 없을 때만 거부
        let probe = device::probe_attached_devices(&self.cfg.device_lister).await;
        if probe.definitively_absent() {
            let err = SupervisorError::NoDeviceConnected;
            self.fail_start_locked(&mut inner, &err);
            return Err(err);
        }

        // (3) 헬퍼 실행 파일 탐색
        let helper = match helper_locator::locate_helper(&self.cfg) {
            Ok(path) => path,
            Err(err) => {
                self.fail_start_locked(&mut inner, &err);
                return Err(err);
            }
        };

        // (4) 스폰 — 로컬 바인드 포트와 디바이스 포트 두 인수
        let generation = inner.generation + 1;
        match HelperHandle::spawn(
            &helper,
            self.cfg.local_port,
            self.cfg.device_port,
            generation,
            self.exit_tx.clone(),
        ) {
            Ok(new_handle) => {
                inner.generation = generation;
                inner.handle = Some(new_handle);
                inner.last_error = None;
                let _ = inner.machine.transition(LifecycleState::Running);
                inner.status_text = format!("running on port {}", self.cfg.local_port);
                self.publish_locked(&inner);

                // (6) best-effort 포트 도달성 진단 — 실패해도 상태는 바뀌지 않음
                self.spawn_port_probe(generation);
                Ok(())
            }
            Err(e) => {
                let err = SupervisorError::SpawnFailed(e);
                self.fail_start_locked(&mut inner, &err);
                Err(err)
            }
        }
    }

    /// Stop the tunnel helper. Idempotent — 이미 정지 상태면 no-op.
    ///
    /// `manual`은 운영자 요청과 시스템 유발 정지(슬립)를 상태 문구에서
    /// 구분하기 위한 플래그로, 종료 상태 자체는 동일합니다.
    pub async fn stop(&self, manual: bool) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, manual).await;
    }

    async fn stop_locked(&self, inner: &mut Inner, manual: bool) {
        inner.cancel_pending_restart();

        // (1) 이전 수퍼바이저 인스턴스가 남긴 고아를 시그니처로 정리 (best-effort)
        process_monitor::sweep_orphans_async(
            &self.cfg.helper_name,
            &self.cfg.local_port.to_string(),
        )
        .await;

        let was_live = inner.handle.is_some()
            || matches!(
                inner.machine.state(),
                LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
            );

        // (2) 소유한 핸들 종료 후 (3) 해제
        if let Some(helper) = inner.handle.take() {
            if let Err(e) = helper.terminate() {
                tracing::warn!("Failed to terminate helper: {}", e);
            }
        }

        if !was_live {
            // 이미 정지 상태 — 상태 전이 없이 종료
            return;
        }

        // (4) Stopped 전이, 바인드 포트 해제
        if inner.machine.can_transition(&LifecycleState::Stopping) {
            let _ = inner.machine.transition(LifecycleState::Stopping);
        }
        let _ = inner
            .machine
            .transition(LifecycleState::Stopped(TerminationReason::ManualStop));
        inner.status_text = if manual {
            "stopped (manual)".to_string()
        } else {
            "suspended (sleep)".to_string()
        };
        self.publish_locked(inner);
    }

    /// 지연 시작 예약 — 크래시 재시작, 웨이크 복귀, 마운트 후 시작이 전부
    /// 이 단일 취소 가능 슬롯을 공유합니다.
    ///
    /// `retry`가 있으면 1차 시도 실패 후 해당 지연만큼 기다렸다가 정확히
    /// 한 번 더 시도합니다 (2단계 재시도 — 재시작 폭주 방지).
    pub async fn schedule_start(
        &self,
        delay: Duration,
        retry: Option<Duration>,
        why: &'static str,
    ) {
        let mut inner = self.inner.lock().await;
        self.schedule_start_locked(&mut inner, delay, retry, why);
    }

    fn schedule_start_locked(
        &self,
        inner: &mut Inner,
        delay: Duration,
        retry: Option<Duration>,
        why: &'static str,
    ) {
        inner.cancel_pending_restart();

        let Some(sup) = self.weak.upgrade() else {
            return;
        };
        let expected_gen = inner.generation;
        tracing::info!("Scheduling helper start in {:?} ({})", delay, why);

        inner.pending_restart = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !sup.disarm_pending(expected_gen).await {
                return;
            }

            tracing::info!("Scheduled start firing ({})", why);
            let first = sup.start().await;
            let Err(e) = first else { return };
            tracing::warn!("Scheduled start failed ({}): {}", why, e);

            let Some(retry_delay) = retry else {
                sup.record_error(format!("scheduled start failed: {}", e)).await;
                return;
            };
            if !e.is_transient() {
                sup.record_error(format!("scheduled start failed: {}", e)).await;
                return;
            }

            tokio::time::sleep(retry_delay).await;
            if let Err(e2) = sup.start().await {
                tracing::error!("Retry start failed ({}): {}", why, e2);
                sup.record_error(format!("restart gave up: {}", e2)).await;
            }
        }));
    }

    /// 예약 태스크가 실행 직전에 자기 자신을 슬롯에서 분리하고
    /// 세대가 그대로인지 확인합니다. 새 스폰이 있었다면 무시.
    async fn disarm_pending(&self, expected_gen: u64) -> bool {
        let mut inner = self.inner.lock().await;
        inner.pending_restart.take();
        if inner.generation != expected_gen {
            tracing::debug!(
                "Skipping stale scheduled start (expected gen {}, now {})",
                expected_gen,
                inner.generation
            );
            return false;
        }
        true
    }

    /// exit-watcher 통지 처리. 늦게 도착한 이전 세대의 통지는 무시합니다.
    async fn handle_exit(&self, event: ExitEvent) {
        let mut inner = self.inner.lock().await;

        let current_gen = inner.handle.as_ref().map(|h| h.generation);
        if current_gen != Some(event.generation) {
            tracing::debug!("Ignoring exit of stale helper generation {}", event.generation);
            return;
        }
        inner.handle = None;

        let reason = classify_exit(&event.status);
        let _ = inner.machine.transition(LifecycleState::Stopped(reason));

        match reason {
            TerminationReason::ManualStop => {
                inner.status_text = "stopped".to_string();
                self.publish_locked(&inner);
            }
            TerminationReason::SignalTerminated(sig) => {
                inner.status_text = format!("stopped(signal:{})", sig);
                self.publish_locked(&inner);
            }
            TerminationReason::CrashExit(code) => {
                inner.status_text = format!("stopped(code:{})", code);
                inner.last_error = Some(format!("helper exited with code {}", code));
                self.publish_locked(&inner);

                tracing::warn!("Helper crashed (code {}), scheduling restart", code);
                self.schedule_start_locked(
                    &mut inner,
                    self.cfg.restart.initial_delay(),
                    Some(self.cfg.restart.retry_delay()),
                    "crash recovery",
                );
            }
            TerminationReason::SpawnFailed => {
                // classify_exit는 SpawnFailed를 만들지 않음
            }
        }
    }

    fn fail_start_locked(&self, inner: &mut Inner, err: &SupervisorError) {
        let _ = inner
            .machine
            .transition(LifecycleState::Stopped(TerminationReason::SpawnFailed));
        inner.status_text = format!("start failed: {}", err);
        inner.last_error = Some(err.to_string());
        self.publish_locked(inner);
    }

    /// 비동기 경로의 실패는 호출자에게 던지지 않고 lastError로만 기록
    async fn record_error(&self, message: String) {
        let mut inner = self.inner.lock().await;
        inner.last_error = Some(message);
        self.publish_locked(&inner);
    }

    fn publish_locked(&self, inner: &Inner) {
        let running = matches!(inner.machine.state(), LifecycleState::Running);
        self.status.publish(StatusSnapshot {
            running,
            status_text: inner.status_text.clone(),
            last_error: inner.last_error.clone(),
            bound_port: running.then_some(self.cfg.local_port),
            pid: inner.handle.as_ref().map(|h| h.pid),
        });
    }

    /// 스폰 직후 로컬 포트 접속을 시도하는 진단 전용 프로브.
    /// 실패는 로그만 남기고 상태를 바꾸지 않습니다.
    fn spawn_port_probe(&self, generation: u64) {
        let port = self.cfg.local_port;
        let Some(sup) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(PORT_PROBE_DELAY).await;

            // 그 사이 헬퍼가 교체/종료되었으면 진단 무의미
            {
                let inner = sup.inner.lock().await;
                if inner.handle.as_ref().map(|h| h.generation) != Some(generation) {
                    return;
                }
            }

            let addr = format!("127.0.0.1:{}", port);
            match tokio::time::timeout(
                PORT_PROBE_TIMEOUT,
                tokio::net::TcpStream::connect(&addr),
            )
            .await
            {
                Ok(Ok(_)) => tracing::debug!("Port probe OK: helper reachable on {}", addr),
                Ok(Err(e)) => tracing::warn!("Port probe: {} not reachable: {}", addr, e),
                Err(_) => tracing::warn!("Port probe timed out for {}", addr),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> BridgeConfig {
        BridgeConfig {
            helper_name: "no-such-helper-binary".to_string(),
            device_lister: "no-such-lister-binary".to_string(),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initial_status_is_idle() {
        let supervisor = TunnelSupervisor::new(offline_config());
        let snap = supervisor.status();
        assert!(!snap.running);
        assert!(snap.bound_port.is_none());
        assert!(snap.last_error.is_none());
    }

    #[tokio::test]
    async fn test_start_without_helper_fails() {
        let supervisor = TunnelSupervisor::new(offline_config());
        let result = supervisor.start().await;
        assert!(matches!(result, Err(SupervisorError::HelperNotFound(_))));

        let snap = supervisor.status();
        assert!(!snap.running);
        assert!(snap.last_error.is_some());
        assert!(snap.status_text.starts_with("start failed"));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let supervisor = TunnelSupervisor::new(offline_config());
        supervisor.stop(true).await;
        supervisor.stop(true).await;

        let snap = supervisor.status();
        assert!(!snap.running);
        // 전이 없이 no-op — 초기 문구 유지
        assert_eq!(snap.status_text, "idle");
    }

    #[tokio::test]
    async fn test_scheduled_start_failure_records_error() {
        let supervisor = TunnelSupervisor::new(offline_config());
        supervisor
            .schedule_start(Duration::from_millis(10), None, "test")
            .await;

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let snap = supervisor.status();
        assert!(!snap.running);
        assert!(snap.last_error.is_some());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_start() {
        let supervisor = TunnelSupervisor::new(offline_config());
        supervisor
            .schedule_start(Duration::from_secs(30), None, "test")
            .await;
        supervisor.stop(true).await;

        let inner = supervisor.inner.lock().await;
        assert!(inner.pending_restart.is_none());
    }

    #[tokio::test]
    async fn test_new_schedule_replaces_pending() {
        let supervisor = TunnelSupervisor::new(offline_config());
        supervisor
            .schedule_start(Duration::from_secs(30), None, "first")
            .await;
        supervisor
            .schedule_start(Duration::from_secs(30), None, "second")
            .await;

        let inner = supervisor.inner.lock().await;
        assert!(inner.pending_restart.is_some());
    }
}
