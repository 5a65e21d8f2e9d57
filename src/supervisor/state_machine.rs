use thiserror::Error;

/// 수동 종료로 간주하는 시그널 (SIGTERM) — stop()이 보내는 시그널과 동일
#[cfg(unix)]
const MANUAL_STOP_SIGNAL: i32 = 15;

/// 헬퍼가 왜 종료되었는지 분류. CrashExit만 자동 재시작을 유발합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// 운영자 요청 또는 정상 종료 (exit 0, SIGTERM)
    ManualStop,
    /// 비정상 종료 코드 — 자동 재시작 대상
    CrashExit(i32),
    /// SIGTERM 외의 시그널로 종료 — 외부 개입으로 보고 재시작하지 않음
    SignalTerminated(i32),
    /// 스폰 자체가 실패하여 Running에 도달하지 못함
    SpawnFailed,
}

impl TerminationReason {
    /// 이 종료 사유가 자동 재시작을 유발하는지
    pub fn triggers_restart(&self) -> bool {
        matches!(self, TerminationReason::CrashExit(_))
    }
}

/// Classify an OS exit status into a termination reason.
///
/// Exit code 0과 SIGTERM 종료는 깨끗한 종료, 그 외는 전부 크래시 계열.
pub fn classify_exit(status: &std::process::ExitStatus) -> TerminationReason {
    if let Some(code) = status.code() {
        if code == 0 {
            return TerminationReason::ManualStop;
        }
        return TerminationReason::CrashExit(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(MANUAL_STOP_SIGNAL) => return TerminationReason::ManualStop,
            Some(sig) => return TerminationReason::SignalTerminated(sig),
            None => {}
        }
    }

    // 종료 코드도 시그널도 없는 경우는 사실상 발생하지 않음
    TerminationReason::CrashExit(-1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped(TerminationReason),
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(LifecycleState, LifecycleState),
}

pub struct StateMachine {
    state: LifecycleState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: LifecycleState::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn can_transition(&self, to: &LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (&self.state, to),
            (Idle, Starting)
                | (Idle, Stopping)
                | (Idle, Stopped(_))
                | (Starting, Running)
                | (Starting, Stopped(_))
                | (Running, Stopping)
                | (Running, Stopped(_))
                | (Stopping, Stopped(_))
                | (Stopped(_), Starting)
                | (Stopped(_), Stopping)
        )
    }

    pub fn transition(&mut self, to: LifecycleState) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state.clone(), to))
        }
    }
}
