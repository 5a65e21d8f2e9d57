//! Helper process handle - spawn, output capture, exit notification.
//!
//! 스폰된 헬퍼당 하나의 핸들이 존재하며 Supervisor가 단독 소유합니다.
//! OS child는 exit-watcher 태스크가 소유하고, 종료 시 세대 번호와 함께
//! mpsc로 통지합니다. 핸들 교체는 반드시 terminate-then-discard 순서.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::utils::apply_creation_flags;

/// exit-watcher가 Supervisor로 보내는 종료 통지
#[derive(Debug)]
pub struct ExitEvent {
    /// 종료한 헬퍼의 세대 번호 — 수신 측에서 현재 세대와 비교해
    /// 교체된 핸들의 늦은 통지를 무시합니다
    pub generation: u64,
    pub status: ExitStatus,
}

/// 실행 중인 헬퍼 프로세스에 대한 핸들
pub struct HelperHandle {
    pub pid: u32,
    pub generation: u64,
    /// 스폰 시 전달한 인수 (로컬 포트, 디바이스 포트)
    pub args: Vec<String>,
}

impl HelperHandle {
    /// Spawn the helper with the two positional tunnel arguments.
    ///
    /// stdout/stderr는 리더 태스크가 tracing으로 전달하고, exit-watcher
    /// 태스크가 종료를 감시해 `exit_tx`로 통지합니다.
    pub fn spawn(
        program: &Path,
        local_port: u16,
        device_port: u16,
        generation: u64,
        exit_tx: mpsc::Sender<ExitEvent>,
    ) -> std::io::Result<Self> {
        let args = vec![local_port.to_string(), device_port.to_string()];

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        apply_creation_flags(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "spawned helper has no PID")
        })?;

        tracing::info!(
            "Helper started (pid: {}, gen: {}): {} {} {}",
            pid,
            generation,
            program.display(),
            local_port,
            device_port
        );

        // ── stdout reader ────────────────────────────────────
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "helper", "{}", line);
                }
            });
        }

        // ── stderr reader ────────────────────────────────────
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "helper", "{}", line);
                }
            });
        }

        // ── exit watcher ─────────────────────────────────────
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::info!("Helper (gen {}) exited with {}", generation, status);
                    let _ = exit_tx.send(ExitEvent { generation, status }).await;
                }
                Err(e) => {
                    tracing::error!("Failed to wait for helper (gen {}): {}", generation, e);
                }
            }
        });

        Ok(Self { pid, generation, args })
    }

    /// 소유한 헬퍼에 종료 요청 (크로스 플랫폼).
    /// SIGTERM은 classify_exit에서 수동 종료로 분류되므로 재시작을 유발하지 않습니다.
    pub fn terminate(&self) -> anyhow::Result<()> {
        tracing::info!("Sending TERM to helper (pid: {}, gen: {})", self.pid, self.generation);

        #[cfg(target_os = "windows")]
        {
            use winapi::um::handleapi::CloseHandle;
            use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
            use winapi::um::winnt::PROCESS_TERMINATE;

            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, 0, self.pid);
                if handle.is_null() {
                    anyhow::bail!("Failed to open helper process {}", self.pid);
                }
                // 종료 코드 0 — 수동 종료로 분류되도록
                let result = TerminateProcess(handle, 0);
                CloseHandle(handle);
                if result == 0 {
                    anyhow::bail!("TerminateProcess failed for helper {}", self.pid);
                }
            }
        }

        #[cfg(not(target_os = "windows"))]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM)
                .map_err(|e| anyhow::anyhow!("Failed to signal helper {}: {}", self.pid, e))?;
        }

        Ok(())
    }
}
