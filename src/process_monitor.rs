//! 고아 헬퍼 프로세스 탐지 및 정리.
//!
//! 이전 데몬 인스턴스가 비정상 종료하면 헬퍼가 로컬 포트를 점유한 채
//! 남을 수 있습니다. 스폰 전에 같은 시그니처(프로세스 이름 + 포트 인수)의
//! 프로세스를 찾아 정리하여 port-already-in-use 충돌을 방지합니다.

use sysinfo::{Pid, System};

/// 이름과 커맨드라인 시그니처가 일치하는 프로세스의 PID 목록.
///
/// `cmd_pattern`은 헬퍼 호출 인수에 반드시 포함되는 문자열(바인드 포트)로,
/// 같은 바이너리를 다른 용도로 쓰는 프로세스를 오인 종료하지 않게 합니다.
pub fn find_helper_pids(name: &str, cmd_pattern: &str) -> Vec<u32> {
    let mut sys = System::new_all();
    sys.refresh_all();

    let name_lower = name.to_lowercase();
    sys.processes()
        .iter()
        .filter(|(_, process)| {
            if !process.name().to_lowercase().contains(&name_lower) {
                return false;
            }
            process.cmd().iter().any(|arg| arg.contains(cmd_pattern))
        })
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

/// 특정 PID가 아직 실행 중인지 확인
pub fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).is_some()
}

/// Force-kill a process by PID. Cross-platform helper.
pub fn force_kill_pid(pid: u32) -> anyhow::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                anyhow::bail!("Failed to open process {}", pid);
            }
            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if result == 0 {
                anyhow::bail!("TerminateProcess failed for PID {}", pid);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        signal::kill(NixPid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| anyhow::anyhow!("Failed to kill PID {}: {}", pid, e))?;
    }

    Ok(())
}

/// 시그니처가 일치하는 모든 고아 헬퍼를 제거. 종료한 수를 반환.
pub fn sweep_orphans(name: &str, cmd_pattern: &str) -> usize {
    let pids = find_helper_pids(name, cmd_pattern);
    let mut killed = 0;
    for pid in pids {
        match force_kill_pid(pid) {
            Ok(()) => {
                tracing::info!("Killed orphaned helper process (pid: {})", pid);
                killed += 1;
            }
            Err(e) => {
                // best-effort — 이미 죽었거나 권한이 없는 경우 계속 진행
                tracing::debug!("Could not kill orphan pid {}: {}", pid, e);
            }
        }
    }
    killed
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo 시스템 콜은 동기적으로 OS 프로세스 테이블 전체를 스캔합니다.
// tokio 워커 스레드에서 직접 호출하면 런타임 전체가 블로킹되므로,
// spawn_blocking을 통해 전용 블로킹 스레드풀에서 실행합니다.

/// `sweep_orphans`의 비동기 래퍼.
pub async fn sweep_orphans_async(name: &str, cmd_pattern: &str) -> usize {
    let name = name.to_string();
    let pattern = cmd_pattern.to_string();
    tokio::task::spawn_blocking(move || sweep_orphans(&name, &pattern))
        .await
        .unwrap_or(0)
}

/// `is_running`의 비동기 래퍼.
pub async fn is_running_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_running(pid))
        .await
        .unwrap_or(false)
}
