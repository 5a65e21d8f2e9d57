//! 디바이스 연결 사전 확인 (pre-flight gate).
//!
//! 외부 도구(`idevice_id -l`)로 USB 연결된 대상 디바이스 수를 확인합니다.
//! 도구 자체가 없으면 "알 수 없음"으로 처리하여 시작을 막지 않습니다 —
//! 진단 도구 부재만으로 전체 브릿지가 기동 불능이 되는 것을 방지.

use std::io::ErrorKind;
use tokio::process::Command;

use crate::utils::apply_creation_flags;

/// 디바이스 확인 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProbe {
    /// n개의 대상 디바이스가 연결됨
    Attached(usize),
    /// 도구는 있으나 연결된 디바이스가 없음 — 시작 거부 대상
    NoneAttached,
    /// 도구가 없거나 실행 실패 — 판단 불가, 시작 허용
    Unknown,
}

impl DeviceProbe {
    /// 시작을 확실히 거부해야 하는 경우에만 true
    pub fn definitively_absent(&self) -> bool {
        matches!(self, DeviceProbe::NoneAttached)
    }
}

/// Run the external device lister and classify the result.
pub async fn probe_attached_devices(lister: &str) -> DeviceProbe {
    let mut cmd = Command::new(lister);
    cmd.arg("-l");
    apply_creation_flags(&mut cmd);

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Device lister '{}' not installed, skipping check", lister);
            return DeviceProbe::Unknown;
        }
        Err(e) => {
            tracing::warn!("Failed to run device lister '{}': {}", lister, e);
            return DeviceProbe::Unknown;
        }
    };

    let count = count_device_ids(&String::from_utf8_lossy(&output.stdout));
    if count == 0 {
        tracing::info!("Device lister reports no attached devices");
        DeviceProbe::NoneAttached
    } else {
        tracing::debug!("Device lister reports {} attached device(s)", count);
        DeviceProbe::Attached(count)
    }
}

/// stdout의 비어 있지 않은 줄 수 = 연결된 디바이스 UDID 수
fn count_device_ids(stdout: &str) -> usize {
    stdout.lines().filter(|line| !line.trim().is_empty()).count()
}
