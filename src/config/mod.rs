use std::path::PathBuf;
use std::time::Duration;
use serde::Deserialize;

/// 헬퍼가 바인딩하는 로컬 TCP 포트 기본값
pub const DEFAULT_LOCAL_PORT: u16 = 5604;
/// 디바이스 쪽 터널 대상 포트 기본값
pub const DEFAULT_DEVICE_PORT: u16 = 5604;

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_device_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_helper_name() -> String {
    "iproxy".to_string()
}

fn default_device_lister() -> String {
    "idevice_id".to_string()
}

fn default_volume_prefixes() -> Vec<String> {
    vec!["iPhone".to_string(), "iPad".to_string(), "iPod".to_string()]
}

fn default_ipc_listen() -> String {
    "127.0.0.1:57343".to_string()
}

fn default_restart_initial_secs() -> u64 {
    2
}

fn default_restart_retry_secs() -> u64 {
    10
}

fn default_mount_settle_secs() -> u64 {
    3
}

fn default_wake_delay_secs() -> u64 {
    2
}

/// 크래시/웨이크 이후 재시작 정책 — 빠른 1차 시도, 실패 시 긴 2차 시도 한 번.
/// 일반적인 지수 백오프가 아니라 의도적으로 2단계로 제한합니다.
#[derive(Deserialize, Debug, Clone)]
pub struct RestartPolicy {
    #[serde(default = "default_restart_initial_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_restart_retry_secs")]
    pub retry_delay_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_restart_initial_secs(),
            retry_delay_secs: default_restart_retry_secs(),
        }
    }
}

impl RestartPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    /// 헬퍼 실행 파일 이름 (검색 시 사용)
    #[serde(default = "default_helper_name")]
    pub helper_name: String,
    /// 헬퍼 경로를 직접 고정 — 설정되면 검색을 건너뜀
    #[serde(default)]
    pub helper_path: Option<PathBuf>,
    /// 잘 알려진 경로 외에 추가로 검색할 glob 패턴 목록
    #[serde(default)]
    pub search_patterns: Vec<String>,
    /// 디바이스 연결 확인용 외부 도구 (없으면 검사를 건너뜀)
    #[serde(default = "default_device_lister")]
    pub device_lister: String,
    /// 마운트 이벤트에서 대상 디바이스로 인정할 볼륨 이름 접두사
    #[serde(default = "default_volume_prefixes")]
    pub volume_prefixes: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// 마운트 후 디바이스 열거가 안정될 때까지 기다리는 시간
    #[serde(default = "default_mount_settle_secs")]
    pub mount_settle_secs: u64,
    /// 웨이크 후 재시작까지 기다리는 시간
    #[serde(default = "default_wake_delay_secs")]
    pub wake_delay_secs: u64,
    #[serde(default = "default_ipc_listen")]
    pub ipc_listen: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_port: default_local_port(),
            device_port: default_device_port(),
            helper_name: default_helper_name(),
            helper_path: None,
            search_patterns: Vec::new(),
            device_lister: default_device_lister(),
            volume_prefixes: default_volume_prefixes(),
            restart: RestartPolicy::default(),
            mount_settle_secs: default_mount_settle_secs(),
            wake_delay_secs: default_wake_delay_secs(),
            ipc_listen: default_ipc_listen(),
        }
    }
}

impl BridgeConfig {
    pub fn load() -> anyhow::Result<Self> {
        let s = std::fs::read_to_string("config/global.toml").unwrap_or_default();
        let cfg = toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse config/global.toml, using defaults: {}", e);
            Self::default()
        });
        Ok(cfg)
    }

    pub fn mount_settle_delay(&self) -> Duration {
        Duration::from_secs(self.mount_settle_secs)
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_secs(self.wake_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(cfg.device_port, DEFAULT_DEVICE_PORT);
        assert_eq!(cfg.helper_name, "iproxy");
        assert_eq!(cfg.device_lister, "idevice_id");
        assert!(cfg.helper_path.is_none());
        assert_eq!(cfg.volume_prefixes, vec!["iPhone", "iPad", "iPod"]);
        assert_eq!(cfg.restart.initial_delay_secs, 2);
        assert_eq!(cfg.restart.retry_delay_secs, 10);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg: BridgeConfig = toml::from_str(
            r#"
            local_port = 7777

            [restart]
            initial_delay_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.local_port, 7777);
        // 나머지 필드는 기본값 유지
        assert_eq!(cfg.device_port, DEFAULT_DEVICE_PORT);
        assert_eq!(cfg.restart.initial_delay_secs, 1);
        assert_eq!(cfg.restart.retry_delay_secs, 10);
    }

    #[test]
    fn test_helper_path_pin() {
        let cfg: BridgeConfig = toml::from_str(r#"helper_path = "/opt/bridge/iproxy""#).unwrap();
        assert_eq!(cfg.helper_path, Some(PathBuf::from("/opt/bridge/iproxy")));
    }

    #[test]
    fn test_restart_policy_durations() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.initial_delay(), Duration::from_secs(2));
        assert_eq!(policy.retry_delay(), Duration::from_secs(10));
    }
}
