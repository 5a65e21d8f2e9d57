//! 번들된 터널 헬퍼 실행 파일(`iproxy`) 경로 탐색.
//!
//! 우선순위: 데몬 실행 파일 옆 → /usr/local/bin → /opt/homebrew/bin →
//! 설정된 glob 패턴. 처음으로 존재하면서 실행 가능한 후보를 반환합니다.

use std::path::PathBuf;
use glob::glob;

use crate::config::BridgeConfig;
use crate::supervisor::error::SupervisorError;
use crate::utils::is_executable;

/// 헬퍼를 찾는 잘 알려진 설치 경로 (번들 경로 다음 순서)
const WELL_KNOWN_DIRS: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin"];

/// Resolve the helper executable for the current configuration.
///
/// `helper_path`가 설정에 고정되어 있으면 검색 없이 해당 경로만 검증합니다.
pub fn locate_helper(cfg: &BridgeConfig) -> Result<PathBuf, SupervisorError> {
    if let Some(pinned) = &cfg.helper_path {
        if is_executable(pinned) {
            tracing::debug!("Using pinned helper path: {}", pinned.display());
            return Ok(pinned.clone());
        }
        tracing::warn!("Pinned helper path is not executable: {}", pinned.display());
        return Err(SupervisorError::HelperNotFound(cfg.helper_name.clone()));
    }

    for candidate in candidate_paths(cfg) {
        if is_executable(&candidate) {
            tracing::info!("Found helper at: {}", candidate.display());
            return Ok(candidate);
        }
    }

    tracing::warn!("Could not find helper executable: {}", cfg.helper_name);
    Err(SupervisorError::HelperNotFound(cfg.helper_name.clone()))
}

/// 우선순위 순서대로 후보 경로를 나열.
fn candidate_paths(cfg: &BridgeConfig) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // 1. 데몬 실행 파일과 같은 디렉토리 (번들 배포 형태)
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(&cfg.helper_name));
        }
    }

    // 2. 잘 알려진 설치 경로
    for dir in WELL_KNOWN_DIRS {
        candidates.push(PathBuf::from(dir).join(&cfg.helper_name));
    }

    // 3. 설정된 glob 패턴
    for pattern in &cfg.search_patterns {
        if let Ok(paths) = glob(pattern) {
            for path in paths.flatten() {
                if path.is_dir() {
                    candidates.push(path.join(&cfg.helper_name));
                } else {
                    candidates.push(path);
                }
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            helper_name: "definitely-not-installed-helper".to_string(),
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_not_found() {
        let cfg = test_config();
        let result = locate_helper(&cfg);
        assert!(matches!(result, Err(SupervisorError::HelperNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_pinned_path_wins() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("iproxy");
        std::fs::write(&helper, b"#!/bin/sh\nsleep 1\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut cfg = test_config();
        cfg.helper_path = Some(helper.clone());
        assert_eq!(locate_helper(&cfg).unwrap(), helper);
    }

    #[cfg(unix)]
    #[test]
    fn test_pinned_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("iproxy");
        std::fs::write(&helper, b"not executable").unwrap();

        let mut cfg = test_config();
        cfg.helper_path = Some(helper);
        assert!(locate_helper(&cfg).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_search_pattern_discovery() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("definitely-not-installed-helper");
        std::fs::write(&helper, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut cfg = test_config();
        cfg.search_patterns = vec![dir.path().to_string_lossy().to_string()];
        assert_eq!(locate_helper(&cfg).unwrap(), helper);
    }

    #[test]
    fn test_candidates_include_well_known_dirs() {
        let cfg = test_config();
        let candidates = candidate_paths(&cfg);
        assert!(candidates
            .iter()
            .any(|p| p.starts_with("/usr/local/bin") || p.starts_with("/opt/homebrew/bin")));
    }
}
