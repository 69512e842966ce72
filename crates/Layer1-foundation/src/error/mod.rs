//! Error types for Tally
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tally 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 검증 관련 (동기, 재시도 불가)
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    // ========================================================================
    // 조회/비즈니스 규칙
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ========================================================================
    // 플러그인 획득/로드
    // ========================================================================
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    #[error("Plugin load failed: {0}")]
    PluginLoad(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Http(_))
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Conflict(_)
                | Error::InvalidInput(_)
                | Error::Validation(_)
                | Error::ManifestParse(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// 검증 계열 에러 (잘못된 URL, 매니페스트, 권한)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::Validation(_) | Error::ManifestParse(_)
        )
    }

    /// 작업 컨텍스트를 메시지 앞에 붙인다. 에러 종류(variant)는 유지된다.
    ///
    /// 외부 라이브러리 에러(Io/Json/Sqlite)는 메시지를 가진 variant로 옮겨진다.
    pub fn with_context(self, op: impl std::fmt::Display) -> Self {
        match self {
            Error::Config(m) => Error::Config(format!("{op}: {m}")),
            Error::InvalidInput(m) => Error::InvalidInput(format!("{op}: {m}")),
            Error::Validation(m) => Error::Validation(format!("{op}: {m}")),
            Error::ManifestParse(m) => Error::ManifestParse(format!("{op}: {m}")),
            Error::NotFound(m) => Error::NotFound(format!("{op}: {m}")),
            Error::Conflict(m) => Error::Conflict(format!("{op}: {m}")),
            Error::Acquisition(m) => Error::Acquisition(format!("{op}: {m}")),
            Error::PluginLoad(m) => Error::PluginLoad(format!("{op}: {m}")),
            Error::Storage(m) => Error::Storage(format!("{op}: {m}")),
            Error::Timeout(m) => Error::Timeout(format!("{op}: {m}")),
            Error::Http(m) => Error::Http(format!("{op}: {m}")),
            Error::Internal(m) => Error::Internal(format!("{op}: {m}")),
            Error::Io(e) => Error::Internal(format!("{op}: {e}")),
            Error::Json(e) => Error::Internal(format!("{op}: {e}")),
            Error::Sqlite(e) => Error::Storage(format!("{op}: {e}")),
        }
    }

    /// 엔티티 미존재 에러 생성 헬퍼
    pub fn not_found(kind: &str, key: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{kind} '{key}'"))
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
