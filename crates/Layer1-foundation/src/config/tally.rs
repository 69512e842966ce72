//! Tally Config - 통합 설정
//!
//! 데이터 디렉토리, 공식 레지스트리, HTTP/Hook 타임아웃 등을 관리하는 TallyConfig

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 설정 파일명
pub const TALLY_CONFIG_FILE: &str = "config.json";

/// 데이터 디렉토리 환경 변수
pub const DATA_DIR_ENV: &str = "TALLY_DATA_DIR";

// ============================================================================
// Tally Config (통합)
// ============================================================================

/// Tally 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// 데이터 디렉토리 (DB + 플러그인 소스)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// 플러그인 소스 디렉토리 (기본: `<data_dir>/plugins`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<PathBuf>,

    /// SQLite 파일명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_file: Option<String>,

    /// 공식 레지스트리 (seed, 삭제 불가)
    #[serde(default)]
    pub official_registry: OfficialRegistryConfig,

    /// HTTP 설정
    #[serde(default)]
    pub http: HttpConfig,

    /// Hook 디스패치 설정
    #[serde(default)]
    pub hooks: HookConfig,

    /// 레지스트리 인덱스 규칙
    #[serde(default)]
    pub index: IndexConfig,
}

fn default_version() -> u32 {
    1
}

impl TallyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드, 마지막으로 환경 변수 적용
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<TallyConfig>(TALLY_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<TallyConfig>(TALLY_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        // 3. 환경 변수
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(TALLY_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: TallyConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.plugins_dir.is_some() {
            self.plugins_dir = other.plugins_dir;
        }
        if other.database_file.is_some() {
            self.database_file = other.database_file;
        }

        self.official_registry.merge(other.official_registry);
        self.http.merge(other.http);
        self.hooks.merge(other.hooks);
        self.index.merge(other.index);
    }

    // ========================================================================
    // 경로 해석
    // ========================================================================

    /// 데이터 디렉토리 (설정값 > OS 데이터 디렉토리 > 현재 디렉토리)
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tally")
        })
    }

    pub fn resolved_plugins_dir(&self) -> PathBuf {
        self.plugins_dir
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("plugins"))
    }

    pub fn resolved_database_path(&self) -> PathBuf {
        let file = self.database_file.as_deref().unwrap_or("tally.db");
        self.resolved_data_dir().join(file)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = Some(dir.into());
        self
    }
}

// ============================================================================
// Official Registry
// ============================================================================

/// 공식 레지스트리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialRegistryConfig {
    #[serde(default = "default_registry_name")]
    pub name: String,

    #[serde(default = "default_registry_url")]
    pub url: String,

    #[serde(default = "default_registry_description")]
    pub description: String,
}

fn default_registry_name() -> String {
    "official".to_string()
}

fn default_registry_url() -> String {
    "https://github.com/tally-books/plugin-registry".to_string()
}

fn default_registry_description() -> String {
    "Official Tally plugin registry".to_string()
}

impl Default for OfficialRegistryConfig {
    fn default() -> Self {
        Self {
            name: default_registry_name(),
            url: default_registry_url(),
            description: default_registry_description(),
        }
    }
}

impl OfficialRegistryConfig {
    fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.name != defaults.name {
            self.name = other.name;
        }
        if other.url != defaults.url {
            self.url = other.url;
        }
        if other.description != defaults.description {
            self.description = other.description;
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// HTTP 클라이언트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// 요청 타임아웃 (초)
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("Tally/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    fn merge(&mut self, other: Self) {
        if other.timeout_secs != default_http_timeout() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.user_agent != default_user_agent() {
            self.user_agent = other.user_agent;
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Hook 디스패치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    /// 비동기 디스패치 데드라인 (초)
    #[serde(default = "default_async_deadline")]
    pub async_deadline_secs: u64,
}

fn default_async_deadline() -> u64 {
    30
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            async_deadline_secs: default_async_deadline(),
        }
    }
}

impl HookConfig {
    fn merge(&mut self, other: Self) {
        if other.async_deadline_secs != default_async_deadline() {
            self.async_deadline_secs = other.async_deadline_secs;
        }
    }
}

// ============================================================================
// Registry Index
// ============================================================================

/// 레지스트리 인덱스 파일 위치 규칙
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    #[serde(default = "default_index_branch")]
    pub branch: String,

    #[serde(default = "default_index_file")]
    pub file: String,
}

fn default_index_branch() -> String {
    "main".to_string()
}

fn default_index_file() -> String {
    "registry.json".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            branch: default_index_branch(),
            file: default_index_file(),
        }
    }
}

impl IndexConfig {
    fn merge(&mut self, other: Self) {
        if other.branch != default_index_branch() {
            self.branch = other.branch;
        }
        if other.file != default_index_file() {
            self.file = other.file;
        }
    }
}
