//! Plugin persistence records
//!
//! 레지스트리, 플러그인, 테넌트별 활성화 행(row) 정의

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

// ============================================================================
// PluginState
// ============================================================================

/// 인스턴스 범위 플러그인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// 설치됨 (권한 없음)
    Installed,
    /// 활성화됨 (권한 기록, Hook 등록)
    Enabled,
    /// 비활성화됨
    Disabled,
    /// 저장소 활성화 후 메모리 로드 실패
    Failed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed" => Ok(Self::Installed),
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown plugin state '{other}'")),
        }
    }
}

// ============================================================================
// SourceType
// ============================================================================

/// 플러그인 소스 호스트 (닫힌 집합)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Github,
    Gitlab,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    /// 호스트 이름
    pub fn host(&self) -> &'static str {
        match self {
            Self::Github => "github.com",
            Self::Gitlab => "gitlab.com",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// 플러그인 마켓플레이스 레지스트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    /// seed된 공식 레지스트리 (삭제 불가)
    pub is_official: bool,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 레지스트리 생성 요청
#[derive(Debug, Clone, Default)]
pub struct NewRegistry {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub is_official: bool,
}

impl NewRegistry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn official(mut self) -> Self {
        self.is_official = true;
        self
    }
}

// ============================================================================
// Plugin
// ============================================================================

/// 설치된 플러그인 (인스턴스 전역, 이름으로 유일)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    /// 불변 slug
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub version: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub author: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub state: PluginState,
    /// 부여된 권한 (활성화 전에는 비어 있음)
    pub granted_permissions: Vec<String>,
    /// 원본 매니페스트 문서
    pub manifest: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    pub fn is_enabled(&self) -> bool {
        self.state == PluginState::Enabled
    }
}

/// 플러그인 설치 요청
#[derive(Debug, Clone)]
pub struct NewPlugin {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub version: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub author: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub manifest: Value,
}

impl NewPlugin {
    /// `installed` 상태, 빈 권한으로 레코드 생성
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> PluginRecord {
        PluginRecord {
            id,
            name: self.name,
            display_name: self.display_name,
            description: self.description,
            version: self.version,
            source_url: self.source_url,
            source_type: self.source_type,
            author: self.author,
            license: self.license,
            homepage: self.homepage,
            state: PluginState::Installed,
            granted_permissions: Vec::new(),
            manifest: self.manifest,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// TenantPlugin
// ============================================================================

/// 테넌트별 플러그인 활성화 행
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPluginRecord {
    pub id: String,
    pub tenant_id: String,
    pub plugin_id: String,
    /// 불투명 설정 문서 (검증/해석하지 않음)
    pub settings: Option<Value>,
    pub is_enabled: bool,
    pub enabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
