//! Plugin Manifest - 플러그인 메타데이터 정의 및 검증
//!
//! 플러그인 소스 트리 루트의 `plugin.yaml` 문서.

use super::permission::validate_permissions;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tally_foundation::Error;

/// 매니페스트 파일명 (우선순위 순)
pub const MANIFEST_FILENAMES: &[&str] = &["plugin.yaml", "plugin.yml"];

/// 플러그인 이름 최대 길이
pub const MAX_NAME_LENGTH: usize = 100;

/// 허용 라이선스 (OSI 승인)
pub const ALLOWED_LICENSES: &[&str] = &[
    "MIT",
    "Apache-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "GPL-2.0",
    "GPL-3.0",
    "LGPL-2.1",
    "LGPL-3.0",
    "AGPL-3.0",
    "MPL-2.0",
    "ISC",
    "EPL-2.0",
    "Unlicense",
];

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^(?:[a-z]|[a-z][a-z0-9-]*[a-z0-9])$").unwrap();
    static ref SEMVER_RE: Regex = Regex::new(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$"
    )
    .unwrap();
}

// ============================================================================
// ManifestError
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// 문서 구조 자체를 읽을 수 없음
    #[error("{0}")]
    Parse(String),

    /// 구조는 맞지만 규칙 위반
    #[error("{0}")]
    Invalid(String),
}

impl From<ManifestError> for Error {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Parse(m) => Error::ManifestParse(m),
            ManifestError::Invalid(m) => Error::Validation(m),
        }
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// 플러그인 매니페스트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// 최소 호스트 앱 버전
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// 의존 플러그인 이름 (기록만, 해석하지 않음)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<Value>,
}

/// 백엔드 블록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub package: String,

    /// 진입점 (설치 디렉토리 기준 상대 경로)
    #[serde(default)]
    pub entry: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookDeclaration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteDeclaration>,
}

/// `{event, handler}` 구독 선언
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDeclaration {
    pub event: String,
    pub handler: String,
}

/// `{method, path, handler}` 라우트 선언
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDeclaration {
    pub method: String,
    pub path: String,
    pub handler: String,
}

/// 프론트엔드 블록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// 컴포넌트 경로
    #[serde(default)]
    pub components: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation: Vec<NavigationItem>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SlotInjection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub label: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// UI 슬롯 주입
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInjection {
    pub slot: String,
    pub component: String,
}

/// 데이터베이스 블록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub migrations: String,
}

impl Manifest {
    // ========================================================================
    // 파싱
    // ========================================================================

    pub fn from_yaml(content: &str) -> Result<Self, ManifestError> {
        serde_yaml::from_str(content)
            .map_err(|e| ManifestError::Parse(format!("invalid manifest document: {}", e)))
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(content)
            .map_err(|e| ManifestError::Parse(format!("invalid manifest document: {}", e)))
    }

    /// 저장된 매니페스트 문서(JSON 값)에서 복원
    pub fn from_value(value: &Value) -> Result<Self, ManifestError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ManifestError::Parse(format!("invalid stored manifest: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ManifestError::Parse(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        serde_yaml::to_string(self)
            .map_err(|e| ManifestError::Parse(format!("failed to serialize manifest: {}", e)))
    }

    pub fn to_value(&self) -> Result<Value, ManifestError> {
        serde_json::to_value(self)
            .map_err(|e| ManifestError::Parse(format!("failed to serialize manifest: {}", e)))
    }

    // ========================================================================
    // 검증
    // ========================================================================

    /// 구조/교차 필드 검증. 검사 순서는 고정이다.
    pub fn validate(&self) -> Result<(), ManifestError> {
        // 1. 필수 필드
        if self.name.is_empty() {
            return Err(ManifestError::Invalid("name is required".into()));
        }
        if self.display_name.is_empty() {
            return Err(ManifestError::Invalid("display_name is required".into()));
        }
        if self.version.is_empty() {
            return Err(ManifestError::Invalid("version is required".into()));
        }

        // 2. 이름 형식
        if !is_valid_plugin_name(&self.name) {
            return Err(ManifestError::Invalid(format!(
                "invalid plugin name '{}': must be lowercase letters, digits and hyphens, \
                 start with a letter, not end with a hyphen, at most {} characters",
                self.name, MAX_NAME_LENGTH
            )));
        }

        // 3. 버전
        if !is_valid_semver(&self.version) {
            return Err(ManifestError::Invalid(format!(
                "invalid version '{}': must be semantic version major.minor.patch",
                self.version
            )));
        }

        // 4. 권한
        let unknown = validate_permissions(&self.permissions);
        if !unknown.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "unknown permissions: {}",
                unknown.join(", ")
            )));
        }

        // 5. 라이선스
        if let Some(license) = &self.license {
            if !ALLOWED_LICENSES.contains(&license.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "license '{}' is not an allowed open source license",
                    license
                )));
            }
        }

        // 6. 백엔드
        if let Some(backend) = &self.backend {
            if backend.package.is_empty() {
                return Err(ManifestError::Invalid("backend.package is required".into()));
            }
            if backend.entry.is_empty() {
                return Err(ManifestError::Invalid("backend.entry is required".into()));
            }
            require_contained("backend.entry", &backend.entry)?;
            if !backend.routes.is_empty() && !self.has_permission("routes:register") {
                return Err(ManifestError::Invalid(
                    "backend routes require the 'routes:register' permission".into(),
                ));
            }
            if !backend.hooks.is_empty() && !self.has_permission("hooks:register") {
                return Err(ManifestError::Invalid(
                    "backend hooks require the 'hooks:register' permission".into(),
                ));
            }
        }

        // 7. 프론트엔드
        if let Some(frontend) = &self.frontend {
            if frontend.components.is_empty() {
                return Err(ManifestError::Invalid(
                    "frontend.components is required".into(),
                ));
            }
            require_contained("frontend.components", &frontend.components)?;
        }

        // 8. 데이터베이스
        if let Some(database) = &self.database {
            if database.migrations.is_empty() {
                return Err(ManifestError::Invalid(
                    "database.migrations is required".into(),
                ));
            }
            require_contained("database.migrations", &database.migrations)?;
            if !self.has_permission("database:migrate") {
                return Err(ManifestError::Invalid(
                    "database block requires the 'database:migrate' permission".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p == name)
    }

    /// 선언된 백엔드 기능이 동작하기 위해 최소한 부여되어야 하는 권한
    pub fn required_permissions(&self) -> Vec<String> {
        let mut required = Vec::new();

        if let Some(backend) = &self.backend {
            if !backend.hooks.is_empty() {
                required.push("hooks:register".to_string());
            }
            if !backend.routes.is_empty() {
                required.push("routes:register".to_string());
            }
        }
        if self.database.is_some() {
            required.push("database:migrate".to_string());
        }

        required
    }

    /// 선언된 hook 목록 (백엔드 블록이 없으면 빈 슬라이스)
    pub fn hooks(&self) -> &[HookDeclaration] {
        self.backend
            .as_ref()
            .map(|b| b.hooks.as_slice())
            .unwrap_or(&[])
    }

    // ========================================================================
    // 경로 헬퍼 (블록이 없으면 빈 문자열)
    // ========================================================================

    pub fn backend_entry_path(&self, install_dir: &Path) -> String {
        match &self.backend {
            Some(b) if !b.entry.is_empty() => join_path(install_dir, &b.entry),
            _ => String::new(),
        }
    }

    pub fn frontend_components_path(&self, install_dir: &Path) -> String {
        match &self.frontend {
            Some(f) if !f.components.is_empty() => join_path(install_dir, &f.components),
            _ => String::new(),
        }
    }

    pub fn migrations_path(&self, install_dir: &Path) -> String {
        match &self.database {
            Some(d) if !d.migrations.is_empty() => join_path(install_dir, &d.migrations),
            _ => String::new(),
        }
    }
}

/// `validate`를 통과한 경로만 들어온다 (설치 디렉토리 밖으로 나가지 않음)
fn join_path(base: &Path, relative: &str) -> String {
    base.join(relative.trim_start_matches("./"))
        .to_string_lossy()
        .to_string()
}

/// 상대 경로이며 `..`를 포함하지 않아야 한다
fn require_contained(field: &str, path: &str) -> Result<(), ManifestError> {
    if is_contained_path(path) {
        Ok(())
    } else {
        Err(ManifestError::Invalid(format!(
            "{} '{}' must be a relative path inside the plugin directory",
            field, path
        )))
    }
}

fn is_contained_path(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// 소스 트리에서 매니페스트 파일 찾기
pub fn find_manifest_file(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// 플러그인 이름 규칙: 소문자 시작, 소문자/숫자/하이픈, 하이픈으로 끝나지 않음, 1..=100자
pub fn is_valid_plugin_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && NAME_RE.is_match(name)
}

/// 엄격한 semver (`v` 접두사, 부분 형식 불가)
pub fn is_valid_semver(version: &str) -> bool {
    SEMVER_RE.is_match(version)
}
