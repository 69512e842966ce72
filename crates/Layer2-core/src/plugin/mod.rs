//! # Plugin System
//!
//! Tally 확장 플러그인 시스템
//!
//! ## 개요
//!
//! 원격 저장소(GitHub/GitLab)에서 플러그인을 받아 인스턴스 전체에 설치하고,
//! 권한을 부여해 활성화한 뒤, 테넌트별로 선택적으로 켠다:
//! - 매니페스트 검증 (`plugin.yaml`)
//! - 권한 카탈로그와 위험도 요약
//! - 도메인 이벤트 hook 버스
//! - 인스턴스/테넌트 2단계 상태 머신
//!
//! 플러그인 코드는 실행하지 않는다. 권한은 추적되고 검사될 뿐이다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PluginService                          │
//! │                                                             │
//! │  RepositoryAcquirer ──▶ Manifest::validate ──▶ permission   │
//! │         │                                          │        │
//! │         ▼                                          ▼        │
//! │    RemoteFetcher            PluginRepository (persist)      │
//! │   (git clone / HTTP)                │                       │
//! │                                     ▼                       │
//! │                     PluginCache + HookRegistry              │
//! └─────────────────────────────────────────────────────────────┘
//!                                       ▲
//!                       도메인 이벤트 (invoice.created, ...)
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! let service = PluginService::from_config(&config, repo)?;
//! service.ensure_official_registry().await?;
//! service.load_enabled_plugins().await?;
//!
//! let plugin = service.install("https://github.com/acme/crm").await?;
//! service.enable(&plugin.id, &["hooks:register".to_string()]).await?;
//! service.enable_for_tenant("tenant-a", &plugin.id, None).await?;
//!
//! service
//!     .hooks()
//!     .emit(&Event::of(EventType::InvoiceCreated, "tenant-a", payload))
//!     .await;
//! ```

mod acquisition;
mod cache;
mod events;
mod factory;
mod manifest;
mod marketplace;
mod permission;
mod service;

pub use acquisition::{
    find_license_file, AcquiredSource, GitHttpFetcher, RemoteFetcher, RepositoryAcquirer,
    RepositoryUrl, LICENSE_FILENAMES,
};
pub use cache::{LoadedPlugin, PluginCache};
pub use events::{
    handler_fn, is_valid_event_type, Event, EventType, FnHandler, HookHandler, HookRegistry,
    Subscriber, DEFAULT_ASYNC_DEADLINE,
};
pub use factory::{HookHandlerFactory, LoggingHandlerFactory};
pub use manifest::{
    find_manifest_file, is_valid_plugin_name, is_valid_semver, BackendConfig, DatabaseConfig,
    FrontendConfig, HookDeclaration, Manifest, ManifestError, NavigationItem, RouteDeclaration,
    SlotInjection, ALLOWED_LICENSES, MANIFEST_FILENAMES, MAX_NAME_LENGTH,
};
pub use marketplace::{Marketplace, PluginSummary, RegistryIndex, SearchResult};
pub use permission::{
    all_permissions, get_permission, has_dangerous_permissions, highest_risk_level,
    permissions_by_category, permissions_by_risk, summarize_permissions, validate_permission,
    validate_permissions, Permission, PermissionCategory, PermissionSummary, RiskLevel,
};
pub use service::{PermissionReport, PluginService, RegistrySync, ReloadReport};
