//! tally-core: Plugin Runtime for Tally
//!
//! Layer2 - 플러그인 라이프사이클 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 매니페스트, 권한 카탈로그, hook 레지스트리, 저장소 획득,
//!   마켓플레이스 검색, 라이프사이클 서비스
//!
//! # 사용 예시
//!
//! ```ignore
//! use tally_core::{PluginService, Event, EventType};
//! use tally_foundation::{Storage, TallyConfig};
//!
//! let config = TallyConfig::load()?;
//! let repo = Arc::new(Storage::open(&config.resolved_database_path())?);
//! let service = PluginService::from_config(&config, repo)?;
//!
//! // 부팅 시 활성 플러그인 재로드
//! service.load_enabled_plugins().await?;
//!
//! // 도메인 이벤트 발행 (fire-and-forget)
//! service
//!     .hooks()
//!     .emit_async(Event::of(EventType::PaymentReceived, "tenant-a", json!({})));
//! ```

pub mod plugin;

// Re-exports: Plugin system
pub use plugin::{
    Event, EventType, HookHandler, HookHandlerFactory, HookRegistry, LoadedPlugin, Manifest,
    PermissionReport, PluginService, PluginSummary, RemoteFetcher, RepositoryUrl, SearchResult,
};
