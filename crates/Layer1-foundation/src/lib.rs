//! # tally-foundation
//!
//! Foundation layer for Tally:
//! - Error: 에러 분류 (검증 / 미존재 / 충돌 / 획득 / 로드)
//! - Config: 통합 설정 (TallyConfig)
//! - Storage: PluginRepository 계약, SQLite / 인메모리 백엔드, JsonStore
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  PluginService (tally-core)                 │
//! │                     │                       │
//! │                     ▼                       │
//! │        Arc<dyn PluginRepository>            │
//! │          ┌─────────┴─────────┐              │
//! │          ▼                   ▼              │
//! │   Storage (SQLite)    MemoryRepository      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    HookConfig, HttpConfig, IndexConfig, OfficialRegistryConfig, TallyConfig, DATA_DIR_ENV,
    TALLY_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{
    JsonStore, MemoryRepository, NewPlugin, NewRegistry, PluginRecord, PluginRepository,
    PluginState, RegistryRecord, SourceType, Storage, TenantPluginRecord,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
