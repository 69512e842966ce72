//! Storage module for Tally
//!
//! - `repository`: PluginRepository - 플러그인 서비스의 유일한 영속 계약
//! - `db`: SQLite - 운영 백엔드 (레지스트리, 플러그인, 테넌트 활성화)
//! - `memory`: 인메모리 - 테스트 백엔드
//! - `json`: JSON - 설정 파일 저장/로드

mod db;
mod json;
mod memory;
mod records;
mod repository;

// Records
pub use records::{
    NewPlugin, NewRegistry, PluginRecord, PluginState, RegistryRecord, SourceType,
    TenantPluginRecord,
};

// Repository contract + backends
pub use db::Storage;
pub use memory::MemoryRepository;
pub use repository::PluginRepository;

// JSON Storage (설정)
pub use json::JsonStore;
