//! Plugin repository contract
//!
//! 플러그인 서비스가 영속 계층과 접촉하는 유일한 인터페이스.
//! 모든 백엔드(SQLite, 인메모리)는 메서드별로 동일한 사전/사후 조건을 만족해야 한다.
//!
//! ## 공통 규칙
//!
//! - `get_*`: 행이 없으면 `Ok(None)`
//! - 변경 메서드(update/set/delete): 대상 행이 없으면 `Error::NotFound`
//! - `insert_plugin`, `create_registry`: 이름 중복이면 `Error::Conflict`
//! - `delete_plugin`: 해당 플러그인의 테넌트 행도 함께 삭제

use super::records::{
    NewPlugin, NewRegistry, PluginRecord, PluginState, RegistryRecord, TenantPluginRecord,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[async_trait]
pub trait PluginRepository: Send + Sync {
    // ========================================================================
    // Registries
    // ========================================================================

    /// 생성 순서대로 전체 레지스트리
    async fn list_registries(&self) -> Result<Vec<RegistryRecord>>;

    async fn list_active_registries(&self) -> Result<Vec<RegistryRecord>>;

    async fn get_registry(&self, id: &str) -> Result<Option<RegistryRecord>>;

    async fn get_registry_by_name(&self, name: &str) -> Result<Option<RegistryRecord>>;

    /// 새 레지스트리 (활성 상태로 생성)
    async fn create_registry(&self, registry: NewRegistry) -> Result<RegistryRecord>;

    /// name/url/description/is_active 갱신
    async fn update_registry(&self, registry: &RegistryRecord) -> Result<()>;

    async fn set_registry_active(&self, id: &str, active: bool) -> Result<()>;

    /// 동기화 시각만 기록 (인덱스 내용은 저장하지 않음)
    async fn mark_registry_synced(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn delete_registry(&self, id: &str) -> Result<()>;

    // ========================================================================
    // Plugins
    // ========================================================================

    /// 이름순 전체 플러그인
    async fn list_plugins(&self) -> Result<Vec<PluginRecord>>;

    async fn list_plugins_by_state(&self, state: PluginState) -> Result<Vec<PluginRecord>>;

    /// 부팅 시 재로드 대상
    async fn list_enabled_plugins(&self) -> Result<Vec<PluginRecord>> {
        self.list_plugins_by_state(PluginState::Enabled).await
    }

    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>>;

    async fn get_plugin_by_name(&self, name: &str) -> Result<Option<PluginRecord>>;

    async fn plugin_name_exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_plugin_by_name(name).await?.is_some())
    }

    /// `installed` 상태, 빈 권한으로 삽입하고 전체 레코드를 반환
    async fn insert_plugin(&self, plugin: NewPlugin) -> Result<PluginRecord>;

    /// 상태만 변경 (권한은 유지)
    async fn update_plugin_state(&self, id: &str, state: PluginState) -> Result<()>;

    /// 상태와 부여 권한을 한 번에 기록
    async fn update_plugin_state_with_permissions(
        &self,
        id: &str,
        state: PluginState,
        permissions: &[String],
    ) -> Result<()>;

    /// 플러그인과 테넌트 행 삭제
    async fn delete_plugin(&self, id: &str) -> Result<()>;

    // ========================================================================
    // Tenant plugins
    // ========================================================================

    async fn list_tenant_plugins(&self, tenant_id: &str) -> Result<Vec<TenantPluginRecord>>;

    async fn list_enabled_tenant_plugins(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<TenantPluginRecord>>;

    async fn get_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<TenantPluginRecord>>;

    /// (tenant, plugin) 키로 삽입 또는 갱신.
    ///
    /// `settings`가 `None`이면 기존 설정을 유지한다. 활성화 시 `enabled_at`을 갱신한다.
    /// 참조하는 플러그인이 없으면 `Error::NotFound`.
    async fn upsert_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Option<Value>,
        enabled: bool,
    ) -> Result<TenantPluginRecord>;

    /// 행을 삭제하지 않고 플래그만 변경
    async fn set_tenant_plugin_enabled(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<()>;

    /// 행이 없으면 `Error::NotFound`, 설정이 비어 있으면 `Ok(None)`
    async fn get_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<Value>>;

    async fn update_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Value,
    ) -> Result<()>;

    async fn delete_tenant_plugin(&self, tenant_id: &str, plugin_id: &str) -> Result<()>;

    /// 해당 플러그인을 활성화한 테넌트 수
    async fn count_enabled_tenants(&self, plugin_id: &str) -> Result<usize>;

    async fn list_plugin_tenants(&self, plugin_id: &str) -> Result<Vec<TenantPluginRecord>>;

    /// 모든 테넌트 행을 `is_enabled=false`로 (행은 유지). 변경된 행 수 반환
    async fn disable_all_tenants_for_plugin(&self, plugin_id: &str) -> Result<usize>;
}
