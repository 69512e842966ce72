//! In-memory repository backend
//!
//! 테스트와 임시 실행용. SQLite 백엔드와 동일한 계약을 만족한다.

use super::records::{
    NewPlugin, NewRegistry, PluginRecord, PluginState, RegistryRecord, TenantPluginRecord,
};
use super::repository::PluginRepository;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

#[derive(Default)]
struct MemoryState {
    /// 생성 순서 유지
    registries: Vec<RegistryRecord>,
    plugins: Vec<PluginRecord>,
    tenant_plugins: Vec<TenantPluginRecord>,
}

impl MemoryState {
    fn registry_mut(&mut self, id: &str) -> Result<&mut RegistryRecord> {
        self.registries
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("registry", id))
    }

    fn plugin_mut(&mut self, id: &str) -> Result<&mut PluginRecord> {
        self.plugins
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("plugin", id))
    }

    fn tenant_plugin_mut(
        &mut self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<&mut TenantPluginRecord> {
        self.tenant_plugins
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id && t.plugin_id == plugin_id)
            .ok_or_else(|| {
                Error::not_found("tenant plugin", format!("{tenant_id}/{plugin_id}"))
            })
    }
}

/// 인메모리 저장소
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginRepository for MemoryRepository {
    // ========================================================================
    // Registries
    // ========================================================================

    async fn list_registries(&self) -> Result<Vec<RegistryRecord>> {
        Ok(self.state.read().registries.clone())
    }

    async fn list_active_registries(&self) -> Result<Vec<RegistryRecord>> {
        Ok(self
            .state
            .read()
            .registries
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn get_registry(&self, id: &str) -> Result<Option<RegistryRecord>> {
        Ok(self
            .state
            .read()
            .registries
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn get_registry_by_name(&self, name: &str) -> Result<Option<RegistryRecord>> {
        Ok(self
            .state
            .read()
            .registries
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn create_registry(&self, registry: NewRegistry) -> Result<RegistryRecord> {
        let mut state = self.state.write();
        if state
            .registries
            .iter()
            .any(|r| r.name == registry.name || r.url == registry.url)
        {
            return Err(Error::Conflict(format!(
                "registry '{}' already exists",
                registry.name
            )));
        }

        let now = Utc::now();
        let record = RegistryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: registry.name,
            url: registry.url,
            description: registry.description,
            is_official: registry.is_official,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        state.registries.push(record.clone());
        Ok(record)
    }

    async fn update_registry(&self, registry: &RegistryRecord) -> Result<()> {
        let mut state = self.state.write();
        let existing = state.registry_mut(&registry.id)?;
        existing.name = registry.name.clone();
        existing.url = registry.url.clone();
        existing.description = registry.description.clone();
        existing.is_active = registry.is_active;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn set_registry_active(&self, id: &str, active: bool) -> Result<()> {
        let mut state = self.state.write();
        let existing = state.registry_mut(id)?;
        existing.is_active = active;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_registry_synced(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        let existing = state.registry_mut(id)?;
        existing.last_synced_at = Some(at);
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_registry(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.registries.len();
        state.registries.retain(|r| r.id != id);
        if state.registries.len() == before {
            return Err(Error::not_found("registry", id));
        }
        Ok(())
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        let mut plugins = self.state.read().plugins.clone();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    async fn list_plugins_by_state(&self, state: PluginState) -> Result<Vec<PluginRecord>> {
        let mut plugins: Vec<_> = self
            .state
            .read()
            .plugins
            .iter()
            .filter(|p| p.state == state)
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plugins)
    }

    async fn get_plugin(&self, id: &str) -> Result<Option<PluginRecord>> {
        Ok(self
            .state
            .read()
            .plugins
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn get_plugin_by_name(&self, name: &str) -> Result<Option<PluginRecord>> {
        Ok(self
            .state
            .read()
            .plugins
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn insert_plugin(&self, plugin: NewPlugin) -> Result<PluginRecord> {
        let mut state = self.state.write();
        if state.plugins.iter().any(|p| p.name == plugin.name) {
            return Err(Error::Conflict(format!(
                "plugin '{}' is already installed",
                plugin.name
            )));
        }

        let record = plugin.into_record(uuid::Uuid::new_v4().to_string(), Utc::now());
        state.plugins.push(record.clone());
        Ok(record)
    }

    async fn update_plugin_state(&self, id: &str, new_state: PluginState) -> Result<()> {
        let mut state = self.state.write();
        let plugin = state.plugin_mut(id)?;
        plugin.state = new_state;
        plugin.updated_at = Utc::now();
        Ok(())
    }

    async fn update_plugin_state_with_permissions(
        &self,
        id: &str,
        new_state: PluginState,
        permissions: &[String],
    ) -> Result<()> {
        let mut state = self.state.write();
        let plugin = state.plugin_mut(id)?;
        plugin.state = new_state;
        plugin.granted_permissions = permissions.to_vec();
        plugin.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_plugin(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.plugins.len();
        state.plugins.retain(|p| p.id != id);
        if state.plugins.len() == before {
            return Err(Error::not_found("plugin", id));
        }
        state.tenant_plugins.retain(|t| t.plugin_id != id);
        Ok(())
    }

    // ========================================================================
    // Tenant plugins
    // ========================================================================

    async fn list_tenant_plugins(&self, tenant_id: &str) -> Result<Vec<TenantPluginRecord>> {
        Ok(self
            .state
            .read()
            .tenant_plugins
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_enabled_tenant_plugins(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<TenantPluginRecord>> {
        Ok(self
            .state
            .read()
            .tenant_plugins
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.is_enabled)
            .cloned()
            .collect())
    }

    async fn get_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<TenantPluginRecord>> {
        Ok(self
            .state
            .read()
            .tenant_plugins
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.plugin_id == plugin_id)
            .cloned())
    }

    async fn upsert_tenant_plugin(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Option<Value>,
        enabled: bool,
    ) -> Result<TenantPluginRecord> {
        let mut state = self.state.write();
        if !state.plugins.iter().any(|p| p.id == plugin_id) {
            return Err(Error::not_found("plugin", plugin_id));
        }

        let now = Utc::now();
        if let Ok(existing) = state.tenant_plugin_mut(tenant_id, plugin_id) {
            if settings.is_some() {
                existing.settings = settings;
            }
            existing.is_enabled = enabled;
            if enabled {
                existing.enabled_at = Some(now);
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = TenantPluginRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            plugin_id: plugin_id.to_string(),
            settings,
            is_enabled: enabled,
            enabled_at: enabled.then_some(now),
            created_at: now,
            updated_at: now,
        };
        state.tenant_plugins.push(record.clone());
        Ok(record)
    }

    async fn set_tenant_plugin_enabled(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<()> {
        let mut state = self.state.write();
        let row = state.tenant_plugin_mut(tenant_id, plugin_id)?;
        let now = Utc::now();
        row.is_enabled = enabled;
        if enabled {
            row.enabled_at = Some(now);
        }
        row.updated_at = now;
        Ok(())
    }

    async fn get_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<Value>> {
        self.state
            .read()
            .tenant_plugins
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.plugin_id == plugin_id)
            .map(|t| t.settings.clone())
            .ok_or_else(|| {
                Error::not_found("tenant plugin", format!("{tenant_id}/{plugin_id}"))
            })
    }

    async fn update_tenant_plugin_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Value,
    ) -> Result<()> {
        let mut state = self.state.write();
        let row = state.tenant_plugin_mut(tenant_id, plugin_id)?;
        row.settings = Some(settings);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_tenant_plugin(&self, tenant_id: &str, plugin_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.tenant_plugins.len();
        state
            .tenant_plugins
            .retain(|t| !(t.tenant_id == tenant_id && t.plugin_id == plugin_id));
        if state.tenant_plugins.len() == before {
            return Err(Error::not_found(
                "tenant plugin",
                format!("{tenant_id}/{plugin_id}"),
            ));
        }
        Ok(())
    }

    async fn count_enabled_tenants(&self, plugin_id: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .tenant_plugins
            .iter()
            .filter(|t| t.plugin_id == plugin_id && t.is_enabled)
            .count())
    }

    async fn list_plugin_tenants(&self, plugin_id: &str) -> Result<Vec<TenantPluginRecord>> {
        Ok(self
            .state
            .read()
            .tenant_plugins
            .iter()
            .filter(|t| t.plugin_id == plugin_id)
            .cloned()
            .collect())
    }

    async fn disable_all_tenants_for_plugin(&self, plugin_id: &str) -> Result<usize> {
        let mut state = self.state.write();
        let now = Utc::now();
        let mut changed = 0;
        for row in state
            .tenant_plugins
            .iter_mut()
            .filter(|t| t.plugin_id == plugin_id && t.is_enabled)
        {
            row.is_enabled = false;
            row.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }
}
