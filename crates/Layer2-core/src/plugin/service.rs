//! Plugin Service - 플러그인 라이프사이클 관리
//!
//! 인스턴스 범위 상태 머신과 테넌트 범위 활성화를 조정한다.
//!
//! ```text
//! installed ──enable──▶ enabled ──disable──▶ disabled
//!     │                   │  ▲                  │
//!     │            load 실패  └──────enable──────┘
//!     │                   ▼
//!     └────enable────▶ failed (권한 회수)
//! ```
//!
//! 저장소 호출과 메모리 변경은 원자적이지 않다. 저장소에는 `enabled`인데
//! hook이 등록되지 않은 상태는 부팅 재로드(`load_enabled_plugins`)가 복구한다.

use super::acquisition::{
    AcquiredSource, GitHttpFetcher, RemoteFetcher, RepositoryAcquirer, RepositoryUrl,
};
use super::cache::{LoadedPlugin, PluginCache};
use super::events::{HookHandler, HookRegistry};
use super::factory::{HookHandlerFactory, LoggingHandlerFactory};
use super::manifest::{HookDeclaration, Manifest};
use super::marketplace::{Marketplace, RegistryIndex, SearchResult};
use super::permission::{
    has_dangerous_permissions, summarize_permissions, validate_permissions, PermissionSummary,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_foundation::{
    Error, IndexConfig, NewPlugin, NewRegistry, OfficialRegistryConfig, PluginRecord,
    PluginRepository, PluginState, RegistryRecord, Result, TallyConfig, TenantPluginRecord,
};
use tracing::{debug, error, info, warn};

const HOOKS_PERMISSION: &str = "hooks:register";

// ============================================================================
// 결과 타입
// ============================================================================

/// 레지스트리 동기화 결과
#[derive(Debug, Clone)]
pub struct RegistrySync {
    pub registry: RegistryRecord,
    pub index: RegistryIndex,
}

/// 부팅 재로드 결과
#[derive(Debug, Clone, Default)]
pub struct ReloadReport {
    /// 로드된 플러그인 이름
    pub loaded: Vec<String>,
    /// (플러그인 이름, 사유)
    pub skipped: Vec<(String, String)>,
}

/// 활성화 전 검토용 권한 보고서
#[derive(Debug, Clone, Serialize)]
pub struct PermissionReport {
    pub plugin: String,
    pub requested: Vec<String>,
    pub required: Vec<String>,
    pub summary: PermissionSummary,
    pub dangerous: bool,
}

// ============================================================================
// PluginService
// ============================================================================

pub struct PluginService {
    repo: Arc<dyn PluginRepository>,
    hooks: Arc<HookRegistry>,
    cache: PluginCache,
    acquirer: RepositoryAcquirer,
    marketplace: Marketplace,
    handler_factory: Arc<dyn HookHandlerFactory>,
    official_registry: OfficialRegistryConfig,
}

impl PluginService {
    pub fn new(
        repo: Arc<dyn PluginRepository>,
        hooks: Arc<HookRegistry>,
        fetcher: Arc<dyn RemoteFetcher>,
        plugins_dir: impl Into<PathBuf>,
        index: IndexConfig,
    ) -> Self {
        Self {
            repo,
            hooks,
            cache: PluginCache::new(),
            acquirer: RepositoryAcquirer::new(plugins_dir, Arc::clone(&fetcher)),
            marketplace: Marketplace::new(fetcher, index),
            handler_factory: Arc::new(LoggingHandlerFactory),
            official_registry: OfficialRegistryConfig::default(),
        }
    }

    /// 설정으로 생성 (git + HTTP fetcher)
    pub fn from_config(config: &TallyConfig, repo: Arc<dyn PluginRepository>) -> Result<Self> {
        let fetcher = Arc::new(GitHttpFetcher::new(&config.http)?);
        let hooks = Arc::new(HookRegistry::with_deadline(Duration::from_secs(
            config.hooks.async_deadline_secs,
        )));

        Ok(Self::new(
            repo,
            hooks,
            fetcher,
            config.resolved_plugins_dir(),
            config.index.clone(),
        )
        .with_official_registry(config.official_registry.clone()))
    }

    pub fn with_handler_factory(mut self, factory: Arc<dyn HookHandlerFactory>) -> Self {
        self.handler_factory = factory;
        self
    }

    pub fn with_official_registry(mut self, official: OfficialRegistryConfig) -> Self {
        self.official_registry = official;
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn repository(&self) -> &Arc<dyn PluginRepository> {
        &self.repo
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// 공식 레지스트리가 없으면 생성
    pub async fn ensure_official_registry(&self) -> Result<RegistryRecord> {
        if let Some(existing) = self
            .repo
            .get_registry_by_name(&self.official_registry.name)
            .await?
        {
            return Ok(existing);
        }

        let official = NewRegistry::new(&self.official_registry.name, &self.official_registry.url)
            .with_description(&self.official_registry.description)
            .official();
        let record = self.repo.create_registry(official).await?;
        info!(registry = %record.name, "Seeded official registry");
        Ok(record)
    }

    pub async fn list_registries(&self) -> Result<Vec<RegistryRecord>> {
        self.repo.list_registries().await
    }

    pub async fn add_registry(
        &self,
        name: &str,
        url: &str,
        description: Option<String>,
    ) -> Result<RegistryRecord> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("registry name is required".into()));
        }
        RepositoryUrl::parse(url).map_err(|e| e.with_context("add registry"))?;

        let mut registry = NewRegistry::new(name.trim(), url.trim());
        registry.description = description;

        let record = self
            .repo
            .create_registry(registry)
            .await
            .map_err(|e| e.with_context("add registry"))?;
        info!(registry = %record.name, url = %record.url, "Registry added");
        Ok(record)
    }

    /// 공식 레지스트리는 삭제할 수 없다
    pub async fn remove_registry(&self, id: &str) -> Result<()> {
        let registry = self.require_registry(id).await?;
        if registry.is_official {
            return Err(Error::Conflict(format!(
                "registry '{}' is the official registry and cannot be removed",
                registry.name
            )));
        }

        self.repo.delete_registry(id).await?;
        info!(registry = %registry.name, "Registry removed");
        Ok(())
    }

    /// 인덱스를 받고 `last_synced_at`만 기록
    pub async fn sync_registry(&self, id: &str) -> Result<RegistrySync> {
        let registry = self.require_registry(id).await?;
        let index = self
            .marketplace
            .fetch_index(&registry)
            .await
            .map_err(|e| e.with_context("sync registry"))?;

        self.repo.mark_registry_synced(id, Utc::now()).await?;
        let registry = self.require_registry(id).await?;

        info!(
            registry = %registry.name,
            plugins = index.plugins.len(),
            "Registry synced"
        );
        Ok(RegistrySync { registry, index })
    }

    /// 활성 레지스트리 전체 검색
    pub async fn search_plugins(&self, query: &str) -> Result<Vec<SearchResult>> {
        let registries = self.repo.list_active_registries().await?;
        Ok(self.marketplace.search(&registries, query).await)
    }

    // ========================================================================
    // Install / Uninstall
    // ========================================================================

    /// 같은 저장소에서 이미 설치된 플러그인이 있으면 디스크를 건드리기 전에 거부
    pub async fn install(&self, url: &str) -> Result<PluginRecord> {
        let repository =
            RepositoryUrl::parse(url).map_err(|e| e.with_context("install plugin"))?;
        if let Some(existing) = self.find_by_source(&repository).await? {
            return Err(Error::Conflict(format!(
                "plugin '{}' is already installed from {}",
                existing.name, existing.source_url
            ))
            .with_context("install plugin"));
        }

        let acquired = self
            .acquirer
            .acquire(url)
            .await
            .map_err(|e| e.with_context("install plugin"))?;

        match self.register_acquired(&acquired).await {
            Ok(record) => {
                info!(
                    plugin = %record.name,
                    version = %record.version,
                    "Plugin installed"
                );
                Ok(record)
            }
            Err(e) => Err(e.with_context("install plugin")),
        }
    }

    async fn register_acquired(&self, acquired: &AcquiredSource) -> Result<PluginRecord> {
        let manifest = match Manifest::from_file(&acquired.manifest_path)
            .and_then(|m| m.validate().map(|_| m))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                self.acquirer.discard(&acquired.install_dir).await;
                return Err(e.into());
            }
        };

        // 다른 저장소라 설치 디렉토리도 다르다
        match self.repo.get_plugin_by_name(&manifest.name).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                self.acquirer.discard(&acquired.install_dir).await;
                return Err(Error::Conflict(format!(
                    "plugin '{}' is already installed",
                    manifest.name
                )));
            }
            Err(e) => {
                self.acquirer.discard(&acquired.install_dir).await;
                return Err(e);
            }
        }

        let new_plugin = NewPlugin {
            name: manifest.name.clone(),
            display_name: manifest.display_name.clone(),
            description: manifest.description.clone(),
            version: manifest.version.clone(),
            source_url: acquired.repository.browse_url(),
            source_type: acquired.repository.source_type,
            author: manifest.author.clone(),
            license: manifest.license.clone(),
            homepage: manifest.homepage.clone(),
            manifest: manifest.to_value()?,
        };

        match self.repo.insert_plugin(new_plugin).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.acquirer.discard(&acquired.install_dir).await;
                Err(e)
            }
        }
    }

    /// 소스 URL이 같은 설치된 플러그인 (저장소 경로는 대소문자를 구분하지 않는다)
    async fn find_by_source(&self, repository: &RepositoryUrl) -> Result<Option<PluginRecord>> {
        let source_url = repository.browse_url();
        Ok(self
            .repo
            .list_plugins()
            .await?
            .into_iter()
            .find(|p| p.source_url.eq_ignore_ascii_case(&source_url)))
    }

    /// 활성화한 테넌트가 남아 있으면 거부
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        let plugin = self.get_plugin(id).await?;

        let enabled_tenants = self.repo.count_enabled_tenants(id).await?;
        if enabled_tenants > 0 {
            return Err(Error::Conflict(format!(
                "plugin '{}' is still enabled for {} tenant(s)",
                plugin.name, enabled_tenants
            )));
        }

        self.unload(&plugin).await;
        self.repo
            .delete_plugin(id)
            .await
            .map_err(|e| e.with_context("uninstall plugin"))?;

        // 저장소가 기준이므로 파일 삭제 실패는 치명적이지 않다
        match self.acquirer.install_dir_for(&plugin.source_url) {
            Ok(dir) => {
                if let Err(e) = self.acquirer.remove(&dir).await {
                    warn!(plugin = %plugin.name, "Failed to remove plugin files at {:?}: {}", dir, e);
                }
            }
            Err(e) => warn!(plugin = %plugin.name, "Cannot resolve plugin files: {}", e),
        }

        info!(plugin = %plugin.name, "Plugin uninstalled");
        Ok(())
    }

    // ========================================================================
    // Enable / Disable (instance scope)
    // ========================================================================

    pub async fn enable(&self, id: &str, requested: &[String]) -> Result<PluginRecord> {
        let plugin = self.get_plugin(id).await?;
        if plugin.state == PluginState::Enabled {
            return Err(Error::Conflict(format!(
                "plugin '{}' is already enabled",
                plugin.name
            )));
        }

        let unknown = validate_permissions(requested);
        if !unknown.is_empty() {
            return Err(Error::Validation(format!(
                "unknown permissions: {}",
                unknown.join(", ")
            )));
        }

        let manifest = Manifest::from_value(&plugin.manifest)?;
        let missing: Vec<String> = manifest
            .required_permissions()
            .into_iter()
            .filter(|p| !requested.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "plugin '{}' requires permissions that were not granted: {}",
                plugin.name,
                missing.join(", ")
            )));
        }

        let mut granted: Vec<String> = Vec::with_capacity(requested.len());
        for permission in requested {
            if !granted.contains(permission) {
                granted.push(permission.clone());
            }
        }

        self.repo
            .update_plugin_state_with_permissions(id, PluginState::Enabled, &granted)
            .await
            .map_err(|e| e.with_context("enable plugin"))?;

        let mut record = plugin;
        record.state = PluginState::Enabled;
        record.granted_permissions = granted;

        if let Err(e) = self.load_with_manifest(record.clone(), manifest).await {
            error!(plugin = %record.name, "Plugin failed to load: {}", e);
            if let Err(revert) = self
                .repo
                .update_plugin_state_with_permissions(id, PluginState::Failed, &[])
                .await
            {
                warn!(plugin = %record.name, "Failed to mark plugin as failed: {}", revert);
            }
            return Err(e.with_context("enable plugin"));
        }

        info!(
            plugin = %record.name,
            permissions = record.granted_permissions.len(),
            "Plugin enabled"
        );
        self.get_plugin(id).await
    }

    /// hook 해제, 캐시 제거, 모든 테넌트 비활성화 (행은 유지)
    pub async fn disable(&self, id: &str) -> Result<PluginRecord> {
        let plugin = self.get_plugin(id).await?;
        if plugin.state == PluginState::Disabled {
            return Err(Error::Conflict(format!(
                "plugin '{}' is already disabled",
                plugin.name
            )));
        }

        self.unload(&plugin).await;
        self.repo
            .update_plugin_state(id, PluginState::Disabled)
            .await
            .map_err(|e| e.with_context("disable plugin"))?;

        let tenants = self
            .repo
            .disable_all_tenants_for_plugin(id)
            .await
            .map_err(|e| e.with_context("disable plugin"))?;

        info!(plugin = %plugin.name, tenants, "Plugin disabled");
        self.get_plugin(id).await
    }

    // ========================================================================
    // 메모리 로드
    // ========================================================================

    /// 저장된 매니페스트로 메모리에 로드 (재호출 시 교체)
    pub async fn load_plugin(&self, record: &PluginRecord) -> Result<Arc<LoadedPlugin>> {
        let manifest = Manifest::from_value(&record.manifest)?;
        self.load_with_manifest(record.clone(), manifest).await
    }

    async fn load_with_manifest(
        &self,
        record: PluginRecord,
        manifest: Manifest,
    ) -> Result<Arc<LoadedPlugin>> {
        let declared = manifest.hooks();
        if !declared.is_empty()
            && !record
                .granted_permissions
                .iter()
                .any(|p| p == HOOKS_PERMISSION)
        {
            return Err(Error::PluginLoad(format!(
                "plugin '{}' declares hooks but '{}' was not granted",
                record.name, HOOKS_PERMISSION
            )));
        }

        let install_dir = self
            .acquirer
            .install_dir_for(&record.source_url)
            .map_err(|e| Error::PluginLoad(e.to_string()))?;

        // 핸들러를 모두 만든 뒤에 등록한다
        let handlers = declared
            .iter()
            .map(|hook| {
                self.handler_factory
                    .create(&record, hook)
                    .map(|handler| (hook.clone(), handler))
                    .map_err(|e| {
                        Error::PluginLoad(format!(
                            "plugin '{}' hook '{}': {}",
                            record.name, hook.handler, e
                        ))
                    })
            })
            .collect::<Result<Vec<(HookDeclaration, Arc<dyn HookHandler>)>>>()?;

        self.hooks.unregister_plugin_hooks(&record.id);
        for (hook, handler) in &handlers {
            self.hooks
                .register_plugin_hook(&record.id, &hook.event, hook.handler.clone(), Arc::clone(handler));
        }

        let loaded = LoadedPlugin {
            record,
            manifest,
            install_dir,
            hook_count: handlers.len(),
            loaded_at: Utc::now(),
        };
        let loaded = Arc::new(loaded);
        self.cache.insert(Arc::clone(&loaded)).await;

        debug!(plugin = %loaded.name(), hooks = loaded.hook_count, "Plugin loaded");
        Ok(loaded)
    }

    async fn unload(&self, plugin: &PluginRecord) {
        self.cache.remove_by_id(&plugin.id).await;
        let removed = self.hooks.unregister_plugin_hooks(&plugin.id);
        debug!(plugin = %plugin.name, hooks = removed, "Plugin unloaded");
    }

    /// 부팅 시 `enabled` 플러그인 재로드. 한 플러그인의 실패는 나머지를 막지 않는다.
    pub async fn load_enabled_plugins(&self) -> Result<ReloadReport> {
        let plugins = self.repo.list_enabled_plugins().await?;
        let mut report = ReloadReport::default();

        for plugin in plugins {
            match self.load_plugin(&plugin).await {
                Ok(_) => report.loaded.push(plugin.name),
                Err(e) => {
                    warn!(plugin = %plugin.name, "Skipping plugin during reload: {}", e);
                    report.skipped.push((plugin.name, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "Enabled plugins reloaded"
        );
        Ok(report)
    }

    // ========================================================================
    // Tenant scope
    // ========================================================================

    /// 인스턴스에서 `enabled`인 플러그인만 허용. 같은 테넌트에 대해 멱등
    pub async fn enable_for_tenant(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Option<Value>,
    ) -> Result<TenantPluginRecord> {
        require_tenant(tenant_id)?;
        let plugin = self.get_plugin(plugin_id).await?;
        if plugin.state != PluginState::Enabled {
            return Err(Error::Conflict(format!(
                "plugin '{}' is {} for this instance and cannot be enabled for a tenant",
                plugin.name, plugin.state
            )));
        }

        let record = self
            .repo
            .upsert_tenant_plugin(tenant_id, plugin_id, settings, true)
            .await
            .map_err(|e| e.with_context("enable plugin for tenant"))?;

        info!(plugin = %plugin.name, tenant = %tenant_id, "Plugin enabled for tenant");
        Ok(record)
    }

    pub async fn disable_for_tenant(&self, tenant_id: &str, plugin_id: &str) -> Result<()> {
        require_tenant(tenant_id)?;
        let plugin = self.get_plugin(plugin_id).await?;

        self.repo
            .set_tenant_plugin_enabled(tenant_id, plugin_id, false)
            .await
            .map_err(|e| e.with_context("disable plugin for tenant"))?;

        info!(plugin = %plugin.name, tenant = %tenant_id, "Plugin disabled for tenant");
        Ok(())
    }

    pub async fn get_tenant_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
    ) -> Result<Option<Value>> {
        require_tenant(tenant_id)?;
        self.repo
            .get_tenant_plugin_settings(tenant_id, plugin_id)
            .await
    }

    /// 설정은 해석하지 않고 그대로 저장
    pub async fn update_tenant_settings(
        &self,
        tenant_id: &str,
        plugin_id: &str,
        settings: Value,
    ) -> Result<()> {
        require_tenant(tenant_id)?;
        self.repo
            .update_tenant_plugin_settings(tenant_id, plugin_id, settings)
            .await
            .map_err(|e| e.with_context("update tenant settings"))
    }

    pub async fn list_tenant_plugins(&self, tenant_id: &str) -> Result<Vec<TenantPluginRecord>> {
        require_tenant(tenant_id)?;
        self.repo.list_tenant_plugins(tenant_id).await
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        self.repo.list_plugins().await
    }

    pub async fn get_plugin(&self, id: &str) -> Result<PluginRecord> {
        self.repo
            .get_plugin(id)
            .await?
            .ok_or_else(|| Error::not_found("plugin", id))
    }

    pub async fn get_plugin_by_name(&self, name: &str) -> Result<PluginRecord> {
        self.repo
            .get_plugin_by_name(name)
            .await?
            .ok_or_else(|| Error::not_found("plugin", name))
    }

    /// `enabled` 상태로 로드된 플러그인
    pub async fn get_loaded_plugin(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.cache.get(name).await
    }

    pub async fn loaded_plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.cache.list().await
    }

    pub async fn permission_report(&self, id: &str) -> Result<PermissionReport> {
        let plugin = self.get_plugin(id).await?;
        let manifest = Manifest::from_value(&plugin.manifest)?;

        Ok(PermissionReport {
            summary: summarize_permissions(&manifest.permissions),
            dangerous: has_dangerous_permissions(&manifest.permissions),
            required: manifest.required_permissions(),
            requested: manifest.permissions,
            plugin: plugin.name,
        })
    }

    async fn require_registry(&self, id: &str) -> Result<RegistryRecord> {
        self.repo
            .get_registry(id)
            .await?
            .ok_or_else(|| Error::not_found("registry", id))
    }
}

fn require_tenant(tenant_id: &str) -> Result<()> {
    if tenant_id.trim().is_empty() {
        return Err(Error::InvalidInput("tenant id is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::acquisition::fakes::StaticFetcher;
    use crate::plugin::events::{handler_fn, Event, EventType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_foundation::MemoryRepository;
    use tempfile::TempDir;

    const CRM_URL: &str = "https://github.com/acme/crm";
    const LEDGER_URL: &str = "https://gitlab.com/acme/ledger-sync";

    const CRM_MANIFEST: &str = r#"
name: crm
display_name: CRM
version: 1.2.0
description: Customer pipeline
license: MIT
permissions:
  - contacts:read
  - hooks:register
backend:
  package: crm
  entry: ./backend/index.js
  hooks:
    - event: invoice.created
      handler: onInvoiceCreated
    - event: contact.updated
      handler: onContactUpdated
"#;

    const CRM_MIRROR_MANIFEST: &str = r#"
name: crm-mirror
display_name: CRM Mirror
version: 1.0.0
license: MIT
permissions:
  - contacts:read
"#;

    const LEDGER_MANIFEST: &str = r#"
name: ledger-sync
display_name: Ledger Sync
version: 0.3.0
permissions:
  - journal:read
"#;

    struct Fixture {
        _temp: TempDir,
        plugins_dir: PathBuf,
        service: PluginService,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let plugins_dir = temp.path().join("plugins");
        let fetcher = StaticFetcher::new()
            .with_tree(
                CRM_URL,
                &[("plugin.yaml", CRM_MANIFEST), ("LICENSE", "MIT License")],
            )
            .with_tree(
                LEDGER_URL,
                &[("plugin.yml", LEDGER_MANIFEST), ("COPYING", "GPL")],
            )
            .with_tree(
                "https://github.com/other/crm",
                &[("plugin.yaml", CRM_MANIFEST), ("LICENSE", "MIT License")],
            )
            .with_tree(
                "https://gitlab.com/acme/crm",
                &[("plugin.yaml", CRM_MIRROR_MANIFEST), ("LICENSE", "MIT License")],
            )
            .with_tree(
                "https://github.com/acme/broken",
                &[("plugin.yaml", "name: Broken\n"), ("LICENSE", "MIT")],
            );

        let service = PluginService::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(HookRegistry::new()),
            Arc::new(fetcher),
            &plugins_dir,
            IndexConfig::default(),
        );

        Fixture {
            _temp: temp,
            plugins_dir,
            service,
        }
    }

    fn perms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_install_persists_installed_plugin() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();

        assert_eq!(plugin.name, "crm");
        assert_eq!(plugin.state, PluginState::Installed);
        assert!(plugin.granted_permissions.is_empty());
        assert_eq!(plugin.license.as_deref(), Some("MIT"));
        assert!(fx.plugins_dir.join("github_acme_crm/plugin.yaml").exists());
    }

    #[tokio::test]
    async fn test_install_duplicate_name_conflicts() {
        let fx = fixture();
        fx.service.install(CRM_URL).await.unwrap();

        let err = fx
            .service
            .install("https://github.com/other/crm")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(!fx.plugins_dir.join("github_other_crm").exists());
        assert!(fx.plugins_dir.join("github_acme_crm").exists());
    }

    #[tokio::test]
    async fn test_reinstall_same_repository_keeps_installed_tree() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();
        fx.service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap();

        // 원격에 도달할 수 없는 서비스로 같은 저장소를 다시 설치
        let offline = Arc::new(StaticFetcher::new());
        let service = PluginService::new(
            Arc::clone(fx.service.repository()),
            Arc::new(HookRegistry::new()),
            offline.clone(),
            &fx.plugins_dir,
            IndexConfig::default(),
        );

        for url in [
            CRM_URL,
            "https://github.com/acme/crm.git",
            "https://github.com/Acme/CRM",
        ] {
            let err = service.install(url).await.unwrap_err();
            assert!(err.is_conflict(), "{url} should conflict");
            assert!(err.to_string().contains("already installed from"));
        }
        assert_eq!(offline.calls(), 0);

        assert!(fx.plugins_dir.join("github_acme_crm/plugin.yaml").exists());
        assert!(fx.plugins_dir.join("github_acme_crm/LICENSE").exists());
        let stored = fx.service.get_plugin(&plugin.id).await.unwrap();
        assert_eq!(stored.state, PluginState::Enabled);

        // 재로드가 그대로 동작해야 한다
        let report = service.load_enabled_plugins().await.unwrap();
        assert_eq!(report.loaded, vec!["crm".to_string()]);
    }

    #[tokio::test]
    async fn test_same_path_on_both_hosts_installs_separately() {
        let fx = fixture();
        let github = fx.service.install(CRM_URL).await.unwrap();
        let gitlab = fx
            .service
            .install("https://gitlab.com/acme/crm")
            .await
            .unwrap();
        assert_eq!(gitlab.name, "crm-mirror");
        assert_eq!(gitlab.source_url, "https://gitlab.com/acme/crm");

        let github_dir = fx.plugins_dir.join("github_acme_crm");
        let gitlab_dir = fx.plugins_dir.join("gitlab_acme_crm");
        assert!(github_dir.join("plugin.yaml").exists());
        assert!(gitlab_dir.join("plugin.yaml").exists());
        assert!(std::fs::read_to_string(gitlab_dir.join("plugin.yaml"))
            .unwrap()
            .contains("crm-mirror"));

        fx.service.uninstall(&gitlab.id).await.unwrap();
        assert!(!gitlab_dir.exists());
        assert!(github_dir.join("plugin.yaml").exists());

        fx.service
            .enable(&github.id, &perms(&["hooks:register"]))
            .await
            .unwrap();
        let loaded = fx.service.get_loaded_plugin("crm").await.unwrap();
        assert_eq!(loaded.install_dir, github_dir);
    }

    #[tokio::test]
    async fn test_install_invalid_manifest_cleans_up() {
        let fx = fixture();
        let err = fx
            .service
            .install("https://github.com/acme/broken")
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("install plugin: "));
        assert!(!fx.plugins_dir.join("github_acme_broken").exists());
        assert!(fx.service.list_plugins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enable_requires_permissions() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();

        let err = fx
            .service
            .enable(&plugin.id, &perms(&["contacts:read"]))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("hooks:register"));

        let err = fx
            .service
            .enable(&plugin.id, &perms(&["hooks:register", "time:travel"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("time:travel"));

        let unchanged = fx.service.get_plugin(&plugin.id).await.unwrap();
        assert_eq!(unchanged.state, PluginState::Installed);
        assert!(fx.service.get_loaded_plugin("crm").await.is_none());
    }

    #[tokio::test]
    async fn test_enable_registers_hooks() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();

        let enabled = fx
            .service
            .enable(
                &plugin.id,
                &perms(&["hooks:register", "contacts:read", "hooks:register"]),
            )
            .await
            .unwrap();
        assert_eq!(enabled.state, PluginState::Enabled);
        assert_eq!(
            enabled.granted_permissions,
            perms(&["hooks:register", "contacts:read"])
        );

        let hooks = fx.service.hooks();
        assert_eq!(hooks.handler_count("invoice.created"), 1);
        assert_eq!(hooks.plugin_handler_count(&plugin.id), 2);

        let loaded = fx.service.get_loaded_plugin("crm").await.unwrap();
        assert_eq!(loaded.hook_count, 2);
        assert_eq!(loaded.install_dir, fx.plugins_dir.join("github_acme_crm"));

        let err = fx
            .service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_load_plugin_returns_cached_instance() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();
        let enabled = fx
            .service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap();

        let reloaded = fx.service.load_plugin(&enabled).await.unwrap();
        let cached = fx.service.get_loaded_plugin("crm").await.unwrap();
        assert!(Arc::ptr_eq(&reloaded, &cached));
        assert!(Arc::ptr_eq(&cached, &fx.service.loaded_plugins().await[0]));
        assert_eq!(fx.service.hooks().plugin_handler_count(&plugin.id), 2);
    }

    struct FailingFactory;

    impl HookHandlerFactory for FailingFactory {
        fn create(
            &self,
            _plugin: &PluginRecord,
            hook: &HookDeclaration,
        ) -> Result<Arc<dyn HookHandler>> {
            Err(Error::Internal(format!("no handler named {}", hook.handler)))
        }
    }

    #[tokio::test]
    async fn test_load_failure_marks_failed() {
        let mut fx = fixture();
        fx.service = fx.service.with_handler_factory(Arc::new(FailingFactory));
        let plugin = fx.service.install(CRM_URL).await.unwrap();

        let err = fx
            .service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PluginLoad(_)));

        let failed = fx.service.get_plugin(&plugin.id).await.unwrap();
        assert_eq!(failed.state, PluginState::Failed);
        assert!(failed.granted_permissions.is_empty());
        assert_eq!(fx.service.hooks().total_handlers(), 0);
        assert!(fx.service.get_loaded_plugin("crm").await.is_none());
    }

    #[tokio::test]
    async fn test_disable_cascades_to_tenants() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();
        fx.service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap();
        fx.service
            .enable_for_tenant("tenant-a", &plugin.id, Some(json!({"pipeline": "b2b"})))
            .await
            .unwrap();
        fx.service
            .enable_for_tenant("tenant-b", &plugin.id, None)
            .await
            .unwrap();

        let disabled = fx.service.disable(&plugin.id).await.unwrap();
        assert_eq!(disabled.state, PluginState::Disabled);
        assert_eq!(fx.service.hooks().plugin_handler_count(&plugin.id), 0);
        assert!(fx.service.get_loaded_plugin("crm").await.is_none());

        let rows = fx.service.list_tenant_plugins("tenant-a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_enabled);
        assert_eq!(rows[0].settings, Some(json!({"pipeline": "b2b"})));

        assert!(fx.service.disable(&plugin.id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_tenant_enable_guard_and_idempotence() {
        let fx = fixture();
        let plugin = fx.service.install(LEDGER_URL).await.unwrap();

        let err = fx
            .service
            .enable_for_tenant("tenant-a", &plugin.id, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        fx.service
            .enable(&plugin.id, &perms(&["journal:read"]))
            .await
            .unwrap();
        fx.service
            .enable_for_tenant("tenant-a", &plugin.id, Some(json!({"v": 1})))
            .await
            .unwrap();
        fx.service
            .enable_for_tenant("tenant-a", &plugin.id, Some(json!({"v": 2})))
            .await
            .unwrap();

        let rows = fx.service.list_tenant_plugins("tenant-a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            fx.service
                .get_tenant_settings("tenant-a", &plugin.id)
                .await
                .unwrap(),
            Some(json!({"v": 2}))
        );

        fx.service.disable(&plugin.id).await.unwrap();
        let err = fx
            .service
            .enable_for_tenant("tenant-a", &plugin.id, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_uninstall_guard_and_cleanup() {
        let fx = fixture();
        let plugin = fx.service.install(LEDGER_URL).await.unwrap();
        fx.service
            .enable(&plugin.id, &perms(&["journal:read"]))
            .await
            .unwrap();
        fx.service
            .enable_for_tenant("tenant-a", &plugin.id, None)
            .await
            .unwrap();

        let err = fx.service.uninstall(&plugin.id).await.unwrap_err();
        assert!(err.is_conflict());

        fx.service
            .disable_for_tenant("tenant-a", &plugin.id)
            .await
            .unwrap();
        fx.service.uninstall(&plugin.id).await.unwrap();

        assert!(fx.service.get_plugin(&plugin.id).await.unwrap_err().is_not_found());
        assert!(fx.service.get_loaded_plugin("ledger-sync").await.is_none());
        assert!(fx
            .service
            .list_tenant_plugins("tenant-a")
            .await
            .unwrap()
            .is_empty());
        assert!(!fx.plugins_dir.join("gitlab_acme_ledger-sync").exists());
    }

    #[tokio::test]
    async fn test_reload_skips_bad_manifest() {
        let fx = fixture();
        let crm = fx.service.install(CRM_URL).await.unwrap();
        let ledger = fx.service.install(LEDGER_URL).await.unwrap();
        fx.service
            .enable(&crm.id, &perms(&["hooks:register"]))
            .await
            .unwrap();
        fx.service
            .enable(&ledger.id, &perms(&["journal:read"]))
            .await
            .unwrap();

        // 저장된 매니페스트 손상
        let repo = fx.service.repository();
        repo.delete_plugin(&ledger.id).await.unwrap();
        let broken = NewPlugin {
            name: "ledger-sync".to_string(),
            display_name: "Ledger Sync".to_string(),
            description: None,
            version: "0.3.0".to_string(),
            source_url: LEDGER_URL.to_string(),
            source_type: tally_foundation::SourceType::Gitlab,
            author: None,
            license: None,
            homepage: None,
            manifest: json!({"permissions": "not-a-list"}),
        };
        let broken = repo.insert_plugin(broken).await.unwrap();
        repo.update_plugin_state(&broken.id, PluginState::Enabled)
            .await
            .unwrap();

        let report = fx.service.load_enabled_plugins().await.unwrap();
        assert_eq!(report.loaded, vec!["crm".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "ledger-sync");

        // 재로드는 hook을 중복 등록하지 않는다
        fx.service.load_enabled_plugins().await.unwrap();
        assert_eq!(fx.service.hooks().plugin_handler_count(&crm.id), 2);
    }

    #[tokio::test]
    async fn test_plugin_hooks_receive_events() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        fx.service.hooks().register(
            "invoice.created",
            "audit",
            handler_fn(move |_event, _cancel| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            }),
        );

        let plugin = fx.service.install(CRM_URL).await.unwrap();
        fx.service
            .enable(&plugin.id, &perms(&["hooks:register"]))
            .await
            .unwrap();
        fx.service
            .hooks()
            .emit(&Event::of(EventType::InvoiceCreated, "tenant-a", json!({})))
            .await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(fx.service.hooks().handler_count("invoice.created"), 2);
    }

    #[tokio::test]
    async fn test_registries() {
        let fx = fixture();
        let official = fx.service.ensure_official_registry().await.unwrap();
        assert!(official.is_official);
        assert_eq!(
            fx.service.ensure_official_registry().await.unwrap().id,
            official.id
        );

        let err = fx
            .service
            .add_registry("community", "http://github.com/folks/registry", None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let community = fx
            .service
            .add_registry("community", "https://gitlab.com/folks/registry", None)
            .await
            .unwrap();
        assert_eq!(fx.service.list_registries().await.unwrap().len(), 2);

        assert!(fx
            .service
            .remove_registry(&official.id)
            .await
            .unwrap_err()
            .is_conflict());
        fx.service.remove_registry(&community.id).await.unwrap();
        assert!(fx
            .service
            .remove_registry(&community.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_permission_report() {
        let fx = fixture();
        let plugin = fx.service.install(CRM_URL).await.unwrap();

        let report = fx.service.permission_report(&plugin.id).await.unwrap();
        assert_eq!(report.plugin, "crm");
        assert_eq!(report.required, perms(&["hooks:register"]));
        assert_eq!(report.summary.total, 2);
        assert!(report.dangerous);
    }
}
