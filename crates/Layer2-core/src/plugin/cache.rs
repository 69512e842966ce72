//! Loaded Plugin Cache - 메모리에 로드된 플러그인
//!
//! `enabled` 상태인 동안에만 존재한다. 활성화/부팅 재로드 시 생성되고,
//! 비활성화/제거 시 삭제된다.

use super::manifest::Manifest;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tally_foundation::PluginRecord;
use tokio::sync::RwLock;
use tracing::debug;

/// 로드된 플러그인 (레코드 + 파싱된 매니페스트)
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub record: PluginRecord,
    pub manifest: Manifest,
    /// 소스 트리 위치
    pub install_dir: PathBuf,
    /// 등록된 hook 수
    pub hook_count: usize,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn has_granted(&self, permission: &str) -> bool {
        self.record
            .granted_permissions
            .iter()
            .any(|p| p == permission)
    }
}

struct CacheEntry {
    plugin: Arc<LoadedPlugin>,
    load_order: usize,
}

/// 플러그인 이름 → 로드된 플러그인
pub struct PluginCache {
    plugins: RwLock<HashMap<String, CacheEntry>>,
    load_counter: RwLock<usize>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            load_counter: RwLock::new(0),
        }
    }

    /// 삽입 (같은 이름이면 교체). 이전 항목 반환
    ///
    /// 호출자가 넘긴 `Arc`를 그대로 보관하므로 `get`은 같은 인스턴스를 돌려준다.
    pub async fn insert(&self, plugin: Arc<LoadedPlugin>) -> Option<Arc<LoadedPlugin>> {
        let name = plugin.name().to_string();

        let load_order = {
            let mut counter = self.load_counter.write().await;
            *counter += 1;
            *counter
        };

        let mut plugins = self.plugins.write().await;
        let previous = plugins.insert(
            name.clone(),
            CacheEntry { plugin, load_order },
        );

        debug!(plugin = %name, "Cached loaded plugin");
        previous.map(|e| e.plugin)
    }

    /// 이름으로 제거
    pub async fn remove(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        let mut plugins = self.plugins.write().await;
        plugins.remove(name).map(|e| e.plugin)
    }

    /// ID로 제거
    pub async fn remove_by_id(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        let mut plugins = self.plugins.write().await;
        let name = plugins
            .iter()
            .find(|(_, e)| e.plugin.id() == id)
            .map(|(name, _)| name.clone())?;
        plugins.remove(&name).map(|e| e.plugin)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        let plugins = self.plugins.read().await;
        plugins.get(name).map(|e| Arc::clone(&e.plugin))
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        let plugins = self.plugins.read().await;
        plugins
            .values()
            .find(|e| e.plugin.id() == id)
            .map(|e| Arc::clone(&e.plugin))
    }

    /// 로드 순서대로 전체 목록
    pub async fn list(&self) -> Vec<Arc<LoadedPlugin>> {
        let plugins = self.plugins.read().await;
        let mut entries: Vec<_> = plugins.values().collect();
        entries.sort_by_key(|e| e.load_order);
        entries.iter().map(|e| Arc::clone(&e.plugin)).collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        let plugins = self.plugins.read().await;
        plugins.len()
    }

    pub async fn is_empty(&self) -> bool {
        let plugins = self.plugins.read().await;
        plugins.is_empty()
    }
}

impl Default for PluginCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_foundation::{PluginState, SourceType};

    fn loaded(id: &str, name: &str) -> Arc<LoadedPlugin> {
        let now = Utc::now();
        Arc::new(LoadedPlugin {
            record: PluginRecord {
                id: id.to_string(),
                name: name.to_string(),
                display_name: name.to_string(),
                description: None,
                version: "1.0.0".to_string(),
                source_url: format!("https://github.com/acme/{name}"),
                source_type: SourceType::Github,
                author: None,
                license: None,
                homepage: None,
                state: PluginState::Enabled,
                granted_permissions: vec!["hooks:register".to_string()],
                manifest: json!({}),
                created_at: now,
                updated_at: now,
            },
            manifest: Manifest::default(),
            install_dir: PathBuf::from("/tmp").join(name),
            hook_count: 0,
            loaded_at: now,
        })
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let cache = PluginCache::new();
        assert!(cache.insert(loaded("1", "crm")).await.is_none());
        cache.insert(loaded("2", "payroll-export")).await;

        let stored = cache.get("crm").await.unwrap();
        assert!(Arc::ptr_eq(&stored, &cache.get_by_id("1").await.unwrap()));

        assert_eq!(cache.len().await, 2);
        assert!(cache.contains("crm").await);
        assert_eq!(cache.get_by_id("2").await.unwrap().name(), "payroll-export");
        assert!(cache.get("crm").await.unwrap().has_granted("hooks:register"));

        let names: Vec<_> = cache
            .list()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["crm", "payroll-export"]);
    }

    #[tokio::test]
    async fn test_insert_keeps_caller_instance() {
        let cache = PluginCache::new();
        let plugin = loaded("1", "crm");
        cache.insert(Arc::clone(&plugin)).await;

        assert!(Arc::ptr_eq(&plugin, &cache.get("crm").await.unwrap()));

        let replacement = loaded("1", "crm");
        let previous = cache.insert(Arc::clone(&replacement)).await.unwrap();
        assert!(Arc::ptr_eq(&previous, &plugin));
        assert!(Arc::ptr_eq(&replacement, &cache.get("crm").await.unwrap()));
    }

    #[tokio::test]
    async fn test_replace_and_remove() {
        let cache = PluginCache::new();
        cache.insert(loaded("1", "crm")).await;
        assert!(cache.insert(loaded("1", "crm")).await.is_some());
        assert_eq!(cache.len().await, 1);

        assert!(cache.remove_by_id("1").await.is_some());
        assert!(cache.is_empty().await);
        assert!(cache.remove("crm").await.is_none());
    }
}
