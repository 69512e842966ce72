//! 설치 → 활성화 → 테넌트 → 비활성화 → 제거 전체 흐름 (SQLite 백엔드)

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tally_core::plugin::{Event, EventType, HookRegistry, PluginService, RemoteFetcher, RepositoryUrl};
use tally_foundation::{Error, IndexConfig, PluginState, Result, Storage};
use tempfile::TempDir;

const MANIFEST: &str = r#"
name: invoice-reminders
display_name: Invoice Reminders
version: 2.0.0-beta.1
author: Acme
license: Apache-2.0
permissions:
  - invoices:read
  - email:send
  - hooks:register
  - database:migrate
backend:
  package: reminders
  entry: ./server/main.js
  hooks:
    - event: invoice.overdue
      handler: sendReminder
database:
  migrations: ./migrations
settings_schema:
  type: object
"#;

const INDEX: &str = r#"{
    "version": "1",
    "plugins": [
        {"name": "invoice-reminders", "display_name": "Invoice Reminders", "description": "Chase overdue invoices", "source_url": "https://github.com/acme/invoice-reminders", "version": "2.0.0-beta.1", "tags": ["invoices", "email"]}
    ]
}"#;

/// 메모리에 있는 저장소 트리와 파일을 돌려주는 fetcher
struct FixtureFetcher {
    trees: HashMap<String, Vec<(&'static str, &'static str)>>,
    files: HashMap<String, &'static str>,
}

#[async_trait]
impl RemoteFetcher for FixtureFetcher {
    async fn fetch_tree(&self, repository: &RepositoryUrl, dest: &Path) -> Result<()> {
        let files = self
            .trees
            .get(&repository.browse_url())
            .ok_or_else(|| Error::Acquisition(format!("{} not reachable", repository)))?;

        std::fs::create_dir_all(dest)?;
        for (name, content) in files {
            std::fs::write(dest.join(name), content)?;
        }
        Ok(())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.files
            .get(url)
            .map(|c| c.as_bytes().to_vec())
            .ok_or_else(|| Error::Http(format!("GET {} returned HTTP 404", url)))
    }
}

fn service(temp: &TempDir) -> PluginService {
    let mut trees = HashMap::new();
    trees.insert(
        "https://github.com/acme/invoice-reminders".to_string(),
        vec![("plugin.yaml", MANIFEST), ("LICENSE.md", "Apache License 2.0")],
    );
    trees.insert(
        "https://github.com/acme/unlicensed".to_string(),
        vec![("plugin.yaml", MANIFEST)],
    );

    let mut files = HashMap::new();
    files.insert(
        "https://raw.githubusercontent.com/tally-books/plugin-registry/main/registry.json"
            .to_string(),
        INDEX,
    );

    let repo = Arc::new(Storage::in_memory().unwrap());
    PluginService::new(
        repo,
        Arc::new(HookRegistry::new()),
        Arc::new(FixtureFetcher { trees, files }),
        temp.path().join("plugins"),
        IndexConfig::default(),
    )
}

fn perms(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_lifecycle() {
    let temp = TempDir::new().unwrap();
    let service = service(&temp);

    // install
    let plugin = service
        .install("https://github.com/acme/invoice-reminders.git")
        .await
        .unwrap();
    assert_eq!(plugin.state, PluginState::Installed);
    assert_eq!(plugin.source_url, "https://github.com/acme/invoice-reminders");

    // 필수 권한 누락 → 거부, 상태 유지
    let err = service
        .enable(&plugin.id, &perms(&["invoices:read", "hooks:register"]))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        service.get_plugin(&plugin.id).await.unwrap().state,
        PluginState::Installed
    );

    // 전체 권한 → enabled, 로드됨
    let enabled = service
        .enable(
            &plugin.id,
            &perms(&["invoices:read", "hooks:register", "database:migrate"]),
        )
        .await
        .unwrap();
    assert_eq!(enabled.state, PluginState::Enabled);
    let loaded = service.get_loaded_plugin("invoice-reminders").await.unwrap();
    assert!(loaded.has_granted("database:migrate"));
    assert_eq!(service.hooks().handler_count("invoice.overdue"), 1);

    service
        .hooks()
        .emit(&Event::of(EventType::InvoiceOverdue, "tenant-a", json!({"invoice": 7})))
        .await;

    // 테넌트 활성화 (멱등, 최신 설정 유지)
    service
        .enable_for_tenant("tenant-a", &plugin.id, Some(json!({"days": 7})))
        .await
        .unwrap();
    service
        .enable_for_tenant("tenant-a", &plugin.id, Some(json!({"days": 14})))
        .await
        .unwrap();
    let rows = service.list_tenant_plugins("tenant-a").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].settings, Some(json!({"days": 14})));

    // disable → 로드 해제, 테넌트 행 비활성화
    let disabled = service.disable(&plugin.id).await.unwrap();
    assert_eq!(disabled.state, PluginState::Disabled);
    assert!(service.get_loaded_plugin("invoice-reminders").await.is_none());
    assert_eq!(service.hooks().total_handlers(), 0);
    let rows = service.list_tenant_plugins("tenant-a").await.unwrap();
    assert!(!rows[0].is_enabled);

    // 다시 활성화하고 테넌트를 켠 상태에서 제거 → 충돌
    service
        .enable(
            &plugin.id,
            &perms(&["invoices:read", "hooks:register", "database:migrate"]),
        )
        .await
        .unwrap();
    service
        .enable_for_tenant("tenant-a", &plugin.id, None)
        .await
        .unwrap();
    assert_eq!(
        service
            .get_tenant_settings("tenant-a", &plugin.id)
            .await
            .unwrap(),
        Some(json!({"days": 14}))
    );
    let err = service.uninstall(&plugin.id).await.unwrap_err();
    assert!(err.is_conflict());

    service
        .disable_for_tenant("tenant-a", &plugin.id)
        .await
        .unwrap();
    service.uninstall(&plugin.id).await.unwrap();
    assert!(service.list_plugins().await.unwrap().is_empty());
    assert!(!temp.path().join("plugins/github_acme_invoice-reminders").exists());
}

#[tokio::test]
async fn test_install_without_license_is_rejected() {
    let temp = TempDir::new().unwrap();
    let service = service(&temp);

    let err = service
        .install("https://github.com/acme/unlicensed")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Acquisition(_)));
    assert!(!temp.path().join("plugins/github_acme_unlicensed").exists());

    let err = service
        .install("https://bitbucket.org/acme/invoice-reminders")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_official_registry_sync_and_search() {
    let temp = TempDir::new().unwrap();
    let service = service(&temp);

    let official = service.ensure_official_registry().await.unwrap();
    assert!(official.last_synced_at.is_none());

    let synced = service.sync_registry(&official.id).await.unwrap();
    assert!(synced.registry.last_synced_at.is_some());
    assert_eq!(synced.index.plugins.len(), 1);

    // 도달할 수 없는 레지스트리는 검색에서 건너뛴다
    service
        .add_registry("mirror", "https://gitlab.com/acme/mirror", None)
        .await
        .unwrap();

    let results = service.search_plugins("OVERDUE").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].registry_name, "official");
    assert_eq!(results[0].plugin.name, "invoice-reminders");

    assert!(service.search_plugins("payroll").await.unwrap().is_empty());
}
