//! Marketplace - 레지스트리 인덱스 조회와 검색
//!
//! 인덱스는 저장하지 않는다. 동기화는 `last_synced_at`만 기록하고,
//! 검색은 매번 활성 레지스트리 전체에서 인덱스를 다시 받는다.

use super::acquisition::{RemoteFetcher, RepositoryUrl};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_foundation::{Error, IndexConfig, RegistryRecord, Result};
use tracing::{debug, warn};

/// 레지스트리 인덱스 문서
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryIndex {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub plugins: Vec<PluginSummary>,
}

/// 인덱스에 나열된 플러그인 요약
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub source_url: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub downloads: u64,

    #[serde(default)]
    pub stars: u64,
}

impl PluginSummary {
    /// 이름/표시 이름/설명/태그에 대한 대소문자 무시 부분 문자열 검색
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        if query.is_empty() {
            return true;
        }

        self.name.to_lowercase().contains(&query)
            || self.display_name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

/// 검색 결과 (소속 레지스트리 이름 포함)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub registry_name: String,
    pub plugin: PluginSummary,
}

pub struct Marketplace {
    fetcher: Arc<dyn RemoteFetcher>,
    index: IndexConfig,
}

impl Marketplace {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>, index: IndexConfig) -> Self {
        Self { fetcher, index }
    }

    /// 레지스트리 브라우즈 URL → raw 인덱스 URL
    pub fn index_url(&self, registry_url: &str) -> Result<String> {
        let repository = RepositoryUrl::parse(registry_url)?;
        Ok(repository.raw_file_url(&self.index.branch, &self.index.file))
    }

    pub async fn fetch_index(&self, registry: &RegistryRecord) -> Result<RegistryIndex> {
        let url = self.index_url(&registry.url)?;
        debug!(registry = %registry.name, url = %url, "Fetching registry index");

        let bytes = self
            .fetcher
            .fetch_bytes(&url)
            .await
            .map_err(|e| Error::Acquisition(format!("registry '{}': {}", registry.name, e)))?;

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::Acquisition(format!(
                "registry '{}' has an invalid index: {}",
                registry.name, e
            ))
        })
    }

    /// 모든 레지스트리를 동시에 조회. 실패한 레지스트리는 건너뛴다.
    pub async fn search(&self, registries: &[RegistryRecord], query: &str) -> Vec<SearchResult> {
        let fetches = registries.iter().map(|r| self.fetch_index(r));
        let indexes = join_all(fetches).await;

        let mut results = Vec::new();
        for (registry, index) in registries.iter().zip(indexes) {
            let index = match index {
                Ok(index) => index,
                Err(e) => {
                    warn!(registry = %registry.name, "Skipping registry during search: {}", e);
                    continue;
                }
            };

            results.extend(
                index
                    .plugins
                    .into_iter()
                    .filter(|p| p.matches(query))
                    .map(|plugin| SearchResult {
                        registry_name: registry.name.clone(),
                        plugin,
                    }),
            );
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::acquisition::fakes::StaticFetcher;
    use chrono::Utc;

    fn registry(name: &str, url: &str) -> RegistryRecord {
        let now = Utc::now();
        RegistryRecord {
            id: format!("reg-{name}"),
            name: name.to_string(),
            url: url.to_string(),
            description: None,
            is_official: false,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    const OFFICIAL_INDEX: &str = r#"{
        "version": "1",
        "plugins": [
            {"name": "crm", "display_name": "CRM", "description": "Customer pipeline", "source_url": "https://github.com/acme/crm", "version": "1.0.0", "tags": ["sales"], "downloads": 10, "stars": 3},
            {"name": "payroll-export", "display_name": "Payroll Export", "description": "Export payroll runs", "source_url": "https://github.com/acme/payroll-export", "version": "0.2.0", "tags": ["Payroll"]}
        ]
    }"#;

    const COMMUNITY_INDEX: &str = r#"{
        "version": "1",
        "plugins": [
            {"name": "payroll-slack", "display_name": "Payroll to Slack", "source_url": "https://gitlab.com/folks/payroll-slack", "version": "0.1.0"}
        ]
    }"#;

    #[test]
    fn test_matches_is_case_insensitive() {
        let summary = PluginSummary {
            name: "crm".to_string(),
            display_name: "CRM".to_string(),
            description: "Customer pipeline".to_string(),
            tags: vec!["Sales".to_string()],
            ..Default::default()
        };
        assert!(summary.matches("Crm"));
        assert!(summary.matches("PIPELINE"));
        assert!(summary.matches("sales"));
        assert!(!summary.matches("payroll"));
    }

    #[test]
    fn test_index_url() {
        let marketplace = Marketplace::new(Arc::new(StaticFetcher::new()), IndexConfig::default());
        assert_eq!(
            marketplace
                .index_url("https://gitlab.com/folks/registry")
                .unwrap(),
            "https://gitlab.com/folks/registry/-/raw/main/registry.json"
        );
        assert!(marketplace.index_url("https://example.com/a/b").is_err());
    }

    #[tokio::test]
    async fn test_search_unions_and_skips_failures() {
        let fetcher = StaticFetcher::new()
            .with_file(
                "https://raw.githubusercontent.com/acme/registry/main/registry.json",
                OFFICIAL_INDEX,
            )
            .with_file(
                "https://gitlab.com/folks/registry/-/raw/main/registry.json",
                COMMUNITY_INDEX,
            );
        let marketplace = Marketplace::new(Arc::new(fetcher), IndexConfig::default());

        let registries = vec![
            registry("official", "https://github.com/acme/registry"),
            registry("community", "https://gitlab.com/folks/registry"),
            registry("offline", "https://github.com/gone/registry"),
        ];

        let results = marketplace.search(&registries, "payroll").await;
        let found: Vec<_> = results
            .iter()
            .map(|r| (r.registry_name.as_str(), r.plugin.name.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("official", "payroll-export"),
                ("community", "payroll-slack")
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_index_is_error() {
        let fetcher = StaticFetcher::new().with_file(
            "https://raw.githubusercontent.com/acme/registry/main/registry.json",
            "not json",
        );
        let marketplace = Marketplace::new(Arc::new(fetcher), IndexConfig::default());

        let err = marketplace
            .fetch_index(&registry("official", "https://github.com/acme/registry"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
    }
}
