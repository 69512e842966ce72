//! Repository Acquisition - 플러그인 소스 획득
//!
//! 허용된 두 호스트(GitHub, GitLab)의 https 저장소만 받는다.
//! 얕은 clone 후 루트에 매니페스트와 라이선스 파일이 없으면 받은 트리를 삭제한다.

use super::manifest::find_manifest_file;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tally_foundation::{Error, HttpConfig, Result, SourceType};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// 인식하는 라이선스 파일명
pub const LICENSE_FILENAMES: &[&str] = &[
    "LICENSE",
    "LICENSE.md",
    "LICENSE.txt",
    "LICENCE",
    "LICENCE.md",
    "COPYING",
    "COPYING.md",
    "license",
    "license.md",
    "license.txt",
];

/// git clone 제한 시간
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

lazy_static! {
    static ref SEGMENT_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
}

// ============================================================================
// RepositoryUrl
// ============================================================================

/// 검증된 저장소 주소 `{host}/{owner}/{repo}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryUrl {
    pub source_type: SourceType,
    pub owner: String,
    pub repo: String,
}

impl RepositoryUrl {
    /// `https://github.com/owner/repo` 또는 `https://gitlab.com/owner/repo`
    /// (`.git` 접미사, 끝 슬래시 허용). 네트워크 호출 없음.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::InvalidInput(format!("unsupported repository URL '{}': {}", input, reason))
        };

        let url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;

        if url.scheme() != "https" {
            return Err(invalid("only https is allowed"));
        }
        if !url.username().is_empty()
            || url.password().is_some()
            || url.port().is_some()
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(invalid("unexpected URL components"));
        }

        let source_type = match url.host_str() {
            Some("github.com") => SourceType::Github,
            Some("gitlab.com") => SourceType::Gitlab,
            _ => return Err(invalid("host must be github.com or gitlab.com")),
        };

        let path = url.path();
        let path = path.strip_prefix('/').unwrap_or(path);
        let path = path.strip_suffix('/').unwrap_or(path);
        let segments: Vec<&str> = path.split('/').collect();

        let [owner, repo] = segments.as_slice() else {
            return Err(invalid("path must be /owner/repo"));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        if !SEGMENT_RE.is_match(owner) || !SEGMENT_RE.is_match(repo) {
            return Err(invalid("invalid owner or repository name"));
        }

        Ok(Self {
            source_type,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// 로컬 디렉토리 이름 `{host}_{owner}_{repo}` (호스트마다 트리가 분리됨)
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.source_type.as_str(), self.owner, self.repo)
    }

    pub fn browse_url(&self) -> String {
        format!(
            "https://{}/{}/{}",
            self.source_type.host(),
            self.owner,
            self.repo
        )
    }

    pub fn clone_url(&self) -> String {
        format!("{}.git", self.browse_url())
    }

    /// 호스트 규칙에 따른 raw 파일 URL
    pub fn raw_file_url(&self, branch: &str, file: &str) -> String {
        match self.source_type {
            SourceType::Github => format!(
                "https://raw.githubusercontent.com/{}/{}/{}/{}",
                self.owner, self.repo, branch, file
            ),
            SourceType::Gitlab => format!(
                "https://gitlab.com/{}/{}/-/raw/{}/{}",
                self.owner, self.repo, branch, file
            ),
        }
    }
}

impl std::fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.browse_url())
    }
}

// ============================================================================
// RemoteFetcher - 네트워크 경계
// ============================================================================

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// 단일 리비전 얕은 fetch로 `dest`에 소스 트리 생성
    async fn fetch_tree(&self, repository: &RepositoryUrl, dest: &Path) -> Result<()>;

    /// 원격 파일 바이트
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// git CLI + reqwest 기반 fetcher
pub struct GitHttpFetcher {
    client: Client,
}

impl GitHttpFetcher {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(http.user_agent.clone())
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for GitHttpFetcher {
    async fn fetch_tree(&self, repository: &RepositoryUrl, dest: &Path) -> Result<()> {
        debug!("Cloning {} into {:?}", repository, dest);

        let clone = Command::new("git")
            .args(["clone", "--depth", "1", "--single-branch", "--quiet"])
            .arg(repository.clone_url())
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(CLONE_TIMEOUT, clone)
            .await
            .map_err(|_| Error::Timeout(format!("git clone of {} timed out", repository)))?
            .map_err(|e| Error::Acquisition(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Acquisition(format!(
                "git clone of {} failed: {}",
                repository,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

// ============================================================================
// RepositoryAcquirer
// ============================================================================

/// 획득 결과
#[derive(Debug, Clone)]
pub struct AcquiredSource {
    pub repository: RepositoryUrl,
    pub install_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub license_path: PathBuf,
}

pub struct RepositoryAcquirer {
    plugins_dir: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl RepositoryAcquirer {
    pub fn new(plugins_dir: impl Into<PathBuf>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            fetcher,
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn fetcher(&self) -> &Arc<dyn RemoteFetcher> {
        &self.fetcher
    }

    pub fn install_dir(&self, repository: &RepositoryUrl) -> PathBuf {
        self.plugins_dir.join(repository.dir_name())
    }

    /// 저장된 소스 URL의 설치 디렉토리
    pub fn install_dir_for(&self, source_url: &str) -> Result<PathBuf> {
        Ok(self.install_dir(&RepositoryUrl::parse(source_url)?))
    }

    /// URL 검증 → 남은 사본 삭제 → 얕은 fetch → 매니페스트/라이선스 확인
    ///
    /// 대상 디렉토리가 설치된 플러그인의 트리인지는 호출자가 먼저 확인해야 한다.
    pub async fn acquire(&self, url: &str) -> Result<AcquiredSource> {
        let repository = RepositoryUrl::parse(url)?;
        let dest = self.install_dir(&repository);

        if dest.exists() {
            debug!("Removing stale copy at {:?}", dest);
            fs::remove_dir_all(&dest).await.map_err(|e| {
                Error::Acquisition(format!(
                    "failed to remove stale copy at {}: {}",
                    dest.display(),
                    e
                ))
            })?;
        }

        fs::create_dir_all(&self.plugins_dir).await.map_err(|e| {
            Error::Acquisition(format!(
                "failed to create plugins directory {}: {}",
                self.plugins_dir.display(),
                e
            ))
        })?;

        info!(repository = %repository, "Fetching plugin source");

        if let Err(e) = self.fetcher.fetch_tree(&repository, &dest).await {
            self.discard(&dest).await;
            return Err(e.with_context(format!("fetch {}", repository)));
        }

        let Some(manifest_path) = find_manifest_file(&dest) else {
            self.discard(&dest).await;
            return Err(Error::Acquisition(format!(
                "{} has no plugin.yaml or plugin.yml at its root",
                repository
            )));
        };

        let Some(license_path) = find_license_file(&dest) else {
            self.discard(&dest).await;
            return Err(Error::Acquisition(format!(
                "{} has no license file at its root",
                repository
            )));
        };

        Ok(AcquiredSource {
            repository,
            install_dir: dest,
            manifest_path,
            license_path,
        })
    }

    /// 소스 트리 삭제 (없으면 무시)
    pub async fn remove(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }

    /// 정리 실패는 로그만 남긴다
    pub async fn discard(&self, dir: &Path) {
        if let Err(e) = self.remove(dir).await {
            warn!("Failed to clean up {:?}: {}", dir, e);
        }
    }
}

/// 루트의 라이선스 파일 (내용은 확인하지 않음)
pub fn find_license_file(dir: &Path) -> Option<PathBuf> {
    LICENSE_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

// ============================================================================
// 테스트용 fetcher
// ============================================================================


#[cfg(test)]
mod tests {
    use super::fakes::StaticFetcher;
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "name: crm\ndisplay_name: CRM\nversion: 1.0.0\n";

    #[test]
    fn test_url_gating_accepts() {
        for (url, source_type) in [
            ("https://github.com/acme/crm", SourceType::Github),
            ("https://github.com/acme/crm.git", SourceType::Github),
            ("https://github.com/acme/crm/", SourceType::Github),
            ("https://gitlab.com/acme/crm.git/", SourceType::Gitlab),
        ] {
            let parsed = RepositoryUrl::parse(url).unwrap();
            assert_eq!(parsed.source_type, source_type);
            assert_eq!(parsed.owner, "acme");
            assert_eq!(parsed.repo, "crm");
        }
    }

    #[test]
    fn test_url_gating_rejects() {
        for url in [
            "http://github.com/acme/crm",
            "https://bitbucket.org/acme/crm",
            "https://github.com.evil.io/acme/crm",
            "https://github.com/acme",
            "https://github.com/acme/crm/tree/main",
            "https://github.com/acme/crm?ref=main",
            "https://user:pw@github.com/acme/crm",
            "git@github.com:acme/crm.git",
            "not a url",
        ] {
            let err = RepositoryUrl::parse(url).unwrap_err();
            assert!(err.is_validation(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_derived_urls() {
        let gh = RepositoryUrl::parse("https://github.com/acme/registry").unwrap();
        assert_eq!(gh.dir_name(), "github_acme_registry");
        assert_eq!(gh.clone_url(), "https://github.com/acme/registry.git");
        assert_eq!(
            gh.raw_file_url("main", "registry.json"),
            "https://raw.githubusercontent.com/acme/registry/main/registry.json"
        );

        let gl = RepositoryUrl::parse("https://gitlab.com/acme/registry").unwrap();
        assert_eq!(gl.dir_name(), "gitlab_acme_registry");
        assert_ne!(gl.dir_name(), gh.dir_name());
        assert_eq!(
            gl.raw_file_url("main", "registry.json"),
            "https://gitlab.com/acme/registry/-/raw/main/registry.json"
        );
    }

    #[tokio::test]
    async fn test_acquire_success() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new().with_tree(
            "https://github.com/acme/crm",
            &[("plugin.yaml", MANIFEST), ("LICENSE", "MIT")],
        ));
        let acquirer = RepositoryAcquirer::new(temp.path().join("plugins"), fetcher);

        let acquired = acquirer
            .acquire("https://github.com/acme/crm.git")
            .await
            .unwrap();
        assert_eq!(acquired.install_dir, temp.path().join("plugins/github_acme_crm"));
        assert!(acquired.manifest_path.ends_with("plugin.yaml"));
        assert!(acquired.license_path.ends_with("LICENSE"));
    }

    #[tokio::test]
    async fn test_stale_copy_replaced() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("github_acme_crm");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("old.txt"), "old").unwrap();

        let fetcher = Arc::new(StaticFetcher::new().with_tree(
            "https://github.com/acme/crm",
            &[("plugin.yml", MANIFEST), ("COPYING", "GPL")],
        ));
        let acquirer = RepositoryAcquirer::new(temp.path(), fetcher);

        acquirer.acquire("https://github.com/acme/crm").await.unwrap();
        assert!(!stale.join("old.txt").exists());
        assert!(stale.join("plugin.yml").exists());
    }

    #[tokio::test]
    async fn test_missing_license_deletes_tree() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_tree("https://gitlab.com/acme/crm", &[("plugin.yaml", MANIFEST)]),
        );
        let acquirer = RepositoryAcquirer::new(temp.path(), fetcher);

        let err = acquirer
            .acquire("https://gitlab.com/acme/crm")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
        assert!(!temp.path().join("gitlab_acme_crm").exists());
    }

    #[tokio::test]
    async fn test_missing_manifest_deletes_tree() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            StaticFetcher::new().with_tree("https://github.com/acme/crm", &[("LICENSE", "MIT")]),
        );
        let acquirer = RepositoryAcquirer::new(temp.path(), fetcher);

        let err = acquirer
            .acquire("https://github.com/acme/crm")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("plugin.yaml"));
        assert!(!temp.path().join("github_acme_crm").exists());
    }

    #[tokio::test]
    async fn test_invalid_url_never_fetches() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        let acquirer = RepositoryAcquirer::new(temp.path(), fetcher.clone());

        let err = acquirer
            .acquire("http://github.com/acme/crm")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_acquisition_error() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        let acquirer = RepositoryAcquirer::new(temp.path(), fetcher.clone());

        let err = acquirer
            .acquire("https://github.com/acme/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
        assert_eq!(fetcher.calls(), 1);
    }
}
