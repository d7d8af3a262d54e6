//! TemplateFlow reference template fetching.
//!
//! Templates are resolved to files under a local cache laid out like
//! TemplateFlow's own (`<cache>/tpl-<name>/tpl-<name>_res-NN_..._<suffix><ext>`).
//! A cache hit never touches the network; a miss downloads the file from
//! the TemplateFlow archive and writes it into the cache atomically.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use bidsqc_shared::{BidsQcError, Result, TemplateConfig};

/// User-Agent string for template downloads.
const USER_AGENT: &str = concat!("bidsqc/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// TemplateQuery
// ---------------------------------------------------------------------------

/// Identifies one file of a TemplateFlow template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateQuery {
    /// Template identifier, e.g. `MNI152NLin2009cAsym`.
    pub template: String,
    /// Resolution index (`res-NN`).
    pub resolution: u32,
    /// File suffix, e.g. `T1w`.
    pub suffix: String,
    /// File extension including the leading dot.
    pub extension: String,
    /// Optional `desc-` qualifier.
    pub desc: Option<String>,
}

impl TemplateQuery {
    pub fn new(
        template: impl Into<String>,
        resolution: u32,
        suffix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            resolution,
            suffix: suffix.into(),
            extension: extension.into(),
            desc: None,
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// `tpl-<template>_res-NN[_desc-<desc>]_<suffix><ext>`
    pub fn file_name(&self) -> String {
        let mut name = format!("tpl-{}_res-{:02}", self.template, self.resolution);
        if let Some(desc) = &self.desc {
            name.push_str("_desc-");
            name.push_str(desc);
        }
        format!("{name}_{}{}", self.suffix, self.extension)
    }

    /// Path of the file relative to the archive / cache root.
    pub fn relative_path(&self) -> String {
        format!("tpl-{}/{}", self.template, self.file_name())
    }
}

// ---------------------------------------------------------------------------
// TemplateClient
// ---------------------------------------------------------------------------

/// Cached TemplateFlow client.
#[derive(Debug, Clone)]
pub struct TemplateClient {
    client: Client,
    base_url: Url,
    cache_dir: PathBuf,
}

impl TemplateClient {
    /// Build a client from runtime config.
    pub fn new(config: &TemplateConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BidsQcError::Template(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            cache_dir: config.cache_dir.clone(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `query` lives in the local cache.
    pub fn cached_path(&self, query: &TemplateQuery) -> PathBuf {
        self.cache_dir
            .join(format!("tpl-{}", query.template))
            .join(query.file_name())
    }

    /// Resolve `query` to an absolute local path, downloading on a cache miss.
    #[instrument(skip_all, fields(template = %query.template, file = %query.file_name()))]
    pub async fn get(&self, query: &TemplateQuery) -> Result<PathBuf> {
        let target = self.cached_path(query);

        if target.is_file() {
            debug!(path = %target.display(), "template cache hit");
            return absolute(&target);
        }

        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            query.relative_path()
        );
        info!(%url, "downloading template");

        let bytes = self.download(&url).await?;
        write_atomic(&target, &bytes)?;

        info!(path = %target.display(), size = bytes.len(), "template cached");
        absolute(&target)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BidsQcError::Template(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BidsQcError::Template(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BidsQcError::Template(format!("{url}: failed to read body: {e}")))?;
        Ok(body.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write to a sibling temp file, then rename into place.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| BidsQcError::Template(format!("invalid cache path: {}", target.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| BidsQcError::io(dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

    std::fs::write(&temp, bytes).map_err(|e| BidsQcError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        BidsQcError::io(target, e)
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| BidsQcError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str, cache_dir: &Path) -> TemplateConfig {
        TemplateConfig {
            base_url: Url::parse(base_url).unwrap(),
            cache_dir: cache_dir.to_path_buf(),
            timeout_secs: 5,
        }
    }

    fn mni_t1w() -> TemplateQuery {
        TemplateQuery::new("MNI152NLin2009cAsym", 2, "T1w", ".nii.gz")
    }

    #[test]
    fn file_name_pads_resolution() {
        assert_eq!(
            mni_t1w().file_name(),
            "tpl-MNI152NLin2009cAsym_res-02_T1w.nii.gz"
        );
        assert_eq!(
            mni_t1w().with_desc("brain").relative_path(),
            "tpl-MNI152NLin2009cAsym/tpl-MNI152NLin2009cAsym_res-02_desc-brain_T1w.nii.gz"
        );
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let cache = tempfile::tempdir().unwrap();
        // Nothing listens here; a request would fail.
        let client = TemplateClient::new(&config("http://127.0.0.1:9", cache.path())).unwrap();
        assert_eq!(client.cache_dir(), cache.path());

        let cached = client.cached_path(&mni_t1w());
        assert!(cached.starts_with(client.cache_dir()));
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"nifti").unwrap();

        let path = client.get(&mni_t1w()).await.unwrap();
        assert!(path.is_absolute());
        assert_eq!(std::fs::read(&path).unwrap(), b"nifti");
    }

    #[tokio::test]
    async fn cache_miss_downloads_once() {
        let server = wiremock::MockServer::start().await;
        let cache = tempfile::tempdir().unwrap();

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(
                "/tpl-MNI152NLin2009cAsym/tpl-MNI152NLin2009cAsym_res-02_T1w.nii.gz",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(b"template-bytes"))
            .expect(1)
            .mount(&server)
            .await;

        let client = TemplateClient::new(&config(&server.uri(), cache.path())).unwrap();

        let first = client.get(&mni_t1w()).await.unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"template-bytes");

        let second = client.get(&mni_t1w()).await.unwrap();
        assert_eq!(first, second);

        // No temp files left in the cache
        for entry in std::fs::read_dir(first.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = wiremock::MockServer::start().await;
        let cache = tempfile::tempdir().unwrap();

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = TemplateClient::new(&config(&server.uri(), cache.path())).unwrap();
        let err = client.get(&mni_t1w()).await.unwrap_err();

        assert!(matches!(err, BidsQcError::Template(_)));
        assert!(err.to_string().contains("404"));
        assert!(!client.cached_path(&mni_t1w()).exists());
    }
}
