use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wflcore::{
    DescriptorSet, EntryKind, EntryReference, Language, LaunchError, Result, SourceFile,
    ValidationError,
};

/// Source of remote descriptors
#[async_trait]
pub trait DescriptorRegistry: Send + Sync {
    /// Version used when an entry reference names none
    async fn default_version(&self, path: &str, kind: EntryKind) -> Result<String>;

    async fn get_descriptor(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
    ) -> Result<SourceFile>;

    async fn get_secondary_descriptors(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
    ) -> Result<Vec<SourceFile>>;
}

#[derive(Debug, Deserialize)]
struct ToolRecord {
    #[serde(default, alias = "defaultVersion")]
    default_version: Option<String>,
    #[serde(default)]
    versions: Vec<ToolVersion>,
}

#[derive(Debug, Deserialize)]
struct ToolVersion {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileWrapper {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ToolFile {
    path: String,
    #[serde(default)]
    file_type: String,
}

/// Registry client over a GA4GH TRS v2 style API
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// TRS identifier; workflows live under the `#workflow/` namespace
    fn trs_id(path: &str, kind: EntryKind) -> String {
        match kind {
            EntryKind::Tool => path.to_string(),
            EntryKind::Workflow => format!("#workflow/{}", path),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| LaunchError::remote(format!("parsing registry URL {}", self.base_url), e))?;
        url.path_segments_mut()
            .map_err(|_| LaunchError::remote("building registry URL", "base URL cannot hold a path"))?
            .pop_if_empty()
            .extend(["ga4gh", "trs", "v2", "tools"])
            .extend(segments);
        Ok(url)
    }

    fn version_url(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
        tail: &[&str],
    ) -> Result<url::Url> {
        let descriptor_type = language.trs_type().ok_or_else(|| {
            ValidationError::UnknownLanguage(language.short_name().to_string())
        })?;
        let id = Self::trs_id(path, kind);
        let mut segments = vec![id.as_str(), "versions", version, descriptor_type];
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: url::Url,
        path: &str,
        kind: EntryKind,
    ) -> Result<T> {
        tracing::debug!("GET {}", url);
        let context = format!("fetching {}", url);
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LaunchError::remote(&context, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LaunchError::entry_not_found(kind, path, false));
        }
        let response = response
            .error_for_status()
            .map_err(|e| LaunchError::remote(&context, e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| LaunchError::remote(&context, e))
    }

    async fn list_files(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
    ) -> Result<Vec<ToolFile>> {
        let url = self.version_url(path, version, kind, language, &["files"])?;
        self.get_json(url, path, kind).await
    }
}

#[async_trait]
impl DescriptorRegistry for HttpRegistry {
    async fn default_version(&self, path: &str, kind: EntryKind) -> Result<String> {
        let id = Self::trs_id(path, kind);
        let record: ToolRecord = self.get_json(self.url(&[id.as_str()])?, path, kind).await?;
        record
            .default_version
            .or_else(|| record.versions.into_iter().next().map(|v| v.name))
            .ok_or_else(|| LaunchError::entry_not_found(kind, path, false))
    }

    async fn get_descriptor(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
    ) -> Result<SourceFile> {
        let files = self.list_files(path, version, kind, language).await?;
        let name = files
            .into_iter()
            .find(|f| f.file_type == "PRIMARY_DESCRIPTOR")
            .map(|f| f.path)
            .unwrap_or_else(|| format!("Dockstore.{}", language.short_name()));
        let url = self.version_url(path, version, kind, language, &["descriptor"])?;
        let wrapper: FileWrapper = self.get_json(url, path, kind).await?;
        Ok(SourceFile {
            path: name,
            content: wrapper.content,
        })
    }

    async fn get_secondary_descriptors(
        &self,
        path: &str,
        version: &str,
        kind: EntryKind,
        language: Language,
    ) -> Result<Vec<SourceFile>> {
        let files = self.list_files(path, version, kind, language).await?;
        let mut secondaries = Vec::new();
        for file in files.into_iter().filter(|f| f.file_type == "SECONDARY_DESCRIPTOR") {
            let relative = file.path.trim_start_matches('/');
            let url = self.version_url(path, version, kind, language, &["descriptor", relative])?;
            let wrapper: FileWrapper = self.get_json(url, path, kind).await?;
            secondaries.push(SourceFile {
                path: file.path,
                content: wrapper.content,
            });
        }
        Ok(secondaries)
    }
}

/// Turns an entry reference into a descriptor set on disk
#[derive(Clone)]
pub struct EntryResolver {
    registry: Arc<dyn DescriptorRegistry>,
}

impl EntryResolver {
    pub fn new(registry: Arc<dyn DescriptorRegistry>) -> Self {
        Self { registry }
    }

    /// Local entries resolve to their own file and directory. Remote
    /// entries are fetched into `root`; no partial set is ever returned.
    pub async fn resolve(
        &self,
        entry: &EntryReference,
        kind: EntryKind,
        language: Language,
        root: &Path,
    ) -> Result<DescriptorSet> {
        if entry.is_local() {
            resolve_local(entry, kind)
        } else {
            self.resolve_remote(entry, kind, language, root).await
        }
    }

    async fn resolve_remote(
        &self,
        entry: &EntryReference,
        kind: EntryKind,
        language: Language,
        root: &Path,
    ) -> Result<DescriptorSet> {
        let (path, version) = entry.path_and_version();
        let version = match version {
            Some(v) => v.to_string(),
            None => {
                let v = self.registry.default_version(path, kind).await?;
                tracing::info!("No version given for {}, using default {}", path, v);
                v
            }
        };

        let primary = self
            .registry
            .get_descriptor(path, &version, kind, language)
            .await?;
        let secondaries = self
            .registry
            .get_secondary_descriptors(path, &version, kind, language)
            .await?;

        let mut set = DescriptorSet::write_primary(root, &primary)?;
        for file in &secondaries {
            set.add_secondary(file)?;
        }
        tracing::info!(
            "Fetched {} {}:{} with {} secondary descriptor(s)",
            kind,
            path,
            version,
            set.secondaries().len()
        );
        Ok(set)
    }
}

/// A local entry is its own file; its directory is packaged later
pub fn resolve_local(entry: &EntryReference, kind: EntryKind) -> Result<DescriptorSet> {
    let given = PathBuf::from(entry.identifier());
    if !given.is_file() {
        return Err(LaunchError::entry_not_found(kind, entry.identifier(), true));
    }
    let primary = std::path::absolute(&given).map_err(|e| LaunchError::io(&given, e))?;
    let root = primary
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    Ok(DescriptorSet::new(root, primary))
}
