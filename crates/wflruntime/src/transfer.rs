use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;
use wflcore::{FileInfo, LaunchError, Result};

/// Scheme used for plain filesystem paths
pub const LOCAL_SCHEME: &str = "file";

/// Moves files between the local working directory and a location scheme
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// URI schemes handled by this plugin
    fn schemes(&self) -> &[&'static str];

    /// Fetch `source` into the local file `destination`
    async fn download(&self, source: &str, destination: &Path) -> Result<()>;

    /// Push the local `source` to `destination`
    async fn upload(&self, source: &Path, destination: &FileInfo) -> Result<()>;
}

/// Scheme of a location, or `None` for a plain path.
/// Single-letter schemes are treated as Windows drive letters.
pub fn scheme_of(location: &str) -> Option<String> {
    match url::Url::parse(location) {
        Ok(url) if url.scheme().len() > 1 => Some(url.scheme().to_string()),
        _ => None,
    }
}

/// Local path named by a plain path or `file://` URI
pub fn local_path(location: &str) -> Result<PathBuf> {
    match scheme_of(location).as_deref() {
        None => Ok(PathBuf::from(location)),
        Some(LOCAL_SCHEME) => url::Url::parse(location)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| {
                LaunchError::io(
                    location,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a local file URI"),
                )
            }),
        Some(other) => Err(LaunchError::io(
            location,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is not a local location", other),
            ),
        )),
    }
}

/// Copies within the local filesystem
pub struct LocalTransfer;

#[async_trait]
impl FileTransfer for LocalTransfer {
    fn schemes(&self) -> &[&'static str] {
        &[LOCAL_SCHEME]
    }

    async fn download(&self, source: &str, destination: &Path) -> Result<()> {
        let source = local_path(source)?;
        copy_path(&source, destination).await
    }

    async fn upload(&self, source: &Path, destination: &FileInfo) -> Result<()> {
        let mut target = local_path(&destination.url)?;
        if destination.directory {
            if let Some(name) = source.file_name() {
                target.push(name);
            }
        }
        copy_path(source, &target).await
    }
}

/// Copy a file or directory tree, creating parent directories
async fn copy_path(source: &Path, destination: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(source)
        .await
        .map_err(|e| LaunchError::io(source, e))?;
    if !metadata.is_dir() {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LaunchError::io(parent, e))?;
        }
        tokio::fs::copy(source, destination)
            .await
            .map_err(|e| LaunchError::io(source, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            LaunchError::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| LaunchError::io(&target, e))?;
        } else {
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|e| LaunchError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Plain HTTP(S): GET to download, PUT to upload
pub struct HttpTransfer {
    client: reqwest::Client,
}

impl HttpTransfer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileTransfer for HttpTransfer {
    fn schemes(&self) -> &[&'static str] {
        &["http", "https"]
    }

    async fn download(&self, source: &str, destination: &Path) -> Result<()> {
        let context = format!("downloading {}", source);
        let mut response = self
            .client
            .get(source)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LaunchError::remote(&context, e))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LaunchError::io(parent, e))?;
        }
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| LaunchError::io(destination, e))?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| LaunchError::remote(&context, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| LaunchError::io(destination, e))?;
        }
        file.flush().await.map_err(|e| LaunchError::io(destination, e))
    }

    async fn upload(&self, source: &Path, destination: &FileInfo) -> Result<()> {
        let body = tokio::fs::read(source)
            .await
            .map_err(|e| LaunchError::io(source, e))?;
        let mut url = destination.url.clone();
        if destination.directory {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            url = format!("{}/{}", url.trim_end_matches('/'), name);
        }

        let mut request = self.client.put(&url).body(body);
        if let Some(metadata) = &destination.metadata {
            request = request.header("X-File-Metadata", metadata.as_str());
        }
        request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LaunchError::remote(format!("uploading to {}", url), e))?;
        Ok(())
    }
}

/// Transfer plugins by scheme
#[derive(Clone)]
pub struct TransferRegistry {
    plugins: HashMap<String, Arc<dyn FileTransfer>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Local copies plus HTTP(S)
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalTransfer));
        registry.register(Arc::new(HttpTransfer::new(client)));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn FileTransfer>) {
        for scheme in plugin.schemes() {
            self.plugins.insert(scheme.to_string(), plugin.clone());
        }
    }

    /// Plugin for a location; plain paths use the local plugin
    pub fn for_location(&self, location: &str) -> Option<Arc<dyn FileTransfer>> {
        let scheme = scheme_of(location).unwrap_or_else(|| LOCAL_SCHEME.to_string());
        self.plugins.get(&scheme).cloned()
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::with_defaults(reqwest::Client::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes() {
        assert_eq!(scheme_of("/data/a.txt"), None);
        assert_eq!(scheme_of("relative/a.txt"), None);
        assert_eq!(scheme_of("C:\\data\\a.txt"), None);
        assert_eq!(scheme_of("s3://bucket/key").as_deref(), Some("s3"));
        assert_eq!(scheme_of("file:///tmp/a").as_deref(), Some("file"));
    }

    #[tokio::test]
    async fn local_upload_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("result.txt");
        std::fs::write(&source, "42").unwrap();
        let out = dir.path().join("out");

        LocalTransfer
            .upload(&source, &FileInfo::directory(out.display().to_string()))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(out.join("result.txt")).unwrap(), "42");
    }

    #[tokio::test]
    async fn local_copy_of_tree() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("sub")).unwrap();
        std::fs::write(tree.join("sub/b.txt"), "b").unwrap();
        let copy = dir.path().join("copy");

        LocalTransfer
            .download(&tree.display().to_string(), &copy)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(copy.join("sub/b.txt")).unwrap(), "b");
    }

    #[test]
    fn registry_routes_by_scheme() {
        let registry = TransferRegistry::default();
        assert!(registry.for_location("/tmp/x").is_some());
        assert!(registry.for_location("https://host/x").is_some());
        assert!(registry.for_location("gs://bucket/x").is_none());
    }
}
