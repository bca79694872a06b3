use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use wflcore::{LaunchError, Result};

/// Shared cache of downloaded engine binaries, keyed by file name.
///
/// Downloads land in a temp file inside the cache directory and are moved
/// into place with a no-clobber rename, so concurrent launches never see a
/// partial file and the first completed download wins.
#[derive(Clone)]
pub struct LibraryCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl LibraryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(dir, reqwest::Client::new())
    }

    pub fn with_client(dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a download URL: its last path segment
    pub fn file_name_for(url: &str) -> Result<String> {
        let parsed = url::Url::parse(url).map_err(|e| LaunchError::remote(format!("parsing {}", url), e))?;
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| LaunchError::remote(format!("parsing {}", url), "URL has no file name"))
    }

    pub fn path_for(&self, url: &str) -> Result<PathBuf> {
        Ok(self.dir.join(Self::file_name_for(url)?))
    }

    /// Return the cached copy of `url`, downloading it first if absent
    pub async fn ensure(&self, url: &str) -> Result<PathBuf> {
        let target = self.path_for(url)?;
        if target.is_file() {
            tracing::debug!("Using cached {}", target.display());
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| LaunchError::io(&self.dir, e))?;

        tracing::info!("Downloading {} to {}", url, target.display());
        let context = format!("downloading {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LaunchError::remote(&context, e))?;

        let partial = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.dir)
            .map_err(|e| LaunchError::io(&self.dir, e))?;
        let handle = partial.reopen().map_err(|e| LaunchError::io(partial.path(), e))?;
        let mut file = tokio::fs::File::from_std(handle);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| LaunchError::remote(&context, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| LaunchError::io(partial.path(), e))?;
        }
        file.flush().await.map_err(|e| LaunchError::io(partial.path(), e))?;
        drop(file);

        match partial.persist_noclobber(&target) {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!("{} was cached concurrently, keeping the first copy", target.display());
            }
            Err(e) => return Err(LaunchError::io(&target, e.error)),
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_last_segment() {
        let url = "https://github.com/broadinstitute/cromwell/releases/download/36/cromwell-36.jar";
        assert_eq!(LibraryCache::file_name_for(url).unwrap(), "cromwell-36.jar");
        assert!(LibraryCache::file_name_for("https://example.org/").is_err());
        assert!(LibraryCache::file_name_for("not a url").is_err());
    }

    #[tokio::test]
    async fn cached_file_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("engine.jar"), b"cached").unwrap();
        // Unroutable host: any request would fail.
        let cache = LibraryCache::new(dir.path());
        let path = cache.ensure("http://127.0.0.1:9/engine.jar").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"cached");
    }
}
