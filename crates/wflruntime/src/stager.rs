use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
use wflcore::{DescriptorSet, EntryReference, LaunchError, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the archive built from a local entry's directory
pub const LOCAL_ARCHIVE_NAME: &str = "directory.zip";

/// Creates per-run working directories and descriptor archives
#[derive(Debug, Clone, Default)]
pub struct WorkspaceStager {
    base_dir: Option<PathBuf>,
}

impl WorkspaceStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create working directories under `dir` instead of the system temp dir
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// Fresh, uniquely named working directory. It outlives the process so
    /// callers can inspect it.
    pub fn create_workspace(&self) -> Result<PathBuf> {
        let base = self.base_dir.clone().unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&base).map_err(|e| LaunchError::io(&base, e))?;
        let dir = tempfile::Builder::new()
            .prefix("wfl-run-")
            .tempdir_in(&base)
            .map_err(|e| LaunchError::io(&base, e))?
            .keep();
        let outputs = dir.join("outputs");
        std::fs::create_dir_all(&outputs).map_err(|e| LaunchError::io(&outputs, e))?;
        tracing::debug!("Created working directory {}", dir.display());
        Ok(dir)
    }

    /// Zip the directory holding a local primary descriptor
    pub fn package_local(&self, primary: &Path, working_dir: &Path) -> Result<PathBuf> {
        let source = primary
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let archive = working_dir.join(LOCAL_ARCHIVE_NAME);
        let count = zip_directory(source, &archive)?;
        tracing::info!("Packed {} entries of {} into {}", count, source.display(), archive.display());
        Ok(archive)
    }

    /// Zip a fetched descriptor set under a name derived from the entry path
    pub fn package_remote(
        &self,
        entry: &EntryReference,
        descriptors: &DescriptorSet,
        working_dir: &Path,
    ) -> Result<PathBuf> {
        let archive = working_dir.join(entry.archive_name());
        let count = zip_directory(descriptors.root(), &archive)?;
        tracing::info!("Packed {} descriptor entries into {}", count, archive.display());
        Ok(archive)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn zip_error(path: &Path, error: zip::result::ZipError) -> LaunchError {
    LaunchError::io(path, io::Error::other(error))
}

/// Root-relative, `/`-joined entry name
fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Zip `source` recursively into `archive`.
///
/// Hidden files and directories are skipped. Every directory except the
/// root gets its own entry so empty directories survive. Entries are
/// visited in sorted order. Returns the number of entries written.
pub fn zip_directory(source: &Path, archive: &Path) -> Result<usize> {
    let file = File::create(archive).map_err(|e| LaunchError::io(archive, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let archive_abs = std::path::absolute(archive).unwrap_or_else(|_| archive.to_path_buf());
    let mut count = 0;

    let walker = WalkDir::new(source)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            LaunchError::io(path, e.into())
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        if std::path::absolute(path).is_ok_and(|p| p == archive_abs) {
            continue;
        }
        let name = entry_name(source, path);
        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{}/", name), options)
                .map_err(|e| zip_error(path, e))?;
        } else {
            writer.start_file(name, options).map_err(|e| zip_error(path, e))?;
            let mut input = File::open(path).map_err(|e| LaunchError::io(path, e))?;
            io::copy(&mut input, &mut writer).map_err(|e| LaunchError::io(path, e))?;
        }
        count += 1;
    }

    writer.finish().map_err(|e| zip_error(archive, e))?;
    Ok(count)
}

/// Unpack `archive` into `destination`, returning the files written.
/// Entries that would land outside `destination` are skipped.
pub fn unzip_archive(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).map_err(|e| LaunchError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    let mut written = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| zip_error(archive, e))?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let target = destination.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| LaunchError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LaunchError::io(parent, e))?;
        }
        let mut output = File::create(&target).map_err(|e| LaunchError::io(&target, e))?;
        io::copy(&mut entry, &mut output).map_err(|e| LaunchError::io(&target, e))?;
        written.push(target);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspaces_are_unique() {
        let base = tempfile::tempdir().unwrap();
        let stager = WorkspaceStager::with_base_dir(base.path());
        let a = stager.create_workspace().unwrap();
        let b = stager.create_workspace().unwrap();
        assert_ne!(a, b);
        assert!(a.join("outputs").is_dir());
    }

    #[test]
    fn entry_names_are_slash_joined() {
        let root = Path::new("/r");
        assert_eq!(entry_name(root, Path::new("/r/sub/deep/c.txt")), "sub/deep/c.txt");
    }

    #[test]
    fn empty_directories_survive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(source.join("empty")).unwrap();
        std::fs::write(source.join("a.txt"), "a").unwrap();
        let archive = dir.path().join("out.zip");

        assert_eq!(zip_directory(&source, &archive).unwrap(), 2);

        let zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert!(names.contains(&"empty/"));
        assert!(names.contains(&"a.txt"));
        assert!(!names.iter().any(|n| n.is_empty() || *n == "/"));
    }

    #[test]
    fn remote_archive_named_after_entry() {
        let dir = tempfile::tempdir().unwrap();
        let descriptors = dir.path().join("descriptors");
        std::fs::create_dir_all(&descriptors).unwrap();
        std::fs::write(descriptors.join("main.wdl"), "workflow w {}").unwrap();
        let set = DescriptorSet::new(&descriptors, descriptors.join("main.wdl"));
        let entry = EntryReference::remote("github.com/org/repo:master");

        let archive = WorkspaceStager::new()
            .package_remote(&entry, &set, dir.path())
            .unwrap();
        assert_eq!(archive.file_name().unwrap(), "github.com_org_repo.zip");
    }
}
