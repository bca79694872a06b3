use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::{LaunchError, Result, ValidationError};

/// Registry namespace of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Tool,
    #[default]
    Workflow,
}

impl EntryKind {
    pub fn other(&self) -> EntryKind {
        match self {
            EntryKind::Tool => EntryKind::Workflow,
            EntryKind::Workflow => EntryKind::Tool,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Tool => f.write_str("tool"),
            EntryKind::Workflow => f.write_str("workflow"),
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tool" => Ok(EntryKind::Tool),
            "workflow" => Ok(EntryKind::Workflow),
            other => Err(format!("unknown entry type '{}'", other)),
        }
    }
}

/// What to launch: a registry path (optionally `path:version`) or a local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReference {
    identifier: String,
    is_local: bool,
}

impl EntryReference {
    pub fn remote(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            is_local: false,
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            identifier: path.into(),
            is_local: true,
        }
    }

    /// Exactly one of `--entry` / `--local-entry`
    pub fn from_args(
        entry: Option<String>,
        local_entry: Option<String>,
    ) -> std::result::Result<Self, ValidationError> {
        match (entry, local_entry) {
            (Some(remote), None) => Ok(Self::remote(remote)),
            (None, Some(local)) => Ok(Self::local(local)),
            (None, None) => Err(ValidationError::EntrySourceCount { count: 0 }),
            (Some(_), Some(_)) => Err(ValidationError::EntrySourceCount { count: 2 }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Registry path and optional version. Local entries never carry a version.
    pub fn path_and_version(&self) -> (&str, Option<&str>) {
        if self.is_local {
            return (&self.identifier, None);
        }
        match self.identifier.split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version)),
            Some((path, _)) => (path, None),
            None => (&self.identifier, None),
        }
    }

    /// Deterministic archive name for a remote entry
    pub fn archive_name(&self) -> String {
        let (path, _) = self.path_and_version();
        format!("{}.zip", path.replace('/', "_"))
    }
}

impl fmt::Display for EntryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local {
            write!(f, "local entry {}", self.identifier)
        } else {
            write!(f, "entry {}", self.identifier)
        }
    }
}

/// A descriptor file as returned by a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Primary descriptor plus the secondaries it imports, all under one root.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    root: PathBuf,
    primary: PathBuf,
    secondaries: Vec<PathBuf>,
}

impl DescriptorSet {
    /// The primary must already exist on disk under `root` (or be a local file).
    pub fn new(root: impl Into<PathBuf>, primary: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            primary: primary.into(),
            secondaries: Vec::new(),
        }
    }

    /// Write the primary descriptor under `root`
    pub fn write_primary(root: impl Into<PathBuf>, file: &SourceFile) -> Result<Self> {
        let root = root.into();
        let primary = write_under(&root, &file.path, &file.content)?;
        Ok(Self::new(root, primary))
    }

    /// Write a secondary descriptor, creating parent directories.
    /// Writing the same relative path twice overwrites it.
    pub fn add_secondary(&mut self, file: &SourceFile) -> Result<PathBuf> {
        let written = write_under(&self.root, &file.path, &file.content)?;
        if written != self.primary && !self.secondaries.contains(&written) {
            self.secondaries.push(written.clone());
        }
        Ok(written)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn secondaries(&self) -> &[PathBuf] {
        &self.secondaries
    }

    /// Every file in the set, primary first
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.primary.as_path()).chain(self.secondaries.iter().map(|p| p.as_path()))
    }

    /// Distinct directories holding descriptor files
    pub fn directories(&self) -> HashSet<PathBuf> {
        self.files()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect()
    }
}

/// Resolve a registry-relative path under `root`, refusing anything that escapes it.
pub fn resolve_under(root: &Path, relative: &str) -> std::result::Result<PathBuf, ValidationError> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            _ => return Err(ValidationError::UnsafeDescriptorPath(relative.to_string())),
        }
    }
    if depth == 0 {
        return Err(ValidationError::UnsafeDescriptorPath(relative.to_string()));
    }
    Ok(resolved)
}

fn write_under(root: &Path, relative: &str, content: &str) -> Result<PathBuf> {
    let target = resolve_under(root, relative)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LaunchError::io(parent, e))?;
    }
    std::fs::write(&target, content).map_err(|e| LaunchError::io(&target, e))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_version() {
        let entry = EntryReference::remote("github.com/org/repo:v1.2");
        assert_eq!(entry.path_and_version(), ("github.com/org/repo", Some("v1.2")));

        let entry = EntryReference::remote("github.com/org/repo");
        assert_eq!(entry.path_and_version(), ("github.com/org/repo", None));
        assert_eq!(entry.archive_name(), "github.com_org_repo.zip");

        let local = EntryReference::local("C:dir/tool.cwl");
        assert_eq!(local.path_and_version(), ("C:dir/tool.cwl", None));
    }

    #[test]
    fn entry_args_are_exclusive() {
        assert!(EntryReference::from_args(None, None).is_err());
        assert!(EntryReference::from_args(Some("a".into()), Some("b".into())).is_err());
        assert!(EntryReference::from_args(None, Some("a.cwl".into())).unwrap().is_local());
    }

    #[test]
    fn secondary_writes_create_dirs_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let primary = SourceFile { path: "/main.wdl".into(), content: "workflow w {}".into() };
        let mut set = DescriptorSet::write_primary(dir.path(), &primary).unwrap();
        assert_eq!(set.primary(), dir.path().join("main.wdl"));

        let first = SourceFile { path: "tasks/deep/t.wdl".into(), content: "one".into() };
        let second = SourceFile { path: "tasks/deep/t.wdl".into(), content: "two".into() };
        set.add_secondary(&first).unwrap();
        let path = set.add_secondary(&second).unwrap();

        assert_eq!(set.secondaries().len(), 1);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "two");
    }

    #[test]
    fn rejects_paths_outside_root() {
        let root = Path::new("/work");
        assert!(resolve_under(root, "../etc/passwd").is_err());
        assert!(resolve_under(root, "a/../../b").is_err());
        assert!(resolve_under(root, "").is_err());
        assert_eq!(resolve_under(root, "a/./b/../c.cwl").unwrap(), Path::new("/work/a/c.cwl"));
    }
}
