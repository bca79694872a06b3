//! Format detection: file name first, then content probes.
//!
//! Probes never fail. A document that does not parse as a language's
//! grammar is simply "not that language".

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::language::language_for_path;
use crate::{Language, LaunchError, Result, ValidationError};

const CWL_CLASSES: &[&str] = &["CommandLineTool", "Workflow", "ExpressionTool", "Operation"];

static WDL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(workflow|task)\s+[A-Za-z_][A-Za-z0-9_]*\s*\{").expect("valid regex")
});

static NEXTFLOW_MANIFEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*manifest(\s*\{|\.[A-Za-z]+\s*=)").expect("valid regex")
});

/// Classification of a descriptor by extension and by content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub extension: Language,
    pub content: Language,
}

impl Detection {
    pub fn of_file(path: &Path) -> Result<Self> {
        Ok(Self {
            extension: detect_by_extension(path),
            content: detect_by_content(path)?,
        })
    }

    /// Settle on one language, honoring an explicit override.
    ///
    /// Agreement proceeds silently. A missing extension or any disagreement
    /// requires `override_language`, which must then match the content.
    pub fn resolve(
        &self,
        path: &str,
        override_language: Option<Language>,
    ) -> std::result::Result<Language, ValidationError> {
        if let Some(language) = override_language {
            if self.content == language {
                if self.extension != language {
                    tracing::warn!(
                        "{} has the extension of {} but was launched as {}; consider renaming it",
                        path,
                        self.extension,
                        language
                    );
                }
                return Ok(language);
            }
            return Err(ValidationError::InvalidDescriptor {
                path: path.to_string(),
                language,
            });
        }

        match (self.extension, self.content) {
            (ext, content) if ext == content && ext.is_known() => Ok(ext),
            (Language::Unknown, Language::Unknown) => Err(ValidationError::UnknownDescriptor {
                path: path.to_string(),
            }),
            (extension, content) => {
                let suggestion = if content.is_known() { content } else { extension };
                Err(ValidationError::AmbiguousDescriptor {
                    path: path.to_string(),
                    extension,
                    content,
                    suggestion: suggestion.short_name().to_string(),
                })
            }
        }
    }
}

pub fn detect_by_extension(path: &Path) -> Language {
    language_for_path(path)
}

/// Read the file and run the content probes
pub fn detect_by_content(path: &Path) -> Result<Language> {
    let content = std::fs::read_to_string(path).map_err(|e| LaunchError::io(path, e))?;
    Ok(detect_content(&content))
}

/// Run the content probes in their fixed order
pub fn detect_content(content: &str) -> Language {
    Language::PROBE_ORDER
        .into_iter()
        .find(|language| probe(*language, content))
        .unwrap_or(Language::Unknown)
}

fn probe(language: Language, content: &str) -> bool {
    match language {
        Language::Cwl => is_cwl(content),
        Language::Wdl => is_wdl(content),
        Language::Nextflow => is_nextflow(content),
        Language::Unknown => false,
    }
}

/// Detect and resolve a local descriptor in one step
pub fn resolve_language(path: &Path, override_language: Option<Language>) -> Result<Language> {
    let detection = Detection::of_file(path)?;
    tracing::debug!(
        "{}: extension says {}, content says {}",
        path.display(),
        detection.extension,
        detection.content
    );
    Ok(detection.resolve(&path.display().to_string(), override_language)?)
}

fn is_cwl(content: &str) -> bool {
    let Ok(serde_yaml::Value::Mapping(doc)) = serde_yaml::from_str::<serde_yaml::Value>(content)
    else {
        return false;
    };
    let has = |key: &str| doc.contains_key(key);
    if has("$graph") && has("cwlVersion") {
        return true;
    }
    let class_ok = doc
        .get("class")
        .and_then(|c| c.as_str())
        .is_some_and(|c| CWL_CLASSES.contains(&c));
    class_ok && (has("cwlVersion") || (has("inputs") && has("outputs")))
}

fn is_wdl(content: &str) -> bool {
    WDL_BLOCK.is_match(content)
}

fn is_nextflow(content: &str) -> bool {
    NEXTFLOW_MANIFEST.is_match(content)
}
