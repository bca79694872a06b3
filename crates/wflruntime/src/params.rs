use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wflcore::{
    Language, LaunchError, ParameterFormat, ParameterSource, ProvisionFailure,
    ProvisioningFailures, Result, ValidationError,
};

use crate::transfer::{scheme_of, TransferRegistry, LOCAL_SCHEME};

/// URI schemes that mark a WDL or Nextflow string as a file reference
pub const FILE_SCHEMES: &[&str] = &["http", "https", "ftp", "s3", "gs", "file"];

fn malformed(source: &ParameterSource, message: impl ToString) -> LaunchError {
    ValidationError::MalformedParameters {
        path: source.path().display().to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Parse a parameter source into one object per run.
///
/// JSON and YAML hold a single object or an array of objects. TSV holds a
/// header row, a type row that is skipped, then one run per row.
pub fn load_runs(source: &ParameterSource) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(source.path())
        .map_err(|e| LaunchError::io(source.path(), e))?;
    let parsed = match source.format() {
        ParameterFormat::Json => serde_json::from_str::<Value>(&text).map_err(|e| malformed(source, e))?,
        ParameterFormat::Yaml => serde_yaml::from_str::<Value>(&text).map_err(|e| malformed(source, e))?,
        ParameterFormat::Tsv => return parse_tsv(source, &text),
    };
    match parsed {
        Value::Object(_) => Ok(vec![parsed]),
        Value::Array(runs) if !runs.is_empty() => {
            if runs.iter().all(Value::is_object) {
                Ok(runs)
            } else {
                Err(malformed(source, "every element of a multi-run array must be an object"))
            }
        }
        Value::Array(_) => Err(malformed(source, "no runs in parameter array")),
        _ => Err(malformed(source, "expected an object or an array of objects")),
    }
}

fn parse_tsv(source: &ParameterSource, text: &str) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| malformed(source, e))?.clone();

    let mut runs = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| malformed(source, e))?;
        if index == 0 {
            continue;
        }
        let mut run = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            let value = serde_json::from_str(cell).unwrap_or_else(|_| Value::String(cell.to_string()));
            run.insert(header.to_string(), value);
        }
        runs.push(Value::Object(run));
    }
    if runs.is_empty() {
        return Err(malformed(source, "no data rows after the header and type rows"));
    }
    Ok(runs)
}

/// Write a run's parameters into the working directory
pub fn write_parameters(
    params: &Value,
    working_dir: &Path,
    source: &ParameterSource,
    format: ParameterFormat,
) -> Result<PathBuf> {
    let stem = source
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "parameters".to_string());
    let target = working_dir.join(format!("{}.provisioned.{}", stem, format.extension()));
    let text = match format {
        ParameterFormat::Yaml => serde_yaml::to_string(params).map_err(|e| malformed(source, e))?,
        _ => serde_json::to_string_pretty(params).map_err(|e| malformed(source, e))?,
    };
    std::fs::write(&target, text).map_err(|e| LaunchError::io(&target, e))?;
    Ok(target)
}

/// A file reference found in a parameter object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    /// JSON pointer to the value holding the location
    pub pointer: String,
    /// Human-readable field path, e.g. `reads[1].location`
    pub field: String,
    pub location: String,
}

/// Collect file references the way each language marks them
pub fn find_file_references(params: &Value, language: Language) -> Vec<FileReference> {
    let mut found = Vec::new();
    walk(params, language, String::new(), String::new(), &mut found);
    found
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn join_field(field: &str, key: &str) -> String {
    if field.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", field, key)
    }
}

fn walk(value: &Value, language: Language, pointer: String, field: String, found: &mut Vec<FileReference>) {
    match value {
        Value::Object(map) => {
            if language == Language::Cwl {
                let class = map.get("class").and_then(Value::as_str);
                if matches!(class, Some("File") | Some("Directory")) {
                    let key = if map.contains_key("path") { "path" } else { "location" };
                    if let Some(Value::String(location)) = map.get(key) {
                        found.push(FileReference {
                            pointer: format!("{}/{}", pointer, key),
                            field: join_field(&field, key),
                            location: location.clone(),
                        });
                    }
                    if let Some(secondaries) = map.get("secondaryFiles") {
                        walk(
                            secondaries,
                            language,
                            format!("{}/secondaryFiles", pointer),
                            join_field(&field, "secondaryFiles"),
                            found,
                        );
                    }
                    return;
                }
            }
            for (key, child) in map {
                walk(
                    child,
                    language,
                    format!("{}/{}", pointer, escape_pointer(key)),
                    join_field(&field, key),
                    found,
                );
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                walk(
                    child,
                    language,
                    format!("{}/{}", pointer, index),
                    format!("{}[{}]", field, index),
                    found,
                );
            }
        }
        Value::String(text) if language != Language::Cwl => {
            if scheme_of(text).is_some_and(|s| FILE_SCHEMES.contains(&s.as_str())) {
                found.push(FileReference {
                    pointer,
                    field,
                    location: text.clone(),
                });
            }
        }
        _ => {}
    }
}

/// Rewrites file references in a parameter object to local paths
#[derive(Clone)]
pub struct InputProvisioner {
    transfers: Arc<TransferRegistry>,
}

impl InputProvisioner {
    pub fn new(transfers: Arc<TransferRegistry>) -> Self {
        Self { transfers }
    }

    /// Localize every file reference in `params`, then write the result
    /// into `working_dir`. Every unresolvable reference is reported.
    pub async fn provision(
        &self,
        mut params: Value,
        language: Language,
        source: &ParameterSource,
        working_dir: &Path,
    ) -> Result<PathBuf> {
        let base_dir = std::path::absolute(source.base_dir()).unwrap_or_else(|_| source.base_dir());
        let references = find_file_references(&params, language);
        let mut failures = Vec::new();

        for (index, reference) in references.iter().enumerate() {
            match self.localize(reference, index, &base_dir, working_dir).await {
                Ok(local) => {
                    if local != reference.location {
                        tracing::debug!("{}: {} -> {}", reference.field, reference.location, local);
                    }
                    if let Some(slot) = params.pointer_mut(&reference.pointer) {
                        *slot = Value::String(local);
                    }
                }
                Err(reason) => failures.push(ProvisionFailure {
                    name: reference.field.clone(),
                    target: reference.location.clone(),
                    reason,
                }),
            }
        }

        if !failures.is_empty() {
            return Err(ProvisioningFailures(failures).into());
        }
        tracing::info!("Provisioned {} input file reference(s)", references.len());
        write_parameters(&params, working_dir, source, source.format().provisioned())
    }

    async fn localize(
        &self,
        reference: &FileReference,
        index: usize,
        base_dir: &Path,
        working_dir: &Path,
    ) -> std::result::Result<String, String> {
        let location = reference.location.as_str();
        let scheme = scheme_of(location);

        if scheme.is_none() || scheme.as_deref() == Some(LOCAL_SCHEME) {
            let path = crate::transfer::local_path(location).map_err(|e| e.to_string())?;
            let path = if path.is_absolute() { path } else { base_dir.join(path) };
            if !path.exists() {
                return Err(format!("local file {} does not exist", path.display()));
            }
            return Ok(path.display().to_string());
        }

        let scheme = scheme.unwrap_or_default();
        let plugin = self
            .transfers
            .for_location(location)
            .ok_or_else(|| format!("no transfer plugin handles '{}' locations", scheme))?;
        let name = url::Url::parse(location)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back()).map(str::to_string))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("input-{}", index));
        let target = working_dir.join("inputs").join(index.to_string()).join(name);
        tracing::info!("Downloading {} to {}", location, target.display());
        plugin
            .download(location, &target)
            .await
            .map_err(|e| e.to_string())?;
        Ok(target.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source_in(dir: &Path, name: &str, format: ParameterFormat, text: &str) -> ParameterSource {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        ParameterSource::new(format, path)
    }

    #[test]
    fn json_object_or_array() {
        let dir = tempfile::tempdir().unwrap();
        let single = source_in(dir.path(), "a.json", ParameterFormat::Json, r#"{"x": 1}"#);
        assert_eq!(load_runs(&single).unwrap().len(), 1);

        let many = source_in(dir.path(), "b.json", ParameterFormat::Json, r#"[{"x": 1}, {"x": 2}]"#);
        assert_eq!(load_runs(&many).unwrap()[1], json!({"x": 2}));

        let scalar = source_in(dir.path(), "c.json", ParameterFormat::Json, "42");
        assert_eq!(load_runs(&scalar).unwrap_err().category(), "ValidationError");
    }

    #[test]
    fn yaml_runs() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = source_in(
            dir.path(),
            "a.yml",
            ParameterFormat::Yaml,
            "message: hello\ninput:\n  class: File\n  path: data.txt\n",
        );
        let runs = load_runs(&yaml).unwrap();
        assert_eq!(runs[0]["input"]["class"], "File");
    }

    #[test]
    fn tsv_skips_type_row() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = source_in(
            dir.path(),
            "runs.tsv",
            ParameterFormat::Tsv,
            "name\tcount\tflag\nString\tInt\tBoolean\nalpha\t3\ttrue\nbeta\t4\t\n",
        );
        let runs = load_runs(&tsv).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], json!({"name": "alpha", "count": 3, "flag": true}));
        assert_eq!(runs[1], json!({"name": "beta", "count": 4}));
    }

    #[test]
    fn tsv_without_rows_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = source_in(dir.path(), "e.tsv", ParameterFormat::Tsv, "name\nString\n");
        assert!(load_runs(&tsv).is_err());
    }

    #[test]
    fn cwl_references() {
        let params = json!({
            "reads": [
                {"class": "File", "path": "a.fq"},
                {"class": "File", "location": "https://host/b.fq",
                 "secondaryFiles": [{"class": "File", "location": "https://host/b.fq.bai"}]}
            ],
            "label": "https://not-a-file-in-cwl"
        });
        let refs = find_file_references(&params, Language::Cwl);
        let fields: Vec<&str> = refs.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["reads[0].path", "reads[1].location", "reads[1].secondaryFiles[0].location"]
        );
        assert_eq!(refs[1].pointer, "/reads/1/location");
    }

    #[test]
    fn wdl_references_need_a_scheme() {
        let params = json!({"w.input": "gs://bucket/x.bam", "w.name": "sample", "w.local": "/data/x"});
        let refs = find_file_references(&params, Language::Wdl);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].field, "w.input");
    }

    #[tokio::test]
    async fn aggregates_every_unresolvable_reference() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "ok").unwrap();
        let source = source_in(dir.path(), "in.json", ParameterFormat::Json, "{}");
        let params = json!({
            "good": {"class": "File", "path": "present.txt"},
            "missing": {"class": "File", "path": "absent.txt"},
            "bucket": {"class": "File", "location": "s3://bucket/key"}
        });

        let provisioner = InputProvisioner::new(Arc::new(TransferRegistry::default()));
        let err = provisioner
            .provision(params, Language::Cwl, &source, work.path())
            .await
            .unwrap_err();
        match err {
            LaunchError::Provisioning(ProvisioningFailures(failures)) => {
                let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names.len(), 2);
                assert!(names.contains(&"missing.path"));
                assert!(names.contains(&"bucket.location"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "ok").unwrap();
        let source = source_in(dir.path(), "in.json", ParameterFormat::Json, "{}");
        let provisioner = InputProvisioner::new(Arc::new(TransferRegistry::default()));

        let first = provisioner
            .provision(json!({"f": {"class": "File", "path": "data.txt"}}), Language::Cwl, &source, work.path())
            .await
            .unwrap();
        let rewritten: Value = serde_json::from_str(&std::fs::read_to_string(&first).unwrap()).unwrap();
        let absolute = dir.path().join("data.txt").display().to_string();
        assert_eq!(rewritten["f"]["path"], Value::String(absolute.clone()));

        let second = provisioner
            .provision(rewritten.clone(), Language::Cwl, &source, work.path())
            .await
            .unwrap();
        let again: Value = serde_json::from_str(&std::fs::read_to_string(second).unwrap()).unwrap();
        assert_eq!(again, rewritten);
    }
}
