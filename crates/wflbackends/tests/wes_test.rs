use serde_json::json;
use std::path::{Path, PathBuf};
use wflbackends::{select_attachments, WesLauncher};
use wflcore::{
    EntryKind, EventBus, Language, LaunchContext, Launcher, RunCommand, RunId, StagedRun,
};
use wflruntime::zip_directory;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn write_entry_dir(dir: &Path) {
    std::fs::write(dir.join("run.cwl"), "cwlVersion: v1.0\nclass: Workflow\ninputs: []\noutputs: []\nsteps: []\n").unwrap();
    std::fs::write(dir.join("run.yml"), "message: hello\n").unwrap();
    std::fs::write(dir.join("notes.txt"), "not a descriptor\n").unwrap();
    std::fs::write(dir.join("input.json"), "{\"message\": \"hello\"}").unwrap();
}

/// A working directory with an archive of the entry and a parameter file
fn staged_run(working_dir: &Path, entry_dir: &Path) -> StagedRun {
    let archive = working_dir.join("directory.zip");
    zip_directory(entry_dir, &archive).unwrap();
    let parameter_file = working_dir.join("input.provisioned.json");
    std::fs::write(&parameter_file, json!({"message": "hello"}).to_string()).unwrap();
    StagedRun {
        working_dir: working_dir.to_path_buf(),
        primary: entry_dir.join("run.cwl"),
        archive: Some(archive),
        parameter_file,
        original_parameter_file: entry_dir.join("input.json"),
        output_parameters: Default::default(),
        language: Language::Cwl,
        kind: EntryKind::Workflow,
        output_target: None,
    }
}

fn context() -> LaunchContext {
    let bus = EventBus::default();
    let run_id = RunId::new_v4();
    LaunchContext::new(run_id, bus.create_emitter(run_id))
}

#[test]
fn test_attachment_filter_keeps_language_files_and_json() {
    let dir = tempfile::tempdir().unwrap();
    write_entry_dir(dir.path());
    std::fs::create_dir(dir.path().join("nested")).unwrap();

    let selected = select_attachments(dir.path(), Language::Cwl).unwrap();
    assert_eq!(names(&selected), vec!["input.json", "run.cwl", "run.yml"]);
}

#[test]
fn test_attachment_filter_for_wdl() {
    let dir = tempfile::tempdir().unwrap();
    write_entry_dir(dir.path());
    std::fs::write(dir.path().join("hello.wdl"), "workflow hello {}\n").unwrap();

    let selected = select_attachments(dir.path(), Language::Wdl).unwrap();
    assert_eq!(names(&selected), vec!["hello.wdl", "input.json"]);
}

#[test]
fn test_remote_command_names_primary() {
    let working = tempfile::tempdir().unwrap();
    let entry = tempfile::tempdir().unwrap();
    write_entry_dir(entry.path());
    let run = staged_run(working.path(), entry.path());

    let command = WesLauncher::new("http://wes.example/ga4gh/wes/v1/")
        .build_run_command(&run)
        .unwrap();
    match command {
        RunCommand::Remote {
            endpoint,
            workflow_url,
            attachments,
        } => {
            assert_eq!(endpoint, "http://wes.example/ga4gh/wes/v1/runs");
            assert_eq!(workflow_url, "run.cwl");
            assert_eq!(attachments.len(), 2);
        }
        other => panic!("expected a remote command, got {other:?}"),
    }
}

#[tokio::test]
async fn test_submission_posts_filtered_attachments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ga4gh/wes/v1/runs"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": "run-42"})))
        .expect(1)
        .mount(&server)
        .await;

    let working = tempfile::tempdir().unwrap();
    let entry = tempfile::tempdir().unwrap();
    write_entry_dir(entry.path());
    let run = staged_run(working.path(), entry.path());

    let launcher = WesLauncher::new(format!("{}/ga4gh/wes/v1", server.uri()))
        .with_auth(Some("Bearer secret".to_string()));
    let command = launcher.build_run_command(&run).unwrap();
    let output = launcher.execute(&command, &run, &context()).await.unwrap();

    assert!(output.success);
    assert_eq!(output.remote_run_id.as_deref(), Some("run-42"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8_lossy(&requests[0].body);
    for field in [
        "workflow_params",
        "workflow_type",
        "workflow_type_version",
        "tags",
        "workflow_url",
        "workflow_attachment",
    ] {
        assert!(body.contains(&format!("name=\"{}\"", field)), "missing field {field}");
    }
    assert!(body.contains("filename=\"run.cwl\""));
    assert!(body.contains("filename=\"run.yml\""));
    assert!(body.contains("filename=\"input.json\""));
    assert!(!body.contains("notes.txt"), "non-descriptor files are not attached");
    assert_eq!(body.matches("filename=\"run.cwl\"").count(), 1, "attachments are deduplicated");
}

#[tokio::test]
async fn test_refused_submission_is_unsuccessful_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad workflow_type"))
        .mount(&server)
        .await;

    let working = tempfile::tempdir().unwrap();
    let entry = tempfile::tempdir().unwrap();
    write_entry_dir(entry.path());
    let run = staged_run(working.path(), entry.path());

    let launcher = WesLauncher::new(server.uri());
    let command = launcher.build_run_command(&run).unwrap();
    let output = launcher.execute(&command, &run, &context()).await.unwrap();

    assert!(!output.success, "an API refusal is a failed run, not a launch error");
    assert!(output.stderr.contains("bad workflow_type"));
    assert!(output.remote_run_id.is_none());
}

#[tokio::test]
async fn test_unreachable_service_is_remote_access_error() {
    let working = tempfile::tempdir().unwrap();
    let entry = tempfile::tempdir().unwrap();
    write_entry_dir(entry.path());
    let run = staged_run(working.path(), entry.path());

    let launcher = WesLauncher::new("http://127.0.0.1:9");
    let command = launcher.build_run_command(&run).unwrap();
    let err = launcher.execute(&command, &run, &context()).await.unwrap_err();
    assert_eq!(err.category(), "RemoteAccessError");
}
