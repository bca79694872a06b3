use serde_json::{json, Value};
use std::path::Path;
use wflbackends::CwltoolLauncher;
use wflcore::{EntryKind, ExecutionOutput, Language, Launcher, RunCommand, StagedRun};

const TOOL: &str = r#"
cwlVersion: v1.0
class: CommandLineTool
baseCommand: bwa
inputs:
  reads:
    type: File
outputs:
  - id: aligned
    type: File
    secondaryFiles: [.bai]
  - id: logs
    type: File[]
  - id: stats
    type: File
"#;

fn staged(dir: &Path, output_parameters: Value) -> StagedRun {
    let primary = dir.join("tool.cwl");
    std::fs::write(&primary, TOOL).unwrap();
    let Value::Object(output_parameters) = output_parameters else {
        panic!("output parameters must be an object");
    };
    StagedRun {
        working_dir: dir.to_path_buf(),
        primary,
        archive: None,
        parameter_file: dir.join("inputs.provisioned.json"),
        original_parameter_file: dir.join("inputs.json"),
        output_parameters,
        language: Language::Cwl,
        kind: EntryKind::Tool,
        output_target: None,
    }
}

#[test]
fn test_output_keys_come_from_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let run = staged(dir.path(), json!({}));
    let keys = CwltoolLauncher::new("cwltool").output_keys(&run.primary).unwrap();
    assert_eq!(keys, vec!["aligned", "logs", "stats"]);
}

#[test]
fn test_command_layout() {
    let dir = tempfile::tempdir().unwrap();
    let run = staged(dir.path(), json!({}));
    let command = CwltoolLauncher::new("cwltool").build_run_command(&run).unwrap();
    let RunCommand::Process { program, args, .. } = command else {
        panic!("cwltool runs as a process");
    };
    assert_eq!(program, "cwltool");
    assert_eq!(&args[..2], ["--enable-dev", "--non-strict"]);
    let outdir = args.iter().position(|a| a == "--outdir").unwrap();
    assert_eq!(args[outdir + 1], format!("{}/", dir.path().join("outputs").display()));
    assert_eq!(args[args.len() - 2], run.primary.display().to_string());
    assert_eq!(args[args.len() - 1], run.parameter_file.display().to_string());
}

#[test]
fn test_registers_files_directories_and_secondaries() {
    let dir = tempfile::tempdir().unwrap();
    let run = staged(
        dir.path(),
        json!({
            "aligned": {"class": "File", "path": "/results/sample.bam"},
            "logs": {"class": "Directory", "path": "/results/logs"}
        }),
    );
    let cwltool = CwltoolLauncher::new("cwltool");
    let report = json!({
        "aligned": {
            "class": "File",
            "location": "file:///w/outputs/out.bam",
            "path": "/w/outputs/out.bam",
            "secondaryFiles": [
                {"class": "File", "location": "file:///w/outputs/out.bam.bai", "path": "/w/outputs/out.bam.bai"}
            ]
        },
        "logs": [
            {"class": "File", "location": "file:///w/outputs/a.log"},
            [{"class": "File", "path": "b.log"}]
        ],
        "stats": {"class": "File", "path": "/w/outputs/stats.txt"}
    });

    let bindings = cwltool.declared_outputs(Some(&report), &run).unwrap();
    let names: Vec<&str> = bindings.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["aligned", "logs"], "outputs without a destination stay in place");

    let transfers = cwltool.register_outputs(Some(&report), &bindings, &run).unwrap();
    let pairs: Vec<(String, String)> = transfers
        .iter()
        .map(|t| (t.source.display().to_string(), t.destination.url.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("/w/outputs/out.bam".to_string(), "/results/sample.bam".to_string()),
            ("/w/outputs/out.bam.bai".to_string(), "/results/sample.bam.bai".to_string()),
            ("/w/outputs/a.log".to_string(), "/results/logs".to_string()),
            (dir.path().join("b.log").display().to_string(), "/results/logs".to_string()),
        ]
    );
    assert!(transfers[2].destination.directory);
}

#[test]
fn test_array_outputs_pair_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let run = staged(
        dir.path(),
        json!({
            "logs": [
                {"class": "File", "path": "/results/first.log"},
                {"class": "File", "path": "/results/second.log"}
            ]
        }),
    );
    let report = json!({
        "logs": [
            {"class": "File", "path": "/w/outputs/1.log"},
            {"class": "File", "path": "/w/outputs/2.log"}
        ]
    });
    let cwltool = CwltoolLauncher::new("cwltool");
    let bindings = cwltool.declared_outputs(Some(&report), &run).unwrap();
    let transfers = cwltool.register_outputs(Some(&report), &bindings, &run).unwrap();
    let urls: Vec<&str> = transfers.iter().map(|t| t.destination.url.as_str()).collect();
    assert_eq!(urls, vec!["/results/first.log", "/results/second.log"]);
    assert_eq!(transfers[1].source, Path::new("/w/outputs/2.log"));
}

#[test]
fn test_report_parsed_from_noisy_stdout() {
    let stdout = "INFO /usr/bin/cwltool 1.0\nINFO [job tool.cwl] completed success\n{\n    \"out\": {\"path\": \"/w/outputs/out.txt\"}\n}\nINFO Final process status is success\n";
    let dir = tempfile::tempdir().unwrap();
    let run = staged(dir.path(), json!({}));
    let output = ExecutionOutput::from_process(stdout.to_string(), String::new(), Some(0));
    let report = CwltoolLauncher::new("cwltool").parse_report(&output, &run).unwrap().unwrap();
    assert_eq!(report["out"]["path"], "/w/outputs/out.txt");

    let silent = ExecutionOutput::from_process("INFO done\n".to_string(), String::new(), Some(0));
    let err = CwltoolLauncher::new("cwltool").parse_report(&silent, &run).unwrap_err();
    assert_eq!(err.category(), "ExecutionError");
}

#[test]
fn test_missing_report_blocks_output_registration() {
    let dir = tempfile::tempdir().unwrap();
    let run = staged(dir.path(), json!({}));
    let err = CwltoolLauncher::new("cwltool")
        .register_outputs(None, &[], &run)
        .unwrap_err();
    assert_eq!(err.category(), "ExecutionError");
}
