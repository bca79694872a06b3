//! Execution backends
//!
//! One launcher per engine: cwltool for CWL, Cromwell for WDL, Nextflow,
//! and a GA4GH WES client for remote submission.

mod cromwell;
mod cwltool;
mod nextflow;
mod process;
mod wes;

pub use cromwell::{
    cromwell_url, declared_file_outputs, extract_report, extract_report_balanced, extract_report_legacy,
    CromwellLauncher, CromwellLauncherFactory, FINAL_OUTPUTS_MARKER,
};
pub use cwltool::{
    declared_output_ids, parse_json_report, rename_secondary, CwltoolLauncher,
    CwltoolLauncherFactory,
};
pub use nextflow::{main_script, nextflow_url, NextflowLauncher, NextflowLauncherFactory};
pub use process::run_process;
pub use wes::{select_attachments, WesLauncher, WesLauncherFactory};
use wflruntime::LauncherRegistry;

use std::sync::Arc;

/// Register every backend with a registry
pub fn register_all(registry: &mut LauncherRegistry) {
    registry.register(Arc::new(cwltool::CwltoolLauncherFactory));
    registry.register(Arc::new(cromwell::CromwellLauncherFactory));
    registry.register(Arc::new(nextflow::NextflowLauncherFactory));
    registry.register(Arc::new(wes::WesLauncherFactory));
}
