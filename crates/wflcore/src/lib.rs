//! Core abstractions for the workflow launcher
//!
//! Leaf types shared by every other crate: languages and format detection,
//! entry references, run state, output bindings, the `Launcher` trait,
//! lifecycle events, configuration and the error taxonomy.
//! No network code lives here.

mod config;
pub mod detect;
mod entry;
mod error;
pub mod events;
mod language;
mod launcher;
mod output;
mod params;
mod run;

pub use config::{
    default_config_path, wfl_home, CwltoolConfig, EngineVersion, LaunchConfig, WesConfig,
    DEFAULT_CROMWELL_VERSION, DEFAULT_NEXTFLOW_VERSION, DEFAULT_SERVER_URL,
};
pub use detect::{detect_by_content, detect_by_extension, resolve_language, Detection};
pub use entry::{resolve_under, DescriptorSet, EntryKind, EntryReference, SourceFile};
pub use error::{LaunchError, ValidationError};
pub use events::*;
pub use language::{language_for_path, Language};
pub use launcher::{Backend, LaunchContext, Launcher, RunCommand};
pub use output::{
    FileInfo, OutputBinding, OutputTransfer, ProvisionFailure, ProvisionReport,
    ProvisioningFailures,
};
pub use params::{ParameterFormat, ParameterSource};
pub use run::{ExecutionOutput, RunContext, RunId, RunState, StagedRun};

/// Result type for launch operations
pub type Result<T> = std::result::Result<T, LaunchError>;
