//! Launch runtime
//!
//! Resolves entries, stages working directories, provisions parameters
//! and outputs, and drives each run through its launcher. Backends plug in
//! through the `LauncherRegistry`.

mod cache;
pub mod entry;
mod notify;
mod outputs;
pub mod params;
mod pipeline;
mod registry;
pub mod stager;
pub mod transfer;

pub use cache::LibraryCache;
pub use entry::{DescriptorRegistry, EntryResolver, HttpRegistry};
pub use notify::{NotificationClient, Phase};
pub use outputs::OutputProvisioner;
pub use params::{load_runs, InputProvisioner};
pub use pipeline::{
    LaunchArgs, LaunchPipeline, LaunchPlan, LaunchRequest, LaunchSummary, RunSummary,
    DESCRIPTOR_DIR,
};
pub use registry::{LauncherFactory, LauncherMetadata, LauncherRegistry};
pub use stager::{unzip_archive, zip_directory, WorkspaceStager};
pub use transfer::{FileTransfer, HttpTransfer, LocalTransfer, TransferRegistry};
